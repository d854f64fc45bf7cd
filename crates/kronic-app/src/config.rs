// SPDX-License-Identifier: CEPL-1.0
use anyhow::{Context, Result};
use kronic_platform::WindowSettings;
use kronic_render::RenderConfig;
use serde::Deserialize;
use std::fs;
use std::io::ErrorKind;
use std::path::Path;
use tracing::info;

#[derive(Debug, Deserialize, Clone, PartialEq)]
#[serde(default)]
pub struct RenderCfg {
    pub app_name: String,
    pub clear_color: [f32; 4],
    pub vsync: bool,
    pub validation: bool,
}

impl Default for RenderCfg {
    fn default() -> Self {
        let d = RenderConfig::default();
        RenderCfg {
            app_name: d.app_name,
            clear_color: d.clear_color,
            vsync: d.vsync,
            validation: d.validation,
        }
    }
}

impl RenderCfg {
    /// Command-line flags, when given, win over the file.
    pub fn resolve(self, validation: Option<bool>, vsync: Option<bool>) -> RenderConfig {
        RenderConfig {
            app_name: self.app_name,
            clear_color: self.clear_color,
            vsync: vsync.unwrap_or(self.vsync),
            validation: validation.unwrap_or(self.validation),
        }
    }
}

#[derive(Debug, Deserialize, Default, Clone, PartialEq)]
#[serde(default)]
pub struct AppCfg {
    pub window: WindowSettings,
    pub render: RenderCfg,
}

pub fn parse_cfg(text: &str) -> Result<AppCfg, toml::de::Error> {
    toml::from_str(text)
}

pub fn load_cfg(path: &Path) -> Result<AppCfg> {
    match fs::read_to_string(path) {
        Ok(s) => parse_cfg(&s).with_context(|| format!("parsing config {}", path.display())),
        Err(e) if e.kind() == ErrorKind::NotFound => {
            info!("no config at {}, using defaults", path.display());
            Ok(AppCfg::default())
        }
        Err(e) => Err(e).with_context(|| format!("reading config {}", path.display())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_file_is_all_defaults() {
        assert_eq!(parse_cfg("").unwrap(), AppCfg::default());
    }

    #[test]
    fn partial_tables_keep_remaining_defaults() {
        let cfg = parse_cfg(
            r#"
            [window]
            width = 1280
            resizable = true

            [render]
            clear_color = [0.1, 0.2, 0.3, 1.0]
            "#,
        )
        .unwrap();
        assert_eq!(cfg.window.title, "Vulkan");
        assert_eq!((cfg.window.width, cfg.window.height), (1280, 600));
        assert!(cfg.window.resizable);
        assert_eq!(cfg.render.clear_color, [0.1, 0.2, 0.3, 1.0]);
        assert_eq!(cfg.render.app_name, "Hello Triangle");
        assert!(cfg.render.vsync);
    }

    #[test]
    fn malformed_file_is_an_error() {
        assert!(parse_cfg("[window]\nwidth = \"wide\"").is_err());
        assert!(parse_cfg("[render").is_err());
    }

    #[test]
    fn missing_file_yields_defaults() {
        let path = std::env::temp_dir().join("kronic-config-that-does-not-exist.toml");
        assert_eq!(load_cfg(&path).unwrap(), AppCfg::default());
    }

    #[test]
    fn malformed_file_error_names_the_path() {
        let path = std::env::temp_dir().join(format!("kronic-bad-{}.toml", std::process::id()));
        fs::write(&path, "vsync = = true").unwrap();
        let err = load_cfg(&path).unwrap_err();
        fs::remove_file(&path).ok();
        assert!(format!("{err}").contains(&path.display().to_string()));
    }

    #[test]
    fn flags_override_file_values() {
        let file = RenderCfg {
            vsync: true,
            validation: false,
            ..Default::default()
        };
        let rc = file.clone().resolve(Some(true), Some(false));
        assert!(rc.validation);
        assert!(!rc.vsync);

        let rc = file.resolve(None, None);
        assert!(!rc.validation);
        assert!(rc.vsync);
        assert_eq!(rc.app_name, "Hello Triangle");
    }
}
