// SPDX-License-Identifier: CEPL-1.0
use anyhow::Result;
use raw_window_handle::{HasDisplayHandle, HasWindowHandle};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RenderSize {
    pub width: u32,
    pub height: u32,
}

impl RenderSize {
    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }
}

/// Start-up knobs handed to a backend when it is created.
#[derive(Clone, Debug, PartialEq)]
pub struct RenderConfig {
    pub app_name: String,
    pub clear_color: [f32; 4],
    pub vsync: bool,
    /// Enable API validation and route its messages into the log.
    pub validation: bool,
}

impl Default for RenderConfig {
    fn default() -> Self {
        Self {
            app_name: "Hello Triangle".to_owned(),
            clear_color: [0.0, 0.0, 0.0, 1.0],
            vsync: true,
            validation: cfg!(debug_assertions),
        }
    }
}

pub trait Renderer {
    fn new(
        window: &dyn HasWindowHandle,
        display: &dyn HasDisplayHandle,
        size: RenderSize,
        config: &RenderConfig,
    ) -> Result<Self>
    where
        Self: Sized;

    fn resize(&mut self, size: RenderSize) -> Result<()>;
    fn render(&mut self) -> Result<()>;
    fn set_clear_color(&mut self, rgba: [f32; 4]);
    fn set_vsync(&mut self, _on: bool) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_sized_surfaces_are_empty() {
        assert!(RenderSize { width: 0, height: 600 }.is_empty());
        assert!(RenderSize { width: 800, height: 0 }.is_empty());
        assert!(!RenderSize { width: 1, height: 1 }.is_empty());
    }

    #[test]
    fn default_config_clears_to_opaque_black() {
        let cfg = RenderConfig::default();
        assert_eq!(cfg.clear_color, [0.0, 0.0, 0.0, 1.0]);
        assert_eq!(cfg.app_name, "Hello Triangle");
        assert!(cfg.vsync);
        assert_eq!(cfg.validation, cfg!(debug_assertions));
    }
}
