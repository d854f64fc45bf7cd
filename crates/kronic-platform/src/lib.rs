// SPDX-License-Identifier: CEPL-1.0
pub use winit;

use serde::Deserialize;
use winit::dpi::LogicalSize;
use winit::window::{Window, WindowAttributes};

/// Top-level window as described by the `[window]` config table.
#[derive(Clone, Debug, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct WindowSettings {
    pub title: String,
    pub width: u32,
    pub height: u32,
    pub resizable: bool,
}

impl Default for WindowSettings {
    fn default() -> Self {
        Self {
            title: "Vulkan".to_owned(),
            width: 800,
            height: 600,
            resizable: false,
        }
    }
}

impl WindowSettings {
    pub fn attributes(&self) -> WindowAttributes {
        // width/height of 0 would make the surface unusable from the first frame
        let size = LogicalSize::new(self.width.max(1), self.height.max(1));
        tracing::debug!(
            "window attributes: \"{}\" {}x{} resizable={}",
            self.title,
            size.width,
            size.height,
            self.resizable
        );
        Window::default_attributes()
            .with_title(self.title.clone())
            .with_inner_size(size)
            .with_resizable(self.resizable)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use winit::dpi::Size;

    #[test]
    fn defaults_match_fixed_window() {
        let s = WindowSettings::default();
        assert_eq!(s.title, "Vulkan");
        assert_eq!((s.width, s.height), (800, 600));
        assert!(!s.resizable);
    }

    #[test]
    fn attributes_carry_settings() {
        let s = WindowSettings {
            title: "tri".into(),
            width: 1024,
            height: 768,
            resizable: true,
        };
        let a = s.attributes();
        assert_eq!(a.title, "tri");
        assert!(a.resizable);
        assert_eq!(
            a.inner_size,
            Some(Size::Logical(LogicalSize::new(1024.0, 768.0)))
        );
    }

    #[test]
    fn zero_extent_is_bumped_to_one() {
        let s = WindowSettings {
            width: 0,
            height: 0,
            ..Default::default()
        };
        assert_eq!(
            s.attributes().inner_size,
            Some(Size::Logical(LogicalSize::new(1.0, 1.0)))
        );
    }
}
