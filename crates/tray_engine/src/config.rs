use std::time::Duration;

use serde::Deserialize;
use smart_default::SmartDefault;

/// Tunables of the tray engine.
///
/// Every field has a default, so an empty JSON object (or no config at all) gives a working tray.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, SmartDefault)]
#[serde(default)]
pub struct TrayConfig {
    /// Edge length of one tray slot, in pixels.
    #[default = 24]
    pub icon_size: i32,
    /// Gap between two adjacent tray slots. Values `<= 0` fall back to 3.
    #[default = 3]
    pub icon_gap: i32,

    /// Number of rendered icons kept around.
    #[default = 64]
    pub cache_capacity: usize,
    /// Pixel size icons are rasterized at before scaling.
    #[default = 48]
    pub cache_icon_px: i32,
    #[default = 1]
    pub cache_scale: i32,

    /// Timeout for remote calls, in milliseconds.
    #[default = 500]
    pub call_timeout_ms: u64,
    /// Timeout for reading `IconThemePath`, which some items are slow to answer.
    #[default = 200]
    pub theme_path_timeout_ms: u64,

    /// Deepest menu level that is flattened.
    #[default = 4]
    pub menu_depth: u32,
    #[default = 22]
    pub menu_item_height: i32,
    #[default = 220]
    pub menu_width: i32,

    /// Size legacy embedded windows are configured to.
    #[default = 16]
    pub xembed_icon_size: u16,
}

impl TrayConfig {
    pub fn call_timeout(&self) -> Duration {
        Duration::from_millis(self.call_timeout_ms)
    }

    pub fn theme_path_timeout(&self) -> Duration {
        Duration::from_millis(self.theme_path_timeout_ms)
    }

    /// The gap actually used for layout and hit testing.
    pub fn effective_gap(&self) -> i32 {
        if self.icon_gap <= 0 {
            3
        } else {
            self.icon_gap
        }
    }
}
