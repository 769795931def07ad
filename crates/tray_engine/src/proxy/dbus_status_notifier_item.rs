//! Proxy for [`org.kde.StatusNotifierItem`].
//!
//! [`org.kde.StatusNotifierItem`]: https://freedesktop.org/wiki/Specifications/StatusNotifierItem/StatusNotifierItem/

use zbus::proxy;

#[proxy(interface = "org.kde.StatusNotifierItem", assume_defaults = false)]
pub trait StatusNotifierItem {
    /// Activate method
    fn activate(&self, x: i32, y: i32) -> zbus::Result<()>;

    /// ContextMenu method
    fn context_menu(&self, x: i32, y: i32) -> zbus::Result<()>;

    /// Scroll method
    fn scroll(&self, delta: i32, orientation: &str) -> zbus::Result<()>;

    /// SecondaryActivate method
    fn secondary_activate(&self, x: i32, y: i32) -> zbus::Result<()>;

    /// XAyatanaSecondaryActivate method, an Ayatana extension carrying the event timestamp
    #[zbus(name = "XAyatanaSecondaryActivate")]
    fn xayatana_secondary_activate(&self, timestamp: u32) -> zbus::Result<()>;
}
