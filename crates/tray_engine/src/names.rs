//! Well-known bus names, object paths and interface names used by the tray protocols.

pub const WATCHER_BUS: &str = "org.kde.StatusNotifierWatcher";
pub const WATCHER_OBJECT: &str = "/StatusNotifierWatcher";

pub const ITEM_INTERFACE: &str = "org.kde.StatusNotifierItem";
pub const ITEM_OBJECT: &str = "/StatusNotifierItem";

/// Path that KDE applications export their item on.
pub const KDE_ITEM_OBJECT: &str = "/org/kde/StatusNotifierItem";
/// Base path under which libayatana-appindicator exports items, one child node per item.
pub const AYATANA_ITEM_BASE: &str = "/org/ayatana/NotificationItem";
