//! # DBus interface proxies
//!
//! Client-side proxies for the interfaces the tray talks to on other connections. Only the
//! members the engine actually calls are declared. Properties are read through
//! `org.freedesktop.DBus.Properties` directly (see [`crate::bus`]) since items disagree on their
//! types.

mod dbus_status_notifier_item;
pub use dbus_status_notifier_item::*;

mod dbus_menu;
pub use dbus_menu::*;
