//! The system tray of a desktop dock.
//!
//! Tray icons come from two places. Applications speaking the [StatusNotifierItem] protocol
//! register with our [`watcher`] and are tracked by the [`TrayEngine`], which also resolves
//! their icons, reads their menus and forwards clicks to them. Older applications ask to have a
//! window embedded instead, which [`xembed::XEmbedTray`] takes care of.
//!
//! A host typically does the following:
//!
//! 1. Connect to the session bus, and call [`attach`] to serve the watcher on it.
//! 2. Create a [`TrayEngine`] from the returned bus and event receiver.
//! 3. Whenever [`TrayEngine::wait_for_traffic`] resolves, call [`TrayEngine::process`] and
//!    redraw if it returns `true`.
//!
//! [StatusNotifierItem]: https://freedesktop.org/wiki/Specifications/StatusNotifierItem/

pub mod bus;
pub mod cache;
pub mod config;
pub mod dispatch;
pub mod engine;
mod error;
pub mod icon;
pub mod item;
pub mod menu;
pub mod names;
pub mod pixmap;
pub mod proxy;
pub mod registry;
pub mod surface;
pub mod watcher;
pub mod xembed;

#[cfg(test)]
mod mock;

pub use bus::{BusEvent, TrayBus, ZbusTrayBus};
pub use cache::{CacheStats, IconCache};
pub use config::TrayConfig;
pub use dispatch::{Click, ClickOutcome, DockStacking, TrayRow};
pub use engine::TrayEngine;
pub use error::*;
pub use watcher::attach;
