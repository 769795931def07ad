//! Proxy for the `com.canonical.dbusmenu` interface.

use std::collections::HashMap;

use zbus::{proxy, zvariant::OwnedValue};

/// A menu node as sent by `GetLayout`: id, properties and children, each child being a variant
/// holding another node.
pub type RawLayout = (i32, HashMap<String, OwnedValue>, Vec<OwnedValue>);

#[proxy(interface = "com.canonical.dbusmenu", assume_defaults = false)]
pub trait DbusMenu {
    /// AboutToShow method
    fn about_to_show(&self, id: i32) -> zbus::Result<bool>;

    /// Event method
    fn event(&self, id: i32, event_id: &str, data: &zbus::zvariant::Value<'_>, timestamp: u32) -> zbus::Result<()>;

    /// GetLayout method
    fn get_layout(
        &self,
        parent_id: i32,
        recursion_depth: i32,
        property_names: &[&str],
    ) -> zbus::Result<(u32, RawLayout)>;
}
