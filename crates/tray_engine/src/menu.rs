//! Client side of the `com.canonical.dbusmenu` protocol.
//!
//! A menu is fetched as one layout tree, decoded into [`LayoutNode`]s and then flattened into a
//! list of [`MenuItem`] rows that a popup can draw top to bottom.

use zbus::zvariant::OwnedValue;

use crate::{bus::TrayBus, proxy::RawLayout};

/// The only properties we ask `GetLayout` for.
pub const MENU_PROPERTIES: &[&str] =
    &["label", "enabled", "type", "visible", "toggle-type", "toggle-state", "children-display"];

/// A decoded layout property. Properties we didn't ask for are dropped during decoding.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LayoutProperty {
    Label(String),
    Enabled(bool),
    Visible(bool),
    Type(String),
    ToggleType(String),
    ToggleState(i32),
    ChildrenDisplay(String),
}

impl LayoutProperty {
    /// A value of the wrong type is logged and dropped, leaving the row with its default.
    fn decode(key: &str, value: OwnedValue) -> Option<Self> {
        let property = match key {
            "label" => String::try_from(value).map(LayoutProperty::Label),
            "enabled" => bool::try_from(value).map(LayoutProperty::Enabled),
            "visible" => bool::try_from(value).map(LayoutProperty::Visible),
            "type" => String::try_from(value).map(LayoutProperty::Type),
            "toggle-type" => String::try_from(value).map(LayoutProperty::ToggleType),
            "toggle-state" => i32::try_from(value).map(LayoutProperty::ToggleState),
            "children-display" => String::try_from(value).map(LayoutProperty::ChildrenDisplay),
            _ => return None,
        };
        match property {
            Ok(property) => Some(property),
            Err(e) => {
                log::debug!("ignoring menu property {} of unexpected type: {}", key, e);
                None
            }
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LayoutNode {
    pub id: i32,
    pub properties: Vec<LayoutProperty>,
    pub children: Vec<LayoutNode>,
}

impl LayoutNode {
    /// Decode a node received from `GetLayout`.
    ///
    /// `levels` is how many levels of descendants to decode below this node; with 0 only the
    /// node itself is kept. Children that aren't layout structures are skipped.
    pub fn decode(raw: RawLayout, levels: u32) -> Self {
        let (id, raw_properties, raw_children) = raw;

        let mut raw_properties: Vec<(String, OwnedValue)> = raw_properties.into_iter().collect();
        raw_properties.sort_by(|a, b| a.0.cmp(&b.0));
        let properties =
            raw_properties.into_iter().filter_map(|(key, value)| LayoutProperty::decode(&key, value)).collect();

        let mut children = Vec::new();
        if levels > 0 {
            for child in raw_children {
                match RawLayout::try_from(child) {
                    Ok(child) => children.push(LayoutNode::decode(child, levels - 1)),
                    Err(e) => log::debug!("skipping malformed child of menu node {}: {}", id, e),
                }
            }
        }

        LayoutNode { id, properties, children }
    }

    pub fn new(id: i32, properties: Vec<LayoutProperty>, children: Vec<LayoutNode>) -> Self {
        LayoutNode { id, properties, children }
    }

    fn row(&self, level: u32) -> MenuItem {
        let mut row = MenuItem { id: self.id, label: String::new(), enabled: true, separator: false, level, submenu: false };
        let mut visible = true;
        for property in &self.properties {
            match property {
                LayoutProperty::Label(label) => row.label = label.clone(),
                LayoutProperty::Enabled(enabled) => row.enabled = *enabled,
                LayoutProperty::Visible(v) => visible = *v,
                LayoutProperty::Type(kind) => row.separator |= kind == "separator",
                LayoutProperty::ChildrenDisplay(display) => row.submenu = display == "submenu",
                LayoutProperty::ToggleType(_) | LayoutProperty::ToggleState(_) => {}
            }
        }
        if !visible {
            // keep the slot so ids and positions still line up
            row.enabled = false;
            row.label.clear();
            row.separator = true;
        }
        row
    }
}

/// One row of a flattened menu.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MenuItem {
    pub id: i32,
    pub label: String,
    pub enabled: bool,
    pub separator: bool,
    /// Nesting depth, the root's children being level 0.
    pub level: u32,
    /// Whether this row opens a nested menu.
    pub submenu: bool,
}

/// Flatten the children of `root` in document order, down to `max_level`.
///
/// Nodes with id 0 only group their children and produce no row themselves.
pub fn flatten(root: &LayoutNode, max_level: u32) -> Vec<MenuItem> {
    fn walk(node: &LayoutNode, level: u32, max_level: u32, out: &mut Vec<MenuItem>) {
        if level > max_level {
            return;
        }
        if node.id != 0 {
            out.push(node.row(level));
        }
        for child in &node.children {
            walk(child, level + 1, max_level, out);
        }
    }

    let mut out = Vec::new();
    for child in &root.children {
        walk(child, 0, max_level, &mut out);
    }
    out
}

/// Fetch and flatten the menu at `menu_path`. Any failure yields `None`, never a partial menu.
pub async fn fetch<B: TrayBus>(bus: &B, service: &str, menu_path: &str, max_level: u32) -> Option<Vec<MenuItem>> {
    if menu_path.is_empty() {
        return None;
    }
    if let Err(e) = bus.menu_about_to_show(service, menu_path, 0).await {
        log::debug!("AboutToShow failed for {}{}: {}", service, menu_path, e);
    }
    let root = match bus.menu_layout(service, menu_path, 0, max_level).await {
        Ok(root) => root,
        Err(e) => {
            log::warn!("failed to get menu layout of {}{}: {}", service, menu_path, e);
            return None;
        }
    };
    let items = flatten(&root, max_level);
    if items.is_empty() {
        log::debug!("menu of {}{} is empty", service, menu_path);
        return None;
    }
    Some(items)
}

/// Send a `clicked` event for menu item `id`.
pub async fn click<B: TrayBus>(bus: &B, service: &str, menu_path: &str, id: i32, timestamp: u32) -> bool {
    match bus.menu_event(service, menu_path, id, "clicked", timestamp).await {
        Ok(()) => true,
        Err(e) => {
            log::warn!("failed to send menu event {} to {}{}: {}", id, service, menu_path, e);
            false
        }
    }
}
