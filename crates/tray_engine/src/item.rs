//! StatusNotifierItem client: everything the tray learns about an item, it learns here.

use std::{path::Path, rc::Rc};

use itertools::Itertools;
use serde::Deserialize;

use crate::{
    bus::{ItemAction, ItemProperty, PropertyValue, TrayBus},
    cache::{IconCache, IconLoader},
    config::TrayConfig,
    icon::{best_icon_path_in_dir, clean_icon_name},
    names,
    pixmap,
    registry::{ItemState, TrayItem},
    surface::SurfaceRef,
    Error,
};

/// Where an icon can come from, in the order they are tried.
const ICON_CHAIN: [(ItemProperty, IconSource); 6] = [
    (ItemProperty::IconPixmap, IconSource::Pixmap),
    (ItemProperty::IconName, IconSource::Name),
    (ItemProperty::AttentionIconPixmap, IconSource::Pixmap),
    (ItemProperty::AttentionIconName, IconSource::Name),
    (ItemProperty::OverlayIconPixmap, IconSource::Pixmap),
    (ItemProperty::OverlayIconName, IconSource::Name),
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum IconSource {
    Pixmap,
    Name,
}

/// Split the argument of `RegisterStatusNotifierItem` into service name and object path.
///
/// The protocol says the argument is a bus name, but some items send just their object
/// path, in which case the service is the calling connection itself.
pub fn parse_register_arg(sender: &str, arg: &str) -> (String, String) {
    if arg.starts_with('/') {
        (sender.to_string(), arg.to_string())
    } else if arg.is_empty() {
        (sender.to_string(), names::ITEM_OBJECT.to_string())
    } else {
        (arg.to_string(), names::ITEM_OBJECT.to_string())
    }
}

/// Find the unique name behind `service`, falling back to the registering connection.
pub(crate) async fn resolve_owner<B: TrayBus>(bus: &B, service: &str, sender: &str) -> String {
    if service.starts_with(':') {
        return service.to_string();
    }
    match bus.name_owner(service).await {
        Ok(owner) => owner,
        Err(e) => {
            log::debug!("failed to get owner of {:?}, using {}: {}", service, sender, e);
            sender.to_string()
        }
    }
}

/// Re-read everything about `item`. Returns whether its icon changed.
pub(crate) async fn refresh<B: TrayBus, L: IconLoader>(
    bus: &B,
    item: &mut TrayItem,
    cache: &mut IconCache<L>,
    config: &TrayConfig,
) -> bool {
    item.state = ItemState::DiscoveringPath;
    if !discover_path(bus, item).await {
        log::debug!("{} answers on none of the known item paths, keeping {}", item.service, item.path);
    }
    refresh_menu_path(bus, item, config).await;

    item.state = ItemState::ProbingCapabilities;
    match bus.item_property(&item.service, &item.path, ItemProperty::ItemIsMenu, config.call_timeout()).await {
        Ok(PropertyValue::Bool(is_menu)) => item.capabilities.item_is_menu = is_menu,
        Ok(_) => {}
        Err(e) => log_property_error(&item.service, ItemProperty::ItemIsMenu, &e),
    }
    introspect_capabilities(bus, item).await;

    let icon = acquire_icon(bus, item, cache, config).await;
    item.state = ItemState::Ready;
    let changed = match (&item.icon, &icon) {
        (Some(old), Some(new)) => !Rc::ptr_eq(old, new) && **old != **new,
        (None, None) => false,
        _ => true,
    };
    if icon.is_none() {
        log::debug!("no icon for {}{}", item.service, item.path);
    }
    item.icon = icon;
    changed
}

/// Make sure `item.path` points at an object implementing the item interface, trying the paths
/// KDE and Ayatana use if it doesn't.
pub(crate) async fn discover_path<B: TrayBus>(bus: &B, item: &mut TrayItem) -> bool {
    if bus.item_properties(&item.service, &item.path).await.is_ok() {
        return true;
    }

    if try_path(bus, item, names::KDE_ITEM_OBJECT.to_string()).await {
        return true;
    }

    // the Ayatana base is introspected only after the KDE path missed
    match bus.introspect(&item.service, names::AYATANA_ITEM_BASE).await {
        Ok(xml) => match first_child_node(&xml) {
            Some(child) => try_path(bus, item, format!("{}/{}", names::AYATANA_ITEM_BASE, child)).await,
            None => false,
        },
        Err(e) => {
            log::debug!("failed to introspect {}{}: {}", item.service, names::AYATANA_ITEM_BASE, e);
            false
        }
    }
}

async fn try_path<B: TrayBus>(bus: &B, item: &mut TrayItem, candidate: String) -> bool {
    if candidate == item.path || bus.item_properties(&item.service, &candidate).await.is_err() {
        return false;
    }
    log::debug!("{} moved from {} to {}", item.service, item.path, candidate);
    item.path = candidate;
    true
}

fn usable_menu_path(path: &str) -> bool {
    !path.is_empty() && path != "/"
}

/// Read the `Menu` property. A path that's missing or useless doesn't replace a known one.
pub(crate) async fn refresh_menu_path<B: TrayBus>(bus: &B, item: &mut TrayItem, config: &TrayConfig) {
    let direct = match bus.item_property(&item.service, &item.path, ItemProperty::Menu, config.call_timeout()).await {
        Ok(value) => value.as_path().filter(|path| usable_menu_path(path)).map(str::to_owned),
        Err(e) => {
            log_property_error(&item.service, ItemProperty::Menu, &e);
            None
        }
    };

    let found = match direct {
        Some(path) => Some(path),
        None => match bus.item_properties(&item.service, &item.path).await {
            Ok(all) => all
                .get(&ItemProperty::Menu.to_string())
                .and_then(PropertyValue::as_path)
                .filter(|path| usable_menu_path(path))
                .map(str::to_owned),
            Err(e) => {
                log::debug!("GetAll failed for {}{}: {}", item.service, item.path, e);
                None
            }
        },
    };

    if let Some(path) = found {
        item.menu_path = path;
    }
}

/// Probe the methods of `item`, once per registration.
pub(crate) async fn introspect_capabilities<B: TrayBus>(bus: &B, item: &mut TrayItem) {
    if item.introspected {
        return;
    }
    item.introspected = true;
    let xml = match bus.introspect(&item.service, &item.path).await {
        Ok(xml) => xml,
        Err(e) => {
            log::debug!("failed to introspect {}{}: {}", item.service, item.path, e);
            return;
        }
    };
    let methods = method_names(&xml);
    let has = |name: &str| methods.iter().any(|method| method == name);
    let caps = &mut item.capabilities;
    caps.activate = has("Activate");
    caps.secondary_activate = has("SecondaryActivate");
    caps.xayatana_secondary_activate = has("XAyatanaSecondaryActivate");
    caps.context_menu = has("ContextMenu");
    log::debug!("capabilities of {}: {:?}", item.service, caps);
}

/// Walk the icon properties in order and return the first one that yields an image.
async fn acquire_icon<B: TrayBus, L: IconLoader>(
    bus: &B,
    item: &TrayItem,
    cache: &mut IconCache<L>,
    config: &TrayConfig,
) -> Option<SurfaceRef> {
    // only fetched once a name-based source is reached
    let mut theme_path: Option<Option<String>> = None;

    for (property, source) in ICON_CHAIN {
        let value = match bus.item_property(&item.service, &item.path, property, config.call_timeout()).await {
            Ok(value) => value,
            Err(e) => {
                log_property_error(&item.service, property, &e);
                continue;
            }
        };
        let icon = match (source, value) {
            (IconSource::Pixmap, PropertyValue::Pixmaps(pixmaps)) => pixmap::surface_from_pixmaps(&pixmaps).map(Rc::new),
            (IconSource::Name, PropertyValue::Text(name)) if !clean_icon_name(&name).is_empty() => {
                if theme_path.is_none() {
                    theme_path = Some(icon_theme_path(bus, item, config).await);
                }
                icon_from_name(cache, &name, theme_path.as_ref().and_then(Option::as_deref))
            }
            _ => None,
        };
        if icon.is_some() {
            log::debug!("icon of {} from {}", item.service, property);
            return icon;
        }
    }
    None
}

async fn icon_theme_path<B: TrayBus>(bus: &B, item: &TrayItem, config: &TrayConfig) -> Option<String> {
    match bus.item_property(&item.service, &item.path, ItemProperty::IconThemePath, config.theme_path_timeout()).await {
        Ok(value) => value.as_text().filter(|path| !path.is_empty()).map(str::to_owned),
        Err(e) => {
            log_property_error(&item.service, ItemProperty::IconThemePath, &e);
            None
        }
    }
}

/// Resolve an icon name: the item's own theme directory first, then the regular search, then
/// the same with the name lowercased.
fn icon_from_name<L: IconLoader>(cache: &mut IconCache<L>, name: &str, theme_path: Option<&str>) -> Option<SurfaceRef> {
    let name = clean_icon_name(name);
    if let Some(theme_path) = theme_path {
        let found = best_icon_path_in_dir(Path::new(theme_path), name);
        if let Some(icon) = found.as_deref().and_then(Path::to_str).and_then(|path| cache.get(path)) {
            return Some(icon);
        }
    }
    if let Some(icon) = cache.get(name) {
        return Some(icon);
    }
    let lower = name.to_lowercase();
    if lower != name {
        return cache.get(&lower);
    }
    None
}

/// Call a method on the item. Failures are logged and reported as `false`.
pub(crate) async fn call_action<B: TrayBus>(bus: &B, item: &TrayItem, action: ItemAction) -> bool {
    match bus.call_item(&item.service, &item.path, action).await {
        Ok(()) => {
            log::debug!("{} on {}{} ok", action.method_name(), item.service, item.path);
            true
        }
        Err(e) => {
            log::warn!("{} on {}{} failed: {}", action.method_name(), item.service, item.path, e);
            false
        }
    }
}

fn log_property_error(service: &str, property: ItemProperty, e: &Error) {
    if e.is_missing_property() {
        log::trace!("{} has no {}", service, property);
    } else {
        log::debug!("failed to read {} of {}: {}", property, service, e);
    }
}

#[derive(Deserialize)]
struct DBusNode {
    #[serde(default)]
    interface: Vec<DBusInterface>,

    #[serde(default)]
    node: Vec<DBusNode>,

    #[serde(rename = "@name")]
    name: Option<String>,
}

#[derive(Deserialize)]
struct DBusInterface {
    #[serde(default)]
    method: Vec<DBusMethod>,
}

#[derive(Deserialize)]
struct DBusMethod {
    #[serde(rename = "@name")]
    name: String,
}

/// Name of the first child node listed in an introspection document.
fn first_child_node(xml: &str) -> Option<String> {
    match quick_xml::de::from_str::<DBusNode>(xml) {
        Ok(node) => node.node.into_iter().find_map(|child| child.name),
        Err(e) => {
            log::debug!("unparsable introspection data: {}", e);
            None
        }
    }
}

/// Every method name declared by any interface of the node.
fn method_names(xml: &str) -> Vec<String> {
    match quick_xml::de::from_str::<DBusNode>(xml) {
        Ok(node) => node.interface.into_iter().flat_map(|interface| interface.method).map(|method| method.name).collect_vec(),
        Err(e) => {
            log::debug!("unparsable introspection data, scanning it as text: {}", e);
            ["Activate", "SecondaryActivate", "XAyatanaSecondaryActivate", "ContextMenu"]
                .into_iter()
                .filter(|method| xml.contains(&format!("name=\"{}\"", method)))
                .map(str::to_owned)
                .collect_vec()
        }
    }
}
