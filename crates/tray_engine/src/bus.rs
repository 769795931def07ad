//! The boundary between the engine and the message bus.
//!
//! The engine never talks to zbus directly. Everything it needs from the bus goes through
//! [`TrayBus`], and everything the bus has to tell the engine arrives as a [`BusEvent`] on a
//! channel. [`ZbusTrayBus`] is the real implementation.

use std::{
    collections::HashMap,
    future::Future,
    sync::{Arc, Mutex, PoisonError},
    time::Duration,
};

use futures::StreamExt;
use tokio::sync::{mpsc, oneshot};
use zbus::{
    names::InterfaceName,
    zvariant::{OwnedValue, Value},
    SignalContext,
};

use crate::{
    menu::{LayoutNode, MENU_PROPERTIES},
    names,
    pixmap::Pixmap,
    proxy::{DbusMenuProxy, StatusNotifierItemProxy},
    watcher::Watcher,
    Error, Result,
};

/// Something the bus wants the engine to handle.
#[derive(Debug)]
pub enum BusEvent {
    /// `RegisterStatusNotifierItem(arg)` from `sender`. `ack` is answered once the item is in the
    /// registry.
    RegisterItem { sender: String, arg: String, ack: Option<oneshot::Sender<()>> },
    /// `RegisterStatusNotifierHost` from `sender`.
    RegisterHost { sender: String },
    /// `org.freedesktop.DBus.NameOwnerChanged`.
    OwnerChanged { name: String, old_owner: Option<String>, new_owner: Option<String> },
    /// A change notification broadcast by an item.
    ItemSignal { sender: String, kind: ItemSignal },
}

/// Item signals that make us re-read the icon.
#[derive(Debug, Clone, Copy, PartialEq, Eq, derive_more::Display)]
pub enum ItemSignal {
    NewIcon,
    NewAttentionIcon,
    NewOverlayIcon,
    NewStatus,
}

impl std::str::FromStr for ItemSignal {
    type Err = ();

    fn from_str(s: &str) -> std::result::Result<Self, ()> {
        match s {
            "NewIcon" => Ok(ItemSignal::NewIcon),
            "NewAttentionIcon" => Ok(ItemSignal::NewAttentionIcon),
            "NewOverlayIcon" => Ok(ItemSignal::NewOverlayIcon),
            "NewStatus" => Ok(ItemSignal::NewStatus),
            _ => Err(()),
        }
    }
}

/// Properties of `org.kde.StatusNotifierItem` the engine reads.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, derive_more::Display)]
pub enum ItemProperty {
    IconPixmap,
    IconName,
    IconThemePath,
    AttentionIconPixmap,
    AttentionIconName,
    OverlayIconPixmap,
    OverlayIconName,
    Menu,
    ItemIsMenu,
}

/// A property value, already narrowed to the shape the engine cares about.
#[derive(Debug, Clone, PartialEq)]
pub enum PropertyValue {
    Pixmaps(Vec<Pixmap>),
    Text(String),
    ObjectPath(String),
    Bool(bool),
    /// Present, but of no type we use.
    Other,
}

impl PropertyValue {
    pub fn as_text(&self) -> Option<&str> {
        match self {
            PropertyValue::Text(s) => Some(s),
            _ => None,
        }
    }

    /// Menu paths are object paths per the protocol, but plenty of items send strings.
    pub fn as_path(&self) -> Option<&str> {
        match self {
            PropertyValue::Text(s) | PropertyValue::ObjectPath(s) => Some(s),
            _ => None,
        }
    }

    /// Convert a raw value, using `property` to decide how deep to look into it.
    pub fn from_raw(property: Option<ItemProperty>, value: OwnedValue) -> std::result::Result<Self, zbus::zvariant::Error> {
        use ItemProperty::*;
        Ok(match property {
            Some(IconPixmap | AttentionIconPixmap | OverlayIconPixmap) => PropertyValue::Pixmaps(
                Vec::<(i32, i32, Vec<u8>)>::try_from(value)?.into_iter().map(Pixmap::from).collect(),
            ),
            _ => match &*value {
                Value::Str(s) => PropertyValue::Text(s.to_string()),
                Value::ObjectPath(path) => PropertyValue::ObjectPath(path.to_string()),
                Value::Bool(b) => PropertyValue::Bool(*b),
                _ => PropertyValue::Other,
            },
        })
    }
}

/// Scroll direction for `Scroll`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, derive_more::Display)]
pub enum Orientation {
    #[display("vertical")]
    Vertical,
    #[display("horizontal")]
    Horizontal,
}

/// A method call on an item.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ItemAction {
    Activate { x: i32, y: i32 },
    SecondaryActivate { x: i32, y: i32 },
    XAyatanaSecondaryActivate { timestamp: u32 },
    ContextMenu { x: i32, y: i32 },
    Scroll { delta: i32, orientation: Orientation },
}

impl ItemAction {
    pub fn method_name(&self) -> &'static str {
        match self {
            ItemAction::Activate { .. } => "Activate",
            ItemAction::SecondaryActivate { .. } => "SecondaryActivate",
            ItemAction::XAyatanaSecondaryActivate { .. } => "XAyatanaSecondaryActivate",
            ItemAction::ContextMenu { .. } => "ContextMenu",
            ItemAction::Scroll { .. } => "Scroll",
        }
    }
}

/// Remote operations the engine performs.
///
/// Every call is bounded by a timeout inside the implementation; a peer that doesn't answer in
/// time yields [`Error::Timeout`].
#[allow(async_fn_in_trait)]
pub trait TrayBus {
    /// The unique name currently owning `name`.
    async fn name_owner(&self, name: &str) -> Result<String>;

    /// Introspection XML of an object.
    async fn introspect(&self, service: &str, path: &str) -> Result<String>;

    /// Read one item property, waiting at most `timeout`.
    async fn item_property(
        &self,
        service: &str,
        path: &str,
        property: ItemProperty,
        timeout: Duration,
    ) -> Result<PropertyValue>;

    /// `GetAll` on the item interface. Pixmap properties come back as [`PropertyValue::Other`].
    async fn item_properties(&self, service: &str, path: &str) -> Result<HashMap<String, PropertyValue>>;

    async fn call_item(&self, service: &str, path: &str, action: ItemAction) -> Result<()>;

    async fn menu_about_to_show(&self, service: &str, menu_path: &str, id: i32) -> Result<bool>;

    /// `GetLayout`, decoded no deeper than `max_depth` levels below the requested node.
    async fn menu_layout(&self, service: &str, menu_path: &str, parent_id: i32, max_depth: u32) -> Result<LayoutNode>;

    async fn menu_event(&self, service: &str, menu_path: &str, id: i32, event: &str, timestamp: u32) -> Result<()>;

    async fn emit_item_registered(&self, service: &str) -> Result<()>;

    async fn emit_host_registered(&self) -> Result<()>;

    /// Replace the list the watcher reports as `RegisteredStatusNotifierItems`.
    async fn publish_items(&self, services: Vec<String>) -> Result<()>;
}

/// [`TrayBus`] over a zbus connection.
#[derive(Debug, Clone)]
pub struct ZbusTrayBus {
    con: zbus::Connection,
    timeout: Duration,
    registered: Arc<Mutex<Vec<String>>>,
}

impl ZbusTrayBus {
    pub(crate) fn new(con: zbus::Connection, timeout: Duration, registered: Arc<Mutex<Vec<String>>>) -> Self {
        ZbusTrayBus { con, timeout, registered }
    }

    pub fn connection(&self) -> &zbus::Connection {
        &self.con
    }

    async fn bounded<T, E: Into<Error>>(
        &self,
        peer: &str,
        timeout: Duration,
        call: impl Future<Output = std::result::Result<T, E>>,
    ) -> Result<T> {
        match tokio::time::timeout(timeout, call).await {
            Ok(result) => result.map_err(Into::into),
            Err(_) => Err(Error::Timeout(peer.to_string(), timeout.as_millis() as u64)),
        }
    }

    async fn properties_call<B>(&self, service: &str, path: &str, method: &str, body: &B, timeout: Duration) -> Result<zbus::Message>
    where
        B: serde::Serialize + zbus::zvariant::DynamicType,
    {
        self.bounded(
            service,
            timeout,
            self.con.call_method(Some(service), path, Some("org.freedesktop.DBus.Properties"), method, body),
        )
        .await
    }

    async fn item_proxy(&self, service: &str, path: &str) -> Result<StatusNotifierItemProxy<'static>> {
        Ok(StatusNotifierItemProxy::builder(&self.con)
            .destination(service.to_owned())?
            .path(path.to_owned())?
            .cache_properties(zbus::proxy::CacheProperties::No)
            .build()
            .await?)
    }

    async fn menu_proxy(&self, service: &str, menu_path: &str) -> Result<DbusMenuProxy<'static>> {
        Ok(DbusMenuProxy::builder(&self.con)
            .destination(service.to_owned())?
            .path(menu_path.to_owned())?
            .cache_properties(zbus::proxy::CacheProperties::No)
            .build()
            .await?)
    }

    fn signal_context(&self) -> Result<SignalContext<'static>> {
        Ok(SignalContext::new(&self.con, names::WATCHER_OBJECT)?.into_owned())
    }
}

impl TrayBus for ZbusTrayBus {
    async fn name_owner(&self, name: &str) -> Result<String> {
        let dbus = zbus::fdo::DBusProxy::new(&self.con).await?;
        let name = zbus::names::BusName::try_from(name).map_err(zbus::Error::from)?;
        let owner = self.bounded(name.as_str(), self.timeout, dbus.get_name_owner(name.clone())).await?;
        Ok(owner.to_string())
    }

    async fn introspect(&self, service: &str, path: &str) -> Result<String> {
        let reply = self
            .bounded(
                service,
                self.timeout,
                self.con.call_method(Some(service), path, Some("org.freedesktop.DBus.Introspectable"), "Introspect", &()),
            )
            .await?;
        Ok(reply.body().deserialize::<String>()?)
    }

    async fn item_property(
        &self,
        service: &str,
        path: &str,
        property: ItemProperty,
        timeout: Duration,
    ) -> Result<PropertyValue> {
        let reply = self
            .properties_call(service, path, "Get", &(names::ITEM_INTERFACE, property.to_string()), timeout)
            .await?;
        let value = reply.body().deserialize::<OwnedValue>()?;
        PropertyValue::from_raw(Some(property), value).map_err(|e| Error::malformed(service, e))
    }

    async fn item_properties(&self, service: &str, path: &str) -> Result<HashMap<String, PropertyValue>> {
        let interface = InterfaceName::from_static_str_unchecked(names::ITEM_INTERFACE);
        let reply = self.properties_call(service, path, "GetAll", &(interface,), self.timeout).await?;
        let values = reply.body().deserialize::<HashMap<String, OwnedValue>>()?;
        Ok(values
            .into_iter()
            .map(|(key, value)| {
                let value = PropertyValue::from_raw(None, value).unwrap_or(PropertyValue::Other);
                (key, value)
            })
            .collect())
    }

    async fn call_item(&self, service: &str, path: &str, action: ItemAction) -> Result<()> {
        let sni = self.item_proxy(service, path).await?;
        let call = async {
            match action {
                ItemAction::Activate { x, y } => sni.activate(x, y).await,
                ItemAction::SecondaryActivate { x, y } => sni.secondary_activate(x, y).await,
                ItemAction::XAyatanaSecondaryActivate { timestamp } => sni.xayatana_secondary_activate(timestamp).await,
                ItemAction::ContextMenu { x, y } => sni.context_menu(x, y).await,
                ItemAction::Scroll { delta, orientation } => sni.scroll(delta, &orientation.to_string()).await,
            }
        };
        self.bounded(service, self.timeout, call).await
    }

    async fn menu_about_to_show(&self, service: &str, menu_path: &str, id: i32) -> Result<bool> {
        let menu = self.menu_proxy(service, menu_path).await?;
        self.bounded(service, self.timeout, menu.about_to_show(id)).await
    }

    async fn menu_layout(&self, service: &str, menu_path: &str, parent_id: i32, max_depth: u32) -> Result<LayoutNode> {
        let menu = self.menu_proxy(service, menu_path).await?;
        let (_revision, raw) = self.bounded(service, self.timeout, menu.get_layout(parent_id, -1, MENU_PROPERTIES)).await?;
        // rows are emitted for levels 0 through max_depth below the requested node
        Ok(LayoutNode::decode(raw, max_depth + 1))
    }

    async fn menu_event(&self, service: &str, menu_path: &str, id: i32, event: &str, timestamp: u32) -> Result<()> {
        let menu = self.menu_proxy(service, menu_path).await?;
        self.bounded(service, self.timeout, menu.event(id, event, &Value::from(""), timestamp)).await
    }

    async fn emit_item_registered(&self, service: &str) -> Result<()> {
        Ok(Watcher::status_notifier_item_registered(&self.signal_context()?, service).await?)
    }

    async fn emit_host_registered(&self) -> Result<()> {
        Ok(Watcher::status_notifier_host_registered(&self.signal_context()?).await?)
    }

    async fn publish_items(&self, services: Vec<String>) -> Result<()> {
        *self.registered.lock().unwrap_or_else(PoisonError::into_inner) = services;
        Ok(Watcher::registered_status_notifier_items_refresh(&self.signal_context()?).await?)
    }
}

/// Forward owner changes and item signals into the engine's event channel until either side goes
/// away.
pub async fn forward_signals(con: zbus::Connection, events: mpsc::UnboundedSender<BusEvent>) -> Result<()> {
    let dbus = zbus::fdo::DBusProxy::new(&con).await?;
    let mut owner_changes = dbus.receive_name_owner_changed().await?;

    let rule = zbus::MatchRule::builder()
        .msg_type(zbus::message::Type::Signal)
        .interface(names::ITEM_INTERFACE)?
        .build();
    let mut item_signals = zbus::MessageStream::for_match_rule(rule, &con, None).await?;

    loop {
        let event = tokio::select! {
            Some(sig) = owner_changes.next() => {
                let args = sig.args()?;
                BusEvent::OwnerChanged {
                    name: args.name().to_string(),
                    old_owner: Option::as_ref(args.old_owner()).map(|owner| owner.to_string()),
                    new_owner: Option::as_ref(args.new_owner()).map(|owner| owner.to_string()),
                }
            }
            Some(msg) = item_signals.next() => {
                let Ok(msg) = msg else { continue };
                let header = msg.header();
                let (Some(sender), Some(member)) = (header.sender(), header.member()) else { continue };
                let Ok(kind) = member.as_str().parse::<ItemSignal>() else { continue };
                BusEvent::ItemSignal { sender: sender.to_string(), kind }
            }
            else => break,
        };
        if events.send(event).is_err() {
            break;
        }
    }
    log::debug!("stopped forwarding bus signals");
    Ok(())
}
