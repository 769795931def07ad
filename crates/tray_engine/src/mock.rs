//! An in-memory [`TrayBus`] for tests.

use std::{
    cell::RefCell,
    collections::{HashMap, HashSet},
    time::Duration,
};

use tokio::sync::mpsc;

use crate::{
    bus::{BusEvent, ItemAction, ItemProperty, PropertyValue, TrayBus},
    config::TrayConfig,
    engine::TrayEngine,
    menu::LayoutNode,
    surface::Surface,
    Error, Result,
};

#[derive(Debug, Default)]
struct MockObject {
    is_item: bool,
    introspection: String,
    properties: HashMap<ItemProperty, PropertyValue>,
}

#[derive(Debug, Default)]
struct MockState {
    owners: HashMap<String, String>,
    objects: HashMap<(String, String), MockObject>,
    menus: HashMap<(String, String), LayoutNode>,
    failing: HashSet<String>,
    calls: Vec<String>,
    published: Vec<Vec<String>>,
}

/// Records every call that has an effect on the remote side, in order.
#[derive(Debug, Default)]
pub(crate) struct MockBus {
    state: RefCell<MockState>,
}

/// Introspection data of an item object declaring `methods`.
pub(crate) fn item_xml(methods: &[&str]) -> String {
    let methods: String = methods.iter().map(|name| format!(r#"<method name="{}"/>"#, name)).collect();
    format!(r#"<node><interface name="org.kde.StatusNotifierItem">{}</interface></node>"#, methods)
}

fn unknown_object(service: &str, path: &str) -> Error {
    Error::DbusCallError(zbus::fdo::Error::UnknownObject(format!("{}{}", service, path)))
}

impl MockBus {
    fn key(service: &str, path: &str) -> (String, String) {
        (service.to_string(), path.to_string())
    }

    /// An object that only answers `Introspect`.
    pub(crate) fn add_node(&self, service: &str, path: &str, xml: &str) {
        let mut state = self.state.borrow_mut();
        let object = state.objects.entry(Self::key(service, path)).or_default();
        object.introspection = xml.to_string();
    }

    /// An object implementing the item interface. Properties set earlier are kept.
    pub(crate) fn add_item(&self, service: &str, path: &str, xml: &str) {
        let mut state = self.state.borrow_mut();
        let object = state.objects.entry(Self::key(service, path)).or_default();
        object.is_item = true;
        object.introspection = xml.to_string();
    }

    pub(crate) fn set_property(&self, service: &str, path: &str, property: ItemProperty, value: PropertyValue) {
        let mut state = self.state.borrow_mut();
        let object = state.objects.entry(Self::key(service, path)).or_default();
        object.properties.insert(property, value);
    }

    pub(crate) fn set_properties(&self, service: &str, path: &str, properties: HashMap<ItemProperty, PropertyValue>) {
        for (property, value) in properties {
            self.set_property(service, path, property, value);
        }
    }

    pub(crate) fn set_owner(&self, name: &str, owner: &str) {
        self.state.borrow_mut().owners.insert(name.to_string(), owner.to_string());
    }

    pub(crate) fn set_menu(&self, service: &str, menu_path: &str, layout: LayoutNode) {
        self.state.borrow_mut().menus.insert(Self::key(service, menu_path), layout);
    }

    /// Make every call of `method` fail.
    pub(crate) fn fail_method(&self, method: &str) {
        self.state.borrow_mut().failing.insert(method.to_string());
    }

    pub(crate) fn calls(&self) -> Vec<String> {
        self.state.borrow().calls.clone()
    }

    pub(crate) fn count_calls(&self, method: &str) -> usize {
        let prefix = format!("{} ", method);
        self.state.borrow().calls.iter().filter(|call| call.starts_with(&prefix) || *call == method).count()
    }

    pub(crate) fn clear_calls(&self) {
        self.state.borrow_mut().calls.clear();
    }

    /// The most recently published item list.
    pub(crate) fn published(&self) -> Option<Vec<String>> {
        self.state.borrow().published.last().cloned()
    }

    fn record(&self, method: &str, call: String) -> Result<()> {
        let mut state = self.state.borrow_mut();
        state.calls.push(call);
        if state.failing.contains(method) {
            return Err(Error::Timeout(method.to_string(), 0));
        }
        Ok(())
    }

    fn item_object<T>(&self, service: &str, path: &str, f: impl FnOnce(&MockObject) -> Result<T>) -> Result<T> {
        let state = self.state.borrow();
        match state.objects.get(&Self::key(service, path)) {
            Some(object) if object.is_item => f(object),
            _ => Err(unknown_object(service, path)),
        }
    }
}

impl TrayBus for MockBus {
    async fn name_owner(&self, name: &str) -> Result<String> {
        self.state
            .borrow()
            .owners
            .get(name)
            .cloned()
            .ok_or_else(|| Error::DbusCallError(zbus::fdo::Error::NameHasNoOwner(name.to_string())))
    }

    async fn introspect(&self, service: &str, path: &str) -> Result<String> {
        self.record("Introspect", format!("Introspect {}{}", service, path))?;
        let state = self.state.borrow();
        match state.objects.get(&Self::key(service, path)) {
            Some(object) => Ok(object.introspection.clone()),
            None => Err(unknown_object(service, path)),
        }
    }

    async fn item_property(
        &self,
        service: &str,
        path: &str,
        property: ItemProperty,
        _timeout: Duration,
    ) -> Result<PropertyValue> {
        self.item_object(service, path, |object| {
            object
                .properties
                .get(&property)
                .cloned()
                .ok_or_else(|| Error::DbusCallError(zbus::fdo::Error::UnknownProperty(property.to_string())))
        })
    }

    async fn item_properties(&self, service: &str, path: &str) -> Result<HashMap<String, PropertyValue>> {
        self.item_object(service, path, |object| {
            Ok(object
                .properties
                .iter()
                .map(|(property, value)| {
                    let value = match value {
                        PropertyValue::Pixmaps(_) => PropertyValue::Other,
                        value => value.clone(),
                    };
                    (property.to_string(), value)
                })
                .collect())
        })
    }

    async fn call_item(&self, service: &str, path: &str, action: ItemAction) -> Result<()> {
        self.record(action.method_name(), format!("{} {}{}", action.method_name(), service, path))
    }

    async fn menu_about_to_show(&self, service: &str, menu_path: &str, id: i32) -> Result<bool> {
        self.record("AboutToShow", format!("AboutToShow {}{} {}", service, menu_path, id))?;
        Ok(true)
    }

    async fn menu_layout(&self, service: &str, menu_path: &str, parent_id: i32, _max_depth: u32) -> Result<LayoutNode> {
        self.record("GetLayout", format!("GetLayout {}{} {}", service, menu_path, parent_id))?;
        self.state
            .borrow()
            .menus
            .get(&Self::key(service, menu_path))
            .cloned()
            .ok_or_else(|| unknown_object(service, menu_path))
    }

    async fn menu_event(&self, service: &str, menu_path: &str, id: i32, event: &str, timestamp: u32) -> Result<()> {
        self.record("Event", format!("Event {}{} {} {} {}", service, menu_path, id, event, timestamp))
    }

    async fn emit_item_registered(&self, service: &str) -> Result<()> {
        self.record("StatusNotifierItemRegistered", format!("StatusNotifierItemRegistered {}", service))
    }

    async fn emit_host_registered(&self) -> Result<()> {
        self.record("StatusNotifierHostRegistered", "StatusNotifierHostRegistered".to_string())
    }

    async fn publish_items(&self, services: Vec<String>) -> Result<()> {
        self.state.borrow_mut().published.push(services);
        Ok(())
    }
}

/// An engine over `bus` that finds no named icons.
pub(crate) fn test_engine(bus: MockBus) -> (TestEngine, mpsc::UnboundedSender<BusEvent>) {
    let (events, receiver) = mpsc::unbounded_channel();
    let loader = no_named_icons as fn(&str, i32) -> Option<Surface>;
    (TrayEngine::with_loader(bus, receiver, TrayConfig::default(), loader), events)
}

pub(crate) type TestEngine = TrayEngine<MockBus, fn(&str, i32) -> Option<Surface>>;

fn no_named_icons(_name: &str, _px: i32) -> Option<Surface> {
    None
}

/// Register an item the way the watcher would, without an ack.
pub(crate) async fn register(engine: &mut TestEngine, sender: &str, arg: &str) -> bool {
    engine.dispatch(BusEvent::RegisterItem { sender: sender.to_string(), arg: arg.to_string(), ack: None }).await
}
