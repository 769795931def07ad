use std::sync::{Arc, Mutex, PoisonError};

use tokio::sync::{mpsc, oneshot};
use zbus::{fdo::RequestNameFlags, interface, message::Header, Interface};

use crate::{
    bus::{forward_signals, BusEvent, TrayBus, ZbusTrayBus},
    config::TrayConfig,
    names, Error, Result,
};

/// Our instance of [`org.kde.StatusNotifierWatcher`].
///
/// The watcher keeps no state of its own. Registrations are handed to the engine as
/// [`BusEvent`]s, and `RegisteredStatusNotifierItems` is answered from a list the engine
/// publishes through [`TrayBus::publish_items`].
///
/// [`org.kde.StatusNotifierWatcher`]: https://freedesktop.org/wiki/Specifications/StatusNotifierItem/StatusNotifierWatcher/
#[derive(Debug)]
pub struct Watcher {
    events: mpsc::UnboundedSender<BusEvent>,

    // std::sync::Mutex is enough, the lock is never held across an await.
    items: Arc<Mutex<Vec<String>>>,
}

#[interface(name = "org.kde.StatusNotifierWatcher")]
impl Watcher {
    /// RegisterStatusNotifierItem method
    ///
    /// Replies once the item is in the engine's registry, but before any of its properties have
    /// been read.
    async fn register_status_notifier_item(&self, service: &str, #[zbus(header)] hdr: Header<'_>) -> zbus::fdo::Result<()> {
        let sender = hdr.sender().map(|sender| sender.to_string()).unwrap_or_default();
        if sender.is_empty() && (service.is_empty() || service.starts_with('/')) {
            log::warn!("item registration {:?} without a sender", service);
            return Err(zbus::fdo::Error::InvalidArgs("Unknown bus address".into()));
        }
        request_registration(&self.events, sender, service.to_string()).await
    }

    /// RegisterStatusNotifierHost method
    ///
    /// We are the only host we care about, so other hosts are acknowledged and otherwise ignored.
    async fn register_status_notifier_host(&self, service: &str, #[zbus(header)] hdr: Header<'_>) -> zbus::fdo::Result<()> {
        let sender = hdr.sender().map(|sender| sender.to_string()).unwrap_or_else(|| service.to_string());
        // the engine may already be gone during shutdown, which is fine
        let _ = self.events.send(BusEvent::RegisterHost { sender });
        Ok(())
    }

    /// GetRegisteredStatusNotifierItems method, same as reading the property.
    async fn get_registered_status_notifier_items(&self) -> Vec<String> {
        self.items.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    /// StatusNotifierItemRegistered signal
    #[zbus(signal)]
    pub(crate) async fn status_notifier_item_registered(ctxt: &zbus::SignalContext<'_>, service: &str) -> zbus::Result<()>;

    /// StatusNotifierHostRegistered signal
    #[zbus(signal)]
    pub(crate) async fn status_notifier_host_registered(ctxt: &zbus::SignalContext<'_>) -> zbus::Result<()>;

    /// RegisteredStatusNotifierItems property
    #[zbus(property)]
    async fn registered_status_notifier_items(&self) -> Vec<String> {
        self.items.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    /// IsStatusNotifierHostRegistered property
    #[zbus(property)]
    fn is_status_notifier_host_registered(&self) -> bool {
        true
    }

    /// ProtocolVersion property
    #[zbus(property)]
    fn protocol_version(&self) -> i32 {
        0
    }
}

impl Watcher {
    /// Equivalent to `registered_status_notifier_items_invalidate`, but without requiring `self`.
    pub(crate) async fn registered_status_notifier_items_refresh(ctxt: &zbus::SignalContext<'_>) -> zbus::Result<()> {
        zbus::fdo::Properties::properties_changed(
            ctxt,
            Self::name(),
            &std::collections::HashMap::new(),
            &["RegisteredStatusNotifierItems"],
        )
        .await
    }
}

/// Hand a registration to the engine and wait until it has been recorded.
async fn request_registration(events: &mpsc::UnboundedSender<BusEvent>, sender: String, arg: String) -> zbus::fdo::Result<()> {
    let (ack, acked) = oneshot::channel();
    events
        .send(BusEvent::RegisterItem { sender, arg, ack: Some(ack) })
        .map_err(|_| zbus::fdo::Error::Failed("the tray is shutting down".into()))?;
    acked.await.map_err(|_| zbus::fdo::Error::Failed("the tray dropped the registration".into()))
}

/// Serve the watcher on `con` and become `org.kde.StatusNotifierWatcher`.
///
/// An existing watcher is replaced if it allows that. If the name can't be taken, the tray can't
/// work and [`Error::NameTaken`] is returned. On success, the returned bus is ready for a
/// [`TrayEngine`][crate::TrayEngine], which should be fed from the returned receiver.
pub async fn attach(con: &zbus::Connection, config: &TrayConfig) -> Result<(ZbusTrayBus, mpsc::UnboundedReceiver<BusEvent>)> {
    let (events, receiver) = mpsc::unbounded_channel();
    let items = Arc::new(Mutex::new(Vec::new()));
    let watcher = Watcher { events: events.clone(), items: items.clone() };

    if !con.object_server().at(names::WATCHER_OBJECT, watcher).await? {
        return Err(zbus::Error::Failure(format!(
            "Object already exists at {} on this connection -- is StatusNotifierWatcher already running?",
            names::WATCHER_OBJECT
        ))
        .into());
    }

    let flags = RequestNameFlags::ReplaceExisting | RequestNameFlags::DoNotQueue;
    match con.request_name_with_flags(names::WATCHER_BUS, flags).await {
        Ok(zbus::fdo::RequestNameReply::PrimaryOwner | zbus::fdo::RequestNameReply::AlreadyOwner) => {}
        Ok(_) | Err(zbus::Error::NameTaken) => return Err(Error::NameTaken(names::WATCHER_BUS.to_string())),
        Err(e) => return Err(e.into()),
    }
    log::info!("serving {} at {}", names::WATCHER_BUS, names::WATCHER_OBJECT);

    tokio::spawn({
        let con = con.clone();
        async move {
            if let Err(e) = forward_signals(con, events).await {
                log::error!("failed to listen for bus signals: {}", e);
            }
        }
    });

    let bus = ZbusTrayBus::new(con.clone(), config.call_timeout(), items);
    bus.emit_host_registered().await?;
    Ok((bus, receiver))
}

#[cfg(test)]
mod test {
    use super::*;
    use pretty_assertions::assert_eq;

    #[tokio::test]
    async fn test_registration_waits_for_ack() {
        let (events, mut receiver) = mpsc::unbounded_channel();
        let engine = tokio::spawn(async move {
            match receiver.recv().await {
                Some(BusEvent::RegisterItem { sender, arg, ack }) => {
                    if let Some(ack) = ack {
                        let _ = ack.send(());
                    }
                    (sender, arg)
                }
                other => panic!("unexpected event {:?}", other),
            }
        });
        request_registration(&events, ":1.9".into(), "/StatusNotifierItem".into()).await.unwrap();
        assert_eq!(engine.await.unwrap(), (":1.9".to_string(), "/StatusNotifierItem".to_string()));
    }

    #[tokio::test]
    async fn test_registration_fails_without_engine() {
        let (events, receiver) = mpsc::unbounded_channel();
        drop(receiver);
        assert!(request_registration(&events, ":1.9".into(), String::new()).await.is_err());

        let (events, mut receiver) = mpsc::unbounded_channel();
        let engine = tokio::spawn(async move {
            // take the event and drop the ack unanswered
            receiver.recv().await.is_some()
        });
        assert!(request_registration(&events, ":1.9".into(), String::new()).await.is_err());
        assert!(engine.await.unwrap());
    }
}
