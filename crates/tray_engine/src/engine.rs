//! The tray engine: owns the registry, the icon cache and the popup state, and applies bus
//! events to them.

use std::time::Instant;

use tokio::sync::{mpsc, oneshot};

use crate::{
    bus::{BusEvent, ItemAction, ItemSignal, Orientation, TrayBus},
    cache::{CacheStats, FileIconLoader, IconCache, IconLoader},
    config::TrayConfig,
    dispatch::MenuPopup,
    item,
    menu::{self, MenuItem},
    registry::{Registry, TrayItem},
    surface::SurfaceRef,
};

/// All state of one tray.
///
/// The engine is driven by its owner: [`TrayEngine::wait_for_traffic`] resolves when the bus has
/// something for us, [`TrayEngine::process`] handles everything that is queued. Items are
/// addressed by their index in the tray row, which stays valid until the next `process`.
pub struct TrayEngine<B, L = FileIconLoader> {
    pub(crate) bus: B,
    events: mpsc::UnboundedReceiver<BusEvent>,
    pending: Option<BusEvent>,
    pub(crate) registry: Registry,
    pub(crate) cache: IconCache<L>,
    pub(crate) config: TrayConfig,
    pub(crate) popup: Option<MenuPopup>,
    pub(crate) suppress_raise_until: Option<Instant>,
}

impl<B: TrayBus> TrayEngine<B> {
    pub fn new(bus: B, events: mpsc::UnboundedReceiver<BusEvent>, config: TrayConfig) -> Self {
        TrayEngine::with_loader(bus, events, config, FileIconLoader::default())
    }
}

impl<B: TrayBus, L: IconLoader> TrayEngine<B, L> {
    /// Like [`TrayEngine::new`], but with a custom way of loading named icons.
    pub fn with_loader(bus: B, events: mpsc::UnboundedReceiver<BusEvent>, config: TrayConfig, loader: L) -> Self {
        let cache = IconCache::new(config.cache_capacity, config.cache_icon_px, config.cache_scale, loader);
        TrayEngine {
            bus,
            events,
            pending: None,
            registry: Registry::default(),
            cache,
            config,
            popup: None,
            suppress_raise_until: None,
        }
    }

    pub fn bus(&self) -> &B {
        &self.bus
    }

    pub fn config(&self) -> &TrayConfig {
        &self.config
    }

    /// Wait until there is bus traffic to process. Returns `false` once no more events can
    /// arrive.
    ///
    /// This is cancel safe, so it can be used in a `select!` next to other event sources.
    pub async fn wait_for_traffic(&mut self) -> bool {
        if self.pending.is_some() {
            return true;
        }
        match self.events.recv().await {
            Some(event) => {
                self.pending = Some(event);
                true
            }
            None => false,
        }
    }

    /// Handle every event that is currently queued. Returns whether the tray has to be redrawn.
    pub async fn process(&mut self) -> bool {
        let mut dirty = false;
        if let Some(event) = self.pending.take() {
            dirty |= self.dispatch(event).await;
        }
        while let Ok(event) = self.events.try_recv() {
            dirty |= self.dispatch(event).await;
        }
        dirty
    }

    /// Handle a single event. Returns whether the tray has to be redrawn.
    pub async fn dispatch(&mut self, event: BusEvent) -> bool {
        match event {
            BusEvent::RegisterItem { sender, arg, ack } => self.register_item(&sender, &arg, ack).await,
            BusEvent::RegisterHost { sender } => {
                log::info!("host registered: {}", sender);
                false
            }
            BusEvent::OwnerChanged { name, old_owner, new_owner } => {
                let old_owner = old_owner.unwrap_or_default();
                let new_owner = new_owner.unwrap_or_default();
                if old_owner.is_empty() || !new_owner.is_empty() {
                    return false;
                }
                self.owner_lost(&name, &old_owner).await
            }
            BusEvent::ItemSignal { sender, kind } => self.item_signal(&sender, kind).await,
        }
    }

    async fn register_item(&mut self, sender: &str, arg: &str, ack: Option<oneshot::Sender<()>>) -> bool {
        let (service, path) = item::parse_register_arg(sender, arg);
        let owner = item::resolve_owner(&self.bus, &service, sender).await;
        let (idx, is_new) = self.registry.upsert(&service, &owner, &path);
        if is_new {
            log::info!("new item: {}{} (owner {})", service, path, owner);
        } else {
            log::info!("item re-registered: {}{} (owner {})", service, path, owner);
        }
        self.publish().await;

        // the peer may be blocked in this very call, so it can only answer after the ack
        if let Some(ack) = ack {
            if ack.send(()).is_err() {
                log::debug!("registration of {} was abandoned by the caller", service);
            }
        }

        let icon_changed = self.refresh(idx).await;
        if let Err(e) = self.bus.emit_item_registered(&service).await {
            log::warn!("failed to announce item {}: {}", service, e);
        }
        is_new || icon_changed
    }

    async fn owner_lost(&mut self, name: &str, old_owner: &str) -> bool {
        let Some(removed) = self.registry.remove_owner(old_owner) else {
            return false;
        };
        log::info!("lost item: {} ({} gave up {})", removed.service, old_owner, name);
        if self.popup.as_ref().is_some_and(|popup| popup.owner == removed.service) {
            self.close_menu();
        }
        self.publish().await;
        true
    }

    async fn item_signal(&mut self, sender: &str, kind: ItemSignal) -> bool {
        let Some(idx) = self.registry.position_by_owner(sender) else {
            log::trace!("{} from unknown sender {}", kind, sender);
            return false;
        };
        log::debug!("{} from {}", kind, sender);
        self.refresh(idx).await
    }

    /// Re-read the item at `idx`. Returns whether its icon changed.
    async fn refresh(&mut self, idx: usize) -> bool {
        match self.registry.get_mut(idx) {
            Some(tray_item) => item::refresh(&self.bus, tray_item, &mut self.cache, &self.config).await,
            None => false,
        }
    }

    async fn publish(&self) {
        if let Err(e) = self.bus.publish_items(self.registry.services()).await {
            log::warn!("failed to update the registered items: {}", e);
        }
    }

    pub fn count(&self) -> usize {
        self.registry.len()
    }

    pub fn item(&self, idx: usize) -> Option<&TrayItem> {
        self.registry.get(idx)
    }

    pub fn items(&self) -> impl Iterator<Item = &TrayItem> {
        self.registry.iter()
    }

    /// The icon of the item at `idx`. `None` means the host should draw a placeholder.
    pub fn icon(&self, idx: usize) -> Option<SurfaceRef> {
        self.registry.get(idx)?.icon.clone()
    }

    pub fn has_menu(&self, idx: usize) -> bool {
        self.registry.get(idx).is_some_and(TrayItem::has_menu)
    }

    pub fn has_activate(&self, idx: usize) -> bool {
        self.registry.get(idx).is_some_and(|item| item.capabilities.activate)
    }

    pub fn has_secondary_activate(&self, idx: usize) -> bool {
        self.registry.get(idx).is_some_and(|item| item.capabilities.secondary_activate)
    }

    pub fn has_xayatana_secondary_activate(&self, idx: usize) -> bool {
        self.registry.get(idx).is_some_and(|item| item.capabilities.xayatana_secondary_activate)
    }

    pub fn has_context_menu(&self, idx: usize) -> bool {
        self.registry.get(idx).is_some_and(|item| item.capabilities.context_menu)
    }

    pub fn is_menu(&self, idx: usize) -> bool {
        self.registry.get(idx).is_some_and(|item| item.capabilities.item_is_menu)
    }

    /// Services of all registered items, as reported by the watcher.
    pub fn registered_items(&self) -> Vec<String> {
        self.registry.services()
    }

    /// Fetch a fresh snapshot of the menu of the item at `idx`.
    pub async fn menu_fetch(&mut self, idx: usize) -> Option<Vec<MenuItem>> {
        let (service, menu_path) = self.menu_target(idx).await?;
        menu::fetch(&self.bus, &service, &menu_path, self.config.menu_depth).await
    }

    /// Owner and menu path of the item at `idx`. An item that registered before exporting its
    /// menu is asked for the `Menu` property again.
    pub(crate) async fn menu_target(&mut self, idx: usize) -> Option<(String, String)> {
        let tray_item = self.registry.get_mut(idx)?;
        if !tray_item.has_menu() {
            item::refresh_menu_path(&self.bus, tray_item, &self.config).await;
            if tray_item.has_menu() {
                log::debug!("{} now exports its menu at {}", tray_item.service, tray_item.menu_path);
            }
        }
        Some((tray_item.service.clone(), tray_item.menu_path.clone()))
    }

    /// Report a click on menu entry `id` of the item at `idx`.
    pub async fn menu_event(&self, idx: usize, id: i32, timestamp: u32) -> bool {
        match self.registry.get(idx) {
            Some(item) if item.has_menu() => menu::click(&self.bus, &item.service, &item.menu_path, id, timestamp).await,
            _ => false,
        }
    }

    async fn call(&self, idx: usize, action: ItemAction) -> bool {
        match self.registry.get(idx) {
            Some(tray_item) => item::call_action(&self.bus, tray_item, action).await,
            None => false,
        }
    }

    pub async fn activate(&self, idx: usize, x: i32, y: i32) -> bool {
        self.call(idx, ItemAction::Activate { x, y }).await
    }

    pub async fn secondary_activate(&self, idx: usize, x: i32, y: i32) -> bool {
        self.call(idx, ItemAction::SecondaryActivate { x, y }).await
    }

    pub async fn xayatana_secondary_activate(&self, idx: usize, timestamp: u32) -> bool {
        self.call(idx, ItemAction::XAyatanaSecondaryActivate { timestamp }).await
    }

    pub async fn context_menu(&self, idx: usize, x: i32, y: i32) -> bool {
        self.call(idx, ItemAction::ContextMenu { x, y }).await
    }

    pub async fn scroll(&self, idx: usize, delta: i32, orientation: Orientation) -> bool {
        self.call(idx, ItemAction::Scroll { delta, orientation }).await
    }

    pub fn cache_stats(&self) -> CacheStats {
        self.cache.stats()
    }

    /// The icon cache, for other icon consumers of the host.
    pub fn cache_mut(&mut self) -> &mut IconCache<L> {
        &mut self.cache
    }
}

impl<B, L> std::fmt::Debug for TrayEngine<B, L> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TrayEngine")
            .field("registry", &self.registry)
            .field("cache", &self.cache.stats())
            .field("popup", &self.popup)
            .finish_non_exhaustive()
    }
}
