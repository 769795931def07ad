use crate::surface::SurfaceRef;

/// Methods an item was found to implement.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Capabilities {
    pub activate: bool,
    pub secondary_activate: bool,
    /// Ayatana's `XAyatanaSecondaryActivate`, used by libappindicator items for middle click.
    pub xayatana_secondary_activate: bool,
    pub context_menu: bool,
    /// The `ItemIsMenu` property: the item only wants its menu shown.
    pub item_is_menu: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ItemState {
    DiscoveringPath,
    ProbingCapabilities,
    Ready,
}

/// One registered StatusNotifierItem.
#[derive(Debug, Clone)]
pub struct TrayItem {
    /// The name the item registered with, unique or well-known.
    pub service: String,
    /// Unique name of the connection that owns `service`.
    pub owner: String,
    pub path: String,
    /// Object path of the item's dbusmenu, empty if it has none.
    pub menu_path: String,
    pub capabilities: Capabilities,
    pub icon: Option<SurfaceRef>,
    pub state: ItemState,
    pub(crate) introspected: bool,
}

impl TrayItem {
    pub fn new(service: impl Into<String>, owner: impl Into<String>, path: impl Into<String>) -> Self {
        TrayItem {
            service: service.into(),
            owner: owner.into(),
            path: path.into(),
            menu_path: String::new(),
            capabilities: Capabilities::default(),
            icon: None,
            state: ItemState::DiscoveringPath,
            introspected: false,
        }
    }

    pub fn has_menu(&self) -> bool {
        !self.menu_path.is_empty()
    }
}

/// The registered items, in registration order until a removal swaps the last one in.
///
/// Items are looked up by service name or by owner. Both lookups scan the same storage, so an
/// item can never be reachable through one and not the other.
#[derive(Debug, Default)]
pub struct Registry {
    items: Vec<TrayItem>,
}

impl Registry {
    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn get(&self, idx: usize) -> Option<&TrayItem> {
        self.items.get(idx)
    }

    pub fn get_mut(&mut self, idx: usize) -> Option<&mut TrayItem> {
        self.items.get_mut(idx)
    }

    pub fn iter(&self) -> impl Iterator<Item = &TrayItem> {
        self.items.iter()
    }

    pub fn position_by_service(&self, service: &str) -> Option<usize> {
        self.items.iter().position(|item| item.service == service)
    }

    pub fn position_by_owner(&self, owner: &str) -> Option<usize> {
        self.items.iter().position(|item| item.owner == owner)
    }

    /// Insert an item, or update owner and path of the one registered under `service`.
    ///
    /// Returns the item's index and whether it is new. Updating an item makes it eligible for
    /// capability probing again.
    pub fn upsert(&mut self, service: &str, owner: &str, path: &str) -> (usize, bool) {
        match self.position_by_service(service) {
            Some(idx) => {
                let item = &mut self.items[idx];
                item.owner = owner.to_string();
                item.path = path.to_string();
                item.introspected = false;
                (idx, false)
            }
            None => {
                self.items.push(TrayItem::new(service, owner, path));
                (self.items.len() - 1, true)
            }
        }
    }

    /// Remove the item owned by `owner`, moving the last item into its slot.
    pub fn remove_owner(&mut self, owner: &str) -> Option<TrayItem> {
        let idx = self.position_by_owner(owner)?;
        Some(self.items.swap_remove(idx))
    }

    pub fn services(&self) -> Vec<String> {
        self.items.iter().map(|item| item.service.clone()).collect()
    }
}
