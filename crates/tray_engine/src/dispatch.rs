//! Turning pointer input on the tray row into remote calls, and the local menu popup.

use std::time::{Duration, Instant};

use crate::{
    bus::TrayBus,
    cache::IconLoader,
    config::TrayConfig,
    engine::TrayEngine,
    menu::{self, MenuItem},
};

/// How long the dock stays lowered before a vendor secondary activation.
pub const VENDOR_POPUP_GRACE: Duration = Duration::from_millis(3000);
/// How long the dock stays lowered before any other call that may open a popup.
pub const POPUP_GRACE: Duration = Duration::from_millis(8000);

/// Vertical distance between a popup and the icon it belongs to.
const POPUP_OFFSET: i32 = 8;
/// Minimal distance between a popup and the screen edges.
const SCREEN_MARGIN: i32 = 2;

/// Geometry of the row of tray icons.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TrayRow {
    pub x: i32,
    pub y: i32,
    pub count: usize,
    pub size: i32,
    pub gap: i32,
}

impl TrayRow {
    pub fn new(x: i32, y: i32, count: usize, config: &TrayConfig) -> Self {
        TrayRow { x, y, count, size: config.icon_size, gap: config.effective_gap() }
    }

    fn stride(&self) -> i32 {
        self.size + if self.gap > 0 { self.gap } else { 3 }
    }

    pub fn width(&self) -> i32 {
        match self.count as i32 {
            0 => 0,
            n => n * self.stride() - (self.stride() - self.size),
        }
    }

    /// Index of the icon under `(x, y)`. Gaps between icons don't belong to any icon.
    pub fn hit_test(&self, x: i32, y: i32) -> Option<usize> {
        if self.count == 0 || self.size <= 0 {
            return None;
        }
        if x < self.x || x >= self.x + self.width() || y < self.y || y >= self.y + self.size {
            return None;
        }
        let rel = x - self.x;
        let idx = (rel / self.stride()) as usize;
        (rel % self.stride() < self.size && idx < self.count).then_some(idx)
    }

    /// Centre of the icon at `idx`.
    pub fn anchor(&self, idx: usize) -> (i32, i32) {
        (self.x + idx as i32 * self.stride() + self.size / 2, self.y + self.size / 2)
    }
}

/// Lets the engine push the dock below a popup that a tray application is about to open.
pub trait DockStacking {
    fn lower(&mut self);
}

impl<F: FnMut()> DockStacking for F {
    fn lower(&mut self) {
        self()
    }
}

/// A pointer click on a tray icon.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Click {
    pub index: usize,
    /// Screen position the click is reported at, usually the icon's centre.
    pub anchor: (i32, i32),
    pub screen: (i32, i32),
    pub timestamp: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClickOutcome {
    /// A local menu is now shown.
    MenuOpened,
    /// At least one call reached the application.
    Dispatched,
    Nothing,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PopupGeometry {
    pub x: i32,
    pub y: i32,
    pub width: i32,
    pub height: i32,
}

impl PopupGeometry {
    /// Centre a popup of `rows` rows horizontally on the anchor, above it, and keep it on screen.
    pub fn place(anchor: (i32, i32), rows: usize, config: &TrayConfig, screen: (i32, i32)) -> Self {
        let (width, height) = (config.menu_width, rows as i32 * config.menu_item_height);
        let mut x = anchor.0 - width / 2;
        let mut y = anchor.1 - height - POPUP_OFFSET;
        if x < SCREEN_MARGIN {
            x = SCREEN_MARGIN;
        }
        if x + width > screen.0 {
            x = screen.0 - width - SCREEN_MARGIN;
        }
        if y + height > screen.1 {
            y = screen.1 - height - SCREEN_MARGIN;
        }
        if y < SCREEN_MARGIN {
            y = SCREEN_MARGIN;
        }
        PopupGeometry { x, y, width, height }
    }
}

/// The menu currently shown for a tray item.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MenuPopup {
    /// Service of the item the menu belongs to.
    pub owner: String,
    pub menu_path: String,
    pub items: Vec<MenuItem>,
    pub geometry: PopupGeometry,
    pub item_height: i32,
}

impl MenuPopup {
    /// The row at vertical offset `y` within the popup.
    pub fn row_at(&self, y: i32) -> Option<&MenuItem> {
        if y < 0 || self.item_height <= 0 {
            return None;
        }
        self.items.get((y / self.item_height) as usize)
    }
}

impl<B: TrayBus, L: IconLoader> TrayEngine<B, L> {
    /// Geometry of a row of all current items starting at `(x, y)`.
    pub fn row(&self, x: i32, y: i32) -> TrayRow {
        TrayRow::new(x, y, self.count(), &self.config)
    }

    /// Primary click: the local menu if there is one, otherwise whatever the item offers.
    pub async fn left_click(&mut self, click: Click, dock: &mut dyn DockStacking) -> ClickOutcome {
        let Some(item) = self.registry.get(click.index) else {
            return ClickOutcome::Nothing;
        };
        let (caps, has_menu) = (item.capabilities, item.has_menu());
        let (idx, (x, y)) = (click.index, click.anchor);

        if has_menu && self.open_menu(idx, x, y, click.screen.0, click.screen.1).await {
            return ClickOutcome::MenuOpened;
        }

        let mut acted = false;
        if caps.xayatana_secondary_activate {
            self.lower_for_popup(VENDOR_POPUP_GRACE, dock);
            acted |= self.xayatana_secondary_activate(idx, click.timestamp).await;
        }
        if caps.secondary_activate {
            self.lower_for_popup(POPUP_GRACE, dock);
            acted |= self.secondary_activate(idx, x, y).await;
        }
        if !acted && caps.activate {
            self.lower_for_popup(POPUP_GRACE, dock);
            acted = self.activate(idx, x, y).await;
        }
        if !acted && caps.item_is_menu {
            if self.open_menu(idx, x, y, click.screen.0, click.screen.1).await {
                return ClickOutcome::MenuOpened;
            }
            self.lower_for_popup(POPUP_GRACE, dock);
            acted = self.context_menu(idx, x, y).await;
        }

        if acted {
            ClickOutcome::Dispatched
        } else {
            log::debug!("no action available for tray item {}", idx);
            ClickOutcome::Nothing
        }
    }

    /// Secondary click: the local menu, or the item's own context menu.
    pub async fn right_click(&mut self, click: Click, dock: &mut dyn DockStacking) -> ClickOutcome {
        let (idx, (x, y)) = (click.index, click.anchor);
        if self.open_menu(idx, x, y, click.screen.0, click.screen.1).await {
            return ClickOutcome::MenuOpened;
        }
        if !self.has_context_menu(idx) {
            return ClickOutcome::Nothing;
        }
        self.lower_for_popup(POPUP_GRACE, dock);
        if self.context_menu(idx, x, y).await {
            ClickOutcome::Dispatched
        } else {
            ClickOutcome::Nothing
        }
    }

    /// Fetch the menu of the item at `idx` and show it next to `(anchor_x, anchor_y)`.
    ///
    /// Any menu shown before is closed, even if this one can't be opened.
    pub async fn open_menu(&mut self, idx: usize, anchor_x: i32, anchor_y: i32, screen_w: i32, screen_h: i32) -> bool {
        self.close_menu();
        let Some((owner, menu_path)) = self.menu_target(idx).await else {
            return false;
        };
        let Some(items) = menu::fetch(&self.bus, &owner, &menu_path, self.config.menu_depth).await else {
            return false;
        };
        let geometry = PopupGeometry::place((anchor_x, anchor_y), items.len(), &self.config, (screen_w, screen_h));
        log::debug!("showing menu of {} with {} rows at {:?}", owner, items.len(), geometry);
        self.popup = Some(MenuPopup { owner, menu_path, items, geometry, item_height: self.config.menu_item_height });
        true
    }

    /// A click at vertical offset `y` inside the popup. The popup is closed either way.
    ///
    /// Returns whether an event was sent.
    pub async fn menu_click(&mut self, y: i32, timestamp: u32) -> bool {
        let Some(popup) = self.popup.take() else {
            return false;
        };
        let Some(row) = popup.row_at(y).filter(|row| row.enabled && !row.separator) else {
            return false;
        };
        if self.registry.position_by_service(&popup.owner).is_none() {
            log::debug!("menu owner {} is gone", popup.owner);
            return false;
        }
        menu::click(&self.bus, &popup.owner, &popup.menu_path, row.id, timestamp).await
    }

    pub fn close_menu(&mut self) {
        self.popup = None;
    }

    pub fn popup(&self) -> Option<&MenuPopup> {
        self.popup.as_ref()
    }

    /// Whether the host should keep the dock lowered at `now`.
    pub fn raise_suppressed(&self, now: Instant) -> bool {
        self.suppress_raise_until.is_some_and(|until| now < until)
    }

    fn lower_for_popup(&mut self, grace: Duration, dock: &mut dyn DockStacking) {
        let until = Instant::now() + grace;
        self.suppress_raise_until = Some(match self.suppress_raise_until {
            Some(existing) if existing > until => existing,
            _ => until,
        });
        dock.lower();
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::{
        bus::{ItemProperty, PropertyValue},
        menu::{LayoutNode, LayoutProperty},
        mock::{item_xml, register, test_engine, MockBus, TestEngine},
        names,
    };
    use pretty_assertions::assert_eq;

    const SERVICE: &str = ":1.80";
    const SCREEN: (i32, i32) = (1920, 1080);

    fn entry(id: i32, label: &str) -> LayoutNode {
        LayoutNode::new(id, vec![LayoutProperty::Label(label.to_string())], vec![])
    }

    fn separator(id: i32) -> LayoutNode {
        LayoutNode::new(id, vec![LayoutProperty::Type("separator".to_string())], vec![])
    }

    fn click(index: usize) -> Click {
        Click { index, anchor: (500, 1060), screen: SCREEN, timestamp: 77 }
    }

    /// An item with the given methods and, if `menu` is set, a menu with three rows.
    async fn engine_with_item(methods: &[&str], menu: bool) -> TestEngine {
        let bus = MockBus::default();
        bus.add_item(SERVICE, names::ITEM_OBJECT, &item_xml(methods));
        if menu {
            bus.set_property(SERVICE, names::ITEM_OBJECT, ItemProperty::Menu, PropertyValue::ObjectPath("/MenuBar".into()));
            bus.set_menu(SERVICE, "/MenuBar", LayoutNode::new(0, vec![], vec![entry(1, "Open"), separator(2), entry(3, "Quit")]));
        }
        let (mut engine, _events) = test_engine(bus);
        register(&mut engine, SERVICE, "").await;
        engine.bus().clear_calls();
        engine
    }

    #[test]
    fn test_hit_test_boundaries() {
        let row = TrayRow { x: 100, y: 0, count: 3, size: 24, gap: 3 };
        assert_eq!(row.hit_test(100, 5), Some(0));
        assert_eq!(row.hit_test(123, 5), Some(0));
        assert_eq!(row.hit_test(124, 5), None);
        assert_eq!(row.hit_test(126, 5), None);
        assert_eq!(row.hit_test(127, 5), Some(1));
        assert_eq!(row.hit_test(150, 5), Some(1));
        assert_eq!(row.hit_test(99, 5), None);
        assert_eq!(row.hit_test(100, 24), None);
        assert_eq!(row.hit_test(100, -1), None);
        assert_eq!(row.width(), 78);
        assert_eq!(row.hit_test(177, 5), Some(2));
        assert_eq!(row.hit_test(178, 5), None);
    }

    #[test]
    fn test_hit_test_degenerate_rows() {
        let empty = TrayRow { x: 0, y: 0, count: 0, size: 24, gap: 3 };
        assert_eq!(empty.hit_test(0, 0), None);
        let no_gap = TrayRow { x: 0, y: 0, count: 2, size: 24, gap: 0 };
        assert_eq!(no_gap.hit_test(25, 0), None);
        assert_eq!(no_gap.hit_test(27, 0), Some(1));
    }

    #[test]
    fn test_anchor_is_icon_centre() {
        let row = TrayRow { x: 100, y: 10, count: 3, size: 24, gap: 3 };
        assert_eq!(row.anchor(0), (112, 22));
        assert_eq!(row.anchor(2), (166, 22));
    }

    #[test]
    fn test_popup_placement() {
        let config = TrayConfig::default();
        let place = |anchor| PopupGeometry::place(anchor, 3, &config, SCREEN);
        assert_eq!(place((500, 700)), PopupGeometry { x: 390, y: 626, width: 220, height: 66 });
        assert_eq!(place((50, 700)).x, 2);
        assert_eq!(place((1900, 700)).x, 1698);
        assert_eq!(place((500, 30)).y, 2);
        assert_eq!(place((500, 2000)).y, 1012);
    }

    #[tokio::test]
    async fn test_left_click_prefers_menu_over_activate() {
        let mut engine = engine_with_item(&["Activate", "SecondaryActivate"], true).await;
        let mut lowered = 0;
        let outcome = engine.left_click(click(0), &mut || lowered += 1).await;

        assert_eq!(outcome, ClickOutcome::MenuOpened);
        assert_eq!(engine.bus().count_calls("Activate"), 0);
        assert_eq!(engine.bus().count_calls("SecondaryActivate"), 0);
        assert_eq!(lowered, 0);
        let popup = engine.popup().unwrap();
        assert_eq!(popup.owner, SERVICE);
        assert_eq!(popup.items.iter().map(|row| row.id).collect::<Vec<_>>(), vec![1, 2, 3]);
        assert_eq!(popup.geometry, PopupGeometry { x: 390, y: 986, width: 220, height: 66 });
    }

    #[tokio::test]
    async fn test_left_click_secondary_activations_both_run() {
        let mut engine = engine_with_item(&["Activate", "SecondaryActivate", "XAyatanaSecondaryActivate"], false).await;
        let mut lowered = 0;
        let outcome = engine.left_click(click(0), &mut || lowered += 1).await;

        assert_eq!(outcome, ClickOutcome::Dispatched);
        assert_eq!(
            engine.bus().calls(),
            vec!["XAyatanaSecondaryActivate :1.80/StatusNotifierItem", "SecondaryActivate :1.80/StatusNotifierItem"]
        );
        assert_eq!(lowered, 2);
        assert!(engine.raise_suppressed(Instant::now()));
        assert!(engine.raise_suppressed(Instant::now() + Duration::from_secs(7)));
        assert!(!engine.raise_suppressed(Instant::now() + Duration::from_secs(9)));
    }

    #[tokio::test]
    async fn test_left_click_falls_back_to_activate() {
        let mut engine = engine_with_item(&["Activate", "SecondaryActivate"], false).await;
        engine.bus().fail_method("SecondaryActivate");
        let outcome = engine.left_click(click(0), &mut || {}).await;

        assert_eq!(outcome, ClickOutcome::Dispatched);
        assert_eq!(engine.bus().count_calls("SecondaryActivate"), 1);
        assert_eq!(engine.bus().count_calls("Activate"), 1);
    }

    #[tokio::test]
    async fn test_left_click_menu_only_item_asks_for_context_menu() {
        let mut engine = engine_with_item(&["ContextMenu"], false).await;
        engine.registry.get_mut(0).unwrap().capabilities.item_is_menu = true;
        let mut lowered = false;
        let outcome = engine.left_click(click(0), &mut || lowered = true).await;

        assert_eq!(outcome, ClickOutcome::Dispatched);
        assert_eq!(engine.bus().calls(), vec!["ContextMenu :1.80/StatusNotifierItem"]);
        assert!(lowered);
    }

    #[tokio::test]
    async fn test_left_click_picks_up_menu_exported_after_registration() {
        let mut engine = engine_with_item(&["ContextMenu"], false).await;
        engine.registry.get_mut(0).unwrap().capabilities.item_is_menu = true;
        assert!(!engine.item(0).unwrap().has_menu());

        engine.bus().set_property(SERVICE, names::ITEM_OBJECT, ItemProperty::Menu, PropertyValue::ObjectPath("/MenuBar".into()));
        engine.bus().set_menu(SERVICE, "/MenuBar", LayoutNode::new(0, vec![], vec![entry(1, "Open"), entry(3, "Quit")]));

        let outcome = engine.left_click(click(0), &mut || {}).await;
        assert_eq!(outcome, ClickOutcome::MenuOpened);
        assert_eq!(engine.bus().count_calls("ContextMenu"), 0);
        assert_eq!(engine.item(0).unwrap().menu_path, "/MenuBar");
        assert_eq!(engine.popup().unwrap().items.len(), 2);
    }

    #[tokio::test]
    async fn test_left_click_without_capabilities_does_nothing() {
        let mut engine = engine_with_item(&[], false).await;
        assert_eq!(engine.left_click(click(0), &mut || {}).await, ClickOutcome::Nothing);
        assert_eq!(engine.left_click(click(5), &mut || {}).await, ClickOutcome::Nothing);
        assert!(engine.bus().calls().is_empty());
        assert!(!engine.raise_suppressed(Instant::now()));
    }

    #[tokio::test]
    async fn test_right_click() {
        let mut engine = engine_with_item(&["ContextMenu"], false).await;
        assert_eq!(engine.right_click(click(0), &mut || {}).await, ClickOutcome::Dispatched);
        assert_eq!(engine.bus().calls(), vec!["ContextMenu :1.80/StatusNotifierItem"]);

        let mut engine = engine_with_item(&["Activate"], false).await;
        let mut lowered = false;
        assert_eq!(engine.right_click(click(0), &mut || lowered = true).await, ClickOutcome::Nothing);
        assert!(!lowered);

        let mut engine = engine_with_item(&["ContextMenu"], true).await;
        assert_eq!(engine.right_click(click(0), &mut || {}).await, ClickOutcome::MenuOpened);
        assert_eq!(engine.bus().count_calls("ContextMenu"), 0);
    }

    #[tokio::test]
    async fn test_menu_click() {
        let mut engine = engine_with_item(&[], true).await;
        assert!(engine.open_menu(0, 500, 700, 1920, 1080).await);
        engine.bus().clear_calls();

        // the separator row sends nothing, but closes the popup
        assert!(!engine.menu_click(30, 5).await);
        assert!(engine.popup().is_none());
        assert!(engine.bus().calls().is_empty());

        assert!(engine.open_menu(0, 500, 700, 1920, 1080).await);
        engine.bus().clear_calls();
        assert!(engine.menu_click(50, 6).await);
        assert_eq!(engine.bus().calls(), vec!["Event :1.80/MenuBar 3 clicked 6"]);

        assert!(!engine.menu_click(0, 7).await);
    }

    #[tokio::test]
    async fn test_menu_owner_removed_while_open() {
        let mut engine = engine_with_item(&[], true).await;
        assert!(engine.open_menu(0, 500, 700, 1920, 1080).await);
        engine
            .dispatch(crate::bus::BusEvent::OwnerChanged {
                name: SERVICE.into(),
                old_owner: Some(SERVICE.into()),
                new_owner: Some(String::new()),
            })
            .await;
        assert!(engine.popup().is_none());
        assert!(!engine.menu_click(0, 1).await);
    }

    #[tokio::test]
    async fn test_failed_menu_fetch_closes_previous_popup() {
        let mut engine = engine_with_item(&[], true).await;
        assert!(engine.open_menu(0, 500, 700, 1920, 1080).await);
        engine.bus().fail_method("GetLayout");
        assert!(!engine.open_menu(0, 500, 700, 1920, 1080).await);
        assert!(engine.popup().is_none());
    }
}
