//! Legacy tray clients, which hand us a window to embed instead of talking StatusNotifierItem.
//!
//! The protocol part lives in an [`EmbedBackend`]; [`XEmbedTray`] only decides what happens to
//! which window. With the `x11` feature, [`X11EmbedBackend`] implements the backend on top of
//! x11rb.

use crate::{config::TrayConfig, Result};

pub type WindowId = u32;

/// What the window system reported about the tray, already stripped of protocol details.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrayEvent {
    DockRequest(WindowId),
    Destroyed(WindowId),
    Unmapped(WindowId),
}

/// Window operations needed to embed clients into the tray container.
pub trait EmbedBackend {
    /// Move `window` into the tray container and start watching it.
    fn reparent(&mut self, window: WindowId) -> Result<()>;
    fn resize(&mut self, window: WindowId, size: u32) -> Result<()>;
    /// Tell `window` it is now embedded.
    fn send_embedded_notify(&mut self, window: WindowId) -> Result<()>;
    fn map(&mut self, window: WindowId) -> Result<()>;
    /// Position `window` inside the container.
    fn place(&mut self, window: WindowId, x: i32, y: i32, size: u32) -> Result<()>;
    /// Move, resize and show the container itself.
    fn show_container(&mut self, x: i32, y: i32, width: u32, height: u32) -> Result<()>;
    fn hide_container(&mut self) -> Result<()>;
    fn flush(&mut self) -> Result<()>;
}

/// The embedded windows, in docking order.
#[derive(Debug)]
pub struct XEmbedTray<B> {
    backend: B,
    windows: Vec<WindowId>,
    /// Size a newly docked window is configured to. Follows the layout once there is one.
    slot_size: u32,
    icon_size: i32,
    gap: i32,
}

impl<B: EmbedBackend> XEmbedTray<B> {
    pub fn new(backend: B, config: &TrayConfig) -> Self {
        XEmbedTray {
            backend,
            windows: Vec::new(),
            slot_size: config.xembed_icon_size as u32,
            icon_size: config.icon_size,
            gap: config.effective_gap(),
        }
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn backend_mut(&mut self) -> &mut B {
        &mut self.backend
    }

    pub fn windows(&self) -> &[WindowId] {
        &self.windows
    }

    pub fn len(&self) -> usize {
        self.windows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.windows.is_empty()
    }

    pub fn contains(&self, window: WindowId) -> bool {
        self.windows.contains(&window)
    }

    /// Apply an event. Returns whether the set of embedded windows changed.
    pub fn handle_event(&mut self, event: TrayEvent) -> bool {
        match event {
            TrayEvent::DockRequest(window) => self.dock(window),
            TrayEvent::Destroyed(window) | TrayEvent::Unmapped(window) => self.undock(window),
        }
    }

    /// Embed `window`. Windows that are already embedded are ignored.
    ///
    /// If any step of the embedding fails, the window is dropped again.
    pub fn dock(&mut self, window: WindowId) -> bool {
        if window == 0 || self.contains(window) {
            return false;
        }
        self.windows.push(window);
        match self.embed(window) {
            Ok(()) => {
                log::info!("docked legacy tray window {:#010x}", window);
                true
            }
            Err(e) => {
                log::warn!("failed to dock legacy tray window {:#010x}: {}", window, e);
                self.undock(window);
                false
            }
        }
    }

    fn embed(&mut self, window: WindowId) -> Result<()> {
        self.backend.reparent(window)?;
        self.backend.resize(window, self.slot_size)?;
        self.backend.send_embedded_notify(window)?;
        self.backend.map(window)?;
        self.backend.flush()
    }

    /// Forget `window`. The last window takes its slot.
    pub fn undock(&mut self, window: WindowId) -> bool {
        match self.windows.iter().position(|w| *w == window) {
            Some(idx) => {
                self.windows.swap_remove(idx);
                log::debug!("undocked legacy tray window {:#010x}", window);
                true
            }
            None => false,
        }
    }

    /// Width the row of embedded windows occupies.
    pub fn width(&self) -> i32 {
        match self.windows.len() as i32 {
            0 => 0,
            n => n * self.icon_size + (n - 1) * self.gap,
        }
    }

    /// Lay the embedded windows out in a row starting at `(x, y)` and return the width used, so
    /// the caller can continue its row after them.
    pub fn layout(&mut self, x: i32, y: i32) -> i32 {
        if let Err(e) = self.place_all(x, y) {
            log::warn!("failed to lay out legacy tray windows: {}", e);
        }
        self.width()
    }

    fn place_all(&mut self, x: i32, y: i32) -> Result<()> {
        if self.windows.is_empty() {
            self.backend.hide_container()?;
            return self.backend.flush();
        }
        let size = self.icon_size.max(1) as u32;
        self.slot_size = size;
        self.backend.show_container(x, y, self.width() as u32, size)?;
        let mut slot_x = 0;
        for &window in &self.windows {
            if let Err(e) = self.backend.place(window, slot_x, 0, size) {
                log::debug!("failed to place legacy tray window {:#010x}: {}", window, e);
            }
            slot_x += self.icon_size + self.gap;
        }
        self.backend.flush()
    }
}

#[cfg(feature = "x11")]
pub use x11::X11EmbedBackend;

#[cfg(feature = "x11")]
mod x11 {
    use x11rb::{
        connection::Connection,
        protocol::{xproto::*, Event},
        wrapper::ConnectionExt as _,
        CURRENT_TIME,
    };

    use super::{EmbedBackend, TrayEvent, WindowId};
    use crate::Result;

    const SYSTEM_TRAY_REQUEST_DOCK: u32 = 0;
    const XEMBED_EMBEDDED_NOTIFY: u32 = 0;
    const TRAY_BACKGROUND: u32 = 0x353a3d;

    x11rb::atom_manager! {
        pub TrayAtoms: TrayAtomsCookie {
            _NET_SYSTEM_TRAY_OPCODE,
            _NET_SYSTEM_TRAY_ORIENTATION,
            _NET_SYSTEM_TRAY_VISUAL,
            _XEMBED,
            MANAGER,
            CARDINAL,
            VISUALID,
        }
    }

    /// Owns the `_NET_SYSTEM_TRAY_S<n>` selection and the container window clients are embedded
    /// into.
    #[derive(Debug)]
    pub struct X11EmbedBackend<C: Connection> {
        conn: C,
        root: Window,
        container: Window,
        selection: Atom,
        atoms: TrayAtoms,
    }

    impl<C: Connection> X11EmbedBackend<C> {
        /// Become the system tray of screen `screen_num`.
        pub fn acquire(conn: C, screen_num: usize) -> Result<Self> {
            let atoms = TrayAtoms::new(&conn)?.reply()?;
            let selection_name = format!("_NET_SYSTEM_TRAY_S{}", screen_num);
            let selection = conn.intern_atom(false, selection_name.as_bytes())?.reply()?.atom;

            let screen = &conn.setup().roots[screen_num];
            let (root, visual) = (screen.root, screen.root_visual);
            let container = conn.generate_id()?;
            let aux = CreateWindowAux::new()
                .background_pixel(TRAY_BACKGROUND)
                .override_redirect(1)
                .event_mask(EventMask::SUBSTRUCTURE_NOTIFY | EventMask::STRUCTURE_NOTIFY);
            conn.create_window(
                x11rb::COPY_DEPTH_FROM_PARENT,
                container,
                root,
                0,
                0,
                1,
                1,
                0,
                WindowClass::INPUT_OUTPUT,
                visual,
                &aux,
            )?;

            conn.set_selection_owner(container, selection, CURRENT_TIME)?;
            let owner = conn.get_selection_owner(selection)?.reply()?.owner;
            if owner != container {
                log::warn!("{} is owned by {:#010x}, legacy tray icons won't dock", selection_name, owner);
            }
            conn.change_property32(PropMode::REPLACE, container, atoms._NET_SYSTEM_TRAY_ORIENTATION, atoms.CARDINAL, &[0])?;
            conn.change_property32(PropMode::REPLACE, container, atoms._NET_SYSTEM_TRAY_VISUAL, atoms.VISUALID, &[visual])?;

            let announcement = ClientMessageEvent {
                response_type: CLIENT_MESSAGE_EVENT,
                format: 32,
                sequence: 0,
                window: root,
                type_: atoms.MANAGER,
                data: [CURRENT_TIME, selection, container, 0, 0].into(),
            };
            conn.send_event(false, root, EventMask::STRUCTURE_NOTIFY, announcement)?;
            conn.flush()?;
            log::info!("acquired {}", selection_name);

            Ok(X11EmbedBackend { conn, root, container, selection, atoms })
        }

        pub fn conn(&self) -> &C {
            &self.conn
        }

        pub fn container(&self) -> Window {
            self.container
        }

        /// Extract what the tray cares about from an X event.
        pub fn translate(&self, event: &Event) -> Option<TrayEvent> {
            match event {
                Event::ClientMessage(msg) if msg.type_ == self.atoms._NET_SYSTEM_TRAY_OPCODE && msg.format == 32 => {
                    let data = msg.data.as_data32();
                    (data[1] == SYSTEM_TRAY_REQUEST_DOCK).then_some(TrayEvent::DockRequest(data[2]))
                }
                Event::DestroyNotify(ev) => Some(TrayEvent::Destroyed(ev.window)),
                Event::UnmapNotify(ev) if ev.window != self.container => Some(TrayEvent::Unmapped(ev.window)),
                Event::SelectionClear(ev) if ev.selection == self.selection => {
                    log::warn!("another tray took over the tray selection");
                    None
                }
                _ => None,
            }
        }
    }

    impl<C: Connection> EmbedBackend for X11EmbedBackend<C> {
        fn reparent(&mut self, window: WindowId) -> Result<()> {
            self.conn.change_save_set(SetMode::INSERT, window)?;
            self.conn.reparent_window(window, self.container, 0, 0)?.check()?;
            // only now, so the unmap caused by reparenting doesn't undock the window right away
            let aux = ChangeWindowAttributesAux::new().event_mask(EventMask::STRUCTURE_NOTIFY);
            self.conn.change_window_attributes(window, &aux)?.check()?;
            Ok(())
        }

        fn resize(&mut self, window: WindowId, size: u32) -> Result<()> {
            let aux = ConfigureWindowAux::new().width(size).height(size);
            self.conn.configure_window(window, &aux)?.check()?;
            Ok(())
        }

        fn send_embedded_notify(&mut self, window: WindowId) -> Result<()> {
            let msg = ClientMessageEvent {
                response_type: CLIENT_MESSAGE_EVENT,
                format: 32,
                sequence: 0,
                window,
                type_: self.atoms._XEMBED,
                data: [CURRENT_TIME, XEMBED_EMBEDDED_NOTIFY, 0, self.container, 0].into(),
            };
            self.conn.send_event(false, window, EventMask::NO_EVENT, msg)?;
            Ok(())
        }

        fn map(&mut self, window: WindowId) -> Result<()> {
            self.conn.map_window(window)?.check()?;
            Ok(())
        }

        fn place(&mut self, window: WindowId, x: i32, y: i32, size: u32) -> Result<()> {
            let aux = ConfigureWindowAux::new().x(x).y(y).width(size).height(size);
            self.conn.configure_window(window, &aux)?;
            Ok(())
        }

        fn show_container(&mut self, x: i32, y: i32, width: u32, height: u32) -> Result<()> {
            let aux = ConfigureWindowAux::new().x(x).y(y).width(width).height(height).stack_mode(StackMode::ABOVE);
            self.conn.configure_window(self.container, &aux)?;
            self.conn.map_window(self.container)?;
            self.conn.clear_area(false, self.container, 0, 0, 0, 0)?;
            Ok(())
        }

        fn hide_container(&mut self) -> Result<()> {
            self.conn.unmap_window(self.container)?;
            Ok(())
        }

        fn flush(&mut self) -> Result<()> {
            self.conn.flush()?;
            Ok(())
        }
    }

    impl<C: Connection> Drop for X11EmbedBackend<C> {
        fn drop(&mut self) {
            let _ = self.conn.destroy_window(self.container);
            let _ = self.conn.flush();
            log::debug!("released tray container on root {:#010x}", self.root);
        }
    }
}
