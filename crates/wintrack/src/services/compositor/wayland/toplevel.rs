//! wlr-foreign-toplevel-management driver.
//!
//! The manager announces one handle per toplevel. Handle events are applied
//! to the store as they arrive; `done` only marks the end of a batch.

use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;

use tracing::{debug, trace, warn};
use wayland_client::protocol::wl_seat::WlSeat;
use wayland_client::{Connection, Dispatch, Proxy, QueueHandle, event_created_child};
use wayland_protocols_wlr::foreign_toplevel::v1::client::zwlr_foreign_toplevel_handle_v1::{
    self, ZwlrForeignToplevelHandleV1,
};
use wayland_protocols_wlr::foreign_toplevel::v1::client::zwlr_foreign_toplevel_manager_v1::{
    self, ZwlrForeignToplevelManagerV1,
};

use super::{OutputNames, WaylandState};
use crate::services::compositor::contracts::WindowActions;
use crate::services::compositor::store::EntityStore;
use crate::services::compositor::types::{WindowId, WindowState};

/// Decode the handle's `state` array into store bits plus the
/// `activated` flag, which drives focus instead of a state bit.
pub fn decode_states(raw: &[u8]) -> (WindowState, bool) {
    use zwlr_foreign_toplevel_handle_v1::State;

    let mut state = WindowState::empty();
    let mut activated = false;
    for chunk in raw.chunks_exact(4) {
        let value = u32::from_ne_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]);
        match State::try_from(value) {
            Ok(State::Maximized) => state |= WindowState::MAXIMIZED,
            Ok(State::Minimized) => state |= WindowState::MINIMIZED,
            Ok(State::Fullscreen) => state |= WindowState::FULLSCREEN,
            Ok(State::Activated) => activated = true,
            _ => trace!("Unknown toplevel state {}", value),
        }
    }
    (state, activated)
}

/// Store reductions for toplevel events, free of protocol objects.
pub struct ToplevelTracker {
    store: Rc<EntityStore>,
}

impl ToplevelTracker {
    pub fn new(store: Rc<EntityStore>) -> Self {
        Self { store }
    }

    pub fn created(&self, id: WindowId) {
        self.store.create_window(id);
    }

    pub fn title(&self, id: WindowId, title: &str) {
        self.store.set_title(id, title);
    }

    pub fn app_id(&self, id: WindowId, app_id: &str) {
        self.store.set_app_id(id, app_id);
    }

    pub fn output_enter(&self, id: WindowId, output: &str) {
        self.store.window_output_enter(id, output);
    }

    pub fn output_leave(&self, id: WindowId, output: &str) {
        self.store.window_output_leave(id, output);
    }

    /// Replace the state bits. Losing `activated` while holding the global
    /// focus drops the focus.
    pub fn state(&self, id: WindowId, state: WindowState, activated: bool) {
        if !self.store.contains_window(id) {
            return;
        }
        self.store.set_window_state(id, state);
        if activated {
            self.store.set_focus(Some(id));
        } else if self.store.focused_window() == Some(id) {
            self.store.set_focus(None);
        }
    }

    pub fn closed(&self, id: WindowId) {
        self.store.delete_window(id);
    }
}

fn window_id(handle: &ZwlrForeignToplevelHandleV1) -> WindowId {
    WindowId::new(u64::from(handle.id().protocol_id()))
}

/// Bound toplevel manager plus the live handles, installed as the window
/// actions contract.
pub struct WlrToplevels {
    tracker: ToplevelTracker,
    outputs: Rc<OutputNames>,
    conn: Connection,
    seat: Option<WlSeat>,
    manager: ZwlrForeignToplevelManagerV1,
    handles: RefCell<HashMap<WindowId, ZwlrForeignToplevelHandleV1>>,
}

impl WlrToplevels {
    pub fn new(
        store: Rc<EntityStore>,
        outputs: Rc<OutputNames>,
        conn: Connection,
        seat: Option<WlSeat>,
        manager: ZwlrForeignToplevelManagerV1,
    ) -> Self {
        Self {
            tracker: ToplevelTracker::new(store),
            outputs,
            conn,
            seat,
            manager,
            handles: RefCell::new(HashMap::new()),
        }
    }

    fn on_new(&self, handle: ZwlrForeignToplevelHandleV1) {
        let id = window_id(&handle);
        trace!("New toplevel {}", id);
        self.handles.borrow_mut().insert(id, handle);
        self.tracker.created(id);
    }

    fn on_event(&self, handle: &ZwlrForeignToplevelHandleV1, event: zwlr_foreign_toplevel_handle_v1::Event) {
        use zwlr_foreign_toplevel_handle_v1::Event;

        let id = window_id(handle);
        match event {
            Event::Title { title } => self.tracker.title(id, &title),
            Event::AppId { app_id } => self.tracker.app_id(id, &app_id),
            Event::OutputEnter { output } => {
                let name = self.outputs.name_for(output.id().protocol_id());
                self.tracker.output_enter(id, &name);
            }
            Event::OutputLeave { output } => {
                let name = self.outputs.name_for(output.id().protocol_id());
                self.tracker.output_leave(id, &name);
            }
            Event::State { state } => {
                let (bits, activated) = decode_states(&state);
                self.tracker.state(id, bits, activated);
            }
            Event::Done => trace!("Toplevel {} done", id),
            Event::Closed => {
                self.tracker.closed(id);
                if let Some(handle) = self.handles.borrow_mut().remove(&id) {
                    handle.destroy();
                }
            }
            _ => {}
        }
    }

    fn with_handle(&self, window: WindowId, request: impl FnOnce(&ZwlrForeignToplevelHandleV1)) {
        let Some(handle) = self.handles.borrow().get(&window).cloned() else {
            trace!("No toplevel handle for {}", window);
            return;
        };
        request(&handle);
        if let Err(e) = self.conn.flush() {
            warn!("Failed to flush toplevel request for {}: {}", window, e);
        }
    }

    pub fn stop(&self) {
        self.manager.stop();
        let _ = self.conn.flush();
    }
}

impl WindowActions for WlrToplevels {
    fn name(&self) -> &'static str {
        "wlr-foreign-toplevel"
    }

    fn minimize(&self, window: WindowId) {
        self.with_handle(window, |h| h.set_minimized());
    }

    fn unminimize(&self, window: WindowId) {
        self.with_handle(window, |h| h.unset_minimized());
    }

    fn maximize(&self, window: WindowId) {
        self.with_handle(window, |h| h.set_maximized());
    }

    fn unmaximize(&self, window: WindowId) {
        self.with_handle(window, |h| h.unset_maximized());
    }

    fn close(&self, window: WindowId) {
        self.with_handle(window, |h| h.close());
    }

    fn focus(&self, window: WindowId) {
        let Some(seat) = &self.seat else {
            warn!("Cannot focus {}: no seat", window);
            return;
        };
        self.with_handle(window, |h| h.activate(seat));
    }
}

impl Dispatch<ZwlrForeignToplevelManagerV1, ()> for WaylandState {
    fn event(
        state: &mut Self,
        _manager: &ZwlrForeignToplevelManagerV1,
        event: zwlr_foreign_toplevel_manager_v1::Event,
        _data: &(),
        _conn: &Connection,
        _qh: &QueueHandle<Self>,
    ) {
        match event {
            zwlr_foreign_toplevel_manager_v1::Event::Toplevel { toplevel } => {
                if let Some(toplevels) = state.toplevels.clone() {
                    toplevels.on_new(toplevel);
                }
            }
            zwlr_foreign_toplevel_manager_v1::Event::Finished => {
                debug!("Foreign toplevel manager finished");
            }
            _ => {}
        }
    }

    event_created_child!(WaylandState, ZwlrForeignToplevelManagerV1, [
        zwlr_foreign_toplevel_manager_v1::EVT_TOPLEVEL_OPCODE => (ZwlrForeignToplevelHandleV1, ())
    ]);
}

impl Dispatch<ZwlrForeignToplevelHandleV1, ()> for WaylandState {
    fn event(
        state: &mut Self,
        handle: &ZwlrForeignToplevelHandleV1,
        event: zwlr_foreign_toplevel_handle_v1::Event,
        _data: &(),
        _conn: &Connection,
        _qh: &QueueHandle<Self>,
    ) {
        if let Some(toplevels) = state.toplevels.clone() {
            toplevels.on_event(handle, event);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn raw_states(values: &[u32]) -> Vec<u8> {
        values.iter().flat_map(|v| v.to_ne_bytes()).collect()
    }

    #[test]
    fn test_decode_states() {
        let (state, activated) = decode_states(&raw_states(&[0, 2, 3]));
        assert_eq!(state, WindowState::MAXIMIZED | WindowState::FULLSCREEN);
        assert!(activated);

        let (state, activated) = decode_states(&raw_states(&[1, 99]));
        assert_eq!(state, WindowState::MINIMIZED);
        assert!(!activated);

        // Trailing partial entry is ignored.
        let (state, _) = decode_states(&[0, 0]);
        assert!(state.is_empty());
    }

    #[test]
    fn test_losing_activation_clears_focus() {
        let store = Rc::new(EntityStore::new());
        let tracker = ToplevelTracker::new(store.clone());
        let a = WindowId::new(3);
        let b = WindowId::new(4);
        tracker.created(a);
        tracker.created(b);

        tracker.state(a, WindowState::empty(), true);
        assert_eq!(store.focused_window(), Some(a));

        // Another window deactivating leaves the focus alone.
        tracker.state(b, WindowState::MAXIMIZED, false);
        assert_eq!(store.focused_window(), Some(a));

        tracker.state(a, WindowState::MINIMIZED, false);
        assert_eq!(store.focused_window(), None);
        let window = store.window(a).unwrap();
        assert_eq!(window.state, WindowState::MINIMIZED);
    }

    #[test]
    fn test_state_replaces_bits() {
        let store = Rc::new(EntityStore::new());
        let tracker = ToplevelTracker::new(store.clone());
        let id = WindowId::new(9);
        tracker.created(id);
        tracker.state(id, WindowState::MAXIMIZED | WindowState::FULLSCREEN, true);
        tracker.state(id, WindowState::MINIMIZED, true);
        let state = store.window(id).unwrap().state;
        assert_eq!(state, WindowState::MINIMIZED | WindowState::FOCUSED);
    }

    #[test]
    fn test_outputs_and_close() {
        let store = Rc::new(EntityStore::new());
        let tracker = ToplevelTracker::new(store.clone());
        let id = WindowId::new(5);
        tracker.created(id);
        tracker.title(id, "term");
        tracker.app_id(id, "foot");
        tracker.output_enter(id, "DP-1");
        tracker.output_enter(id, "DP-1");
        tracker.output_enter(id, "HDMI-A-1");
        tracker.output_leave(id, "eDP-1");
        tracker.output_leave(id, "HDMI-A-1");

        let window = store.window(id).unwrap();
        assert_eq!(window.outputs.iter().collect::<Vec<_>>(), vec!["DP-1"]);
        assert_eq!(window.app_id.as_deref(), Some("foot"));

        tracker.state(id, WindowState::empty(), true);
        tracker.closed(id);
        assert!(!store.contains_window(id));
        assert_eq!(store.focused_window(), None);

        // Events after close are dropped.
        tracker.state(id, WindowState::empty(), true);
        tracker.title(id, "ghost");
        assert!(!store.contains_window(id));
    }
}
