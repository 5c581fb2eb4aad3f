//! Entity store: the canonical window/workspace model every backend writes to.
//!
//! The store lives on the event-loop thread and is shared as `Rc<EntityStore>`.
//! Only the active backend mutates it. Every mutator that changes something a
//! consumer can see emits a [`Change`] after the internal borrow is released,
//! so subscribers may read the store from inside their callback.

use std::cell::RefCell;
use std::collections::HashMap;

use tracing::trace;

use super::types::{
    Change, GroupId, Window, WindowId, WindowState, Workspace, WorkspaceCaps, WorkspaceId,
    WorkspaceState,
};
use crate::services::callbacks::{Callbacks, SubscriptionId};

#[derive(Default)]
struct Entities {
    windows: HashMap<WindowId, Window>,
    window_order: Vec<WindowId>,
    workspaces: HashMap<WorkspaceId, Workspace>,
    workspace_order: Vec<WorkspaceId>,
    focused_window: Option<WindowId>,
    focused_workspace: Option<WorkspaceId>,
}

pub struct EntityStore {
    entities: RefCell<Entities>,
    changes: Callbacks<Change>,
}

impl EntityStore {
    pub fn new() -> Self {
        Self {
            entities: RefCell::new(Entities::default()),
            changes: Callbacks::new(),
        }
    }

    pub fn subscribe<F>(&self, callback: F) -> SubscriptionId
    where
        F: Fn(&Change) + 'static,
    {
        self.changes.register(callback)
    }

    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        self.changes.unregister(id)
    }

    /// Fire a named trigger (e.g. `wayfire_connected`).
    pub fn trigger(&self, name: impl Into<String>) {
        self.emit(Change::Trigger(name.into()));
    }

    fn emit(&self, change: Change) {
        trace!("store change: {:?}", change);
        self.changes.notify(change);
    }

    // ----- windows -----

    /// Create a window; a second sighting of the same id is a no-op.
    /// Returns `true` if a new window was created.
    pub fn create_window(&self, id: WindowId) -> bool {
        {
            let mut e = self.entities.borrow_mut();
            if e.windows.contains_key(&id) {
                return false;
            }
            e.windows.insert(id, Window::new(id));
            e.window_order.push(id);
        }
        self.emit(Change::WindowCreated(id));
        true
    }

    pub fn window(&self, id: WindowId) -> Option<Window> {
        self.entities.borrow().windows.get(&id).cloned()
    }

    pub fn contains_window(&self, id: WindowId) -> bool {
        self.entities.borrow().windows.contains_key(&id)
    }

    /// All windows in creation order.
    pub fn windows(&self) -> Vec<Window> {
        let e = self.entities.borrow();
        e.window_order
            .iter()
            .filter_map(|id| e.windows.get(id).cloned())
            .collect()
    }

    /// Apply `f` to a window; emits `WindowChanged` when `f` reports a change.
    fn update_window(&self, id: WindowId, f: impl FnOnce(&mut Window) -> bool) -> bool {
        let changed = {
            let mut e = self.entities.borrow_mut();
            match e.windows.get_mut(&id) {
                Some(window) => f(window),
                None => {
                    trace!("update for unknown window {}", id);
                    false
                }
            }
        };
        if changed {
            self.emit(Change::WindowChanged(id));
        }
        changed
    }

    pub fn set_title(&self, id: WindowId, title: &str) -> bool {
        self.update_window(id, |w| replace_if_different(&mut w.title, title))
    }

    pub fn set_app_id(&self, id: WindowId, app_id: &str) -> bool {
        self.update_window(id, |w| replace_if_different(&mut w.app_id, app_id))
    }

    /// Replace the whole state set. The `FOCUSED` bit is owned by
    /// [`set_focus`](Self::set_focus) and is preserved here.
    pub fn set_window_state(&self, id: WindowId, state: WindowState) -> bool {
        self.update_window(id, |w| {
            let next = (state - WindowState::FOCUSED) | (w.state & WindowState::FOCUSED);
            std::mem::replace(&mut w.state, next) != next
        })
    }

    /// Set or clear individual state bits (never `FOCUSED`).
    pub fn update_window_state(&self, id: WindowId, bits: WindowState, enable: bool) -> bool {
        let bits = bits - WindowState::FOCUSED;
        self.update_window(id, |w| {
            let before = w.state;
            w.state.set(bits, enable);
            before != w.state
        })
    }

    pub fn set_workspace(&self, id: WindowId, workspace: Option<WorkspaceId>) -> bool {
        self.update_window(id, |w| std::mem::replace(&mut w.workspace, workspace) != workspace)
    }

    pub fn window_output_enter(&self, id: WindowId, output: &str) -> bool {
        self.update_window(id, |w| w.outputs.insert(output.to_string()))
    }

    pub fn window_output_leave(&self, id: WindowId, output: &str) -> bool {
        self.update_window(id, |w| w.outputs.remove(output))
    }

    pub fn set_floating(&self, id: WindowId, floating: bool) -> bool {
        self.update_window(id, |w| std::mem::replace(&mut w.floating, floating) != floating)
    }

    pub fn set_pid(&self, id: WindowId, pid: Option<i32>) -> bool {
        self.update_window(id, |w| std::mem::replace(&mut w.pid, pid) != pid)
    }

    pub fn focused_window(&self) -> Option<WindowId> {
        self.entities.borrow().focused_window
    }

    /// Move the global focus pointer. An unknown id is ignored.
    pub fn set_focus(&self, id: Option<WindowId>) {
        let previous = {
            let mut e = self.entities.borrow_mut();
            if let Some(id) = id
                && !e.windows.contains_key(&id)
            {
                trace!("focus for unknown window {}", id);
                return;
            }
            if e.focused_window == id {
                return;
            }
            let previous = std::mem::replace(&mut e.focused_window, id);
            if let Some(prev) = previous
                && let Some(w) = e.windows.get_mut(&prev)
            {
                w.state.remove(WindowState::FOCUSED);
            }
            if let Some(id) = id
                && let Some(w) = e.windows.get_mut(&id)
            {
                w.state.insert(WindowState::FOCUSED);
            }
            previous
        };

        if let Some(prev) = previous.filter(|prev| self.contains_window(*prev)) {
            self.emit(Change::WindowChanged(prev));
        }
        if let Some(id) = id {
            self.emit(Change::WindowChanged(id));
        }
        self.emit(Change::WindowFocus(id));
    }

    /// Remove a window, clearing the focus pointer if it named it.
    pub fn delete_window(&self, id: WindowId) -> bool {
        let was_focused = {
            let mut e = self.entities.borrow_mut();
            if e.windows.remove(&id).is_none() {
                return false;
            }
            e.window_order.retain(|w| *w != id);
            let focused = e.focused_window == Some(id);
            if focused {
                e.focused_window = None;
            }
            focused
        };
        self.emit(Change::WindowRemoved(id));
        if was_focused {
            self.emit(Change::WindowFocus(None));
        }
        true
    }

    // ----- workspaces -----

    /// Create a workspace holding one reference. Idempotent: an existing
    /// workspace is left untouched and its count is not bumped.
    pub fn create_workspace(&self, id: WorkspaceId, name: &str) -> bool {
        {
            let mut e = self.entities.borrow_mut();
            if e.workspaces.contains_key(&id) {
                return false;
            }
            e.workspaces.insert(id, Workspace::new(id, name));
            e.workspace_order.push(id);
        }
        self.emit(Change::WorkspaceCreated(id));
        true
    }

    pub fn workspace(&self, id: WorkspaceId) -> Option<Workspace> {
        self.entities.borrow().workspaces.get(&id).cloned()
    }

    pub fn contains_workspace(&self, id: WorkspaceId) -> bool {
        self.entities.borrow().workspaces.contains_key(&id)
    }

    pub fn workspace_by_name(&self, name: &str) -> Option<Workspace> {
        self.entities
            .borrow()
            .workspaces
            .values()
            .find(|ws| ws.name == name)
            .cloned()
    }

    /// All workspaces in creation order.
    pub fn workspaces(&self) -> Vec<Workspace> {
        let e = self.entities.borrow();
        e.workspace_order
            .iter()
            .filter_map(|id| e.workspaces.get(id).cloned())
            .collect()
    }

    /// Take an extra reference. Returns the new count, or `None` if unknown.
    pub fn workspace_ref(&self, id: WorkspaceId) -> Option<u32> {
        let mut e = self.entities.borrow_mut();
        let ws = e.workspaces.get_mut(&id)?;
        ws.refs += 1;
        Some(ws.refs)
    }

    /// Drop a reference; the workspace is destroyed when the count reaches
    /// zero. Returns `true` only for the call that destroyed it.
    pub fn workspace_unref(&self, id: WorkspaceId) -> bool {
        let remaining = {
            let mut e = self.entities.borrow_mut();
            let Some(ws) = e.workspaces.get_mut(&id) else {
                return false;
            };
            ws.refs = ws.refs.saturating_sub(1);
            ws.refs
        };
        if remaining > 0 {
            return false;
        }
        self.delete_workspace(id)
    }

    /// Remove a workspace regardless of its count.
    pub fn delete_workspace(&self, id: WorkspaceId) -> bool {
        let (was_focused, orphans) = {
            let mut e = self.entities.borrow_mut();
            if e.workspaces.remove(&id).is_none() {
                return false;
            }
            e.workspace_order.retain(|w| *w != id);
            let focused = e.focused_workspace == Some(id);
            if focused {
                e.focused_workspace = None;
            }
            let mut orphans = Vec::new();
            for window in e.windows.values_mut() {
                if window.workspace == Some(id) {
                    window.workspace = None;
                    orphans.push(window.id);
                }
            }
            (focused, orphans)
        };

        for window in orphans {
            self.emit(Change::WindowChanged(window));
        }
        self.emit(Change::WorkspaceRemoved(id));
        if was_focused {
            self.emit(Change::WorkspaceFocus(None));
        }
        true
    }

    fn update_workspace(&self, id: WorkspaceId, f: impl FnOnce(&mut Workspace) -> bool) -> bool {
        let changed = {
            let mut e = self.entities.borrow_mut();
            match e.workspaces.get_mut(&id) {
                Some(ws) => f(ws),
                None => {
                    trace!("update for unknown workspace {}", id);
                    false
                }
            }
        };
        if changed {
            self.emit(Change::WorkspaceChanged(id));
        }
        changed
    }

    pub fn set_workspace_name(&self, id: WorkspaceId, name: &str) -> bool {
        self.update_workspace(id, |ws| {
            if ws.name == name {
                return false;
            }
            ws.name = name.to_string();
            true
        })
    }

    /// Replace the state set. `FOCUSED` is owned by
    /// [`set_workspace_focus`](Self::set_workspace_focus) and is preserved.
    pub fn set_workspace_state(&self, id: WorkspaceId, state: WorkspaceState) -> bool {
        self.update_workspace(id, |ws| {
            let next = (state - WorkspaceState::FOCUSED) | (ws.state & WorkspaceState::FOCUSED);
            std::mem::replace(&mut ws.state, next) != next
        })
    }

    /// Set or clear individual state bits (never `FOCUSED`).
    pub fn update_workspace_state(
        &self,
        id: WorkspaceId,
        bits: WorkspaceState,
        enable: bool,
    ) -> bool {
        let bits = bits - WorkspaceState::FOCUSED;
        self.update_workspace(id, |ws| {
            let before = ws.state;
            ws.state.set(bits, enable);
            before != ws.state
        })
    }

    pub fn set_workspace_caps(&self, id: WorkspaceId, caps: WorkspaceCaps) -> bool {
        self.update_workspace(id, |ws| std::mem::replace(&mut ws.caps, caps) != caps)
    }

    pub fn set_workspace_group(&self, id: WorkspaceId, group: Option<GroupId>) -> bool {
        self.update_workspace(id, |ws| std::mem::replace(&mut ws.group, group) != group)
    }

    pub fn set_workspace_output(&self, id: WorkspaceId, output: Option<&str>) -> bool {
        self.update_workspace(id, |ws| {
            if ws.output.as_deref() == output {
                return false;
            }
            ws.output = output.map(str::to_string);
            true
        })
    }

    pub fn focused_workspace(&self) -> Option<WorkspaceId> {
        self.entities.borrow().focused_workspace
    }

    /// Make `id` the single focused workspace. Any previous holder of the
    /// bit is cleared first; an unknown id is ignored.
    pub fn set_workspace_focus(&self, id: Option<WorkspaceId>) {
        let cleared = {
            let mut e = self.entities.borrow_mut();
            if let Some(id) = id
                && !e.workspaces.contains_key(&id)
            {
                trace!("focus for unknown workspace {}", id);
                return;
            }
            let mut cleared = Vec::new();
            for ws in e.workspaces.values_mut() {
                if Some(ws.id) != id && ws.state.contains(WorkspaceState::FOCUSED) {
                    ws.state.remove(WorkspaceState::FOCUSED);
                    cleared.push(ws.id);
                }
            }
            let newly_set = match id.and_then(|id| e.workspaces.get_mut(&id)) {
                Some(ws) if !ws.state.contains(WorkspaceState::FOCUSED) => {
                    ws.state.insert(WorkspaceState::FOCUSED);
                    true
                }
                _ => false,
            };
            let pointer_moved = std::mem::replace(&mut e.focused_workspace, id) != id;
            if cleared.is_empty() && !newly_set && !pointer_moved {
                return;
            }
            if newly_set && let Some(id) = id {
                cleared.push(id);
            }
            cleared
        };

        for ws in cleared {
            self.emit(Change::WorkspaceChanged(ws));
        }
        self.emit(Change::WorkspaceFocus(id));
    }

    /// Drop every entity. Used when a backend tears down.
    pub fn clear(&self) {
        let (windows, workspaces) = {
            let mut e = self.entities.borrow_mut();
            let windows = std::mem::take(&mut e.window_order);
            let workspaces = std::mem::take(&mut e.workspace_order);
            *e = Entities::default();
            (windows, workspaces)
        };
        for id in windows {
            self.emit(Change::WindowRemoved(id));
        }
        for id in workspaces {
            self.emit(Change::WorkspaceRemoved(id));
        }
    }
}

impl Default for EntityStore {
    fn default() -> Self {
        Self::new()
    }
}

fn replace_if_different(slot: &mut Option<String>, value: &str) -> bool {
    if slot.as_deref() == Some(value) {
        return false;
    }
    *slot = Some(value.to_string());
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::rc::Rc;

    fn recording_store() -> (Rc<EntityStore>, Rc<RefCell<Vec<Change>>>) {
        let store = Rc::new(EntityStore::new());
        let log = Rc::new(RefCell::new(Vec::new()));
        let l = log.clone();
        store.subscribe(move |c| l.borrow_mut().push(c.clone()));
        (store, log)
    }

    const W1: WindowId = WindowId::new(1);
    const W2: WindowId = WindowId::new(2);
    const A: WorkspaceId = WorkspaceId::new(1);
    const B: WorkspaceId = WorkspaceId::new(2);

    #[test]
    fn test_create_delete_sequences_keep_one_entity() {
        let store = EntityStore::new();
        for op in [true, true, false, true, false, false, true, true] {
            if op {
                store.create_window(W1);
            } else {
                store.delete_window(W1);
            }
            let live = store.windows().iter().filter(|w| w.id == W1).count();
            assert!(live <= 1);
            assert_eq!(live == 1, store.contains_window(W1));
        }
        assert_eq!(store.windows().len(), 1);
    }

    #[test]
    fn test_duplicate_sighting_updates_in_place() {
        let (store, log) = recording_store();
        assert!(store.create_window(W1));
        store.set_title(W1, "first");
        assert!(!store.create_window(W1));
        assert_eq!(store.window(W1).unwrap().title.as_deref(), Some("first"));
        let created = log
            .borrow()
            .iter()
            .filter(|c| matches!(c, Change::WindowCreated(_)))
            .count();
        assert_eq!(created, 1);
    }

    #[test]
    fn test_unchanged_title_does_not_notify() {
        let (store, log) = recording_store();
        store.create_window(W1);
        assert!(store.set_title(W1, "t"));
        let before = log.borrow().len();
        assert!(!store.set_title(W1, "t"));
        assert_eq!(log.borrow().len(), before);
    }

    #[test]
    fn test_set_focus_unknown_is_noop() {
        let (store, log) = recording_store();
        store.create_window(W1);
        store.set_focus(Some(W1));
        let before = log.borrow().len();
        store.set_focus(Some(WindowId::new(99)));
        assert_eq!(store.focused_window(), Some(W1));
        assert_eq!(log.borrow().len(), before);
    }

    #[test]
    fn test_set_focus_moves_focused_bit() {
        let store = EntityStore::new();
        store.create_window(W1);
        store.create_window(W2);
        store.set_focus(Some(W1));
        store.set_focus(Some(W2));
        assert!(!store.window(W1).unwrap().state.contains(WindowState::FOCUSED));
        assert!(store.window(W2).unwrap().state.contains(WindowState::FOCUSED));
        store.set_focus(None);
        assert_eq!(store.focused_window(), None);
        assert!(!store.window(W2).unwrap().state.contains(WindowState::FOCUSED));
    }

    #[test]
    fn test_set_window_state_preserves_focus_bit() {
        let store = EntityStore::new();
        store.create_window(W1);
        store.set_focus(Some(W1));
        store.set_window_state(W1, WindowState::MAXIMIZED);
        let state = store.window(W1).unwrap().state;
        assert_eq!(state, WindowState::MAXIMIZED | WindowState::FOCUSED);
    }

    #[test]
    fn test_delete_focused_window_clears_focus() {
        let (store, log) = recording_store();
        store.create_window(W1);
        store.set_focus(Some(W1));
        log.borrow_mut().clear();
        assert!(store.delete_window(W1));
        assert_eq!(store.focused_window(), None);
        assert_eq!(
            *log.borrow(),
            vec![Change::WindowRemoved(W1), Change::WindowFocus(None)]
        );
        assert!(!store.delete_window(W1));
    }

    #[test]
    fn test_output_enter_leave_is_idempotent() {
        let store = EntityStore::new();
        store.create_window(W1);
        assert!(store.window_output_enter(W1, "DP-1"));
        assert!(!store.window_output_enter(W1, "DP-1"));
        assert!(!store.window_output_leave(W1, "HDMI-A-1"));
        assert!(store.window_output_leave(W1, "DP-1"));
        assert!(store.window(W1).unwrap().outputs.is_empty());
    }

    #[test]
    fn test_single_focused_workspace() {
        let store = EntityStore::new();
        store.create_workspace(A, "a");
        store.create_workspace(B, "b");
        store.set_workspace_focus(Some(A));
        store.set_workspace_focus(Some(B));
        let focused: Vec<_> = store
            .workspaces()
            .into_iter()
            .filter(|w| w.is_focused())
            .map(|w| w.id)
            .collect();
        assert_eq!(focused, vec![B]);
        assert_eq!(store.focused_workspace(), Some(B));
    }

    #[test]
    fn test_workspace_focus_clears_stray_bits() {
        let store = EntityStore::new();
        store.create_workspace(A, "a");
        store.create_workspace(B, "b");
        // A backend that never calls set_workspace_focus(None) still ends
        // up with exactly one focused workspace.
        store.set_workspace_focus(Some(A));
        store.set_workspace_state(A, WorkspaceState::VISIBLE);
        store.set_workspace_focus(Some(B));
        assert!(!store.workspace(A).unwrap().is_focused());
        assert!(store.workspace(A).unwrap().is_visible());
    }

    #[test]
    fn test_workspace_refcount() {
        let (store, log) = recording_store();
        store.create_workspace(A, "a");
        assert_eq!(store.workspace_ref(A), Some(2));

        assert!(!store.workspace_unref(A));
        assert!(store.contains_workspace(A));

        assert!(store.workspace_unref(A));
        assert!(!store.contains_workspace(A));

        // A second unref in the same batch must not destroy twice.
        assert!(!store.workspace_unref(A));
        let removed = log
            .borrow()
            .iter()
            .filter(|c| matches!(c, Change::WorkspaceRemoved(_)))
            .count();
        assert_eq!(removed, 1);
    }

    #[test]
    fn test_create_workspace_is_idempotent() {
        let store = EntityStore::new();
        assert!(store.create_workspace(A, "a"));
        assert!(!store.create_workspace(A, "renamed"));
        assert_eq!(store.workspace(A).unwrap().name, "a");
        assert!(store.workspace_unref(A));
    }

    #[test]
    fn test_delete_workspace_clears_back_references() {
        let store = EntityStore::new();
        store.create_workspace(A, "a");
        store.create_window(W1);
        store.set_workspace(W1, Some(A));
        store.set_workspace_focus(Some(A));
        assert!(store.delete_workspace(A));
        assert_eq!(store.window(W1).unwrap().workspace, None);
        assert_eq!(store.focused_workspace(), None);
    }

    #[test]
    fn test_subscriber_can_read_store_during_notification() {
        let store = Rc::new(EntityStore::new());
        let titles = Rc::new(RefCell::new(Vec::new()));
        let weak = Rc::downgrade(&store);
        let t = titles.clone();
        store.subscribe(move |change| {
            if let Change::WindowChanged(id) = change
                && let Some(store) = weak.upgrade()
                && let Some(w) = store.window(*id)
            {
                t.borrow_mut().push(w.title.unwrap_or_default());
            }
        });
        store.create_window(W1);
        store.set_title(W1, "hello");
        assert_eq!(*titles.borrow(), vec!["hello".to_string()]);
    }

    #[test]
    fn test_list_preserves_creation_order() {
        let store = EntityStore::new();
        for raw in [5u64, 1, 3] {
            store.create_window(WindowId::new(raw));
        }
        let ids: Vec<_> = store.windows().iter().map(|w| w.id.raw()).collect();
        assert_eq!(ids, vec![5, 1, 3]);
    }
}
