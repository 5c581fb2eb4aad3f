//! ext-workspace-v1 driver.
//!
//! Workspaces are announced by the manager and attached to groups, which
//! carry the outputs. A workspace holds one store reference for its own
//! lifetime and one more while it sits in a group, so it survives until both
//! `removed` and `workspace_leave` have been seen.

use std::cell::RefCell;
use std::collections::{BTreeSet, HashMap, VecDeque};
use std::rc::Rc;

use tracing::{debug, trace, warn};
use wayland_client::{Connection, Dispatch, Proxy, QueueHandle, WEnum, event_created_child};
use wayland_protocols::ext::workspace::v1::client::ext_workspace_group_handle_v1::{
    self, ExtWorkspaceGroupHandleV1, GroupCapabilities,
};
use wayland_protocols::ext::workspace::v1::client::ext_workspace_handle_v1::{
    self, ExtWorkspaceHandleV1, WorkspaceCapabilities,
};
use wayland_protocols::ext::workspace::v1::client::ext_workspace_manager_v1::{
    self, ExtWorkspaceManagerV1,
};

use super::{OutputNames, WaylandState};
use crate::services::compositor::contracts::WorkspaceActions;
use crate::services::compositor::store::EntityStore;
use crate::services::compositor::types::{GroupId, WorkspaceCaps, WorkspaceId, WorkspaceState};

#[derive(Debug, Default)]
struct GroupInfo {
    outputs: BTreeSet<String>,
    workspaces: BTreeSet<WorkspaceId>,
    can_create: bool,
}

/// Store reductions for workspace and group events.
pub struct WorkspaceTracker {
    store: Rc<EntityStore>,
    groups: RefCell<HashMap<GroupId, GroupInfo>>,
    /// Names of workspaces we asked for, activated when they show up.
    pending_focus: RefCell<VecDeque<String>>,
}

impl WorkspaceTracker {
    pub fn new(store: Rc<EntityStore>) -> Self {
        Self {
            store,
            groups: RefCell::new(HashMap::new()),
            pending_focus: RefCell::new(VecDeque::new()),
        }
    }

    pub fn workspace_created(&self, id: WorkspaceId) {
        self.store.create_workspace(id, "");
        self.store
            .update_workspace_state(id, WorkspaceState::VISIBLE, true);
    }

    /// Returns `true` when this name was requested through `create` and the
    /// workspace should now be activated.
    pub fn name(&self, id: WorkspaceId, name: &str) -> bool {
        if !self.store.set_workspace_name(id, name) && !self.store.contains_workspace(id) {
            return false;
        }
        let mut pending = self.pending_focus.borrow_mut();
        match pending.iter().position(|n| n == name) {
            Some(pos) => {
                pending.remove(pos);
                true
            }
            None => false,
        }
    }

    pub fn state(&self, id: WorkspaceId, active: bool, urgent: bool, hidden: bool) {
        if !self.store.contains_workspace(id) {
            return;
        }
        self.store
            .update_workspace_state(id, WorkspaceState::URGENT, urgent);
        self.store
            .update_workspace_state(id, WorkspaceState::VISIBLE, !hidden);
        if active {
            self.store.set_workspace_focus(Some(id));
        } else if self.store.focused_workspace() == Some(id) {
            self.store.set_workspace_focus(None);
        }
    }

    pub fn capabilities(&self, id: WorkspaceId, can_activate: bool) {
        let caps = if can_activate {
            WorkspaceCaps::CAN_ACTIVATE
        } else {
            WorkspaceCaps::empty()
        };
        self.store.set_workspace_caps(id, caps);
    }

    pub fn workspace_removed(&self, id: WorkspaceId) {
        self.store.workspace_unref(id);
    }

    pub fn group_created(&self, group: GroupId) {
        self.groups.borrow_mut().entry(group).or_default();
    }

    pub fn group_capabilities(&self, group: GroupId, can_create: bool) {
        if let Some(info) = self.groups.borrow_mut().get_mut(&group) {
            info.can_create = can_create;
        }
    }

    pub fn group_output_enter(&self, group: GroupId, output: &str) {
        let changed = self
            .groups
            .borrow_mut()
            .get_mut(&group)
            .is_some_and(|info| info.outputs.insert(output.to_string()));
        if changed {
            self.sync_group_outputs(group);
        }
    }

    pub fn group_output_leave(&self, group: GroupId, output: &str) {
        let changed = self
            .groups
            .borrow_mut()
            .get_mut(&group)
            .is_some_and(|info| info.outputs.remove(output));
        if changed {
            self.sync_group_outputs(group);
        }
    }

    fn sync_group_outputs(&self, group: GroupId) {
        let (members, output) = {
            let groups = self.groups.borrow();
            let Some(info) = groups.get(&group) else {
                return;
            };
            (
                info.workspaces.iter().copied().collect::<Vec<_>>(),
                info.outputs.iter().next().cloned(),
            )
        };
        for ws in members {
            self.store.set_workspace_output(ws, output.as_deref());
        }
    }

    pub fn group_workspace_enter(&self, group: GroupId, id: WorkspaceId) {
        if !self.store.contains_workspace(id) {
            return;
        }
        let (inserted, output) = {
            let mut groups = self.groups.borrow_mut();
            let info = groups.entry(group).or_default();
            (info.workspaces.insert(id), info.outputs.iter().next().cloned())
        };
        if !inserted {
            return;
        }
        self.store.workspace_ref(id);
        self.store.set_workspace_group(id, Some(group));
        self.store.set_workspace_output(id, output.as_deref());
    }

    pub fn group_workspace_leave(&self, group: GroupId, id: WorkspaceId) {
        let removed = self
            .groups
            .borrow_mut()
            .get_mut(&group)
            .is_some_and(|info| info.workspaces.remove(&id));
        if removed {
            self.detach(group, id);
        }
    }

    pub fn group_removed(&self, group: GroupId) {
        let Some(info) = self.groups.borrow_mut().remove(&group) else {
            return;
        };
        for id in info.workspaces {
            self.detach(group, id);
        }
    }

    fn detach(&self, group: GroupId, id: WorkspaceId) {
        if self.store.workspace(id).is_some_and(|ws| ws.group == Some(group)) {
            self.store.set_workspace_group(id, None);
            self.store.set_workspace_output(id, None);
        }
        self.store.workspace_unref(id);
    }

    /// True if the workspace's group shows `output`, or unconditionally when
    /// the workspace has no group.
    pub fn check_monitor(&self, id: WorkspaceId, output: &str) -> bool {
        let Some(group) = self.store.workspace(id).map(|ws| ws.group) else {
            return false;
        };
        match group {
            None => true,
            Some(group) => self
                .groups
                .borrow()
                .get(&group)
                .is_some_and(|info| info.outputs.contains(output)),
        }
    }

    pub fn expect_name(&self, name: &str) {
        self.pending_focus.borrow_mut().push_back(name.to_string());
    }

    /// A group to create workspaces in, preferring one that says it can.
    pub fn creation_group(&self) -> Option<GroupId> {
        let groups = self.groups.borrow();
        groups
            .iter()
            .filter(|(_, info)| info.can_create)
            .map(|(id, _)| *id)
            .min()
            .or_else(|| groups.keys().min().copied())
    }
}

fn workspace_id(handle: &ExtWorkspaceHandleV1) -> WorkspaceId {
    WorkspaceId::new(i64::from(handle.id().protocol_id()))
}

fn group_id(handle: &ExtWorkspaceGroupHandleV1) -> GroupId {
    GroupId::new(u64::from(handle.id().protocol_id()))
}

/// Bound workspace manager plus live handles, installed as the workspace
/// actions contract.
pub struct ExtWorkspaces {
    tracker: WorkspaceTracker,
    outputs: Rc<OutputNames>,
    conn: Connection,
    manager: ExtWorkspaceManagerV1,
    workspaces: RefCell<HashMap<WorkspaceId, ExtWorkspaceHandleV1>>,
    groups: RefCell<HashMap<GroupId, ExtWorkspaceGroupHandleV1>>,
}

impl ExtWorkspaces {
    pub fn new(
        store: Rc<EntityStore>,
        outputs: Rc<OutputNames>,
        conn: Connection,
        manager: ExtWorkspaceManagerV1,
    ) -> Self {
        Self {
            tracker: WorkspaceTracker::new(store),
            outputs,
            conn,
            manager,
            workspaces: RefCell::new(HashMap::new()),
            groups: RefCell::new(HashMap::new()),
        }
    }

    fn commit(&self) {
        self.manager.commit();
        if let Err(e) = self.conn.flush() {
            warn!("Failed to flush workspace requests: {}", e);
        }
    }

    fn on_manager_event(&self, event: ext_workspace_manager_v1::Event) {
        use ext_workspace_manager_v1::Event;

        match event {
            Event::WorkspaceGroup { workspace_group } => {
                let id = group_id(&workspace_group);
                trace!("New workspace group {:?}", id);
                self.groups.borrow_mut().insert(id, workspace_group);
                self.tracker.group_created(id);
            }
            Event::Workspace { workspace } => {
                let id = workspace_id(&workspace);
                trace!("New workspace {}", id);
                self.workspaces.borrow_mut().insert(id, workspace);
                self.tracker.workspace_created(id);
            }
            Event::Done => trace!("Workspace manager done"),
            Event::Finished => debug!("Workspace manager finished"),
            _ => {}
        }
    }

    fn on_group_event(&self, handle: &ExtWorkspaceGroupHandleV1, event: ext_workspace_group_handle_v1::Event) {
        use ext_workspace_group_handle_v1::Event;

        let group = group_id(handle);
        match event {
            Event::Capabilities { capabilities } => {
                let can_create = matches!(
                    capabilities,
                    WEnum::Value(caps) if caps.contains(GroupCapabilities::CreateWorkspace)
                );
                self.tracker.group_capabilities(group, can_create);
            }
            Event::OutputEnter { output } => {
                let name = self.outputs.name_for(output.id().protocol_id());
                self.tracker.group_output_enter(group, &name);
            }
            Event::OutputLeave { output } => {
                let name = self.outputs.name_for(output.id().protocol_id());
                self.tracker.group_output_leave(group, &name);
            }
            Event::WorkspaceEnter { workspace } => {
                self.tracker
                    .group_workspace_enter(group, workspace_id(&workspace));
            }
            Event::WorkspaceLeave { workspace } => {
                self.tracker
                    .group_workspace_leave(group, workspace_id(&workspace));
            }
            Event::Removed => {
                self.tracker.group_removed(group);
                if let Some(handle) = self.groups.borrow_mut().remove(&group) {
                    handle.destroy();
                }
            }
            _ => {}
        }
    }

    fn on_workspace_event(&self, handle: &ExtWorkspaceHandleV1, event: ext_workspace_handle_v1::Event) {
        use ext_workspace_handle_v1::{Event, State};

        let id = workspace_id(handle);
        match event {
            Event::Name { name } => {
                if self.tracker.name(id, &name) {
                    debug!("Activating requested workspace {:?}", name);
                    handle.activate();
                    self.commit();
                }
            }
            Event::State { state } => {
                let bits = match state {
                    WEnum::Value(bits) => bits,
                    WEnum::Unknown(raw) => State::from_bits_truncate(raw),
                };
                self.tracker.state(
                    id,
                    bits.contains(State::Active),
                    bits.contains(State::Urgent),
                    bits.contains(State::Hidden),
                );
            }
            Event::Capabilities { capabilities } => {
                let can_activate = matches!(
                    capabilities,
                    WEnum::Value(caps) if caps.contains(WorkspaceCapabilities::Activate)
                );
                self.tracker.capabilities(id, can_activate);
            }
            Event::Removed => {
                self.tracker.workspace_removed(id);
                if let Some(handle) = self.workspaces.borrow_mut().remove(&id) {
                    handle.destroy();
                }
            }
            // Ids and grid coordinates are not tracked.
            _ => {}
        }
    }

    pub fn stop(&self) {
        self.manager.stop();
        let _ = self.conn.flush();
    }
}

impl WorkspaceActions for ExtWorkspaces {
    fn name(&self) -> &'static str {
        "ext-workspace"
    }

    fn activate(&self, workspace: WorkspaceId) {
        let Some(handle) = self.workspaces.borrow().get(&workspace).cloned() else {
            trace!("No workspace handle for {}", workspace);
            return;
        };
        handle.activate();
        self.commit();
    }

    fn can_create(&self) -> bool {
        self.tracker.creation_group().is_some()
    }

    fn create(&self, name: &str) {
        let handle = self
            .tracker
            .creation_group()
            .and_then(|group| self.groups.borrow().get(&group).cloned());
        let Some(handle) = handle else {
            warn!("Cannot create workspace {:?}: no workspace group", name);
            return;
        };
        self.tracker.expect_name(name);
        handle.create_workspace(name.to_string());
        self.commit();
    }

    fn belongs_to_output(&self, workspace: WorkspaceId, output: &str) -> bool {
        self.tracker.check_monitor(workspace, output)
    }
}

impl Dispatch<ExtWorkspaceManagerV1, ()> for WaylandState {
    fn event(
        state: &mut Self,
        _manager: &ExtWorkspaceManagerV1,
        event: ext_workspace_manager_v1::Event,
        _data: &(),
        _conn: &Connection,
        _qh: &QueueHandle<Self>,
    ) {
        if let Some(workspaces) = state.workspaces.clone() {
            workspaces.on_manager_event(event);
        }
    }

    event_created_child!(WaylandState, ExtWorkspaceManagerV1, [
        ext_workspace_manager_v1::EVT_WORKSPACE_GROUP_OPCODE => (ExtWorkspaceGroupHandleV1, ()),
        ext_workspace_manager_v1::EVT_WORKSPACE_OPCODE => (ExtWorkspaceHandleV1, ())
    ]);
}

impl Dispatch<ExtWorkspaceGroupHandleV1, ()> for WaylandState {
    fn event(
        state: &mut Self,
        handle: &ExtWorkspaceGroupHandleV1,
        event: ext_workspace_group_handle_v1::Event,
        _data: &(),
        _conn: &Connection,
        _qh: &QueueHandle<Self>,
    ) {
        if let Some(workspaces) = state.workspaces.clone() {
            workspaces.on_group_event(handle, event);
        }
    }
}

impl Dispatch<ExtWorkspaceHandleV1, ()> for WaylandState {
    fn event(
        state: &mut Self,
        handle: &ExtWorkspaceHandleV1,
        event: ext_workspace_handle_v1::Event,
        _data: &(),
        _conn: &Connection,
        _qh: &QueueHandle<Self>,
    ) {
        if let Some(workspaces) = state.workspaces.clone() {
            workspaces.on_workspace_event(handle, event);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use crate::services::compositor::types::Change;

    fn tracker() -> (Rc<EntityStore>, WorkspaceTracker) {
        let store = Rc::new(EntityStore::new());
        (store.clone(), WorkspaceTracker::new(store))
    }

    #[test]
    fn test_new_workspace_is_visible() {
        let (store, t) = tracker();
        let id = WorkspaceId::new(10);
        t.workspace_created(id);
        assert!(store.workspace(id).unwrap().is_visible());

        t.state(id, false, true, true);
        let ws = store.workspace(id).unwrap();
        assert!(!ws.is_visible());
        assert!(ws.state.contains(WorkspaceState::URGENT));
    }

    #[test]
    fn test_active_state_moves_focus() {
        let (store, t) = tracker();
        let a = WorkspaceId::new(1);
        let b = WorkspaceId::new(2);
        t.workspace_created(a);
        t.workspace_created(b);

        t.state(a, true, false, false);
        t.state(b, true, false, false);
        assert_eq!(store.focused_workspace(), Some(b));
        assert_eq!(store.workspaces().iter().filter(|w| w.is_focused()).count(), 1);

        // a reporting inactive does not steal b's focus.
        t.state(a, false, false, false);
        assert_eq!(store.focused_workspace(), Some(b));
        t.state(b, false, false, false);
        assert_eq!(store.focused_workspace(), None);
    }

    #[test]
    fn test_workspace_lives_until_both_references_drop() {
        let (store, t) = tracker();
        let removed = Rc::new(RefCell::new(0));
        let r = removed.clone();
        store.subscribe(move |c| {
            if matches!(c, Change::WorkspaceRemoved(_)) {
                *r.borrow_mut() += 1;
            }
        });

        let group = GroupId::new(1);
        let id = WorkspaceId::new(7);
        t.group_created(group);
        t.workspace_created(id);
        t.group_workspace_enter(group, id);
        t.group_workspace_enter(group, id);
        assert_eq!(store.workspace(id).unwrap().group, Some(group));

        t.workspace_removed(id);
        assert!(store.contains_workspace(id));

        t.group_workspace_leave(group, id);
        t.workspace_removed(id);
        t.group_removed(group);
        assert!(!store.contains_workspace(id));
        assert_eq!(*removed.borrow(), 1);
    }

    #[test]
    fn test_group_removal_releases_members() {
        let (store, t) = tracker();
        let group = GroupId::new(3);
        let id = WorkspaceId::new(8);
        t.group_created(group);
        t.group_output_enter(group, "DP-1");
        t.workspace_created(id);
        t.group_workspace_enter(group, id);
        assert_eq!(store.workspace(id).unwrap().output.as_deref(), Some("DP-1"));

        t.group_removed(group);
        let ws = store.workspace(id).unwrap();
        assert_eq!(ws.group, None);
        assert_eq!(ws.output, None);

        t.workspace_removed(id);
        assert!(!store.contains_workspace(id));
    }

    #[test]
    fn test_check_monitor() {
        let (_store, t) = tracker();
        let group = GroupId::new(1);
        let grouped = WorkspaceId::new(1);
        let loose = WorkspaceId::new(2);
        t.group_created(group);
        t.group_output_enter(group, "DP-1");
        t.workspace_created(grouped);
        t.workspace_created(loose);
        t.group_workspace_enter(group, grouped);

        assert!(t.check_monitor(grouped, "DP-1"));
        assert!(!t.check_monitor(grouped, "HDMI-A-1"));
        assert!(t.check_monitor(loose, "HDMI-A-1"));
        assert!(!t.check_monitor(WorkspaceId::new(99), "DP-1"));

        t.group_output_leave(group, "DP-1");
        assert!(!t.check_monitor(grouped, "DP-1"));
    }

    #[test]
    fn test_pending_name_triggers_activation_once() {
        let (_store, t) = tracker();
        let id = WorkspaceId::new(4);
        t.workspace_created(id);
        t.expect_name("scratch");

        assert!(!t.name(id, "other"));
        assert!(t.name(id, "scratch"));
        assert!(!t.name(id, "scratch"));
        assert!(!t.name(WorkspaceId::new(404), "scratch"));
    }

    #[test]
    fn test_creation_group_prefers_capable_group() {
        let (_store, t) = tracker();
        assert_eq!(t.creation_group(), None);
        t.group_created(GroupId::new(1));
        t.group_created(GroupId::new(2));
        assert_eq!(t.creation_group(), Some(GroupId::new(1)));
        t.group_capabilities(GroupId::new(2), true);
        assert_eq!(t.creation_group(), Some(GroupId::new(2)));
    }
}
