//! Capability contracts the active backend installs.
//!
//! Consumers never talk to a backend directly: they call through
//! [`Contracts`], which holds at most one window-actions and one
//! workspace-actions implementation. The first backend to install into a
//! slot wins; later installs are rejected.

use std::cell::RefCell;
use std::rc::Rc;

use tracing::{debug, trace};

use super::types::{Layout, WindowId, WorkspaceId};

/// Window operations. Every method defaults to a no-op so a backend only
/// overrides what its protocol supports.
pub trait WindowActions {
    fn name(&self) -> &'static str;

    fn minimize(&self, _window: WindowId) {}

    fn unminimize(&self, _window: WindowId) {}

    fn maximize(&self, _window: WindowId) {}

    fn unmaximize(&self, _window: WindowId) {}

    fn close(&self, _window: WindowId) {}

    fn focus(&self, _window: WindowId) {}

    fn move_to(&self, _window: WindowId, _workspace: WorkspaceId) {}

    /// Whether `move_to` does anything with this backend.
    fn supports_move(&self) -> bool {
        false
    }
}

/// Workspace operations.
pub trait WorkspaceActions {
    fn name(&self) -> &'static str;

    fn activate(&self, workspace: WorkspaceId);

    /// Geometry of `workspace` with `exclude` left out of the siblings.
    fn query_layout(&self, _exclude: Option<WindowId>, _workspace: WorkspaceId) -> Option<Layout> {
        None
    }

    fn can_create(&self) -> bool {
        false
    }

    fn create(&self, _name: &str) {}

    /// Whether `workspace` lives on `output`. Backends without output
    /// grouping report every workspace on every output.
    fn belongs_to_output(&self, _workspace: WorkspaceId, _output: &str) -> bool {
        true
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ContractError {
    #[error("{slot} contract already provided by {owner}")]
    AlreadyInstalled {
        slot: &'static str,
        owner: &'static str,
    },
}

/// Registry holding the installed contracts.
#[derive(Default)]
pub struct Contracts {
    window: RefCell<Option<Rc<dyn WindowActions>>>,
    workspace: RefCell<Option<Rc<dyn WorkspaceActions>>>,
}

impl Contracts {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn try_install_window_actions(
        &self,
        actions: Rc<dyn WindowActions>,
    ) -> Result<(), ContractError> {
        let mut slot = self.window.borrow_mut();
        if let Some(owner) = slot.as_ref() {
            return Err(ContractError::AlreadyInstalled {
                slot: "window",
                owner: owner.name(),
            });
        }
        debug!("Window actions provided by {}", actions.name());
        *slot = Some(actions);
        Ok(())
    }

    pub fn try_install_workspace_actions(
        &self,
        actions: Rc<dyn WorkspaceActions>,
    ) -> Result<(), ContractError> {
        let mut slot = self.workspace.borrow_mut();
        if let Some(owner) = slot.as_ref() {
            return Err(ContractError::AlreadyInstalled {
                slot: "workspace",
                owner: owner.name(),
            });
        }
        debug!("Workspace actions provided by {}", actions.name());
        *slot = Some(actions);
        Ok(())
    }

    pub fn has_window_actions(&self) -> bool {
        self.window.borrow().is_some()
    }

    pub fn has_workspace_actions(&self) -> bool {
        self.workspace.borrow().is_some()
    }

    /// Both slots filled: nothing left for later probes to provide.
    pub fn is_complete(&self) -> bool {
        self.has_window_actions() && self.has_workspace_actions()
    }

    // Clone the Rc out so the slot is not borrowed while the backend runs;
    // a backend may re-enter the registry from inside an action.
    fn window_actions(&self) -> Option<Rc<dyn WindowActions>> {
        let actions = self.window.borrow().clone();
        if actions.is_none() {
            trace!("no window actions installed");
        }
        actions
    }

    fn workspace_actions(&self) -> Option<Rc<dyn WorkspaceActions>> {
        let actions = self.workspace.borrow().clone();
        if actions.is_none() {
            trace!("no workspace actions installed");
        }
        actions
    }

    pub fn minimize(&self, window: WindowId) {
        if let Some(a) = self.window_actions() {
            a.minimize(window);
        }
    }

    pub fn unminimize(&self, window: WindowId) {
        if let Some(a) = self.window_actions() {
            a.unminimize(window);
        }
    }

    pub fn maximize(&self, window: WindowId) {
        if let Some(a) = self.window_actions() {
            a.maximize(window);
        }
    }

    pub fn unmaximize(&self, window: WindowId) {
        if let Some(a) = self.window_actions() {
            a.unmaximize(window);
        }
    }

    pub fn close(&self, window: WindowId) {
        if let Some(a) = self.window_actions() {
            a.close(window);
        }
    }

    pub fn focus(&self, window: WindowId) {
        if let Some(a) = self.window_actions() {
            a.focus(window);
        }
    }

    pub fn move_to(&self, window: WindowId, workspace: WorkspaceId) {
        if let Some(a) = self.window_actions() {
            a.move_to(window, workspace);
        }
    }

    pub fn supports_move(&self) -> bool {
        self.window_actions().is_some_and(|a| a.supports_move())
    }

    pub fn activate(&self, workspace: WorkspaceId) {
        if let Some(a) = self.workspace_actions() {
            a.activate(workspace);
        }
    }

    pub fn query_layout(&self, exclude: Option<WindowId>, workspace: WorkspaceId) -> Option<Layout> {
        self.workspace_actions()?.query_layout(exclude, workspace)
    }

    pub fn can_create(&self) -> bool {
        self.workspace_actions().is_some_and(|a| a.can_create())
    }

    pub fn create(&self, name: &str) {
        if let Some(a) = self.workspace_actions()
            && a.can_create()
        {
            a.create(name);
        }
    }

    pub fn belongs_to_output(&self, workspace: WorkspaceId, output: &str) -> bool {
        self.workspace_actions()
            .is_none_or(|a| a.belongs_to_output(workspace, output))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;

    #[derive(Default)]
    struct Recorder {
        calls: RefCell<Vec<String>>,
    }

    impl WindowActions for Recorder {
        fn name(&self) -> &'static str {
            "recorder"
        }

        fn close(&self, window: WindowId) {
            self.calls.borrow_mut().push(format!("close {window}"));
        }
    }

    struct Other;

    impl WindowActions for Other {
        fn name(&self) -> &'static str {
            "other"
        }
    }

    struct Desks;

    impl WorkspaceActions for Desks {
        fn name(&self) -> &'static str {
            "desks"
        }

        fn activate(&self, _workspace: WorkspaceId) {}

        fn belongs_to_output(&self, workspace: WorkspaceId, output: &str) -> bool {
            workspace.raw() == 1 && output == "DP-1"
        }
    }

    #[test]
    fn test_first_install_wins() {
        let contracts = Contracts::new();
        let recorder = Rc::new(Recorder::default());
        contracts.try_install_window_actions(recorder.clone()).unwrap();

        let err = contracts
            .try_install_window_actions(Rc::new(Other))
            .unwrap_err();
        assert_eq!(
            err,
            ContractError::AlreadyInstalled {
                slot: "window",
                owner: "recorder"
            }
        );

        contracts.close(WindowId::new(0x10));
        assert_eq!(*recorder.calls.borrow(), vec!["close 0x10"]);
    }

    #[test]
    fn test_unsupported_operation_is_noop() {
        let contracts = Contracts::new();
        let recorder = Rc::new(Recorder::default());
        contracts.try_install_window_actions(recorder.clone()).unwrap();

        contracts.minimize(WindowId::new(1));
        contracts.move_to(WindowId::new(1), WorkspaceId::new(2));
        assert!(recorder.calls.borrow().is_empty());
        assert!(!contracts.supports_move());
    }

    #[test]
    fn test_dispatch_without_install() {
        let contracts = Contracts::new();
        contracts.focus(WindowId::new(1));
        contracts.activate(WorkspaceId::new(1));
        assert!(!contracts.can_create());
        assert_eq!(contracts.query_layout(None, WorkspaceId::new(1)), None);
        assert!(contracts.belongs_to_output(WorkspaceId::new(1), "any"));
        assert!(!contracts.is_complete());
    }

    #[test]
    fn test_workspace_slot_is_independent() {
        let contracts = Contracts::new();
        contracts
            .try_install_window_actions(Rc::new(Other))
            .unwrap();
        contracts.try_install_workspace_actions(Rc::new(Desks)).unwrap();
        assert!(contracts.is_complete());
        assert!(contracts.belongs_to_output(WorkspaceId::new(1), "DP-1"));
        assert!(!contracts.belongs_to_output(WorkspaceId::new(2), "DP-1"));
        assert!(
            contracts
                .try_install_workspace_actions(Rc::new(Desks))
                .is_err()
        );
    }
}
