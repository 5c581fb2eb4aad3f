//! Placement of newly mapped windows.
//!
//! Socket backends ask a [`Placement`] where a freshly opened window should
//! go and then issue the move themselves.

use std::rc::{Rc, Weak};

use tracing::trace;
use wintrack_core::{PlacementConfig, Rect};

use super::contracts::Contracts;
use super::store::EntityStore;
use super::types::WindowId;

pub trait Placement {
    /// Desired rectangle for `window`, given its current `frame`.
    /// `None` leaves the window where the compositor put it.
    fn compute_placement(&self, window: WindowId, frame: Rect) -> Option<Rect>;
}

/// Centre lone windows, cascade the rest from the workspace origin.
pub struct CascadePlacement {
    store: Rc<EntityStore>,
    contracts: Weak<Contracts>,
    step_x: i32,
    step_y: i32,
}

impl CascadePlacement {
    pub fn new(store: Rc<EntityStore>, contracts: &Rc<Contracts>, config: &PlacementConfig) -> Self {
        Self {
            store,
            contracts: Rc::downgrade(contracts),
            step_x: config.step_x,
            step_y: config.step_y,
        }
    }
}

impl Placement for CascadePlacement {
    fn compute_placement(&self, window: WindowId, frame: Rect) -> Option<Rect> {
        let workspace = self.store.window(window)?.workspace?;
        let contracts = self.contracts.upgrade()?;
        let layout = contracts.query_layout(Some(window), workspace)?;
        let placed = cascade(frame, &layout.container, &layout.siblings, self.step_x, self.step_y);
        trace!("placing {} at {:?} (was {:?})", window, placed, frame);
        Some(placed)
    }
}

/// Pure cascade rule used by [`CascadePlacement`].
pub fn cascade(frame: Rect, container: &Rect, siblings: &[Rect], step_x: i32, step_y: i32) -> Rect {
    if siblings.is_empty() {
        return frame.centered_in(container);
    }

    let origin = frame.at(container.x, container.y);
    if step_x == 0 && step_y == 0 {
        return origin;
    }

    let mut candidate = origin;
    for _ in 0..=siblings.len() {
        let taken = siblings
            .iter()
            .any(|s| s.x == candidate.x && s.y == candidate.y);
        if !taken {
            return candidate;
        }
        candidate = candidate.at(candidate.x + step_x, candidate.y + step_y);
        if !container.contains(&candidate) {
            return origin;
        }
    }
    candidate
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::compositor::contracts::WorkspaceActions;
    use crate::services::compositor::types::{Layout, WorkspaceId};

    const SCREEN: Rect = Rect::new(0, 0, 1920, 1080);

    #[test]
    fn test_lone_window_is_centered() {
        let placed = cascade(Rect::new(5, 5, 800, 600), &SCREEN, &[], 32, 32);
        assert_eq!(placed, Rect::new(560, 240, 800, 600));
    }

    #[test]
    fn test_cascade_skips_occupied_origins() {
        let siblings = [Rect::new(0, 0, 400, 300), Rect::new(32, 32, 400, 300)];
        let placed = cascade(Rect::new(700, 700, 400, 300), &SCREEN, &siblings, 32, 32);
        assert_eq!(placed, Rect::new(64, 64, 400, 300));
    }

    #[test]
    fn test_cascade_wraps_when_leaving_container() {
        let container = Rect::new(0, 0, 100, 100);
        let siblings = [Rect::new(0, 0, 60, 60), Rect::new(32, 32, 60, 60)];
        let placed = cascade(Rect::new(0, 0, 60, 60), &container, &siblings, 32, 32);
        assert_eq!(placed, Rect::new(0, 0, 60, 60));
    }

    struct FixedLayout;

    impl WorkspaceActions for FixedLayout {
        fn name(&self) -> &'static str {
            "fixed"
        }

        fn activate(&self, _workspace: WorkspaceId) {}

        fn query_layout(&self, _exclude: Option<WindowId>, _ws: WorkspaceId) -> Option<Layout> {
            Some(Layout {
                container: Rect::new(100, 0, 1000, 1000),
                siblings: vec![Rect::new(100, 0, 10, 10)],
                focused: Some(0),
            })
        }
    }

    #[test]
    fn test_cascade_placement_uses_installed_layout() {
        let store = Rc::new(EntityStore::new());
        let contracts = Rc::new(Contracts::new());
        contracts
            .try_install_workspace_actions(Rc::new(FixedLayout))
            .unwrap();
        let placement = CascadePlacement::new(store.clone(), &contracts, &PlacementConfig::default());

        let id = WindowId::new(7);
        store.create_window(id);
        // No workspace yet: leave the window alone.
        assert_eq!(placement.compute_placement(id, Rect::new(0, 0, 50, 50)), None);

        store.create_workspace(WorkspaceId::new(1), "1");
        store.set_workspace(id, Some(WorkspaceId::new(1)));
        assert_eq!(
            placement.compute_placement(id, Rect::new(0, 0, 50, 50)),
            Some(Rect::new(132, 32, 50, 50))
        );
    }
}
