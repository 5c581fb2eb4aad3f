//! Entity types shared by every compositor backend.
//!
//! Identities are opaque tokens: a backend may derive them from a protocol
//! object id, a vendor window address or a composed grid key, but consumers
//! only ever compare and hash them.

use std::collections::BTreeSet;
use std::fmt;

use bitflags::bitflags;
use wintrack_core::Rect;

/// Opaque window identity, unique for the lifetime of the window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct WindowId(u64);

impl WindowId {
    pub const fn new(raw: u64) -> Self {
        Self(raw)
    }

    pub const fn raw(self) -> u64 {
        self.0
    }
}

impl From<u64> for WindowId {
    fn from(raw: u64) -> Self {
        Self(raw)
    }
}

impl fmt::Display for WindowId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:x}", self.0)
    }
}

/// Opaque workspace identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct WorkspaceId(i64);

impl WorkspaceId {
    pub const fn new(raw: i64) -> Self {
        Self(raw)
    }

    pub const fn raw(self) -> i64 {
        self.0
    }
}

impl From<i64> for WorkspaceId {
    fn from(raw: i64) -> Self {
        Self(raw)
    }
}

impl fmt::Display for WorkspaceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identity of a workspace group (ext-workspace only).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct GroupId(u64);

impl GroupId {
    pub const fn new(raw: u64) -> Self {
        Self(raw)
    }
}

bitflags! {
    /// Window state bits.
    #[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
    pub struct WindowState: u8 {
        const MINIMIZED = 1 << 0;
        const MAXIMIZED = 1 << 1;
        const FULLSCREEN = 1 << 2;
        const FOCUSED = 1 << 3;
    }
}

bitflags! {
    /// Workspace state bits.
    #[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
    pub struct WorkspaceState: u8 {
        const VISIBLE = 1 << 0;
        const FOCUSED = 1 << 1;
        const URGENT = 1 << 2;
        const INVALID = 1 << 3;
    }
}

bitflags! {
    /// Workspace capability bits.
    #[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
    pub struct WorkspaceCaps: u8 {
        const CAN_ACTIVATE = 1 << 0;
    }
}

/// One compositor toplevel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Window {
    pub id: WindowId,
    pub title: Option<String>,
    pub app_id: Option<String>,
    pub state: WindowState,
    /// Weak back-reference; resolving it may miss.
    pub workspace: Option<WorkspaceId>,
    /// Output names the window currently overlaps.
    pub outputs: BTreeSet<String>,
    pub floating: bool,
    pub pid: Option<i32>,
}

impl Window {
    pub fn new(id: WindowId) -> Self {
        Self {
            id,
            title: None,
            app_id: None,
            state: WindowState::empty(),
            workspace: None,
            outputs: BTreeSet::new(),
            floating: false,
            pid: None,
        }
    }

    pub fn is_minimized(&self) -> bool {
        self.state.contains(WindowState::MINIMIZED)
    }
}

/// One compositor workspace.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Workspace {
    pub id: WorkspaceId,
    pub name: String,
    pub state: WorkspaceState,
    pub caps: WorkspaceCaps,
    /// Weak back-reference to the owning group, if the backend groups.
    pub group: Option<GroupId>,
    /// Output the workspace lives on, when the backend reports it directly.
    pub output: Option<String>,
    pub(crate) refs: u32,
}

impl Workspace {
    pub fn new(id: WorkspaceId, name: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
            state: WorkspaceState::empty(),
            caps: WorkspaceCaps::empty(),
            group: None,
            output: None,
            refs: 1,
        }
    }

    pub fn is_visible(&self) -> bool {
        self.state.contains(WorkspaceState::VISIBLE)
    }

    pub fn is_focused(&self) -> bool {
        self.state.contains(WorkspaceState::FOCUSED)
    }
}

/// Result of a workspace layout query.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Layout {
    /// Area windows of the workspace are laid out in.
    pub container: Rect,
    /// Rectangles of the other windows on the workspace.
    pub siblings: Vec<Rect>,
    /// Index into `siblings` of the focused window, if it is one of them.
    pub focused: Option<usize>,
}

/// Change notification fanned out to subscribers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Change {
    WindowCreated(WindowId),
    WindowChanged(WindowId),
    WindowRemoved(WindowId),
    WindowFocus(Option<WindowId>),
    WorkspaceCreated(WorkspaceId),
    WorkspaceChanged(WorkspaceId),
    WorkspaceRemoved(WorkspaceId),
    WorkspaceFocus(Option<WorkspaceId>),
    /// Named trigger such as `hyprland_connected`.
    Trigger(String),
}

/// Lifecycle of a socket backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkState {
    Disconnected,
    Probing,
    /// Seed enumeration succeeded, push channel not yet watched.
    Attached,
    Streaming,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_window_id_display_is_hex() {
        assert_eq!(WindowId::new(0x5).to_string(), "0x5");
        assert_eq!(WindowId::new(0x55d0c0ffee).to_string(), "0x55d0c0ffee");
    }

    #[test]
    fn test_new_window_has_no_state() {
        let window = Window::new(WindowId::new(1));
        assert!(window.state.is_empty());
        assert!(!window.is_minimized());
        assert!(window.outputs.is_empty());
    }

    #[test]
    fn test_new_workspace_holds_one_reference() {
        let ws = Workspace::new(WorkspaceId::new(3), "3");
        assert_eq!(ws.refs, 1);
        assert!(!ws.is_visible());
        assert!(!ws.is_focused());
    }
}
