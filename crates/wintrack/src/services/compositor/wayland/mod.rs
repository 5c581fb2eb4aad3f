//! Wayland protocol drivers.
//!
//! Both drivers share one connection and one event queue. Each binds its
//! manager only when its contract slot is still free, so they can fill in
//! whatever a socket backend left unprovided.
//!
//! The queue is dispatched from the glib main loop through an fd watch on
//! the connection socket.

mod toplevel;
mod workspace;

use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::os::fd::AsFd;
use std::os::unix::io::AsRawFd;
use std::rc::{Rc, Weak};

use tracing::{debug, error, trace, warn};
use wayland_backend::client::WaylandError;
use wayland_client::globals::{GlobalListContents, registry_queue_init};
use wayland_client::protocol::wl_output::{self, WlOutput};
use wayland_client::protocol::wl_registry::{self, WlRegistry};
use wayland_client::protocol::wl_seat::{self, WlSeat};
use wayland_client::{Connection, Dispatch, EventQueue, Proxy, QueueHandle};
use wayland_protocols::ext::workspace::v1::client::ext_workspace_manager_v1::ExtWorkspaceManagerV1;
use wayland_protocols_wlr::foreign_toplevel::v1::client::zwlr_foreign_toplevel_manager_v1::ZwlrForeignToplevelManagerV1;

use super::contracts::Contracts;
use super::store::EntityStore;
use super::types::LinkState;
use super::{CompositorBackend, ProbeError};

use toplevel::WlrToplevels;
use workspace::ExtWorkspaces;

/// Names of bound outputs, keyed by `wl_output` protocol id.
#[derive(Debug, Default)]
pub struct OutputNames {
    names: RefCell<HashMap<u32, String>>,
}

impl OutputNames {
    pub fn set_name(&self, protocol_id: u32, name: String) {
        self.names.borrow_mut().insert(protocol_id, name);
    }

    pub fn remove(&self, protocol_id: u32) {
        self.names.borrow_mut().remove(&protocol_id);
    }

    /// The advertised name, or `output-<id>` for outputs older than
    /// `wl_output` v4.
    pub fn name_for(&self, protocol_id: u32) -> String {
        self.names
            .borrow()
            .get(&protocol_id)
            .cloned()
            .unwrap_or_else(|| format!("output-{}", protocol_id))
    }
}

/// Dispatch state for the shared queue.
pub struct WaylandState {
    outputs: Rc<OutputNames>,
    /// Registry name → bound output, for hot-unplug.
    output_globals: HashMap<u32, WlOutput>,
    toplevels: Option<Rc<WlrToplevels>>,
    workspaces: Option<Rc<ExtWorkspaces>>,
}

impl WaylandState {
    fn new(outputs: Rc<OutputNames>) -> Self {
        Self {
            outputs,
            output_globals: HashMap::new(),
            toplevels: None,
            workspaces: None,
        }
    }

    fn bind_output(&mut self, registry: &WlRegistry, name: u32, version: u32, qh: &QueueHandle<Self>) {
        let output: WlOutput = registry.bind(name, version.min(4), qh, ());
        trace!("Bound wl_output {} (v{})", name, version);
        self.output_globals.insert(name, output);
    }
}

impl Dispatch<WlRegistry, GlobalListContents> for WaylandState {
    fn event(
        state: &mut Self,
        registry: &WlRegistry,
        event: wl_registry::Event,
        _data: &GlobalListContents,
        _conn: &Connection,
        qh: &QueueHandle<Self>,
    ) {
        match event {
            wl_registry::Event::Global {
                name,
                interface,
                version,
            } if interface == WlOutput::interface().name => {
                state.bind_output(registry, name, version, qh);
            }
            wl_registry::Event::GlobalRemove { name } => {
                if let Some(output) = state.output_globals.remove(&name) {
                    debug!("Output {} removed", name);
                    state.outputs.remove(output.id().protocol_id());
                    if output.version() >= 3 {
                        output.release();
                    }
                }
            }
            _ => {}
        }
    }
}

impl Dispatch<WlOutput, ()> for WaylandState {
    fn event(
        state: &mut Self,
        output: &WlOutput,
        event: wl_output::Event,
        _data: &(),
        _conn: &Connection,
        _qh: &QueueHandle<Self>,
    ) {
        if let wl_output::Event::Name { name } = event {
            trace!("Output {} is {}", output.id().protocol_id(), name);
            state.outputs.set_name(output.id().protocol_id(), name);
        }
    }
}

impl Dispatch<WlSeat, ()> for WaylandState {
    fn event(
        _state: &mut Self,
        _seat: &WlSeat,
        _event: wl_seat::Event,
        _data: &(),
        _conn: &Connection,
        _qh: &QueueHandle<Self>,
    ) {
    }
}

pub struct WaylandBackend {
    store: Rc<EntityStore>,
    toplevels: Option<Rc<WlrToplevels>>,
    workspaces: Option<Rc<ExtWorkspaces>>,
    queue: RefCell<EventQueue<WaylandState>>,
    state: RefCell<WaylandState>,
    link: Cell<LinkState>,
    source_id: RefCell<Option<glib::SourceId>>,
}

impl WaylandBackend {
    /// Connect, bind whichever managers still have a free contract slot,
    /// enumerate and start dispatching.
    pub fn probe(store: Rc<EntityStore>, contracts: &Contracts) -> Result<Rc<Self>, ProbeError> {
        if contracts.is_complete() {
            return Err(ProbeError::AlreadyInstalled);
        }

        let conn = Connection::connect_to_env()
            .map_err(|_| ProbeError::Unavailable("no Wayland display"))?;
        let (globals, mut queue) = registry_queue_init::<WaylandState>(&conn)
            .map_err(|_| ProbeError::SeedFailed("wayland"))?;
        let qh = queue.handle();

        let outputs = Rc::new(OutputNames::default());
        let mut state = WaylandState::new(outputs.clone());

        let output_globals: Vec<(u32, u32)> = globals.contents().with_list(|list| {
            list.iter()
                .filter(|g| g.interface == WlOutput::interface().name)
                .map(|g| (g.name, g.version))
                .collect()
        });
        for (name, version) in output_globals {
            state.bind_output(globals.registry(), name, version, &qh);
        }

        let seat: Option<WlSeat> = globals.bind(&qh, 1..=7, ()).ok();

        let toplevels = if contracts.has_window_actions() {
            None
        } else {
            match globals.bind::<ZwlrForeignToplevelManagerV1, _, _>(&qh, 1..=3, ()) {
                Ok(manager) => Some(Rc::new(WlrToplevels::new(
                    store.clone(),
                    outputs.clone(),
                    conn.clone(),
                    seat,
                    manager,
                ))),
                Err(e) => {
                    debug!("No foreign toplevel manager: {}", e);
                    None
                }
            }
        };

        let workspaces = if contracts.has_workspace_actions() {
            None
        } else {
            match globals.bind::<ExtWorkspaceManagerV1, _, _>(&qh, 1..=1, ()) {
                Ok(manager) => Some(Rc::new(ExtWorkspaces::new(
                    store.clone(),
                    outputs,
                    conn.clone(),
                    manager,
                ))),
                Err(e) => {
                    debug!("No ext workspace manager: {}", e);
                    None
                }
            }
        };

        if toplevels.is_none() && workspaces.is_none() {
            return Err(ProbeError::ProtocolMissing(
                "zwlr_foreign_toplevel_manager_v1 or ext_workspace_manager_v1",
            ));
        }
        state.toplevels = toplevels.clone();
        state.workspaces = workspaces.clone();

        // Globals, then the initial batch of handles and their properties.
        for _ in 0..2 {
            queue.roundtrip(&mut state).map_err(|e| {
                error!("Wayland roundtrip failed: {}", e);
                ProbeError::SeedFailed("wayland")
            })?;
        }

        if let Some(toplevels) = &toplevels
            && let Err(e) = contracts.try_install_window_actions(toplevels.clone())
        {
            debug!("Wayland: {}", e);
        }
        if let Some(workspaces) = &workspaces
            && let Err(e) = contracts.try_install_workspace_actions(workspaces.clone())
        {
            debug!("Wayland: {}", e);
        }

        let backend = Rc::new(Self {
            store: store.clone(),
            toplevels,
            workspaces,
            queue: RefCell::new(queue),
            state: RefCell::new(state),
            link: Cell::new(LinkState::Attached),
            source_id: RefCell::new(None),
        });
        backend.watch();
        store.trigger("wayland_connected");
        Ok(backend)
    }

    fn watch(self: &Rc<Self>) {
        let fd = self.queue.borrow().as_fd().as_raw_fd();
        let weak: Weak<Self> = Rc::downgrade(self);
        let source_id = glib::unix_fd_add_local(
            fd,
            glib::IOCondition::IN | glib::IOCondition::HUP | glib::IOCondition::ERR,
            move |_fd, _condition| {
                let Some(backend) = weak.upgrade() else {
                    return glib::ControlFlow::Break;
                };
                if backend.dispatch() {
                    glib::ControlFlow::Continue
                } else {
                    backend.on_disconnect();
                    glib::ControlFlow::Break
                }
            },
        );
        *self.source_id.borrow_mut() = Some(source_id);
        self.link.set(LinkState::Streaming);
    }

    /// Read and dispatch whatever is pending. `false` once the connection
    /// is unusable.
    fn dispatch(&self) -> bool {
        let mut queue = self.queue.borrow_mut();
        let mut state = self.state.borrow_mut();

        if let Err(e) = queue.dispatch_pending(&mut *state) {
            error!("Wayland dispatch error: {}", e);
            return false;
        }
        if let Some(guard) = queue.prepare_read() {
            match guard.read() {
                Ok(_) => {
                    if let Err(e) = queue.dispatch_pending(&mut *state) {
                        error!("Wayland dispatch error: {}", e);
                        return false;
                    }
                }
                Err(WaylandError::Io(e))
                    if e.kind() == std::io::ErrorKind::WouldBlock => {}
                Err(e) => {
                    error!("Wayland read error: {}", e);
                    return false;
                }
            }
        }
        if let Err(e) = queue.flush() {
            warn!("Wayland flush failed: {}", e);
        }
        true
    }

    fn on_disconnect(&self) {
        self.source_id.borrow_mut().take();
        self.link.set(LinkState::Disconnected);
        warn!("Wayland connection lost");
        self.store.trigger("wayland_disconnected");
    }

    pub fn has_toplevels(&self) -> bool {
        self.toplevels.is_some()
    }

    pub fn has_workspaces(&self) -> bool {
        self.workspaces.is_some()
    }
}

impl CompositorBackend for WaylandBackend {
    fn name(&self) -> &'static str {
        "wayland"
    }

    fn link_state(&self) -> LinkState {
        self.link.get()
    }

    fn stop(&self) {
        if let Some(source_id) = self.source_id.borrow_mut().take() {
            source_id.remove();
        }
        if let Some(toplevels) = &self.toplevels {
            toplevels.stop();
        }
        if let Some(workspaces) = &self.workspaces {
            workspaces.stop();
        }
        self.link.set(LinkState::Disconnected);
        debug!("Wayland backend stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_output_name_fallback() {
        let names = OutputNames::default();
        assert_eq!(names.name_for(12), "output-12");
        names.set_name(12, "DP-2".into());
        assert_eq!(names.name_for(12), "DP-2");
        names.remove(12);
        assert_eq!(names.name_for(12), "output-12");
    }
}
