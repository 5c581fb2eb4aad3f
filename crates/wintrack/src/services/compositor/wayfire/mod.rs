//! Wayfire backend over the `ipc-rules` socket.
//!
//! One socket carries both directions. Every message is a little-endian
//! `u32` length followed by that many bytes of JSON. Requests are
//! `{"method": ..., "data": {...}}`; after `window-rules/events/watch` the
//! compositor also pushes event objects, recognised by their `"event"` key.
//! Events that arrive while a request is waiting for its reply are queued
//! and handled once the current handler returns.

mod grid;

use std::cell::{Cell as StdCell, RefCell};
use std::collections::VecDeque;
use std::env;
use std::io::{self, ErrorKind, Read, Write};
use std::os::unix::io::AsRawFd;
use std::os::unix::net::UnixStream;
use std::path::{Path, PathBuf};
use std::rc::{Rc, Weak};
use std::time::Duration;

use serde_json::{Value, json};
use tracing::{debug, error, trace, warn};
use wintrack_core::Rect;

use super::contracts::{Contracts, WindowActions, WorkspaceActions};
use super::placement::Placement;
use super::store::EntityStore;
use super::types::{Layout, LinkState, WindowId, WindowState, WorkspaceCaps, WorkspaceId, WorkspaceState};
use super::{CompositorBackend, ProbeError};

pub use grid::{Cell, Grid, Output, OutputSet, split_workspace_id, workspace_id};

/// Frames above this size are treated as corruption.
pub const MAX_FRAME: usize = 64 * 1024 * 1024;

/// All four edges tiled.
const TILED_ALL: u64 = 0b1111;

const WATCHED_EVENTS: &[&str] = &[
    "view-mapped",
    "view-unmapped",
    "view-title-changed",
    "view-app-id-changed",
    "view-focused",
    "view-minimized",
    "view-fullscreen",
    "view-tiled",
    "view-geometry-changed",
    "view-wset-changed",
    "view-workspace-changed",
    "wset-workspace-changed",
    "output-added",
    "output-removed",
    "output-wset-changed",
    "output-gain-focus",
];

#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    #[error("frame of {0} bytes exceeds limit")]
    TooLarge(usize),
    #[error("frame is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),
}

pub fn encode_frame(payload: &Value) -> Vec<u8> {
    let body = payload.to_string().into_bytes();
    let mut frame = Vec::with_capacity(4 + body.len());
    frame.extend_from_slice(&(body.len() as u32).to_le_bytes());
    frame.extend_from_slice(&body);
    frame
}

/// Reassembles frames from arbitrarily split reads.
#[derive(Debug, Default)]
pub struct FrameReader {
    buf: Vec<u8>,
}

impl FrameReader {
    pub fn push(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
    }

    /// Next complete message, `Ok(None)` if more bytes are needed.
    pub fn next_message(&mut self) -> Result<Option<Value>, FrameError> {
        let Some(header) = self.buf.get(..4) else {
            return Ok(None);
        };
        let len = u32::from_le_bytes([header[0], header[1], header[2], header[3]]) as usize;
        if len > MAX_FRAME {
            self.buf.clear();
            return Err(FrameError::TooLarge(len));
        }
        if self.buf.len() < 4 + len {
            return Ok(None);
        }
        let body: Vec<u8> = self.buf.drain(..4 + len).skip(4).collect();
        Ok(Some(serde_json::from_slice(&body)?))
    }
}

fn is_event(message: &Value) -> bool {
    message.get("event").is_some()
}

/// Request/response channel plus the queue of pushed events.
pub trait WayfireTransport {
    /// `None` on transport failure or an `"error"` reply.
    fn request(&self, method: &str, data: Value) -> Option<Value>;

    /// Events received so far and not yet handed out.
    fn take_events(&self) -> Vec<Value>;
}

pub struct WayfireSocket {
    stream: UnixStream,
    reader: RefCell<FrameReader>,
    events: RefCell<VecDeque<Value>>,
    timeout: Duration,
    closed: StdCell<bool>,
}

impl WayfireSocket {
    pub fn connect(path: &Path, timeout: Duration) -> io::Result<Self> {
        Self::from_stream(UnixStream::connect(path)?, timeout)
    }

    pub fn from_stream(stream: UnixStream, timeout: Duration) -> io::Result<Self> {
        stream.set_write_timeout(Some(timeout))?;
        Ok(Self {
            stream,
            reader: RefCell::new(FrameReader::default()),
            events: RefCell::new(VecDeque::new()),
            timeout,
            closed: StdCell::new(false),
        })
    }

    pub fn is_closed(&self) -> bool {
        self.closed.get()
    }

    /// Move every complete event frame out of the reader into the queue.
    /// Returns the first non-event message, if any.
    fn drain_frames(&self) -> Option<Value> {
        let mut reader = self.reader.borrow_mut();
        loop {
            match reader.next_message() {
                Ok(Some(message)) if is_event(&message) => {
                    self.events.borrow_mut().push_back(message);
                }
                Ok(Some(reply)) => return Some(reply),
                Ok(None) => return None,
                // The bad frame is already consumed; the stream stays aligned.
                Err(FrameError::Json(e)) => {
                    warn!("Skipping malformed Wayfire message: {}", e);
                }
                Err(e) => {
                    error!("Dropping Wayfire stream: {}", e);
                    self.closed.set(true);
                    return None;
                }
            }
        }
    }

    /// Non-blocking read of whatever is available. Used by the fd watch.
    pub fn pump(&self) {
        if let Err(e) = self.stream.set_nonblocking(true) {
            warn!("Failed to make Wayfire socket non-blocking: {}", e);
        }
        let mut buf = [0u8; 8192];
        loop {
            match (&self.stream).read(&mut buf) {
                Ok(0) => {
                    self.closed.set(true);
                    break;
                }
                Ok(n) => self.reader.borrow_mut().push(&buf[..n]),
                Err(e) if e.kind() == ErrorKind::WouldBlock => break,
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => {
                    error!("Error reading Wayfire socket: {}", e);
                    self.closed.set(true);
                    break;
                }
            }
        }
        // A reply arriving here belongs to nobody.
        if let Some(stray) = self.drain_frames() {
            trace!("Discarding unsolicited Wayfire reply: {}", stray);
        }
    }

    fn wait_reply(&self) -> io::Result<Value> {
        self.stream.set_nonblocking(false)?;
        self.stream.set_read_timeout(Some(self.timeout))?;
        let mut buf = [0u8; 8192];
        loop {
            if let Some(reply) = self.drain_frames() {
                return Ok(reply);
            }
            if self.closed.get() {
                return Err(io::Error::new(ErrorKind::InvalidData, "malformed frame"));
            }
            match (&self.stream).read(&mut buf) {
                Ok(0) => {
                    self.closed.set(true);
                    return Err(io::Error::new(ErrorKind::UnexpectedEof, "socket closed"));
                }
                Ok(n) => self.reader.borrow_mut().push(&buf[..n]),
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            }
        }
    }
}

impl WayfireTransport for WayfireSocket {
    fn request(&self, method: &str, data: Value) -> Option<Value> {
        if self.closed.get() {
            return None;
        }
        let frame = encode_frame(&json!({ "method": method, "data": data }));
        if let Err(e) = self.stream.set_nonblocking(false) {
            warn!("Wayfire {}: {}", method, e);
            return None;
        }
        if let Err(e) = (&self.stream).write_all(&frame) {
            warn!("Failed to send Wayfire request {}: {}", method, e);
            return None;
        }
        let reply = match self.wait_reply() {
            Ok(reply) => reply,
            Err(e) => {
                warn!("No reply to Wayfire request {}: {}", method, e);
                return None;
            }
        };
        if let Some(err) = reply.get("error") {
            warn!("Wayfire request {} failed: {}", method, err);
            return None;
        }
        Some(reply)
    }

    fn take_events(&self) -> Vec<Value> {
        self.events.borrow_mut().drain(..).collect()
    }
}

fn str_field<'a>(v: &'a Value, key: &str) -> &'a str {
    v.get(key).and_then(|v| v.as_str()).unwrap_or("")
}

fn u64_field(v: &Value, key: &str) -> Option<u64> {
    v.get(key).and_then(|v| v.as_u64())
}

fn bool_field(v: &Value, key: &str) -> bool {
    v.get(key).and_then(|v| v.as_bool()).unwrap_or(false)
}

fn rect_field(v: &Value, key: &str) -> Option<Rect> {
    let g = v.get(key)?;
    let n = |k: &str| g.get(k).and_then(|v| v.as_i64()).map(|v| v as i32);
    Some(Rect::new(n("x")?, n("y")?, n("width")?, n("height")?))
}

fn cell_field(v: &Value, key: &str) -> Option<Cell> {
    let c = v.get(key)?;
    Some(Cell::new(
        c.get("x")?.as_i64()? as i32,
        c.get("y")?.as_i64()? as i32,
    ))
}

fn parse_output(v: &Value) -> Option<Output> {
    let id = u64_field(v, "id")?;
    let geometry = rect_field(v, "geometry")?;
    let name = match str_field(v, "name") {
        "" => format!("output-{}", id),
        name => name.to_string(),
    };
    Some(Output {
        id,
        name,
        size: (geometry.width, geometry.height),
    })
}

/// Wsets come either from `list-wsets` or embedded in output data.
fn parse_set(v: &Value, output: Option<u64>) -> Option<OutputSet> {
    let index = v
        .get("index")
        .or_else(|| v.get("wset-index"))
        .and_then(|v| v.as_u64())? as u32;
    let ws = v.get("workspace")?;
    let dim = |k: &str| ws.get(k).and_then(|v| v.as_i64()).map(|v| v as i32);
    Some(OutputSet {
        index,
        output: u64_field(v, "output-id").or(output),
        width: dim("grid_width")?.max(1),
        height: dim("grid_height")?.max(1),
        active: Cell::new(dim("x")?, dim("y")?),
    })
}

type EventHandler = fn(&Wayfire, &Value);

const EVENT_HANDLERS: &[(&str, EventHandler)] = &[
    ("view-mapped", Wayfire::on_view_mapped),
    ("view-unmapped", Wayfire::on_view_unmapped),
    ("view-title-changed", Wayfire::on_view_changed),
    ("view-app-id-changed", Wayfire::on_view_changed),
    ("view-focused", Wayfire::on_view_focused),
    ("view-minimized", Wayfire::on_view_changed),
    ("view-fullscreen", Wayfire::on_view_changed),
    ("view-tiled", Wayfire::on_view_changed),
    ("view-geometry-changed", Wayfire::on_view_changed),
    ("view-wset-changed", Wayfire::on_view_changed),
    ("view-workspace-changed", Wayfire::on_view_changed),
    ("wset-workspace-changed", Wayfire::on_wset_workspace_changed),
    ("output-added", Wayfire::on_output_added),
    ("output-removed", Wayfire::on_output_removed),
    ("output-wset-changed", Wayfire::on_output_wset_changed),
    ("output-gain-focus", Wayfire::on_output_gain_focus),
];

pub struct Wayfire {
    transport: Rc<dyn WayfireTransport>,
    store: Rc<EntityStore>,
    placement: Option<Rc<dyn Placement>>,
    grid: RefCell<Grid>,
    focused_output: StdCell<Option<u64>>,
    link: StdCell<LinkState>,
    processing: StdCell<bool>,
    source_id: RefCell<Option<glib::SourceId>>,
}

impl Wayfire {
    pub fn new(
        transport: Rc<dyn WayfireTransport>,
        store: Rc<EntityStore>,
        placement: Option<Rc<dyn Placement>>,
    ) -> Rc<Self> {
        Rc::new(Self {
            transport,
            store,
            placement,
            grid: RefCell::new(Grid::default()),
            focused_output: StdCell::new(None),
            link: StdCell::new(LinkState::Disconnected),
            processing: StdCell::new(false),
            source_id: RefCell::new(None),
        })
    }

    pub fn probe(
        socket_override: Option<&str>,
        timeout: Duration,
        store: Rc<EntityStore>,
        contracts: &Contracts,
        placement: Option<Rc<dyn Placement>>,
    ) -> Result<Rc<Self>, ProbeError> {
        if contracts.is_complete() {
            return Err(ProbeError::AlreadyInstalled);
        }
        let path = match socket_override {
            Some(p) => PathBuf::from(p),
            None => env::var("WAYFIRE_SOCKET")
                .map(PathBuf::from)
                .map_err(|_| ProbeError::Unavailable("WAYFIRE_SOCKET not set"))?,
        };
        let socket = WayfireSocket::connect(&path, timeout)
            .map_err(|source| ProbeError::Connect { path, source })?;
        let socket = Rc::new(socket);
        let backend = Self::new(socket.clone(), store, placement);

        backend.link.set(LinkState::Probing);
        if !backend.seed() {
            backend.link.set(LinkState::Disconnected);
            return Err(ProbeError::SeedFailed("wayfire"));
        }
        backend.link.set(LinkState::Attached);

        if backend
            .transport
            .request("window-rules/events/watch", json!({ "events": WATCHED_EVENTS }))
            .is_none()
        {
            backend.link.set(LinkState::Disconnected);
            return Err(ProbeError::SeedFailed("wayfire"));
        }

        backend.install(contracts);
        backend.watch(socket);
        backend.store.trigger("wayfire_connected");
        Ok(backend)
    }

    fn install(self: &Rc<Self>, contracts: &Contracts) {
        if let Err(e) = contracts.try_install_window_actions(self.clone()) {
            debug!("Wayfire: {}", e);
        }
        if let Err(e) = contracts.try_install_workspace_actions(self.clone()) {
            debug!("Wayfire: {}", e);
        }
    }

    fn watch(self: &Rc<Self>, socket: Rc<WayfireSocket>) {
        let fd = socket.stream.as_raw_fd();
        let weak: Weak<Self> = Rc::downgrade(self);
        let source_id = glib::unix_fd_add_local(
            fd,
            glib::IOCondition::IN | glib::IOCondition::HUP | glib::IOCondition::ERR,
            move |_fd, _condition| {
                let Some(backend) = weak.upgrade() else {
                    return glib::ControlFlow::Break;
                };
                socket.pump();
                backend.process_events();
                if socket.is_closed() {
                    backend.on_disconnect();
                    return glib::ControlFlow::Break;
                }
                glib::ControlFlow::Continue
            },
        );
        *self.source_id.borrow_mut() = Some(source_id);
        // Events that raced the watch request.
        self.process_events();
        self.link.set(LinkState::Streaming);
    }

    fn on_disconnect(&self) {
        warn!("Wayfire socket closed");
        self.source_id.borrow_mut().take();
        self.link.set(LinkState::Disconnected);
        self.store.trigger("wayfire_disconnected");
    }

    /// Handle queued events until the queue is empty. Re-entrant calls
    /// return immediately; the outer loop picks their events up.
    pub fn process_events(&self) {
        if self.processing.replace(true) {
            return;
        }
        loop {
            let events = self.transport.take_events();
            if events.is_empty() {
                break;
            }
            for event in events {
                self.handle_event(&event);
            }
        }
        self.processing.set(false);
    }

    pub fn handle_event(&self, event: &Value) {
        let tag = str_field(event, "event");
        match EVENT_HANDLERS.iter().find(|(name, _)| *name == tag) {
            Some((_, handler)) => {
                trace!("Wayfire event {}", tag);
                handler(self, event);
            }
            None => trace!("Unhandled Wayfire event: {:?}", tag),
        }
    }

    fn request(&self, method: &str, data: Value) -> Option<Value> {
        self.transport.request(method, data)
    }

    /// A request whose reply carries nothing we need. Events it queued are
    /// handled before returning.
    fn command(&self, method: &str, data: Value) -> bool {
        let ok = self.request(method, data).is_some();
        self.process_events();
        ok
    }

    fn request_array(&self, method: &str) -> Option<Vec<Value>> {
        match self.request(method, json!({}))? {
            Value::Array(items) => Some(items),
            _ => {
                warn!("Wayfire {} reply is not an array", method);
                None
            }
        }
    }

    // ----- seeding -----

    pub fn seed(&self) -> bool {
        let (Some(outputs), Some(sets), Some(views)) = (
            self.request_array("window-rules/list-outputs"),
            self.request_array("window-rules/list-wsets"),
            self.request_array("window-rules/list-views"),
        ) else {
            return false;
        };

        for output in &outputs {
            self.apply_output(output);
        }
        for set in &sets {
            if let Some(set) = parse_set(set, None) {
                self.apply_set(set);
            }
        }
        if let Some(focused) = self.request("window-rules/get-focused-output", json!({}))
            && let Some(id) = focused.get("info").and_then(|info| u64_field(info, "id"))
        {
            self.focus_output(id);
        }
        for view in &views {
            self.apply_view(view);
        }
        if let Some(focused) = views.iter().find(|v| bool_field(v, "activated")) {
            self.store
                .set_focus(u64_field(focused, "id").map(WindowId::new));
        }
        debug!(
            "Wayfire seeded: {} windows, {} workspaces",
            self.store.windows().len(),
            self.store.workspaces().len()
        );
        true
    }

    fn apply_output(&self, v: &Value) {
        let Some(output) = parse_output(v) else {
            return;
        };
        let id = output.id;
        self.grid.borrow_mut().upsert_output(output);
        if let Some(set) = v.get("wset-index").and_then(|_| parse_set(v, Some(id))) {
            self.apply_set(set);
        }
    }

    fn apply_set(&self, set: OutputSet) {
        let index = set.index;
        let unbound = self.grid.borrow_mut().upsert_set(set);
        for other in unbound {
            self.sync_set(other);
        }
        self.sync_set(index);
    }

    /// Reflect one set's grid into the store: every cell exists, the
    /// active cell is visible while the set is on an output.
    fn sync_set(&self, index: u32) {
        let Some(set) = self.grid.borrow().set(index).cloned() else {
            return;
        };
        let output_name = set
            .output
            .and_then(|o| self.grid.borrow().output(o).map(|o| o.name.clone()));

        for cell in set.cells() {
            let id = workspace_id(index, cell);
            self.store.create_workspace(id, &set.workspace_name(cell));
            self.store.set_workspace_caps(id, WorkspaceCaps::CAN_ACTIVATE);
            self.store.set_workspace_output(id, output_name.as_deref());
            let visible = set.output.is_some() && cell == set.active;
            self.store
                .update_workspace_state(id, WorkspaceState::VISIBLE, visible);
        }

        if set.output.is_some() && set.output == self.focused_output.get() {
            self.store.set_workspace_focus(Some(set.active_workspace()));
        }
    }

    fn focus_output(&self, output: u64) {
        self.focused_output.set(Some(output));
        let active = self
            .grid
            .borrow()
            .set_for_output(output)
            .map(OutputSet::active_workspace);
        if let Some(ws) = active {
            self.store.set_workspace_focus(Some(ws));
        }
    }

    /// Reduce a full view object into the store. Returns the window id if
    /// the view is a tracked toplevel.
    fn apply_view(&self, v: &Value) -> Option<WindowId> {
        let raw = u64_field(v, "id")?;
        let id = WindowId::new(raw);
        let is_toplevel = str_field(v, "role") == "toplevel" || str_field(v, "type") == "toplevel";
        if !is_toplevel || !bool_field(v, "mapped") {
            self.forget_view(raw);
            return None;
        }

        self.store.create_window(id);
        self.store.set_title(id, str_field(v, "title"));
        self.store.set_app_id(id, str_field(v, "app-id"));
        self.store
            .set_pid(id, v.get("pid").and_then(|p| p.as_i64()).map(|p| p as i32));

        let tiled = u64_field(v, "tiled-edges").unwrap_or(0) & TILED_ALL == TILED_ALL;
        self.store
            .update_window_state(id, WindowState::MINIMIZED, bool_field(v, "minimized"));
        self.store
            .update_window_state(id, WindowState::FULLSCREEN, bool_field(v, "fullscreen"));
        self.store
            .update_window_state(id, WindowState::MAXIMIZED, tiled);
        self.store.set_floating(id, !tiled && !bool_field(v, "fullscreen"));

        let output = str_field(v, "output-name");
        if let Some(current) = self.store.window(id) {
            for stale in current.outputs.iter().filter(|o| o.as_str() != output) {
                self.store.window_output_leave(id, stale);
            }
        }
        if !output.is_empty() {
            self.store.window_output_enter(id, output);
        }

        let set = v.get("wset-index").and_then(|s| s.as_u64()).map(|s| s as u32);
        let workspace = match (set, rect_field(v, "geometry")) {
            (Some(set), Some(frame)) => self.grid.borrow_mut().place_view(raw, set, frame),
            _ => None,
        };
        self.store.set_workspace(id, workspace);
        Some(id)
    }

    fn forget_view(&self, raw: u64) {
        self.grid.borrow_mut().remove_view(raw);
        self.store.delete_window(WindowId::new(raw));
    }

    fn place(&self, id: WindowId) {
        let Some(placement) = &self.placement else {
            return;
        };
        let Some(view) = self.grid.borrow().view(id.raw()).copied() else {
            return;
        };
        let Some(workspace) = self.store.window(id).and_then(|w| w.workspace) else {
            return;
        };
        let frame = view.local_frame();
        let Some(target) = placement.compute_placement(id, frame) else {
            return;
        };
        if target == frame {
            return;
        }
        self.configure(id, workspace, (target.x, target.y), view.size);
    }

    /// Put `window` at cell-local `offset` on `workspace`.
    fn configure(&self, window: WindowId, workspace: WorkspaceId, offset: (i32, i32), size: (i32, i32)) -> bool {
        let Some((output, x, y)) = self.grid.borrow().origin_on(workspace, offset) else {
            warn!("Cannot place {} on workspace {}: not on screen", window, workspace);
            return false;
        };
        self.command(
            "window-rules/configure-view",
            json!({
                "id": window.raw(),
                "x": x,
                "y": y,
                "width": size.0,
                "height": size.1,
                "output_id": output,
            }),
        )
    }

    // ----- event handlers -----

    fn on_view_mapped(&self, event: &Value) {
        let Some(view) = event.get("view") else {
            return;
        };
        if let Some(id) = self.apply_view(view) {
            self.place(id);
        }
    }

    fn on_view_unmapped(&self, event: &Value) {
        if let Some(raw) = event.get("view").and_then(|v| u64_field(v, "id")) {
            self.forget_view(raw);
        }
    }

    fn on_view_changed(&self, event: &Value) {
        let Some(view) = event.get("view") else {
            return;
        };
        // Never resurrect a window from a late change event.
        match u64_field(view, "id") {
            Some(raw) if self.store.contains_window(WindowId::new(raw)) => {
                self.apply_view(view);
            }
            _ => {}
        }
    }

    fn on_view_focused(&self, event: &Value) {
        match event.get("view").filter(|v| !v.is_null()) {
            Some(view) => {
                let id = self.apply_view(view);
                self.store.set_focus(id);
            }
            None => self.store.set_focus(None),
        }
    }

    fn on_wset_workspace_changed(&self, event: &Value) {
        let Some(set) = u64_field(event, "wset").map(|s| s as u32) else {
            return;
        };
        let Some(cell) = cell_field(event, "new-workspace") else {
            return;
        };
        if self.grid.borrow_mut().set_active(set, cell).is_none() {
            // Unknown set: its data rides along with the event.
            if let Some(data) = event.get("wset-data").and_then(|d| parse_set(d, None)) {
                self.apply_set(data);
            }
            return;
        }
        self.sync_set(set);
    }

    fn on_output_added(&self, event: &Value) {
        if let Some(output) = event.get("output") {
            self.apply_output(output);
        }
    }

    fn on_output_removed(&self, event: &Value) {
        let Some(output) = event.get("output").and_then(|o| u64_field(o, "id")) else {
            return;
        };
        let name = self.grid.borrow().output(output).map(|o| o.name.clone());
        if let Some(name) = &name {
            for window in self.store.windows() {
                self.store.window_output_leave(window.id, name);
            }
        }
        let removed = self.grid.borrow_mut().remove_output(output);
        for set in &removed {
            for cell in set.cells() {
                self.store.delete_workspace(workspace_id(set.index, cell));
            }
        }
        if self.focused_output.get() == Some(output) {
            self.focused_output.set(None);
        }
        debug!("Wayfire output {} removed with {} sets", output, removed.len());
    }

    fn on_output_wset_changed(&self, event: &Value) {
        let (Some(output), Some(set)) = (
            u64_field(event, "output"),
            u64_field(event, "new-wset").map(|s| s as u32),
        ) else {
            return;
        };
        if let Some(data) = event.get("new-wset-data").and_then(|d| parse_set(d, Some(output))) {
            self.apply_set(data);
        }
        let unbound = self.grid.borrow_mut().bind(set, output);
        for other in unbound {
            self.sync_set(other);
        }
        self.sync_set(set);
    }

    fn on_output_gain_focus(&self, event: &Value) {
        if let Some(output) = event.get("output").and_then(|o| u64_field(o, "id")) {
            self.focus_output(output);
        }
    }
}

impl WindowActions for Wayfire {
    fn name(&self) -> &'static str {
        "wayfire"
    }

    fn minimize(&self, window: WindowId) {
        self.command(
            "wm-actions/set-minimized",
            json!({ "view_id": window.raw(), "state": true }),
        );
    }

    fn unminimize(&self, window: WindowId) {
        self.command(
            "wm-actions/set-minimized",
            json!({ "view_id": window.raw(), "state": false }),
        );
    }

    fn close(&self, window: WindowId) {
        self.command("window-rules/close-view", json!({ "id": window.raw() }));
    }

    fn focus(&self, window: WindowId) {
        self.command("window-rules/focus-view", json!({ "id": window.raw() }));
    }

    /// Keeps the view's offset inside its cell.
    fn move_to(&self, window: WindowId, workspace: WorkspaceId) {
        let Some(view) = self.grid.borrow().view(window.raw()).copied() else {
            warn!("Cannot move unknown view {}", window);
            return;
        };
        self.configure(window, workspace, view.offset, view.size);
    }

    fn supports_move(&self) -> bool {
        true
    }
}

impl WorkspaceActions for Wayfire {
    fn name(&self) -> &'static str {
        "wayfire"
    }

    fn activate(&self, workspace: WorkspaceId) {
        let (set, cell) = split_workspace_id(workspace);
        let Some(output) = self.grid.borrow().set(set).and_then(|s| s.output) else {
            warn!("Cannot activate workspace {}: set {} not on screen", workspace, set);
            return;
        };
        self.command(
            "vswitch/set-workspace",
            json!({ "x": cell.x, "y": cell.y, "output-id": output }),
        );
    }

    /// Cell-local layout built from cached view geometry.
    fn query_layout(&self, exclude: Option<WindowId>, workspace: WorkspaceId) -> Option<Layout> {
        let (set, _) = split_workspace_id(workspace);
        let grid = self.grid.borrow();
        let (w, h) = grid.cell_size(set)?;
        let focused = self.store.focused_window();

        let mut layout = Layout {
            container: Rect::new(0, 0, w, h),
            ..Layout::default()
        };
        for (raw, view) in grid.views_on(workspace) {
            let id = WindowId::new(raw);
            if Some(id) == exclude || !self.store.contains_window(id) {
                continue;
            }
            if Some(id) == focused {
                layout.focused = Some(layout.siblings.len());
            }
            layout.siblings.push(view.local_frame());
        }
        Some(layout)
    }

    fn belongs_to_output(&self, workspace: WorkspaceId, output: &str) -> bool {
        let (set, _) = split_workspace_id(workspace);
        let grid = self.grid.borrow();
        grid.set(set)
            .and_then(|s| s.output)
            .and_then(|o| grid.output(o))
            .is_some_and(|o| o.name == output)
    }
}

impl CompositorBackend for Wayfire {
    fn name(&self) -> &'static str {
        "wayfire"
    }

    fn link_state(&self) -> LinkState {
        self.link.get()
    }

    fn stop(&self) {
        if let Some(source_id) = self.source_id.borrow_mut().take() {
            source_id.remove();
        }
        self.link.set(LinkState::Disconnected);
        debug!("Wayfire backend stopped");
    }
}
