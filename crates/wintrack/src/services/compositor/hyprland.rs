//! Hyprland backend using its two IPC sockets.
//!
//! - `.socket.sock`: request/response. Every request opens a fresh
//!   connection, writes the command and reads until Hyprland closes it.
//!   JSON queries use the `j/` prefix (`j/clients`, `j/workspaces`, ...).
//! - `.socket2.sock`: push-only, newline-delimited `event>>payload` lines.
//!
//! The store is seeded from `j/monitors`, `j/workspaces` and `j/clients`
//! before the event socket is watched. Event handlers tolerate ids the store
//! has never seen.
//!
//! Reference: https://wiki.hyprland.org/IPC/

use std::cell::{Cell, RefCell};
use std::collections::HashSet;
use std::env;
use std::io::{ErrorKind, Read, Write};
use std::os::unix::io::AsRawFd;
use std::os::unix::net::UnixStream;
use std::path::PathBuf;
use std::rc::{Rc, Weak};
use std::time::Duration;

use serde_json::Value;
use tracing::{debug, error, trace, warn};
use wintrack_core::Rect;

use super::contracts::{Contracts, WindowActions, WorkspaceActions};
use super::placement::Placement;
use super::store::EntityStore;
use super::types::{
    Layout, LinkState, WindowId, WindowState, WorkspaceCaps, WorkspaceId, WorkspaceState,
};
use super::{CompositorBackend, ProbeError, Timeouts};

/// Hyprland's unnamed special workspace. Windows parked there are minimized.
const MINIMIZED_WORKSPACE_ID: i64 = -99;
const MINIMIZED_WORKSPACE_NAME: &str = "special";

/// Reject replies larger than this.
const MAX_REPLY: u64 = 16 * 1024 * 1024;

/// Locate the socket directory for an instance signature.
///
/// Hyprland 0.40+ uses `$XDG_RUNTIME_DIR/hypr/<sig>`, older releases
/// `/tmp/hypr/<sig>`.
pub fn socket_dir(signature: &str) -> Option<PathBuf> {
    let mut candidates = Vec::new();
    if let Ok(runtime) = env::var("XDG_RUNTIME_DIR") {
        candidates.push(PathBuf::from(runtime).join("hypr").join(signature));
    }
    candidates.push(PathBuf::from("/tmp/hypr").join(signature));
    candidates
        .into_iter()
        .find(|dir| dir.join(".socket.sock").exists())
}

/// Request/response channel to the compositor.
pub trait HyprTransport {
    /// Send one request and return the raw reply, `None` on any failure.
    fn send(&self, request: &str) -> Option<String>;

    /// Like [`send`](Self::send), for lookups that may give up sooner.
    fn lookup(&self, request: &str) -> Option<String> {
        self.send(request)
    }
}

/// The real `.socket.sock` transport.
pub struct HyprSocket {
    dir: PathBuf,
    timeouts: Timeouts,
}

impl HyprSocket {
    pub fn new(dir: PathBuf, timeouts: Timeouts) -> Self {
        Self { dir, timeouts }
    }

    pub fn control_path(&self) -> PathBuf {
        self.dir.join(".socket.sock")
    }

    pub fn event_path(&self) -> PathBuf {
        self.dir.join(".socket2.sock")
    }

    fn roundtrip(&self, request: &str, timeout: Duration) -> Option<String> {
        let path = self.control_path();
        let mut stream = match UnixStream::connect(&path) {
            Ok(s) => s,
            Err(e) => {
                warn!("Failed to connect to Hyprland socket {:?}: {}", path, e);
                return None;
            }
        };
        let _ = stream.set_read_timeout(Some(timeout));
        let _ = stream.set_write_timeout(Some(timeout));

        if let Err(e) = stream.write_all(request.as_bytes()) {
            warn!("Failed to send Hyprland request {:?}: {}", request, e);
            return None;
        }

        let mut reply = String::new();
        match stream.take(MAX_REPLY).read_to_string(&mut reply) {
            Ok(_) => Some(reply),
            Err(e) => {
                warn!("Failed to read Hyprland reply to {:?}: {}", request, e);
                None
            }
        }
    }
}

impl HyprTransport for HyprSocket {
    fn send(&self, request: &str) -> Option<String> {
        self.roundtrip(request, self.timeouts.request)
    }

    fn lookup(&self, request: &str) -> Option<String> {
        self.roundtrip(request, self.timeouts.lookup)
    }
}

fn decode(what: &str, reply: &str) -> Option<Value> {
    match serde_json::from_str(reply) {
        Ok(v) => Some(v),
        Err(e) => {
            trace!("Unparseable Hyprland reply to {}: {}", what, e);
            None
        }
    }
}

fn array_reply(what: &str, value: Value) -> Option<Vec<Value>> {
    match value {
        Value::Array(items) => Some(items),
        _ => {
            warn!("Hyprland {} reply is not an array", what);
            None
        }
    }
}

/// Parse a window address, with or without the `0x` prefix.
pub fn parse_address(s: &str) -> Option<WindowId> {
    let s = s.trim();
    let hex = s
        .strip_prefix("0x")
        .or_else(|| s.strip_prefix("0X"))
        .unwrap_or(s);
    if hex.is_empty() {
        return None;
    }
    u64::from_str_radix(hex, 16).ok().map(WindowId::new)
}

/// The `address:0x..` selector Hyprland dispatchers expect.
fn selector(window: WindowId) -> String {
    format!("address:0x{:x}", window.raw())
}

fn str_field<'a>(v: &'a Value, key: &str) -> &'a str {
    v.get(key).and_then(|v| v.as_str()).unwrap_or("")
}

fn int_field(v: &Value, key: &str) -> Option<i64> {
    v.get(key).and_then(|v| v.as_i64())
}

fn pair(v: &Value, key: &str) -> Option<(i32, i32)> {
    let arr = v.get(key)?.as_array()?;
    Some((arr.first()?.as_i64()? as i32, arr.get(1)?.as_i64()? as i32))
}

fn client_rect(client: &Value) -> Option<Rect> {
    let (x, y) = pair(client, "at")?;
    let (w, h) = pair(client, "size")?;
    Some(Rect::new(x, y, w, h))
}

fn monitor_rect(monitor: &Value) -> Option<Rect> {
    let scale = monitor
        .get("scale")
        .and_then(|v| v.as_f64())
        .filter(|s| *s > 0.0)
        .unwrap_or(1.0);
    Some(Rect::new(
        int_field(monitor, "x")? as i32,
        int_field(monitor, "y")? as i32,
        (int_field(monitor, "width")? as f64 / scale).round() as i32,
        (int_field(monitor, "height")? as f64 / scale).round() as i32,
    ))
}

/// Hyprland reports `fullscreen` as a bool (old) or a mode (0.42+:
/// 1 = maximized, 2 = fullscreen, 3 = both).
fn fullscreen_state(client: &Value) -> WindowState {
    match client.get("fullscreen") {
        Some(Value::Bool(true)) => WindowState::FULLSCREEN,
        Some(Value::Number(n)) => match n.as_i64().unwrap_or(0) {
            1 => WindowState::MAXIMIZED,
            2 => WindowState::FULLSCREEN,
            3 => WindowState::MAXIMIZED | WindowState::FULLSCREEN,
            _ => WindowState::empty(),
        },
        _ => WindowState::empty(),
    }
}

type EventHandler = fn(&Hyprland, &str);

/// Event tag → handler. `v1` tags that have a `v2` successor are ignored
/// once the `v2` form has been seen.
const EVENT_HANDLERS: &[(&str, EventHandler)] = &[
    ("openwindow", Hyprland::on_open_window),
    ("closewindow", Hyprland::on_close_window),
    ("activewindow", Hyprland::on_active_window),
    ("activewindowv2", Hyprland::on_active_window_v2),
    ("windowtitle", Hyprland::on_window_title),
    ("windowtitlev2", Hyprland::on_window_title_v2),
    ("movewindow", Hyprland::on_move_window),
    ("movewindowv2", Hyprland::on_move_window_v2),
    ("changefloatingmode", Hyprland::on_floating_mode),
    ("fullscreen", Hyprland::on_fullscreen),
    ("minimized", Hyprland::on_minimized),
    ("urgent", Hyprland::on_urgent),
    ("workspace", Hyprland::on_workspace),
    ("workspacev2", Hyprland::on_workspace_v2),
    ("focusedmon", Hyprland::on_focused_monitor),
    ("createworkspace", Hyprland::on_create_workspace),
    ("createworkspacev2", Hyprland::on_create_workspace_v2),
    ("destroyworkspace", Hyprland::on_destroy_workspace),
    ("destroyworkspacev2", Hyprland::on_destroy_workspace_v2),
    ("moveworkspacev2", Hyprland::on_move_workspace_v2),
    ("renameworkspace", Hyprland::on_rename_workspace),
    ("monitoradded", Hyprland::on_monitors_changed),
    ("monitorremoved", Hyprland::on_monitors_changed),
];

const V1_SUPERSEDED: &[(&str, &str)] = &[
    ("windowtitle", "windowtitlev2"),
    ("movewindow", "movewindowv2"),
    ("workspace", "workspacev2"),
    ("createworkspace", "createworkspacev2"),
    ("destroyworkspace", "destroyworkspacev2"),
];

pub struct Hyprland {
    transport: Rc<dyn HyprTransport>,
    store: Rc<EntityStore>,
    placement: Option<Rc<dyn Placement>>,
    link: Cell<LinkState>,
    /// `activewindow>>class,title` waiting for its `activewindowv2`.
    pending_active: RefCell<Option<(String, String)>>,
    seen_v2: RefCell<HashSet<&'static str>>,
    partial_line: RefCell<Vec<u8>>,
    source_id: RefCell<Option<glib::SourceId>>,
}

impl Hyprland {
    pub fn new(
        transport: Rc<dyn HyprTransport>,
        store: Rc<EntityStore>,
        placement: Option<Rc<dyn Placement>>,
    ) -> Rc<Self> {
        Rc::new(Self {
            transport,
            store,
            placement,
            link: Cell::new(LinkState::Disconnected),
            pending_active: RefCell::new(None),
            seen_v2: RefCell::new(HashSet::new()),
            partial_line: RefCell::new(Vec::new()),
            source_id: RefCell::new(None),
        })
    }

    /// Probe, seed, install both contracts and start watching events.
    pub fn probe(
        signature: Option<&str>,
        timeouts: Timeouts,
        store: Rc<EntityStore>,
        contracts: &Contracts,
        placement: Option<Rc<dyn Placement>>,
    ) -> Result<Rc<Self>, ProbeError> {
        if contracts.is_complete() {
            return Err(ProbeError::AlreadyInstalled);
        }

        let signature = match signature {
            Some(s) => s.to_string(),
            None => env::var("HYPRLAND_INSTANCE_SIGNATURE")
                .map_err(|_| ProbeError::Unavailable("HYPRLAND_INSTANCE_SIGNATURE not set"))?,
        };
        let dir = socket_dir(&signature).ok_or(ProbeError::Unavailable("Hyprland socket missing"))?;

        let socket = HyprSocket::new(dir, timeouts);
        let event_path = socket.event_path();
        let backend = Self::new(Rc::new(socket), store, placement);

        backend.link.set(LinkState::Probing);
        if !backend.seed() {
            backend.link.set(LinkState::Disconnected);
            return Err(ProbeError::SeedFailed("hyprland"));
        }
        backend.link.set(LinkState::Attached);

        let stream = UnixStream::connect(&event_path).map_err(|e| ProbeError::Connect {
            path: event_path.clone(),
            source: e,
        })?;
        backend.install(contracts);
        backend.watch(stream)?;
        backend.store.trigger("hyprland_connected");
        Ok(backend)
    }

    fn install(self: &Rc<Self>, contracts: &Contracts) {
        if let Err(e) = contracts.try_install_window_actions(self.clone()) {
            debug!("Hyprland: {}", e);
        }
        if let Err(e) = contracts.try_install_workspace_actions(self.clone()) {
            debug!("Hyprland: {}", e);
        }
    }

    fn watch(self: &Rc<Self>, mut stream: UnixStream) -> Result<(), ProbeError> {
        stream
            .set_nonblocking(true)
            .map_err(|e| ProbeError::Connect {
                path: PathBuf::from(".socket2.sock"),
                source: e,
            })?;

        let fd = stream.as_raw_fd();
        let weak: Weak<Self> = Rc::downgrade(self);
        let source_id = glib::unix_fd_add_local(
            fd,
            glib::IOCondition::IN | glib::IOCondition::HUP | glib::IOCondition::ERR,
            move |_fd, _condition| {
                let Some(backend) = weak.upgrade() else {
                    return glib::ControlFlow::Break;
                };
                let mut buf = [0u8; 4096];
                loop {
                    match stream.read(&mut buf) {
                        Ok(0) => {
                            backend.on_disconnect();
                            return glib::ControlFlow::Break;
                        }
                        Ok(n) => backend.feed(&buf[..n]),
                        Err(e) if e.kind() == ErrorKind::WouldBlock => break,
                        Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                        Err(e) => {
                            error!("Error reading Hyprland events: {}", e);
                            backend.on_disconnect();
                            return glib::ControlFlow::Break;
                        }
                    }
                }
                glib::ControlFlow::Continue
            },
        );
        *self.source_id.borrow_mut() = Some(source_id);
        self.link.set(LinkState::Streaming);
        Ok(())
    }

    // Entities stay in the store: the compositor is gone and nothing
    // will refresh them, but consumers keep their last known view.
    fn on_disconnect(&self) {
        warn!("Hyprland event socket closed");
        self.source_id.borrow_mut().take();
        self.link.set(LinkState::Disconnected);
        self.store.trigger("hyprland_disconnected");
    }

    /// Feed raw bytes from the event socket; complete lines are handled.
    pub fn feed(&self, bytes: &[u8]) {
        let lines: Vec<String> = {
            let mut partial = self.partial_line.borrow_mut();
            partial.extend_from_slice(bytes);
            // Decode whole lines only; a read may end inside a UTF-8 sequence.
            let Some(last_newline) = partial.iter().rposition(|&b| b == b'\n') else {
                return;
            };
            let rest = partial.split_off(last_newline + 1);
            let complete = std::mem::replace(&mut *partial, rest);
            complete
                .split(|&b| b == b'\n')
                .filter(|line| !line.is_empty())
                .map(|line| String::from_utf8_lossy(line).into_owned())
                .collect()
        };
        for line in lines {
            self.handle_line(&line);
        }
    }

    /// Dispatch one `event>>payload` line.
    pub fn handle_line(&self, line: &str) {
        let Some((tag, payload)) = line.trim_end_matches('\r').split_once(">>") else {
            trace!("Malformed Hyprland event: {:?}", line);
            return;
        };

        if let Some((_, v2)) = V1_SUPERSEDED.iter().find(|(v1, _)| *v1 == tag)
            && self.seen_v2.borrow().contains(v2)
        {
            return;
        }
        if let Some((_, v2)) = V1_SUPERSEDED.iter().find(|(_, v2)| *v2 == tag) {
            self.seen_v2.borrow_mut().insert(*v2);
        }

        match EVENT_HANDLERS.iter().find(|(name, _)| *name == tag) {
            Some((_, handler)) => {
                trace!("Hyprland event {}: {}", tag, payload);
                handler(self, payload);
            }
            None => trace!("Unhandled Hyprland event: {}", tag),
        }
    }

    fn query(&self, what: &str) -> Option<Value> {
        decode(what, &self.transport.send(&format!("j/{}", what))?)
    }

    fn query_array(&self, what: &str) -> Option<Vec<Value>> {
        array_reply(what, self.query(what)?)
    }

    fn lookup_array(&self, what: &str) -> Option<Vec<Value>> {
        array_reply(what, decode(what, &self.transport.lookup(&format!("j/{}", what))?)?)
    }

    fn dispatch(&self, args: &str) -> bool {
        match self.transport.send(&format!("dispatch {}", args)) {
            Some(reply) if reply.trim() == "ok" => true,
            Some(reply) => {
                warn!("Hyprland rejected dispatch {:?}: {}", args, reply.trim());
                false
            }
            None => {
                warn!("Hyprland dispatch {:?} failed", args);
                false
            }
        }
    }

    // ----- seeding -----

    /// Full enumeration. Returns `false` if any enumeration query failed.
    pub fn seed(&self) -> bool {
        let (Some(monitors), Some(workspaces), Some(clients)) = (
            self.query_array("monitors"),
            self.query_array("workspaces"),
            self.query_array("clients"),
        ) else {
            return false;
        };

        for ws in &workspaces {
            self.apply_workspace(ws);
        }
        self.apply_monitors(&monitors);
        for client in &clients {
            self.apply_client(client);
        }

        if let Some(active) = self.query("activewindow") {
            let focus = parse_address(str_field(&active, "address"));
            self.store.set_focus(focus);
        }
        if let Some(active) = self.query("activeworkspace")
            && let Some(id) = int_field(&active, "id")
        {
            self.focus_workspace(WorkspaceId::new(id));
        }
        debug!(
            "Hyprland seeded: {} windows, {} workspaces",
            self.store.windows().len(),
            self.store.workspaces().len()
        );
        true
    }

    fn apply_workspace(&self, ws: &Value) {
        let Some(id) = int_field(ws, "id") else {
            return;
        };
        if id < 0 {
            return;
        }
        let id = WorkspaceId::new(id);
        let name = str_field(ws, "name");
        self.store.create_workspace(id, name);
        self.store.set_workspace_name(id, name);
        self.store.set_workspace_caps(id, WorkspaceCaps::CAN_ACTIVATE);
        let monitor = str_field(ws, "monitor");
        if !monitor.is_empty() {
            self.store.set_workspace_output(id, Some(monitor));
        }
    }

    /// Visible = active on some monitor. Focus is left to the push events.
    fn apply_monitors(&self, monitors: &[Value]) {
        let visible: HashSet<i64> = monitors
            .iter()
            .filter_map(|m| m.get("activeWorkspace").and_then(|ws| int_field(ws, "id")))
            .collect();

        for ws in self.store.workspaces() {
            self.store.update_workspace_state(
                ws.id,
                WorkspaceState::VISIBLE,
                visible.contains(&ws.id.raw()),
            );
        }
    }

    fn refresh_visibility(&self) {
        if let Some(monitors) = self.query_array("monitors") {
            self.apply_monitors(&monitors);
        }
    }

    fn apply_client(&self, client: &Value) -> Option<WindowId> {
        let id = parse_address(str_field(client, "address"))?;
        if client.get("mapped").and_then(|v| v.as_bool()) == Some(false) {
            return None;
        }
        self.store.create_window(id);
        self.store.set_title(id, str_field(client, "title"));
        let class = match str_field(client, "class") {
            "" => str_field(client, "initialClass"),
            class => class,
        };
        self.store.set_app_id(id, class);
        self.store
            .set_pid(id, int_field(client, "pid").map(|p| p as i32));
        self.store.set_floating(
            id,
            client
                .get("floating")
                .and_then(|v| v.as_bool())
                .unwrap_or(false),
        );
        self.apply_screen_mode(id, fullscreen_state(client));

        if let Some(ws) = client.get("workspace").and_then(|ws| int_field(ws, "id")) {
            self.assign_workspace(id, ws);
        }
        Some(id)
    }

    /// Apply a workspace assignment, mapping the sentinel to `MINIMIZED`.
    fn assign_workspace(&self, window: WindowId, workspace: i64) {
        if workspace == MINIMIZED_WORKSPACE_ID {
            self.store
                .update_window_state(window, WindowState::MINIMIZED, true);
            return;
        }
        self.store
            .update_window_state(window, WindowState::MINIMIZED, false);
        let target = (workspace >= 0).then_some(WorkspaceId::new(workspace));
        self.store.set_workspace(window, target);
    }

    fn focus_workspace(&self, id: WorkspaceId) {
        if !self.store.contains_workspace(id) {
            return;
        }
        self.store.set_workspace_focus(Some(id));
        self.store
            .update_workspace_state(id, WorkspaceState::URGENT, false);
    }

    fn find_client(&self, window: WindowId) -> Option<Value> {
        self.query_array("clients")?
            .into_iter()
            .find(|c| parse_address(str_field(c, "address")) == Some(window))
    }

    fn place(&self, window: WindowId, client: &Value) {
        let Some(placement) = &self.placement else {
            return;
        };
        if client.get("floating").and_then(|v| v.as_bool()) != Some(true) {
            return;
        }
        let Some(frame) = client_rect(client) else {
            return;
        };
        let Some(target) = placement.compute_placement(window, frame) else {
            return;
        };
        if target.x == frame.x && target.y == frame.y {
            return;
        }
        self.dispatch(&format!(
            "movewindowpixel exact {} {},{}",
            target.x,
            target.y,
            selector(window)
        ));
    }

    // ----- event handlers -----

    fn on_open_window(&self, payload: &str) {
        let mut parts = payload.splitn(4, ',');
        let (Some(address), Some(ws_name), Some(class), title) =
            (parts.next(), parts.next(), parts.next(), parts.next())
        else {
            return;
        };
        let Some(id) = parse_address(address) else {
            return;
        };

        self.store.create_window(id);
        self.store.set_app_id(id, class);
        self.store.set_title(id, title.unwrap_or(""));
        self.on_window_workspace_name(id, ws_name);

        if let Some(client) = self.find_client(id) {
            self.apply_client(&client);
            self.place(id, &client);
        }
    }

    fn on_close_window(&self, payload: &str) {
        if let Some(id) = parse_address(payload) {
            self.store.delete_window(id);
        }
    }

    fn on_active_window(&self, payload: &str) {
        let (class, title) = payload.split_once(',').unwrap_or((payload, ""));
        *self.pending_active.borrow_mut() = Some((class.to_string(), title.to_string()));
    }

    fn on_active_window_v2(&self, payload: &str) {
        let pending = self.pending_active.borrow_mut().take();
        let Some(id) = parse_address(payload) else {
            self.store.set_focus(None);
            return;
        };
        // The push payload carries a fresher title than the last query.
        if let Some((class, title)) = pending {
            if !class.is_empty() {
                self.store.set_app_id(id, &class);
            }
            self.store.set_title(id, &title);
        }
        self.store.set_focus(Some(id));
    }

    fn on_window_title(&self, payload: &str) {
        let Some(id) = parse_address(payload) else {
            return;
        };
        if !self.store.contains_window(id) {
            return;
        }
        if let Some(client) = self.find_client(id) {
            self.store.set_title(id, str_field(&client, "title"));
        }
    }

    fn on_window_title_v2(&self, payload: &str) {
        let (address, title) = payload.split_once(',').unwrap_or((payload, ""));
        if let Some(id) = parse_address(address) {
            self.store.set_title(id, title);
        }
    }

    fn on_window_workspace_name(&self, window: WindowId, ws_name: &str) {
        if ws_name == MINIMIZED_WORKSPACE_NAME {
            self.assign_workspace(window, MINIMIZED_WORKSPACE_ID);
        } else if let Some(ws) = self.store.workspace_by_name(ws_name) {
            self.assign_workspace(window, ws.id.raw());
        }
    }

    fn on_move_window(&self, payload: &str) {
        let Some((address, ws_name)) = payload.split_once(',') else {
            return;
        };
        if let Some(id) = parse_address(address) {
            self.on_window_workspace_name(id, ws_name);
        }
    }

    fn on_move_window_v2(&self, payload: &str) {
        let mut parts = payload.splitn(3, ',');
        let (Some(address), Some(ws_id)) = (parts.next(), parts.next()) else {
            return;
        };
        if let (Some(id), Ok(ws)) = (parse_address(address), ws_id.parse::<i64>()) {
            self.assign_workspace(id, ws);
        }
    }

    fn on_floating_mode(&self, payload: &str) {
        let Some((address, floating)) = payload.split_once(',') else {
            return;
        };
        if let Some(id) = parse_address(address) {
            self.store.set_floating(id, floating.trim() == "1");
        }
    }

    /// `fullscreen>>` only says on/off for the focused window; the mode
    /// (maximized, fullscreen or both) is read back from the client.
    fn on_fullscreen(&self, payload: &str) {
        let Some(id) = self.store.focused_window() else {
            return;
        };
        let screen = match self.find_client(id) {
            Some(client) => fullscreen_state(&client),
            None if payload.trim() == "1" => WindowState::FULLSCREEN,
            None => WindowState::empty(),
        };
        self.apply_screen_mode(id, screen);
    }

    fn apply_screen_mode(&self, window: WindowId, screen: WindowState) {
        for bit in [WindowState::MAXIMIZED, WindowState::FULLSCREEN] {
            self.store
                .update_window_state(window, bit, screen.contains(bit));
        }
    }

    /// A client asked to be (un)minimized; Hyprland leaves that to us.
    fn on_minimized(&self, payload: &str) {
        let Some((address, state)) = payload.split_once(',') else {
            return;
        };
        let Some(id) = parse_address(address) else {
            return;
        };
        if state.trim() == "1" {
            self.minimize(id);
        } else {
            self.unminimize(id);
        }
    }

    fn on_urgent(&self, payload: &str) {
        let Some(ws) = parse_address(payload)
            .and_then(|id| self.store.window(id))
            .and_then(|w| w.workspace)
        else {
            return;
        };
        if self.store.focused_workspace() != Some(ws) {
            self.store
                .update_workspace_state(ws, WorkspaceState::URGENT, true);
        }
    }

    fn on_workspace(&self, payload: &str) {
        if let Some(ws) = self.store.workspace_by_name(payload) {
            self.focus_workspace(ws.id);
        }
        self.refresh_visibility();
    }

    fn on_workspace_v2(&self, payload: &str) {
        let Some((id, name)) = parse_id_name(payload) else {
            return;
        };
        if id.raw() >= 0 {
            // The focus event can overtake createworkspacev2.
            self.store.create_workspace(id, name);
            self.store.set_workspace_caps(id, WorkspaceCaps::CAN_ACTIVATE);
            self.focus_workspace(id);
        }
        self.refresh_visibility();
    }

    fn on_focused_monitor(&self, payload: &str) {
        if let Some((_, ws_name)) = payload.split_once(',')
            && let Some(ws) = self.store.workspace_by_name(ws_name)
        {
            self.focus_workspace(ws.id);
        }
        self.refresh_visibility();
    }

    fn on_create_workspace(&self, payload: &str) {
        if self.store.workspace_by_name(payload).is_some() {
            return;
        }
        if let Some(workspaces) = self.query_array("workspaces") {
            for ws in workspaces.iter().filter(|ws| str_field(ws, "name") == payload) {
                self.apply_workspace(ws);
            }
        }
    }

    fn on_create_workspace_v2(&self, payload: &str) {
        let Some((id, name)) = parse_id_name(payload) else {
            return;
        };
        if id.raw() < 0 {
            return;
        }
        self.store.create_workspace(id, name);
        self.store.set_workspace_caps(id, WorkspaceCaps::CAN_ACTIVATE);
    }

    fn on_destroy_workspace(&self, payload: &str) {
        if let Some(ws) = self.store.workspace_by_name(payload) {
            self.store.workspace_unref(ws.id);
        }
    }

    fn on_destroy_workspace_v2(&self, payload: &str) {
        if let Some((id, _)) = parse_id_name(payload) {
            self.store.workspace_unref(id);
        }
    }

    fn on_move_workspace_v2(&self, payload: &str) {
        let mut parts = payload.splitn(3, ',');
        let (Some(id), Some(_name), Some(monitor)) = (parts.next(), parts.next(), parts.next())
        else {
            return;
        };
        if let Ok(id) = id.parse::<i64>() {
            self.store
                .set_workspace_output(WorkspaceId::new(id), Some(monitor));
        }
        self.refresh_visibility();
    }

    fn on_rename_workspace(&self, payload: &str) {
        if let Some((id, name)) = parse_id_name(payload) {
            self.store.set_workspace_name(id, name);
        }
    }

    fn on_monitors_changed(&self, _payload: &str) {
        self.refresh_visibility();
    }

    fn workspace_selector(&self, workspace: WorkspaceId) -> String {
        match self.store.workspace(workspace) {
            Some(ws) if !ws.name.is_empty() => format!("name:{}", ws.name),
            _ => workspace.raw().to_string(),
        }
    }
}

fn parse_id_name(payload: &str) -> Option<(WorkspaceId, &str)> {
    let (id, name) = payload.split_once(',')?;
    Some((WorkspaceId::new(id.trim().parse().ok()?), name))
}

impl WindowActions for Hyprland {
    fn name(&self) -> &'static str {
        "hyprland"
    }

    fn minimize(&self, window: WindowId) {
        self.dispatch(&format!(
            "movetoworkspacesilent {},{}",
            MINIMIZED_WORKSPACE_NAME,
            selector(window)
        ));
    }

    fn unminimize(&self, window: WindowId) {
        let Some(target) = self.store.focused_workspace() else {
            warn!("Cannot unminimize {}: no focused workspace", window);
            return;
        };
        if self.dispatch(&format!(
            "movetoworkspacesilent {},{}",
            self.workspace_selector(target),
            selector(window)
        )) {
            self.dispatch(&format!("focuswindow {}", selector(window)));
        }
    }

    fn maximize(&self, window: WindowId) {
        let Some(current) = self.store.window(window) else {
            return;
        };
        if current.state.contains(WindowState::MAXIMIZED) {
            return;
        }
        if self.dispatch(&format!("focuswindow {}", selector(window))) {
            self.dispatch("fullscreen 1");
        }
    }

    fn unmaximize(&self, window: WindowId) {
        let Some(current) = self.store.window(window) else {
            return;
        };
        if !current.state.contains(WindowState::MAXIMIZED) {
            return;
        }
        if self.dispatch(&format!("focuswindow {}", selector(window))) {
            self.dispatch("fullscreen 1");
        }
    }

    fn close(&self, window: WindowId) {
        self.dispatch(&format!("closewindow {}", selector(window)));
    }

    fn focus(&self, window: WindowId) {
        self.dispatch(&format!("focuswindow {}", selector(window)));
    }

    fn move_to(&self, window: WindowId, workspace: WorkspaceId) {
        self.dispatch(&format!(
            "movetoworkspacesilent {},{}",
            self.workspace_selector(workspace),
            selector(window)
        ));
    }

    fn supports_move(&self) -> bool {
        true
    }
}

impl WorkspaceActions for Hyprland {
    fn name(&self) -> &'static str {
        "hyprland"
    }

    fn activate(&self, workspace: WorkspaceId) {
        self.dispatch(&format!("workspace {}", self.workspace_selector(workspace)));
    }

    /// Live lookup: monitors can be resized, so nothing here is cached.
    fn query_layout(&self, exclude: Option<WindowId>, workspace: WorkspaceId) -> Option<Layout> {
        let workspaces = self.lookup_array("workspaces")?;
        let monitor_name = workspaces
            .iter()
            .find(|ws| int_field(ws, "id") == Some(workspace.raw()))
            .map(|ws| str_field(ws, "monitor").to_string())?;
        let container = self
            .query_array("monitors")?
            .iter()
            .find(|m| str_field(m, "name") == monitor_name)
            .and_then(monitor_rect)?;

        let focused = self.store.focused_window();
        let mut layout = Layout {
            container,
            ..Layout::default()
        };
        for client in self.lookup_array("clients")? {
            let on_workspace = client
                .get("workspace")
                .and_then(|ws| int_field(ws, "id"))
                == Some(workspace.raw());
            let id = parse_address(str_field(&client, "address"));
            if !on_workspace || id.is_none() || id == exclude {
                continue;
            }
            let Some(rect) = client_rect(&client) else {
                continue;
            };
            if id == focused {
                layout.focused = Some(layout.siblings.len());
            }
            layout.siblings.push(rect);
        }
        Some(layout)
    }

    fn belongs_to_output(&self, workspace: WorkspaceId, output: &str) -> bool {
        self.store
            .workspace(workspace)
            .is_some_and(|ws| ws.output.as_deref().is_none_or(|o| o == output))
    }
}

impl CompositorBackend for Hyprland {
    fn name(&self) -> &'static str {
        "hyprland"
    }

    fn link_state(&self) -> LinkState {
        self.link.get()
    }

    fn stop(&self) {
        if let Some(source_id) = self.source_id.borrow_mut().take() {
            source_id.remove();
        }
        self.link.set(LinkState::Disconnected);
        debug!("Hyprland backend stopped");
    }
}
