//! Compositor-agnostic window and workspace tracking.
//!
//! Backends translate compositor state into the shared [`EntityStore`] and
//! install themselves as providers of the [`Contracts`] action slots:
//! - Hyprland (socket IPC, line events)
//! - Wayfire (`ipc-rules` socket, length-prefixed JSON)
//! - Wayland protocols (wlr-foreign-toplevel, ext-workspace)
//!
//! # Usage
//!
//! Build a store and a contract set, then hand both to [`probe_backends`].
//! Consumers subscribe to the store and call actions through the contracts.

mod contracts;
mod factory;
mod hyprland;
mod placement;
mod store;
pub mod types;
mod wayfire;
mod wayland;

use std::io;
use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;
use wintrack_core::CompositorConfig;

pub use contracts::{ContractError, Contracts, WindowActions, WorkspaceActions};
pub use factory::{ProbeStep, probe_backends, probe_plan};
pub use hyprland::Hyprland;
pub use placement::{CascadePlacement, Placement, cascade};
pub use store::EntityStore;
pub use types::*;
pub use wayfire::Wayfire;
pub use wayland::WaylandBackend;

/// Why a backend did not attach.
#[derive(Debug, Error)]
pub enum ProbeError {
    #[error("backend unavailable: {0}")]
    Unavailable(&'static str),

    #[error("compositor does not advertise {0}")]
    ProtocolMissing(&'static str),

    #[error("failed to connect to {path:?}")]
    Connect {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("initial {0} enumeration failed")]
    SeedFailed(&'static str),

    #[error("all action contracts are already provided")]
    AlreadyInstalled,
}

/// Request timeouts for socket backends.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Timeouts {
    /// Control calls and seeding.
    pub request: Duration,
    /// Best-effort lookups made from inside event handlers.
    pub lookup: Duration,
}

impl Timeouts {
    pub fn from_config(config: &CompositorConfig) -> Self {
        Self {
            request: Duration::from_millis(config.request_timeout_ms),
            lookup: Duration::from_millis(config.lookup_timeout_ms),
        }
    }
}

impl Default for Timeouts {
    fn default() -> Self {
        Self::from_config(&CompositorConfig::default())
    }
}

/// A running backend.
pub trait CompositorBackend {
    /// Short name for logs and triggers.
    fn name(&self) -> &'static str;

    fn link_state(&self) -> LinkState;

    /// Stop watching the compositor. Store contents are left as they are.
    fn stop(&self);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_timeouts_from_config() {
        let config = CompositorConfig {
            request_timeout_ms: 1500,
            lookup_timeout_ms: 200,
            ..CompositorConfig::default()
        };
        let timeouts = Timeouts::from_config(&config);
        assert_eq!(timeouts.request, Duration::from_millis(1500));
        assert_eq!(timeouts.lookup, Duration::from_millis(200));
    }

    #[test]
    fn test_probe_error_messages() {
        let err = ProbeError::Connect {
            path: PathBuf::from("/run/user/1000/wayfire.sock"),
            source: io::Error::from(io::ErrorKind::ConnectionRefused),
        };
        assert!(err.to_string().contains("wayfire.sock"));
        assert!(std::error::Error::source(&err).is_some());
        assert_eq!(
            ProbeError::SeedFailed("hyprland").to_string(),
            "initial hyprland enumeration failed"
        );
    }
}
