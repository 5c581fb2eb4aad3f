//! Window and workspace tracking for Wayland compositors.
//!
//! All state lives in a single [`EntityStore`](services::compositor::EntityStore)
//! owned by the glib main loop; backends feed it and consumers act through
//! [`Contracts`](services::compositor::Contracts).

pub mod services;

pub use services::callbacks::{Callbacks, SubscriptionId};
pub use services::compositor::{
    CompositorBackend, Contracts, EntityStore, ProbeError, probe_backends,
};
