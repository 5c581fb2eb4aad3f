//! Backend probing.
//!
//! Backends are tried in priority order. Each one installs into whichever
//! contract slots are still free, so probing stops as soon as both slots
//! are provided.

use std::rc::Rc;

use tracing::{debug, info, warn};
use wintrack_core::{BackendChoice, CompositorConfig};

use super::contracts::Contracts;
use super::placement::Placement;
use super::store::EntityStore;
use super::{CompositorBackend, Hyprland, ProbeError, Timeouts, Wayfire, WaylandBackend};

/// One attempt in the probe sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProbeStep {
    Hyprland,
    Wayfire,
    Wayland,
}

impl ProbeStep {
    pub fn name(self) -> &'static str {
        match self {
            ProbeStep::Hyprland => "hyprland",
            ProbeStep::Wayfire => "wayfire",
            ProbeStep::Wayland => "wayland",
        }
    }
}

/// The probe sequence for a configured choice.
pub fn probe_plan(choice: BackendChoice) -> &'static [ProbeStep] {
    match choice {
        BackendChoice::Auto => &[ProbeStep::Hyprland, ProbeStep::Wayfire, ProbeStep::Wayland],
        BackendChoice::Hyprland => &[ProbeStep::Hyprland],
        BackendChoice::Wayfire => &[ProbeStep::Wayfire],
        BackendChoice::Wayland => &[ProbeStep::Wayland],
    }
}

/// Probe backends for `config.backend` until both contract slots are filled.
///
/// Returns every backend that attached, in probe order. An empty result
/// means nothing could be tracked; the store stays empty.
pub fn probe_backends(
    config: &CompositorConfig,
    store: Rc<EntityStore>,
    contracts: &Contracts,
    placement: Option<Rc<dyn Placement>>,
) -> Vec<Rc<dyn CompositorBackend>> {
    let timeouts = Timeouts::from_config(config);
    let forced = config.backend != BackendChoice::Auto;
    let mut attached: Vec<Rc<dyn CompositorBackend>> = Vec::new();

    for &step in probe_plan(config.backend) {
        if contracts.is_complete() {
            break;
        }
        debug!("Probing {} backend", step.name());

        let result: Result<Rc<dyn CompositorBackend>, ProbeError> = match step {
            ProbeStep::Hyprland => Hyprland::probe(
                config.hyprland_signature(),
                timeouts,
                store.clone(),
                contracts,
                placement.clone(),
            )
            .map(|b| b as Rc<dyn CompositorBackend>),
            ProbeStep::Wayfire => Wayfire::probe(
                config.wayfire_socket(),
                timeouts.request,
                store.clone(),
                contracts,
                placement.clone(),
            )
            .map(|b| b as Rc<dyn CompositorBackend>),
            ProbeStep::Wayland => WaylandBackend::probe(store.clone(), contracts)
                .map(|b| b as Rc<dyn CompositorBackend>),
        };

        match result {
            Ok(backend) => {
                info!("Attached {} backend", backend.name());
                attached.push(backend);
            }
            Err(ProbeError::Unavailable(reason)) if !forced => {
                debug!("Skipping {}: {}", step.name(), reason);
            }
            Err(e) => warn!("Failed to attach {}: {}", step.name(), e),
        }
    }

    if attached.is_empty() {
        warn!("No compositor backend attached");
    } else if !contracts.is_complete() {
        info!(
            "Running without {} actions",
            if contracts.has_window_actions() { "workspace" } else { "window" }
        );
    }
    attached
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::compositor::types::WorkspaceId;
    use crate::services::compositor::{WindowActions, WorkspaceActions};

    struct Both;

    impl WindowActions for Both {
        fn name(&self) -> &'static str {
            "both"
        }
    }

    impl WorkspaceActions for Both {
        fn name(&self) -> &'static str {
            "both"
        }

        fn activate(&self, _workspace: WorkspaceId) {}
    }

    #[test]
    fn test_auto_probes_sockets_before_protocols() {
        assert_eq!(
            probe_plan(BackendChoice::Auto),
            &[ProbeStep::Hyprland, ProbeStep::Wayfire, ProbeStep::Wayland]
        );
    }

    #[test]
    fn test_forced_choice_probes_one_backend() {
        assert_eq!(probe_plan(BackendChoice::Hyprland), &[ProbeStep::Hyprland]);
        assert_eq!(probe_plan(BackendChoice::Wayfire), &[ProbeStep::Wayfire]);
        assert_eq!(probe_plan(BackendChoice::Wayland), &[ProbeStep::Wayland]);
    }

    #[test]
    fn test_complete_contracts_skip_probing() {
        let contracts = Contracts::new();
        let both = Rc::new(Both);
        contracts.try_install_window_actions(both.clone()).unwrap();
        contracts.try_install_workspace_actions(both).unwrap();

        let store = Rc::new(EntityStore::new());
        let attached = probe_backends(&CompositorConfig::default(), store.clone(), &contracts, None);
        assert!(attached.is_empty());
        assert!(store.windows().is_empty());
    }

    #[test]
    fn test_step_names() {
        let names: Vec<_> = probe_plan(BackendChoice::Auto).iter().map(|s| s.name()).collect();
        assert_eq!(names, vec!["hyprland", "wayfire", "wayland"]);
    }
}
