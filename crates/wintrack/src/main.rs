//! wintrack - follow the compositor's windows and workspaces and log every change.

use std::path::PathBuf;
use std::process::ExitCode;
use std::rc::Rc;

use clap::Parser;
use tracing::{debug, info};
use wintrack::services::compositor::{
    CascadePlacement, Change, CompositorBackend, Contracts, EntityStore, Placement, probe_backends,
};
use wintrack_core::{BackendChoice, Config, logging};

const SIGINT: i32 = 2;
const SIGTERM: i32 = 15;

#[derive(Parser, Debug)]
#[command(name = "wintrack", version, about = "Track Wayland windows and workspaces")]
struct Cli {
    /// Increase log verbosity (-v info, -vv debug, -vvv trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Config file (default: $XDG_CONFIG_HOME/wintrack/config.toml)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Backend to use: auto, hyprland, wayfire or wayland
    #[arg(long)]
    backend: Option<String>,
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let mut config = match Config::load(cli.config.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("wintrack: {}", e);
            return ExitCode::FAILURE;
        }
    };
    if let Some(name) = &cli.backend {
        config.compositor.backend = BackendChoice::from_name(name);
    }

    logging::init(cli.verbose, Some(&config.log.filter));
    info!("wintrack v{} starting", env!("CARGO_PKG_VERSION"));
    debug!("Config: {:?}", config);

    let store = Rc::new(EntityStore::new());
    let contracts = Rc::new(Contracts::new());
    let placement: Option<Rc<dyn Placement>> = config.placement.enabled.then(|| {
        Rc::new(CascadePlacement::new(store.clone(), &contracts, &config.placement))
            as Rc<dyn Placement>
    });

    store.subscribe(|change: &Change| info!("{:?}", change));

    let backends = probe_backends(&config.compositor, store.clone(), &contracts, placement);
    if backends.is_empty() {
        eprintln!("wintrack: no supported compositor found");
        return ExitCode::FAILURE;
    }

    let main_loop = glib::MainLoop::new(None, false);
    for signum in [SIGINT, SIGTERM] {
        let main_loop = main_loop.clone();
        let backends = backends.clone();
        glib::unix_signal_add_local(signum, move || {
            debug!("Signal {} received, shutting down", signum);
            for backend in &backends {
                backend.stop();
            }
            main_loop.quit();
            glib::ControlFlow::Break
        });
    }

    main_loop.run();

    for backend in &backends {
        debug!("{} ended in {:?}", backend.name(), backend.link_state());
    }
    ExitCode::SUCCESS
}
