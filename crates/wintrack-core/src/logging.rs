//! Logging setup using tracing.
//!
//! Verbosity comes from the number of `-v` flags; extra `EnvFilter`
//! directives can be layered on top from the `[log]` config section.

use tracing::Level;
use tracing_subscriber::filter::Directive;
use tracing_subscriber::{EnvFilter, fmt};

/// Map a `-v` count to a base level (0=warn, 1=info, 2=debug, 3+=trace).
pub fn level_for(verbosity: u8) -> Level {
    match verbosity {
        0 => Level::WARN,
        1 => Level::INFO,
        2 => Level::DEBUG,
        _ => Level::TRACE,
    }
}

/// Build the filter from `RUST_LOG`, the verbosity level and extra directives.
///
/// Directives that fail to parse are skipped with a message on stderr, since
/// the subscriber is not installed yet.
pub fn build_filter(verbosity: u8, extra: Option<&str>) -> EnvFilter {
    let mut filter = EnvFilter::from_default_env().add_directive(level_for(verbosity).into());

    for raw in extra
        .unwrap_or("")
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
    {
        match raw.parse::<Directive>() {
            Ok(directive) => filter = filter.add_directive(directive),
            Err(e) => eprintln!("wintrack: ignoring log directive {:?}: {}", raw, e),
        }
    }

    filter
}

/// Initialize the global tracing subscriber.
///
/// # Example
/// ```no_run
/// wintrack_core::logging::init(1, Some("wintrack::services::compositor=debug"));
/// ```
pub fn init(verbosity: u8, extra: Option<&str>) {
    fmt()
        .with_env_filter(build_filter(verbosity, extra))
        .with_target(true)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .init();
}
