//! Tracing/logging initialization.
//!
//! Logs are JSON lines with a wall-clock timestamp. The filter comes from
//! `RUST_LOG`; without it the consumer and HTTP layers log at `info`.

use tracing_subscriber::EnvFilter;

const DEFAULT_FILTER: &str = "info";

/// Build the filter: `RUST_LOG` when it parses, else `fallback`.
pub fn filter_or(fallback: &str) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(fallback))
}

/// Install the global subscriber.
///
/// Returns `false` when a subscriber was already installed.
pub fn init_with(fallback: &str) -> bool {
    tracing_subscriber::fmt()
        .with_env_filter(filter_or(fallback))
        .json()
        .with_timer(tracing_subscriber::fmt::time::SystemTime)
        .with_target(false)
        .with_current_span(true)
        .try_init()
        .is_ok()
}

pub fn init() {
    let _ = init_with(DEFAULT_FILTER);
}
