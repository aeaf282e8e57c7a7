//! `tracing` subscriber setup.

use tracing_subscriber::{EnvFilter, fmt, prelude::*};

/// Used when the config cannot be read or names no filter.
pub const DEFAULT_LOG_FILTER: &str = "info,night_renderer=debug";

/// Installs the global `tracing` subscriber. `RUST_LOG`, when set and
/// valid, overrides `filter`; an unparsable `filter` falls back to
/// [`DEFAULT_LOG_FILTER`].
///
/// ```
/// night_core::init_logging("warn");
/// tracing::warn!("shown");
/// ```
pub fn init_logging(filter: &str) {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(filter))
        .unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER));

    // A second call leaves the first subscriber in place.
    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_target(true).with_thread_ids(true))
        .try_init();
}
