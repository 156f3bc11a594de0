//! Tracing/logging initialization.
//!
//! JSON lines on stdout, one object per event, filtered by `RUST_LOG`.

use tracing_subscriber::EnvFilter;

/// Filter used when `RUST_LOG` is unset or unparseable.
pub const DEFAULT_FILTER: &str = "info";

/// Build the filter from `RUST_LOG`, falling back to `default`.
pub fn env_filter(default: &str) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default))
}

/// Install the global subscriber.
///
/// Returns `false` when one was already installed (this call is then a no-op).
pub fn init(default: &str) -> bool {
    tracing_subscriber::fmt()
        .with_env_filter(env_filter(default))
        .json()
        .with_timer(tracing_subscriber::fmt::time::SystemTime)
        .with_target(false)
        .with_thread_names(true)
        .try_init()
        .is_ok()
}
