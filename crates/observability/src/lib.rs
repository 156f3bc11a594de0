//! Tracing and logging setup shared by every binary.

/// Initialize process-wide logging.
///
/// This is safe to call multiple times; subsequent calls become no-ops.
pub fn init() {
    tracing::init(tracing::DEFAULT_FILTER);
}

/// Tracing configuration (filters, formatter).
pub mod tracing;
