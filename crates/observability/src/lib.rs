//! Process-wide tracing setup shared by the evalhub binaries.

/// Initialize structured JSON logging.
///
/// Safe to call multiple times; subsequent calls become no-ops.
pub fn init() {
    tracing::init();
}

/// Tracing configuration (filters, layers).
pub mod tracing;
