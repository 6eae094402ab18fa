//! Tracing and logging setup shared by binaries and services that embed the
//! bulk DML engine.

/// Initialize process-wide tracing with defaults (JSON, `info`).
///
/// This is safe to call multiple times; subsequent calls become no-ops.
pub fn init() {
    tracing::init();
}

/// Tracing configuration (filters, output format).
pub mod tracing;

pub use tracing::{LogFormat, TracingConfig, init_with};
