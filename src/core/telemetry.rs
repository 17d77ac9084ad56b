//! Opt-in global tracing bootstrap.
//!
//! The library itself only emits through the `tracing` facade; embedding
//! applications usually install their own subscriber. This helper exists
//! for binaries and tests that want output without ceremony.

use tracing_subscriber::EnvFilter;

/// Install a formatted global subscriber filtered at `level` (an
/// `EnvFilter` directive, e.g. `"info"` or `"photon=trace"`).
///
/// Safe to call more than once; later calls are no-ops.
pub fn init(level: &str) {
    let filter = EnvFilter::try_new(level).unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .try_init();
}
