//! Tracing setup for the todoflow binary.

use tracing_subscriber::EnvFilter;

/// Installs the global tracing subscriber.
///
/// Respects `RUST_LOG`, defaulting to `info`. Calling this more than
/// once keeps the first subscriber.
pub fn init() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .try_init();
}
