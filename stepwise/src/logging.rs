//! Tracing setup for the CLI.
//!
//! Stage changes, lock changes and configuration diagnostics are emitted as
//! `tracing` events; which roles report stage changes is decided by
//! [`LogFilter`](crate::core::stage::LogFilter) in the engine config. This
//! module only decides where events go.

use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Initialize the tracing subscriber.
///
/// Reads `RUST_LOG`. Defaults to `warn` if unset.
/// Output: stderr, compact format.
///
/// # Example
/// ```bash
/// RUST_LOG=stepwise=debug stepwise run process.json --scene scene.json
/// ```
pub fn init() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stderr).compact())
        .init();
}
