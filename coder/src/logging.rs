//! Development-time tracing.
//!
//! Tracing output is diagnostics only: it goes to stderr and is controlled by
//! `RUST_LOG`. The per-run event log under `.coder/runs/` is the product
//! artifact and is written regardless of the filter.

use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Initialize the tracing subscriber.
///
/// Reads `RUST_LOG`, defaulting to `warn`. Output is compact on stderr.
///
/// # Example
/// ```bash
/// RUST_LOG=coder=debug coder run --task "fix the failing test"
/// ```
pub fn init() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stderr).compact())
        .init();
}
