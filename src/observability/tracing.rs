//! Tracing setup.
//!
//! Console logging with structured fields, filtered through `--log-level`
//! (or `RUST_LOG`).

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Filter used when no level is configured or the configured one is invalid.
pub const DEFAULT_FILTER: &str = "info,pubsub_sse=debug";

/// Parse `directives`, falling back to [`DEFAULT_FILTER`].
fn build_filter(directives: &str) -> EnvFilter {
    EnvFilter::try_new(directives).unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER))
}

/// Initialize tracing with the given service name.
///
/// This sets up:
/// - Console logging with structured format
/// - A level filter from `directives`, e.g. `info` or `warn,pubsub_sse=trace`
///
/// # Panics
///
/// Panics if tracing has already been initialized.
pub fn init_tracing(service_name: &str, directives: &str) {
    let filter = build_filter(directives);

    let fmt_layer = tracing_subscriber::fmt::layer()
        .with_target(true)
        .with_thread_ids(true)
        .with_file(true)
        .with_line_number(true);

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt_layer)
        .init();

    if EnvFilter::try_new(directives).is_err() {
        tracing::warn!(directives, fallback = DEFAULT_FILTER, "Invalid log level, using default");
    }
    tracing::info!(service = service_name, "Tracing initialized");
}

/// Initialize tracing for tests (only logs errors).
pub fn init_test_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter("error")
        .with_test_writer()
        .try_init();
}
