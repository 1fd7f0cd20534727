//! Tracing subscriber initialization for the server binary.

use tracing_subscriber::EnvFilter;

/// Initialize the global tracing subscriber.
///
/// `RUST_LOG` takes precedence over the configured default directive.
/// With `json = true`, log lines are emitted as structured JSON (one object
/// per line) for ingestion; otherwise the compact human format is used.
///
/// Calling this twice is a no-op (the second install fails quietly), which
/// keeps tests that share a process safe.
pub fn init_logging(default_directive: &str, json: bool) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_directive));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true);

    let result = if json {
        builder.json().try_init()
    } else {
        builder.try_init()
    };
    if result.is_err() {
        tracing::debug!("tracing subscriber already installed");
    }
}
