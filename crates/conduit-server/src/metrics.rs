//! Prometheus metrics recorder and `/metrics` endpoint handler.

use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use tracing::info;

/// Install the Prometheus metrics recorder (global).
///
/// Returns the `PrometheusHandle` used to render the `/metrics` endpoint.
/// Must be called once at server startup before any metrics are recorded.
pub fn install_recorder() -> PrometheusHandle {
    let builder = PrometheusBuilder::new();
    let handle = builder
        .install_recorder()
        .expect("failed to install metrics recorder");
    info!("prometheus metrics recorder installed");
    handle
}

/// Render Prometheus text format from the installed recorder.
pub fn render(handle: &PrometheusHandle) -> String {
    handle.render()
}

// Metric name constants to avoid typos across crates.

/// Live sessions (gauge).
pub const SESSIONS_ACTIVE: &str = "sessions_active";
/// Bridge frames received from agents (counter).
pub const BRIDGE_FRAMES_RECEIVED_TOTAL: &str = "bridge_frames_received_total";
/// Bridge frames sent to agents (counter).
pub const BRIDGE_FRAMES_SENT_TOTAL: &str = "bridge_frames_sent_total";
/// Bridge client connections accepted (counter).
pub const BRIDGE_CONNECTIONS_TOTAL: &str = "bridge_connections_total";
/// Permission decisions (counter, labels: decision, source).
pub const PERMISSION_DECISIONS_TOTAL: &str = "permission_decisions_total";
