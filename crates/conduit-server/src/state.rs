//! Shared server state.

use std::sync::Arc;

use conduit_runtime::SessionManager;
use metrics_exporter_prometheus::PrometheusHandle;

/// State reachable from every handler closure.
///
/// The manager is the root engine value — store, bus, and permission engine
/// are reached through it rather than held as process-wide singletons.
pub struct AppState {
    /// The session manager (and through it: store, bus, permissions).
    pub manager: Arc<SessionManager>,
    /// Prometheus render handle for `/metrics`.
    pub metrics: PrometheusHandle,
    /// Server start time, reported by `/health`.
    pub started_at: chrono::DateTime<chrono::Utc>,
}

/// Cloneable handle passed to the router.
pub type SharedState = Arc<AppState>;

impl AppState {
    /// Bundle the engine values into shared state.
    pub fn new(manager: Arc<SessionManager>, metrics: PrometheusHandle) -> SharedState {
        Arc::new(Self { manager, metrics, started_at: chrono::Utc::now() })
    }
}
