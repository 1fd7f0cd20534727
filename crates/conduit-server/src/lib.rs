//! # conduit-server
//!
//! The external-consumer surface of Conduit:
//!
//! - **REST**: session and permission-rule CRUD, transcript history
//! - **Consumer WebSocket**: per-session bidirectional action/event frames
//! - **SSE**: one-way bus streaming with optional session filter
//! - **Health + Prometheus `/metrics`**
//!
//! ## Crate Position
//!
//! Depends on: conduit-core, conduit-store, conduit-permissions,
//! conduit-runtime.
//! Depended on by: the `conduit` binary.

#![deny(unsafe_code)]

pub mod errors;
pub mod handlers;
pub mod metrics;
pub mod routes;
pub mod sse;
pub mod state;
pub mod ws;

pub use errors::ApiError;
pub use routes::router;
pub use state::{AppState, SharedState};

use std::future::Future;
use std::net::SocketAddr;

use tracing::info;

/// Bind and serve until the shutdown future resolves.
pub async fn serve(
    state: SharedState,
    addr: SocketAddr,
    shutdown: impl Future<Output = ()> + Send + 'static,
) -> std::io::Result<()> {
    let app = router(state);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(%addr, "conduit server listening");
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown)
        .await
}
