//! Runtime error type — the session manager's failure surface.

use conduit_bridge::{BridgeError, SpawnError};
use conduit_core::errors::ErrorKind;
use conduit_store::StoreError;
use thiserror::Error;

/// Result alias for runtime operations.
pub type Result<T> = std::result::Result<T, RuntimeError>;

/// Failures surfaced by session-manager operations.
///
/// Runtime failures inside a live session (subprocess crash, bridge I/O)
/// never take this shape — they drive state transitions and `session.error`
/// bus events instead.
#[derive(Debug, Error)]
pub enum RuntimeError {
    /// Ill-formed input (invalid permission mode, empty name or content).
    #[error("validation error: {0}")]
    Validation(String),

    /// A referenced entity does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// Port pool exhausted, session cap reached, or the session cannot
    /// accept the operation in its current state.
    #[error("conflict: {0}")]
    Conflict(String),

    /// The agent subprocess could not be started.
    #[error(transparent)]
    Spawn(#[from] SpawnError),

    /// The bridge endpoint could not be established.
    #[error(transparent)]
    Bridge(#[from] BridgeError),

    /// The subprocess started but never completed the bridge handshake
    /// (early exit, or the 15-second connect window elapsed).
    #[error("agent failed to start: {0}")]
    AgentStartup(String),

    /// Persistence failure.
    #[error(transparent)]
    Store(#[from] StoreError),

    /// Anything else.
    #[error("internal error: {0}")]
    Internal(String),
}

impl RuntimeError {
    /// Taxonomy kind, for HTTP status mapping.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Validation(_) => ErrorKind::Validation,
            Self::NotFound(_) => ErrorKind::NotFound,
            Self::Conflict(_) => ErrorKind::Conflict,
            Self::Spawn(_) | Self::AgentStartup(_) => ErrorKind::Spawn,
            Self::Bridge(_) => ErrorKind::Bridge,
            Self::Store(_) | Self::Internal(_) => ErrorKind::Internal,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kinds_map_to_taxonomy() {
        assert_eq!(RuntimeError::Validation("x".into()).kind(), ErrorKind::Validation);
        assert_eq!(RuntimeError::NotFound("x".into()).kind(), ErrorKind::NotFound);
        assert_eq!(RuntimeError::Conflict("x".into()).kind(), ErrorKind::Conflict);
        assert_eq!(RuntimeError::AgentStartup("x".into()).kind(), ErrorKind::Spawn);
        assert_eq!(RuntimeError::Internal("x".into()).kind(), ErrorKind::Internal);
        assert_eq!(RuntimeError::Spawn(SpawnError::NoPid).kind(), ErrorKind::Spawn);
    }
}
