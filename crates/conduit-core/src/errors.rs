//! Shared error taxonomy.
//!
//! Lower layers (store, bridge, launcher, runtime) define their own
//! `thiserror` enums; [`ErrorKind`] is the shape failures take when they
//! cross the boundary to an external caller. The HTTP layer maps kinds to
//! status codes; runtime failures inside a live session never surface this
//! way — they drive state transitions and `session.error` bus events
//! instead.

/// Error kinds an external caller can observe.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ErrorKind {
    /// Ill-formed input (missing folder, invalid permission mode, empty name).
    Validation,
    /// Session / rule / project id does not exist.
    NotFound,
    /// Port pool exhausted, session cap reached, send on a disconnected session.
    Conflict,
    /// Subprocess could not be started.
    Spawn,
    /// Bind or accept failure on the bridge endpoint.
    Bridge,
    /// Malformed NDJSON or unknown message type. Logged, never surfaced.
    Protocol,
    /// Anything else.
    Internal,
}

impl ErrorKind {
    /// Stable string tag used in API error bodies and logs.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Validation => "validation_error",
            Self::NotFound => "not_found",
            Self::Conflict => "conflict",
            Self::Spawn => "spawn_error",
            Self::Bridge => "bridge_error",
            Self::Protocol => "protocol_error",
            Self::Internal => "internal_error",
        }
    }
}
