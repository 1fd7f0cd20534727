//! Session lifecycle states.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Lifecycle state of a session.
///
/// ```text
///   (create)                 bridge connect            user message sent
///   ──────▶ starting ─────────────────────▶ idle ─────────────────────▶ active
///                    \                        ▲                          │
///                     \ timeout / exit         │ result received          │
///                      ▼                      └──────────────────────────┘
///                    error                           │ kill
///                                                    ▼
///                                                  closed
/// ```
///
/// `compacting` is reported by the agent and passed through; no internal
/// transition writes it.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    /// Subprocess spawned, bridge waiting for the inbound connect.
    Starting,
    /// Agent connected, no turn in flight.
    Idle,
    /// A user message has been sent, awaiting `result`.
    Active,
    /// Agent reported context compaction in progress.
    Compacting,
    /// Terminal: agent exited unexpectedly or never connected.
    Error,
    /// Terminal: terminated by caller.
    Closed,
}

impl SessionStatus {
    /// Stable string form, matching the persisted column values.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Starting => "starting",
            Self::Idle => "idle",
            Self::Active => "active",
            Self::Compacting => "compacting",
            Self::Error => "error",
            Self::Closed => "closed",
        }
    }

    /// Parse a persisted status string.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "starting" => Some(Self::Starting),
            "idle" => Some(Self::Idle),
            "active" => Some(Self::Active),
            "compacting" => Some(Self::Compacting),
            "error" => Some(Self::Error),
            "closed" => Some(Self::Closed),
            _ => None,
        }
    }

    /// Whether this state is terminal (`closed` or `error`).
    ///
    /// `closed_at` is set iff the session is terminal, and terminal sessions
    /// hold no bridge port.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Error | Self::Closed)
    }
}

impl fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_through_strings() {
        for status in [
            SessionStatus::Starting,
            SessionStatus::Idle,
            SessionStatus::Active,
            SessionStatus::Compacting,
            SessionStatus::Error,
            SessionStatus::Closed,
        ] {
            assert_eq!(SessionStatus::parse(status.as_str()), Some(status));
        }
    }

    #[test]
    fn parse_rejects_unknown() {
        assert_eq!(SessionStatus::parse("zombie"), None);
        assert_eq!(SessionStatus::parse(""), None);
    }

    #[test]
    fn terminal_states() {
        assert!(SessionStatus::Error.is_terminal());
        assert!(SessionStatus::Closed.is_terminal());
        assert!(!SessionStatus::Starting.is_terminal());
        assert!(!SessionStatus::Idle.is_terminal());
        assert!(!SessionStatus::Active.is_terminal());
        assert!(!SessionStatus::Compacting.is_terminal());
    }

    #[test]
    fn serde_uses_snake_case() {
        let json = serde_json::to_string(&SessionStatus::Starting).unwrap();
        assert_eq!(json, "\"starting\"");
        let back: SessionStatus = serde_json::from_str("\"compacting\"").unwrap();
        assert_eq!(back, SessionStatus::Compacting);
    }
}
