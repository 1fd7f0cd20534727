//! Bus events fanned out to SSE and consumer-WebSocket subscribers.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Bus event type tags.
pub mod event_types {
    /// Generic per-session agent message (system, assistant, unknown).
    pub const SESSION_MESSAGE: &str = "session.message";
    /// Streaming delta or tool progress.
    pub const STREAM_EVENT: &str = "stream.event";
    /// End-of-turn result.
    pub const SESSION_RESULT: &str = "session.result";
    /// Lifecycle status change.
    pub const SESSION_STATUS: &str = "session.status";
    /// Session failed (subprocess died, connect timeout).
    pub const SESSION_ERROR: &str = "session.error";
    /// Session terminated by caller.
    pub const SESSION_CLOSED: &str = "session.closed";
}

/// An event published on the in-process bus.
///
/// Events are delivered to subscribers in global emission order; subscribers
/// filtered to one session therefore observe that session's events in
/// monotonic order.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BusEvent {
    /// Event type tag (see [`event_types`]).
    #[serde(rename = "type")]
    pub event_type: String,
    /// Session this event belongs to.
    pub session_id: String,
    /// Event payload.
    pub data: Value,
    /// ISO 8601 emission timestamp.
    pub timestamp: String,
}

impl BusEvent {
    /// Create an event with the current UTC timestamp.
    pub fn new(event_type: &str, session_id: impl Into<String>, data: Value) -> Self {
        Self {
            event_type: event_type.to_string(),
            session_id: session_id.into(),
            data,
            timestamp: chrono::Utc::now().to_rfc3339(),
        }
    }

    /// A `session.message` event carrying a raw agent frame.
    pub fn session_message(session_id: impl Into<String>, data: Value) -> Self {
        Self::new(event_types::SESSION_MESSAGE, session_id, data)
    }

    /// A `stream.event` event carrying a raw streaming frame.
    pub fn stream_event(session_id: impl Into<String>, data: Value) -> Self {
        Self::new(event_types::STREAM_EVENT, session_id, data)
    }

    /// A `session.result` event carrying a raw result frame.
    pub fn session_result(session_id: impl Into<String>, data: Value) -> Self {
        Self::new(event_types::SESSION_RESULT, session_id, data)
    }

    /// A `session.status` event announcing a lifecycle transition.
    pub fn session_status(session_id: impl Into<String>, status: &str) -> Self {
        Self::new(
            event_types::SESSION_STATUS,
            session_id,
            serde_json::json!({ "status": status }),
        )
    }

    /// A `session.error` event with a reason tag and message.
    pub fn session_error(session_id: impl Into<String>, reason: &str, message: &str) -> Self {
        Self::new(
            event_types::SESSION_ERROR,
            session_id,
            serde_json::json!({ "reason": reason, "message": message }),
        )
    }

    /// A `session.closed` event.
    pub fn session_closed(session_id: impl Into<String>) -> Self {
        Self::new(event_types::SESSION_CLOSED, session_id, Value::Null)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn constructors_set_type_tags() {
        assert_eq!(
            BusEvent::session_message("s1", json!({})).event_type,
            "session.message"
        );
        assert_eq!(BusEvent::stream_event("s1", json!({})).event_type, "stream.event");
        assert_eq!(
            BusEvent::session_result("s1", json!({})).event_type,
            "session.result"
        );
        assert_eq!(BusEvent::session_status("s1", "idle").event_type, "session.status");
        assert_eq!(
            BusEvent::session_error("s1", "unexpected_exit", "boom").event_type,
            "session.error"
        );
        assert_eq!(BusEvent::session_closed("s1").event_type, "session.closed");
    }

    #[test]
    fn serializes_with_type_key() {
        let event = BusEvent::session_status("s1", "active");
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "session.status");
        assert_eq!(json["sessionId"], "s1");
        assert_eq!(json["data"]["status"], "active");
        assert!(json["timestamp"].as_str().is_some());
    }

    #[test]
    fn error_event_carries_reason() {
        let event = BusEvent::session_error("s1", "cli_failed_to_connect", "timed out");
        assert_eq!(event.data["reason"], "cli_failed_to_connect");
        assert_eq!(event.data["message"], "timed out");
    }
}
