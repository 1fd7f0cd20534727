//! Agent wire protocol — NDJSON messages exchanged with CLI subprocesses.
//!
//! The wire format is fixed by the external agent CLI: each line is one JSON
//! object discriminated by a `type` field (and sometimes a `subtype`).
//! Inbound messages retain their raw JSON alongside the handful of fields
//! Conduit interprets, so unknown fields are forwarded verbatim to
//! subscribers (forward-compatible).

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::warn;

// ─────────────────────────────────────────────────────────────────────────────
// Inbound (agent → Conduit)
// ─────────────────────────────────────────────────────────────────────────────

/// A parsed inbound agent message.
///
/// Built with [`AgentMessage::from_value`], which never fails: objects with
/// an unrecognized (or missing) `type` become [`AgentMessage::Unknown`] and
/// are forwarded as generic session messages rather than dropped.
#[derive(Clone, Debug)]
pub enum AgentMessage {
    /// `system` — agent lifecycle notices; `subtype == "init"` carries the
    /// agent-assigned session id and model.
    System(SystemMessage),
    /// `assistant` — opaque assistant output, forwarded and stored.
    Assistant(Value),
    /// `stream_event` — opaque streaming delta, forwarded only.
    StreamEvent(Value),
    /// `result` — end-of-turn summary with cumulative cost/token totals.
    Result(ResultMessage),
    /// `control_request` — agent-initiated sub-exchange (permissions, init).
    ControlRequest(ControlRequest),
    /// `tool_progress` — forwarded as a stream event.
    ToolProgress(Value),
    /// `keep_alive` — ignored.
    KeepAlive,
    /// Anything else — logged and forwarded as a generic session message.
    Unknown {
        /// The unrecognized `type` tag (empty when absent).
        message_type: String,
        /// The full original object.
        raw: Value,
    },
}

/// Parsed `system` message.
#[derive(Clone, Debug)]
pub struct SystemMessage {
    /// The `subtype` discriminator (empty when absent).
    pub subtype: String,
    /// Agent-assigned session id (`init` only).
    pub session_id: Option<String>,
    /// Model reported by the agent (`init` only).
    pub model: Option<String>,
    /// Status string for `subtype == "status"` passthrough notices.
    pub status: Option<String>,
    /// The full original object.
    pub raw: Value,
}

/// Parsed `result` message.
///
/// Cost and token fields carry the cumulative-total semantics of the agent
/// protocol: they are SET onto the session, never added.
#[derive(Clone, Debug)]
pub struct ResultMessage {
    /// The `subtype` discriminator (usually `"success"`).
    pub subtype: Option<String>,
    /// Cumulative session cost in USD.
    pub total_cost_usd: f64,
    /// Cumulative input tokens.
    pub input_tokens: u64,
    /// Cumulative output tokens.
    pub output_tokens: u64,
    /// The full original object.
    pub raw: Value,
}

/// Parsed `control_request` message.
#[derive(Clone, Debug)]
pub enum ControlRequest {
    /// `request.subtype == "can_use_tool"` — a permission check.
    CanUseTool(ToolUseRequest),
    /// `request.subtype == "init"` — treated as a system/init equivalent.
    Init(SystemMessage),
    /// Any other subtype — forwarded as a generic session message.
    Other {
        /// The unrecognized request subtype.
        subtype: String,
        /// The full original object.
        raw: Value,
    },
}

/// A tool-use permission request extracted from a `control_request`.
#[derive(Clone, Debug)]
pub struct ToolUseRequest {
    /// Correlation id echoed back in the `control_response`.
    pub request_id: String,
    /// Tool the agent wants to invoke.
    pub tool_name: String,
    /// Tool input object, matched against permission rules.
    pub tool_input: Value,
    /// The full original object.
    pub raw: Value,
}

fn str_field(value: &Value, key: &str) -> Option<String> {
    value.get(key).and_then(Value::as_str).map(String::from)
}

impl AgentMessage {
    /// Classify a decoded NDJSON object.
    pub fn from_value(value: Value) -> Self {
        let message_type = value
            .get("type")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();

        match message_type.as_str() {
            "system" => Self::System(SystemMessage::from_value(&value, value.clone())),
            "assistant" => Self::Assistant(value),
            "stream_event" => Self::StreamEvent(value),
            "result" => Self::Result(ResultMessage::from_value(value)),
            "control_request" => Self::ControlRequest(ControlRequest::from_value(value)),
            "tool_progress" => Self::ToolProgress(value),
            "keep_alive" => Self::KeepAlive,
            _ => {
                warn!(message_type, "unknown agent message type");
                Self::Unknown { message_type, raw: value }
            }
        }
    }

    /// The wire `type` tag of this message.
    pub fn type_name(&self) -> &str {
        match self {
            Self::System(_) => "system",
            Self::Assistant(_) => "assistant",
            Self::StreamEvent(_) => "stream_event",
            Self::Result(_) => "result",
            Self::ControlRequest(_) => "control_request",
            Self::ToolProgress(_) => "tool_progress",
            Self::KeepAlive => "keep_alive",
            Self::Unknown { .. } => "unknown",
        }
    }
}

impl SystemMessage {
    fn from_value(fields: &Value, raw: Value) -> Self {
        Self {
            subtype: str_field(fields, "subtype").unwrap_or_default(),
            session_id: str_field(fields, "session_id"),
            model: str_field(fields, "model"),
            status: str_field(fields, "status"),
            raw,
        }
    }

    /// Whether this is the handshake (`init`) notice.
    pub fn is_init(&self) -> bool {
        self.subtype == "init"
    }
}

impl ResultMessage {
    fn from_value(raw: Value) -> Self {
        let usage = raw.get("usage");
        let u64_of = |v: Option<&Value>, key: &str| {
            v.and_then(|u| u.get(key)).and_then(Value::as_u64).unwrap_or(0)
        };
        Self {
            subtype: str_field(&raw, "subtype"),
            total_cost_usd: raw
                .get("total_cost_usd")
                .and_then(Value::as_f64)
                .unwrap_or(0.0),
            input_tokens: u64_of(usage, "input_tokens"),
            output_tokens: u64_of(usage, "output_tokens"),
            raw,
        }
    }
}

impl ControlRequest {
    fn from_value(raw: Value) -> Self {
        let request = raw.get("request").cloned().unwrap_or(Value::Null);
        let subtype = str_field(&request, "subtype").unwrap_or_default();
        match subtype.as_str() {
            "can_use_tool" => {
                let request_id = str_field(&raw, "request_id").unwrap_or_default();
                if request_id.is_empty() {
                    warn!("can_use_tool control_request without request_id");
                    return Self::Other { subtype, raw };
                }
                Self::CanUseTool(ToolUseRequest {
                    request_id,
                    tool_name: str_field(&request, "tool_name").unwrap_or_default(),
                    tool_input: request.get("tool_input").cloned().unwrap_or(Value::Null),
                    raw,
                })
            }
            "init" => Self::Init(SystemMessage::from_value(&request, raw)),
            _ => Self::Other { subtype, raw },
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Outbound (Conduit → agent)
// ─────────────────────────────────────────────────────────────────────────────

/// Permission verdict carried in a `control_response`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PermissionBehavior {
    /// The tool call may proceed.
    Allow,
    /// The tool call is blocked.
    Deny,
}

impl PermissionBehavior {
    /// Stable string form, matching persisted decision values.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Allow => "allow",
            Self::Deny => "deny",
        }
    }

    /// Parse a persisted behavior string.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "allow" => Some(Self::Allow),
            "deny" => Some(Self::Deny),
            _ => None,
        }
    }
}

/// A message sent to the agent over the bridge socket.
#[derive(Clone, Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OutboundMessage {
    /// One user turn.
    User {
        /// Role + content envelope.
        message: UserPayload,
    },
    /// Reply to a `can_use_tool` control request.
    ControlResponse {
        /// Response envelope.
        response: ControlResponsePayload,
    },
    /// Interrupt the in-flight turn.
    Interrupt,
}

/// Payload of an outbound `user` message.
#[derive(Clone, Debug, Serialize)]
pub struct UserPayload {
    /// Always `"user"`.
    pub role: &'static str,
    /// Message text.
    pub content: String,
}

/// Payload of an outbound `control_response`.
#[derive(Clone, Debug, Serialize)]
pub struct ControlResponsePayload {
    /// Always `"can_use_tool_result"`.
    pub subtype: &'static str,
    /// Correlation id from the originating request.
    pub request_id: String,
    /// The decision.
    pub result: PermissionOutcome,
}

/// The decision portion of a `control_response`.
#[derive(Clone, Debug, Serialize)]
pub struct PermissionOutcome {
    /// Allow or deny.
    pub behavior: PermissionBehavior,
    /// Optional sanitized replacement input. Forward-compat passthrough;
    /// no rule currently produces one.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub updated_input: Option<Value>,
}

impl OutboundMessage {
    /// Build a `user` message.
    pub fn user(content: impl Into<String>) -> Self {
        Self::User {
            message: UserPayload { role: "user", content: content.into() },
        }
    }

    /// Build a `control_response` for a permission decision.
    pub fn control_response(
        request_id: impl Into<String>,
        behavior: PermissionBehavior,
        updated_input: Option<Value>,
    ) -> Self {
        Self::ControlResponse {
            response: ControlResponsePayload {
                subtype: "can_use_tool_result",
                request_id: request_id.into(),
                result: PermissionOutcome { behavior, updated_input },
            },
        }
    }

    /// Build an `interrupt` message.
    pub fn interrupt() -> Self {
        Self::Interrupt
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use serde_json::json;

    #[test]
    fn classifies_system_init() {
        let msg = AgentMessage::from_value(json!({
            "type": "system",
            "subtype": "init",
            "session_id": "agent-abc",
            "model": "sonnet",
            "tools": ["Bash", "Read"],
        }));
        let AgentMessage::System(sys) = msg else {
            panic!("expected system");
        };
        assert!(sys.is_init());
        assert_eq!(sys.session_id.as_deref(), Some("agent-abc"));
        assert_eq!(sys.model.as_deref(), Some("sonnet"));
        // Raw retains fields Conduit does not interpret.
        assert_eq!(sys.raw["tools"][0], "Bash");
    }

    #[test]
    fn classifies_result_with_usage() {
        let msg = AgentMessage::from_value(json!({
            "type": "result",
            "subtype": "success",
            "total_cost_usd": 0.05,
            "usage": {"input_tokens": 100, "output_tokens": 50},
        }));
        let AgentMessage::Result(r) = msg else {
            panic!("expected result");
        };
        assert_eq!(r.subtype.as_deref(), Some("success"));
        assert!((r.total_cost_usd - 0.05).abs() < f64::EPSILON);
        assert_eq!(r.input_tokens, 100);
        assert_eq!(r.output_tokens, 50);
    }

    #[test]
    fn result_missing_usage_defaults_to_zero() {
        let msg = AgentMessage::from_value(json!({"type": "result"}));
        let AgentMessage::Result(r) = msg else {
            panic!("expected result");
        };
        assert_eq!(r.input_tokens, 0);
        assert_eq!(r.output_tokens, 0);
        assert!((r.total_cost_usd - 0.0).abs() < f64::EPSILON);
    }

    #[test]
    fn classifies_can_use_tool() {
        let msg = AgentMessage::from_value(json!({
            "type": "control_request",
            "request_id": "req-1",
            "request": {
                "subtype": "can_use_tool",
                "tool_name": "Bash",
                "tool_input": {"command": "ls"},
            },
        }));
        let AgentMessage::ControlRequest(ControlRequest::CanUseTool(req)) = msg else {
            panic!("expected can_use_tool");
        };
        assert_eq!(req.request_id, "req-1");
        assert_eq!(req.tool_name, "Bash");
        assert_eq!(req.tool_input["command"], "ls");
    }

    #[test]
    fn can_use_tool_without_request_id_downgrades() {
        let msg = AgentMessage::from_value(json!({
            "type": "control_request",
            "request": {"subtype": "can_use_tool", "tool_name": "Bash"},
        }));
        assert_matches!(
            msg,
            AgentMessage::ControlRequest(ControlRequest::Other { .. })
        );
    }

    #[test]
    fn control_request_init_is_system_equivalent() {
        let msg = AgentMessage::from_value(json!({
            "type": "control_request",
            "request": {"subtype": "init", "session_id": "agent-xyz", "model": "opus"},
        }));
        let AgentMessage::ControlRequest(ControlRequest::Init(sys)) = msg else {
            panic!("expected init");
        };
        assert_eq!(sys.session_id.as_deref(), Some("agent-xyz"));
        assert_eq!(sys.model.as_deref(), Some("opus"));
    }

    #[test]
    fn keep_alive_and_unknown() {
        assert_matches!(
            AgentMessage::from_value(json!({"type": "keep_alive"})),
            AgentMessage::KeepAlive
        );
        let unknown = AgentMessage::from_value(json!({"type": "hologram", "x": 1}));
        let AgentMessage::Unknown { message_type, raw } = unknown else {
            panic!("expected unknown");
        };
        assert_eq!(message_type, "hologram");
        assert_eq!(raw["x"], 1);
    }

    #[test]
    fn missing_type_is_unknown() {
        let msg = AgentMessage::from_value(json!({"data": true}));
        assert_matches!(msg, AgentMessage::Unknown { ref message_type, .. } if message_type.is_empty());
    }

    #[test]
    fn type_name_reflects_wire_tag() {
        for (frame, expected) in [
            (json!({"type": "system"}), "system"),
            (json!({"type": "assistant"}), "assistant"),
            (json!({"type": "stream_event"}), "stream_event"),
            (json!({"type": "result"}), "result"),
            (json!({"type": "tool_progress"}), "tool_progress"),
            (json!({"type": "keep_alive"}), "keep_alive"),
            (json!({"type": "mystery"}), "unknown"),
        ] {
            assert_eq!(AgentMessage::from_value(frame).type_name(), expected);
        }
    }

    #[test]
    fn user_frame_shape() {
        let frame = serde_json::to_value(OutboundMessage::user("hello")).unwrap();
        assert_eq!(
            frame,
            json!({"type": "user", "message": {"role": "user", "content": "hello"}})
        );
    }

    #[test]
    fn control_response_shape() {
        let frame = serde_json::to_value(OutboundMessage::control_response(
            "req-9",
            PermissionBehavior::Deny,
            None,
        ))
        .unwrap();
        assert_eq!(
            frame,
            json!({
                "type": "control_response",
                "response": {
                    "subtype": "can_use_tool_result",
                    "request_id": "req-9",
                    "result": {"behavior": "deny"},
                },
            })
        );
    }

    #[test]
    fn control_response_carries_updated_input() {
        let frame = serde_json::to_value(OutboundMessage::control_response(
            "req-9",
            PermissionBehavior::Allow,
            Some(json!({"command": "ls -la"})),
        ))
        .unwrap();
        assert_eq!(
            frame["response"]["result"]["updated_input"]["command"],
            "ls -la"
        );
    }

    #[test]
    fn interrupt_frame_shape() {
        let frame = serde_json::to_value(OutboundMessage::interrupt()).unwrap();
        assert_eq!(frame, json!({"type": "interrupt"}));
    }

    #[test]
    fn behavior_round_trip() {
        assert_eq!(PermissionBehavior::parse("allow"), Some(PermissionBehavior::Allow));
        assert_eq!(PermissionBehavior::parse("deny"), Some(PermissionBehavior::Deny));
        assert_eq!(PermissionBehavior::parse("maybe"), None);
        assert_eq!(PermissionBehavior::Allow.as_str(), "allow");
        assert_eq!(PermissionBehavior::Deny.as_str(), "deny");
    }
}
