//! Message router — pure dispatch of parsed inbound frames.
//!
//! The router owns no state and performs no I/O: it classifies one frame,
//! invokes the matching handler, and publishes the corresponding bus event
//! through the injected emitter. Handlers default to no-ops so callers wire
//! only what they need.

use conduit_core::BusEvent;
use conduit_core::protocol::{
    AgentMessage, ControlRequest, ResultMessage, SystemMessage, ToolUseRequest,
};
use serde_json::Value;
use tracing::warn;

/// Typed callbacks invoked by [`route_message`]. All methods default to
/// no-ops.
pub trait MessageHandlers: Send + Sync {
    /// `system`/`init` (or the `control_request` init equivalent) — carries
    /// the agent-assigned session id and model.
    fn on_system_init(&self, session_id: &str, message: &SystemMessage) {
        let _ = (session_id, message);
    }

    /// `assistant` output.
    fn on_assistant(&self, session_id: &str, payload: &Value) {
        let _ = (session_id, payload);
    }

    /// `stream_event` or `tool_progress`.
    fn on_stream_event(&self, session_id: &str, payload: &Value) {
        let _ = (session_id, payload);
    }

    /// End-of-turn `result`.
    fn on_result(&self, session_id: &str, message: &ResultMessage) {
        let _ = (session_id, message);
    }

    /// `can_use_tool` permission request. The handler is responsible for
    /// producing the `control_response` on the bridge socket.
    fn on_permission_request(&self, session_id: &str, request: &ToolUseRequest) {
        let _ = (session_id, request);
    }

    /// Status passthrough for agent-reported states (e.g. `compacting`).
    /// No inbound message currently triggers transitions here beyond the
    /// `system` status notice.
    fn on_status(&self, session_id: &str, status: &str) {
        let _ = (session_id, status);
    }
}

/// Handlers implementation with every hook left at its default.
pub struct NoopHandlers;

impl MessageHandlers for NoopHandlers {}

/// Dispatch one parsed inbound frame.
///
/// Bus emission table:
///
/// | inbound                         | bus event         |
/// |---------------------------------|-------------------|
/// | `system`, `assistant`, unknown  | `session.message` |
/// | `stream_event`, `tool_progress` | `stream.event`    |
/// | `result`                        | `session.result`  |
/// | `control_request` init          | `session.message` |
/// | `control_request` can_use_tool  | (handler only)    |
/// | `keep_alive`                    | (none)            |
pub fn route_message(
    session_id: &str,
    frame: Value,
    handlers: &dyn MessageHandlers,
    emit: &dyn Fn(BusEvent),
) {
    match AgentMessage::from_value(frame) {
        AgentMessage::System(system) => {
            emit(BusEvent::session_message(session_id, system.raw.clone()));
            if system.is_init() {
                handlers.on_system_init(session_id, &system);
            } else if system.subtype == "status" {
                if let Some(status) = system.status.as_deref() {
                    handlers.on_status(session_id, status);
                }
            }
        }
        AgentMessage::Assistant(payload) => {
            emit(BusEvent::session_message(session_id, payload.clone()));
            handlers.on_assistant(session_id, &payload);
        }
        AgentMessage::StreamEvent(payload) | AgentMessage::ToolProgress(payload) => {
            emit(BusEvent::stream_event(session_id, payload.clone()));
            handlers.on_stream_event(session_id, &payload);
        }
        AgentMessage::Result(result) => {
            emit(BusEvent::session_result(session_id, result.raw.clone()));
            handlers.on_result(session_id, &result);
        }
        AgentMessage::ControlRequest(ControlRequest::CanUseTool(request)) => {
            handlers.on_permission_request(session_id, &request);
        }
        AgentMessage::ControlRequest(ControlRequest::Init(system)) => {
            emit(BusEvent::session_message(session_id, system.raw.clone()));
            handlers.on_system_init(session_id, &system);
        }
        AgentMessage::ControlRequest(ControlRequest::Other { subtype, raw }) => {
            warn!(session_id, subtype, "unhandled control_request subtype");
            emit(BusEvent::session_message(session_id, raw));
        }
        AgentMessage::KeepAlive => {}
        AgentMessage::Unknown { message_type, raw } => {
            warn!(session_id, message_type, "forwarding unknown message type");
            emit(BusEvent::session_message(session_id, raw));
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
