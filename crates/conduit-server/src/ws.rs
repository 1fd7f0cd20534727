//! Consumer WebSocket — the external-facing per-session stream.
//!
//! Inbound: `{action:"message", content}` and `{action:"interrupt"}`.
//! Outbound: `connected`, `system_init`, `assistant`, `stream_event`,
//! `result`, `session_status`, `error` frames. Recoverable failures send an
//! `error` frame and keep the connection open; only an unknown session id
//! refuses the connection.

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Path, State};
use axum::response::Response;
use conduit_core::BusEvent;
use conduit_core::events::event_types;
use serde_json::{Value, json};
use tracing::{debug, warn};

use crate::errors::ApiError;
use crate::state::SharedState;

/// `GET /api/sessions/{id}/ws`.
pub async fn session_ws(
    State(state): State<SharedState>,
    Path(session_id): Path<String>,
    upgrade: WebSocketUpgrade,
) -> Result<Response, ApiError> {
    // The only condition that refuses the socket: the session must exist.
    if state.manager.store().get_session(&session_id)?.is_none() {
        return Err(ApiError::not_found(format!("session {session_id}")));
    }
    Ok(upgrade.on_upgrade(move |socket| handle_socket(state, session_id, socket)))
}

/// Translate a bus event into the consumer frame shape.
pub fn consumer_frame(event: &BusEvent) -> Value {
    match event.event_type.as_str() {
        event_types::SESSION_MESSAGE => {
            let message_type = event.data.get("type").and_then(Value::as_str).unwrap_or("");
            let subtype = event.data.get("subtype").and_then(Value::as_str).unwrap_or("");
            let control_subtype = event
                .data
                .get("request")
                .and_then(|r| r.get("subtype"))
                .and_then(Value::as_str)
                .unwrap_or("");
            match (message_type, subtype) {
                ("system", "init") => json!({ "event": "system_init", "data": event.data }),
                ("control_request", _) if control_subtype == "init" => {
                    json!({ "event": "system_init", "data": event.data })
                }
                ("assistant", _) => json!({ "event": "assistant", "data": event.data }),
                // Other passthrough messages ride the stream channel.
                _ => json!({ "event": "stream_event", "data": event.data }),
            }
        }
        event_types::STREAM_EVENT => json!({ "event": "stream_event", "data": event.data }),
        event_types::SESSION_RESULT => json!({ "event": "result", "data": event.data }),
        event_types::SESSION_STATUS => json!({
            "event": "session_status",
            "status": event.data.get("status").cloned().unwrap_or(Value::Null),
        }),
        event_types::SESSION_ERROR => json!({
            "event": "error",
            "message": event.data.get("message").cloned().unwrap_or(Value::Null),
        }),
        event_types::SESSION_CLOSED => json!({ "event": "session_status", "status": "closed" }),
        other => json!({ "event": other, "data": event.data }),
    }
}

fn error_frame(message: &str) -> Value {
    json!({ "event": "error", "message": message })
}

async fn send_json(socket: &mut WebSocket, frame: &Value) -> bool {
    match serde_json::to_string(frame) {
        Ok(text) => socket.send(Message::Text(text.into())).await.is_ok(),
        Err(error) => {
            warn!(%error, "failed to serialize consumer frame");
            true
        }
    }
}

async fn handle_socket(state: SharedState, session_id: String, mut socket: WebSocket) {
    let connected = json!({ "event": "connected", "session_id": session_id });
    if !send_json(&mut socket, &connected).await {
        return;
    }

    let mut subscription = state.manager.bus().subscribe_channel(Some(&session_id));
    loop {
        tokio::select! {
            event = subscription.recv() => {
                match event {
                    Some(event) => {
                        if !send_json(&mut socket, &consumer_frame(&event)).await {
                            break;
                        }
                    }
                    // Bus cleared — the server is shutting down.
                    None => break,
                }
            }
            inbound = socket.recv() => {
                match inbound {
                    Some(Ok(Message::Text(text))) => {
                        if let Some(reply) = handle_action(&state, &session_id, text.as_str()) {
                            if !send_json(&mut socket, &reply).await {
                                break;
                            }
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(_)) => {}
                    Some(Err(error)) => {
                        debug!(session_id, %error, "consumer socket read error");
                        break;
                    }
                }
            }
        }
    }
    debug!(session_id, "consumer socket closed");
}

/// Apply one inbound action frame; returns an error frame for recoverable
/// failures (connection stays open).
fn handle_action(state: &SharedState, session_id: &str, text: &str) -> Option<Value> {
    let frame: Value = match serde_json::from_str(text) {
        Ok(frame) => frame,
        Err(_) => return Some(error_frame("malformed frame: expected JSON object")),
    };
    let action = frame.get("action").and_then(Value::as_str).unwrap_or("");
    match action {
        "message" => {
            let content = frame.get("content").and_then(Value::as_str).unwrap_or("");
            match state.manager.send_message(session_id, content) {
                Ok(()) => None,
                Err(error) => Some(error_frame(&error.to_string())),
            }
        }
        "interrupt" => match state.manager.interrupt(session_id) {
            Ok(()) => None,
            Err(error) => Some(error_frame(&error.to_string())),
        },
        other => Some(error_frame(&format!("unknown action '{other}'"))),
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn system_init_maps_to_system_init() {
        let event = BusEvent::session_message("s1", json!({"type": "system", "subtype": "init"}));
        assert_eq!(consumer_frame(&event)["event"], "system_init");
    }

    #[test]
    fn assistant_maps_to_assistant() {
        let event = BusEvent::session_message("s1", json!({"type": "assistant", "message": {}}));
        let frame = consumer_frame(&event);
        assert_eq!(frame["event"], "assistant");
        assert_eq!(frame["data"]["type"], "assistant");
    }

    #[test]
    fn unknown_session_message_rides_stream_channel() {
        let event = BusEvent::session_message("s1", json!({"type": "telemetry"}));
        assert_eq!(consumer_frame(&event)["event"], "stream_event");
    }

    #[test]
    fn stream_and_result_mapping() {
        let stream = BusEvent::stream_event("s1", json!({"delta": "x"}));
        assert_eq!(consumer_frame(&stream)["event"], "stream_event");

        let result = BusEvent::session_result("s1", json!({"total_cost_usd": 0.1}));
        let frame = consumer_frame(&result);
        assert_eq!(frame["event"], "result");
        assert_eq!(frame["data"]["total_cost_usd"], 0.1);
    }

    #[test]
    fn status_error_and_closed_mapping() {
        let status = BusEvent::session_status("s1", "active");
        let frame = consumer_frame(&status);
        assert_eq!(frame["event"], "session_status");
        assert_eq!(frame["status"], "active");

        let error = BusEvent::session_error("s1", "unexpected_exit", "agent died");
        let frame = consumer_frame(&error);
        assert_eq!(frame["event"], "error");
        assert_eq!(frame["message"], "agent died");

        let closed = BusEvent::session_closed("s1");
        let frame = consumer_frame(&closed);
        assert_eq!(frame["event"], "session_status");
        assert_eq!(frame["status"], "closed");
    }
}
