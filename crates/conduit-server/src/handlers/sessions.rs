//! Session handlers: create, list, get, kill, message, interrupt, history.

use axum::Json;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use serde::Deserialize;
use serde_json::{Value, json};

use conduit_runtime::CreateSessionRequest;

use crate::errors::ApiError;
use crate::state::SharedState;

/// Body of `POST /api/sessions`.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateSessionBody {
    /// Owning project.
    pub project_id: String,
    /// Display name.
    pub name: String,
    /// Model override.
    #[serde(default)]
    pub model: Option<String>,
    /// Permission mode override.
    #[serde(default)]
    pub permission_mode: Option<String>,
    /// Agent session id to resume.
    #[serde(default)]
    pub resume_session_id: Option<String>,
    /// Fork instead of continuing the resumed session.
    #[serde(default)]
    pub fork_session: bool,
}

/// Query of the list endpoints.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListQuery {
    /// Scope to one project.
    #[serde(default)]
    pub project_id: Option<String>,
    /// Tail limit for transcript reads.
    #[serde(default)]
    pub limit: Option<usize>,
}

/// Body of `POST /api/sessions/{id}/message`.
#[derive(Debug, Deserialize)]
pub struct MessageBody {
    /// Message text for the agent.
    pub content: String,
}

/// `POST /api/sessions` — spawn a session.
pub async fn create(
    State(state): State<SharedState>,
    Json(body): Json<CreateSessionBody>,
) -> Result<(StatusCode, Json<Value>), ApiError> {
    let row = state
        .manager
        .create(CreateSessionRequest {
            project_id: body.project_id,
            name: body.name,
            model: body.model,
            permission_mode: body.permission_mode,
            resume_session_id: body.resume_session_id,
            fork_session: body.fork_session,
        })
        .await?;
    Ok((StatusCode::CREATED, Json(json!({ "session": row }))))
}

/// `GET /api/sessions` — list sessions, optionally by project.
pub async fn list(
    State(state): State<SharedState>,
    Query(query): Query<ListQuery>,
) -> Result<Json<Value>, ApiError> {
    let rows = state.manager.store().list_sessions(query.project_id.as_deref())?;
    Ok(Json(json!({ "sessions": rows })))
}

/// `GET /api/sessions/{id}`.
pub async fn get(
    State(state): State<SharedState>,
    Path(session_id): Path<String>,
) -> Result<Json<Value>, ApiError> {
    let row = state
        .manager
        .store()
        .get_session(&session_id)?
        .ok_or_else(|| ApiError::not_found(format!("session {session_id}")))?;
    Ok(Json(json!({
        "session": row,
        "running": state.manager.is_running(&session_id),
        "connected": state.manager.is_connected(&session_id),
    })))
}

/// `DELETE /api/sessions/{id}` — terminate.
pub async fn kill(
    State(state): State<SharedState>,
    Path(session_id): Path<String>,
) -> Result<Json<Value>, ApiError> {
    let row = state.manager.kill(&session_id).await?;
    Ok(Json(json!({ "session": row })))
}

/// `POST /api/sessions/{id}/message` — send one user turn.
pub async fn message(
    State(state): State<SharedState>,
    Path(session_id): Path<String>,
    Json(body): Json<MessageBody>,
) -> Result<(StatusCode, Json<Value>), ApiError> {
    state.manager.send_message(&session_id, &body.content)?;
    Ok((StatusCode::ACCEPTED, Json(json!({ "status": "sent" }))))
}

/// `POST /api/sessions/{id}/interrupt`.
pub async fn interrupt(
    State(state): State<SharedState>,
    Path(session_id): Path<String>,
) -> Result<(StatusCode, Json<Value>), ApiError> {
    state.manager.interrupt(&session_id)?;
    Ok((StatusCode::ACCEPTED, Json(json!({ "status": "interrupted" }))))
}

/// `GET /api/sessions/{id}/messages` — transcript history.
pub async fn messages(
    State(state): State<SharedState>,
    Path(session_id): Path<String>,
    Query(query): Query<ListQuery>,
) -> Result<Json<Value>, ApiError> {
    let store = state.manager.store();
    if store.get_session(&session_id)?.is_none() {
        return Err(ApiError::not_found(format!("session {session_id}")));
    }
    let rows = store.list_messages(&session_id, query.limit)?;
    let messages: Vec<Value> = rows
        .into_iter()
        .map(|row| {
            let payload = row.payload_value().unwrap_or(Value::Null);
            json!({
                "id": row.id,
                "sessionId": row.session_id,
                "direction": row.direction,
                "messageType": row.message_type,
                "payload": payload,
                "createdAt": row.created_at,
            })
        })
        .collect();
    Ok(Json(json!({ "messages": messages })))
}
