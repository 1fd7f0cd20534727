//! Permission rule and audit-log handlers.

use axum::Json;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use serde::Deserialize;
use serde_json::{Map, Value, json};

use conduit_store::NewRule;

use crate::errors::ApiError;
use crate::state::SharedState;

/// Body of `POST /api/permissions/rules`.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateRuleBody {
    /// Owning project; omitted = global rule.
    #[serde(default)]
    pub project_id: Option<String>,
    /// Tool name, `*` for any.
    pub tool_name: String,
    /// Match pattern; empty matches any input.
    #[serde(default)]
    pub rule_content: String,
    /// `allow` or `deny`.
    pub behavior: String,
    /// Evaluation priority.
    #[serde(default)]
    pub priority: i64,
}

/// Query of the rule/log list endpoints.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RuleQuery {
    /// Project scope; omitted lists global rules.
    #[serde(default)]
    pub project_id: Option<String>,
    /// Session scope for the audit log.
    #[serde(default)]
    pub session_id: Option<String>,
}

/// `GET /api/permissions/rules` — project rules with `?projectId=`, global
/// rules otherwise.
pub async fn list(
    State(state): State<SharedState>,
    Query(query): Query<RuleQuery>,
) -> Result<Json<Value>, ApiError> {
    let store = state.manager.store();
    let rules = match query.project_id.as_deref() {
        Some(project_id) => store.list_project_rules(project_id)?,
        None => store.list_global_rules()?,
    };
    Ok(Json(json!({ "rules": rules })))
}

/// `POST /api/permissions/rules`.
pub async fn create(
    State(state): State<SharedState>,
    Json(body): Json<CreateRuleBody>,
) -> Result<(StatusCode, Json<Value>), ApiError> {
    if body.tool_name.is_empty() {
        return Err(ApiError::validation("toolName must not be empty"));
    }
    if let Some(project_id) = body.project_id.as_deref() {
        if state.manager.store().get_project(project_id)?.is_none() {
            return Err(ApiError::not_found(format!("project {project_id}")));
        }
    }
    let rule = state.manager.store().create_rule(&NewRule {
        project_id: body.project_id.as_deref(),
        tool_name: &body.tool_name,
        rule_content: &body.rule_content,
        behavior: &body.behavior,
        priority: body.priority,
    })?;
    Ok((StatusCode::CREATED, Json(json!({ "rule": rule }))))
}

/// `PATCH /api/permissions/rules/{id}` — only `tool_name`, `rule_content`,
/// `behavior`, and `priority` are applied; other payload keys are silently
/// ignored.
pub async fn update(
    State(state): State<SharedState>,
    Path(rule_id): Path<String>,
    Json(changes): Json<Map<String, Value>>,
) -> Result<Json<Value>, ApiError> {
    let rule = state
        .manager
        .store()
        .update_rule(&rule_id, &changes)?
        .ok_or_else(|| ApiError::not_found(format!("rule {rule_id}")))?;
    Ok(Json(json!({ "rule": rule })))
}

/// `DELETE /api/permissions/rules/{id}`.
pub async fn delete(
    State(state): State<SharedState>,
    Path(rule_id): Path<String>,
) -> Result<Json<Value>, ApiError> {
    if !state.manager.store().delete_rule(&rule_id)? {
        return Err(ApiError::not_found(format!("rule {rule_id}")));
    }
    Ok(Json(json!({ "deleted": true })))
}

/// `GET /api/permissions/log?sessionId=` — a session's audit trail.
pub async fn log(
    State(state): State<SharedState>,
    Query(query): Query<RuleQuery>,
) -> Result<Json<Value>, ApiError> {
    let session_id = query
        .session_id
        .as_deref()
        .ok_or_else(|| ApiError::validation("sessionId query parameter is required"))?;
    let entries = state.manager.store().list_permission_log(session_id)?;
    Ok(Json(json!({ "entries": entries })))
}
