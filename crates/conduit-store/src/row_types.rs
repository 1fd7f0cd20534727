//! Row types returned by repositories.
//!
//! Fields mirror the table columns; timestamps are RFC 3339 strings as
//! persisted. API serialization uses camelCase.

use conduit_core::SessionStatus;
use serde::Serialize;
use serde_json::Value;

/// A row of the `projects` table. Read-only to the core.
#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProjectRow {
    /// Project id.
    pub id: String,
    /// Display name.
    pub name: String,
    /// Absolute path of the project folder (agent working directory).
    pub folder_path: String,
    /// Default model for new sessions.
    pub default_model: Option<String>,
    /// Default permission mode for new sessions.
    pub default_permission_mode: Option<String>,
    /// System prompt override.
    pub system_prompt: Option<String>,
    /// Appended system prompt.
    pub append_system_prompt: Option<String>,
    /// Creation timestamp.
    pub created_at: String,
}

/// A row of the `sessions` table.
#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionRow {
    /// Conduit session id (UUID).
    pub id: String,
    /// Owning project.
    pub project_id: String,
    /// Agent-assigned session id; empty until the handshake, never
    /// overwritten once observed.
    pub agent_session_id: String,
    /// Display name.
    pub name: String,
    /// Lifecycle status string (see [`SessionStatus`]).
    pub status: String,
    /// Model string passed to the agent.
    pub model: Option<String>,
    /// Subprocess PID while live.
    pub cli_pid: Option<i64>,
    /// Allocated bridge port while not terminal.
    pub ws_port: Option<i64>,
    /// Cumulative session cost (SET from each `result`, never summed).
    pub total_cost_usd: f64,
    /// Cumulative input tokens.
    pub total_input_tokens: i64,
    /// Cumulative output tokens.
    pub total_output_tokens: i64,
    /// Completed turn count.
    pub num_turns: i64,
    /// Failure detail for `error` sessions.
    pub error_message: Option<String>,
    /// Creation timestamp.
    pub created_at: String,
    /// Last activity timestamp.
    pub last_active_at: String,
    /// Set iff status is terminal.
    pub closed_at: Option<String>,
}

impl SessionRow {
    /// Typed view of the status column.
    pub fn status(&self) -> Option<SessionStatus> {
        SessionStatus::parse(&self.status)
    }
}

/// Transcript direction.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MessageDirection {
    /// Agent → Conduit frame.
    Inbound,
    /// Conduit → agent frame.
    Outbound,
}

impl MessageDirection {
    /// Persisted column value.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Inbound => "inbound",
            Self::Outbound => "outbound",
        }
    }
}

/// A row of the `messages` transcript table.
#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageRow {
    /// Message id.
    pub id: String,
    /// Owning session.
    pub session_id: String,
    /// `inbound` or `outbound`.
    pub direction: String,
    /// Wire `type` tag of the frame.
    pub message_type: String,
    /// Raw frame JSON (text column).
    pub payload: String,
    /// Creation timestamp.
    pub created_at: String,
}

impl MessageRow {
    /// Parse the payload column back into JSON.
    pub fn payload_value(&self) -> Option<Value> {
        serde_json::from_str(&self.payload).ok()
    }
}

/// A row of the `permission_rules` table.
#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PermissionRuleRow {
    /// Rule id.
    pub id: String,
    /// Owning project; `None` = global rule.
    pub project_id: Option<String>,
    /// Tool this rule applies to; `*` = any tool.
    pub tool_name: String,
    /// Match pattern; empty = match any input.
    pub rule_content: String,
    /// `allow` or `deny`.
    pub behavior: String,
    /// Evaluation priority (highest first within a bucket).
    pub priority: i64,
    /// Creation timestamp.
    pub created_at: String,
}

/// A row of the append-only `permission_log` audit table.
#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PermissionLogRow {
    /// Log entry id.
    pub id: String,
    /// Session the decision was made for.
    pub session_id: String,
    /// Correlation id of the control request.
    pub request_id: String,
    /// Tool that was requested.
    pub tool_name: String,
    /// Tool input, canonical JSON text.
    pub tool_input: String,
    /// `allow` or `deny`.
    pub decision: String,
    /// `auto_rule` or `auto_default`.
    pub decision_source: String,
    /// Matched rule, when decision_source is `auto_rule`.
    pub rule_id: Option<String>,
    /// Deciding principal.
    pub decided_by: String,
    /// Decision timestamp.
    pub decided_at: String,
}
