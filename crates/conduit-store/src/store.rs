//! High-level `Store` facade over the connection pool and repositories.
//!
//! All callers outside this crate go through `Store`; it owns busy-retry
//! (linear backoff + jitter) so concurrent writers on the same database do
//! not surface transient `SQLITE_BUSY` failures.

use std::path::Path;
use std::time::Duration;

use conduit_core::SessionStatus;
use serde_json::{Map, Value};

use crate::connection::{ConnectionPool, PooledConnection, open_in_memory_pool, open_pool};
use crate::errors::Result;
use crate::migrations::run_migrations;
use crate::repositories::{
    MessageRepo, NewLogEntry, NewProject, NewRule, NewSession, PermissionLogRepo,
    PermissionRuleRepo, ProjectRepo, SessionRepo,
};
use crate::row_types::{
    MessageDirection, MessageRow, PermissionLogRow, PermissionRuleRow, ProjectRow, SessionRow,
};

/// Persistent store for projects, sessions, transcripts, and permissions.
pub struct Store {
    pool: ConnectionPool,
}

impl Store {
    const BUSY_MAX_RETRIES: u32 = 16;

    /// Open (and migrate) a database file.
    pub fn open(path: &Path) -> Result<Self> {
        let pool = open_pool(path)?;
        run_migrations(&*pool.get()?)?;
        Ok(Self { pool })
    }

    /// Open (and migrate) an in-memory database. Used by tests.
    pub fn open_in_memory() -> Result<Self> {
        let pool = open_in_memory_pool()?;
        run_migrations(&*pool.get()?)?;
        Ok(Self { pool })
    }

    fn conn(&self) -> Result<PooledConnection> {
        Ok(self.pool.get()?)
    }

    /// Retry an operation on `SQLite` BUSY/LOCKED with linear backoff + jitter.
    fn retry_on_busy<T>(&self, mut f: impl FnMut(&PooledConnection) -> Result<T>) -> Result<T> {
        let mut attempts = 0;
        loop {
            let conn = self.conn()?;
            match f(&conn) {
                Ok(value) => return Ok(value),
                Err(err) if err.is_busy() && attempts < Self::BUSY_MAX_RETRIES => {
                    attempts += 1;
                    let base_ms = u64::from(attempts).saturating_mul(10).min(250);
                    let jitter = rand::random::<u64>() % (base_ms / 2 + 1);
                    std::thread::sleep(Duration::from_millis(base_ms / 2 + jitter));
                }
                Err(err) => return Err(err),
            }
        }
    }

    // ─────────────────────────────────────────────────────────────────────
    // Projects (read-mostly; creation is for the import collaborator)
    // ─────────────────────────────────────────────────────────────────────

    /// Insert a project row.
    pub fn create_project(&self, opts: &NewProject<'_>) -> Result<ProjectRow> {
        self.retry_on_busy(|conn| ProjectRepo::create(conn, opts))
    }

    /// Get a project by id.
    pub fn get_project(&self, project_id: &str) -> Result<Option<ProjectRow>> {
        self.retry_on_busy(|conn| ProjectRepo::get_by_id(conn, project_id))
    }

    /// List all projects.
    pub fn list_projects(&self) -> Result<Vec<ProjectRow>> {
        self.retry_on_busy(|conn| ProjectRepo::list(conn))
    }

    // ─────────────────────────────────────────────────────────────────────
    // Sessions
    // ─────────────────────────────────────────────────────────────────────

    /// Insert a session row in `starting` status.
    pub fn create_session(&self, opts: &NewSession<'_>) -> Result<SessionRow> {
        self.retry_on_busy(|conn| SessionRepo::create(conn, opts))
    }

    /// Get a session by id.
    pub fn get_session(&self, session_id: &str) -> Result<Option<SessionRow>> {
        self.retry_on_busy(|conn| SessionRepo::get_by_id(conn, session_id))
    }

    /// List sessions, optionally scoped to a project.
    pub fn list_sessions(&self, project_id: Option<&str>) -> Result<Vec<SessionRow>> {
        self.retry_on_busy(|conn| SessionRepo::list(conn, project_id))
    }

    /// Sessions whose persisted status is not `closed`.
    pub fn list_unclosed_sessions(&self) -> Result<Vec<SessionRow>> {
        self.retry_on_busy(|conn| SessionRepo::list_unclosed(conn))
    }

    /// Set a session's lifecycle status.
    pub fn set_session_status(&self, session_id: &str, status: SessionStatus) -> Result<bool> {
        self.retry_on_busy(|conn| SessionRepo::set_status(conn, session_id, status))
    }

    /// Record the subprocess PID.
    pub fn set_session_pid(&self, session_id: &str, pid: u32) -> Result<bool> {
        self.retry_on_busy(|conn| SessionRepo::set_pid(conn, session_id, pid))
    }

    /// Capture the agent-assigned session id (first observation wins).
    pub fn set_agent_session_id(&self, session_id: &str, agent_session_id: &str) -> Result<bool> {
        self.retry_on_busy(|conn| SessionRepo::set_agent_session_id(conn, session_id, agent_session_id))
    }

    /// Apply a `result` message atomically (SET totals, bump turns, idle).
    pub fn record_result(
        &self,
        session_id: &str,
        total_cost_usd: f64,
        input_tokens: u64,
        output_tokens: u64,
    ) -> Result<bool> {
        self.retry_on_busy(|conn| {
            SessionRepo::record_result(conn, session_id, total_cost_usd, input_tokens, output_tokens)
        })
    }

    /// Transition a session to terminal `error`.
    pub fn mark_session_error(&self, session_id: &str, message: &str) -> Result<bool> {
        self.retry_on_busy(|conn| SessionRepo::mark_error(conn, session_id, message))
    }

    /// Transition a session to terminal `closed`.
    pub fn mark_session_closed(&self, session_id: &str) -> Result<bool> {
        self.retry_on_busy(|conn| SessionRepo::mark_closed(conn, session_id))
    }

    // ─────────────────────────────────────────────────────────────────────
    // Message transcript
    // ─────────────────────────────────────────────────────────────────────

    /// Append one frame to a session's transcript.
    pub fn append_message(
        &self,
        session_id: &str,
        direction: MessageDirection,
        message_type: &str,
        payload: &Value,
    ) -> Result<MessageRow> {
        self.retry_on_busy(|conn| {
            MessageRepo::append(conn, session_id, direction, message_type, payload)
        })
    }

    /// List a session's transcript.
    pub fn list_messages(&self, session_id: &str, limit: Option<usize>) -> Result<Vec<MessageRow>> {
        self.retry_on_busy(|conn| MessageRepo::list_by_session(conn, session_id, limit))
    }

    // ─────────────────────────────────────────────────────────────────────
    // Permission rules + audit log
    // ─────────────────────────────────────────────────────────────────────

    /// Insert a permission rule.
    pub fn create_rule(&self, opts: &NewRule<'_>) -> Result<PermissionRuleRow> {
        self.retry_on_busy(|conn| PermissionRuleRepo::create(conn, opts))
    }

    /// Get a rule by id.
    pub fn get_rule(&self, rule_id: &str) -> Result<Option<PermissionRuleRow>> {
        self.retry_on_busy(|conn| PermissionRuleRepo::get_by_id(conn, rule_id))
    }

    /// Project-scoped rules, highest priority first.
    pub fn list_project_rules(&self, project_id: &str) -> Result<Vec<PermissionRuleRow>> {
        self.retry_on_busy(|conn| PermissionRuleRepo::list_for_project(conn, project_id))
    }

    /// Global rules, highest priority first.
    pub fn list_global_rules(&self) -> Result<Vec<PermissionRuleRow>> {
        self.retry_on_busy(|conn| PermissionRuleRepo::list_global(conn))
    }

    /// Apply an update payload to a rule (mutable-column allowlist applies).
    pub fn update_rule(
        &self,
        rule_id: &str,
        changes: &Map<String, Value>,
    ) -> Result<Option<PermissionRuleRow>> {
        self.retry_on_busy(|conn| PermissionRuleRepo::update(conn, rule_id, changes))
    }

    /// Delete a rule.
    pub fn delete_rule(&self, rule_id: &str) -> Result<bool> {
        self.retry_on_busy(|conn| PermissionRuleRepo::delete(conn, rule_id))
    }

    /// Append one permission audit entry.
    pub fn append_permission_log(&self, entry: &NewLogEntry<'_>) -> Result<PermissionLogRow> {
        self.retry_on_busy(|conn| PermissionLogRepo::append(conn, entry))
    }

    /// List a session's audit entries.
    pub fn list_permission_log(&self, session_id: &str) -> Result<Vec<PermissionLogRow>> {
        self.retry_on_busy(|conn| PermissionLogRepo::list_by_session(conn, session_id))
    }

    /// Count a session's audit entries.
    pub fn count_permission_log(&self, session_id: &str) -> Result<i64> {
        self.retry_on_busy(|conn| PermissionLogRepo::count_by_session(conn, session_id))
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
#[allow(unused_results)]
mod tests {
    use super::*;

    fn seeded() -> (Store, String, String) {
        let store = Store::open_in_memory().unwrap();
        let project = store
            .create_project(&NewProject {
                name: "P",
                folder_path: "/tmp/p",
                default_model: Some("sonnet"),
                default_permission_mode: None,
                system_prompt: None,
                append_system_prompt: None,
            })
            .unwrap();
        let session = store
            .create_session(&NewSession {
                id: "s1",
                project_id: &project.id,
                name: "session",
                model: Some("sonnet"),
                ws_port: 9300,
            })
            .unwrap();
        (store, project.id, session.id)
    }

    #[test]
    fn open_on_disk_and_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("conduit.db");
        {
            let store = Store::open(&path).unwrap();
            store
                .create_project(&NewProject {
                    name: "P",
                    folder_path: "/tmp/p",
                    default_model: None,
                    default_permission_mode: None,
                    system_prompt: None,
                    append_system_prompt: None,
                })
                .unwrap();
        }
        let store = Store::open(&path).unwrap();
        assert_eq!(store.list_projects().unwrap().len(), 1);
    }

    #[test]
    fn session_lifecycle_through_facade() {
        let (store, _project_id, session_id) = seeded();

        assert!(store.set_session_status(&session_id, SessionStatus::Idle).unwrap());
        assert!(store.record_result(&session_id, 0.05, 100, 50).unwrap());
        let row = store.get_session(&session_id).unwrap().unwrap();
        assert_eq!(row.num_turns, 1);
        assert_eq!(row.status, "idle");

        assert!(store.mark_session_closed(&session_id).unwrap());
        let row = store.get_session(&session_id).unwrap().unwrap();
        assert_eq!(row.status, "closed");
        assert!(row.closed_at.is_some());
    }

    #[test]
    fn transcript_and_audit_round_trip() {
        let (store, _project_id, session_id) = seeded();

        store
            .append_message(
                &session_id,
                MessageDirection::Outbound,
                "user",
                &serde_json::json!({"type": "user"}),
            )
            .unwrap();
        assert_eq!(store.list_messages(&session_id, None).unwrap().len(), 1);

        store
            .append_permission_log(&NewLogEntry {
                session_id: &session_id,
                request_id: "r1",
                tool_name: "Bash",
                tool_input: "{}",
                decision: "allow",
                decision_source: "auto_default",
                rule_id: None,
                decided_by: "conduit",
            })
            .unwrap();
        assert_eq!(store.count_permission_log(&session_id).unwrap(), 1);
    }

    #[test]
    fn rule_crud_through_facade() {
        let (store, project_id, _session_id) = seeded();

        let rule = store
            .create_rule(&NewRule {
                project_id: Some(&project_id),
                tool_name: "Bash",
                rule_content: "rm -rf *",
                behavior: "deny",
                priority: 10,
            })
            .unwrap();
        assert_eq!(store.list_project_rules(&project_id).unwrap().len(), 1);
        assert!(store.list_global_rules().unwrap().is_empty());

        let changes = serde_json::json!({"priority": 20});
        let updated = store
            .update_rule(&rule.id, changes.as_object().unwrap())
            .unwrap()
            .unwrap();
        assert_eq!(updated.priority, 20);

        assert!(store.delete_rule(&rule.id).unwrap());
        assert!(store.get_rule(&rule.id).unwrap().is_none());
    }
}
