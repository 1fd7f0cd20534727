//! Permission audit log repository — append-only.

use rusqlite::{Connection, params};
use uuid::Uuid;

use crate::errors::Result;
use crate::row_types::PermissionLogRow;

/// Fields for one audit entry.
pub struct NewLogEntry<'a> {
    /// Session the decision was made for.
    pub session_id: &'a str,
    /// Correlation id of the control request.
    pub request_id: &'a str,
    /// Tool that was requested.
    pub tool_name: &'a str,
    /// Canonical JSON text of the tool input.
    pub tool_input: &'a str,
    /// `allow` or `deny`.
    pub decision: &'a str,
    /// `auto_rule` or `auto_default`.
    pub decision_source: &'a str,
    /// Matched rule id, if any.
    pub rule_id: Option<&'a str>,
    /// Deciding principal.
    pub decided_by: &'a str,
}

/// Permission audit log repository.
pub struct PermissionLogRepo;

const SELECT_COLUMNS: &str = "id, session_id, request_id, tool_name, tool_input, decision,
     decision_source, rule_id, decided_by, decided_at";

fn map_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<PermissionLogRow> {
    Ok(PermissionLogRow {
        id: row.get(0)?,
        session_id: row.get(1)?,
        request_id: row.get(2)?,
        tool_name: row.get(3)?,
        tool_input: row.get(4)?,
        decision: row.get(5)?,
        decision_source: row.get(6)?,
        rule_id: row.get(7)?,
        decided_by: row.get(8)?,
        decided_at: row.get(9)?,
    })
}

impl PermissionLogRepo {
    /// Append one audit entry.
    pub fn append(conn: &Connection, entry: &NewLogEntry<'_>) -> Result<PermissionLogRow> {
        let id = format!("plog_{}", Uuid::now_v7());
        let now = chrono::Utc::now().to_rfc3339();
        let _ = conn.execute(
            "INSERT INTO permission_log (id, session_id, request_id, tool_name, tool_input,
                                         decision, decision_source, rule_id, decided_by, decided_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
            params![
                id,
                entry.session_id,
                entry.request_id,
                entry.tool_name,
                entry.tool_input,
                entry.decision,
                entry.decision_source,
                entry.rule_id,
                entry.decided_by,
                now
            ],
        )?;
        Ok(PermissionLogRow {
            id,
            session_id: entry.session_id.to_string(),
            request_id: entry.request_id.to_string(),
            tool_name: entry.tool_name.to_string(),
            tool_input: entry.tool_input.to_string(),
            decision: entry.decision.to_string(),
            decision_source: entry.decision_source.to_string(),
            rule_id: entry.rule_id.map(String::from),
            decided_by: entry.decided_by.to_string(),
            decided_at: now,
        })
    }

    /// List a session's audit entries in decision order.
    pub fn list_by_session(conn: &Connection, session_id: &str) -> Result<Vec<PermissionLogRow>> {
        let mut stmt = conn.prepare(&format!(
            "SELECT {SELECT_COLUMNS} FROM permission_log WHERE session_id = ?1 ORDER BY rowid ASC"
        ))?;
        let rows = stmt
            .query_map(params![session_id], map_row)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    /// Count audit entries for a session.
    pub fn count_by_session(conn: &Connection, session_id: &str) -> Result<i64> {
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM permission_log WHERE session_id = ?1",
            params![session_id],
            |row| row.get(0),
        )?;
        Ok(count)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
