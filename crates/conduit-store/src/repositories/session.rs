//! Session repository — lifecycle rows for agent subprocesses.

use conduit_core::SessionStatus;
use rusqlite::{Connection, OptionalExtension, params};

use crate::errors::Result;
use crate::row_types::SessionRow;

/// Fields for creating a session row.
pub struct NewSession<'a> {
    /// Conduit session id (caller-generated UUID).
    pub id: &'a str,
    /// Owning project.
    pub project_id: &'a str,
    /// Display name.
    pub name: &'a str,
    /// Model string passed to the agent.
    pub model: Option<&'a str>,
    /// Allocated bridge port.
    pub ws_port: u16,
}

/// Session repository.
pub struct SessionRepo;

const SELECT_COLUMNS: &str = "id, project_id, agent_session_id, name, status, model, cli_pid,
     ws_port, total_cost_usd, total_input_tokens, total_output_tokens, num_turns,
     error_message, created_at, last_active_at, closed_at";

fn map_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<SessionRow> {
    Ok(SessionRow {
        id: row.get(0)?,
        project_id: row.get(1)?,
        agent_session_id: row.get(2)?,
        name: row.get(3)?,
        status: row.get(4)?,
        model: row.get(5)?,
        cli_pid: row.get(6)?,
        ws_port: row.get(7)?,
        total_cost_usd: row.get(8)?,
        total_input_tokens: row.get(9)?,
        total_output_tokens: row.get(10)?,
        num_turns: row.get(11)?,
        error_message: row.get(12)?,
        created_at: row.get(13)?,
        last_active_at: row.get(14)?,
        closed_at: row.get(15)?,
    })
}

impl SessionRepo {
    /// Insert a session row in `starting` status.
    pub fn create(conn: &Connection, opts: &NewSession<'_>) -> Result<SessionRow> {
        let now = chrono::Utc::now().to_rfc3339();
        let _ = conn.execute(
            "INSERT INTO sessions (id, project_id, name, status, model, ws_port,
                                   created_at, last_active_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                opts.id,
                opts.project_id,
                opts.name,
                SessionStatus::Starting.as_str(),
                opts.model,
                opts.ws_port,
                now,
                now
            ],
        )?;
        Ok(SessionRow {
            id: opts.id.to_string(),
            project_id: opts.project_id.to_string(),
            agent_session_id: String::new(),
            name: opts.name.to_string(),
            status: SessionStatus::Starting.as_str().to_string(),
            model: opts.model.map(String::from),
            cli_pid: None,
            ws_port: Some(i64::from(opts.ws_port)),
            total_cost_usd: 0.0,
            total_input_tokens: 0,
            total_output_tokens: 0,
            num_turns: 0,
            error_message: None,
            created_at: now.clone(),
            last_active_at: now,
            closed_at: None,
        })
    }

    /// Get a session by id.
    pub fn get_by_id(conn: &Connection, session_id: &str) -> Result<Option<SessionRow>> {
        let row = conn
            .query_row(
                &format!("SELECT {SELECT_COLUMNS} FROM sessions WHERE id = ?1"),
                params![session_id],
                map_row,
            )
            .optional()?;
        Ok(row)
    }

    /// List sessions, optionally scoped to a project, newest first.
    pub fn list(conn: &Connection, project_id: Option<&str>) -> Result<Vec<SessionRow>> {
        let rows = match project_id {
            Some(pid) => {
                let mut stmt = conn.prepare(&format!(
                    "SELECT {SELECT_COLUMNS} FROM sessions WHERE project_id = ?1
                     ORDER BY created_at DESC"
                ))?;
                stmt.query_map(params![pid], map_row)?
                    .collect::<std::result::Result<Vec<_>, _>>()?
            }
            None => {
                let mut stmt = conn.prepare(&format!(
                    "SELECT {SELECT_COLUMNS} FROM sessions ORDER BY created_at DESC"
                ))?;
                stmt.query_map([], map_row)?
                    .collect::<std::result::Result<Vec<_>, _>>()?
            }
        };
        Ok(rows)
    }

    /// Sessions whose persisted status is not `closed` (orphan-cleanup scan).
    pub fn list_unclosed(conn: &Connection) -> Result<Vec<SessionRow>> {
        let mut stmt = conn.prepare(&format!(
            "SELECT {SELECT_COLUMNS} FROM sessions WHERE status != 'closed'
             ORDER BY created_at ASC"
        ))?;
        let rows = stmt
            .query_map([], map_row)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    /// Set the lifecycle status. Returns `true` if the row existed.
    pub fn set_status(conn: &Connection, session_id: &str, status: SessionStatus) -> Result<bool> {
        let now = chrono::Utc::now().to_rfc3339();
        let changed = conn.execute(
            "UPDATE sessions SET status = ?1, last_active_at = ?2 WHERE id = ?3",
            params![status.as_str(), now, session_id],
        )?;
        Ok(changed > 0)
    }

    /// Record the subprocess PID.
    pub fn set_pid(conn: &Connection, session_id: &str, pid: u32) -> Result<bool> {
        let changed = conn.execute(
            "UPDATE sessions SET cli_pid = ?1 WHERE id = ?2",
            params![i64::from(pid), session_id],
        )?;
        Ok(changed > 0)
    }

    /// Capture the agent-assigned session id from the handshake.
    ///
    /// Once observed the id is never overwritten: the UPDATE only applies
    /// while the stored value is still empty.
    pub fn set_agent_session_id(
        conn: &Connection,
        session_id: &str,
        agent_session_id: &str,
    ) -> Result<bool> {
        let changed = conn.execute(
            "UPDATE sessions SET agent_session_id = ?1
             WHERE id = ?2 AND agent_session_id = ''",
            params![agent_session_id, session_id],
        )?;
        Ok(changed > 0)
    }

    /// Apply a `result` message atomically.
    ///
    /// Cost and token counters are SET (the protocol reports cumulative
    /// totals), `num_turns` is incremented, and the session returns to
    /// `idle` — all in one statement.
    pub fn record_result(
        conn: &Connection,
        session_id: &str,
        total_cost_usd: f64,
        input_tokens: u64,
        output_tokens: u64,
    ) -> Result<bool> {
        let now = chrono::Utc::now().to_rfc3339();
        let changed = conn.execute(
            "UPDATE sessions
             SET total_cost_usd = ?1,
                 total_input_tokens = ?2,
                 total_output_tokens = ?3,
                 num_turns = num_turns + 1,
                 status = 'idle',
                 last_active_at = ?4
             WHERE id = ?5",
            params![
                total_cost_usd,
                input_tokens as i64,
                output_tokens as i64,
                now,
                session_id
            ],
        )?;
        Ok(changed > 0)
    }

    /// Transition to terminal `error`, releasing the port and PID columns.
    ///
    /// `closed_at` and `error_message` only fill if not already set, which
    /// keeps repeated cleanup passes idempotent and preserves the first
    /// recorded failure.
    pub fn mark_error(conn: &Connection, session_id: &str, message: &str) -> Result<bool> {
        let now = chrono::Utc::now().to_rfc3339();
        let changed = conn.execute(
            "UPDATE sessions
             SET status = 'error',
                 error_message = COALESCE(error_message, ?1),
                 closed_at = COALESCE(closed_at, ?2),
                 ws_port = NULL,
                 cli_pid = NULL
             WHERE id = ?3",
            params![message, now, session_id],
        )?;
        Ok(changed > 0)
    }

    /// Transition to terminal `closed`, releasing the port and PID columns.
    pub fn mark_closed(conn: &Connection, session_id: &str) -> Result<bool> {
        let now = chrono::Utc::now().to_rfc3339();
        let changed = conn.execute(
            "UPDATE sessions
             SET status = 'closed',
                 closed_at = COALESCE(closed_at, ?1),
                 ws_port = NULL,
                 cli_pid = NULL
             WHERE id = ?2",
            params![now, session_id],
        )?;
        Ok(changed > 0)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
