//! Message transcript repository — append-only per-session frame log.

use rusqlite::{Connection, params};
use serde_json::Value;
use uuid::Uuid;

use crate::errors::Result;
use crate::row_types::{MessageDirection, MessageRow};

/// Message transcript repository.
pub struct MessageRepo;

const SELECT_COLUMNS: &str = "id, session_id, direction, message_type, payload, created_at";

fn map_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<MessageRow> {
    Ok(MessageRow {
        id: row.get(0)?,
        session_id: row.get(1)?,
        direction: row.get(2)?,
        message_type: row.get(3)?,
        payload: row.get(4)?,
        created_at: row.get(5)?,
    })
}

impl MessageRepo {
    /// Append one frame to a session's transcript.
    pub fn append(
        conn: &Connection,
        session_id: &str,
        direction: MessageDirection,
        message_type: &str,
        payload: &Value,
    ) -> Result<MessageRow> {
        let id = format!("msg_{}", Uuid::now_v7());
        let now = chrono::Utc::now().to_rfc3339();
        let payload_text = serde_json::to_string(payload)?;
        let _ = conn.execute(
            "INSERT INTO messages (id, session_id, direction, message_type, payload, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![id, session_id, direction.as_str(), message_type, payload_text, now],
        )?;
        Ok(MessageRow {
            id,
            session_id: session_id.to_string(),
            direction: direction.as_str().to_string(),
            message_type: message_type.to_string(),
            payload: payload_text,
            created_at: now,
        })
    }

    /// List a session's transcript in append order.
    ///
    /// `limit` bounds the result from the tail (most recent N), returned in
    /// chronological order.
    pub fn list_by_session(
        conn: &Connection,
        session_id: &str,
        limit: Option<usize>,
    ) -> Result<Vec<MessageRow>> {
        let rows = match limit {
            Some(n) => {
                let mut stmt = conn.prepare(&format!(
                    "SELECT {SELECT_COLUMNS} FROM (
                         SELECT {SELECT_COLUMNS}, rowid AS rid FROM messages
                         WHERE session_id = ?1 ORDER BY rid DESC LIMIT ?2
                     ) ORDER BY rid ASC"
                ))?;
                stmt.query_map(params![session_id, n as i64], map_row)?
                    .collect::<std::result::Result<Vec<_>, _>>()?
            }
            None => {
                let mut stmt = conn.prepare(&format!(
                    "SELECT {SELECT_COLUMNS} FROM messages WHERE session_id = ?1 ORDER BY rowid ASC"
                ))?;
                stmt.query_map(params![session_id], map_row)?
                    .collect::<std::result::Result<Vec<_>, _>>()?
            }
        };
        Ok(rows)
    }

    /// Count transcript entries for a session.
    pub fn count_by_session(conn: &Connection, session_id: &str) -> Result<i64> {
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM messages WHERE session_id = ?1",
            params![session_id],
            |row| row.get(0),
        )?;
        Ok(count)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
