//! Schema migrations.
//!
//! Versioned with `PRAGMA user_version`. Each entry in [`MIGRATIONS`] is one
//! version step executed inside a transaction; running the list is
//! idempotent (already-applied steps are skipped).

use rusqlite::Connection;
use tracing::info;

use crate::errors::Result;

/// Ordered migration steps. Index 0 brings the schema to version 1.
const MIGRATIONS: &[&str] = &[
    // v1 — initial schema: the six tables of the persistence contract.
    "
    CREATE TABLE projects (
        id                       TEXT PRIMARY KEY,
        name                     TEXT NOT NULL,
        folder_path              TEXT NOT NULL UNIQUE,
        default_model            TEXT,
        default_permission_mode  TEXT,
        system_prompt            TEXT,
        append_system_prompt     TEXT,
        created_at               TEXT NOT NULL
    );

    CREATE TABLE sessions (
        id                   TEXT PRIMARY KEY,
        project_id           TEXT NOT NULL REFERENCES projects(id) ON DELETE CASCADE,
        agent_session_id     TEXT NOT NULL DEFAULT '',
        name                 TEXT NOT NULL,
        status               TEXT NOT NULL,
        model                TEXT,
        cli_pid              INTEGER,
        ws_port              INTEGER,
        total_cost_usd       REAL NOT NULL DEFAULT 0,
        total_input_tokens   INTEGER NOT NULL DEFAULT 0,
        total_output_tokens  INTEGER NOT NULL DEFAULT 0,
        num_turns            INTEGER NOT NULL DEFAULT 0,
        error_message        TEXT,
        created_at           TEXT NOT NULL,
        last_active_at       TEXT NOT NULL,
        closed_at            TEXT
    );
    CREATE INDEX idx_sessions_project ON sessions(project_id);
    CREATE INDEX idx_sessions_status ON sessions(status);

    CREATE TABLE messages (
        id            TEXT PRIMARY KEY,
        session_id    TEXT NOT NULL REFERENCES sessions(id) ON DELETE CASCADE,
        direction     TEXT NOT NULL CHECK (direction IN ('inbound', 'outbound')),
        message_type  TEXT NOT NULL,
        payload       TEXT NOT NULL,
        created_at    TEXT NOT NULL
    );
    CREATE INDEX idx_messages_session ON messages(session_id, created_at);

    CREATE TABLE permission_rules (
        id            TEXT PRIMARY KEY,
        project_id    TEXT REFERENCES projects(id) ON DELETE CASCADE,
        tool_name     TEXT NOT NULL,
        rule_content  TEXT NOT NULL DEFAULT '',
        behavior      TEXT NOT NULL CHECK (behavior IN ('allow', 'deny')),
        priority      INTEGER NOT NULL DEFAULT 0,
        created_at    TEXT NOT NULL
    );
    CREATE INDEX idx_permission_rules_project ON permission_rules(project_id);

    CREATE TABLE permission_log (
        id               TEXT PRIMARY KEY,
        session_id       TEXT NOT NULL REFERENCES sessions(id) ON DELETE CASCADE,
        request_id       TEXT NOT NULL,
        tool_name        TEXT NOT NULL,
        tool_input       TEXT NOT NULL,
        decision         TEXT NOT NULL,
        decision_source  TEXT NOT NULL,
        rule_id          TEXT,
        decided_by       TEXT NOT NULL,
        decided_at       TEXT NOT NULL
    );
    CREATE INDEX idx_permission_log_session ON permission_log(session_id, decided_at);

    CREATE TABLE webhooks (
        id          TEXT PRIMARY KEY,
        url         TEXT NOT NULL,
        events      TEXT NOT NULL,
        created_at  TEXT NOT NULL
    );
    ",
];

/// Run all pending migrations.
pub fn run_migrations(conn: &Connection) -> Result<()> {
    let current: i64 = conn.query_row("PRAGMA user_version", [], |row| row.get(0))?;

    for (index, sql) in MIGRATIONS.iter().enumerate() {
        let version = (index + 1) as i64;
        if version <= current {
            continue;
        }
        let tx = conn.unchecked_transaction()?;
        tx.execute_batch(sql)?;
        // PRAGMA does not support parameter binding.
        tx.pragma_update(None, "user_version", version)?;
        tx.commit()?;
        info!(version, "applied schema migration");
    }
    Ok(())
}

/// Current schema version of a database.
pub fn schema_version(conn: &Connection) -> Result<i64> {
    Ok(conn.query_row("PRAGMA user_version", [], |row| row.get(0))?)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn setup() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute_batch("PRAGMA foreign_keys = ON;").unwrap();
        conn
    }

    #[test]
    fn migrations_create_all_tables() {
        let conn = setup();
        run_migrations(&conn).unwrap();

        let mut stmt = conn
            .prepare("SELECT name FROM sqlite_master WHERE type = 'table' AND name NOT LIKE 'sqlite_%'")
            .unwrap();
        let mut tables: Vec<String> = stmt
            .query_map([], |row| row.get(0))
            .unwrap()
            .collect::<std::result::Result<_, _>>()
            .unwrap();
        tables.sort();
        assert_eq!(
            tables,
            vec!["messages", "permission_log", "permission_rules", "projects", "sessions", "webhooks"]
        );
    }

    #[test]
    fn migrations_are_idempotent() {
        let conn = setup();
        run_migrations(&conn).unwrap();
        run_migrations(&conn).unwrap();
        assert_eq!(schema_version(&conn).unwrap(), MIGRATIONS.len() as i64);
    }

    #[test]
    fn foreign_keys_cascade_from_sessions() {
        let conn = setup();
        run_migrations(&conn).unwrap();

        conn.execute_batch(
            "INSERT INTO projects (id, name, folder_path, created_at) VALUES ('p1', 'P', '/tmp/p', '2026-01-01');
             INSERT INTO sessions (id, project_id, name, status, created_at, last_active_at)
             VALUES ('s1', 'p1', 'S', 'starting', '2026-01-01', '2026-01-01');
             INSERT INTO messages (id, session_id, direction, message_type, payload, created_at)
             VALUES ('m1', 's1', 'inbound', 'assistant', '{}', '2026-01-01');",
        )
        .unwrap();

        let _ = conn.execute("DELETE FROM sessions WHERE id = 's1'", []).unwrap();
        let count: i64 = conn
            .query_row("SELECT COUNT(*) FROM messages", [], |row| row.get(0))
            .unwrap();
        assert_eq!(count, 0);
    }

    #[test]
    fn sessions_require_existing_project() {
        let conn = setup();
        run_migrations(&conn).unwrap();
        let result = conn.execute(
            "INSERT INTO sessions (id, project_id, name, status, created_at, last_active_at)
             VALUES ('s1', 'nope', 'S', 'starting', '2026-01-01', '2026-01-01')",
            [],
        );
        assert!(result.is_err());
    }

    #[test]
    fn behavior_check_constraint() {
        let conn = setup();
        run_migrations(&conn).unwrap();
        let result = conn.execute(
            "INSERT INTO permission_rules (id, tool_name, behavior, created_at)
             VALUES ('r1', 'Bash', 'maybe', '2026-01-01')",
            [],
        );
        assert!(result.is_err());
    }
}
