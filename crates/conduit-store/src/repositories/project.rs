//! Project repository — the core reads projects, it never mutates them.
//!
//! Row creation exists for the import collaborator and for test seeding;
//! nothing in the session/permission path writes here.

use rusqlite::{Connection, OptionalExtension, params};
use uuid::Uuid;

use crate::errors::Result;
use crate::row_types::ProjectRow;

/// Fields for creating a project row.
pub struct NewProject<'a> {
    /// Display name.
    pub name: &'a str,
    /// Absolute folder path (unique).
    pub folder_path: &'a str,
    /// Default model for sessions in this project.
    pub default_model: Option<&'a str>,
    /// Default permission mode for sessions in this project.
    pub default_permission_mode: Option<&'a str>,
    /// System prompt override.
    pub system_prompt: Option<&'a str>,
    /// Appended system prompt.
    pub append_system_prompt: Option<&'a str>,
}

/// Project repository.
pub struct ProjectRepo;

const SELECT_COLUMNS: &str = "id, name, folder_path, default_model, default_permission_mode,
     system_prompt, append_system_prompt, created_at";

fn map_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<ProjectRow> {
    Ok(ProjectRow {
        id: row.get(0)?,
        name: row.get(1)?,
        folder_path: row.get(2)?,
        default_model: row.get(3)?,
        default_permission_mode: row.get(4)?,
        system_prompt: row.get(5)?,
        append_system_prompt: row.get(6)?,
        created_at: row.get(7)?,
    })
}

impl ProjectRepo {
    /// Insert a project row.
    pub fn create(conn: &Connection, opts: &NewProject<'_>) -> Result<ProjectRow> {
        let id = format!("proj_{}", Uuid::now_v7());
        let now = chrono::Utc::now().to_rfc3339();
        let _ = conn.execute(
            "INSERT INTO projects (id, name, folder_path, default_model, default_permission_mode,
                                   system_prompt, append_system_prompt, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                id,
                opts.name,
                opts.folder_path,
                opts.default_model,
                opts.default_permission_mode,
                opts.system_prompt,
                opts.append_system_prompt,
                now
            ],
        )?;
        Ok(ProjectRow {
            id,
            name: opts.name.to_string(),
            folder_path: opts.folder_path.to_string(),
            default_model: opts.default_model.map(String::from),
            default_permission_mode: opts.default_permission_mode.map(String::from),
            system_prompt: opts.system_prompt.map(String::from),
            append_system_prompt: opts.append_system_prompt.map(String::from),
            created_at: now,
        })
    }

    /// Get a project by id.
    pub fn get_by_id(conn: &Connection, project_id: &str) -> Result<Option<ProjectRow>> {
        let row = conn
            .query_row(
                &format!("SELECT {SELECT_COLUMNS} FROM projects WHERE id = ?1"),
                params![project_id],
                map_row,
            )
            .optional()?;
        Ok(row)
    }

    /// List all projects, newest first.
    pub fn list(conn: &Connection) -> Result<Vec<ProjectRow>> {
        let mut stmt = conn.prepare(&format!(
            "SELECT {SELECT_COLUMNS} FROM projects ORDER BY created_at DESC"
        ))?;
        let rows = stmt
            .query_map([], map_row)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(rows)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
