//! Permission rule repository.
//!
//! The update path builds its UPDATE statement from an arbitrary field
//! dictionary but only ever binds the four mutable columns; every other key
//! in the payload is silently discarded. That allowlist is a security
//! property of the rule model, not an ergonomic shortcut.

use rusqlite::types::Value as SqlValue;
use rusqlite::{Connection, OptionalExtension, params, params_from_iter};
use serde_json::{Map, Value};
use uuid::Uuid;

use crate::errors::{Result, StoreError};
use crate::row_types::PermissionRuleRow;

/// Fields for creating a permission rule.
pub struct NewRule<'a> {
    /// Owning project; `None` = global rule.
    pub project_id: Option<&'a str>,
    /// Tool name, or `*` for any tool.
    pub tool_name: &'a str,
    /// Match pattern; empty matches any input.
    pub rule_content: &'a str,
    /// `allow` or `deny`.
    pub behavior: &'a str,
    /// Evaluation priority.
    pub priority: i64,
}

/// Permission rule repository.
pub struct PermissionRuleRepo;

const SELECT_COLUMNS: &str = "id, project_id, tool_name, rule_content, behavior, priority, created_at";

/// The only columns a rule update may touch.
const MUTABLE_COLUMNS: [&str; 4] = ["tool_name", "rule_content", "behavior", "priority"];

fn map_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<PermissionRuleRow> {
    Ok(PermissionRuleRow {
        id: row.get(0)?,
        project_id: row.get(1)?,
        tool_name: row.get(2)?,
        rule_content: row.get(3)?,
        behavior: row.get(4)?,
        priority: row.get(5)?,
        created_at: row.get(6)?,
    })
}

fn validate_behavior(behavior: &str) -> Result<()> {
    if behavior == "allow" || behavior == "deny" {
        Ok(())
    } else {
        Err(StoreError::Invalid(format!(
            "behavior must be 'allow' or 'deny', got '{behavior}'"
        )))
    }
}

/// Convert one allowlisted payload value into a bindable SQL value.
fn column_value(column: &str, value: &Value) -> Result<SqlValue> {
    match column {
        "priority" => value
            .as_i64()
            .map(SqlValue::Integer)
            .ok_or_else(|| StoreError::Invalid("priority must be an integer".into())),
        "behavior" => {
            let s = value
                .as_str()
                .ok_or_else(|| StoreError::Invalid("behavior must be a string".into()))?;
            validate_behavior(s)?;
            Ok(SqlValue::Text(s.to_string()))
        }
        _ => value
            .as_str()
            .map(|s| SqlValue::Text(s.to_string()))
            .ok_or_else(|| StoreError::Invalid(format!("{column} must be a string"))),
    }
}

impl PermissionRuleRepo {
    /// Insert a rule.
    pub fn create(conn: &Connection, opts: &NewRule<'_>) -> Result<PermissionRuleRow> {
        validate_behavior(opts.behavior)?;
        let id = format!("rule_{}", Uuid::now_v7());
        let now = chrono::Utc::now().to_rfc3339();
        let _ = conn.execute(
            "INSERT INTO permission_rules (id, project_id, tool_name, rule_content, behavior,
                                           priority, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                id,
                opts.project_id,
                opts.tool_name,
                opts.rule_content,
                opts.behavior,
                opts.priority,
                now
            ],
        )?;
        Ok(PermissionRuleRow {
            id,
            project_id: opts.project_id.map(String::from),
            tool_name: opts.tool_name.to_string(),
            rule_content: opts.rule_content.to_string(),
            behavior: opts.behavior.to_string(),
            priority: opts.priority,
            created_at: now,
        })
    }

    /// Get a rule by id.
    pub fn get_by_id(conn: &Connection, rule_id: &str) -> Result<Option<PermissionRuleRow>> {
        let row = conn
            .query_row(
                &format!("SELECT {SELECT_COLUMNS} FROM permission_rules WHERE id = ?1"),
                params![rule_id],
                map_row,
            )
            .optional()?;
        Ok(row)
    }

    /// Project-scoped rules, highest priority first (created_at, id break ties
    /// deterministically).
    pub fn list_for_project(conn: &Connection, project_id: &str) -> Result<Vec<PermissionRuleRow>> {
        let mut stmt = conn.prepare(&format!(
            "SELECT {SELECT_COLUMNS} FROM permission_rules WHERE project_id = ?1
             ORDER BY priority DESC, created_at ASC, id ASC"
        ))?;
        let rows = stmt
            .query_map(params![project_id], map_row)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    /// Global rules, highest priority first.
    pub fn list_global(conn: &Connection) -> Result<Vec<PermissionRuleRow>> {
        let mut stmt = conn.prepare(&format!(
            "SELECT {SELECT_COLUMNS} FROM permission_rules WHERE project_id IS NULL
             ORDER BY priority DESC, created_at ASC, id ASC"
        ))?;
        let rows = stmt
            .query_map([], map_row)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    /// Apply an update payload to a rule.
    ///
    /// Only `tool_name`, `rule_content`, `behavior`, and `priority` are
    /// applied; all other keys are ignored without error. Returns the
    /// updated row, or `None` if the rule does not exist.
    pub fn update(
        conn: &Connection,
        rule_id: &str,
        changes: &Map<String, Value>,
    ) -> Result<Option<PermissionRuleRow>> {
        let mut assignments = Vec::new();
        let mut bindings: Vec<SqlValue> = Vec::new();

        for column in MUTABLE_COLUMNS {
            if let Some(value) = changes.get(column) {
                bindings.push(column_value(column, value)?);
                assignments.push(format!("{column} = ?{}", bindings.len()));
            }
        }

        if assignments.is_empty() {
            return Self::get_by_id(conn, rule_id);
        }

        bindings.push(SqlValue::Text(rule_id.to_string()));
        let sql = format!(
            "UPDATE permission_rules SET {} WHERE id = ?{}",
            assignments.join(", "),
            bindings.len()
        );
        let changed = conn.execute(&sql, params_from_iter(bindings))?;
        if changed == 0 {
            return Ok(None);
        }
        Self::get_by_id(conn, rule_id)
    }

    /// Delete a rule. Returns `true` if a row was deleted.
    pub fn delete(conn: &Connection, rule_id: &str) -> Result<bool> {
        let changed = conn.execute("DELETE FROM permission_rules WHERE id = ?1", params![rule_id])?;
        Ok(changed > 0)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
