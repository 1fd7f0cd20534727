//! # conduit-store
//!
//! SQLite persistence for Conduit.
//!
//! - **Connection pool**: r2d2 over rusqlite with WAL + foreign-key pragmas
//! - **Migrations**: `PRAGMA user_version`-based, idempotent
//! - **Repositories**: stateless, every method takes `&Connection`
//! - **[`Store`] facade**: pooled access with busy-retry; the only entry
//!   point other crates use
//!
//! The schema carries six tables: `projects` (read-only to the core),
//! `sessions`, `messages`, `permission_rules`, `permission_log`, and an
//! opaque `webhooks` table the core never touches.
//!
//! ## Crate Position
//!
//! Depends on: conduit-core.
//! Depended on by: conduit-permissions, conduit-runtime, conduit-server.

#![deny(unsafe_code)]

pub mod connection;
pub mod errors;
pub mod migrations;
pub mod repositories;
pub mod row_types;
pub mod store;

pub use errors::{Result, StoreError};
pub use repositories::{NewLogEntry, NewProject, NewRule, NewSession};
pub use row_types::{
    MessageDirection, MessageRow, PermissionLogRow, PermissionRuleRow, ProjectRow, SessionRow,
};
pub use store::Store;
