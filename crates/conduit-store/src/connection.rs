//! Connection pool construction with per-connection pragmas.

use std::path::Path;

use r2d2_sqlite::SqliteConnectionManager;

use crate::errors::Result;

/// Pool of `SQLite` connections.
pub type ConnectionPool = r2d2::Pool<SqliteConnectionManager>;
/// A checked-out pooled connection.
pub type PooledConnection = r2d2::PooledConnection<SqliteConnectionManager>;

/// Pragmas applied to every pooled connection.
///
/// Foreign-key enforcement is a correctness requirement (cascade deletes on
/// sessions → messages / permission_log); WAL keeps readers unblocked while
/// the session manager writes.
const CONNECTION_PRAGMAS: &str = "
    PRAGMA journal_mode = WAL;
    PRAGMA foreign_keys = ON;
    PRAGMA synchronous = NORMAL;
    PRAGMA busy_timeout = 5000;
";

/// Open a connection pool backed by a database file.
pub fn open_pool(path: &Path) -> Result<ConnectionPool> {
    let manager = SqliteConnectionManager::file(path)
        .with_init(|conn| conn.execute_batch(CONNECTION_PRAGMAS));
    Ok(r2d2::Pool::builder().build(manager)?)
}

/// Open a single-connection in-memory pool (tests).
///
/// Capped at one connection — each in-memory `SQLite` connection is its own
/// database, so a larger pool would hand out empty databases.
pub fn open_in_memory_pool() -> Result<ConnectionPool> {
    let manager =
        SqliteConnectionManager::memory().with_init(|conn| conn.execute_batch(CONNECTION_PRAGMAS));
    Ok(r2d2::Pool::builder().max_size(1).build(manager)?)
}
