//! Connection pool creation and per-connection setup.

use std::time::Duration;

use r2d2::Pool;
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::{Connection, OpenFlags};
use thiserror::Error;

/// Path value that selects an in-memory database.
const MEMORY_PATH: &str = ":memory:";

/// Runtime tunables for SQLite connection behavior.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DbRuntimeSettings {
    /// Busy timeout for SQLite connections, in milliseconds.
    pub busy_timeout_ms: u64,

    /// Maximum number of pooled SQLite connections.
    pub pool_max_size: u32,

    /// How long a caller waits for a free pooled connection, in milliseconds.
    pub connection_timeout_ms: u64,
}

impl Default for DbRuntimeSettings {
    fn default() -> Self {
        Self {
            busy_timeout_ms: 5_000,
            pool_max_size: 8,
            connection_timeout_ms: 30_000,
        }
    }
}

/// A type alias for the SQLite connection pool.
pub type DbPool = Pool<SqliteConnectionManager>;

/// Errors that can occur when creating the database pool.
#[derive(Debug, Error)]
pub enum PoolError {
    /// Failed to build the connection pool.
    #[error("failed to create database connection pool: {0}")]
    PoolInit(#[from] r2d2::Error),
}

/// Creates a SQLite connection pool with WAL mode and foreign keys enabled.
///
/// `:memory:` yields a single-connection pool: every pooled in-memory
/// connection would otherwise see its own empty database.
///
/// # Errors
///
/// Returns `PoolError::PoolInit` if the first connection cannot be opened or
/// configured.
pub fn create_pool(db_path: &str, settings: DbRuntimeSettings) -> Result<DbPool, PoolError> {
    let (manager, max_size) = if db_path == MEMORY_PATH {
        (SqliteConnectionManager::memory(), 1)
    } else {
        let flags = OpenFlags::SQLITE_OPEN_READ_WRITE
            | OpenFlags::SQLITE_OPEN_CREATE
            | OpenFlags::SQLITE_OPEN_FULL_MUTEX;
        (
            SqliteConnectionManager::file(db_path).with_flags(flags),
            settings.pool_max_size,
        )
    };

    let manager = manager.with_init(move |conn| configure_connection(conn, settings.busy_timeout_ms));

    let pool = Pool::builder()
        .max_size(max_size)
        .connection_timeout(Duration::from_millis(settings.connection_timeout_ms))
        .build(manager)?;

    tracing::debug!(path = db_path, max_size, "database pool ready");
    Ok(pool)
}

fn configure_connection(conn: &mut Connection, busy_timeout_ms: u64) -> rusqlite::Result<()> {
    // In-memory databases report "memory", which is expected.
    let journal_mode: String = conn.query_row("PRAGMA journal_mode = WAL;", [], |row| row.get(0))?;
    if journal_mode != "wal" && journal_mode != "memory" {
        return Err(rusqlite::Error::SqliteFailure(
            rusqlite::ffi::Error::new(rusqlite::ffi::SQLITE_ERROR),
            Some(format!("failed to set WAL journal mode, got: {journal_mode}")),
        ));
    }
    conn.execute_batch(&format!(
        "PRAGMA foreign_keys = ON;
         PRAGMA busy_timeout = {busy_timeout_ms};"
    ))
}
