//! Embedded SQL migration runner.
//!
//! Migrations are SQL files embedded at compile time and applied in order,
//! tracked by the `_hostmeter_migrations` table. A migration that has already
//! been recorded is skipped.

use rusqlite::Connection;
use thiserror::Error;

struct Migration {
    name: &'static str,
    sql: &'static str,
}

/// All migrations in order. New migrations are appended here.
const MIGRATIONS: &[Migration] = &[
    Migration {
        name: "000_hosts",
        sql: include_str!("migrations/000_hosts.sql"),
    },
    Migration {
        name: "001_hypervisor_guest_relationships",
        sql: include_str!("migrations/001_hypervisor_guest_relationships.sql"),
    },
    Migration {
        name: "002_event_outbox",
        sql: include_str!("migrations/002_event_outbox.sql"),
    },
];

/// Errors that can occur during migration execution.
#[derive(Debug, Error)]
pub enum MigrationError {
    /// A SQL statement within a migration failed.
    #[error("migration '{name}' failed: {source}")]
    ExecutionFailed {
        /// The name of the migration that failed.
        name: String,
        /// The underlying SQLite error.
        source: rusqlite::Error,
    },

    /// Failed to query migration state.
    #[error("failed to check migration state: {0}")]
    StateQuery(rusqlite::Error),
}

/// Runs all pending migrations against the given connection and returns how
/// many were applied.
///
/// # Errors
///
/// Returns `MigrationError` if a migration fails or the tracking table cannot
/// be queried. A failed migration leaves no partial schema behind.
pub fn run_migrations(conn: &Connection) -> Result<usize, MigrationError> {
    apply(conn, MIGRATIONS)
}

fn apply(conn: &Connection, migrations: &[Migration]) -> Result<usize, MigrationError> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS _hostmeter_migrations (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            name TEXT NOT NULL UNIQUE,
            applied_at TEXT NOT NULL DEFAULT (datetime('now'))
        );",
    )
    .map_err(|source| MigrationError::ExecutionFailed {
        name: "_hostmeter_migrations_bootstrap".to_string(),
        source,
    })?;

    let mut applied = 0;
    for migration in migrations {
        let already_applied: bool = conn
            .query_row(
                "SELECT EXISTS(SELECT 1 FROM _hostmeter_migrations WHERE name = ?1)",
                [migration.name],
                |row| row.get(0),
            )
            .map_err(MigrationError::StateQuery)?;

        if already_applied {
            tracing::debug!(migration = migration.name, "migration already applied");
            continue;
        }

        apply_one(conn, migration).map_err(|source| MigrationError::ExecutionFailed {
            name: migration.name.to_string(),
            source,
        })?;
        tracing::info!(migration = migration.name, "applied migration");
        applied += 1;
    }

    Ok(applied)
}

fn apply_one(conn: &Connection, migration: &Migration) -> rusqlite::Result<()> {
    let tx = conn.unchecked_transaction()?;
    tx.execute_batch(migration.sql)?;
    tx.execute(
        "INSERT INTO _hostmeter_migrations (name) VALUES (?1)",
        [migration.name],
    )?;
    tx.commit()
}
