//! Database layer for hostmeter.
//!
//! Provides SQLite connection pooling (via `r2d2`), WAL-mode initialization,
//! and embedded SQL migrations. The hosts, relationship and outbox tables
//! are all created through versioned migrations managed by this crate, so a
//! single transaction can span host writes and outbox inserts.

mod migrations;
mod pool;

pub use migrations::{run_migrations, MigrationError};
pub use pool::{create_pool, DbPool, DbRuntimeSettings, PoolError};
