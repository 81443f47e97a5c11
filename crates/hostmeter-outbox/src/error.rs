use thiserror::Error;

/// Errors from outbox persistence.
#[derive(Debug, Error)]
pub enum OutboxError {
    /// A database operation failed.
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// An event could not be (de)serialized.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}
