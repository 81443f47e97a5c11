use thiserror::Error;

/// Errors from host and relationship persistence.
#[derive(Debug, Error)]
pub enum HostError {
    /// A database operation failed.
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// Stored event data could not be (de)serialized.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Another writer linked the same guest concurrently.
    #[error("guest host {guest_host_id} already has a relationship")]
    RelationshipConflict { guest_host_id: i64 },
}

impl HostError {
    /// Whether re-running the same work may succeed.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Database(rusqlite::Error::SqliteFailure(err, _)) => matches!(
                err.code,
                rusqlite::ErrorCode::DatabaseBusy | rusqlite::ErrorCode::DatabaseLocked
            ),
            Self::RelationshipConflict { .. } => true,
            _ => false,
        }
    }
}
