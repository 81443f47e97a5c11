use hostmeter_facts::FactError;
use hostmeter_hosts::HostError;
use hostmeter_outbox::OutboxError;
use hostmeter_types::DecodeError;
use thiserror::Error;

/// Errors raised while processing one inbound message.
#[derive(Debug, Error)]
pub enum ProcessingError {
    /// No handler is registered for the event's discriminator.
    #[error("unsupported HBI event kind '{0}'")]
    UnsupportedHbiEventKind(String),

    /// A handler was given an event of a shape it does not handle.
    #[error("handler for '{expected}' cannot process '{kind}' event")]
    UnexpectedEvent { expected: &'static str, kind: String },

    #[error("malformed message: {0}")]
    Decode(#[from] DecodeError),

    #[error("invalid host: {0}")]
    InvalidHost(#[from] FactError),

    #[error("event is missing required field '{0}'")]
    MissingField(&'static str),

    #[error(transparent)]
    Host(#[from] HostError),

    #[error(transparent)]
    Outbox(#[from] OutboxError),

    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("failed to get database connection: {0}")]
    Pool(#[from] r2d2::Error),

    #[error("processing task failed: {0}")]
    Join(#[from] tokio::task::JoinError),

    /// Every attempt failed with a recoverable error.
    #[error("giving up after {attempts} attempts: {last}")]
    RetriesExhausted {
        attempts: u32,
        #[source]
        last: Box<ProcessingError>,
    },
}

impl ProcessingError {
    /// Whether the same message may succeed on another attempt.
    ///
    /// Lock contention, pool exhaustion and relationship races are
    /// recoverable. Malformed input and unknown kinds are not.
    pub fn is_recoverable(&self) -> bool {
        match self {
            Self::Host(e) => e.is_transient(),
            Self::Outbox(OutboxError::Database(e)) | Self::Database(e) => is_busy(e),
            Self::Pool(_) => true,
            _ => false,
        }
    }
}

fn is_busy(err: &rusqlite::Error) -> bool {
    matches!(
        err,
        rusqlite::Error::SqliteFailure(e, _) if matches!(
            e.code,
            rusqlite::ErrorCode::DatabaseBusy | rusqlite::ErrorCode::DatabaseLocked
        )
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn busy() -> rusqlite::Error {
        rusqlite::Error::SqliteFailure(
            rusqlite::ffi::Error::new(rusqlite::ffi::SQLITE_BUSY),
            None,
        )
    }

    #[test]
    fn contention_is_recoverable() {
        assert!(ProcessingError::Database(busy()).is_recoverable());
        assert!(ProcessingError::Host(HostError::Database(busy())).is_recoverable());
        assert!(ProcessingError::Outbox(OutboxError::Database(busy())).is_recoverable());
        assert!(
            ProcessingError::Host(HostError::RelationshipConflict { guest_host_id: 1 })
                .is_recoverable()
        );
    }

    #[test]
    fn bad_input_is_not_recoverable() {
        assert!(!ProcessingError::UnsupportedHbiEventKind("x".into()).is_recoverable());
        assert!(!ProcessingError::MissingField("org_id").is_recoverable());
        assert!(!ProcessingError::InvalidHost(FactError::MissingField("id")).is_recoverable());
        assert!(!ProcessingError::Database(rusqlite::Error::QueryReturnedNoRows).is_recoverable());
    }
}
