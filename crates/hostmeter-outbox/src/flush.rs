//! Delivery of pending outbox records.

use std::sync::Arc;

use hostmeter_db::DbPool;
use serde::Serialize;
use thiserror::Error;
use tokio::sync::{Mutex, OwnedMutexGuard};

use crate::emitter::{Delivery, EmitError, Emitter};
use crate::error::OutboxError;
use crate::store::{fetch_pending, mark_sent};

/// Counts from one flush.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct FlushReport {
    /// Published downstream.
    pub flushed: usize,
    /// Logged because emission is disabled.
    pub skipped: usize,
}

impl FlushReport {
    pub fn total(&self) -> usize {
        self.flushed + self.skipped
    }
}

/// Outcome of requesting a flush.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FlushStatus {
    /// A synchronous flush completed.
    Success,
    /// An asynchronous flush was started.
    Started,
    /// Another flush holds the lock.
    AlreadyRunning,
}

#[derive(Debug, Error)]
pub enum FlushError {
    #[error("another outbox flush is already running")]
    AlreadyRunning,

    #[error("failed to get database connection: {0}")]
    Pool(#[from] r2d2::Error),

    #[error(transparent)]
    Outbox(#[from] OutboxError),

    /// Delivery stopped early. `report` counts what was delivered first.
    #[error("outbox flush stopped after {} records: {source}", .report.total())]
    Emit {
        report: FlushReport,
        source: EmitError,
    },

    #[error("flush task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}

/// Pages pending records to the emitter. One flush runs at a time.
#[derive(Clone)]
pub struct OutboxFlusher {
    pool: DbPool,
    emitter: Emitter,
    batch_size: usize,
    pub(crate) lock: Arc<Mutex<()>>,
}

impl OutboxFlusher {
    pub fn new(pool: DbPool, emitter: Emitter, batch_size: usize) -> Self {
        Self {
            pool,
            emitter,
            batch_size: batch_size.max(1),
            lock: Arc::new(Mutex::new(())),
        }
    }

    pub fn emitter(&self) -> &Emitter {
        &self.emitter
    }

    /// Flushes now and waits for the result.
    ///
    /// # Errors
    ///
    /// `FlushError::AlreadyRunning` when another flush is in progress; other
    /// variants when storage or delivery fails part-way.
    pub async fn flush(&self) -> Result<FlushReport, FlushError> {
        let guard = self
            .lock
            .clone()
            .try_lock_owned()
            .map_err(|_| FlushError::AlreadyRunning)?;
        self.run(guard).await
    }

    /// Starts a flush in the background.
    pub fn trigger(&self) -> FlushStatus {
        let Ok(guard) = self.lock.clone().try_lock_owned() else {
            return FlushStatus::AlreadyRunning;
        };
        let this = self.clone();
        tokio::spawn(async move {
            match this.run(guard).await {
                Ok(report) => tracing::info!(
                    flushed = report.flushed,
                    skipped = report.skipped,
                    "background outbox flush finished"
                ),
                Err(e) => tracing::error!(error = %e, "background outbox flush failed"),
            }
        });
        FlushStatus::Started
    }

    pub fn is_running(&self) -> bool {
        self.lock.try_lock().is_err()
    }

    async fn run(&self, _guard: OwnedMutexGuard<()>) -> Result<FlushReport, FlushError> {
        let mut report = FlushReport::default();

        loop {
            let pool = self.pool.clone();
            let limit = self.batch_size;
            let batch = tokio::task::spawn_blocking(move || {
                let conn = pool.get()?;
                Ok::<_, FlushError>(fetch_pending(&conn, limit)?)
            })
            .await??;

            if batch.is_empty() {
                break;
            }
            let full_page = batch.len() == self.batch_size;

            let mut delivered = Vec::with_capacity(batch.len());
            let mut failure = None;
            for record in &batch {
                match self.emitter.send(&record.event).await {
                    Ok(Delivery::Sent) => report.flushed += 1,
                    Ok(Delivery::Logged) => report.skipped += 1,
                    Err(e) => {
                        tracing::warn!(
                            outbox_id = record.id,
                            error = %e,
                            "stopping outbox flush, record stays pending"
                        );
                        failure = Some(e);
                        break;
                    }
                }
                delivered.push(record.id);
            }

            let pool = self.pool.clone();
            tokio::task::spawn_blocking(move || {
                let conn = pool.get()?;
                Ok::<_, FlushError>(mark_sent(&conn, &delivered)?)
            })
            .await??;

            if let Some(source) = failure {
                return Err(FlushError::Emit { report, source });
            }
            if !full_page {
                break;
            }
        }

        if report.total() > 0 {
            tracing::info!(
                flushed = report.flushed,
                skipped = report.skipped,
                "flushed outbox records"
            );
        }
        Ok(report)
    }
}
