//! Periodic outbox maintenance.

use std::time::Duration;

use hostmeter_db::DbPool;
use hostmeter_outbox::{purge_sent_records, FlushError, OutboxError, OutboxFlusher};
use tokio::time::sleep;

/// Why a purge pass failed.
#[derive(Debug, thiserror::Error)]
pub enum PurgeError {
    #[error("failed to get database connection: {0}")]
    Pool(#[from] r2d2::Error),

    #[error(transparent)]
    Outbox(#[from] OutboxError),
}

/// Flushes the outbox every `interval_seconds`.
///
/// This task runs indefinitely. A tick that finds a flush already running
/// is skipped.
pub async fn start_outbox_flush_task(flusher: OutboxFlusher, interval_seconds: u64) {
    let interval = Duration::from_secs(interval_seconds);
    tracing::info!(interval_seconds, "starting scheduled outbox flush task");

    loop {
        sleep(interval).await;

        match flusher.flush().await {
            Ok(report) => {
                if report.total() > 0 {
                    tracing::info!(
                        flushed = report.flushed,
                        skipped = report.skipped,
                        "scheduled outbox flush finished"
                    );
                } else {
                    tracing::debug!("no pending outbox records");
                }
            }
            Err(FlushError::AlreadyRunning) => {
                tracing::debug!("outbox flush already running, skipping scheduled flush");
            }
            Err(e) => {
                tracing::error!(error = %e, "scheduled outbox flush failed");
            }
        }
    }
}

/// One purge pass: deletes sent records older than `retention_seconds`.
pub fn purge_outbox(pool: &DbPool, retention_seconds: u64) -> Result<usize, PurgeError> {
    let conn = pool.get()?;
    Ok(purge_sent_records(&conn, retention_seconds)?)
}

/// Deletes sent outbox records older than `retention_seconds`, every
/// `interval_seconds`.
///
/// This task runs indefinitely.
pub async fn start_outbox_purge_task(pool: DbPool, interval_seconds: u64, retention_seconds: u64) {
    let interval = Duration::from_secs(interval_seconds);
    tracing::info!(
        interval_seconds,
        retention_seconds,
        "starting outbox purge task"
    );

    loop {
        sleep(interval).await;

        let pool_clone = pool.clone();
        let result =
            tokio::task::spawn_blocking(move || purge_outbox(&pool_clone, retention_seconds)).await;

        match result {
            Ok(Ok(count)) => {
                if count > 0 {
                    tracing::info!(count, "purged sent outbox records");
                } else {
                    tracing::debug!("no sent outbox records to purge");
                }
            }
            Ok(Err(e)) => {
                tracing::error!(error = %e, "failed to purge outbox records");
            }
            Err(e) => {
                tracing::error!(error = %e, "outbox purge task panicked or was cancelled");
            }
        }
    }
}
