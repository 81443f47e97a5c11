//! Partitioned consumption of inbound host events.
//!
//! Each partition has one worker and one bounded queue. Events are routed by
//! org id, so events for the same org are processed in arrival order on the
//! same worker. Workers run the blocking SQLite work on the blocking pool.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use hostmeter_db::DbPool;
use hostmeter_types::HbiEvent;
use serde::Serialize;
use thiserror::Error;
use tokio::io::{AsyncBufRead, AsyncBufReadExt};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

use crate::error::ProcessingError;
use crate::processor::{MessageProcessor, ProcessOutcome};
use crate::retry::RetryPolicy;

/// Processing counters.
#[derive(Debug, Default)]
pub struct ConsumerStats {
    received: AtomicU64,
    processed: AtomicU64,
    filtered: AtomicU64,
    events_written: AtomicU64,
    unsupported: AtomicU64,
    malformed: AtomicU64,
    failed: AtomicU64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ConsumerStatsSnapshot {
    pub received: u64,
    pub processed: u64,
    pub filtered: u64,
    /// Outbox records committed.
    pub events_written: u64,
    pub unsupported: u64,
    pub malformed: u64,
    /// Messages dropped after an unrecoverable or exhausted failure.
    pub failed: u64,
}

impl ConsumerStats {
    pub fn snapshot(&self) -> ConsumerStatsSnapshot {
        ConsumerStatsSnapshot {
            received: self.received.load(Ordering::Relaxed),
            processed: self.processed.load(Ordering::Relaxed),
            filtered: self.filtered.load(Ordering::Relaxed),
            events_written: self.events_written.load(Ordering::Relaxed),
            unsupported: self.unsupported.load(Ordering::Relaxed),
            malformed: self.malformed.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
        }
    }

    fn record(&self, result: &Result<ProcessOutcome, ProcessingError>) {
        let counter = match result {
            Ok(ProcessOutcome::Processed { events }) => {
                self.events_written
                    .fetch_add(*events as u64, Ordering::Relaxed);
                &self.processed
            }
            Ok(ProcessOutcome::Filtered) => &self.filtered,
            Err(ProcessingError::UnsupportedHbiEventKind(_)) => &self.unsupported,
            Err(_) => &self.failed,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }
}

#[derive(Debug, Error)]
#[error("consumer has shut down")]
pub struct ConsumerClosed;

/// Partition index for `key`. Stable for the life of the process.
pub fn partition_for(key: &str, partitions: usize) -> usize {
    let mut hasher = DefaultHasher::new();
    key.hash(&mut hasher);
    (hasher.finish() % partitions.max(1) as u64) as usize
}

/// Processes one event with retries, on the blocking pool.
///
/// # Errors
///
/// The final error once retries are exhausted or an unrecoverable error
/// occurs.
pub async fn process_with_retry(
    pool: &DbPool,
    processor: &MessageProcessor,
    retry: &RetryPolicy,
    event: Arc<HbiEvent>,
) -> Result<ProcessOutcome, ProcessingError> {
    retry
        .run(|_attempt| {
            let pool = pool.clone();
            let processor = processor.clone();
            let event = Arc::clone(&event);
            async move {
                tokio::task::spawn_blocking(move || {
                    let mut conn = pool.get()?;
                    processor.process(&mut conn, &event)
                })
                .await?
            }
        })
        .await
}

/// Routes inbound events to partition workers.
pub struct PartitionedConsumer {
    senders: Vec<mpsc::Sender<Arc<HbiEvent>>>,
    workers: Vec<JoinHandle<()>>,
    stats: Arc<ConsumerStats>,
}

impl PartitionedConsumer {
    /// Spawns `partitions` workers, each with a queue of `buffer` events.
    pub fn start(
        partitions: usize,
        buffer: usize,
        pool: DbPool,
        processor: MessageProcessor,
        retry: RetryPolicy,
        stats: Arc<ConsumerStats>,
    ) -> Self {
        let partitions = partitions.max(1);
        let mut senders = Vec::with_capacity(partitions);
        let mut workers = Vec::with_capacity(partitions);

        for partition in 0..partitions {
            let (tx, rx) = mpsc::channel(buffer.max(1));
            senders.push(tx);
            workers.push(tokio::spawn(run_worker(
                partition,
                rx,
                pool.clone(),
                processor.clone(),
                retry,
                Arc::clone(&stats),
            )));
        }
        tracing::info!(partitions, "started partition workers");

        Self {
            senders,
            workers,
            stats,
        }
    }

    pub fn stats(&self) -> &Arc<ConsumerStats> {
        &self.stats
    }

    /// Decodes one raw message and queues it. Malformed messages are logged,
    /// counted and dropped.
    ///
    /// # Errors
    ///
    /// `ConsumerClosed` when the target worker has stopped.
    pub async fn submit(&self, raw: &[u8]) -> Result<(), ConsumerClosed> {
        self.stats.received.fetch_add(1, Ordering::Relaxed);
        match HbiEvent::from_slice(raw) {
            Ok(event) => self.enqueue(event).await,
            Err(e) => {
                self.stats.malformed.fetch_add(1, Ordering::Relaxed);
                tracing::error!(
                    error = %e,
                    message = %String::from_utf8_lossy(raw),
                    "dropping malformed host event"
                );
                Ok(())
            }
        }
    }

    /// Queues an already-decoded event.
    ///
    /// # Errors
    ///
    /// `ConsumerClosed` when the target worker has stopped.
    pub async fn submit_event(&self, event: HbiEvent) -> Result<(), ConsumerClosed> {
        self.stats.received.fetch_add(1, Ordering::Relaxed);
        self.enqueue(event).await
    }

    async fn enqueue(&self, event: HbiEvent) -> Result<(), ConsumerClosed> {
        let partition = partition_for(event.org_id().unwrap_or_default(), self.senders.len());
        self.senders[partition]
            .send(Arc::new(event))
            .await
            .map_err(|_| ConsumerClosed)
    }

    /// Stops accepting events and waits for queued ones to finish.
    pub async fn shutdown(self) {
        drop(self.senders);
        for worker in self.workers {
            if let Err(e) = worker.await {
                tracing::error!(error = %e, "partition worker panicked or was cancelled");
            }
        }
    }
}

async fn run_worker(
    partition: usize,
    mut rx: mpsc::Receiver<Arc<HbiEvent>>,
    pool: DbPool,
    processor: MessageProcessor,
    retry: RetryPolicy,
    stats: Arc<ConsumerStats>,
) {
    while let Some(event) = rx.recv().await {
        let result = process_with_retry(&pool, &processor, &retry, Arc::clone(&event)).await;
        stats.record(&result);

        match result {
            Ok(ProcessOutcome::Processed { events }) => {
                tracing::debug!(partition, kind = event.kind(), events, "host event processed");
            }
            Ok(ProcessOutcome::Filtered) => {
                tracing::info!(
                    partition,
                    kind = event.kind(),
                    org_id = event.org_id().unwrap_or_default(),
                    "host event filtered"
                );
            }
            Err(ProcessingError::UnsupportedHbiEventKind(kind)) => {
                tracing::warn!(partition, kind = %kind, "skipping unsupported HBI event kind");
            }
            Err(e) => {
                tracing::error!(
                    partition,
                    kind = event.kind(),
                    org_id = event.org_id().unwrap_or_default(),
                    error = %e,
                    "dropping host event after processing failure"
                );
            }
        }
    }
    tracing::debug!(partition, "partition worker stopped");
}

/// Feeds JSON lines from `reader` into `consumer` until end of input or
/// shutdown. Blank lines are ignored.
///
/// # Errors
///
/// I/O errors from the reader.
pub async fn consume_lines<R>(
    reader: R,
    consumer: &PartitionedConsumer,
    mut shutdown: watch::Receiver<bool>,
) -> std::io::Result<u64>
where
    R: AsyncBufRead + Unpin,
{
    let mut lines = reader.lines();
    let mut count = 0;
    loop {
        let line = tokio::select! {
            line = lines.next_line() => line?,
            () = shutdown_requested(&mut shutdown) => {
                tracing::info!(count, "stopping input on shutdown");
                break;
            }
        };
        let Some(line) = line else {
            tracing::info!(count, "reached end of input");
            break;
        };
        if line.trim().is_empty() {
            continue;
        }
        if consumer.submit(line.as_bytes()).await.is_err() {
            tracing::warn!("consumer closed, stopping input");
            break;
        }
        count += 1;
    }
    Ok(count)
}

/// Resolves once shutdown is requested. A dropped sender never resolves.
async fn shutdown_requested(rx: &mut watch::Receiver<bool>) {
    let requested = rx.wait_for(|stop| *stop).await.is_ok();
    if !requested {
        std::future::pending::<()>().await;
    }
}
