//! Backpressure-aware, feature-flag-gated publishing.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use hostmeter_types::CanonicalEvent;
use serde::Serialize;
use thiserror::Error;
use tokio::sync::{mpsc, watch};

/// The feature flags the emitter consults. Read on every send.
pub trait FeatureFlags: Send + Sync {
    fn emit_events_enabled(&self) -> bool;
}

/// Flags held in memory, switchable at runtime.
#[derive(Debug, Default)]
pub struct StaticFeatureFlags {
    emit_events: AtomicBool,
}

impl StaticFeatureFlags {
    pub fn new(emit_events: bool) -> Self {
        Self {
            emit_events: AtomicBool::new(emit_events),
        }
    }

    pub fn set_emit_events(&self, enabled: bool) {
        self.emit_events.store(enabled, Ordering::Relaxed);
    }
}

impl FeatureFlags for StaticFeatureFlags {
    fn emit_events_enabled(&self) -> bool {
        self.emit_events.load(Ordering::Relaxed)
    }
}

/// Why a send did not complete.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum EmitError {
    /// No capacity freed up before the deadline.
    #[error("downstream had no capacity within {0:?}")]
    Timeout(Duration),

    /// Shutdown was requested while waiting.
    #[error("send cancelled by shutdown")]
    Cancelled,

    /// The downstream receiver is gone.
    #[error("downstream channel closed")]
    Closed,
}

/// How an accepted event was handled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    /// Published downstream.
    Sent,
    /// Emission is disabled; the event was logged instead.
    Logged,
}

/// Counters exposed for observability.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct EmitterStats {
    pub emitted: u64,
    pub unemitted: u64,
}

#[derive(Debug, Default)]
struct Counters {
    emitted: AtomicU64,
    unemitted: AtomicU64,
}

/// Publishes canonical events into a bounded downstream channel.
#[derive(Clone)]
pub struct Emitter {
    sender: mpsc::Sender<CanonicalEvent>,
    flags: Arc<dyn FeatureFlags>,
    send_timeout: Duration,
    shutdown: watch::Receiver<bool>,
    counters: Arc<Counters>,
}

impl Emitter {
    /// `shutdown` flipping to `true` cancels sends that are waiting for
    /// capacity.
    pub fn new(
        sender: mpsc::Sender<CanonicalEvent>,
        flags: Arc<dyn FeatureFlags>,
        send_timeout: Duration,
        shutdown: watch::Receiver<bool>,
    ) -> Self {
        Self {
            sender,
            flags,
            send_timeout,
            shutdown,
            counters: Arc::new(Counters::default()),
        }
    }

    /// Sends one event, waiting for channel capacity if needed.
    ///
    /// Exactly one message is delivered per `Ok(Delivery::Sent)`; nothing is
    /// delivered on error.
    ///
    /// # Errors
    ///
    /// `EmitError::Timeout` when no capacity frees up within the send timeout,
    /// `EmitError::Cancelled` on shutdown, `EmitError::Closed` when the
    /// receiver has been dropped.
    pub async fn send(&self, event: &CanonicalEvent) -> Result<Delivery, EmitError> {
        if !self.flags.emit_events_enabled() {
            tracing::info!(
                event_id = %event.event_id,
                org_id = %event.org_id,
                instance_id = %event.instance_id,
                event_type = event.event_type.as_str(),
                event = %serde_json::to_string(event).unwrap_or_default(),
                "event emission disabled, logging event instead"
            );
            self.counters.unemitted.fetch_add(1, Ordering::Relaxed);
            return Ok(Delivery::Logged);
        }

        let mut shutdown = self.shutdown.clone();
        if *shutdown.borrow() {
            return Err(EmitError::Cancelled);
        }

        let permit = tokio::select! {
            reserved = tokio::time::timeout(self.send_timeout, self.sender.reserve()) => match reserved {
                Ok(Ok(permit)) => permit,
                Ok(Err(_)) => return Err(EmitError::Closed),
                Err(_) => {
                    tracing::warn!(
                        event_id = %event.event_id,
                        timeout_ms = self.send_timeout.as_millis() as u64,
                        "downstream buffer stayed full"
                    );
                    return Err(EmitError::Timeout(self.send_timeout));
                }
            },
            () = shutdown_requested(&mut shutdown) => return Err(EmitError::Cancelled),
        };

        permit.send(event.clone());
        self.counters.emitted.fetch_add(1, Ordering::Relaxed);
        Ok(Delivery::Sent)
    }

    pub fn stats(&self) -> EmitterStats {
        EmitterStats {
            emitted: self.counters.emitted.load(Ordering::Relaxed),
            unemitted: self.counters.unemitted.load(Ordering::Relaxed),
        }
    }
}

/// Resolves once shutdown is requested. Never resolves if the shutdown
/// sender is dropped without requesting it.
async fn shutdown_requested(rx: &mut watch::Receiver<bool>) {
    let requested = rx.wait_for(|stop| *stop).await.is_ok();
    if !requested {
        std::future::pending::<()>().await;
    }
}
