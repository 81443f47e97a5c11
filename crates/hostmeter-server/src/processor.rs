//! One message, one transaction.

use std::sync::Arc;

use hostmeter_outbox::create_outbox_record;
use hostmeter_types::HbiEvent;
use rusqlite::{Connection, TransactionBehavior};

use crate::error::ProcessingError;
use crate::handler::PipelineContext;
use crate::registry::HandlerRegistry;

/// What happened to a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessOutcome {
    /// Committed, with this many outbox records.
    Processed { events: usize },
    /// Dropped by the filter before any writes.
    Filtered,
}

/// Runs a handler and writes its outbox records in a single transaction.
#[derive(Clone)]
pub struct MessageProcessor {
    registry: Arc<HandlerRegistry>,
    ctx: Arc<PipelineContext>,
}

impl MessageProcessor {
    pub fn new(registry: Arc<HandlerRegistry>, ctx: Arc<PipelineContext>) -> Self {
        Self { registry, ctx }
    }

    pub fn context(&self) -> &PipelineContext {
        &self.ctx
    }

    /// Processes one event.
    ///
    /// Host, relationship and outbox writes commit together. On any error the
    /// transaction is dropped and nothing is written.
    ///
    /// # Errors
    ///
    /// `ProcessingError::UnsupportedHbiEventKind` for unregistered kinds;
    /// handler and storage errors otherwise.
    pub fn process(
        &self,
        conn: &mut Connection,
        event: &HbiEvent,
    ) -> Result<ProcessOutcome, ProcessingError> {
        let handler = self.registry.handler_for(event.kind())?;
        if handler.skip_event(event, &self.ctx)? {
            return Ok(ProcessOutcome::Filtered);
        }

        // Handlers read before they write; take the write lock first.
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let events = handler.handle(&tx, event, &self.ctx)?;
        for canonical in &events {
            create_outbox_record(&tx, canonical)?;
        }
        tx.commit()?;

        tracing::debug!(
            kind = event.kind(),
            org_id = event.org_id().unwrap_or_default(),
            events = events.len(),
            "committed host event"
        );
        Ok(ProcessOutcome::Processed {
            events: events.len(),
        })
    }
}
