//! Transactional outbox and downstream emission.
//!
//! Canonical events are written to the `event_outbox` table by
//! [`create_outbox_record`] inside the caller's transaction, so they exist
//! exactly when the host writes that produced them do. Delivery is a separate
//! phase: [`OutboxFlusher`] pages through pending records, hands each to the
//! [`Emitter`], and marks records sent only after the emitter accepted them.
//! A record that was not accepted stays pending and is retried by the next
//! flush, which makes delivery at-least-once.
//!
//! The emitter publishes into a bounded channel. A send waits for capacity up
//! to a deadline and gives up early on shutdown. When the emit feature flag is
//! off, events are logged instead and counted as unemitted.

mod emitter;
mod error;
mod flush;
mod record;
mod store;

pub use emitter::{
    Delivery, EmitError, Emitter, EmitterStats, FeatureFlags, StaticFeatureFlags,
};
pub use error::OutboxError;
pub use flush::{FlushError, FlushReport, FlushStatus, OutboxFlusher};
pub use record::{DeliveryState, OutboxRecord, ParseDeliveryStateError};
pub use store::{
    count_pending, create_outbox_record, fetch_pending, find_by_org_id, mark_sent,
    purge_sent_records,
};
