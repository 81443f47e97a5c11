//! Shared types for the hostmeter pipeline.
//!
//! This crate provides the wire types on both sides of the pipeline: the
//! inbound host-inventory (HBI) lifecycle events and the canonical billing
//! events that are written to the outbox and published downstream. It also
//! carries the small enums (SLA, usage, hardware type, cloud provider) that
//! the normalization and emission crates share.

mod canonical;
mod hbi;

pub use canonical::{
    CanonicalEvent, CloudProvider, EventType, HardwareType, Measurement, MetricId,
    ParseEventTypeError, Sla, Usage, EVENT_SOURCE, SERVICE_TYPE,
};
pub use hbi::{
    DecodeError, HbiEvent, HbiEventMetadata, HbiHost, HbiHostCreateUpdateEvent,
    HbiHostDeleteEvent, HbiHostFacts, UnknownHbiEvent, KIND_CREATED, KIND_DELETE, KIND_UPDATED,
};
