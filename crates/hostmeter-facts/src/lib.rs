//! Fact normalization and event filtering for inbound hosts.
//!
//! Everything in this crate is pure: it turns a raw [`HbiHost`] into typed
//! views and decisions without touching storage. Hypervisor status, which
//! does depend on storage, is passed in by callers as a [`HostRole`].
//!
//! - [`FactSet`] parses namespaced fact blocks (`rhsm`, `satellite`, `qpc`)
//!   into typed views and keeps unknown namespaces raw.
//! - [`Host`] is the per-event view built from the raw host.
//! - [`FactNormalizer`] derives [`NormalizedFacts`]: virtualization,
//!   hypervisor uuid, hardware type, system purpose and products.
//! - [`MeasurementNormalizer`] derives the `cores` / `sockets` measurements.
//! - [`EventFilter`] decides whether an event must be suppressed.
//!
//! [`HbiHost`]: hostmeter_types::HbiHost

mod error;
mod filter;
mod host;
mod measurement;
mod namespace;
mod normalizer;
mod products;

pub use error::FactError;
pub use filter::{is_edge_host, is_marketplace_billing, EventFilter, SkipReason};
pub use host::Host;
pub use measurement::{HostRole, MeasurementNormalizer, Measurements};
pub use namespace::{
    FactSet, NamespaceFacts, QpcFacts, RhsmFacts, SatelliteFacts, SystemProfileFacts, QPC, RHSM,
    SATELLITE,
};
pub use normalizer::{is_guest, FactNormalizer, NormalizedFacts};
pub use products::{ProductCatalog, Products};

#[cfg(test)]
mod tests;
