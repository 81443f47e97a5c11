//! Persisted hosts and hypervisor/guest relationships.
//!
//! Hosts are stored with the latest raw HBI host they reported. A guest's
//! relationship row holds integer foreign keys to its own host row and to its
//! hypervisor's; nothing in memory links the two. When a guest names a
//! hypervisor that has not reported itself yet, a placeholder host row (one
//! without event data) stands in for it.
//!
//! All functions take a `&Connection` so callers can run them inside the
//! transaction that also writes the outbox.

mod error;
mod relationship;
mod repository;

pub use error::HostError;
pub use relationship::{
    count_guests, find_relationship_by_guest, guest_count, link_guest, unlink_guest,
    HypervisorGuestRelationship, RelationshipChange, RelationshipResolver, ResolvedRelationship,
};
pub use repository::{
    delete_host, demote_to_placeholder, ensure_placeholder_host, find_guests, find_host_by_id,
    find_host_by_inventory_id, find_host_by_subscription_manager_id, host_role, is_known_host,
    prune_orphan_placeholder, set_unmapped_guest, upsert_host, HostUpsert, PersistedHost,
};
