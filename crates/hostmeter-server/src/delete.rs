//! `delete` host events.

use hostmeter_hosts::{
    delete_host, demote_to_placeholder, find_guests, find_host_by_id, find_host_by_inventory_id,
    find_relationship_by_guest, prune_orphan_placeholder, set_unmapped_guest,
};
use hostmeter_types::{CanonicalEvent, EventType, HbiEvent, HbiHostDeleteEvent, KIND_DELETE};
use rusqlite::Connection;

use crate::error::ProcessingError;
use crate::handler::{describe_stored, refresh_event, HostEventHandler, PipelineContext};

/// Removes a host and emits `INSTANCE_DELETED` for it.
///
/// A deleted hypervisor that still has guests is kept as a placeholder so
/// its guests stay linked; they are re-emitted as unmapped. A deleted guest
/// triggers a refresh of its hypervisor.
#[derive(Debug, Clone, Copy, Default)]
pub struct DeleteHostHandler;

fn expect_delete(event: &HbiEvent) -> Result<&HbiHostDeleteEvent, ProcessingError> {
    match event {
        HbiEvent::Delete(e) => Ok(e),
        other => Err(ProcessingError::UnexpectedEvent {
            expected: KIND_DELETE,
            kind: other.kind().to_string(),
        }),
    }
}

impl HostEventHandler for DeleteHostHandler {
    fn kinds(&self) -> &'static [&'static str] {
        &[KIND_DELETE]
    }

    fn handle(
        &self,
        conn: &Connection,
        event: &HbiEvent,
        ctx: &PipelineContext,
    ) -> Result<Vec<CanonicalEvent>, ProcessingError> {
        let event = expect_delete(event)?;
        let org_id = event
            .org_id
            .as_deref()
            .ok_or(ProcessingError::MissingField("org_id"))?;
        let inventory_id = event.id.as_deref().ok_or(ProcessingError::MissingField("id"))?;
        let ts = event.timestamp.unwrap_or_else(|| ctx.clock.now());

        let Some(stored) =
            find_host_by_inventory_id(conn, inventory_id)?.filter(|h| h.org_id == org_id)
        else {
            tracing::info!(org_id, inventory_id, "delete event for unknown host, nothing to do");
            return Ok(Vec::new());
        };

        let mut events = Vec::new();
        if let Some(described) = describe_stored(conn, ctx, &stored)? {
            events.push(described.to_event(ctx, EventType::InstanceDeleted, ts));
        }

        let guests = find_guests(conn, stored.id, false)?;
        if !guests.is_empty() {
            demote_to_placeholder(conn, stored.id)?;
            tracing::info!(
                org_id,
                inventory_id,
                guests = guests.len(),
                "deleted hypervisor kept as placeholder for its guests"
            );
            for guest in guests {
                set_unmapped_guest(conn, guest.id, true)?;
                if let Some(refreshed) = refresh_event(conn, ctx, &guest, ts)? {
                    events.push(refreshed);
                }
            }
            return Ok(events);
        }

        let relationship = find_relationship_by_guest(conn, stored.id)?;
        delete_host(conn, stored.id)?;

        if let Some(relationship) = relationship {
            let hypervisor_id = relationship.hypervisor_host_id;
            if !prune_orphan_placeholder(conn, hypervisor_id)? {
                if let Some(hypervisor) = find_host_by_id(conn, hypervisor_id)? {
                    if let Some(refreshed) = refresh_event(conn, ctx, &hypervisor, ts)? {
                        events.push(refreshed);
                    }
                }
            }
        }

        Ok(events)
    }
}
