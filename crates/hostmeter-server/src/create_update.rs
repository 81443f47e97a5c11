//! `created` / `updated` host events.

use hostmeter_hosts::{
    find_guests, find_host_by_id, find_host_by_subscription_manager_id, set_unmapped_guest,
    upsert_host, HostUpsert, RelationshipChange,
};
use hostmeter_types::{
    CanonicalEvent, EventType, HbiEvent, HbiHostCreateUpdateEvent, KIND_CREATED, KIND_UPDATED,
};
use rusqlite::Connection;

use crate::error::ProcessingError;
use crate::handler::{refresh_event, DescribedHost, HostEventHandler, PipelineContext};

/// Persists the reported host, keeps its hypervisor relationship current,
/// and emits one event for the host plus one per related host whose
/// billing view changed.
#[derive(Debug, Clone, Copy, Default)]
pub struct CreateUpdateHostHandler;

fn expect_create_update(event: &HbiEvent) -> Result<&HbiHostCreateUpdateEvent, ProcessingError> {
    match event {
        HbiEvent::CreateUpdate(e) => Ok(e),
        other => Err(ProcessingError::UnexpectedEvent {
            expected: "created/updated",
            kind: other.kind().to_string(),
        }),
    }
}

impl HostEventHandler for CreateUpdateHostHandler {
    fn kinds(&self) -> &'static [&'static str] {
        &[KIND_CREATED, KIND_UPDATED]
    }

    fn skip_event(&self, event: &HbiEvent, ctx: &PipelineContext) -> Result<bool, ProcessingError> {
        let event = expect_create_update(event)?;
        let host = hostmeter_facts::Host::from_hbi(&event.host)?;
        let stale_timestamp = host
            .stale_timestamp
            .ok_or(ProcessingError::MissingField("host.stale_timestamp"))?;
        Ok(ctx.filter.should_skip(&host, stale_timestamp, ctx.clock.now()))
    }

    fn handle(
        &self,
        conn: &Connection,
        event: &HbiEvent,
        ctx: &PipelineContext,
    ) -> Result<Vec<CanonicalEvent>, ProcessingError> {
        let event = expect_create_update(event)?;
        let ts = event.timestamp.unwrap_or_else(|| ctx.clock.now());
        let described = DescribedHost::evaluate(conn, ctx, &event.host)?;
        let facts = &described.facts;
        let hypervisor_uuid = facts.hypervisor_uuid.as_deref().filter(|_| facts.is_guest());

        let stored = upsert_host(
            conn,
            &HostUpsert {
                org_id: &facts.org_id,
                inventory_id: &facts.inventory_id,
                subscription_manager_id: facts.subscription_manager_id.as_deref(),
                instance_id: &facts.instance_id,
                hypervisor_uuid,
                is_unmapped_guest: described.role.is_unmapped_guest,
                host: &event.host,
            },
        )?;
        let resolved = ctx.resolver.resolve(conn, &stored, hypervisor_uuid)?;

        let event_type = if event.event_type == KIND_CREATED {
            EventType::InstanceCreated
        } else {
            EventType::InstanceUpdated
        };
        tracing::debug!(
            org_id = %facts.org_id,
            inventory_id = %facts.inventory_id,
            host_id = stored.id,
            is_hypervisor = described.role.is_hypervisor,
            is_unmapped_guest = described.role.is_unmapped_guest,
            relationship = ?resolved.change,
            "processed host event"
        );

        let mut events = vec![described.to_event(ctx, event_type, ts)];

        if described.role.is_hypervisor {
            // Guests reported before this hypervisor are now mapped.
            for guest in find_guests(conn, stored.id, true)? {
                set_unmapped_guest(conn, guest.id, false)?;
                if let Some(refreshed) = refresh_event(conn, ctx, &guest, ts)? {
                    events.push(refreshed);
                }
            }
        } else if let Some(uuid) = hypervisor_uuid.filter(|_| !described.role.is_unmapped_guest) {
            if let Some(hypervisor) =
                find_host_by_subscription_manager_id(conn, &facts.org_id, uuid)?
            {
                if let Some(refreshed) = refresh_event(conn, ctx, &hypervisor, ts)? {
                    events.push(refreshed);
                }
            }
        }

        // The hypervisor a guest moved away from, or stopped naming, lost a
        // guest. Pruned placeholders are gone and emit nothing.
        let left = match resolved.change {
            Some(RelationshipChange::Repointed {
                previous_hypervisor_host_id,
            }) => Some(previous_hypervisor_host_id),
            _ => resolved.unlinked_from,
        };
        if let Some(previous_id) = left {
            if let Some(previous) = find_host_by_id(conn, previous_id)? {
                if let Some(refreshed) = refresh_event(conn, ctx, &previous, ts)? {
                    events.push(refreshed);
                }
            }
        }

        Ok(events)
    }
}
