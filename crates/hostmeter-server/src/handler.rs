//! The handler seam and the pieces every handler shares.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use hostmeter_facts::{
    EventFilter, FactNormalizer, Host, HostRole, MeasurementNormalizer, NormalizedFacts,
};
use hostmeter_hosts::{host_role, PersistedHost, RelationshipResolver};
use hostmeter_types::{CanonicalEvent, EventType, HbiEvent, HbiHost, EVENT_SOURCE, SERVICE_TYPE};
use rusqlite::Connection;
use uuid::Uuid;

use crate::clock::Clock;
use crate::config::Config;
use crate::error::ProcessingError;

/// Services handlers need beyond the connection.
pub struct PipelineContext {
    pub clock: Arc<dyn Clock>,
    pub filter: EventFilter,
    pub normalizer: FactNormalizer,
    pub measurements: MeasurementNormalizer,
    pub resolver: RelationshipResolver,
}

impl PipelineContext {
    pub fn from_config(config: &Config, clock: Arc<dyn Clock>) -> Self {
        let pipeline = &config.pipeline;
        Self {
            clock,
            filter: EventFilter::new(chrono::Duration::days(i64::from(
                pipeline.culling_offset_days,
            ))),
            normalizer: FactNormalizer::new(
                chrono::Duration::hours(i64::from(pipeline.host_last_sync_threshold_hours)),
                config.products.clone(),
            ),
            measurements: MeasurementNormalizer::new(
                pipeline.use_cpu_system_facts_for_all_products,
            ),
            resolver: RelationshipResolver,
        }
    }
}

/// Turns one kind of HBI event into canonical events.
///
/// `handle` runs inside the caller's transaction: every write it makes
/// commits or rolls back together with the outbox records for the events it
/// returns.
pub trait HostEventHandler: Send + Sync {
    /// Discriminators this handler is registered under.
    fn kinds(&self) -> &'static [&'static str];

    /// Whether the event should be dropped without any writes.
    fn skip_event(&self, _event: &HbiEvent, _ctx: &PipelineContext) -> Result<bool, ProcessingError> {
        Ok(false)
    }

    fn handle(
        &self,
        conn: &Connection,
        event: &HbiEvent,
        ctx: &PipelineContext,
    ) -> Result<Vec<CanonicalEvent>, ProcessingError>;
}

/// A host evaluated against current storage.
#[derive(Debug, Clone)]
pub struct DescribedHost {
    pub host: Host,
    pub facts: NormalizedFacts,
    pub role: HostRole,
}

impl DescribedHost {
    /// Normalizes `raw` and looks up its role.
    pub fn evaluate(
        conn: &Connection,
        ctx: &PipelineContext,
        raw: &HbiHost,
    ) -> Result<Self, ProcessingError> {
        let host = Host::from_hbi(raw)?;
        let facts = ctx.normalizer.normalize(&host, ctx.clock.start_of_today());
        let role = host_role(
            conn,
            &facts.org_id,
            facts.subscription_manager_id.as_deref(),
            facts.hypervisor_uuid.as_deref(),
            facts.is_guest(),
        )?;
        Ok(Self { host, facts, role })
    }

    /// Builds the canonical event for this host at `ts`.
    pub fn to_event(
        &self,
        ctx: &PipelineContext,
        event_type: EventType,
        ts: DateTime<Utc>,
    ) -> CanonicalEvent {
        let facts = &self.facts;
        let measurements = ctx.measurements.measure(&self.host, facts, self.role);
        let timestamp = ctx.clock.start_of_hour(ts);

        CanonicalEvent {
            event_id: Uuid::new_v4(),
            org_id: facts.org_id.clone(),
            instance_id: facts.instance_id.clone(),
            event_type,
            event_source: EVENT_SOURCE.to_string(),
            service_type: SERVICE_TYPE.to_string(),
            timestamp,
            expiration: ctx.clock.end_of_hour(ts),
            inventory_id: Some(facts.inventory_id.clone()),
            insights_id: facts.insights_id.clone(),
            subscription_manager_id: facts.subscription_manager_id.clone(),
            display_name: facts.display_name.clone(),
            hypervisor_uuid: facts.hypervisor_uuid.clone(),
            sla: facts.sla,
            usage: facts.usage,
            hardware_type: Some(facts.hardware_type),
            cloud_provider: facts.cloud_provider,
            product_ids: facts.product_ids.iter().cloned().collect(),
            product_tags: facts.product_tags.iter().cloned().collect(),
            is_virtual: facts.is_virtual,
            is_hypervisor: self.role.is_hypervisor,
            is_unmapped_guest: self.role.is_unmapped_guest,
            conversion: facts.conversion,
            last_seen: facts.last_seen,
            measurements: measurements.to_vec(),
        }
    }
}

/// Re-describes a stored host from its latest event data.
///
/// Placeholders have nothing to describe and yield `None`.
pub fn describe_stored(
    conn: &Connection,
    ctx: &PipelineContext,
    stored: &PersistedHost,
) -> Result<Option<DescribedHost>, ProcessingError> {
    let Some(raw) = stored.latest_host()? else {
        return Ok(None);
    };
    DescribedHost::evaluate(conn, ctx, &raw).map(Some)
}

/// An `INSTANCE_UPDATED` event re-stating a stored host, or `None` for a
/// placeholder.
pub fn refresh_event(
    conn: &Connection,
    ctx: &PipelineContext,
    stored: &PersistedHost,
    ts: DateTime<Utc>,
) -> Result<Option<CanonicalEvent>, ProcessingError> {
    let described = describe_stored(conn, ctx, stored)?;
    Ok(described.map(|d| d.to_event(ctx, EventType::InstanceUpdated, ts)))
}
