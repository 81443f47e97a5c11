//! Hostmeter server library logic.
//!
//! Wires the pipeline together: inbound HBI events are decoded, routed to a
//! partition worker by org id, dispatched to the handler registered for
//! their kind and committed with their outbox records in one transaction.
//! The outbox is flushed to the downstream bus on a schedule or on request
//! through the internal HTTP surface.

pub mod api;
pub mod background;
pub mod clock;
pub mod config;
pub mod consumer;
pub mod create_update;
pub mod delete;
pub mod error;
pub mod handler;
pub mod processor;
pub mod registry;
pub mod retry;
pub mod sink;

use std::sync::Arc;

use axum::{
    routing::{get, post},
    Extension, Router,
};
use hostmeter_db::DbPool;
use hostmeter_outbox::OutboxFlusher;
use tower_http::trace::TraceLayer;

use crate::clock::Clock;
use crate::config::Config;
use crate::consumer::ConsumerStats;
use crate::handler::PipelineContext;
use crate::processor::MessageProcessor;
use crate::registry::HandlerRegistry;

/// Application state shared across all request handlers.
#[derive(Clone)]
pub struct AppState {
    /// Database connection pool.
    pub pool: DbPool,
    pub flusher: OutboxFlusher,
    /// Counters from the partition workers.
    pub stats: Arc<ConsumerStats>,
    /// Whether `x-hostmeter-synchronous-request` is honored.
    pub synchronous_operations_enabled: bool,
}

/// Builds the processor with the default handlers.
pub fn build_processor(config: &Config, clock: Arc<dyn Clock>) -> MessageProcessor {
    MessageProcessor::new(
        Arc::new(HandlerRegistry::with_default_handlers()),
        Arc::new(PipelineContext::from_config(config, clock)),
    )
}

/// Builds the internal router.
pub fn app(state: AppState) -> Router {
    Router::new()
        .route("/health", get(api::health_handler))
        .route("/internal/rpc/outbox/flush", post(api::flush_outbox_handler))
        .layer(TraceLayer::new_for_http())
        .layer(Extension(Arc::new(state)))
}
