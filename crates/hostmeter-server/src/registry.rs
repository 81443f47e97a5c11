//! Dispatch from event discriminator to handler.

use std::collections::HashMap;
use std::sync::Arc;

use crate::create_update::CreateUpdateHostHandler;
use crate::delete::DeleteHostHandler;
use crate::error::ProcessingError;
use crate::handler::HostEventHandler;

/// Handlers keyed by the `type` field of inbound events.
#[derive(Default, Clone)]
pub struct HandlerRegistry {
    handlers: HashMap<&'static str, Arc<dyn HostEventHandler>>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers the `created`, `updated` and `delete` handlers.
    pub fn with_default_handlers() -> Self {
        let mut registry = Self::new();
        registry
            .register(Arc::new(CreateUpdateHostHandler))
            .register(Arc::new(DeleteHostHandler));
        registry
    }

    /// Registers `handler` under each of its kinds, replacing any handler
    /// already registered for them.
    pub fn register(&mut self, handler: Arc<dyn HostEventHandler>) -> &mut Self {
        for kind in handler.kinds() {
            self.handlers.insert(*kind, Arc::clone(&handler));
        }
        self
    }

    /// # Errors
    ///
    /// `ProcessingError::UnsupportedHbiEventKind` when nothing is registered
    /// for `kind`.
    pub fn handler_for(&self, kind: &str) -> Result<&Arc<dyn HostEventHandler>, ProcessingError> {
        self.handlers
            .get(kind)
            .ok_or_else(|| ProcessingError::UnsupportedHbiEventKind(kind.to_string()))
    }

    pub fn kinds(&self) -> Vec<&'static str> {
        let mut kinds: Vec<_> = self.handlers.keys().copied().collect();
        kinds.sort_unstable();
        kinds
    }
}
