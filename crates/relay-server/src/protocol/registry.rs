//! Event handler registry and dispatch.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use metrics::counter;

use crate::errors::{EventError, NO_HANDLER};
use crate::hub::Hub;
use crate::hub::connection::Connection;
use crate::metrics::{EVENT_ERRORS_TOTAL, EVENTS_DISPATCHED_TOTAL};
use crate::protocol::types::Event;

/// Metric label recorded for event types with no registered handler.
pub const UNKNOWN_TYPE_LABEL: &str = "unknown";

/// Trait implemented by every event handler.
#[async_trait]
pub trait EventHandler: Send + Sync {
    /// Apply `event`, sent by `origin`, to hub/connection state.
    async fn handle(
        &self,
        event: &Event,
        origin: &Arc<Connection>,
        hub: &Hub,
    ) -> Result<(), EventError>;
}

/// Registry mapping event types to handlers.
///
/// Built once before the hub starts and never mutated afterwards.
pub struct EventRegistry {
    handlers: HashMap<String, Arc<dyn EventHandler>>,
}

impl EventRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self {
            handlers: HashMap::new(),
        }
    }

    /// Register a handler for an event type.
    pub fn register(&mut self, event_type: &str, handler: impl EventHandler + 'static) {
        let _ = self
            .handlers
            .insert(event_type.to_owned(), Arc::new(handler));
    }

    /// Route `event` to its handler and run it inline.
    ///
    /// Metric labels use the registered type name, or [`UNKNOWN_TYPE_LABEL`]
    /// for unrouted types, so client input never mints new series.
    pub async fn dispatch(
        &self,
        event: &Event,
        origin: &Arc<Connection>,
        hub: &Hub,
    ) -> Result<(), EventError> {
        let Some((registered, handler)) = self.handlers.get_key_value(&event.event_type) else {
            counter!(EVENTS_DISPATCHED_TOTAL, "type" => UNKNOWN_TYPE_LABEL).increment(1);
            counter!(EVENT_ERRORS_TOTAL, "type" => UNKNOWN_TYPE_LABEL, "error" => NO_HANDLER)
                .increment(1);
            return Err(EventError::NoHandler {
                event_type: event.event_type.clone(),
            });
        };
        counter!(EVENTS_DISPATCHED_TOTAL, "type" => registered.clone()).increment(1);

        let result = handler.handle(event, origin, hub).await;
        if let Err(err) = &result {
            counter!(EVENT_ERRORS_TOTAL, "type" => registered.clone(), "error" => err.code())
                .increment(1);
        }
        result
    }

    /// All registered event types (sorted).
    pub fn event_types(&self) -> Vec<String> {
        let mut names: Vec<String> = self.handlers.keys().cloned().collect();
        names.sort();
        names
    }

    /// Whether a handler exists for `event_type`.
    pub fn has_handler(&self, event_type: &str) -> bool {
        self.handlers.contains_key(event_type)
    }
}

impl Default for EventRegistry {
    fn default() -> Self {
        Self::new()
    }
}
