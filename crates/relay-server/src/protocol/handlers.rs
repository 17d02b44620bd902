//! Built-in event handlers: room switching and room-scoped messaging.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::debug;

use crate::errors::EventError;
use crate::hub::Hub;
use crate::hub::connection::Connection;
use crate::protocol::registry::{EventHandler, EventRegistry};
use crate::protocol::types::{
    ChangeRoomPayload, EVENT_CHANGE_ROOM, EVENT_NEW_MESSAGE, EVENT_SEND_MESSAGE, Event,
    NewMessagePayload, SendMessagePayload,
};

/// `change_room`: move the sender into another room.
///
/// Only affects messages broadcast after the switch.
pub struct ChangeRoomHandler;

#[async_trait]
impl EventHandler for ChangeRoomHandler {
    async fn handle(
        &self,
        event: &Event,
        origin: &Arc<Connection>,
        _hub: &Hub,
    ) -> Result<(), EventError> {
        let payload: ChangeRoomPayload = event.decode_payload()?;
        let previous = origin.set_room(payload.name.clone());
        debug!(conn_id = %origin.id, from = %previous, to = %payload.name, "room changed");
        Ok(())
    }
}

/// `send_message`: stamp the message and relay it as `new_message` to every
/// connection in the sender's room, sender included.
pub struct SendMessageHandler;

#[async_trait]
impl EventHandler for SendMessageHandler {
    async fn handle(
        &self,
        event: &Event,
        origin: &Arc<Connection>,
        hub: &Hub,
    ) -> Result<(), EventError> {
        let payload: SendMessagePayload = event.decode_payload()?;
        let outgoing = Event::new(EVENT_NEW_MESSAGE, &NewMessagePayload::from_send(payload))?;
        let room = origin.room();
        let delivered = hub.broadcast_to_room(&room, &outgoing).await;
        debug!(conn_id = %origin.id, room = %room, delivered, "message relayed");
        Ok(())
    }
}

/// Register the built-in handlers.
pub fn register_all(registry: &mut EventRegistry) {
    registry.register(EVENT_SEND_MESSAGE, SendMessageHandler);
    registry.register(EVENT_CHANGE_ROOM, ChangeRoomHandler);
}

/// A registry preloaded with the built-in handlers.
pub fn default_registry() -> EventRegistry {
    let mut registry = EventRegistry::new();
    register_all(&mut registry);
    registry
}
