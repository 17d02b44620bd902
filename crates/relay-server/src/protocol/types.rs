//! Wire-format types for the relay WebSocket protocol.
//!
//! Every frame is a JSON envelope `{"type": ..., "payload": {...}}`. The
//! payload stays an untyped [`Value`] until the handler registered for
//! `type` decodes it into one of the structs below.

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::errors::EventError;

/// Client → server: send a chat message to the current room.
pub const EVENT_SEND_MESSAGE: &str = "send_message";
/// Client → server: switch to another room.
pub const EVENT_CHANGE_ROOM: &str = "change_room";
/// Server → client: a message broadcast to the room.
pub const EVENT_NEW_MESSAGE: &str = "new_message";

/// Typed envelope exchanged over the WebSocket.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Event {
    /// Discriminator used to pick a handler.
    #[serde(rename = "type")]
    pub event_type: String,
    /// Payload, decoded lazily by the handler.
    #[serde(default)]
    pub payload: Value,
}

impl Event {
    /// Build an event from a serializable payload.
    pub fn new(event_type: impl Into<String>, payload: &impl Serialize) -> Result<Self, EventError> {
        let payload = serde_json::to_value(payload).map_err(|e| EventError::Internal {
            message: format!("could not encode payload: {e}"),
        })?;
        Ok(Self {
            event_type: event_type.into(),
            payload,
        })
    }

    /// Parse an envelope from a text frame.
    pub fn parse(text: &str) -> Result<Self, EventError> {
        serde_json::from_str(text).map_err(EventError::InvalidEnvelope)
    }

    /// Decode the payload into the shape expected for this event type.
    pub fn decode_payload<T: DeserializeOwned>(&self) -> Result<T, EventError> {
        T::deserialize(&self.payload).map_err(|source| EventError::InvalidPayload {
            event_type: self.event_type.clone(),
            source,
        })
    }

    /// Serialize the envelope for a text frame.
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }
}

/// Payload of `change_room`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeRoomPayload {
    /// Room to join.
    pub name: String,
}

/// Payload of `send_message`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SendMessagePayload {
    /// Message body.
    pub message: String,
    /// Display name of the sender.
    pub from: String,
}

/// Payload of `new_message`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewMessagePayload {
    /// Message body.
    pub message: String,
    /// Display name of the sender.
    pub from: String,
    /// When the server relayed the message.
    pub sent: DateTime<Utc>,
}

impl NewMessagePayload {
    /// Stamp an inbound message with the current time.
    pub fn from_send(send: SendMessagePayload) -> Self {
        Self {
            message: send.message,
            from: send.from,
            sent: Utc::now(),
        }
    }
}
