//! Relay event protocol: envelope types, the handler registry, and the
//! built-in `send_message` / `change_room` handlers.

pub mod handlers;
pub mod registry;
pub mod types;

pub use handlers::{default_registry, register_all};
pub use registry::{EventHandler, EventRegistry};
pub use types::Event;
