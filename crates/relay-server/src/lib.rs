//! # relay-server
//!
//! WebSocket room relay over Axum.
//!
//! - `POST /login` trades credentials for a short-lived one-time token
//! - `GET /ws?otp=` checks origin and token, then upgrades the connection
//! - The [`hub::Hub`] registers each connection and runs an inbound pump
//!   (read, pong deadline, dispatch) and an outbound pump (queue drain, ping)
//! - `send_message` fans out as `new_message` to the sender's room;
//!   `change_room` moves the sender
//! - Graceful shutdown via `CancellationToken`

#![deny(unsafe_code)]

pub mod config;
pub mod errors;
pub mod health;
pub mod hub;
pub mod logging;
pub mod metrics;
pub mod origin;
pub mod protocol;
pub mod routes;
pub mod server;
pub mod shutdown;
pub mod token_store;

pub use config::ServerConfig;
pub use hub::Hub;
pub use server::RelayServer;
