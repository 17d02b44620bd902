//! Error types for the relay.
//!
//! Three families, each with its own blast radius:
//! - [`EventError`]: protocol faults, local to one inbound message
//! - [`AuthError`]: rejected login or upgrade, surfaced as an HTTP status
//! - [`ServerError`]: failures to bind or serve the listener

use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use serde_json::json;

// ── Error code constants ────────────────────────────────────────────

/// Frame was not a valid `{type, payload}` envelope.
pub const INVALID_ENVELOPE: &str = "INVALID_ENVELOPE";
/// No handler registered for the event type.
pub const NO_HANDLER: &str = "NO_HANDLER";
/// Payload did not decode into the handler's type.
pub const INVALID_PAYLOAD: &str = "INVALID_PAYLOAD";
/// Unexpected internal error.
pub const INTERNAL_ERROR: &str = "INTERNAL_ERROR";
/// `otp` query parameter absent.
pub const MISSING_TOKEN: &str = "MISSING_TOKEN";
/// `otp` unknown, expired, or already used.
pub const INVALID_TOKEN: &str = "INVALID_TOKEN";
/// Request origin not on the allow-list.
pub const ORIGIN_NOT_ALLOWED: &str = "ORIGIN_NOT_ALLOWED";
/// Username/password mismatch.
pub const BAD_CREDENTIALS: &str = "BAD_CREDENTIALS";
/// Request body could not be parsed.
pub const MALFORMED_REQUEST: &str = "MALFORMED_REQUEST";

/// A fault while decoding or handling one inbound event.
///
/// Never terminal to the connection: the inbound pump logs it and moves on.
#[derive(Debug, thiserror::Error)]
pub enum EventError {
    /// The frame was not a valid envelope.
    #[error("invalid event envelope: {0}")]
    InvalidEnvelope(#[source] serde_json::Error),

    /// No handler registered for this event type.
    #[error("no handler for event type: {event_type}")]
    NoHandler {
        /// The unrecognised discriminator.
        event_type: String,
    },

    /// The payload did not match the shape the handler expects.
    #[error("could not decode {event_type} payload: {source}")]
    InvalidPayload {
        /// Event type whose payload failed.
        event_type: String,
        /// Underlying decode error.
        #[source]
        source: serde_json::Error,
    },

    /// Internal failure while handling the event.
    #[error("{message}")]
    Internal {
        /// Description.
        message: String,
    },
}

impl EventError {
    /// Machine-readable error code for this variant.
    pub fn code(&self) -> &'static str {
        match self {
            Self::InvalidEnvelope(_) => INVALID_ENVELOPE,
            Self::NoHandler { .. } => NO_HANDLER,
            Self::InvalidPayload { .. } => INVALID_PAYLOAD,
            Self::Internal { .. } => INTERNAL_ERROR,
        }
    }
}

/// A rejected login or connection upgrade.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AuthError {
    /// No one-time token was supplied.
    #[error("missing one-time token")]
    MissingToken,
    /// The token was unknown, expired, or already consumed.
    #[error("invalid or expired one-time token")]
    InvalidToken,
    /// The request origin is not allow-listed.
    #[error("origin not allowed: {}", .0.as_deref().unwrap_or("<none>"))]
    OriginNotAllowed(Option<String>),
    /// Username or password did not match.
    #[error("invalid credentials")]
    BadCredentials,
    /// The request body could not be parsed.
    #[error("invalid request payload")]
    MalformedRequest,
}

impl AuthError {
    /// Machine-readable error code for this variant.
    pub fn code(&self) -> &'static str {
        match self {
            Self::MissingToken => MISSING_TOKEN,
            Self::InvalidToken => INVALID_TOKEN,
            Self::OriginNotAllowed(_) => ORIGIN_NOT_ALLOWED,
            Self::BadCredentials => BAD_CREDENTIALS,
            Self::MalformedRequest => MALFORMED_REQUEST,
        }
    }

    /// HTTP status the error maps to.
    pub fn status(&self) -> StatusCode {
        match self {
            Self::MissingToken | Self::InvalidToken | Self::BadCredentials => {
                StatusCode::UNAUTHORIZED
            }
            Self::OriginNotAllowed(_) => StatusCode::FORBIDDEN,
            Self::MalformedRequest => StatusCode::BAD_REQUEST,
        }
    }
}

impl IntoResponse for AuthError {
    fn into_response(self) -> Response {
        let body = json!({
            "error": self.to_string(),
            "code": self.code(),
        });
        (self.status(), Json(body)).into_response()
    }
}

/// Failure to start or run the HTTP listener.
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    /// Binding the listen address failed.
    #[error("failed to bind {addr}: {source}")]
    Bind {
        /// Address we tried to bind.
        addr: String,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },
    /// Any other listener I/O failure.
    #[error("listener error: {0}")]
    Io(#[from] std::io::Error),
}
