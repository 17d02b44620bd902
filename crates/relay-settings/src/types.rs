//! Settings type definitions.
//!
//! All types use `#[serde(rename_all = "camelCase", default)]`, so partial
//! JSON is accepted and missing fields keep their compiled default.

use serde::{Deserialize, Serialize};

use crate::errors::{Result, SettingsError};

/// Root settings type for the relay.
///
/// ```json
/// {
///   "server": { "port": 9000, "allowedOrigins": ["https://chat.example"] },
///   "liveness": { "pongWaitMs": 20000 }
/// }
/// ```
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RelaySettings {
    /// Network and transport settings.
    pub server: ServerSettings,
    /// Ping/pong liveness settings.
    pub liveness: LivenessSettings,
    /// One-time token settings.
    pub tokens: TokenSettings,
    /// Login credential settings.
    pub auth: AuthSettings,
    /// Logging output settings.
    pub logging: LoggingSettings,
}

impl RelaySettings {
    /// Reject values that would make the relay unusable.
    pub fn validate(&self) -> Result<()> {
        if self.liveness.pong_wait_ms < 10 {
            return Err(SettingsError::invalid(
                "liveness.pongWaitMs",
                format!("must be at least 10, got {}", self.liveness.pong_wait_ms),
            ));
        }
        let positive = [
            ("tokens.ttlSecs", self.tokens.ttl_secs == 0),
            ("tokens.sweepIntervalMs", self.tokens.sweep_interval_ms == 0),
            (
                "server.outboundQueueCapacity",
                self.server.outbound_queue_capacity == 0,
            ),
            ("server.maxMessageSize", self.server.max_message_size == 0),
        ];
        match positive.into_iter().find(|(_, zero)| *zero) {
            Some((field, _)) => Err(SettingsError::invalid(field, "must be positive")),
            None => Ok(()),
        }
    }
}

/// Server network settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ServerSettings {
    /// Bind address.
    pub host: String,
    /// Bind port.
    pub port: u16,
    /// Origins allowed to open a WebSocket.
    pub allowed_origins: Vec<String>,
    /// Directory of static frontend files served as the router fallback.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub static_dir: Option<String>,
    /// Largest inbound WebSocket message accepted, in bytes.
    pub max_message_size: usize,
    /// Capacity of each connection's outbound queue.
    pub outbound_queue_capacity: usize,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
            allowed_origins: vec![
                "https://localhost:8080".to_string(),
                "https://localhost:9000".to_string(),
            ],
            static_dir: None,
            max_message_size: 512,
            outbound_queue_capacity: 64,
        }
    }
}

/// Ping/pong liveness settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LivenessSettings {
    /// How long a client may go without answering a ping.
    ///
    /// Pings are sent at 9/10 of this window.
    pub pong_wait_ms: u64,
}

impl Default for LivenessSettings {
    fn default() -> Self {
        Self {
            pong_wait_ms: 10_000,
        }
    }
}

/// One-time token settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct TokenSettings {
    /// Lifetime of an issued token.
    pub ttl_secs: u64,
    /// Tick of the expired-token sweeper.
    pub sweep_interval_ms: u64,
}

impl Default for TokenSettings {
    fn default() -> Self {
        Self {
            ttl_secs: 300,
            sweep_interval_ms: 400,
        }
    }
}

/// The single accepted login credential pair.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AuthSettings {
    /// Accepted username.
    pub username: String,
    /// Accepted password.
    pub password: String,
}

impl Default for AuthSettings {
    fn default() -> Self {
        Self {
            username: "ben".to_string(),
            password: "123".to_string(),
        }
    }
}

/// Logging output settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LoggingSettings {
    /// `tracing` filter directive used when `RUST_LOG` is unset.
    pub level: String,
    /// Emit JSON lines instead of compact text.
    pub json: bool,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
        }
    }
}
