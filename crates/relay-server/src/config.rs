//! Server configuration.

use std::time::Duration;

use relay_settings::RelaySettings;
use serde::{Deserialize, Serialize};

/// Runtime configuration for the relay server.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Host to bind (default `"127.0.0.1"`).
    pub host: String,
    /// Port to bind (default `0` for auto-assign).
    pub port: u16,
    /// Origins allowed to open a WebSocket.
    pub allowed_origins: Vec<String>,
    /// Static frontend directory, if any.
    pub static_dir: Option<String>,
    /// Max inbound WebSocket message size in bytes.
    pub max_message_size: usize,
    /// Outbound queue capacity per connection.
    pub outbound_queue_capacity: usize,
    /// Idle window for pong responses, in milliseconds.
    pub pong_wait_ms: u64,
    /// One-time token lifetime in seconds.
    pub token_ttl_secs: u64,
    /// Expired-token sweep tick in milliseconds.
    pub token_sweep_interval_ms: u64,
    /// Accepted login username.
    pub username: String,
    /// Accepted login password.
    pub password: String,
}

impl ServerConfig {
    /// Derive the runtime view from loaded settings.
    pub fn from_settings(settings: &RelaySettings) -> Self {
        Self {
            host: settings.server.host.clone(),
            port: settings.server.port,
            allowed_origins: settings.server.allowed_origins.clone(),
            static_dir: settings.server.static_dir.clone(),
            max_message_size: settings.server.max_message_size,
            outbound_queue_capacity: settings.server.outbound_queue_capacity,
            pong_wait_ms: settings.liveness.pong_wait_ms,
            token_ttl_secs: settings.tokens.ttl_secs,
            token_sweep_interval_ms: settings.tokens.sweep_interval_ms,
            username: settings.auth.username.clone(),
            password: settings.auth.password.clone(),
        }
    }

    /// How long a client may stay silent on pongs.
    pub fn pong_wait(&self) -> Duration {
        Duration::from_millis(self.pong_wait_ms)
    }

    /// Ping cadence: 9/10 of the pong window, so a ping always lands
    /// before the deadline it is meant to refresh.
    pub fn ping_interval(&self) -> Duration {
        ping_interval_for(self.pong_wait())
    }

    /// One-time token lifetime.
    pub fn token_ttl(&self) -> Duration {
        Duration::from_secs(self.token_ttl_secs)
    }

    /// Expired-token sweep tick.
    pub fn token_sweep_interval(&self) -> Duration {
        Duration::from_millis(self.token_sweep_interval_ms)
    }
}

/// Ping interval for a given pong window.
pub fn ping_interval_for(pong_wait: Duration) -> Duration {
    pong_wait * 9 / 10
}

impl Default for ServerConfig {
    fn default() -> Self {
        let settings = RelaySettings::default();
        Self {
            host: "127.0.0.1".into(),
            port: 0,
            ..Self::from_settings(&settings)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_binds_loopback_auto_port() {
        let cfg = ServerConfig::default();
        assert_eq!(cfg.host, "127.0.0.1");
        assert_eq!(cfg.port, 0);
    }

    #[test]
    fn default_liveness_windows() {
        let cfg = ServerConfig::default();
        assert_eq!(cfg.pong_wait(), Duration::from_secs(10));
        assert_eq!(cfg.ping_interval(), Duration::from_secs(9));
    }

    #[test]
    fn default_token_timing() {
        let cfg = ServerConfig::default();
        assert_eq!(cfg.token_ttl(), Duration::from_secs(300));
        assert_eq!(cfg.token_sweep_interval(), Duration::from_millis(400));
    }

    #[test]
    fn ping_interval_shorter_than_pong_wait() {
        for ms in [10, 250, 10_000, 60_000] {
            let wait = Duration::from_millis(ms);
            assert!(ping_interval_for(wait) < wait, "failed for {ms}ms");
        }
    }

    #[test]
    fn from_settings_copies_sections() {
        let mut settings = RelaySettings::default();
        settings.server.port = 9100;
        settings.liveness.pong_wait_ms = 2000;
        settings.auth.username = "ada".into();
        settings.server.static_dir = Some("./frontend".into());

        let cfg = ServerConfig::from_settings(&settings);
        assert_eq!(cfg.port, 9100);
        assert_eq!(cfg.pong_wait_ms, 2000);
        assert_eq!(cfg.ping_interval(), Duration::from_millis(1800));
        assert_eq!(cfg.username, "ada");
        assert_eq!(cfg.static_dir.as_deref(), Some("./frontend"));
    }

    #[test]
    fn serde_roundtrip() {
        let cfg = ServerConfig::default();
        let json = serde_json::to_string(&cfg).unwrap();
        let back: ServerConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(back.port, cfg.port);
        assert_eq!(back.allowed_origins, cfg.allowed_origins);
        assert_eq!(back.pong_wait_ms, cfg.pong_wait_ms);
    }
}
