//! # relay
//!
//! Room relay server binary: loads settings, installs logging and metrics,
//! and serves `/login` and `/ws` until Ctrl-C or SIGTERM.

#![deny(unsafe_code)]

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use relay_server::config::ServerConfig;
use relay_server::protocol::default_registry;
use relay_server::server::RelayServer;
use relay_server::shutdown::wait_for_signal;
use relay_settings::RelaySettings;

/// Room relay server.
#[derive(Parser, Debug)]
#[command(name = "relay", about = "WebSocket room relay server")]
struct Cli {
    /// Host to bind (overrides settings).
    #[arg(long)]
    host: Option<String>,

    /// Port to bind, 0 for auto-assign (overrides settings).
    #[arg(long)]
    port: Option<u16>,

    /// Settings file (default `~/.relay/settings.json`).
    #[arg(long)]
    settings: Option<PathBuf>,

    /// Log level or `tracing` filter directive (overrides settings).
    #[arg(long)]
    log_level: Option<String>,

    /// Directory of static frontend files (overrides settings).
    #[arg(long)]
    static_dir: Option<String>,
}

impl Cli {
    /// Apply command-line overrides on top of loaded settings.
    fn apply(&self, settings: &mut RelaySettings) {
        if let Some(host) = &self.host {
            settings.server.host.clone_from(host);
        }
        if let Some(port) = self.port {
            settings.server.port = port;
        }
        if let Some(level) = &self.log_level {
            settings.logging.level.clone_from(level);
        }
        if let Some(dir) = &self.static_dir {
            settings.server.static_dir = Some(dir.clone());
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Cli::parse();

    // An explicitly named file must load; the default one falls back to
    // compiled defaults so a broken home config does not block startup.
    let (mut settings, fallback_error) = match &args.settings {
        Some(path) => {
            let settings = relay_settings::load_settings_from_path(path)
                .with_context(|| format!("Failed to load settings from {}", path.display()))?;
            (settings, None)
        }
        None => match relay_settings::load_settings() {
            Ok(settings) => (settings, None),
            Err(e) => (RelaySettings::default(), Some(e)),
        },
    };
    args.apply(&mut settings);

    relay_server::logging::init_subscriber(&settings.logging.level, settings.logging.json);
    if let Some(e) = fallback_error {
        tracing::warn!(error = %e, "settings file ignored, using defaults");
    }

    let metrics = relay_server::metrics::install_recorder()
        .context("Failed to install metrics recorder")?;

    let config = ServerConfig::from_settings(&settings);
    let server = RelayServer::new(config, default_registry(), metrics);

    let (addr, handle) = server.listen().await.context("Failed to bind server")?;
    tracing::info!(
        "relay listening on http://{addr} (origins: {})",
        server.config().allowed_origins.join(", ")
    );

    wait_for_signal().await;

    tracing::info!("Shutting down...");
    server
        .shutdown()
        .graceful_shutdown(vec![handle], None)
        .await;
    tracing::info!("Shutdown complete");
    Ok(())
}
