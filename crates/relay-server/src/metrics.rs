//! Prometheus metrics recorder and `/metrics` rendering.

use metrics_exporter_prometheus::{BuildError, PrometheusBuilder, PrometheusHandle};
use tracing::info;

/// Install the global Prometheus recorder.
///
/// Call once at startup, before any metric is recorded. The returned handle
/// renders the `/metrics` body.
pub fn install_recorder() -> Result<PrometheusHandle, BuildError> {
    let handle = PrometheusBuilder::new().install_recorder()?;
    info!("prometheus metrics recorder installed");
    Ok(handle)
}

/// A handle to a recorder that is not installed globally.
///
/// Metrics recorded through the `metrics` macros do not reach it; used
/// where a handle is required but nothing is exported, e.g. in tests.
pub fn detached_handle() -> PrometheusHandle {
    PrometheusBuilder::new().build_recorder().handle()
}

/// Render Prometheus text format.
pub fn render(handle: &PrometheusHandle) -> String {
    handle.render()
}

// Metric names recorded across the crate.

/// WebSocket connections registered (counter).
pub const WS_CONNECTIONS_TOTAL: &str = "ws_connections_total";
/// WebSocket connections unregistered (counter).
pub const WS_DISCONNECTIONS_TOTAL: &str = "ws_disconnections_total";
/// Registered connections (gauge).
pub const WS_CONNECTIONS_ACTIVE: &str = "ws_connections_active";
/// Connection lifetime (histogram).
pub const WS_CONNECTION_DURATION_SECONDS: &str = "ws_connection_duration_seconds";
/// Broadcast enqueues that succeeded (counter).
pub const WS_BROADCAST_DELIVERIES_TOTAL: &str = "ws_broadcast_deliveries_total";
/// Broadcast enqueues refused by closed connections (counter).
pub const WS_BROADCAST_DROPS_TOTAL: &str = "ws_broadcast_drops_total";
/// Failed event writes (counter).
pub const WS_WRITE_ERRORS_TOTAL: &str = "ws_write_errors_total";
/// Refused upgrades (counter, labels: reason).
pub const WS_UPGRADES_REJECTED_TOTAL: &str = "ws_upgrades_rejected_total";
/// Inbound events routed (counter, labels: type).
pub const EVENTS_DISPATCHED_TOTAL: &str = "events_dispatched_total";
/// Inbound events that failed (counter, labels: type, error).
pub const EVENT_ERRORS_TOTAL: &str = "event_errors_total";
/// Login attempts (counter, labels: outcome).
pub const LOGINS_TOTAL: &str = "logins_total";
/// One-time tokens minted (counter).
pub const TOKENS_ISSUED_TOTAL: &str = "tokens_issued_total";
/// One-time token checks (counter, labels: outcome).
pub const TOKENS_VALIDATED_TOTAL: &str = "tokens_validated_total";
/// Expired tokens dropped by the sweeper (counter).
pub const TOKENS_SWEPT_TOTAL: &str = "tokens_swept_total";

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn detached_handle_renders() {
        let handle = detached_handle();
        let output = render(&handle);
        assert!(output.is_empty() || output.contains('\n'));
    }

    #[test]
    fn metric_constants_are_snake_case() {
        let names = [
            WS_CONNECTIONS_TOTAL,
            WS_DISCONNECTIONS_TOTAL,
            WS_CONNECTIONS_ACTIVE,
            WS_CONNECTION_DURATION_SECONDS,
            WS_BROADCAST_DELIVERIES_TOTAL,
            WS_BROADCAST_DROPS_TOTAL,
            WS_WRITE_ERRORS_TOTAL,
            WS_UPGRADES_REJECTED_TOTAL,
            EVENTS_DISPATCHED_TOTAL,
            EVENT_ERRORS_TOTAL,
            LOGINS_TOTAL,
            TOKENS_ISSUED_TOTAL,
            TOKENS_VALIDATED_TOTAL,
            TOKENS_SWEPT_TOTAL,
        ];
        for name in names {
            assert!(
                name.chars().all(|c| c.is_ascii_lowercase() || c == '_'),
                "metric name '{name}' must be snake_case"
            );
        }
    }
}
