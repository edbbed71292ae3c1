//! Prometheus metrics recorder and metric names.

use metrics_exporter_prometheus::{BuildError, PrometheusBuilder, PrometheusHandle};
use tracing::info;

/// Install the Prometheus recorder as the global `metrics` recorder.
///
/// Call once at startup; the handle renders `/metrics`.
pub fn install_recorder() -> Result<PrometheusHandle, BuildError> {
    let handle = PrometheusBuilder::new().install_recorder()?;
    info!("prometheus metrics recorder installed");
    Ok(handle)
}

/// Render Prometheus text format from the installed recorder.
pub fn render(handle: &PrometheusHandle) -> String {
    handle.render()
}

/// WebSocket connections accepted (counter).
pub const WS_CONNECTIONS_TOTAL: &str = "ws_connections_total";
/// WebSocket disconnections (counter).
pub const WS_DISCONNECTIONS_TOTAL: &str = "ws_disconnections_total";
/// Open WebSocket connections (gauge).
pub const WS_CONNECTIONS_ACTIVE: &str = "ws_connections_active";
/// Connection lifetime (histogram).
pub const WS_CONNECTION_DURATION_SECONDS: &str = "ws_connection_duration_seconds";
/// Handshakes rejected before upgrade (counter, labels: status).
pub const HANDSHAKE_REJECTIONS_TOTAL: &str = "handshake_rejections_total";
/// Rooms created on this process (counter).
pub const ROOMS_CREATED_TOTAL: &str = "rooms_created_total";
/// Rooms disposed on this process (counter).
pub const ROOMS_DISPOSED_TOTAL: &str = "rooms_disposed_total";
/// Rooms currently owned by this process (gauge).
pub const ROOMS_ACTIVE: &str = "rooms_active";
/// Commands published to room command channels (counter, labels: kind).
pub const BUS_COMMANDS_TOTAL: &str = "bus_commands_total";
/// Frames dropped because a connection's send buffer was full (counter).
pub const BROADCAST_DROPS_TOTAL: &str = "broadcast_drops_total";

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn build_and_render() {
        let handle = PrometheusBuilder::new().build_recorder().handle();
        let output = render(&handle);
        assert!(output.is_empty() || output.contains('#') || output.contains('\n'));
    }

    #[test]
    fn metric_constants_are_snake_case() {
        let names = [
            WS_CONNECTIONS_TOTAL,
            WS_DISCONNECTIONS_TOTAL,
            WS_CONNECTIONS_ACTIVE,
            WS_CONNECTION_DURATION_SECONDS,
            HANDSHAKE_REJECTIONS_TOTAL,
            ROOMS_CREATED_TOTAL,
            ROOMS_DISPOSED_TOTAL,
            ROOMS_ACTIVE,
            BUS_COMMANDS_TOTAL,
            BROADCAST_DROPS_TOTAL,
        ];
        for name in names {
            assert!(
                name.chars().all(|c| c.is_ascii_lowercase() || c == '_'),
                "{name} is not snake_case"
            );
        }
    }
}
