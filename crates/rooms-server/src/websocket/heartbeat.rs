//! Server-driven keepalive.
//!
//! Every interval the server sends a PING frame; clients answer with the
//! one-byte PONG. A connection that misses the keepalive window is reported
//! as timed out and the session closes it with 4001.

use std::sync::Arc;
use std::time::Duration;

use rooms_protocol::{MessageType, Outbound, WireSocket, write_to_socket};
use tokio::time::{MissedTickBehavior, interval};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use super::connection::ClientConnection;

/// Why the heartbeat loop stopped.
#[derive(Debug, PartialEq, Eq)]
pub enum HeartbeatResult {
    /// No PONG within the keepalive window.
    TimedOut,
    /// Cancelled by the session.
    Cancelled,
}

/// Ping `connection` every `ping_interval` until it times out or `cancel`
/// fires.
pub async fn run_heartbeat(
    connection: Arc<ClientConnection>,
    ping_interval: Duration,
    timeout: Duration,
    cancel: CancellationToken,
) -> HeartbeatResult {
    let interval_ms = ping_interval.as_millis().max(1);
    let max_missed = (timeout.as_millis() / interval_ms).max(1);
    let mut missed: u128 = 0;

    let mut ticker = interval(ping_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let _ = ticker.tick().await;

    loop {
        tokio::select! {
            () = cancel.cancelled() => return HeartbeatResult::Cancelled,
            _ = ticker.tick() => {
                if connection.check_alive() {
                    missed = 0;
                } else {
                    missed += 1;
                    debug!(client_id = %connection.id, missed, "missed pong");
                    if missed >= max_missed {
                        return HeartbeatResult::TimedOut;
                    }
                }
                if !write_to_socket(connection.as_ref(), MessageType::Ping, Outbound::Empty)
                    && !connection.is_open()
                {
                    return HeartbeatResult::Cancelled;
                }
            }
        }
    }
}
