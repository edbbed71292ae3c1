//! Client resilience defaults.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Reconnection and keepalive settings for clients.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ClientSettings {
    /// Delay before each reconnect, in milliseconds.
    pub timeout_ms: u64,
    /// Reconnect attempts before giving up. `None` retries forever.
    pub attempts: Option<u32>,
    /// Close the socket if no PING arrives within this many milliseconds.
    pub ping_interval_ms: u64,
}

impl Default for ClientSettings {
    fn default() -> Self {
        Self {
            timeout_ms: 1000,
            attempts: None,
            ping_interval_ms: 10_000,
        }
    }
}

impl ClientSettings {
    /// Reconnect delay.
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    /// Keepalive window.
    pub fn ping_interval(&self) -> Duration {
        Duration::from_millis(self.ping_interval_ms)
    }
}
