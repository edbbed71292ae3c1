//! Server, room lifecycle and logging settings.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Listener and transport settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ServerSettings {
    /// Bind address.
    pub host: String,
    /// Listen port.
    pub port: u16,
    /// Interval between server PING frames, in milliseconds.
    pub ping_interval_ms: u64,
    /// Largest accepted inbound frame, in bytes.
    pub max_message_size: usize,
    /// Outbound frames buffered per connection before drops.
    pub send_buffer: usize,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 9000,
            ping_interval_ms: 5000,
            max_message_size: 1024 * 1024,
            send_buffer: 256,
        }
    }
}

impl ServerSettings {
    /// Ping interval as a [`Duration`].
    pub fn ping_interval(&self) -> Duration {
        Duration::from_millis(self.ping_interval_ms)
    }
}

/// Room lifecycle settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RoomSettings {
    /// Idle time before an empty room disposes. `None` or `0` disables.
    pub room_timeout_ms: Option<u64>,
    /// Close local sockets after their room disposes.
    pub terminate_on_dispose: bool,
    /// Delay between dispose and socket termination, in milliseconds.
    pub terminate_dispose_timeout_ms: u64,
    /// Delay between dispose and bus teardown, in milliseconds.
    pub dispose_grace_ms: u64,
}

impl Default for RoomSettings {
    fn default() -> Self {
        Self {
            room_timeout_ms: Some(10_000),
            terminate_on_dispose: false,
            terminate_dispose_timeout_ms: 10_000,
            dispose_grace_ms: 1000,
        }
    }
}

impl RoomSettings {
    /// Idle timeout, `None` when disabled.
    pub fn room_timeout(&self) -> Option<Duration> {
        self.room_timeout_ms
            .filter(|ms| *ms > 0)
            .map(Duration::from_millis)
    }

    /// Termination delay, `None` when termination is off.
    pub fn terminate_after(&self) -> Option<Duration> {
        self.terminate_on_dispose
            .then(|| Duration::from_millis(self.terminate_dispose_timeout_ms))
    }

    /// Dispose grace as a [`Duration`].
    pub fn dispose_grace(&self) -> Duration {
        Duration::from_millis(self.dispose_grace_ms)
    }
}

/// Logging settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LogSettings {
    /// Default filter directive when `RUST_LOG` is unset.
    pub level: String,
    /// Emit JSON lines instead of human-readable output.
    pub json: bool,
}

impl Default for LogSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
        }
    }
}
