//! Server configuration.

use std::time::Duration;

use rooms_settings::RoomsSettings;

/// Room lifecycle knobs.
#[derive(Clone, Debug)]
pub struct RoomConfig {
    /// Idle time before an empty room disposes. `None` disables.
    pub room_timeout: Option<Duration>,
    /// Close local sockets this long after their room disposes. `None`
    /// leaves them open.
    pub terminate_after: Option<Duration>,
    /// Delay between dispose and bus teardown.
    pub dispose_grace: Duration,
}

impl Default for RoomConfig {
    fn default() -> Self {
        Self {
            room_timeout: Some(Duration::from_secs(10)),
            terminate_after: None,
            dispose_grace: Duration::from_secs(1),
        }
    }
}

/// Configuration for the rooms server.
#[derive(Clone, Debug)]
pub struct ServerConfig {
    /// Host to bind to.
    pub host: String,
    /// Port to bind to (0 for auto-assign).
    pub port: u16,
    /// Interval between server PING frames.
    pub ping_interval: Duration,
    /// Close a connection that has not answered PING within this window.
    pub keepalive_timeout: Duration,
    /// Maximum inbound frame size in bytes.
    pub max_message_size: usize,
    /// Outbound frames buffered per connection.
    pub send_buffer: usize,
    /// Room lifecycle.
    pub rooms: RoomConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".into(),
            port: 0,
            ping_interval: Duration::from_secs(5),
            keepalive_timeout: Duration::from_secs(10),
            max_message_size: 1024 * 1024,
            send_buffer: 256,
            rooms: RoomConfig::default(),
        }
    }
}

impl From<&RoomsSettings> for ServerConfig {
    fn from(settings: &RoomsSettings) -> Self {
        let ping_interval = settings.server.ping_interval();
        Self {
            host: settings.server.host.clone(),
            port: settings.server.port,
            ping_interval,
            keepalive_timeout: ping_interval * 2,
            max_message_size: settings.server.max_message_size,
            send_buffer: settings.server.send_buffer.max(1),
            rooms: RoomConfig {
                room_timeout: settings.rooms.room_timeout(),
                terminate_after: settings.rooms.terminate_after(),
                dispose_grace: settings.rooms.dispose_grace(),
            },
        }
    }
}
