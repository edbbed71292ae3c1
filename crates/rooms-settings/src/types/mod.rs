//! Settings types.
//!
//! Every struct deserializes with `camelCase` keys and falls back to its
//! compiled default for any missing field.

mod client;
mod engine;
mod server;

pub use client::ClientSettings;
pub use engine::{EngineKind, EngineSettings};
pub use server::{LogSettings, RoomSettings, ServerSettings};

use serde::{Deserialize, Serialize};

/// Root settings document.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RoomsSettings {
    /// Listener and transport settings.
    pub server: ServerSettings,
    /// Room lifecycle settings.
    pub rooms: RoomSettings,
    /// Pub/sub backend.
    pub engine: EngineSettings,
    /// Client resilience defaults.
    pub client: ClientSettings,
    /// Logging.
    pub log: LogSettings,
}
