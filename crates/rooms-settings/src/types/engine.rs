//! Pub/sub backend selection.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::errors::SettingsError;

/// Which engine backs the bus.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EngineKind {
    /// In-process; single node only.
    #[default]
    Memory,
    /// Redis pub/sub.
    Redis,
}

impl FromStr for EngineKind {
    type Err = SettingsError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "memory" => Ok(Self::Memory),
            "redis" => Ok(Self::Redis),
            other => Err(SettingsError::InvalidValue(format!("unknown engine: {other}"))),
        }
    }
}

impl fmt::Display for EngineKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Memory => "memory",
            Self::Redis => "redis",
        })
    }
}

/// Engine settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct EngineSettings {
    /// Backend kind.
    pub kind: EngineKind,
    /// Redis connection URL, used when `kind` is `redis`.
    pub redis_url: String,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            kind: EngineKind::Memory,
            redis_url: "redis://127.0.0.1:6379".to_string(),
        }
    }
}
