//! # rooms-settings
//!
//! Configuration for the rooms server, client and binary.
//!
//! Settings are loaded from three layers (in priority order):
//! 1. **Compiled defaults**: [`RoomsSettings::default()`]
//! 2. **Settings file**: JSON, deep-merged over defaults
//! 3. **Environment variables**: `ROOMS_*` overrides (highest priority)

#![deny(unsafe_code)]

pub mod duration;
pub mod errors;
pub mod loader;
pub mod types;

pub use duration::parse_duration;
pub use errors::{Result, SettingsError};
pub use loader::{apply_env_overrides, deep_merge, load_settings, load_settings_from_path, settings_path};
pub use types::*;
