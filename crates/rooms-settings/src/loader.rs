//! Settings loading with deep merge and environment variable overrides.
//!
//! Loading flow:
//! 1. Start with compiled [`RoomsSettings::default()`]
//! 2. If the settings file exists, deep-merge its values over defaults
//! 3. Apply `ROOMS_*` environment overrides (highest priority)
//!
//! Deep merge rules:
//! - Objects are merged recursively (source overrides target per-key)
//! - Arrays and primitives are replaced entirely by source
//! - Null values in source are skipped (preserving target)

use std::path::{Path, PathBuf};

use serde_json::Value;
use tracing::{debug, warn};

use crate::duration::parse_duration;
use crate::errors::Result;
use crate::types::{EngineKind, RoomsSettings};

/// Environment variable naming an explicit settings file.
pub const CONFIG_ENV: &str = "ROOMS_CONFIG";

/// Resolve the settings file: `$ROOMS_CONFIG`, else `./rooms.json`.
pub fn settings_path() -> PathBuf {
    std::env::var(CONFIG_ENV)
        .ok()
        .filter(|v| !v.is_empty())
        .map_or_else(|| PathBuf::from("rooms.json"), PathBuf::from)
}

/// Load settings from the default path with env var overrides.
pub fn load_settings() -> Result<RoomsSettings> {
    load_settings_from_path(&settings_path())
}

/// Load settings from a specific path with env var overrides.
///
/// A missing file yields defaults; a malformed one is an error.
pub fn load_settings_from_path(path: &Path) -> Result<RoomsSettings> {
    let mut settings = load_file(path)?;
    apply_env_overrides(&mut settings);
    Ok(settings)
}

fn load_file(path: &Path) -> Result<RoomsSettings> {
    let defaults = serde_json::to_value(RoomsSettings::default())?;

    let merged = if path.exists() {
        debug!(?path, "loading settings from file");
        let content = std::fs::read_to_string(path)?;
        let user: Value = serde_json::from_str(&content)?;
        deep_merge(defaults, user)
    } else {
        debug!(?path, "settings file not found, using defaults");
        defaults
    };

    Ok(serde_json::from_value(merged)?)
}

/// Recursive deep merge of two JSON values.
pub fn deep_merge(target: Value, source: Value) -> Value {
    match (target, source) {
        (Value::Object(mut target_map), Value::Object(source_map)) => {
            for (key, source_val) in source_map {
                if source_val.is_null() {
                    continue;
                }
                let merged = match target_map.remove(&key) {
                    Some(target_val) => deep_merge(target_val, source_val),
                    None => source_val,
                };
                let _ = target_map.insert(key, merged);
            }
            Value::Object(target_map)
        }
        (_, source) => source,
    }
}

/// Apply `ROOMS_*` overrides from the process environment.
pub fn apply_env_overrides(settings: &mut RoomsSettings) {
    apply_overrides(settings, |name| std::env::var(name).ok());
}

/// Apply overrides read through `lookup`.
///
/// Invalid values are logged and ignored (falling back to file/default).
pub fn apply_overrides<F>(settings: &mut RoomsSettings, lookup: F)
where
    F: Fn(&str) -> Option<String>,
{
    let env = EnvReader { lookup };

    // ── Server ──────────────────────────────────────────────────────
    if let Some(v) = env.string("ROOMS_HOST") {
        settings.server.host = v;
    }
    if let Some(v) = env.port("ROOMS_PORT") {
        settings.server.port = v;
    }
    if let Some(v) = env.millis("ROOMS_PING_INTERVAL") {
        settings.server.ping_interval_ms = v;
    }

    // ── Rooms ───────────────────────────────────────────────────────
    if let Some(v) = env.millis("ROOMS_ROOM_TIMEOUT") {
        settings.rooms.room_timeout_ms = (v > 0).then_some(v);
    }
    if let Some(v) = env.bool("ROOMS_TERMINATE_ON_DISPOSE") {
        settings.rooms.terminate_on_dispose = v;
    }
    if let Some(v) = env.millis("ROOMS_TERMINATE_DISPOSE_TIMEOUT") {
        settings.rooms.terminate_dispose_timeout_ms = v;
    }

    // ── Engine ──────────────────────────────────────────────────────
    if let Some(v) = env.string("ROOMS_ENGINE") {
        match v.parse::<EngineKind>() {
            Ok(kind) => settings.engine.kind = kind,
            Err(error) => warn!(key = "ROOMS_ENGINE", value = %v, %error, "ignoring env var"),
        }
    }
    if let Some(v) = env.string("ROOMS_REDIS_URL") {
        settings.engine.redis_url = v;
    }

    // ── Logging ─────────────────────────────────────────────────────
    if let Some(v) = env.string("ROOMS_LOG_LEVEL") {
        settings.log.level = v;
    }
    if let Some(v) = env.bool("ROOMS_LOG_JSON") {
        settings.log.json = v;
    }
}

// ── Pure parsing functions (testable without env vars) ──────────────────────

/// Parse a string as a boolean.
///
/// Accepts (case-insensitive): `true`/`1`/`yes`/`on` or `false`/`0`/`no`/`off`.
pub fn parse_bool(val: &str) -> Option<bool> {
    match val.trim().to_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Some(true),
        "false" | "0" | "no" | "off" => Some(false),
        _ => None,
    }
}

/// Parse a listen port (1..=65535).
pub fn parse_port(val: &str) -> Option<u16> {
    val.trim().parse::<u16>().ok().filter(|p| *p > 0)
}

// ── Env readers ─────────────────────────────────────────────────────────────

struct EnvReader<F> {
    lookup: F,
}

impl<F: Fn(&str) -> Option<String>> EnvReader<F> {
    fn string(&self, name: &str) -> Option<String> {
        (self.lookup)(name).filter(|v| !v.is_empty())
    }

    fn parsed<T>(&self, name: &str, kind: &str, parse: impl Fn(&str) -> Option<T>) -> Option<T> {
        let val = self.string(name)?;
        let result = parse(&val);
        if result.is_none() {
            warn!(key = name, value = %val, kind, "invalid env var, ignoring");
        }
        result
    }

    fn bool(&self, name: &str) -> Option<bool> {
        self.parsed(name, "bool", parse_bool)
    }

    fn port(&self, name: &str) -> Option<u16> {
        self.parsed(name, "port", parse_port)
    }

    fn millis(&self, name: &str) -> Option<u64> {
        self.parsed(name, "duration", |v| {
            parse_duration(v).and_then(|d| u64::try_from(d.as_millis()).ok())
        })
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;
    use crate::errors::SettingsError;

    fn with_env(pairs: &[(&str, &str)]) -> RoomsSettings {
        let env: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        let mut settings = RoomsSettings::default();
        apply_overrides(&mut settings, |name| env.get(name).cloned());
        settings
    }

    // ── deep_merge ──────────────────────────────────────────────────

    #[test]
    fn merge_nested_override() {
        let target = serde_json::json!({"server": {"port": 9000, "host": "0.0.0.0"}});
        let source = serde_json::json!({"server": {"port": 9090}});
        let merged = deep_merge(target, source);
        assert_eq!(merged["server"]["port"], 9090);
        assert_eq!(merged["server"]["host"], "0.0.0.0");
    }

    #[test]
    fn merge_null_preserves_target() {
        let target = serde_json::json!({"a": 1, "b": 2});
        let source = serde_json::json!({"a": null});
        let merged = deep_merge(target, source);
        assert_eq!(merged["a"], 1);
    }

    #[test]
    fn merge_array_replace() {
        let target = serde_json::json!({"items": [1, 2, 3]});
        let source = serde_json::json!({"items": [4]});
        assert_eq!(deep_merge(target, source)["items"], serde_json::json!([4]));
    }

    #[test]
    fn merge_primitive_replaces_object() {
        let target = serde_json::json!({"a": {"nested": true}});
        let source = serde_json::json!({"a": 42});
        assert_eq!(deep_merge(target, source)["a"], 42);
    }

    // ── load_settings_from_path ─────────────────────────────────────

    #[test]
    fn load_missing_file_returns_defaults() {
        let settings = load_file(Path::new("/nonexistent/rooms.json")).unwrap();
        assert_eq!(settings.server.port, 9000);
    }

    #[test]
    fn load_partial_json_overrides() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("rooms.json");
        std::fs::write(
            &path,
            r#"{"server": {"port": 7070}, "rooms": {"terminateOnDispose": true}}"#,
        )
        .unwrap();

        let settings = load_file(&path).unwrap();
        assert_eq!(settings.server.port, 7070);
        assert!(settings.rooms.terminate_on_dispose);
        assert_eq!(settings.rooms.room_timeout_ms, Some(10_000));
        assert_eq!(settings.server.ping_interval_ms, 5000);
    }

    #[test]
    fn load_engine_kind_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("rooms.json");
        std::fs::write(&path, r#"{"engine": {"kind": "redis"}}"#).unwrap();
        assert_eq!(load_file(&path).unwrap().engine.kind, EngineKind::Redis);
    }

    #[test]
    fn load_invalid_json_returns_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("rooms.json");
        std::fs::write(&path, "not valid json").unwrap();
        assert!(matches!(load_file(&path), Err(SettingsError::Json(_))));
    }

    #[test]
    fn load_unknown_engine_is_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("rooms.json");
        std::fs::write(&path, r#"{"engine": {"kind": "etcd"}}"#).unwrap();
        assert!(matches!(load_file(&path), Err(SettingsError::Json(_))));
    }

    // ── env overrides ───────────────────────────────────────────────

    #[test]
    fn env_overrides_apply() {
        let settings = with_env(&[
            ("ROOMS_HOST", "127.0.0.1"),
            ("ROOMS_PORT", "8088"),
            ("ROOMS_PING_INTERVAL", "2s"),
            ("ROOMS_ROOM_TIMEOUT", "30s"),
            ("ROOMS_TERMINATE_ON_DISPOSE", "yes"),
            ("ROOMS_TERMINATE_DISPOSE_TIMEOUT", "500ms"),
            ("ROOMS_ENGINE", "redis"),
            ("ROOMS_REDIS_URL", "redis://cache:6379"),
            ("ROOMS_LOG_LEVEL", "debug"),
            ("ROOMS_LOG_JSON", "1"),
        ]);
        assert_eq!(settings.server.host, "127.0.0.1");
        assert_eq!(settings.server.port, 8088);
        assert_eq!(settings.server.ping_interval_ms, 2000);
        assert_eq!(settings.rooms.room_timeout_ms, Some(30_000));
        assert!(settings.rooms.terminate_on_dispose);
        assert_eq!(settings.rooms.terminate_dispose_timeout_ms, 500);
        assert_eq!(settings.engine.kind, EngineKind::Redis);
        assert_eq!(settings.engine.redis_url, "redis://cache:6379");
        assert_eq!(settings.log.level, "debug");
        assert!(settings.log.json);
    }

    #[test]
    fn zero_room_timeout_disables() {
        let settings = with_env(&[("ROOMS_ROOM_TIMEOUT", "0")]);
        assert_eq!(settings.rooms.room_timeout_ms, None);
    }

    #[test]
    fn invalid_env_values_are_ignored() {
        let settings = with_env(&[
            ("ROOMS_PORT", "0"),
            ("ROOMS_PING_INTERVAL", "soon"),
            ("ROOMS_TERMINATE_ON_DISPOSE", "maybe"),
            ("ROOMS_ENGINE", "mongo"),
        ]);
        assert_eq!(settings.server.port, 9000);
        assert_eq!(settings.server.ping_interval_ms, 5000);
        assert!(!settings.rooms.terminate_on_dispose);
        assert_eq!(settings.engine.kind, EngineKind::Memory);
    }

    #[test]
    fn empty_env_values_are_ignored() {
        let settings = with_env(&[("ROOMS_HOST", "")]);
        assert_eq!(settings.server.host, "0.0.0.0");
    }

    // ── parsers ─────────────────────────────────────────────────────

    #[test]
    fn parse_bool_variants() {
        for v in ["true", "TRUE", "1", "yes", "on"] {
            assert_eq!(parse_bool(v), Some(true), "{v}");
        }
        for v in ["false", "0", "No", "off"] {
            assert_eq!(parse_bool(v), Some(false), "{v}");
        }
        assert_eq!(parse_bool("2"), None);
    }

    #[test]
    fn parse_port_range() {
        assert_eq!(parse_port("1"), Some(1));
        assert_eq!(parse_port("65535"), Some(65535));
        assert_eq!(parse_port("0"), None);
        assert_eq!(parse_port("65536"), None);
    }
}
