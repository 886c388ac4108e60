//! Settings loading with deep merge and environment variable overrides.
//!
//! Loading flow:
//! 1. Start with compiled [`OneBotSettings::default()`]
//! 2. If the settings file exists, deep-merge its values over defaults
//! 3. Apply `ONEBOT_*` environment variable overrides (highest priority)
//!
//! Deep merge rules:
//! - Objects are merged recursively (source overrides target per-key)
//! - Arrays and primitives are replaced entirely by source
//! - Null values in source are skipped (preserving target)

use std::path::{Path, PathBuf};

use serde_json::Value;
use tracing::debug;

use crate::errors::Result;
use crate::types::OneBotSettings;

/// Resolve the path to the settings file (`~/.onebot/settings.json`).
pub fn settings_path() -> PathBuf {
    let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
    PathBuf::from(home).join(".onebot").join("settings.json")
}

/// Load settings from the default path with env var overrides.
pub fn load_settings() -> Result<OneBotSettings> {
    load_settings_from_path(&settings_path())
}

/// Load settings from a specific path with env var overrides.
///
/// If the file does not exist, returns defaults. Invalid JSON and values
/// that fail [`OneBotSettings::validate`] are errors.
pub fn load_settings_from_path(path: &Path) -> Result<OneBotSettings> {
    let defaults = serde_json::to_value(OneBotSettings::default())?;

    let merged = if path.exists() {
        debug!(?path, "loading settings from file");
        let content = std::fs::read_to_string(path)?;
        let user: Value = serde_json::from_str(&content)?;
        deep_merge(defaults, user)
    } else {
        debug!(?path, "settings file not found, using defaults");
        defaults
    };

    let mut settings: OneBotSettings = serde_json::from_value(merged)?;
    apply_env_overrides(&mut settings);
    settings.validate()?;
    Ok(settings)
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

/// Apply `ONEBOT_*` environment variable overrides to loaded settings.
///
/// Out-of-range or unparsable values are logged and ignored.
pub fn apply_env_overrides(settings: &mut OneBotSettings) {
    apply_overrides_with(settings, |name| std::env::var(name).ok());
}

/// Apply overrides using `lookup` as the variable source.
pub fn apply_overrides_with<F>(settings: &mut OneBotSettings, lookup: F)
where
    F: Fn(&str) -> Option<String>,
{
    let env = EnvReader { lookup };

    // ── Server ──────────────────────────────────────────────────────
    if let Some(v) = env.string("ONEBOT_HOST") {
        settings.server.host = v;
    }
    if let Some(v) = env.u16("ONEBOT_PORT", 1, 65535) {
        settings.server.port = v;
    }
    if let Some(v) = env.u64("ONEBOT_CALL_TIMEOUT_MS", 100, 600_000) {
        settings.server.call_timeout_ms = v;
    }
    if let Some(v) = env.u64("ONEBOT_HEARTBEAT_SECS", 1, 3600) {
        settings.server.heartbeat_interval_secs = v;
    }

    // ── Logging ─────────────────────────────────────────────────────
    if let Some(v) = env.string("ONEBOT_LOG_LEVEL") {
        settings.logging.level = v;
    }
    if let Some(v) = env.string("ONEBOT_LOG_FORMAT") {
        match v.to_ascii_lowercase().as_str() {
            "compact" | "json" => settings.logging.format = v.to_ascii_lowercase(),
            _ => tracing::warn!(key = "ONEBOT_LOG_FORMAT", value = %v, "invalid log format env var, ignoring"),
        }
    }
}

/// Parse a string as a `u16` within a range.
pub fn parse_u16_range(val: &str, min: u16, max: u16) -> Option<u16> {
    let n: u16 = val.trim().parse().ok()?;
    (n >= min && n <= max).then_some(n)
}

/// Parse a string as a `u64` within a range.
pub fn parse_u64_range(val: &str, min: u64, max: u64) -> Option<u64> {
    let n: u64 = val.trim().parse().ok()?;
    (n >= min && n <= max).then_some(n)
}

// ── Env var readers ─────────────────────────────────────────────────────────

struct EnvReader<F> {
    lookup: F,
}

impl<F> EnvReader<F>
where
    F: Fn(&str) -> Option<String>,
{
    fn string(&self, name: &str) -> Option<String> {
        (self.lookup)(name).filter(|v| !v.is_empty())
    }

    fn u16(&self, name: &str, min: u16, max: u16) -> Option<u16> {
        let val = (self.lookup)(name)?;
        let result = parse_u16_range(&val, min, max);
        if result.is_none() {
            tracing::warn!(key = name, value = %val, "invalid u16 env var, ignoring");
        }
        result
    }

    fn u64(&self, name: &str, min: u64, max: u64) -> Option<u64> {
        let val = (self.lookup)(name)?;
        let result = parse_u64_range(&val, min, max);
        if result.is_none() {
            tracing::warn!(key = name, value = %val, "invalid u64 env var, ignoring");
        }
        result
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use serde_json::json;

    use super::*;
    use crate::errors::SettingsError;

    fn vars(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect()
    }

    fn apply(settings: &mut OneBotSettings, pairs: &[(&str, &str)]) {
        let map = vars(pairs);
        apply_overrides_with(settings, |name| map.get(name).cloned());
    }

    // ── deep_merge ──────────────────────────────────────────────────

    #[test]
    fn merge_overrides_nested_key() {
        let target = json!({"server": {"host": "0.0.0.0", "port": 6700}});
        let source = json!({"server": {"port": 8080}});
        let merged = deep_merge(target, source);
        assert_eq!(merged, json!({"server": {"host": "0.0.0.0", "port": 8080}}));
    }

    #[test]
    fn merge_skips_null() {
        let target = json!({"logging": {"level": "info"}});
        let source = json!({"logging": {"level": null}});
        assert_eq!(deep_merge(target, source), json!({"logging": {"level": "info"}}));
    }

    #[test]
    fn merge_replaces_arrays_and_primitives() {
        let target = json!({"a": [1, 2, 3], "b": 1});
        let source = json!({"a": [9], "b": "x"});
        assert_eq!(deep_merge(target, source), json!({"a": [9], "b": "x"}));
    }

    #[test]
    fn merge_adds_new_keys() {
        let merged = deep_merge(json!({"a": 1}), json!({"b": 2}));
        assert_eq!(merged, json!({"a": 1, "b": 2}));
    }

    // ── file loading ────────────────────────────────────────────────

    #[test]
    fn missing_file_yields_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let settings = load_settings_from_path(&dir.path().join("absent.json")).unwrap();
        assert_eq!(settings.server.port, OneBotSettings::default().server.port);
    }

    #[test]
    fn file_values_merge_over_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(
            &path,
            r#"{"server": {"port": 6800, "callTimeoutMs": 5000}, "logging": {"format": "json"}}"#,
        )
        .unwrap();

        let settings = load_settings_from_path(&path).unwrap();
        assert_eq!(settings.server.port, 6800);
        assert_eq!(settings.server.call_timeout_ms, 5000);
        assert_eq!(settings.server.host, "0.0.0.0");
        assert_eq!(settings.logging.format, "json");
        assert_eq!(settings.logging.level, "info");
    }

    #[test]
    fn invalid_json_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(&path, "{ not json").unwrap();
        assert!(matches!(
            load_settings_from_path(&path),
            Err(SettingsError::Json(_))
        ));
    }

    #[test]
    fn unreadable_path_is_an_io_error() {
        // Exists, but a directory cannot be read as a file.
        let dir = tempfile::tempdir().unwrap();
        assert!(matches!(
            load_settings_from_path(dir.path()),
            Err(SettingsError::Io(_))
        ));
    }

    #[test]
    fn invalid_value_in_file_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(&path, r#"{"server": {"queueCapacity": 0}}"#).unwrap();
        assert!(matches!(
            load_settings_from_path(&path),
            Err(SettingsError::InvalidValue(_))
        ));
    }

    #[test]
    fn settings_path_ends_with_onebot_dir() {
        let path = settings_path();
        assert!(path.ends_with(".onebot/settings.json"));
    }

    // ── env overrides ───────────────────────────────────────────────

    #[test]
    fn env_overrides_server_values() {
        let mut settings = OneBotSettings::default();
        apply(
            &mut settings,
            &[
                ("ONEBOT_HOST", "127.0.0.1"),
                ("ONEBOT_PORT", "9000"),
                ("ONEBOT_CALL_TIMEOUT_MS", "2500"),
                ("ONEBOT_HEARTBEAT_SECS", "10"),
            ],
        );
        assert_eq!(settings.server.host, "127.0.0.1");
        assert_eq!(settings.server.port, 9000);
        assert_eq!(settings.server.call_timeout_ms, 2500);
        assert_eq!(settings.server.heartbeat_interval_secs, 10);
    }

    #[test]
    fn env_out_of_range_is_ignored() {
        let mut settings = OneBotSettings::default();
        apply(
            &mut settings,
            &[
                ("ONEBOT_PORT", "0"),
                ("ONEBOT_CALL_TIMEOUT_MS", "50"),
                ("ONEBOT_HEARTBEAT_SECS", "abc"),
            ],
        );
        let defaults = OneBotSettings::default();
        assert_eq!(settings.server.port, defaults.server.port);
        assert_eq!(settings.server.call_timeout_ms, defaults.server.call_timeout_ms);
        assert_eq!(
            settings.server.heartbeat_interval_secs,
            defaults.server.heartbeat_interval_secs
        );
    }

    #[test]
    fn env_empty_string_is_ignored() {
        let mut settings = OneBotSettings::default();
        apply(&mut settings, &[("ONEBOT_HOST", "")]);
        assert_eq!(settings.server.host, "0.0.0.0");
    }

    #[test]
    fn env_log_format_is_normalized() {
        let mut settings = OneBotSettings::default();
        apply(&mut settings, &[("ONEBOT_LOG_FORMAT", "JSON")]);
        assert_eq!(settings.logging.format, "json");

        apply(&mut settings, &[("ONEBOT_LOG_FORMAT", "pretty")]);
        assert_eq!(settings.logging.format, "json");
    }

    #[test]
    fn env_log_level_override() {
        let mut settings = OneBotSettings::default();
        apply(&mut settings, &[("ONEBOT_LOG_LEVEL", "debug")]);
        assert_eq!(settings.logging.level, "debug");
    }

    // ── range parsers ───────────────────────────────────────────────

    #[test]
    fn parse_u16_bounds() {
        assert_eq!(parse_u16_range("6700", 1, 65535), Some(6700));
        assert_eq!(parse_u16_range(" 1 ", 1, 65535), Some(1));
        assert_eq!(parse_u16_range("0", 1, 65535), None);
        assert_eq!(parse_u16_range("70000", 1, 65535), None);
        assert_eq!(parse_u16_range("-1", 1, 65535), None);
    }

    #[test]
    fn parse_u64_bounds() {
        assert_eq!(parse_u64_range("100", 100, 600_000), Some(100));
        assert_eq!(parse_u64_range("600001", 100, 600_000), None);
        assert_eq!(parse_u64_range("", 100, 600_000), None);
    }
}
