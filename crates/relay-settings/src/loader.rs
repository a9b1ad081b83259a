//! Settings loading with deep merge and environment variable overrides.
//!
//! Loading flow:
//! 1. Start with compiled [`BridgeSettings::default()`]
//! 2. If the settings file exists, deep-merge user values over defaults
//! 3. Apply environment variable overrides (highest priority)
//! 4. Validate the hard requirements
//!
//! Deep merge rules:
//! - Objects are merged recursively (source overrides target per-key)
//! - Arrays and primitives are replaced entirely by source
//! - Null values in source are skipped (preserving target)

use std::path::{Path, PathBuf};

use serde_json::Value;
use tracing::debug;

use crate::errors::Result;
use crate::types::BridgeSettings;

/// Resolve the default settings file path (`~/.relay/settings.json`).
pub fn settings_path() -> PathBuf {
    let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
    PathBuf::from(home).join(".relay").join("settings.json")
}

/// Load settings from a specific path with env var overrides.
///
/// If the file does not exist, starts from defaults. Invalid JSON or a
/// configuration missing the hard requirements is an error.
pub fn load_settings_from_path(path: &Path) -> Result<BridgeSettings> {
    let defaults = serde_json::to_value(BridgeSettings::default())?;

    let merged = if path.exists() {
        debug!(?path, "loading settings from file");
        let content = std::fs::read_to_string(path)?;
        let user: Value = serde_json::from_str(&content)?;
        deep_merge(defaults, user)
    } else {
        debug!(?path, "settings file not found, using defaults");
        defaults
    };

    let mut settings: BridgeSettings = serde_json::from_value(merged)?;
    apply_env_overrides(&mut settings);
    settings.validate()?;
    Ok(settings)
}

/// Recursive deep merge of two JSON values.
///
/// - Objects are merged recursively (source overrides target per-key)
/// - Arrays and primitives are replaced entirely by source
/// - Null values in source are skipped (preserving target)
pub fn deep_merge(target: Value, source: Value) -> Value {
    match (target, source) {
        (Value::Object(mut target_map), Value::Object(source_map)) => {
            for (key, source_val) in source_map {
                if source_val.is_null() {
                    continue;
                }
                let merged = if let Some(target_val) = target_map.remove(&key) {
                    deep_merge(target_val, source_val)
                } else {
                    source_val
                };
                let _ = target_map.insert(key, merged);
            }
            Value::Object(target_map)
        }
        (_, source) => source,
    }
}

/// Apply environment variable overrides to loaded settings.
///
/// Invalid values are silently ignored (falling back to file/default).
pub fn apply_env_overrides(settings: &mut BridgeSettings) {
    if let Some(v) = read_env_string("RELAY_AD_URL") {
        settings.ad_url = v;
    }
    if let Some(v) = read_env_string("RELAY_API_KEY") {
        settings.api_key = Some(v);
    }
    if let Some(v) = read_env_string("RELAY_CLIENT_NAME") {
        settings.client_name = Some(v);
    }
    if let Some(v) = read_env_string("RELAY_NAMESPACE") {
        settings.namespace = v;
    }
    if let Some(v) = read_env_bool("RELAY_CERT_VERIFY") {
        settings.cert_verify = v;
    }
    if let Some(v) = read_env_u64("RELAY_REQUEST_TIMEOUT_MS", 1, 600_000) {
        settings.request_timeout_ms = v;
    }
    if let Some(v) = read_env_u64("RELAY_RECONNECT_DELAY_MS", 1, 600_000) {
        settings.reconnect_delay_ms = v;
    }
}

fn read_env_string(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.is_empty())
}

fn read_env_bool(name: &str) -> Option<bool> {
    match std::env::var(name).ok()?.to_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Some(true),
        "false" | "0" | "no" | "off" => Some(false),
        _ => None,
    }
}

fn read_env_u64(name: &str, min: u64, max: u64) -> Option<u64> {
    let parsed: u64 = std::env::var(name).ok()?.parse().ok()?;
    (min..=max).contains(&parsed).then_some(parsed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::io::Write as _;

    #[test]
    fn deep_merge_objects_recursively() {
        let target = json!({"a": {"x": 1, "y": 2}, "b": 3});
        let source = json!({"a": {"y": 20}, "c": 4});
        let merged = deep_merge(target, source);
        assert_eq!(merged, json!({"a": {"x": 1, "y": 20}, "b": 3, "c": 4}));
    }

    #[test]
    fn deep_merge_skips_nulls() {
        let merged = deep_merge(json!({"a": 1}), json!({"a": null}));
        assert_eq!(merged, json!({"a": 1}));
    }

    #[test]
    fn deep_merge_replaces_arrays() {
        let merged = deep_merge(json!({"a": [1, 2]}), json!({"a": [3]}));
        assert_eq!(merged, json!({"a": [3]}));
    }

    #[test]
    fn load_from_file_merges_over_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        let content = json!({
            "ad_url": "https://remote:5050",
            "remote_namespaces": {"roomA": "upstairs"},
            "request_timeout_ms": 250,
        });
        write!(file, "{content}").unwrap();

        let settings = load_settings_from_path(file.path()).unwrap();
        assert_eq!(settings.ad_url, "https://remote:5050");
        assert_eq!(settings.request_timeout_ms, 250);
        // untouched defaults survive the merge
        assert_eq!(settings.namespace, "default");
        assert_eq!(settings.reconnect_delay_ms, 5000);
    }

    #[test]
    fn load_missing_required_fields_fails() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "{}", json!({"namespace": "x"})).unwrap();
        assert!(load_settings_from_path(file.path()).is_err());
    }

    #[test]
    fn env_override_bounds_checked() {
        let mut settings = BridgeSettings::default();
        settings.request_timeout_ms = 5000;
        // out-of-range values are ignored by the helper directly
        assert_eq!(read_env_u64("RELAY_NO_SUCH_VAR", 1, 10), None);
        apply_env_overrides(&mut settings);
        assert_eq!(settings.request_timeout_ms, 5000);
    }
}
