//! Settings loading: file + env layering.

use std::path::{Path, PathBuf};

use serde_json::Value;

use crate::errors::{Result, SettingsError};
use crate::types::ConduitSettings;

/// Path of the user settings file: `~/.conduit/settings.json`.
pub fn settings_path() -> Result<PathBuf> {
    let home = std::env::var_os("HOME").ok_or(SettingsError::NoHome)?;
    Ok(PathBuf::from(home).join(".conduit").join("settings.json"))
}

/// Recursively merge `overlay` into `base`.
///
/// Objects merge key-by-key; any other value type in the overlay replaces
/// the base value wholesale.
pub fn deep_merge(base: Value, overlay: Value) -> Value {
    match (base, overlay) {
        (Value::Object(mut base_map), Value::Object(overlay_map)) => {
            for (key, overlay_value) in overlay_map {
                let merged = match base_map.remove(&key) {
                    Some(base_value) => deep_merge(base_value, overlay_value),
                    None => overlay_value,
                };
                let _ = base_map.insert(key, merged);
            }
            Value::Object(base_map)
        }
        (_, overlay) => overlay,
    }
}

/// Load settings from the default path with env overrides applied.
///
/// A missing file is not an error — defaults are used.
pub fn load_settings() -> Result<ConduitSettings> {
    load_settings_from_path(&settings_path()?)
}

/// Load settings from a specific file path with env overrides applied.
pub fn load_settings_from_path(path: &Path) -> Result<ConduitSettings> {
    let defaults = serde_json::to_value(ConduitSettings::default())?;

    let merged = if path.exists() {
        let raw = std::fs::read_to_string(path)?;
        let file_value: Value = serde_json::from_str(&raw)?;
        deep_merge(defaults, file_value)
    } else {
        defaults
    };

    let mut settings: ConduitSettings = serde_json::from_value(merged)?;
    apply_env_overrides(&mut settings);
    settings.validate();
    Ok(settings)
}

/// Apply `CONDUIT_*` environment variable overrides (highest priority).
fn apply_env_overrides(settings: &mut ConduitSettings) {
    fn env_string(key: &str) -> Option<String> {
        std::env::var(key).ok().filter(|v| !v.is_empty())
    }
    fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
        let raw = env_string(key)?;
        match raw.parse() {
            Ok(v) => Some(v),
            Err(_) => {
                tracing::warn!(key, value = %raw, "ignoring unparseable env override");
                None
            }
        }
    }

    if let Some(host) = env_string("CONDUIT_SERVER_HOST") {
        settings.server.host = host;
    }
    if let Some(port) = env_parse("CONDUIT_SERVER_PORT") {
        settings.server.port = port;
    }
    if let Some(path) = env_string("CONDUIT_AGENT_CLI_PATH") {
        settings.agent.cli_path = path;
    }
    if let Some(token) = env_string("CONDUIT_ACCESS_TOKEN") {
        settings.agent.access_token = Some(token);
    }
    if let Some(ms) = env_parse("CONDUIT_PERMISSION_TIMEOUT_MS") {
        settings.agent.permission_timeout_ms = ms;
    }
    if let Some(start) = env_parse("CONDUIT_BRIDGE_PORT_START") {
        settings.bridge.port_range_start = start;
    }
    if let Some(end) = env_parse("CONDUIT_BRIDGE_PORT_END") {
        settings.bridge.port_range_end = end;
    }
    if let Some(max) = env_parse("CONDUIT_MAX_SESSIONS") {
        settings.session.max_sessions = max;
    }
    if let Some(level) = env_string("CONDUIT_LOG_LEVEL") {
        settings.logging.level = level;
    }
}
