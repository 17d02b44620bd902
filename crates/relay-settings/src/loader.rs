//! Settings loading: compiled defaults, then the JSON file, then `RELAY_*`
//! environment overrides, then validation.
//!
//! File values are merged key by key into the defaults: nested objects
//! recurse, arrays and scalars replace, `null` leaves the default alone.

use std::fmt::Display;
use std::ops::RangeInclusive;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use serde_json::Value;
use tracing::{debug, warn};

use crate::errors::{Result, SettingsError};
use crate::types::RelaySettings;

/// Resolve the path to the settings file (`~/.relay/settings.json`).
pub fn settings_path() -> PathBuf {
    let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
    PathBuf::from(home).join(".relay").join("settings.json")
}

/// Load settings from the default path with env var overrides.
pub fn load_settings() -> Result<RelaySettings> {
    load_settings_from_path(&settings_path())
}

/// Load settings from a specific path with env var overrides.
///
/// A missing file yields defaults. Unreadable or non-JSON files, fields of
/// the wrong type, and out-of-range values are errors.
pub fn load_settings_from_path(path: &Path) -> Result<RelaySettings> {
    let defaults = serde_json::to_value(RelaySettings::default()).map_err(SettingsError::Shape)?;

    let merged = match std::fs::read_to_string(path) {
        Ok(content) => {
            debug!(?path, "loading settings from file");
            let user: Value =
                serde_json::from_str(&content).map_err(|source| SettingsError::Parse {
                    path: path.to_path_buf(),
                    source,
                })?;
            deep_merge(defaults, user)
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            debug!(?path, "settings file not found, using defaults");
            defaults
        }
        Err(source) => {
            return Err(SettingsError::Read {
                path: path.to_path_buf(),
                source,
            });
        }
    };

    let mut settings: RelaySettings =
        serde_json::from_value(merged).map_err(SettingsError::Shape)?;
    apply_env_overrides(&mut settings);
    settings.validate()?;
    Ok(settings)
}

/// Merge `overlay` into `base`.
pub fn deep_merge(base: Value, overlay: Value) -> Value {
    match (base, overlay) {
        (Value::Object(mut base), Value::Object(overlay)) => {
            for (key, value) in overlay {
                let merged = match (base.remove(&key), value) {
                    (Some(existing), Value::Null) => existing,
                    (Some(existing), value) => deep_merge(existing, value),
                    (None, value) => value,
                };
                if !merged.is_null() {
                    let _ = base.insert(key, merged);
                }
            }
            Value::Object(base)
        }
        (base, Value::Null) => base,
        (_, overlay) => overlay,
    }
}

/// Apply `RELAY_*` environment variable overrides to loaded settings.
///
/// Unparseable or out-of-range values are ignored with a warning.
pub fn apply_env_overrides(settings: &mut RelaySettings) {
    apply_overrides(settings, |name| std::env::var(name).ok());
}

/// Apply overrides read through `lookup` (variable name → raw value).
pub fn apply_overrides<F>(settings: &mut RelaySettings, lookup: F)
where
    F: Fn(&str) -> Option<String>,
{
    let text = |name: &str| lookup(name).filter(|v| !v.is_empty());
    let server = &mut settings.server;

    if let Some(v) = text("RELAY_HOST") {
        server.host = v;
    }
    if let Some(v) = ranged(&lookup, "RELAY_PORT", 1..=u16::MAX) {
        server.port = v;
    }
    if let Some(v) = text("RELAY_ALLOWED_ORIGINS") {
        server.allowed_origins = parse_list(&v);
    }
    if let Some(v) = text("RELAY_STATIC_DIR") {
        server.static_dir = Some(v);
    }
    if let Some(v) = ranged(&lookup, "RELAY_MAX_MESSAGE_SIZE", 64..=16 * 1024 * 1024) {
        server.max_message_size = v;
    }
    if let Some(v) = ranged(&lookup, "RELAY_OUTBOUND_QUEUE", 1..=65_536) {
        server.outbound_queue_capacity = v;
    }

    if let Some(v) = ranged(&lookup, "RELAY_PONG_WAIT_MS", 100..=600_000) {
        settings.liveness.pong_wait_ms = v;
    }
    if let Some(v) = ranged(&lookup, "RELAY_TOKEN_TTL_SECS", 1..=86_400) {
        settings.tokens.ttl_secs = v;
    }
    if let Some(v) = ranged(&lookup, "RELAY_TOKEN_SWEEP_MS", 10..=60_000) {
        settings.tokens.sweep_interval_ms = v;
    }

    if let Some(v) = text("RELAY_USERNAME") {
        settings.auth.username = v;
    }
    if let Some(v) = text("RELAY_PASSWORD") {
        settings.auth.password = v;
    }

    if let Some(v) = text("RELAY_LOG_LEVEL") {
        settings.logging.level = v;
    }
    if let Some(raw) = lookup("RELAY_LOG_JSON") {
        match parse_bool(&raw) {
            Some(v) => settings.logging.json = v,
            None => warn!(key = "RELAY_LOG_JSON", value = %raw, "not a boolean, ignoring"),
        }
    }
}

fn ranged<T, F>(lookup: &F, name: &str, range: RangeInclusive<T>) -> Option<T>
where
    T: FromStr + PartialOrd + Display,
    F: Fn(&str) -> Option<String>,
{
    let raw = lookup(name)?;
    let parsed = parse_in_range(&raw, &range);
    if parsed.is_none() {
        warn!(
            key = name,
            value = %raw,
            min = %range.start(),
            max = %range.end(),
            "out of range or not a number, ignoring"
        );
    }
    parsed
}

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

/// Parse a number and keep it only if it falls inside `range`.
pub fn parse_in_range<T>(val: &str, range: &RangeInclusive<T>) -> Option<T>
where
    T: FromStr + PartialOrd,
{
    val.trim().parse().ok().filter(|n| range.contains(n))
}

/// Split a comma-separated list, trimming entries and dropping empties.
pub fn parse_list(val: &str) -> Vec<String> {
    val.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}
