//! Settings loading with deep merge and environment variable overrides.
//!
//! Deep merge rules:
//! - objects merge recursively, source winning per key
//! - arrays and primitives are replaced wholesale
//! - nulls in the source are skipped

use std::path::{Path, PathBuf};

use serde_json::Value;
use tracing::{debug, warn};

use crate::errors::Result;
use crate::types::EvalmuxSettings;

const MAX_EVENT_CAPACITY: usize = 1 << 20;
const MAX_PROMPT_LENGTH: usize = 1 << 20;

/// `~/.evalmux/settings.json`
pub fn settings_path() -> PathBuf {
    let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
    PathBuf::from(home).join(".evalmux").join("settings.json")
}

pub fn load_settings() -> Result<EvalmuxSettings> {
    load_settings_from_path(&settings_path())
}

/// Load settings from `path` with env var overrides applied.
///
/// A missing file yields defaults; malformed JSON is an error.
pub fn load_settings_from_path(path: &Path) -> Result<EvalmuxSettings> {
    let defaults = serde_json::to_value(EvalmuxSettings::default())?;

    let merged = if path.exists() {
        debug!(?path, "loading settings from file");
        let content = std::fs::read_to_string(path)?;
        let user: Value = serde_json::from_str(&content)?;
        deep_merge(defaults, user)
    } else {
        debug!(?path, "settings file not found, using defaults");
        defaults
    };

    let mut settings: EvalmuxSettings = serde_json::from_value(merged)?;
    apply_env_overrides(&mut settings);
    settings.validate()?;
    Ok(settings)
}

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

/// Apply `EVALMUX_*` environment overrides. Invalid values are logged and ignored.
pub fn apply_env_overrides(settings: &mut EvalmuxSettings) {
    apply_overrides(settings, |name| std::env::var(name).ok());
}

fn apply_overrides(settings: &mut EvalmuxSettings, lookup: impl Fn(&str) -> Option<String>) {
    let env = EnvReader { lookup };
    if let Some(v) = env.usize("EVALMUX_EVENT_CAPACITY", 1, MAX_EVENT_CAPACITY) {
        settings.session.event_capacity = v;
    }
    if let Some(v) = env.string("EVALMUX_LOG_LEVEL") {
        settings.logging.level = v;
    }
    if let Some(v) = env.bool("EVALMUX_LOG_JSON") {
        settings.logging.json = v;
    }
    if let Some(v) = env.string("EVALMUX_PROMPT") {
        settings.engine.prompt = v;
    }
    if let Some(v) = env.usize("EVALMUX_MAX_LENGTH", 1, MAX_PROMPT_LENGTH) {
        settings.engine.max_length = v;
    }
}

// ── Pure parsers ────────────────────────────────────────────────────────────

/// Accepts (case-insensitive) `true`/`1`/`yes`/`on` and `false`/`0`/`no`/`off`.
pub fn parse_bool(val: &str) -> Option<bool> {
    match val.to_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Some(true),
        "false" | "0" | "no" | "off" => Some(false),
        _ => None,
    }
}

pub fn parse_usize_range(val: &str, min: usize, max: usize) -> Option<usize> {
    let n: usize = val.trim().parse().ok()?;
    (min..=max).contains(&n).then_some(n)
}

struct EnvReader<F> {
    lookup: F,
}

impl<F: Fn(&str) -> Option<String>> EnvReader<F> {
    fn string(&self, name: &str) -> Option<String> {
        (self.lookup)(name).filter(|v| !v.is_empty())
    }

    fn bool(&self, name: &str) -> Option<bool> {
        let val = (self.lookup)(name)?;
        let result = parse_bool(&val);
        if result.is_none() {
            warn!(key = name, value = %val, "invalid boolean env var, ignoring");
        }
        result
    }

    fn usize(&self, name: &str, min: usize, max: usize) -> Option<usize> {
        let val = (self.lookup)(name)?;
        let result = parse_usize_range(&val, min, max);
        if result.is_none() {
            warn!(key = name, value = %val, min, max, "invalid integer env var, ignoring");
        }
        result
    }
}
