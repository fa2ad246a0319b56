//! Settings type definitions.
//!
//! Field names are camelCase on disk. Every section is `#[serde(default)]`
//! so a partial file only overrides what it names.

use std::collections::BTreeMap;

use evalmux_core::CallFlag;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::errors::{Result, SettingsError};

/// Root settings type, loaded from `~/.evalmux/settings.json`.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct EvalmuxSettings {
    pub session: SessionSettings,
    pub logging: LoggingSettings,
    pub engine: EngineSettings,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SessionSettings {
    /// Capacity of the session event broadcast channel.
    pub event_capacity: usize,
    /// Frame kinds skipped when deciding how far an engine error unwinds.
    pub internal_frames: Vec<CallFlag>,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            event_capacity: 1024,
            internal_frames: CallFlag::default_internal(),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LoggingSettings {
    /// Default level directive, e.g. `info` or `debug`.
    pub level: String,
    /// Emit JSON lines instead of human-readable output.
    pub json: bool,
    /// Per-target level overrides (`"evalmux_session": "trace"`).
    pub modules: BTreeMap<String, String>,
    /// How many warn+ records the in-memory buffer keeps.
    pub recent_capacity: usize,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".into(),
            json: false,
            modules: BTreeMap::new(),
            recent_capacity: 256,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct EngineSettings {
    pub prompt: String,
    pub max_length: usize,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            prompt: "> ".into(),
            max_length: 4096,
        }
    }
}

impl EvalmuxSettings {
    /// Repair values that have a safe fallback and reject the rest.
    pub fn validate(&mut self) -> Result<()> {
        if self.session.event_capacity == 0 {
            warn!("session.eventCapacity of 0 raised to 1");
            self.session.event_capacity = 1;
        }
        if self.engine.max_length == 0 {
            return Err(SettingsError::InvalidValue(
                "engine.maxLength must be positive".into(),
            ));
        }
        Ok(())
    }
}
