//! # evalmux-settings
//!
//! Layered configuration, lowest priority first:
//! 1. **Compiled defaults** from [`EvalmuxSettings::default()`]
//! 2. **User file** `~/.evalmux/settings.json`, deep-merged over the defaults
//! 3. **Environment variables** `EVALMUX_*`

#![deny(unsafe_code)]

pub mod errors;
pub mod loader;
pub mod types;

pub use errors::{Result, SettingsError};
pub use loader::{apply_env_overrides, deep_merge, load_settings, load_settings_from_path, settings_path};
pub use types::{EngineSettings, EvalmuxSettings, LoggingSettings, SessionSettings};
