//! # onebot-settings
//!
//! Layered configuration for the OneBot reverse-WebSocket server.
//!
//! Settings are resolved from three layers (in priority order):
//! 1. **Compiled defaults**: [`OneBotSettings::default()`]
//! 2. **Settings file**: JSON, deep-merged over defaults
//! 3. **Environment variables**: `ONEBOT_*` overrides (highest priority)
//!
//! The binary applies its command-line flags on top of the result.

pub mod errors;
pub mod loader;
pub mod types;

pub use errors::{Result, SettingsError};
pub use loader::{
    apply_env_overrides, apply_overrides_with, deep_merge, load_settings, load_settings_from_path,
    settings_path,
};
pub use types::{LoggingSettings, OneBotSettings, ServerSettings};
