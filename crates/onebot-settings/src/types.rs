//! Settings type definitions.
//!
//! Field names are camelCase on the wire. Every section is `#[serde(default)]`
//! so a settings file may specify only the values it changes.

use serde::{Deserialize, Serialize};

use crate::errors::{Result, SettingsError};

/// Root settings type.
///
/// ```json
/// {
///   "server": { "port": 6700, "callTimeoutMs": 10000 },
///   "logging": { "level": "debug" }
/// }
/// ```
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct OneBotSettings {
    pub server: ServerSettings,
    pub logging: LoggingSettings,
}

/// Listening endpoint and call behavior.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ServerSettings {
    /// Interface to bind.
    pub host: String,
    /// Port the bot client connects to.
    pub port: u16,
    /// How long a call waits for its response.
    pub call_timeout_ms: u64,
    /// Interval between WebSocket pings sent to the peer.
    pub heartbeat_interval_secs: u64,
    /// Largest accepted inbound frame, in bytes.
    pub max_message_size: usize,
    /// Capacity of the per-connection inbound, outbound and call queues.
    pub queue_capacity: usize,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".into(),
            port: 6700,
            call_timeout_ms: 30_000,
            heartbeat_interval_secs: 30,
            max_message_size: 16 * 1024 * 1024, // 16 MB
            queue_capacity: 1024,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LoggingSettings {
    /// `trace`, `debug`, `info`, `warn` or `error`.
    pub level: String,
    /// `compact` or `json`.
    pub format: String,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".into(),
            format: "compact".into(),
        }
    }
}

impl OneBotSettings {
    /// Reject values the server cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.server.host.trim().is_empty() {
            return Err(SettingsError::InvalidValue("server.host is empty".into()));
        }
        if self.server.call_timeout_ms == 0 {
            return Err(SettingsError::InvalidValue(
                "server.callTimeoutMs must be positive".into(),
            ));
        }
        if self.server.heartbeat_interval_secs == 0 {
            return Err(SettingsError::InvalidValue(
                "server.heartbeatIntervalSecs must be positive".into(),
            ));
        }
        if self.server.max_message_size == 0 {
            return Err(SettingsError::InvalidValue(
                "server.maxMessageSize must be positive".into(),
            ));
        }
        if self.server.queue_capacity == 0 {
            return Err(SettingsError::InvalidValue(
                "server.queueCapacity must be positive".into(),
            ));
        }
        Ok(())
    }
}
