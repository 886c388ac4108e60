use std::time::Duration;

/// Heartbeat intervals a peer may stay silent before it is dropped.
pub const MISSED_HEARTBEATS: u32 = 3;

/// Runtime configuration for the reverse WebSocket server.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub call_timeout_ms: u64,
    pub heartbeat_interval_secs: u64,
    pub max_message_size: usize,
    /// Bound for each per-connection queue (inbound, outbound, calls).
    pub queue_capacity: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".into(),
            port: 6700,
            call_timeout_ms: 30_000,
            heartbeat_interval_secs: 30,
            max_message_size: 16 * 1024 * 1024,
            queue_capacity: 1024,
        }
    }
}

impl ServerConfig {
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn call_timeout(&self) -> Duration {
        Duration::from_millis(self.call_timeout_ms)
    }

    /// Ping interval; never zero.
    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_secs(self.heartbeat_interval_secs.max(1))
    }

    /// Silence after which the peer counts as gone.
    pub fn peer_timeout(&self) -> Duration {
        self.heartbeat_interval() * MISSED_HEARTBEATS
    }

    /// Queue bound; never zero.
    pub fn queue_capacity(&self) -> usize {
        self.queue_capacity.max(1)
    }
}
