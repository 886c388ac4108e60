/// Errors surfaced by the OneBot binding.
///
/// Only [`OneBotError::Bind`] is fatal; everything else is local to a single
/// call or a single inbound frame.
#[derive(Debug, thiserror::Error)]
pub enum OneBotError {
    #[error("no connection")]
    NoConnection,
    #[error("{action} failed: {message}")]
    CallFailed {
        action: String,
        retcode: Option<i64>,
        message: String,
    },
    #[error("connection closed before {action} was answered")]
    Disconnected { action: String },
    #[error("{action} timed out after {timeout_ms}ms")]
    Timeout { action: String, timeout_ms: u64 },
    #[error("malformed message: {0}")]
    MalformedMessage(String),
    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to decode response data: {0}")]
    Decode(#[from] serde_json::Error),
}

impl OneBotError {
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Bind { .. })
    }

    /// Short classification string for logging.
    pub fn error_kind(&self) -> &'static str {
        match self {
            Self::NoConnection => "no_connection",
            Self::CallFailed { .. } => "call_failed",
            Self::Disconnected { .. } => "disconnected",
            Self::Timeout { .. } => "timeout",
            Self::MalformedMessage(_) => "malformed_message",
            Self::Bind { .. } => "bind",
            Self::Decode(_) => "decode",
        }
    }
}

pub type Result<T> = std::result::Result<T, OneBotError>;
