//! Error taxonomy shared by both transports and the controller

/// Errors raised while synchronizing progress
///
/// Values are `Clone` so they can be stored as a session's last error and
/// carried on broadcast events.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SyncError {
    /// Connection-level failure (refused, reset, dropped)
    #[error("transport error: {0}")]
    Transport(String),

    /// The server answered with a non-success status
    #[error("protocol error: HTTP {status}: {message}")]
    Protocol { status: u16, message: String },

    /// The payload does not match the snapshot shape
    #[error("decode error: {0}")]
    Decode(String),

    /// Invalid local configuration (bad base URL, unreadable config)
    #[error("config error: {0}")]
    Config(String),
}

impl SyncError {
    pub fn transport(err: impl std::fmt::Display) -> Self {
        SyncError::Transport(err.to_string())
    }

    pub fn decode(err: impl std::fmt::Display) -> Self {
        SyncError::Decode(err.to_string())
    }

    pub fn kind(&self) -> &'static str {
        match self {
            SyncError::Transport(_) => "transport",
            SyncError::Protocol { .. } => "protocol",
            SyncError::Decode(_) => "decode",
            SyncError::Config(_) => "config",
        }
    }
}

impl From<url::ParseError> for SyncError {
    fn from(err: url::ParseError) -> Self {
        SyncError::Config(format!("invalid URL: {err}"))
    }
}

pub type Result<T, E = SyncError> = std::result::Result<T, E>;
