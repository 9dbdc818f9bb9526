//! Error type shared by the session, registry and transports.

use crate::types::SessionId;

pub type Result<T, E = SessionError> = std::result::Result<T, E>;

#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("session is closed")]
    Closed,

    #[error("session is still connecting")]
    NotConnected,

    #[error("transport error: {0}")]
    Transport(String),

    #[error("failed to encode request: {0}")]
    Encode(#[from] serde_json::Error),

    #[error("unknown session: {0}")]
    UnknownSession(SessionId),
}

impl SessionError {
    /// Short machine-readable code, used as a structured log field.
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::Closed => "closed",
            Self::NotConnected => "not_connected",
            Self::Transport(_) => "transport",
            Self::Encode(_) => "encode",
            Self::UnknownSession(_) => "unknown_session",
        }
    }
}
