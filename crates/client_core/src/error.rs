use std::fmt::Display;

use thiserror::Error;

/// Failure taxonomy shared by both client state machines.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SyncError {
    /// The server rejected a write payload. Local state must stay unchanged.
    #[error("{0}")]
    Validation(String),
    /// The server answered, but the requested record does not exist yet.
    #[error("{0}")]
    NotFound(String),
    #[error("transport error: {0}")]
    Transport(String),
    #[error("server error ({status}): {message}")]
    UnexpectedServer { status: u16, message: String },
}

pub type SyncResult<T> = Result<T, SyncError>;

impl SyncError {
    pub fn transport(err: impl Display) -> Self {
        Self::Transport(err.to_string())
    }

    /// HTTP status reported by the server, when one was received.
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Validation(_) => Some(400),
            Self::NotFound(_) => Some(404),
            Self::UnexpectedServer { status, .. } => Some(*status),
            Self::Transport(_) => None,
        }
    }
}
