use std::time::Duration;

use crate::uci::UciError;

/// Failures of an engine worker or the pool that owns it.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum EngineError {
    /// The engine answered out of protocol or never acknowledged a command.
    #[error("Engine protocol error: {0}")]
    Protocol(String),
    /// No `bestmove` arrived before the search deadline.
    #[error("Engine timed out after {0:?}")]
    Timeout(Duration),
    /// The process exited or its pipes closed.
    #[error("Engine crashed: {0}")]
    Crashed(String),
    /// No worker could be started or handed out.
    #[error("Engine unavailable: {0}")]
    Unavailable(String),
}

impl From<UciError> for EngineError {
    fn from(e: UciError) -> Self {
        match e {
            UciError::Io(io) => Self::Crashed(io.to_string()),
            UciError::NoStdin | UciError::NoStdout => Self::Unavailable(e.to_string()),
            other => Self::Protocol(other.to_string()),
        }
    }
}
