use crate::SessionId;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SessionError {
    #[error("Unknown session: {0}")]
    UnknownSession(SessionId),

    #[error("Session closed: {0}")]
    ClosedSession(SessionId),

    #[error("Command failure: server last applied sequence {last_sequence}")]
    CommandFailure { last_sequence: u64 },

    #[error("Query failure: {0}")]
    QueryFailure(String),

    #[error("Application error: {0}")]
    ApplicationError(String),

    #[error("No leader available")]
    NoLeader,

    #[error("Cluster unavailable: {0}")]
    Unavailable(String),

    #[error("Connection error: {0}")]
    Connection(String),

    #[error("Request timed out after {0}ms")]
    Timeout(u64),

    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("Member selector exhausted")]
    SelectorExhausted,

    #[error("Gave up after {attempts} attempts: {cause}")]
    RetriesExhausted { attempts: u32, cause: String },

    #[error("Configuration error: {0}")]
    Configuration(String),
}

impl SessionError {
    /// Transport-level failures that are worth sending again.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            SessionError::NoLeader
                | SessionError::Unavailable(_)
                | SessionError::Connection(_)
                | SessionError::Timeout(_)
        )
    }

    /// Failures after which the session can no longer be used.
    pub fn is_session_fatal(&self) -> bool {
        matches!(
            self,
            SessionError::UnknownSession(_) | SessionError::ClosedSession(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, SessionError>;
