use bytes::Bytes;
use raft_session_core::{PrimitiveOperation, SessionError, SessionId};
use serde::{Deserialize, Serialize};

/// Error kinds a member may report in place of a result
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RaftErrorKind {
    /// The member is not the leader and cannot serve the request
    NoLeader,
    /// The command was received but not applied because of a sequencing gap
    CommandFailure,
    /// The query could not be evaluated
    QueryFailure,
    /// The state machine rejected the operation
    ApplicationError,
    UnknownClient,
    UnknownSession,
    UnknownService,
    ProtocolError,
    /// The member cannot serve requests right now
    Unavailable,
}

impl RaftErrorKind {
    /// Whether a response carrying this error settles the request, as opposed to
    /// asking the client to try another member.
    pub fn is_terminal(&self) -> bool {
        !matches!(self, RaftErrorKind::NoLeader | RaftErrorKind::Unavailable)
    }
}

/// Error carried by an unsuccessful response
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RaftError {
    pub kind: RaftErrorKind,
    pub message: Option<String>,
}

impl RaftError {
    pub fn new(kind: RaftErrorKind) -> Self {
        RaftError { kind, message: None }
    }

    pub fn with_message(kind: RaftErrorKind, message: impl Into<String>) -> Self {
        RaftError {
            kind,
            message: Some(message.into()),
        }
    }

    /// Map to the client error surfaced to callers.
    pub fn to_session_error(&self, session: SessionId, last_sequence: u64) -> SessionError {
        let message = self.message.clone().unwrap_or_default();
        match self.kind {
            RaftErrorKind::NoLeader => SessionError::NoLeader,
            RaftErrorKind::CommandFailure => SessionError::CommandFailure { last_sequence },
            RaftErrorKind::QueryFailure => SessionError::QueryFailure(message),
            RaftErrorKind::ApplicationError => SessionError::ApplicationError(message),
            RaftErrorKind::UnknownClient | RaftErrorKind::UnknownSession => {
                SessionError::UnknownSession(session)
            }
            RaftErrorKind::UnknownService | RaftErrorKind::ProtocolError => {
                SessionError::Protocol(message)
            }
            RaftErrorKind::Unavailable => SessionError::Unavailable(message),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ResponseStatus {
    Ok,
    Error,
}

/// Submit a command in the session's command sequence
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandRequest {
    pub session: SessionId,
    pub sequence: u64,
    pub operation: PrimitiveOperation,
}

/// Evaluate a query after the given command sequence and log index
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueryRequest {
    pub session: SessionId,
    pub sequence: u64,
    pub index: u64,
    pub operation: PrimitiveOperation,
}

/// Completion of a command or query
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OperationResponse {
    pub status: ResponseStatus,
    pub error: Option<RaftError>,
    /// Log index the operation was applied at
    pub index: u64,
    /// Last event index published to the session when the operation was applied
    pub event_index: u64,
    /// Last command sequence the server applied for the session
    pub last_sequence: u64,
    pub result: Bytes,
}

pub type CommandResponse = OperationResponse;
pub type QueryResponse = OperationResponse;

impl OperationResponse {
    pub fn ok(index: u64, event_index: u64, result: impl Into<Bytes>) -> Self {
        OperationResponse {
            status: ResponseStatus::Ok,
            error: None,
            index,
            event_index,
            last_sequence: 0,
            result: result.into(),
        }
    }

    pub fn error(error: RaftError) -> Self {
        OperationResponse {
            status: ResponseStatus::Error,
            error: Some(error),
            index: 0,
            event_index: 0,
            last_sequence: 0,
            result: Bytes::new(),
        }
    }

    /// Sequencing gap: the server last applied `last_sequence`.
    pub fn command_failure(last_sequence: u64) -> Self {
        OperationResponse {
            last_sequence,
            ..Self::error(RaftError::new(RaftErrorKind::CommandFailure))
        }
    }

    pub fn with_last_sequence(mut self, last_sequence: u64) -> Self {
        self.last_sequence = last_sequence;
        self
    }

    pub fn is_ok(&self) -> bool {
        self.status == ResponseStatus::Ok
    }

    pub fn error_kind(&self) -> Option<RaftErrorKind> {
        self.error.as_ref().map(|e| e.kind)
    }

    /// Whether this response settles the request on the member that sent it.
    pub fn is_complete(&self) -> bool {
        if self.is_ok() {
            return true;
        }
        self.error.as_ref().is_some_and(|e| e.kind.is_terminal())
    }
}

/// A single event emitted by a primitive
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PrimitiveEvent {
    pub event_type: String,
    pub value: Bytes,
}

impl PrimitiveEvent {
    pub fn new(event_type: impl Into<String>, value: impl Into<Bytes>) -> Self {
        PrimitiveEvent {
            event_type: event_type.into(),
            value: value.into(),
        }
    }
}

/// Batch of events pushed by the server, chained by `previous_index`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublishRequest {
    pub session: SessionId,
    pub event_index: u64,
    pub previous_index: u64,
    pub events: Vec<PrimitiveEvent>,
}

impl PublishRequest {
    pub fn new(session: SessionId, event_index: u64, previous_index: u64) -> Self {
        PublishRequest {
            session,
            event_index,
            previous_index,
            events: Vec::new(),
        }
    }

    pub fn with_event(mut self, event: PrimitiveEvent) -> Self {
        self.events.push(event);
        self
    }
}
