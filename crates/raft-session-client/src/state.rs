use raft_session_core::{PrimitiveState, SessionId};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Identity and counters of one open session.
///
/// Not synchronized: a session's state is only ever touched from its
/// [`SessionContext`](crate::SessionContext).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionState {
    client_id: Uuid,
    session_id: SessionId,
    primitive_name: String,
    primitive_type: String,
    timeout_ms: u64,
    lifecycle: PrimitiveState,
    command_request: u64,
    command_response: u64,
    response_index: u64,
    event_index: u64,
}

impl SessionState {
    pub fn new(
        session_id: SessionId,
        primitive_name: impl Into<String>,
        primitive_type: impl Into<String>,
        timeout_ms: u64,
    ) -> Self {
        SessionState {
            client_id: Uuid::new_v4(),
            session_id,
            primitive_name: primitive_name.into(),
            primitive_type: primitive_type.into(),
            timeout_ms,
            lifecycle: PrimitiveState::Connected,
            command_request: 0,
            command_response: 0,
            response_index: 1,
            event_index: 1,
        }
    }

    pub fn client_id(&self) -> Uuid {
        self.client_id
    }

    pub fn session_id(&self) -> SessionId {
        self.session_id
    }

    pub fn primitive_name(&self) -> &str {
        &self.primitive_name
    }

    pub fn primitive_type(&self) -> &str {
        &self.primitive_type
    }

    pub fn timeout_ms(&self) -> u64 {
        self.timeout_ms
    }

    pub fn lifecycle(&self) -> PrimitiveState {
        self.lifecycle
    }

    pub fn set_lifecycle(&mut self, lifecycle: PrimitiveState) {
        self.lifecycle = lifecycle;
    }

    pub fn is_open(&self) -> bool {
        self.lifecycle.is_open()
    }

    /// Last command sequence handed out
    pub fn command_request(&self) -> u64 {
        self.command_request
    }

    /// Allocate the next command sequence, starting at 1.
    pub fn next_command_request(&mut self) -> u64 {
        self.command_request += 1;
        self.command_request
    }

    /// Highest command sequence whose result was delivered
    pub fn command_response(&self) -> u64 {
        self.command_response
    }

    pub fn set_command_response(&mut self, sequence: u64) {
        if sequence > self.command_response {
            self.command_response = sequence;
        }
    }

    /// Highest log index observed in a delivered response
    pub fn response_index(&self) -> u64 {
        self.response_index
    }

    pub fn set_response_index(&mut self, index: u64) {
        if index > self.response_index {
            self.response_index = index;
        }
    }

    /// Highest event index delivered to listeners
    pub fn event_index(&self) -> u64 {
        self.event_index
    }

    pub fn set_event_index(&mut self, index: u64) {
        if index > self.event_index {
            self.event_index = index;
        }
    }
}
