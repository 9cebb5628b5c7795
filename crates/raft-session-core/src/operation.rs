use bytes::Bytes;
use serde::{Deserialize, Serialize};

/// Whether an operation mutates replicated state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OperationType {
    /// Applied exactly once, in session sequence order
    Command,
    /// Read-only
    Query,
}

impl OperationType {
    pub fn as_str(&self) -> &'static str {
        match self {
            OperationType::Command => "command",
            OperationType::Query => "query",
        }
    }
}

/// Name and kind of a primitive operation
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct OperationId {
    pub name: String,
    pub op_type: OperationType,
}

impl OperationId {
    pub fn command(name: impl Into<String>) -> Self {
        OperationId {
            name: name.into(),
            op_type: OperationType::Command,
        }
    }

    pub fn query(name: impl Into<String>) -> Self {
        OperationId {
            name: name.into(),
            op_type: OperationType::Query,
        }
    }
}

/// An operation submitted against a primitive, with its encoded argument
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PrimitiveOperation {
    pub id: OperationId,
    pub value: Bytes,
}

impl PrimitiveOperation {
    pub fn new(id: OperationId, value: impl Into<Bytes>) -> Self {
        PrimitiveOperation {
            id,
            value: value.into(),
        }
    }

    pub fn command(name: impl Into<String>, value: impl Into<Bytes>) -> Self {
        Self::new(OperationId::command(name), value)
    }

    pub fn query(name: impl Into<String>, value: impl Into<Bytes>) -> Self {
        Self::new(OperationId::query(name), value)
    }

    /// Empty command used to fill a sequence slot the client gave up on.
    pub fn noop() -> Self {
        Self::command("", Bytes::new())
    }

    pub fn op_type(&self) -> OperationType {
        self.id.op_type
    }

    pub fn is_command(&self) -> bool {
        self.id.op_type == OperationType::Command
    }
}
