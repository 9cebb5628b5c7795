mod error;
mod ids;
mod operation;
mod strategy;

pub use error::{Result, SessionError};
pub use ids::{MemberId, SessionId};
pub use operation::{OperationId, OperationType, PrimitiveOperation};
pub use strategy::{CommunicationStrategy, PrimitiveState, ReadConsistency};

/// Session timeout used when none is configured
pub const DEFAULT_SESSION_TIMEOUT_MS: u64 = 5_000;
