//! Request, response and event types exchanged between a session client and
//! the cluster. Encoding is left to the transport.

mod message;

pub use message::{
    CommandRequest, CommandResponse, OperationResponse, PrimitiveEvent, PublishRequest,
    QueryRequest, QueryResponse, RaftError, RaftErrorKind, ResponseStatus,
};
