mod config;
mod connection;
mod context;
mod invoker;
mod manager;
mod selector;
mod sequencer;
mod session;
mod state;

pub use config::{RetryConfig, SessionConfig};
pub use connection::{Connection, SessionConnection, Transport};
pub use context::SessionContext;
pub use invoker::{AttemptPhase, Invocation, Invoker};
pub use manager::{ExpiredSessions, SessionManager};
pub use selector::{ClusterView, MemberSelector, MemberSelectorManager};
pub use sequencer::{Callback, ResponseCallback, Sequencer};
pub use session::open_session;
pub use state::SessionState;
