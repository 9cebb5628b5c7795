use crate::config::SessionConfig;
use crate::connection::{SessionConnection, Transport};
use crate::invoker::Invoker;
use crate::manager::SessionManager;
use crate::selector::MemberSelectorManager;
use crate::state::SessionState;
use raft_session_core::{CommunicationStrategy, SessionId};
use std::sync::Arc;
use tracing::info;

/// Wire an [`Invoker`] for a session the cluster has already registered.
///
/// Commands are routed to the leader; queries follow the configured read
/// consistency.
pub fn open_session<T: Transport>(
    config: &SessionConfig,
    session_id: SessionId,
    selectors: &MemberSelectorManager,
    transport: Arc<T>,
    manager: Arc<dyn SessionManager>,
) -> Invoker {
    let state = SessionState::new(
        session_id,
        config.primitive_name.clone(),
        config.primitive_type.clone(),
        config.timeout_ms,
    );

    let query_strategy = config.read_consistency.strategy();
    let leader = SessionConnection::new(
        transport.clone(),
        selectors.create_selector(CommunicationStrategy::Leader),
    );
    let reader = SessionConnection::new(transport, selectors.create_selector(query_strategy));

    info!(
        "Opened {} for {} '{}' (queries via {})",
        session_id,
        config.primitive_type,
        config.primitive_name,
        query_strategy.as_str()
    );

    Invoker::new(
        state,
        Arc::new(leader),
        Arc::new(reader),
        manager,
        config.retry,
    )
}
