//! Request routing for a session.
//!
//! [`Connection`] is what the invoker talks to. [`SessionConnection`] implements
//! it on top of a per-member [`Transport`], choosing members through a
//! [`MemberSelector`] and failing over when a member cannot serve the request.

use crate::selector::MemberSelector;
use async_trait::async_trait;
use futures::future::BoxFuture;
use futures::FutureExt;
use parking_lot::Mutex;
use raft_session_core::{MemberId, Result, SessionError};
use raft_session_protocol::{
    CommandRequest, CommandResponse, OperationResponse, QueryRequest, QueryResponse, RaftErrorKind,
};
use std::future::Future;
use std::sync::Arc;
use tracing::debug;

/// Logical connection the invoker sends one kind of request over.
///
/// The returned futures own everything they need so they can be driven on a
/// separate task.
pub trait Connection: Send + Sync {
    fn command(&self, request: CommandRequest) -> BoxFuture<'static, Result<CommandResponse>>;

    fn query(&self, request: QueryRequest) -> BoxFuture<'static, Result<QueryResponse>>;
}

/// Delivers requests to one specific member
#[async_trait]
pub trait Transport: Send + Sync + 'static {
    async fn command(&self, member: &MemberId, request: CommandRequest) -> Result<CommandResponse>;

    async fn query(&self, member: &MemberId, request: QueryRequest) -> Result<QueryResponse>;
}

struct Routing {
    selector: MemberSelector,
    current: Option<MemberId>,
    version: u64,
}

/// Member-routed connection that sticks to the member that last answered
pub struct SessionConnection<T> {
    transport: Arc<T>,
    routing: Arc<Mutex<Routing>>,
}

impl<T> Clone for SessionConnection<T> {
    fn clone(&self) -> Self {
        SessionConnection {
            transport: self.transport.clone(),
            routing: self.routing.clone(),
        }
    }
}

impl<T: Transport> SessionConnection<T> {
    pub fn new(transport: Arc<T>, selector: MemberSelector) -> Self {
        let version = selector.version();
        SessionConnection {
            transport,
            routing: Arc::new(Mutex::new(Routing {
                selector,
                current: None,
                version,
            })),
        }
    }

    /// Member requests currently go to, if one has been chosen
    pub fn current_member(&self) -> Option<MemberId> {
        self.routing.lock().current.clone()
    }

    fn next_member(&self) -> Result<MemberId> {
        let mut routing = self.routing.lock();

        let version = routing.selector.version();
        if version != routing.version {
            routing.version = version;
            routing.current = None;
        }

        if let Some(member) = &routing.current {
            return Ok(member.clone());
        }

        if !routing.selector.has_next() {
            routing.selector.reset();
            return Err(SessionError::Unavailable(format!(
                "no reachable member among {:?}",
                routing.selector.members()
            )));
        }

        let member = routing.selector.next()?;
        routing.current = Some(member.clone());
        Ok(member)
    }

    fn forget(&self, member: &MemberId) {
        let mut routing = self.routing.lock();
        if routing.current.as_ref() == Some(member) {
            routing.current = None;
        }
    }

    fn settle(&self) {
        self.routing.lock().selector.reset();
    }

    async fn send<R, F, Fut>(self, request: R, send: F) -> Result<OperationResponse>
    where
        R: Clone,
        F: Fn(Arc<T>, MemberId, R) -> Fut,
        Fut: Future<Output = Result<OperationResponse>>,
    {
        let mut last_error: Option<SessionError> = None;
        loop {
            let member = match self.next_member() {
                Ok(member) => member,
                Err(error) => return Err(last_error.unwrap_or(error)),
            };

            match send(self.transport.clone(), member.clone(), request.clone()).await {
                Ok(response) if response.is_complete() => {
                    self.settle();
                    return Ok(response);
                }
                Ok(response) => {
                    debug!("Member {} cannot serve request: {:?}", member, response.error);
                    self.forget(&member);
                    last_error = Some(match response.error_kind() {
                        Some(RaftErrorKind::NoLeader) => SessionError::NoLeader,
                        _ => SessionError::Unavailable(format!("member {} unavailable", member)),
                    });
                }
                Err(error) if error.is_retryable() => {
                    debug!("Failed to reach member {}: {}", member, error);
                    self.forget(&member);
                    last_error = Some(error);
                }
                Err(error) => return Err(error),
            }
        }
    }
}

impl<T: Transport> Connection for SessionConnection<T> {
    fn command(&self, request: CommandRequest) -> BoxFuture<'static, Result<CommandResponse>> {
        let connection = self.clone();
        async move {
            connection
                .send(request, |transport, member, request| async move {
                    transport.command(&member, request).await
                })
                .await
        }
        .boxed()
    }

    fn query(&self, request: QueryRequest) -> BoxFuture<'static, Result<QueryResponse>> {
        let connection = self.clone();
        async move {
            connection
                .send(request, |transport, member, request| async move {
                    transport.query(&member, request).await
                })
                .await
        }
        .boxed()
    }
}
