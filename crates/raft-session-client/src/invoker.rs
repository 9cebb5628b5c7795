//! Pipelined submission of session operations.
//!
//! The invoker assigns each operation a sequencer slot (and commands a command
//! sequence), sends it over the command or query [`Connection`], and resolves
//! the caller's [`Invocation`] once the [`Sequencer`] releases the completion.
//! All bookkeeping runs on the session's [`SessionContext`].

use crate::config::RetryConfig;
use crate::connection::Connection;
use crate::context::SessionContext;
use crate::manager::SessionManager;
use crate::sequencer::Sequencer;
use crate::state::SessionState;
use bytes::Bytes;
use raft_session_core::{PrimitiveOperation, PrimitiveState, Result, SessionError, SessionId};
use raft_session_protocol::{
    CommandRequest, OperationResponse, PrimitiveEvent, PublishRequest, QueryRequest, RaftErrorKind,
};
use std::collections::BTreeMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, trace, warn};

/// Result of one invoked operation, resolved in session order
pub struct Invocation {
    session: SessionId,
    receiver: oneshot::Receiver<Result<Bytes>>,
    ready: Option<Result<Bytes>>,
}

impl Invocation {
    fn new(session: SessionId, receiver: oneshot::Receiver<Result<Bytes>>) -> Self {
        Invocation {
            session,
            receiver,
            ready: None,
        }
    }

    /// Whether the result has been released, without waiting for it.
    pub fn is_done(&mut self) -> bool {
        if self.ready.is_none() {
            match self.receiver.try_recv() {
                Ok(result) => self.ready = Some(result),
                Err(oneshot::error::TryRecvError::Closed) => {
                    self.ready = Some(Err(SessionError::ClosedSession(self.session)))
                }
                Err(oneshot::error::TryRecvError::Empty) => {}
            }
        }
        self.ready.is_some()
    }
}

impl Future for Invocation {
    type Output = Result<Bytes>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        if let Some(result) = self.ready.take() {
            return Poll::Ready(result);
        }
        let session = self.session;
        Pin::new(&mut self.receiver)
            .poll(cx)
            .map(|received| received.unwrap_or(Err(SessionError::ClosedSession(session))))
    }
}

/// Retry state of an in-flight operation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttemptPhase {
    /// Sent, waiting for a response
    AwaitingResponse,
    /// Waiting out a backoff before being sent again
    Resubmitting,
}

enum AttemptRequest {
    Command(CommandRequest),
    Query(QueryRequest),
}

struct OperationAttempt {
    attempt: u32,
    phase: AttemptPhase,
    request: AttemptRequest,
    result: oneshot::Sender<Result<Bytes>>,
}

impl OperationAttempt {
    fn command_sequence(&self) -> Option<u64> {
        match &self.request {
            AttemptRequest::Command(request) => Some(request.sequence),
            AttemptRequest::Query(_) => None,
        }
    }
}

/// Slots of the in-flight commands to send again after the server reported it
/// applied commands through `last_applied`.
///
/// Commands already resent by a newer attempt than `failed_attempt` are left
/// alone. The failed slot itself is always included.
fn resubmit_from(
    attempts: &BTreeMap<u64, OperationAttempt>,
    failed_slot: u64,
    last_applied: u64,
    failed_attempt: u32,
) -> Vec<u64> {
    attempts
        .iter()
        .filter(|(slot, attempt)| match attempt.command_sequence() {
            Some(_) if **slot == failed_slot => true,
            Some(sequence) => sequence > last_applied && attempt.attempt <= failed_attempt,
            None => false,
        })
        .map(|(slot, _)| *slot)
        .collect()
}

struct InvokerCore {
    session: SessionId,
    sequencer: Sequencer,
    attempts: BTreeMap<u64, OperationAttempt>,
    leader: Arc<dyn Connection>,
    reader: Arc<dyn Connection>,
    manager: Arc<dyn SessionManager>,
    retry: RetryConfig,
    listeners: Vec<mpsc::UnboundedSender<PrimitiveEvent>>,
}

type Ctx = SessionContext<InvokerCore>;

impl InvokerCore {
    fn submit(
        &mut self,
        operation: PrimitiveOperation,
        result: oneshot::Sender<Result<Bytes>>,
        ctx: &Ctx,
    ) {
        match self.sequencer.state().lifecycle() {
            PrimitiveState::Expired => {
                let _ = result.send(Err(SessionError::UnknownSession(self.session)));
                return;
            }
            PrimitiveState::Closed => {
                let _ = result.send(Err(SessionError::ClosedSession(self.session)));
                return;
            }
            PrimitiveState::Connected | PrimitiveState::Suspended => {}
        }

        let slot = self.sequencer.next_request();
        let request = if operation.is_command() {
            AttemptRequest::Command(CommandRequest {
                session: self.session,
                sequence: self.sequencer.next_command(),
                operation,
            })
        } else {
            let state = self.sequencer.state();
            AttemptRequest::Query(QueryRequest {
                session: self.session,
                sequence: state.command_request(),
                index: state.response_index().max(state.event_index()),
                operation,
            })
        };

        self.attempts.insert(
            slot,
            OperationAttempt {
                attempt: 1,
                phase: AttemptPhase::AwaitingResponse,
                request,
                result,
            },
        );
        self.send(slot, ctx);
    }

    fn send(&mut self, slot: u64, ctx: &Ctx) {
        let Some(attempt) = self.attempts.get_mut(&slot) else {
            return;
        };
        attempt.phase = AttemptPhase::AwaitingResponse;
        let generation = attempt.attempt;
        let context = ctx.clone();

        match &attempt.request {
            AttemptRequest::Command(request) => {
                trace!(
                    "Sending command {} (slot {}, attempt {})",
                    request.sequence, slot, generation
                );
                let response = self.leader.command(request.clone());
                tokio::spawn(async move {
                    let result = response.await;
                    context.execute(|core, ctx| core.complete_command(slot, generation, result, ctx));
                });
            }
            AttemptRequest::Query(request) => {
                trace!("Sending query (slot {}, attempt {})", slot, generation);
                let response = self.reader.query(request.clone());
                tokio::spawn(async move {
                    let result = response.await;
                    context.execute(|core, _| core.complete_query(slot, generation, result));
                });
            }
        }
    }

    fn is_current(&self, slot: u64, generation: u32) -> bool {
        match self.attempts.get(&slot) {
            Some(attempt) if attempt.attempt == generation => true,
            _ => {
                trace!("Ignoring stale completion for slot {} attempt {}", slot, generation);
                false
            }
        }
    }

    fn response_error(&self, response: &OperationResponse) -> SessionError {
        response
            .error
            .as_ref()
            .map(|error| error.to_session_error(self.session, response.last_sequence))
            .unwrap_or_else(|| SessionError::Protocol("error response without error".to_string()))
    }

    fn complete_command(
        &mut self,
        slot: u64,
        generation: u32,
        result: Result<OperationResponse>,
        ctx: &Ctx,
    ) {
        if !self.is_current(slot, generation) {
            return;
        }

        match result {
            Ok(response) if response.is_ok() => self.command_succeeded(slot, response),
            Ok(response) => match response.error_kind() {
                Some(RaftErrorKind::CommandFailure) => {
                    self.resubmit(slot, response.last_sequence, generation, ctx)
                }
                Some(RaftErrorKind::UnknownSession | RaftErrorKind::UnknownClient) => self.expire(),
                _ => {
                    let error = self.response_error(&response);
                    if error.is_retryable() {
                        self.retry(slot, error, ctx);
                    } else {
                        self.fail(slot, error);
                    }
                }
            },
            Err(error) if error.is_retryable() => self.retry(slot, error, ctx),
            Err(error) => self.fail(slot, error),
        }
    }

    fn complete_query(&mut self, slot: u64, generation: u32, result: Result<OperationResponse>) {
        if !self.is_current(slot, generation) {
            return;
        }

        match result {
            Ok(response) if response.is_ok() => self.query_succeeded(slot, response),
            Ok(response)
                if matches!(
                    response.error_kind(),
                    Some(RaftErrorKind::UnknownSession | RaftErrorKind::UnknownClient)
                ) =>
            {
                self.expire()
            }
            Ok(response) => {
                let error = self.response_error(&response);
                self.fail(slot, error);
            }
            Err(error) => self.fail(slot, error),
        }
    }

    fn command_succeeded(&mut self, slot: u64, response: OperationResponse) {
        let Some(attempt) = self.attempts.remove(&slot) else {
            return;
        };
        let sequence = attempt.command_sequence().unwrap_or_default();
        let index = response.index;
        let value = response.result.clone();
        let result = attempt.result;

        self.sequencer.sequence_response(
            slot,
            Some(&response),
            Box::new(move |state: &mut SessionState, aborted: Option<SessionError>| {
                let outcome = match aborted {
                    Some(error) => Err(error),
                    None => {
                        state.set_command_response(sequence);
                        state.set_response_index(index);
                        Ok(value)
                    }
                };
                let _ = result.send(outcome);
            }),
        );
    }

    fn query_succeeded(&mut self, slot: u64, response: OperationResponse) {
        let Some(attempt) = self.attempts.remove(&slot) else {
            return;
        };
        let index = response.index;
        let value = response.result.clone();
        let result = attempt.result;

        self.sequencer.sequence_response(
            slot,
            Some(&response),
            Box::new(move |state: &mut SessionState, aborted: Option<SessionError>| {
                let outcome = match aborted {
                    Some(error) => Err(error),
                    None => {
                        state.set_response_index(index);
                        Ok(value)
                    }
                };
                let _ = result.send(outcome);
            }),
        );
    }

    fn fail(&mut self, slot: u64, error: SessionError) {
        let Some(attempt) = self.attempts.remove(&slot) else {
            return;
        };
        debug!("Operation in slot {} failed: {}", slot, error);
        let result = attempt.result;

        self.sequencer.sequence_response(
            slot,
            None,
            Box::new(move |_: &mut SessionState, _: Option<SessionError>| {
                let _ = result.send(Err(error));
            }),
        );
    }

    /// Resolve every operation of the session with `error`, including those
    /// whose completion is held back waiting for an event.
    fn fail_all(&mut self, error: SessionError) {
        let slots: Vec<u64> = self.attempts.keys().copied().collect();
        for slot in slots {
            self.fail(slot, error.clone());
        }
        self.sequencer.fail_pending(&error);
    }

    /// Bump the attempt number, returning false once the budget is spent.
    fn next_attempt(&mut self, slot: u64) -> bool {
        let max_attempts = self.retry.max_attempts;
        match self.attempts.get_mut(&slot) {
            Some(attempt) if attempt.attempt < max_attempts => {
                attempt.attempt += 1;
                true
            }
            _ => false,
        }
    }

    fn retry(&mut self, slot: u64, cause: SessionError, ctx: &Ctx) {
        if !self.next_attempt(slot) {
            self.abandon(slot, cause);
            return;
        }
        let Some(attempt) = self.attempts.get_mut(&slot) else {
            return;
        };
        attempt.phase = AttemptPhase::Resubmitting;
        let delay = self.retry.backoff(attempt.attempt - 1);
        warn!(
            "Retrying slot {} in {:?} (attempt {}): {}",
            slot, delay, attempt.attempt, cause
        );
        let generation = attempt.attempt;
        ctx.schedule(delay, move |core, ctx| core.send_after_backoff(slot, generation, ctx));
    }

    /// Send a retried operation once its backoff is over, unless it has been
    /// sent again in the meantime.
    fn send_after_backoff(&mut self, slot: u64, generation: u32, ctx: &Ctx) {
        let due = self.attempts.get(&slot).is_some_and(|attempt| {
            attempt.attempt == generation && attempt.phase == AttemptPhase::Resubmitting
        });
        if due {
            self.send(slot, ctx);
        } else {
            trace!("Backoff for slot {} attempt {} superseded", slot, generation);
        }
    }

    fn resubmit(&mut self, failed_slot: u64, last_applied: u64, generation: u32, ctx: &Ctx) {
        let slots = resubmit_from(&self.attempts, failed_slot, last_applied, generation);
        warn!(
            "Server applied commands through {}; resubmitting {} commands",
            last_applied,
            slots.len()
        );

        for slot in slots {
            if self.next_attempt(slot) {
                self.send(slot, ctx);
            } else {
                self.abandon(slot, SessionError::CommandFailure { last_sequence: last_applied });
            }
        }
    }

    fn abandon(&mut self, slot: u64, cause: SessionError) {
        let Some(attempt) = self.attempts.get(&slot) else {
            return;
        };
        let attempts = attempt.attempt;

        if let AttemptRequest::Command(request) = &attempt.request {
            // Fill the sequence with a no-op so later commands can still apply.
            let filler = CommandRequest {
                session: self.session,
                sequence: request.sequence,
                operation: PrimitiveOperation::noop(),
            };
            let response = self.leader.command(filler);
            tokio::spawn(async move {
                if let Err(e) = response.await {
                    debug!("No-op filler command failed: {}", e);
                }
            });
        }

        warn!("Giving up on slot {} after {} attempts: {}", slot, attempts, cause);
        self.fail(
            slot,
            SessionError::RetriesExhausted {
                attempts,
                cause: cause.to_string(),
            },
        );
    }

    fn expire(&mut self) {
        if !self.sequencer.state().is_open() {
            return;
        }
        warn!("{} is unknown to the cluster", self.session);
        self.sequencer.state_mut().set_lifecycle(PrimitiveState::Expired);
        self.fail_all(SessionError::UnknownSession(self.session));

        let manager = self.manager.clone();
        let session = self.session;
        tokio::spawn(async move {
            manager.expire_session(session).await;
        });
    }

    fn close(&mut self) {
        if !self.sequencer.state().is_open() {
            return;
        }
        info!("Closing {}", self.session);
        self.sequencer.state_mut().set_lifecycle(PrimitiveState::Closed);
        self.fail_all(SessionError::ClosedSession(self.session));
    }

    fn publish(&mut self, request: PublishRequest) {
        if request.session != self.session {
            debug!("Ignoring events for {} on {}", request.session, self.session);
            return;
        }
        if !self.sequencer.state().is_open() {
            trace!("Ignoring event {} for ended {}", request.event_index, self.session);
            return;
        }
        self.listeners.retain(|listener| !listener.is_closed());

        let listeners = self.listeners.clone();
        let events = request.events.clone();
        self.sequencer.sequence_event(
            &request,
            Box::new(move |_: &mut SessionState| {
                for event in events {
                    for listener in &listeners {
                        let _ = listener.send(event.clone());
                    }
                }
            }),
        );
    }
}

/// Submits commands and queries for one open session
#[derive(Clone)]
pub struct Invoker {
    session: SessionId,
    context: SessionContext<InvokerCore>,
}

impl Invoker {
    /// `leader` carries commands, `reader` carries queries.
    pub fn new(
        state: SessionState,
        leader: Arc<dyn Connection>,
        reader: Arc<dyn Connection>,
        manager: Arc<dyn SessionManager>,
        retry: RetryConfig,
    ) -> Self {
        let session = state.session_id();
        let core = InvokerCore {
            session,
            sequencer: Sequencer::new(state),
            attempts: BTreeMap::new(),
            leader,
            reader,
            manager,
            retry,
            listeners: Vec::new(),
        };
        Invoker {
            session,
            context: SessionContext::new(core),
        }
    }

    pub fn session_id(&self) -> SessionId {
        self.session
    }

    /// Submit an operation. Must be called from within a tokio runtime.
    pub fn invoke(&self, operation: PrimitiveOperation) -> Invocation {
        let (sender, receiver) = oneshot::channel();
        self.context
            .execute(move |core, ctx| core.submit(operation, sender, ctx));
        Invocation::new(self.session, receiver)
    }

    /// Feed events pushed by the cluster into the session's order.
    pub fn handle_publish(&self, request: PublishRequest) {
        self.context.execute(move |core, _| core.publish(request));
    }

    /// Receive every event released for this session from now on.
    pub fn add_event_listener(&self) -> mpsc::UnboundedReceiver<PrimitiveEvent> {
        let (sender, receiver) = mpsc::unbounded_channel();
        self.context.execute(move |core, _| core.listeners.push(sender));
        receiver
    }

    /// Close the session, failing everything still in flight.
    pub fn close(&self) {
        self.context.execute(|core, _| core.close());
    }

    /// Snapshot of the session's counters
    pub fn state(&self) -> SessionState {
        self.context.execute(|core, _| core.sequencer.state().clone())
    }

    /// Operations sent but not yet completed
    pub fn in_flight(&self) -> usize {
        self.context.execute(|core, _| core.attempts.len())
    }

    /// Retry phase of the operation in `slot`, if it is still in flight.
    /// Slots count invocations from 1.
    pub fn phase(&self, slot: u64) -> Option<AttemptPhase> {
        self.context
            .execute(|core, _| core.attempts.get(&slot).map(|attempt| attempt.phase))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn attempt(request: AttemptRequest, attempt: u32) -> OperationAttempt {
        let (result, _) = oneshot::channel();
        OperationAttempt {
            attempt,
            phase: AttemptPhase::AwaitingResponse,
            request,
            result,
        }
    }

    fn command(sequence: u64) -> AttemptRequest {
        AttemptRequest::Command(CommandRequest {
            session: SessionId::new(1),
            sequence,
            operation: PrimitiveOperation::command("put", Vec::new()),
        })
    }

    fn query(sequence: u64) -> AttemptRequest {
        AttemptRequest::Query(QueryRequest {
            session: SessionId::new(1),
            sequence,
            index: 1,
            operation: PrimitiveOperation::query("get", Vec::new()),
        })
    }

    #[test]
    fn test_resubmit_selects_unacknowledged_tail() {
        let mut attempts = BTreeMap::new();
        attempts.insert(1, attempt(command(1), 1));
        attempts.insert(2, attempt(command(2), 1));
        attempts.insert(3, attempt(query(2), 1));
        attempts.insert(4, attempt(command(3), 1));
        attempts.insert(5, attempt(command(4), 1));

        assert_eq!(resubmit_from(&attempts, 2, 1, 1), vec![2, 4, 5]);
    }

    #[test]
    fn test_resubmit_skips_newer_attempts() {
        let mut attempts = BTreeMap::new();
        attempts.insert(1, attempt(command(1), 1));
        attempts.insert(2, attempt(command(2), 2));
        attempts.insert(3, attempt(command(3), 1));

        assert_eq!(resubmit_from(&attempts, 1, 0, 1), vec![1, 3]);
    }

    #[test]
    fn test_resubmit_includes_failed_slot_at_or_below_last_applied() {
        let mut attempts = BTreeMap::new();
        attempts.insert(1, attempt(command(1), 1));
        attempts.insert(2, attempt(command(2), 1));

        assert_eq!(resubmit_from(&attempts, 1, 1, 1), vec![1, 2]);
    }
}
