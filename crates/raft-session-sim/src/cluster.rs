//! In-memory stand-in for a Raft cluster.
//!
//! One log shared by every session; the leader applies each session's
//! commands strictly in sequence order and remembers their results. The
//! network in front of it adds latency and loses requests or responses.

use crate::config::{ClusterConfig, NetworkConfig};
use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use raft_session_client::{MemberSelectorManager, Transport};
use raft_session_core::{MemberId, PrimitiveOperation, Result, SessionError, SessionId};
use raft_session_protocol::{
    CommandRequest, CommandResponse, OperationResponse, PrimitiveEvent, PublishRequest, QueryRequest,
    QueryResponse, RaftError, RaftErrorKind,
};
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, Notify};
use tracing::{debug, info, trace};

const QUERY_WAIT: Duration = Duration::from_millis(500);

pub fn encode_amount(amount: u64) -> Bytes {
    Bytes::copy_from_slice(&amount.to_be_bytes())
}

pub fn decode_amount(value: &[u8]) -> Option<u64> {
    <[u8; 8]>::try_from(value).ok().map(u64::from_be_bytes)
}

/// Counters describing what the cluster saw
#[derive(Debug, Clone, Default, Serialize)]
pub struct ClusterStats {
    pub applied: u64,
    pub duplicates: u64,
    pub queued: u64,
    pub command_failures: u64,
    pub not_leader: u64,
    pub dropped: u64,
    pub events: u64,
    pub leader_changes: u64,
}

struct Waiting {
    operation: PrimitiveOperation,
    reply: oneshot::Sender<OperationResponse>,
}

struct SessionLog {
    last_applied: u64,
    counter: u64,
    event_index: u64,
    since_event: u64,
    results: HashMap<u64, OperationResponse>,
    waiting: BTreeMap<u64, Waiting>,
}

impl SessionLog {
    fn new() -> Self {
        SessionLog {
            last_applied: 0,
            counter: 0,
            event_index: 1,
            since_event: 0,
            results: HashMap::new(),
            waiting: BTreeMap::new(),
        }
    }

    fn apply(
        &mut self,
        session: SessionId,
        index: u64,
        sequence: u64,
        operation: &PrimitiveOperation,
        event_every: u64,
    ) -> (OperationResponse, Option<PublishRequest>) {
        self.last_applied = sequence;

        let mut publish = None;
        if !operation.id.name.is_empty() {
            self.counter += decode_amount(&operation.value).unwrap_or(0);
            self.since_event += 1;
            if event_every > 0 && self.since_event >= event_every {
                self.since_event = 0;
                publish = Some(
                    PublishRequest::new(session, index, self.event_index)
                        .with_event(PrimitiveEvent::new("changed", encode_amount(self.counter))),
                );
                self.event_index = index;
            }
        }

        let response = OperationResponse::ok(index, self.event_index, encode_amount(self.counter));
        self.results.insert(sequence, response.clone());
        (response, publish)
    }
}

struct ClusterState {
    leader: usize,
    log_index: u64,
    sessions: HashMap<SessionId, SessionLog>,
    stats: ClusterStats,
}

enum Outcome {
    Ready(OperationResponse),
    Queued(oneshot::Receiver<OperationResponse>),
}

pub struct SimulatedCluster {
    members: Vec<MemberId>,
    selectors: Arc<MemberSelectorManager>,
    network: NetworkConfig,
    event_every: u64,
    state: Mutex<ClusterState>,
    rng: Mutex<StdRng>,
    applied: Notify,
    events: mpsc::UnboundedSender<PublishRequest>,
}

impl SimulatedCluster {
    /// Build the cluster and announce its first leader through `selectors`.
    ///
    /// Pushed events come out of the returned receiver.
    pub fn new(
        config: &ClusterConfig,
        network: NetworkConfig,
        selectors: Arc<MemberSelectorManager>,
    ) -> (Arc<Self>, mpsc::UnboundedReceiver<PublishRequest>) {
        let members: Vec<MemberId> = (1..=config.members.max(1))
            .map(|n| MemberId::new(format!("member-{}", n)))
            .collect();
        let (events, published) = mpsc::unbounded_channel();

        selectors.reset_all(members.first().cloned(), members.clone());

        let cluster = SimulatedCluster {
            rng: Mutex::new(StdRng::seed_from_u64(network.seed)),
            members,
            selectors,
            network,
            event_every: config.event_every,
            state: Mutex::new(ClusterState {
                leader: 0,
                log_index: 1,
                sessions: HashMap::new(),
                stats: ClusterStats::default(),
            }),
            applied: Notify::new(),
            events,
        };
        (Arc::new(cluster), published)
    }

    pub fn members(&self) -> &[MemberId] {
        &self.members
    }

    pub fn leader(&self) -> MemberId {
        let leader = self.state.lock().leader;
        self.members[leader].clone()
    }

    pub fn register_session(&self, session: SessionId) {
        self.state.lock().sessions.insert(session, SessionLog::new());
    }

    pub fn expire_session(&self, session: SessionId) {
        self.state.lock().sessions.remove(&session);
    }

    pub fn stats(&self) -> ClusterStats {
        self.state.lock().stats.clone()
    }

    /// Counter value of a session's state machine
    pub fn counter(&self, session: SessionId) -> Option<u64> {
        self.state.lock().sessions.get(&session).map(|log| log.counter)
    }

    /// Hand leadership to the next member.
    ///
    /// Commands the old leader was holding for a sequence gap are answered
    /// with a command failure.
    pub fn rotate_leader(&self) {
        let leader = {
            let mut state = self.state.lock();
            state.leader = (state.leader + 1) % self.members.len();
            state.stats.leader_changes += 1;

            let mut failed = 0;
            for log in state.sessions.values_mut() {
                let last_applied = log.last_applied;
                for (_, waiting) in std::mem::take(&mut log.waiting) {
                    let _ = waiting
                        .reply
                        .send(OperationResponse::command_failure(last_applied));
                    failed += 1;
                }
            }
            state.stats.command_failures += failed;
            self.members[state.leader].clone()
        };

        info!("Leadership moved to {}", leader);
        self.selectors
            .reset_all(Some(leader), self.members.iter().cloned());
    }

    fn latency(&self) -> Duration {
        let millis = self
            .rng
            .lock()
            .gen_range(self.network.min_latency_ms..=self.network.max_latency_ms);
        Duration::from_millis(millis)
    }

    fn lost(&self) -> bool {
        self.network.drop_rate > 0.0 && self.rng.lock().gen_bool(self.network.drop_rate)
    }

    fn drop_message(&self, delay: Duration) -> SessionError {
        self.state.lock().stats.dropped += 1;
        SessionError::Timeout(delay.as_millis() as u64)
    }

    fn publish(&self, requests: Vec<PublishRequest>) {
        for request in requests {
            let delay = self.latency();
            let events = self.events.clone();
            tokio::spawn(async move {
                tokio::time::sleep(delay).await;
                let _ = events.send(request);
            });
        }
    }

    fn handle_command(
        &self,
        state: &mut ClusterState,
        member: &MemberId,
        request: CommandRequest,
    ) -> (Outcome, Vec<PublishRequest>) {
        let mut published = Vec::new();

        if self.members[state.leader] != *member {
            state.stats.not_leader += 1;
            let response = OperationResponse::error(RaftError::new(RaftErrorKind::NoLeader));
            return (Outcome::Ready(response), published);
        }

        let ClusterState {
            log_index,
            sessions,
            stats,
            ..
        } = state;
        let Some(log) = sessions.get_mut(&request.session) else {
            let response = OperationResponse::error(RaftError::new(RaftErrorKind::UnknownSession));
            return (Outcome::Ready(response), published);
        };

        if request.sequence <= log.last_applied {
            stats.duplicates += 1;
            let response = log
                .results
                .get(&request.sequence)
                .cloned()
                .unwrap_or_else(|| OperationResponse::command_failure(log.last_applied));
            return (Outcome::Ready(response), published);
        }

        if request.sequence > log.last_applied + 1 {
            trace!(
                "Holding {} command {} until {} is applied",
                request.session,
                request.sequence,
                log.last_applied + 1
            );
            stats.queued += 1;
            let (reply, receiver) = oneshot::channel();
            log.waiting.insert(
                request.sequence,
                Waiting {
                    operation: request.operation,
                    reply,
                },
            );
            return (Outcome::Queued(receiver), published);
        }

        *log_index += 1;
        stats.applied += 1;
        let (response, event) = log.apply(
            request.session,
            *log_index,
            request.sequence,
            &request.operation,
            self.event_every,
        );
        published.extend(event);

        while let Some(entry) = log.waiting.first_entry() {
            if *entry.key() != log.last_applied + 1 {
                break;
            }
            let (sequence, waiting) = entry.remove_entry();
            *log_index += 1;
            stats.applied += 1;
            let (queued, event) = log.apply(
                request.session,
                *log_index,
                sequence,
                &waiting.operation,
                self.event_every,
            );
            published.extend(event);
            let _ = waiting.reply.send(queued);
        }

        stats.events += published.len() as u64;
        (Outcome::Ready(response), published)
    }

    fn handle_query(&self, request: &QueryRequest) -> Option<OperationResponse> {
        let state = self.state.lock();
        let Some(log) = state.sessions.get(&request.session) else {
            return Some(OperationResponse::error(RaftError::new(
                RaftErrorKind::UnknownSession,
            )));
        };
        if log.last_applied < request.sequence {
            return None;
        }
        Some(OperationResponse::ok(
            state.log_index,
            log.event_index,
            encode_amount(log.counter),
        ))
    }
}

#[async_trait]
impl Transport for SimulatedCluster {
    async fn command(&self, member: &MemberId, request: CommandRequest) -> Result<CommandResponse> {
        let delay = self.latency();
        tokio::time::sleep(delay).await;
        if self.lost() {
            debug!("Lost command {} on its way to {}", request.sequence, member);
            return Err(self.drop_message(delay));
        }
        let lose_response = self.lost();

        let (outcome, published) = {
            let mut state = self.state.lock();
            self.handle_command(&mut state, member, request)
        };
        self.applied.notify_waiters();
        self.publish(published);

        let response = match outcome {
            Outcome::Ready(response) => response,
            Outcome::Queued(receiver) => receiver
                .await
                .map_err(|_| SessionError::Connection("command superseded".to_string()))?,
        };

        if lose_response {
            debug!("Lost response from {}", member);
            return Err(self.drop_message(delay));
        }
        tokio::time::sleep(self.latency()).await;
        Ok(response)
    }

    async fn query(&self, member: &MemberId, request: QueryRequest) -> Result<QueryResponse> {
        let delay = self.latency();
        tokio::time::sleep(delay).await;
        if self.lost() {
            debug!("Lost query on its way to {}", member);
            return Err(self.drop_message(delay));
        }

        // Sequential reads: wait until the session's earlier commands are applied.
        let waited = tokio::time::timeout(QUERY_WAIT, async {
            loop {
                let notified = self.applied.notified();
                tokio::pin!(notified);
                notified.as_mut().enable();
                if let Some(response) = self.handle_query(&request) {
                    return response;
                }
                notified.await;
            }
        })
        .await;

        let response =
            waited.map_err(|_| SessionError::Timeout(QUERY_WAIT.as_millis() as u64))?;
        tokio::time::sleep(self.latency()).await;
        Ok(response)
    }
}
