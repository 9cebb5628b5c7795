//! Cluster view tracking and per-stream member routing.
//!
//! A [`MemberSelectorManager`] owns the client's current view of the cluster
//! and pushes every change to the selectors it created. A [`MemberSelector`]
//! walks the candidates its [`CommunicationStrategy`] allows, once per pass.

use parking_lot::{Mutex, RwLock};
use raft_session_core::{CommunicationStrategy, MemberId, Result, SessionError};
use std::sync::{Arc, Weak};
use tracing::debug;

/// Leader and members as last reported by the cluster
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ClusterView {
    leader: Option<MemberId>,
    members: Vec<MemberId>,
    version: u64,
}

impl ClusterView {
    /// The leader, only while it is also a member
    pub fn leader(&self) -> Option<&MemberId> {
        self.leader.as_ref().filter(|leader| self.members.contains(leader))
    }

    pub fn members(&self) -> &[MemberId] {
        &self.members
    }

    pub fn version(&self) -> u64 {
        self.version
    }

    fn candidates(&self, strategy: CommunicationStrategy) -> Vec<MemberId> {
        match (strategy, self.leader()) {
            (CommunicationStrategy::Leader, Some(leader)) => vec![leader.clone()],
            (CommunicationStrategy::Followers, Some(leader)) => self
                .members
                .iter()
                .filter(|member| *member != leader)
                .cloned()
                .collect(),
            _ => self.members.clone(),
        }
    }
}

struct SelectorState {
    strategy: CommunicationStrategy,
    view: ClusterView,
    candidates: Vec<MemberId>,
    position: usize,
}

impl SelectorState {
    fn new(strategy: CommunicationStrategy, view: ClusterView) -> Self {
        let candidates = view.candidates(strategy);
        SelectorState {
            strategy,
            view,
            candidates,
            position: 0,
        }
    }

    fn update(&mut self, view: ClusterView) {
        self.candidates = view.candidates(self.strategy);
        self.view = view;
        self.position = 0;
    }

    fn reset(&mut self) {
        self.candidates = self.view.candidates(self.strategy);
        self.position = 0;
    }
}

struct ManagerInner {
    view: ClusterView,
    selectors: Vec<Weak<Mutex<SelectorState>>>,
}

/// Shared cluster view for one cluster client
pub struct MemberSelectorManager {
    inner: RwLock<ManagerInner>,
}

impl MemberSelectorManager {
    pub fn new() -> Self {
        MemberSelectorManager {
            inner: RwLock::new(ManagerInner {
                view: ClusterView::default(),
                selectors: Vec::new(),
            }),
        }
    }

    /// Current leader, if it is a member
    pub fn leader(&self) -> Option<MemberId> {
        self.inner.read().view.leader().cloned()
    }

    pub fn members(&self) -> Vec<MemberId> {
        self.inner.read().view.members.clone()
    }

    pub fn view(&self) -> ClusterView {
        self.inner.read().view.clone()
    }

    /// Create a selector bound to this manager's view.
    pub fn create_selector(&self, strategy: CommunicationStrategy) -> MemberSelector {
        let mut inner = self.inner.write();
        let state = Arc::new(Mutex::new(SelectorState::new(strategy, inner.view.clone())));
        inner.selectors.push(Arc::downgrade(&state));
        MemberSelector { state }
    }

    /// Replace the view and push it to every live selector.
    pub fn reset_all(&self, leader: Option<MemberId>, members: impl IntoIterator<Item = MemberId>) {
        let mut unique: Vec<MemberId> = Vec::new();
        for member in members {
            if !unique.contains(&member) {
                unique.push(member);
            }
        }

        let mut inner = self.inner.write();
        let view = ClusterView {
            leader,
            members: unique,
            version: inner.view.version + 1,
        };
        debug!(
            "Cluster view v{}: leader={:?} members={:?}",
            view.version, view.leader, view.members
        );

        inner.selectors.retain(|selector| match selector.upgrade() {
            Some(state) => {
                state.lock().update(view.clone());
                true
            }
            None => false,
        });
        inner.view = view;
    }

    /// Number of selectors still alive
    pub fn selector_count(&self) -> usize {
        self.inner
            .read()
            .selectors
            .iter()
            .filter(|selector| selector.strong_count() > 0)
            .count()
    }
}

impl Default for MemberSelectorManager {
    fn default() -> Self {
        Self::new()
    }
}

/// Restartable single pass over the members a strategy allows
pub struct MemberSelector {
    state: Arc<Mutex<SelectorState>>,
}

impl MemberSelector {
    pub fn strategy(&self) -> CommunicationStrategy {
        self.state.lock().strategy
    }

    /// Leader of the latest view, if it is a member
    pub fn leader(&self) -> Option<MemberId> {
        self.state.lock().view.leader().cloned()
    }

    pub fn members(&self) -> Vec<MemberId> {
        self.state.lock().view.members.clone()
    }

    /// Version of the view this selector currently reflects
    pub fn version(&self) -> u64 {
        self.state.lock().view.version
    }

    /// Candidates in the current pass, including ones already returned
    pub fn candidates(&self) -> Vec<MemberId> {
        self.state.lock().candidates.clone()
    }

    pub fn has_next(&self) -> bool {
        let state = self.state.lock();
        state.position < state.candidates.len()
    }

    #[allow(clippy::should_implement_trait)]
    pub fn next(&mut self) -> Result<MemberId> {
        let mut state = self.state.lock();
        let member = state
            .candidates
            .get(state.position)
            .cloned()
            .ok_or(SessionError::SelectorExhausted)?;
        state.position += 1;
        Ok(member)
    }

    /// Start a new pass over the current candidates.
    pub fn reset(&mut self) {
        self.state.lock().reset();
    }
}
