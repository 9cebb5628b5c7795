use async_trait::async_trait;
use parking_lot::Mutex;
use raft_session_core::SessionId;
use tracing::warn;

/// Owner of session lifecycles, told when the cluster no longer knows a session
#[async_trait]
pub trait SessionManager: Send + Sync {
    async fn expire_session(&self, session: SessionId);
}

/// Manager that only remembers which sessions were expired
#[derive(Default)]
pub struct ExpiredSessions {
    expired: Mutex<Vec<SessionId>>,
}

impl ExpiredSessions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn expired(&self) -> Vec<SessionId> {
        self.expired.lock().clone()
    }

    pub fn contains(&self, session: SessionId) -> bool {
        self.expired.lock().contains(&session)
    }
}

#[async_trait]
impl SessionManager for ExpiredSessions {
    async fn expire_session(&self, session: SessionId) {
        warn!("Session {} expired", session);
        let mut expired = self.expired.lock();
        if !expired.contains(&session) {
            expired.push(session);
        }
    }
}
