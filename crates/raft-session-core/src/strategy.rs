use serde::{Deserialize, Serialize};

/// Which cluster members a request stream may be routed to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CommunicationStrategy {
    /// Any member
    Any,
    /// The leader, or every member while no leader is known
    Leader,
    /// Members other than the leader, or every member while no leader is known
    Followers,
}

impl CommunicationStrategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            CommunicationStrategy::Any => "any",
            CommunicationStrategy::Leader => "leader",
            CommunicationStrategy::Followers => "followers",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "any" => Some(CommunicationStrategy::Any),
            "leader" => Some(CommunicationStrategy::Leader),
            "followers" => Some(CommunicationStrategy::Followers),
            _ => None,
        }
    }
}

/// Consistency level requested for queries
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReadConsistency {
    /// Reads may be served by followers, in session order
    Sequential,
    /// Reads served by any member holding a leader lease
    LinearizableLease,
    /// Reads always go through the leader
    #[default]
    Linearizable,
}

impl ReadConsistency {
    /// Routing strategy for the query connection
    pub fn strategy(&self) -> CommunicationStrategy {
        match self {
            ReadConsistency::Sequential => CommunicationStrategy::Followers,
            ReadConsistency::LinearizableLease => CommunicationStrategy::Any,
            ReadConsistency::Linearizable => CommunicationStrategy::Leader,
        }
    }
}

/// Lifecycle of a primitive session as seen by the client
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PrimitiveState {
    /// Registered and usable
    Connected,
    /// Temporarily unable to reach the cluster
    Suspended,
    /// The cluster no longer knows the session
    Expired,
    /// Closed by the client
    Closed,
}

impl PrimitiveState {
    pub fn as_str(&self) -> &'static str {
        match self {
            PrimitiveState::Connected => "connected",
            PrimitiveState::Suspended => "suspended",
            PrimitiveState::Expired => "expired",
            PrimitiveState::Closed => "closed",
        }
    }

    pub fn is_open(&self) -> bool {
        matches!(self, PrimitiveState::Connected | PrimitiveState::Suspended)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_strategy_names() {
        for strategy in [
            CommunicationStrategy::Any,
            CommunicationStrategy::Leader,
            CommunicationStrategy::Followers,
        ] {
            assert_eq!(CommunicationStrategy::from_str(strategy.as_str()), Some(strategy));
        }
        assert_eq!(CommunicationStrategy::from_str("primary"), None);
    }

    #[test]
    fn test_read_consistency_routing() {
        assert_eq!(ReadConsistency::default().strategy(), CommunicationStrategy::Leader);
        assert_eq!(ReadConsistency::Sequential.strategy(), CommunicationStrategy::Followers);
        assert_eq!(ReadConsistency::LinearizableLease.strategy(), CommunicationStrategy::Any);
    }

    #[test]
    fn test_primitive_state_open() {
        assert!(PrimitiveState::Connected.is_open());
        assert!(PrimitiveState::Suspended.is_open());
        assert!(!PrimitiveState::Expired.is_open());
        assert!(!PrimitiveState::Closed.is_open());
    }
}
