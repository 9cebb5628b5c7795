use raft_session_client::SessionConfig;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SimConfig {
    pub cluster: ClusterConfig,
    pub network: NetworkConfig,
    pub workload: WorkloadConfig,
    pub session: SessionConfig,
    pub log_level: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClusterConfig {
    pub members: usize,
    /// Interval between forced leader changes; 0 keeps the first leader
    pub leader_rotation_ms: u64,
    /// Publish an event every this many applied commands; 0 disables events
    pub event_every: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkConfig {
    pub min_latency_ms: u64,
    pub max_latency_ms: u64,
    /// Probability that a request or its response is lost
    pub drop_rate: f64,
    pub seed: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkloadConfig {
    pub sessions: usize,
    pub commands: usize,
    /// Commands kept in flight per session before waiting on them
    pub window: usize,
}

impl Default for SimConfig {
    fn default() -> Self {
        SimConfig {
            cluster: ClusterConfig::default(),
            network: NetworkConfig::default(),
            workload: WorkloadConfig::default(),
            session: SessionConfig::default(),
            log_level: "info".to_string(),
        }
    }
}

impl Default for ClusterConfig {
    fn default() -> Self {
        ClusterConfig {
            members: 3,
            leader_rotation_ms: 250,
            event_every: 5,
        }
    }
}

impl Default for NetworkConfig {
    fn default() -> Self {
        NetworkConfig {
            min_latency_ms: 1,
            max_latency_ms: 15,
            drop_rate: 0.02,
            seed: 7,
        }
    }
}

impl Default for WorkloadConfig {
    fn default() -> Self {
        WorkloadConfig {
            sessions: 4,
            commands: 200,
            window: 8,
        }
    }
}

impl SimConfig {
    pub fn from_file(path: &str) -> anyhow::Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let config: SimConfig = serde_yaml::from_str(&contents)?;
        Ok(config)
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        self.session.validate()?;
        if self.cluster.members == 0 {
            anyhow::bail!("cluster.members must be at least 1");
        }
        if self.network.min_latency_ms > self.network.max_latency_ms {
            anyhow::bail!("network.min_latency_ms exceeds network.max_latency_ms");
        }
        if !(0.0..1.0).contains(&self.network.drop_rate) {
            anyhow::bail!("network.drop_rate must be in [0, 1)");
        }
        if self.workload.window == 0 {
            anyhow::bail!("workload.window must be at least 1");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_is_valid() {
        assert!(SimConfig::default().validate().is_ok());
    }

    #[test]
    fn test_yaml_sections() {
        let config: SimConfig = serde_yaml::from_str(
            "cluster:\n  members: 5\nnetwork:\n  drop_rate: 0.1\nsession:\n  retry:\n    max_attempts: 4\nlog_level: debug\n",
        )
        .unwrap();

        assert_eq!(config.cluster.members, 5);
        assert_eq!(config.cluster.event_every, 5);
        assert_eq!(config.network.drop_rate, 0.1);
        assert_eq!(config.session.retry.max_attempts, 4);
        assert_eq!(config.workload.sessions, 4);
        assert_eq!(config.log_level, "debug");
    }

    #[test]
    fn test_rejects_bad_latency_range() {
        let mut config = SimConfig::default();
        config.network.min_latency_ms = 20;
        config.network.max_latency_ms = 10;
        assert!(config.validate().is_err());
    }
}
