use raft_session_core::{ReadConsistency, Result, SessionError, DEFAULT_SESSION_TIMEOUT_MS};
use serde::{Deserialize, Serialize};
use std::time::Duration;

const FIBONACCI: [u64; 5] = [1, 1, 2, 3, 5];

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    pub primitive_name: String,
    pub primitive_type: String,
    pub timeout_ms: u64,
    pub read_consistency: ReadConsistency,
    pub retry: RetryConfig,
}

/// Retry policy for operations that could not reach the cluster
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Total sends allowed per operation, including the first
    pub max_attempts: u32,
    pub backoff_ms: u64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        SessionConfig {
            primitive_name: "counter".to_string(),
            primitive_type: "counter".to_string(),
            timeout_ms: DEFAULT_SESSION_TIMEOUT_MS,
            read_consistency: ReadConsistency::default(),
            retry: RetryConfig::default(),
        }
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        RetryConfig {
            max_attempts: 10,
            backoff_ms: 100,
        }
    }
}

impl SessionConfig {
    pub fn from_file(path: &str) -> anyhow::Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let config: SessionConfig = serde_yaml::from_str(&contents)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.primitive_name.is_empty() {
            return Err(SessionError::Configuration("primitive_name is empty".to_string()));
        }
        if self.timeout_ms == 0 {
            return Err(SessionError::Configuration("timeout_ms must be positive".to_string()));
        }
        if self.retry.max_attempts == 0 {
            return Err(SessionError::Configuration(
                "retry.max_attempts must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

impl RetryConfig {
    /// Delay before the `retry`-th resend (1-based), following 1, 1, 2, 3, 5
    /// multiples of `backoff_ms` and holding at the last step.
    pub fn backoff(&self, retry: u32) -> Duration {
        let step = (retry.saturating_sub(1) as usize).min(FIBONACCI.len() - 1);
        Duration::from_millis(self.backoff_ms.saturating_mul(FIBONACCI[step]))
    }
}
