use raft_session_client::RetryConfig;
use raft_session_sim::{run, SimConfig};
use std::time::Duration;

fn base_config() -> SimConfig {
    let mut config = SimConfig::default();
    config.network.min_latency_ms = 0;
    config.network.max_latency_ms = 0;
    config.network.drop_rate = 0.0;
    config.cluster.leader_rotation_ms = 0;
    config.cluster.event_every = 3;
    config.workload.sessions = 2;
    config.workload.commands = 30;
    config.workload.window = 4;
    config.session.retry = RetryConfig {
        max_attempts: 50,
        backoff_ms: 1,
    };
    config
}

#[tokio::test]
async fn test_stable_cluster_applies_everything_once() {
    let config = base_config();
    let report = tokio::time::timeout(Duration::from_secs(30), run(&config))
        .await
        .unwrap()
        .unwrap();

    assert!(report.is_consistent());
    assert_eq!(report.sessions.len(), 2);
    for session in &report.sessions {
        assert_eq!(session.commands_ok, 30);
        assert_eq!(session.commands_failed, 0);
        assert_eq!(session.last_value, Some(30));
        assert_eq!(session.command_request, 30);
        assert_eq!(session.command_response, 30);
        assert_eq!(session.events, 10);
    }
    assert_eq!(report.cluster.applied, 60);
    assert_eq!(report.cluster.duplicates, 0);
}

#[tokio::test]
async fn test_leader_rotation_keeps_session_order() {
    let mut config = base_config();
    config.network.max_latency_ms = 2;
    config.cluster.leader_rotation_ms = 5;

    let report = tokio::time::timeout(Duration::from_secs(30), run(&config))
        .await
        .unwrap()
        .unwrap();

    assert!(report.is_consistent());
    for session in &report.sessions {
        assert_eq!(session.commands_ok + session.commands_failed, 30);
        assert_eq!(session.order_violations, 0);
    }
}
