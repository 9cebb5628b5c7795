pub mod cluster;
pub mod config;
pub mod report;
pub mod workload;

pub use cluster::{ClusterStats, SimulatedCluster};
pub use config::SimConfig;
pub use report::SimReport;
pub use workload::{run_session, SessionReport};

use raft_session_client::{open_session, ExpiredSessions, MemberSelectorManager};
use raft_session_core::SessionId;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::info;

/// Run the configured workload against a fresh simulated cluster.
pub async fn run(config: &SimConfig) -> anyhow::Result<SimReport> {
    config.validate()?;

    let selectors = Arc::new(MemberSelectorManager::new());
    let (cluster, mut published) =
        SimulatedCluster::new(&config.cluster, config.network.clone(), selectors.clone());
    let manager = Arc::new(ExpiredSessions::new());

    let mut invokers = HashMap::new();
    for n in 1..=config.workload.sessions as u64 {
        let session = SessionId::new(n);
        cluster.register_session(session);
        let invoker = open_session(
            &config.session,
            session,
            &selectors,
            cluster.clone(),
            manager.clone(),
        );
        invokers.insert(session, invoker);
    }

    let routes = invokers.clone();
    let events = tokio::spawn(async move {
        while let Some(request) = published.recv().await {
            if let Some(invoker) = routes.get(&request.session) {
                invoker.handle_publish(request);
            }
        }
    });

    let rotation = (config.cluster.leader_rotation_ms > 0).then(|| {
        let cluster = cluster.clone();
        let period = Duration::from_millis(config.cluster.leader_rotation_ms);
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            interval.tick().await;
            loop {
                interval.tick().await;
                cluster.rotate_leader();
            }
        })
    });

    info!(
        "Running {} sessions x {} commands over {} members",
        config.workload.sessions,
        config.workload.commands,
        cluster.members().len()
    );
    let started = Instant::now();

    let handles: Vec<_> = invokers
        .values()
        .cloned()
        .map(|invoker| {
            tokio::spawn(run_session(
                invoker,
                config.workload.commands,
                config.workload.window,
            ))
        })
        .collect();

    let mut sessions = Vec::with_capacity(handles.len());
    for result in futures::future::join_all(handles).await {
        sessions.push(result?);
    }
    let elapsed_ms = started.elapsed().as_millis() as u64;

    if let Some(rotation) = rotation {
        rotation.abort();
    }
    for invoker in invokers.values() {
        invoker.close();
    }
    events.abort();

    sessions.sort_by_key(|session| session.session);
    Ok(SimReport {
        sessions,
        cluster: cluster.stats(),
        expired_sessions: manager.expired().len(),
        elapsed_ms,
    })
}
