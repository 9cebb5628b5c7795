use crate::cluster::{decode_amount, encode_amount};
use bytes::Bytes;
use raft_session_client::{Invocation, Invoker};
use raft_session_core::PrimitiveOperation;
use serde::Serialize;
use tracing::{debug, warn};

/// What one session observed while running its share of the workload
#[derive(Debug, Clone, Default, Serialize)]
pub struct SessionReport {
    pub session: u64,
    pub commands_ok: u64,
    pub commands_failed: u64,
    pub queries_ok: u64,
    pub queries_failed: u64,
    pub events: u64,
    /// Results that did not grow in command order, or reads that went backwards
    pub order_violations: u64,
    pub last_value: Option<u64>,
    pub command_request: u64,
    pub command_response: u64,
    pub response_index: u64,
    pub event_index: u64,
}

impl SessionReport {
    fn observe(&mut self, value: Option<u64>) {
        let Some(value) = value else {
            self.order_violations += 1;
            return;
        };
        if self.last_value.is_some_and(|last| value <= last) {
            self.order_violations += 1;
        }
        self.last_value = Some(value);
    }
}

/// Add 1 to the session's counter `commands` times, keeping `window` commands
/// in flight, with a read after each window.
pub async fn run_session(invoker: Invoker, commands: usize, window: usize) -> SessionReport {
    let mut report = SessionReport {
        session: invoker.session_id().id(),
        ..SessionReport::default()
    };
    let mut events = invoker.add_event_listener();

    let mut remaining = commands;
    while remaining > 0 {
        let batch = remaining.min(window.max(1));
        remaining -= batch;

        let pending: Vec<Invocation> = (0..batch)
            .map(|_| invoker.invoke(PrimitiveOperation::command("add", encode_amount(1))))
            .collect();
        let read = invoker.invoke(PrimitiveOperation::query("get", Bytes::new()));

        for invocation in pending {
            match invocation.await {
                Ok(value) => {
                    report.commands_ok += 1;
                    report.observe(decode_amount(&value));
                }
                Err(e) => {
                    warn!("Session {} command failed: {}", report.session, e);
                    report.commands_failed += 1;
                }
            }
        }

        match read.await {
            Ok(value) => {
                report.queries_ok += 1;
                match (decode_amount(&value), report.last_value) {
                    (Some(read), Some(last)) if read < last => report.order_violations += 1,
                    (None, _) => report.order_violations += 1,
                    _ => {}
                }
            }
            Err(e) => {
                debug!("Session {} query failed: {}", report.session, e);
                report.queries_failed += 1;
            }
        }
    }

    while let Ok(event) = events.try_recv() {
        debug!("Session {} saw event {}", report.session, event.event_type);
        report.events += 1;
    }

    let state = invoker.state();
    report.command_request = state.command_request();
    report.command_response = state.command_response();
    report.response_index = state.response_index();
    report.event_index = state.event_index();
    report
}
