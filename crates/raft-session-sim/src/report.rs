use crate::cluster::ClusterStats;
use crate::workload::SessionReport;
use comfy_table::{presets::UTF8_FULL, Table};
use serde::Serialize;

#[derive(Debug, Clone, Serialize)]
pub struct SimReport {
    pub sessions: Vec<SessionReport>,
    pub cluster: ClusterStats,
    pub expired_sessions: usize,
    pub elapsed_ms: u64,
}

impl SimReport {
    /// No session saw results out of order and none was lost.
    pub fn is_consistent(&self) -> bool {
        self.expired_sessions == 0 && self.sessions.iter().all(|s| s.order_violations == 0)
    }

    pub fn sessions_table(&self) -> Table {
        let mut table = Table::new();
        table.load_preset(UTF8_FULL);
        table.set_header(vec![
            "Session",
            "Commands",
            "Failed",
            "Queries",
            "Failed",
            "Events",
            "Violations",
            "Last Value",
            "Response Index",
        ]);
        for session in &self.sessions {
            table.add_row(vec![
                session.session.to_string(),
                session.commands_ok.to_string(),
                session.commands_failed.to_string(),
                session.queries_ok.to_string(),
                session.queries_failed.to_string(),
                session.events.to_string(),
                session.order_violations.to_string(),
                session
                    .last_value
                    .map(|v| v.to_string())
                    .unwrap_or_else(|| "-".to_string()),
                session.response_index.to_string(),
            ]);
        }
        table
    }

    pub fn cluster_table(&self) -> Table {
        let stats = &self.cluster;
        let mut table = Table::new();
        table.load_preset(UTF8_FULL);
        table.set_header(vec!["Metric", "Value"]);
        table.add_row(vec!["Applied", &stats.applied.to_string()]);
        table.add_row(vec!["Duplicates", &stats.duplicates.to_string()]);
        table.add_row(vec!["Held For Gaps", &stats.queued.to_string()]);
        table.add_row(vec!["Command Failures", &stats.command_failures.to_string()]);
        table.add_row(vec!["Not Leader", &stats.not_leader.to_string()]);
        table.add_row(vec!["Dropped", &stats.dropped.to_string()]);
        table.add_row(vec!["Events", &stats.events.to_string()]);
        table.add_row(vec!["Leader Changes", &stats.leader_changes.to_string()]);
        table.add_row(vec!["Elapsed (ms)", &self.elapsed_ms.to_string()]);
        table
    }
}
