use agency_common::{env_flag, env_list, env_or};
use std::time::Duration;

#[derive(Clone, Debug)]
pub struct ServiceConfig {
    pub port: u16,
    pub run_migrations: bool,
    /// Length of one posting cycle; posting due dates are spread across it.
    pub posting_period_days: i64,
    pub regenerated_task_due_days: i64,
    pub dashboard_interval: Duration,
    /// Lower-cased substrings that mark a category as a QC category.
    pub qc_category_markers: Vec<String>,
    pub posting_queue_depth: usize,
}

impl ServiceConfig {
    pub fn from_env() -> Self {
        let qc_category_markers = env_list("QC_CATEGORY_MARKERS", &["qc", "quality"])
            .into_iter()
            .map(|marker| marker.to_lowercase())
            .collect();

        Self {
            port: env_or("PORT", 8080u16),
            run_migrations: env_flag("RUN_MIGRATIONS", false),
            posting_period_days: env_or("POSTING_PERIOD_DAYS", 30i64).max(1),
            regenerated_task_due_days: env_or("REGENERATED_TASK_DUE_DAYS", 7i64).max(0),
            dashboard_interval: Duration::from_millis(env_or("DASHBOARD_INTERVAL_MS", 5000u64)),
            qc_category_markers,
            posting_queue_depth: env_or("POSTING_QUEUE_DEPTH", 64usize).max(1),
        }
    }
}
