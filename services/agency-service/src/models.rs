use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::status::TaskStatus;

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub code: &'static str,
    pub message: String,
    pub reasons: Vec<String>,
}

// Rows read from the database.

#[derive(Debug, Clone)]
pub struct Client {
    pub id: i64,
    pub name: String,
    pub package_id: Option<i64>,
}

#[derive(Debug, Clone)]
pub struct Package {
    pub id: i64,
    pub name: String,
}

#[derive(Debug, Clone)]
pub struct Template {
    pub id: i64,
    pub name: String,
}

#[derive(Debug, Clone)]
pub struct SiteAsset {
    pub id: i64,
    pub template_id: i64,
    pub asset_type: String,
    pub name: String,
    pub default_posting_frequency: i32,
    pub is_required: bool,
}

#[derive(Debug, Clone)]
pub struct Assignment {
    pub id: i64,
    pub client_id: i64,
    pub template_id: i64,
}

#[derive(Debug, Clone)]
pub struct TaskRecord {
    pub id: i64,
    pub assignment_id: i64,
    pub name: String,
    pub status: String,
    pub category_name: Option<String>,
    pub template_site_asset_id: Option<i64>,
    pub assigned_to_id: Option<i64>,
    pub due_date: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

/// A task row to be inserted. The category is referenced by name and
/// resolved to an id inside the writing transaction.
#[derive(Debug, Clone, PartialEq)]
pub struct NewTask {
    pub assignment_id: i64,
    pub name: String,
    pub status: TaskStatus,
    pub category: Option<String>,
    pub template_site_asset_id: Option<i64>,
    pub due_date: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

// Package upgrade.

fn default_true() -> bool {
    true
}

#[derive(Deserialize)]
pub struct UpgradePackageRequest {
    pub package_id: Option<i64>,
    #[serde(default = "default_true")]
    pub create_assignments: bool,
    #[serde(default = "default_true")]
    pub migrate_completed_tasks: bool,
    #[serde(default = "default_true")]
    pub generate_posting_tasks: bool,
}

#[derive(Serialize)]
pub struct UpgradePackageResponse {
    pub status: &'static str,
    pub client_id: i64,
    pub old_package_id: Option<i64>,
    pub new_package_id: i64,
    pub created_assignment_ids: Vec<i64>,
    pub migrated_tasks: usize,
    pub skipped_tasks: usize,
    pub posting_tasks_created: usize,
    pub warnings: Vec<String>,
}

// Task regeneration.

#[derive(Debug, Deserialize, Default)]
pub struct RegenerateTasksRequest {
    #[serde(default)]
    pub force_recreate: bool,
    #[serde(default)]
    pub create_settings: bool,
}

#[derive(Serialize)]
pub struct RegenerateTasksResponse {
    pub status: &'static str,
    pub assignment_id: i64,
    pub cancelled_tasks: usize,
    pub created_task_ids: Vec<i64>,
    pub settings_created: usize,
}

// Posting tasks.

#[derive(Debug, Deserialize, Default)]
pub struct PostingTasksRequest {
    pub asset_ids: Option<Vec<i64>>,
    pub start_date: Option<NaiveDate>,
}

#[derive(Serialize)]
pub struct PostingTasksResponse {
    pub status: &'static str,
    pub client_id: i64,
    pub batch_id: String,
    pub created_task_ids: Vec<i64>,
    pub skipped_existing: usize,
}

// QC review.

#[derive(Deserialize, Default, Clone, Copy, Debug, Serialize)]
pub struct QcMetrics {
    #[serde(default)]
    pub keyword: f64,
    #[serde(default)]
    pub content_quality: f64,
    #[serde(default)]
    pub grammar: f64,
    #[serde(default)]
    pub formatting: f64,
    #[serde(default)]
    pub timeliness: f64,
    #[serde(default)]
    pub instructions: f64,
}

#[derive(Deserialize)]
pub struct QcReviewRequest {
    pub rating: Option<String>,
    #[serde(default)]
    pub metrics: QcMetrics,
    pub notes: Option<String>,
    pub decision: Option<String>,
}

#[derive(Serialize)]
pub struct QcReviewResponse {
    pub status: &'static str,
    pub task_id: i64,
    pub task_status: TaskStatus,
    pub total_score: f64,
    pub posting_triggered: bool,
}

// Status update.

#[derive(Deserialize)]
pub struct StatusUpdateRequest {
    pub status: Option<String>,
    pub other_field: Option<serde_json::Value>,
}

#[derive(Serialize)]
pub struct StatusUpdateResponse {
    pub status: &'static str,
    pub task_id: i64,
    pub previous_status: TaskStatus,
    pub task_status: TaskStatus,
    pub posting_triggered: bool,
}

// Reads.

#[derive(Serialize)]
pub struct ClientSummary {
    pub id: i64,
    pub name: String,
    pub package_id: Option<i64>,
    pub package_name: Option<String>,
    pub progress: u8,
}

#[derive(Serialize)]
pub struct ClientProgressResponse {
    pub client_id: i64,
    pub total: u64,
    pub done: u64,
    pub cancelled: u64,
    pub progress: u8,
    pub by_status: BTreeMap<String, u64>,
}

#[derive(Serialize)]
pub struct TaskView {
    pub id: i64,
    pub name: String,
    pub status: String,
    pub category: Option<String>,
    pub template_site_asset_id: Option<i64>,
    pub assigned_to_id: Option<i64>,
    pub due_date: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl From<TaskRecord> for TaskView {
    fn from(task: TaskRecord) -> Self {
        Self {
            id: task.id,
            name: task.name,
            status: task.status,
            category: task.category_name,
            template_site_asset_id: task.template_site_asset_id,
            assigned_to_id: task.assigned_to_id,
            due_date: task.due_date,
            completed_at: task.completed_at,
        }
    }
}

#[derive(Serialize, Default)]
pub struct DashboardSummary {
    pub updated_at: String,
    pub clients: u64,
    pub active_assignments: u64,
    pub tasks_by_status: BTreeMap<String, u64>,
    pub overdue_tasks: u64,
    pub awaiting_qc: u64,
}

#[derive(Deserialize)]
pub struct ActivityQuery {
    pub entity_type: Option<String>,
    pub entity_id: Option<i64>,
    pub limit: Option<i64>,
}

#[derive(Serialize)]
pub struct ActivityEntry {
    pub id: i64,
    pub user_id: Option<i64>,
    pub entity_type: String,
    pub entity_id: i64,
    pub action: String,
    pub details: Option<serde_json::Value>,
    pub created_at: DateTime<Utc>,
}

#[derive(Serialize)]
pub struct MeResponse {
    pub user_id: i64,
    pub role: &'static str,
    pub client_id: Option<i64>,
    pub permissions: Vec<&'static str>,
}
