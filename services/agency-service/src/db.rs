use std::collections::{HashMap, HashSet};

use tokio_postgres::{Error, GenericClient, Row};

use crate::models::{
    ActivityEntry, Assignment, Client, NewTask, Package, SiteAsset, TaskRecord, Template,
};
use crate::progress::StatusCounts;

const SQL_LOOKUP_TOKEN: &str = "SELECT u.id AS user_id, r.name AS role_name, u.client_id \
FROM api_tokens t \
JOIN users u ON u.id = t.user_id \
JOIN roles r ON r.id = u.role_id \
WHERE t.token_hash = $1 AND t.revoked_at IS NULL";

const SQL_SELECT_CLIENT: &str =
    "SELECT id, name, package_id FROM clients WHERE id = $1";
const SQL_LIST_CLIENTS: &str = "SELECT c.id, c.name, c.package_id, p.name AS package_name \
FROM clients c LEFT JOIN packages p ON p.id = c.package_id \
WHERE ($1::BIGINT IS NULL OR c.id = $1) \
ORDER BY c.id";
const SQL_UPDATE_CLIENT_PACKAGE: &str =
    "UPDATE clients SET package_id = $2, updated_at = NOW() WHERE id = $1";

const SQL_SELECT_PACKAGE: &str = "SELECT id, name FROM packages WHERE id = $1";
const SQL_PACKAGE_TEMPLATES: &str =
    "SELECT id, name FROM templates WHERE package_id = $1 ORDER BY id";
const SQL_PACKAGE_ASSETS: &str = "SELECT s.id, s.template_id, s.asset_type, s.name, \
s.default_posting_frequency, s.is_required \
FROM template_site_assets s JOIN templates t ON t.id = s.template_id \
WHERE t.package_id = $1 ORDER BY s.id";
const SQL_TEMPLATE_ASSETS: &str = "SELECT id, template_id, asset_type, name, \
default_posting_frequency, is_required \
FROM template_site_assets WHERE template_id = ANY($1) ORDER BY id";

const SQL_SELECT_ASSIGNMENT: &str =
    "SELECT id, client_id, template_id FROM assignments WHERE id = $1";
const SQL_CLIENT_ASSIGNMENTS: &str =
    "SELECT id, client_id, template_id FROM assignments WHERE client_id = $1 ORDER BY id";
const SQL_CLIENT_PACKAGE_ASSIGNMENTS: &str = "SELECT a.id, a.client_id, a.template_id \
FROM assignments a JOIN templates t ON t.id = a.template_id \
WHERE a.client_id = $1 AND t.package_id = $2 ORDER BY a.id";
// The NOT EXISTS guard keeps repeated upgrades from adding a second
// assignment per template; the unique index backs it up under races.
const SQL_INSERT_ASSIGNMENT_IF_MISSING: &str = "INSERT INTO assignments (client_id, template_id, status) \
SELECT $1::BIGINT, $2::BIGINT, 'active' \
WHERE NOT EXISTS (SELECT 1 FROM assignments WHERE client_id = $1 AND template_id = $2) \
ON CONFLICT (client_id, template_id) DO NOTHING \
RETURNING id";

const SQL_TASK_COLUMNS: &str = "SELECT t.id, t.assignment_id, t.name, t.status, \
c.name AS category_name, t.template_site_asset_id, t.assigned_to_id, t.due_date, t.completed_at \
FROM tasks t LEFT JOIN task_categories c ON c.id = t.category_id";

const SQL_ENSURE_CATEGORY: &str = "INSERT INTO task_categories (name) VALUES ($1) \
ON CONFLICT (name) DO UPDATE SET name = EXCLUDED.name RETURNING id";
const SQL_INSERT_TASK: &str = "INSERT INTO tasks \
(assignment_id, name, status, category_id, template_site_asset_id, due_date, completed_at) \
VALUES ($1, $2, $3, $4, $5, $6, $7) RETURNING id";
const SQL_CANCEL_TASKS: &str =
    "UPDATE tasks SET status = 'cancelled', updated_at = NOW() WHERE id = ANY($1)";
const SQL_TASK_NAMES: &str =
    "SELECT assignment_id, name FROM tasks WHERE assignment_id = ANY($1)";
const SQL_UPDATE_TASK_STATUS: &str = "UPDATE tasks SET status = $2::TEXT, \
other_field = COALESCE($3::JSONB, other_field), \
completed_at = CASE WHEN $2::TEXT = 'completed' THEN NOW() ELSE completed_at END, \
updated_at = NOW() WHERE id = $1";
const SQL_UPDATE_TASK_QC: &str = "UPDATE tasks SET status = $2, qc_total_score = $3, \
qc_review = $4, updated_at = NOW() WHERE id = $1";
const SQL_TASK_CLIENT: &str = "SELECT client_id FROM assignments WHERE id = $1";

const SQL_INSERT_ASSET_SETTING: &str = "INSERT INTO assignment_site_asset_settings \
(assignment_id, template_site_asset_id, required_frequency, is_required) \
VALUES ($1, $2, $3, $4) \
ON CONFLICT (assignment_id, template_site_asset_id) DO NOTHING";

const SQL_INSERT_ACTIVITY: &str = "INSERT INTO activity_logs \
(user_id, entity_type, entity_id, action, details) VALUES ($1, $2, $3, $4, $5)";
const SQL_LIST_ACTIVITY: &str = "SELECT id, user_id, entity_type, entity_id, action, details, created_at \
FROM activity_logs \
WHERE ($1::TEXT IS NULL OR entity_type = $1) AND ($2::BIGINT IS NULL OR entity_id = $2) \
ORDER BY id DESC LIMIT $3";

const SQL_CLIENT_STATUS_COUNTS: &str = "SELECT a.client_id, t.status, COUNT(*) AS count \
FROM tasks t JOIN assignments a ON a.id = t.assignment_id \
WHERE ($1::BIGINT IS NULL OR a.client_id = $1) \
GROUP BY a.client_id, t.status";
const SQL_COUNT_CLIENTS: &str = "SELECT COUNT(*) AS count FROM clients";
const SQL_COUNT_ACTIVE_ASSIGNMENTS: &str =
    "SELECT COUNT(*) AS count FROM assignments WHERE status = 'active'";
const SQL_TASK_STATUS_COUNTS: &str =
    "SELECT status, COUNT(*) AS count FROM tasks GROUP BY status";
const SQL_COUNT_OVERDUE: &str = "SELECT COUNT(*) AS count FROM tasks \
WHERE due_date < NOW() AND NOT (status = ANY($1))";
const SQL_COUNT_STATUS: &str = "SELECT COUNT(*) AS count FROM tasks WHERE status = $1";

pub struct TokenIdentity {
    pub user_id: i64,
    pub role_name: String,
    pub client_id: Option<i64>,
}

fn client_from_row(row: &Row) -> Client {
    Client {
        id: row.get("id"),
        name: row.get("name"),
        package_id: row.get("package_id"),
    }
}

fn asset_from_row(row: &Row) -> SiteAsset {
    SiteAsset {
        id: row.get("id"),
        template_id: row.get("template_id"),
        asset_type: row.get("asset_type"),
        name: row.get("name"),
        default_posting_frequency: row.get("default_posting_frequency"),
        is_required: row.get("is_required"),
    }
}

fn assignment_from_row(row: &Row) -> Assignment {
    Assignment {
        id: row.get("id"),
        client_id: row.get("client_id"),
        template_id: row.get("template_id"),
    }
}

fn task_from_row(row: &Row) -> TaskRecord {
    TaskRecord {
        id: row.get("id"),
        assignment_id: row.get("assignment_id"),
        name: row.get("name"),
        status: row.get("status"),
        category_name: row.get("category_name"),
        template_site_asset_id: row.get("template_site_asset_id"),
        assigned_to_id: row.get("assigned_to_id"),
        due_date: row.get("due_date"),
        completed_at: row.get("completed_at"),
    }
}

fn count_from_row(row: &Row) -> u64 {
    let count: i64 = row.get("count");
    count.max(0) as u64
}

pub async fn ping(db: &impl GenericClient) -> Result<(), Error> {
    db.query_one("SELECT 1", &[]).await?;
    Ok(())
}

pub async fn lookup_token(
    db: &impl GenericClient,
    token_hash: &str,
) -> Result<Option<TokenIdentity>, Error> {
    let row = db.query_opt(SQL_LOOKUP_TOKEN, &[&token_hash]).await?;
    Ok(row.map(|row| TokenIdentity {
        user_id: row.get("user_id"),
        role_name: row.get("role_name"),
        client_id: row.get("client_id"),
    }))
}

pub async fn select_client(db: &impl GenericClient, client_id: i64) -> Result<Option<Client>, Error> {
    let row = db.query_opt(SQL_SELECT_CLIENT, &[&client_id]).await?;
    Ok(row.as_ref().map(client_from_row))
}

/// Clients with their package name; `only` restricts to one client.
pub async fn list_clients(
    db: &impl GenericClient,
    only: Option<i64>,
) -> Result<Vec<(Client, Option<String>)>, Error> {
    let rows = db.query(SQL_LIST_CLIENTS, &[&only]).await?;
    Ok(rows
        .iter()
        .map(|row| (client_from_row(row), row.get("package_name")))
        .collect())
}

pub async fn update_client_package(
    db: &impl GenericClient,
    client_id: i64,
    package_id: i64,
) -> Result<(), Error> {
    db.execute(SQL_UPDATE_CLIENT_PACKAGE, &[&client_id, &package_id])
        .await?;
    Ok(())
}

pub async fn select_package(db: &impl GenericClient, package_id: i64) -> Result<Option<Package>, Error> {
    let row = db.query_opt(SQL_SELECT_PACKAGE, &[&package_id]).await?;
    Ok(row.map(|row| Package {
        id: row.get("id"),
        name: row.get("name"),
    }))
}

pub async fn package_templates(db: &impl GenericClient, package_id: i64) -> Result<Vec<Template>, Error> {
    let rows = db.query(SQL_PACKAGE_TEMPLATES, &[&package_id]).await?;
    Ok(rows
        .into_iter()
        .map(|row| Template {
            id: row.get("id"),
            name: row.get("name"),
        })
        .collect())
}

pub async fn package_assets(db: &impl GenericClient, package_id: i64) -> Result<Vec<SiteAsset>, Error> {
    let rows = db.query(SQL_PACKAGE_ASSETS, &[&package_id]).await?;
    Ok(rows.iter().map(asset_from_row).collect())
}

pub async fn template_assets(
    db: &impl GenericClient,
    template_ids: &[i64],
) -> Result<Vec<SiteAsset>, Error> {
    let rows = db.query(SQL_TEMPLATE_ASSETS, &[&template_ids]).await?;
    Ok(rows.iter().map(asset_from_row).collect())
}

pub async fn select_assignment(
    db: &impl GenericClient,
    assignment_id: i64,
) -> Result<Option<Assignment>, Error> {
    let row = db.query_opt(SQL_SELECT_ASSIGNMENT, &[&assignment_id]).await?;
    Ok(row.as_ref().map(assignment_from_row))
}

pub async fn client_assignments(db: &impl GenericClient, client_id: i64) -> Result<Vec<Assignment>, Error> {
    let rows = db.query(SQL_CLIENT_ASSIGNMENTS, &[&client_id]).await?;
    Ok(rows.iter().map(assignment_from_row).collect())
}

pub async fn client_package_assignments(
    db: &impl GenericClient,
    client_id: i64,
    package_id: i64,
) -> Result<Vec<Assignment>, Error> {
    let rows = db
        .query(SQL_CLIENT_PACKAGE_ASSIGNMENTS, &[&client_id, &package_id])
        .await?;
    Ok(rows.iter().map(assignment_from_row).collect())
}

/// Returns the new id, or `None` when the client already had one.
pub async fn insert_assignment_if_missing(
    db: &impl GenericClient,
    client_id: i64,
    template_id: i64,
) -> Result<Option<i64>, Error> {
    let row = db
        .query_opt(SQL_INSERT_ASSIGNMENT_IF_MISSING, &[&client_id, &template_id])
        .await?;
    Ok(row.map(|row| row.get("id")))
}

pub async fn select_task(db: &impl GenericClient, task_id: i64) -> Result<Option<TaskRecord>, Error> {
    let sql = format!("{SQL_TASK_COLUMNS} WHERE t.id = $1");
    let row = db.query_opt(sql.as_str(), &[&task_id]).await?;
    Ok(row.as_ref().map(task_from_row))
}

pub async fn assignment_client_id(db: &impl GenericClient, assignment_id: i64) -> Result<i64, Error> {
    let row = db.query_one(SQL_TASK_CLIENT, &[&assignment_id]).await?;
    Ok(row.get("client_id"))
}

pub async fn assignment_tasks(
    db: &impl GenericClient,
    assignment_id: i64,
) -> Result<Vec<TaskRecord>, Error> {
    let sql = format!("{SQL_TASK_COLUMNS} WHERE t.assignment_id = $1 ORDER BY t.id");
    let rows = db.query(sql.as_str(), &[&assignment_id]).await?;
    Ok(rows.iter().map(task_from_row).collect())
}

/// Tasks in `statuses` from the client's assignments under `package_id`.
pub async fn package_tasks_with_status(
    db: &impl GenericClient,
    client_id: i64,
    package_id: i64,
    statuses: &[String],
) -> Result<Vec<TaskRecord>, Error> {
    let sql = format!(
        "{SQL_TASK_COLUMNS} \
JOIN assignments a ON a.id = t.assignment_id \
JOIN templates tp ON tp.id = a.template_id \
WHERE a.client_id = $1 AND tp.package_id = $2 AND t.status = ANY($3) \
ORDER BY t.id"
    );
    let rows = db
        .query(sql.as_str(), &[&client_id, &package_id, &statuses])
        .await?;
    Ok(rows.iter().map(task_from_row).collect())
}

pub async fn task_names_by_assignment(
    db: &impl GenericClient,
    assignment_ids: &[i64],
) -> Result<HashMap<i64, HashSet<String>>, Error> {
    let rows = db.query(SQL_TASK_NAMES, &[&assignment_ids]).await?;
    let mut names: HashMap<i64, HashSet<String>> = HashMap::new();
    for row in rows {
        names
            .entry(row.get("assignment_id"))
            .or_default()
            .insert(row.get("name"));
    }
    Ok(names)
}

pub async fn cancel_tasks(db: &impl GenericClient, task_ids: &[i64]) -> Result<u64, Error> {
    if task_ids.is_empty() {
        return Ok(0);
    }
    db.execute(SQL_CANCEL_TASKS, &[&task_ids]).await
}

pub async fn ensure_category(db: &impl GenericClient, name: &str) -> Result<i64, Error> {
    let row = db.query_one(SQL_ENSURE_CATEGORY, &[&name]).await?;
    Ok(row.get("id"))
}

/// Inserts tasks in order, resolving category names once per call.
pub async fn insert_tasks(db: &impl GenericClient, tasks: &[NewTask]) -> Result<Vec<i64>, Error> {
    let mut categories: HashMap<&str, i64> = HashMap::new();
    let mut ids = Vec::with_capacity(tasks.len());

    for task in tasks {
        let category_id = match task.category.as_deref() {
            Some(name) => match categories.get(name) {
                Some(id) => Some(*id),
                None => {
                    let id = ensure_category(db, name).await?;
                    categories.insert(name, id);
                    Some(id)
                }
            },
            None => None,
        };

        let row = db
            .query_one(
                SQL_INSERT_TASK,
                &[
                    &task.assignment_id,
                    &task.name,
                    &task.status.as_str(),
                    &category_id,
                    &task.template_site_asset_id,
                    &task.due_date,
                    &task.completed_at,
                ],
            )
            .await?;
        ids.push(row.get("id"));
    }

    Ok(ids)
}

pub async fn update_task_status(
    db: &impl GenericClient,
    task_id: i64,
    status: &str,
    other_field: &Option<serde_json::Value>,
) -> Result<(), Error> {
    db.execute(SQL_UPDATE_TASK_STATUS, &[&task_id, &status, other_field])
        .await?;
    Ok(())
}

pub async fn update_task_qc(
    db: &impl GenericClient,
    task_id: i64,
    status: &str,
    total_score: f64,
    review: &serde_json::Value,
) -> Result<(), Error> {
    db.execute(SQL_UPDATE_TASK_QC, &[&task_id, &status, &total_score, review])
        .await?;
    Ok(())
}

/// Returns whether a new settings row was written.
pub async fn insert_asset_setting(
    db: &impl GenericClient,
    assignment_id: i64,
    asset: &SiteAsset,
) -> Result<bool, Error> {
    let written = db
        .execute(
            SQL_INSERT_ASSET_SETTING,
            &[
                &assignment_id,
                &asset.id,
                &asset.default_posting_frequency,
                &asset.is_required,
            ],
        )
        .await?;
    Ok(written > 0)
}

pub async fn insert_activity(
    db: &impl GenericClient,
    user_id: Option<i64>,
    entity_type: &str,
    entity_id: i64,
    action: &str,
    details: &serde_json::Value,
) -> Result<(), Error> {
    db.execute(
        SQL_INSERT_ACTIVITY,
        &[&user_id, &entity_type, &entity_id, &action, details],
    )
    .await?;
    Ok(())
}

pub async fn list_activity(
    db: &impl GenericClient,
    entity_type: &Option<String>,
    entity_id: &Option<i64>,
    limit: i64,
) -> Result<Vec<ActivityEntry>, Error> {
    let rows = db
        .query(SQL_LIST_ACTIVITY, &[entity_type, entity_id, &limit])
        .await?;
    Ok(rows
        .into_iter()
        .map(|row| ActivityEntry {
            id: row.get("id"),
            user_id: row.get("user_id"),
            entity_type: row.get("entity_type"),
            entity_id: row.get("entity_id"),
            action: row.get("action"),
            details: row.get("details"),
            created_at: row.get("created_at"),
        })
        .collect())
}

/// Per-client task status counts; `only` restricts to one client.
pub async fn client_status_counts(
    db: &impl GenericClient,
    only: Option<i64>,
) -> Result<HashMap<i64, StatusCounts>, Error> {
    let rows = db.query(SQL_CLIENT_STATUS_COUNTS, &[&only]).await?;
    let mut counts: HashMap<i64, StatusCounts> = HashMap::new();
    for row in rows {
        let status: String = row.get("status");
        let count: i64 = row.get("count");
        counts
            .entry(row.get("client_id"))
            .or_default()
            .add(&status, count);
    }
    Ok(counts)
}

pub async fn count_clients(db: &impl GenericClient) -> Result<u64, Error> {
    let row = db.query_one(SQL_COUNT_CLIENTS, &[]).await?;
    Ok(count_from_row(&row))
}

pub async fn count_active_assignments(db: &impl GenericClient) -> Result<u64, Error> {
    let row = db.query_one(SQL_COUNT_ACTIVE_ASSIGNMENTS, &[]).await?;
    Ok(count_from_row(&row))
}

pub async fn task_status_counts(db: &impl GenericClient) -> Result<StatusCounts, Error> {
    let rows = db.query(SQL_TASK_STATUS_COUNTS, &[]).await?;
    let mut counts = StatusCounts::default();
    for row in rows {
        let status: String = row.get("status");
        counts.add(&status, row.get("count"));
    }
    Ok(counts)
}

/// Past-due tasks, ignoring the given closed statuses.
pub async fn count_overdue(db: &impl GenericClient, closed: &[String]) -> Result<u64, Error> {
    let row = db.query_one(SQL_COUNT_OVERDUE, &[&closed]).await?;
    Ok(count_from_row(&row))
}

pub async fn count_with_status(db: &impl GenericClient, status: &str) -> Result<u64, Error> {
    let row = db.query_one(SQL_COUNT_STATUS, &[&status]).await?;
    Ok(count_from_row(&row))
}
