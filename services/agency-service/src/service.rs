use axum::http::StatusCode;
use chrono::{Duration, NaiveDate, Utc};
use serde_json::json;
use std::collections::HashMap;
use tokio_postgres::Client;
use uuid::Uuid;

use crate::auth::{AuthContext, Permission, Role};
use crate::config::ServiceConfig;
use crate::db;
use crate::dispatch::PostingJob;
use crate::error::ServiceError;
use crate::models::{
    ActivityEntry, ActivityQuery, ClientProgressResponse, ClientSummary, DashboardSummary,
    MeResponse, PostingTasksRequest, PostingTasksResponse, QcReviewRequest, QcReviewResponse,
    RegenerateTasksRequest, RegenerateTasksResponse, SiteAsset, StatusUpdateRequest,
    StatusUpdateResponse, TaskRecord, TaskView, UpgradePackageRequest, UpgradePackageResponse,
};
use crate::posting;
use crate::qc::{self, QcDecision, Rating};
use crate::regenerate;
use crate::state::AppState;
use crate::status::TaskStatus;
use crate::upgrade;

const ACTIVITY_DEFAULT_LIMIT: i64 = 50;
const ACTIVITY_MAX_LIMIT: i64 = 200;

fn db_error(context: &'static str) -> impl Fn(tokio_postgres::Error) -> ServiceError {
    move |err| ServiceError::db(context, err)
}

pub fn notify_update(state: &AppState) {
    let _ = state.updates.send(());
}

/// Free-form JSON columns must hold objects; anything else is wrapped.
pub fn coerce_object(value: serde_json::Value) -> serde_json::Value {
    if value.is_object() {
        value
    } else {
        json!({ "value": value })
    }
}

fn parse_stored_status(task: &TaskRecord) -> Result<TaskStatus, ServiceError> {
    task.status.parse::<TaskStatus>().map_err(|_| {
        tracing::error!(
            task_id = task.id,
            status = task.status.as_str(),
            "unknown stored status"
        );
        ServiceError::new(
            StatusCode::CONFLICT,
            "invalid_state",
            "task has an unknown status",
        )
    })
}

fn check_transition(current: TaskStatus, next: TaskStatus) -> Result<(), ServiceError> {
    if current.can_transition_to(next) {
        return Ok(());
    }
    let allowed = current
        .allowed_next()
        .iter()
        .map(TaskStatus::to_string)
        .collect();
    Err(ServiceError::with_reasons(
        StatusCode::CONFLICT,
        "invalid_transition",
        format!("cannot move task from {current} to {next}"),
        allowed,
    ))
}

async fn load_task(db: &Client, task_id: i64) -> Result<TaskRecord, ServiceError> {
    db::select_task(db, task_id)
        .await
        .map_err(db_error("select task"))?
        .ok_or_else(|| ServiceError::not_found("task_not_found", "task not found"))
}

pub async fn readiness(state: &AppState) -> Result<(), ServiceError> {
    let db = state.db.lock().await;
    db::ping(&*db).await.map_err(|err| {
        tracing::warn!(error = %err, "readiness ping failed");
        ServiceError::new(
            StatusCode::SERVICE_UNAVAILABLE,
            "db_unavailable",
            "database unavailable",
        )
    })
}

pub fn me(auth: &AuthContext) -> MeResponse {
    MeResponse {
        user_id: auth.user_id,
        role: auth.role.as_str(),
        client_id: auth.client_id,
        permissions: auth.permission_names(),
    }
}

pub async fn upgrade_package(
    state: &AppState,
    auth: &AuthContext,
    client_id: i64,
    payload: UpgradePackageRequest,
) -> Result<UpgradePackageResponse, ServiceError> {
    auth.require(Permission::ClientsUpgrade)?;
    let Some(package_id) = payload.package_id else {
        return Err(ServiceError::bad_request(
            "missing_package",
            "package_id is required",
        ));
    };

    let mut db = state.db.lock().await;
    let client = db::select_client(&*db, client_id)
        .await
        .map_err(db_error("select client"))?
        .ok_or_else(|| ServiceError::not_found("client_not_found", "client not found"))?;
    let package = db::select_package(&*db, package_id)
        .await
        .map_err(db_error("select package"))?
        .ok_or_else(|| ServiceError::not_found("package_not_found", "package not found"))?;
    let old_package_id = client.package_id;
    let templates = db::package_templates(&*db, package.id)
        .await
        .map_err(db_error("package templates"))?;
    let existing = db::client_assignments(&*db, client.id)
        .await
        .map_err(db_error("client assignments"))?;

    // Package swap and assignment creation are atomic; everything after
    // the commit is best effort and reported back as warnings.
    let transaction = db
        .transaction()
        .await
        .map_err(db_error("begin upgrade"))?;
    db::update_client_package(&transaction, client.id, package.id)
        .await
        .map_err(db_error("update client package"))?;

    let mut created_assignment_ids = Vec::new();
    if payload.create_assignments {
        for template in upgrade::templates_missing_assignment(&templates, &existing) {
            let inserted = db::insert_assignment_if_missing(&transaction, client.id, template.id)
                .await
                .map_err(db_error("insert assignment"))?;
            if let Some(assignment_id) = inserted {
                tracing::debug!(
                    client_id = client.id,
                    assignment_id,
                    template = template.name.as_str(),
                    "assignment created"
                );
                created_assignment_ids.push(assignment_id);
            }
        }
    }

    db::insert_activity(
        &transaction,
        Some(auth.user_id),
        "client",
        client.id,
        "package_upgraded",
        &json!({
            "old_package_id": old_package_id,
            "new_package_id": package.id,
            "package_name": package.name,
            "created_assignment_ids": created_assignment_ids,
        }),
    )
    .await
    .map_err(db_error("insert upgrade activity"))?;
    transaction
        .commit()
        .await
        .map_err(db_error("commit upgrade"))?;

    tracing::info!(
        client_id = client.id,
        old_package_id = ?old_package_id,
        new_package_id = package.id,
        created_assignments = created_assignment_ids.len(),
        "package upgraded"
    );

    let mut warnings = Vec::new();
    let (mut migrated_tasks, mut skipped_tasks) = (0, 0);

    if let Some(old_package) =
        upgrade::migration_source(old_package_id, package.id, payload.migrate_completed_tasks)
    {
        let outcome = migrate_done_tasks(
            &mut db,
            auth.user_id,
            client.id,
            old_package,
            package.id,
            &created_assignment_ids,
        )
        .await;
        if let Some((migrated, skipped)) =
            settle_soft_step(outcome, "task migration", client.id, &mut warnings)
        {
            migrated_tasks = migrated;
            skipped_tasks = skipped;
        }
    }

    let mut posting_tasks_created = 0;
    if payload.generate_posting_tasks {
        let fresh = fresh_package_assets(&db, old_package_id, package.id).await;
        let outcome = match fresh {
            Ok(asset_ids) if asset_ids.is_empty() => Ok(0),
            Ok(asset_ids) => generate_posting_locked(
                &mut db,
                &state.config,
                client.id,
                Some(asset_ids.as_slice()),
                None,
                Some(auth.user_id),
            )
            .await
            .map(|response| response.created_task_ids.len()),
            Err(err) => Err(err),
        };
        if let Some(created) =
            settle_soft_step(outcome, "posting generation", client.id, &mut warnings)
        {
            posting_tasks_created = created;
        }
    }

    drop(db);
    notify_update(state);
    Ok(UpgradePackageResponse {
        status: "ok",
        client_id: client.id,
        old_package_id,
        new_package_id: package.id,
        created_assignment_ids,
        migrated_tasks,
        skipped_tasks,
        posting_tasks_created,
        warnings,
    })
}

/// Steps after the upgrade commit never fail the request; a failure is
/// logged and handed back as a warning.
fn settle_soft_step<T>(
    outcome: Result<T, ServiceError>,
    step: &'static str,
    client_id: i64,
    warnings: &mut Vec<String>,
) -> Option<T> {
    match outcome {
        Ok(value) => Some(value),
        Err(err) => {
            tracing::warn!(
                client_id,
                step,
                message = err.body.message.as_str(),
                "upgrade follow-up failed"
            );
            warnings.push(format!("{step} failed: {}", err.body.message));
            None
        }
    }
}

/// Ids of new-package assets whose (type, name) is absent from the old package.
async fn fresh_package_assets(
    db: &Client,
    old_package_id: Option<i64>,
    new_package_id: i64,
) -> Result<Vec<i64>, ServiceError> {
    let new_assets = db::package_assets(db, new_package_id)
        .await
        .map_err(db_error("new package assets"))?;
    let old_assets = match old_package_id {
        Some(old) => db::package_assets(db, old)
            .await
            .map_err(db_error("old package assets"))?,
        None => Vec::new(),
    };
    Ok(posting::assets_missing_from(&old_assets, &new_assets)
        .into_iter()
        .map(|asset| asset.id)
        .collect())
}

async fn migrate_done_tasks(
    db: &mut Client,
    actor_id: i64,
    client_id: i64,
    old_package_id: i64,
    new_package_id: i64,
    created_assignment_ids: &[i64],
) -> Result<(usize, usize), ServiceError> {
    let source = db::package_tasks_with_status(
        &*db,
        client_id,
        old_package_id,
        &TaskStatus::done_strings(),
    )
    .await
    .map_err(db_error("done tasks"))?;
    if source.is_empty() {
        return Ok((0, 0));
    }

    let targets = db::client_package_assignments(&*db, client_id, new_package_id)
        .await
        .map_err(db_error("new package assignments"))?;
    let Some(target) = upgrade::migration_target(created_assignment_ids, &targets) else {
        tracing::info!(client_id, "no assignment under the new package, skipping migration");
        return Ok((0, 0));
    };

    let existing_names = db::task_names_by_assignment(&*db, &[target])
        .await
        .map_err(db_error("target task names"))?
        .remove(&target)
        .unwrap_or_default();
    let old_assets = db::package_assets(&*db, old_package_id)
        .await
        .map_err(db_error("old package assets"))?;
    let new_assets = db::package_assets(&*db, new_package_id)
        .await
        .map_err(db_error("new package assets"))?;
    let remap = upgrade::asset_remap(&old_assets, &new_assets);
    let plan = upgrade::plan_task_migration(&source, target, &existing_names, &remap);
    if plan.tasks.is_empty() {
        return Ok((0, plan.skipped));
    }

    let transaction = db
        .transaction()
        .await
        .map_err(db_error("begin migration"))?;
    let task_ids = db::insert_tasks(&transaction, &plan.tasks)
        .await
        .map_err(db_error("insert migrated tasks"))?;
    db::insert_activity(
        &transaction,
        Some(actor_id),
        "assignment",
        target,
        "tasks_migrated",
        &json!({
            "from_package_id": old_package_id,
            "task_ids": task_ids,
            "skipped": plan.skipped,
        }),
    )
    .await
    .map_err(db_error("insert migration activity"))?;
    transaction
        .commit()
        .await
        .map_err(db_error("commit migration"))?;

    tracing::info!(
        client_id,
        assignment_id = target,
        migrated = task_ids.len(),
        skipped = plan.skipped,
        "done tasks migrated"
    );
    Ok((task_ids.len(), plan.skipped))
}

pub async fn regenerate_tasks(
    state: &AppState,
    auth: &AuthContext,
    assignment_id: i64,
    payload: RegenerateTasksRequest,
) -> Result<RegenerateTasksResponse, ServiceError> {
    auth.require(Permission::AssignmentsRegenerate)?;

    let mut db = state.db.lock().await;
    let assignment = db::select_assignment(&*db, assignment_id)
        .await
        .map_err(db_error("select assignment"))?
        .ok_or_else(|| ServiceError::not_found("assignment_not_found", "assignment not found"))?;
    let assets = db::template_assets(&*db, &[assignment.template_id])
        .await
        .map_err(db_error("template assets"))?;
    let tasks = db::assignment_tasks(&*db, assignment.id)
        .await
        .map_err(db_error("assignment tasks"))?;

    let due_date = Some(Utc::now() + Duration::days(state.config.regenerated_task_due_days));
    let plan = regenerate::plan_regeneration(
        assignment.id,
        &assets,
        &tasks,
        payload.force_recreate,
        due_date,
    );

    let transaction = db
        .transaction()
        .await
        .map_err(db_error("begin regeneration"))?;
    let cancelled = db::cancel_tasks(&transaction, &plan.cancel_task_ids)
        .await
        .map_err(db_error("cancel tasks"))?;
    let created_task_ids = db::insert_tasks(&transaction, &plan.tasks)
        .await
        .map_err(db_error("insert regenerated tasks"))?;

    let mut settings_created = 0;
    if payload.create_settings {
        for asset in assets.iter().filter(|asset| plan.asset_ids.contains(&asset.id)) {
            if db::insert_asset_setting(&transaction, assignment.id, asset)
                .await
                .map_err(db_error("insert asset setting"))?
            {
                settings_created += 1;
            }
        }
    }

    db::insert_activity(
        &transaction,
        Some(auth.user_id),
        "assignment",
        assignment.id,
        "tasks_regenerated",
        &json!({
            "force_recreate": payload.force_recreate,
            "cancelled": cancelled,
            "created_task_ids": created_task_ids,
            "settings_created": settings_created,
        }),
    )
    .await
    .map_err(db_error("insert regeneration activity"))?;
    transaction
        .commit()
        .await
        .map_err(db_error("commit regeneration"))?;

    tracing::info!(
        assignment_id = assignment.id,
        client_id = assignment.client_id,
        force_recreate = payload.force_recreate,
        cancelled,
        created = created_task_ids.len(),
        "tasks regenerated"
    );

    drop(db);
    notify_update(state);
    Ok(RegenerateTasksResponse {
        status: "ok",
        assignment_id: assignment.id,
        cancelled_tasks: cancelled as usize,
        created_task_ids,
        settings_created,
    })
}

pub async fn trigger_posting(
    state: &AppState,
    auth: &AuthContext,
    client_id: i64,
    payload: PostingTasksRequest,
) -> Result<PostingTasksResponse, ServiceError> {
    auth.require(Permission::PostingTrigger)?;
    let response = posting_for_client(
        state,
        client_id,
        payload.asset_ids.as_deref(),
        payload.start_date,
        Some(auth.user_id),
    )
    .await?;
    notify_update(state);
    Ok(response)
}

/// Entry point for queued jobs from the dispatcher.
pub async fn run_posting_job(
    state: &AppState,
    job: &PostingJob,
) -> Result<PostingTasksResponse, ServiceError> {
    let response = posting_for_client(
        state,
        job.client_id,
        job.asset_ids.as_deref(),
        None,
        job.actor_id,
    )
    .await?;
    if !response.created_task_ids.is_empty() {
        notify_update(state);
    }
    Ok(response)
}

async fn posting_for_client(
    state: &AppState,
    client_id: i64,
    asset_ids: Option<&[i64]>,
    start_date: Option<NaiveDate>,
    actor_id: Option<i64>,
) -> Result<PostingTasksResponse, ServiceError> {
    let mut db = state.db.lock().await;
    db::select_client(&*db, client_id)
        .await
        .map_err(db_error("select client"))?
        .ok_or_else(|| ServiceError::not_found("client_not_found", "client not found"))?;
    generate_posting_locked(
        &mut db,
        &state.config,
        client_id,
        asset_ids,
        start_date,
        actor_id,
    )
    .await
}

async fn generate_posting_locked(
    db: &mut Client,
    config: &ServiceConfig,
    client_id: i64,
    asset_ids: Option<&[i64]>,
    start_date: Option<NaiveDate>,
    actor_id: Option<i64>,
) -> Result<PostingTasksResponse, ServiceError> {
    let assignments = db::client_assignments(&*db, client_id)
        .await
        .map_err(db_error("client assignments"))?;
    let mut assignment_by_template: HashMap<i64, i64> = HashMap::new();
    for assignment in &assignments {
        assignment_by_template
            .entry(assignment.template_id)
            .or_insert(assignment.id);
    }
    let template_ids: Vec<i64> = assignment_by_template.keys().copied().collect();
    let assignment_ids: Vec<i64> = assignment_by_template.values().copied().collect();

    let assets = db::template_assets(&*db, &template_ids)
        .await
        .map_err(db_error("template assets"))?;
    let selected: Vec<&SiteAsset> = assets
        .iter()
        .filter(|asset| asset_ids.map_or(true, |ids| ids.contains(&asset.id)))
        .collect();
    let existing_names = db::task_names_by_assignment(&*db, &assignment_ids)
        .await
        .map_err(db_error("task names"))?;

    let start = start_date
        .and_then(|date| date.and_hms_opt(0, 0, 0))
        .map(|date| date.and_utc())
        .unwrap_or_else(Utc::now);
    let plan = posting::plan_posting_tasks(
        &selected,
        &assignment_by_template,
        &existing_names,
        start,
        config.posting_period_days,
    );
    if !plan.unassigned_assets.is_empty() {
        tracing::warn!(
            client_id,
            assets = ?plan.unassigned_assets,
            "posting assets without an assignment"
        );
    }
    if !plan.capped_assets.is_empty() {
        tracing::warn!(
            client_id,
            assets = ?plan.capped_assets,
            max = posting::MAX_POSTINGS_PER_PERIOD,
            "posting frequency capped"
        );
    }

    let batch_id = Uuid::new_v4().to_string();
    let transaction = db
        .transaction()
        .await
        .map_err(db_error("begin posting"))?;
    let created_task_ids = db::insert_tasks(&transaction, &plan.tasks)
        .await
        .map_err(db_error("insert posting tasks"))?;
    if !created_task_ids.is_empty() {
        db::insert_activity(
            &transaction,
            actor_id,
            "client",
            client_id,
            "posting_tasks_generated",
            &json!({
                "batch_id": batch_id,
                "task_ids": created_task_ids,
                "skipped_existing": plan.skipped_existing,
            }),
        )
        .await
        .map_err(db_error("insert posting activity"))?;
    }
    transaction
        .commit()
        .await
        .map_err(db_error("commit posting"))?;

    tracing::info!(
        client_id,
        batch_id = batch_id.as_str(),
        created = created_task_ids.len(),
        skipped = plan.skipped_existing,
        "posting tasks generated"
    );
    Ok(PostingTasksResponse {
        status: "ok",
        client_id,
        batch_id,
        created_task_ids,
        skipped_existing: plan.skipped_existing,
    })
}

/// Queues posting generation when a QC-category task gets approved. Never
/// fails the caller.
async fn trigger_posting_after_approval(
    state: &AppState,
    db: &Client,
    task: &TaskRecord,
    current: TaskStatus,
    next: TaskStatus,
    actor_id: i64,
) -> bool {
    if !qc::approval_triggers_posting(
        current,
        next,
        task.category_name.as_deref(),
        &state.config.qc_category_markers,
    ) {
        return false;
    }
    let client_id = match db::assignment_client_id(db, task.assignment_id).await {
        Ok(client_id) => client_id,
        Err(err) => {
            tracing::warn!(task_id = task.id, error = %err, "posting trigger skipped");
            return false;
        }
    };
    let queued = state.posting.dispatch(PostingJob {
        client_id,
        asset_ids: task.template_site_asset_id.map(|id| vec![id]),
        actor_id: Some(actor_id),
        reason: "qc_approved",
    });
    if queued {
        tracing::info!(task_id = task.id, client_id, "posting generation queued");
    }
    queued
}

fn parse_rating(raw: Option<&str>) -> Result<Rating, ServiceError> {
    let Some(raw) = raw else {
        return Err(ServiceError::bad_request("missing_rating", "rating is required"));
    };
    raw.parse::<Rating>().map_err(|_| {
        ServiceError::with_reasons(
            StatusCode::BAD_REQUEST,
            "invalid_rating",
            format!("unknown rating {raw}"),
            vec![
                "excellent".to_string(),
                "good".to_string(),
                "average".to_string(),
                "poor".to_string(),
            ],
        )
    })
}

pub async fn qc_review(
    state: &AppState,
    auth: &AuthContext,
    task_id: i64,
    payload: QcReviewRequest,
) -> Result<QcReviewResponse, ServiceError> {
    auth.require(Permission::QcReview)?;
    let rating = parse_rating(payload.rating.as_deref())?;
    let decision = QcDecision::from_optional(payload.decision.as_deref()).ok_or_else(|| {
        ServiceError::bad_request("invalid_decision", "decision must be approve or reject")
    })?;

    let mut db = state.db.lock().await;
    let task = load_task(&db, task_id).await?;
    let current = parse_stored_status(&task)?;
    let next = decision.target_status();
    check_transition(current, next)?;

    let metrics = payload.metrics.clamped();
    let total_score = qc::total_score(rating, &payload.metrics);
    let review = json!({
        "rating": rating,
        "metrics": metrics,
        "notes": payload.notes,
        "decision": next,
        "reviewer_id": auth.user_id,
        "reviewed_at": Utc::now().to_rfc3339(),
    });

    let transaction = db
        .transaction()
        .await
        .map_err(db_error("begin qc review"))?;
    db::update_task_qc(&transaction, task.id, next.as_str(), total_score, &review)
        .await
        .map_err(db_error("update qc review"))?;
    db::insert_activity(
        &transaction,
        Some(auth.user_id),
        "task",
        task.id,
        "qc_reviewed",
        &json!({
            "rating": rating,
            "total_score": total_score,
            "from": current,
            "to": next,
        }),
    )
    .await
    .map_err(db_error("insert qc activity"))?;
    transaction
        .commit()
        .await
        .map_err(db_error("commit qc review"))?;

    tracing::info!(
        task_id = task.id,
        total_score,
        task_status = next.as_str(),
        "qc review stored"
    );

    let posting_triggered =
        trigger_posting_after_approval(state, &db, &task, current, next, auth.user_id).await;

    drop(db);
    notify_update(state);
    Ok(QcReviewResponse {
        status: "ok",
        task_id: task.id,
        task_status: next,
        total_score,
        posting_triggered,
    })
}

/// Approving through the status endpoint needs the reviewer permission too.
fn require_status_permission(auth: &AuthContext, next: TaskStatus) -> Result<(), ServiceError> {
    auth.require(Permission::TasksUpdateStatus)?;
    if next == TaskStatus::QcApproved {
        auth.require(Permission::QcReview)?;
    }
    Ok(())
}

pub async fn update_task_status(
    state: &AppState,
    auth: &AuthContext,
    task_id: i64,
    payload: StatusUpdateRequest,
) -> Result<StatusUpdateResponse, ServiceError> {
    let Some(status_raw) = payload.status.as_deref() else {
        return Err(ServiceError::bad_request("missing_status", "status is required"));
    };
    let next = status_raw.parse::<TaskStatus>().map_err(|_| {
        ServiceError::bad_request("invalid_status", format!("unknown status {status_raw}"))
    })?;
    require_status_permission(auth, next)?;
    let other_field = payload.other_field.map(coerce_object);

    let mut db = state.db.lock().await;
    let task = load_task(&db, task_id).await?;
    auth.require_task_scope(&task)?;
    let current = parse_stored_status(&task)?;
    check_transition(current, next)?;

    let transaction = db
        .transaction()
        .await
        .map_err(db_error("begin status update"))?;
    db::update_task_status(&transaction, task.id, next.as_str(), &other_field)
        .await
        .map_err(db_error("update task status"))?;
    db::insert_activity(
        &transaction,
        Some(auth.user_id),
        "task",
        task.id,
        "status_changed",
        &json!({ "from": current, "to": next }),
    )
    .await
    .map_err(db_error("insert status activity"))?;
    transaction
        .commit()
        .await
        .map_err(db_error("commit status update"))?;

    tracing::info!(
        task_id = task.id,
        from = current.as_str(),
        to = next.as_str(),
        "task status changed"
    );

    let posting_triggered =
        trigger_posting_after_approval(state, &db, &task, current, next, auth.user_id).await;

    drop(db);
    notify_update(state);
    Ok(StatusUpdateResponse {
        status: "ok",
        task_id: task.id,
        previous_status: current,
        task_status: next,
        posting_triggered,
    })
}

pub async fn list_clients(
    state: &AppState,
    auth: &AuthContext,
) -> Result<Vec<ClientSummary>, ServiceError> {
    auth.require(Permission::ClientsRead)?;
    let only = match auth.role {
        Role::Client => Some(
            auth.client_id
                .ok_or_else(|| ServiceError::forbidden("no client linked to this account"))?,
        ),
        _ => None,
    };

    let db = state.db.lock().await;
    let clients = db::list_clients(&*db, only)
        .await
        .map_err(db_error("list clients"))?;
    let mut counts = db::client_status_counts(&*db, only)
        .await
        .map_err(db_error("client status counts"))?;

    Ok(clients
        .into_iter()
        .map(|(client, package_name)| ClientSummary {
            progress: counts
                .remove(&client.id)
                .map(|counts| counts.percentage())
                .unwrap_or(0),
            id: client.id,
            name: client.name,
            package_id: client.package_id,
            package_name,
        })
        .collect())
}

pub async fn client_progress(
    state: &AppState,
    auth: &AuthContext,
    client_id: i64,
) -> Result<ClientProgressResponse, ServiceError> {
    auth.require(Permission::ClientsRead)?;
    auth.require_client_scope(client_id)?;

    let db = state.db.lock().await;
    db::select_client(&*db, client_id)
        .await
        .map_err(db_error("select client"))?
        .ok_or_else(|| ServiceError::not_found("client_not_found", "client not found"))?;
    let counts = db::client_status_counts(&*db, Some(client_id))
        .await
        .map_err(db_error("client status counts"))?
        .remove(&client_id)
        .unwrap_or_default();

    Ok(ClientProgressResponse {
        client_id,
        total: counts.total(),
        done: counts.done(),
        cancelled: counts.cancelled(),
        progress: counts.percentage(),
        by_status: counts.by_status,
    })
}

pub async fn assignment_tasks(
    state: &AppState,
    auth: &AuthContext,
    assignment_id: i64,
) -> Result<Vec<TaskView>, ServiceError> {
    auth.require(Permission::TasksRead)?;

    let db = state.db.lock().await;
    db::select_assignment(&*db, assignment_id)
        .await
        .map_err(db_error("select assignment"))?
        .ok_or_else(|| ServiceError::not_found("assignment_not_found", "assignment not found"))?;
    let tasks = db::assignment_tasks(&*db, assignment_id)
        .await
        .map_err(db_error("assignment tasks"))?;

    Ok(tasks
        .into_iter()
        .filter(|task| auth.require_task_scope(task).is_ok())
        .map(TaskView::from)
        .collect())
}

pub async fn build_dashboard(state: &AppState) -> Result<DashboardSummary, ServiceError> {
    let closed: Vec<String> = TaskStatus::done_strings()
        .into_iter()
        .chain([TaskStatus::Cancelled.to_string()])
        .collect();

    let guard = state.db.lock().await;
    let db = &*guard;
    let (clients, active_assignments, statuses, overdue_tasks, awaiting_qc) = tokio::try_join!(
        db::count_clients(db),
        db::count_active_assignments(db),
        db::task_status_counts(db),
        db::count_overdue(db, &closed),
        db::count_with_status(db, TaskStatus::Completed.as_str()),
    )
    .map_err(db_error("dashboard counts"))?;

    Ok(DashboardSummary {
        updated_at: Utc::now().to_rfc3339(),
        clients,
        active_assignments,
        tasks_by_status: statuses.by_status,
        overdue_tasks,
        awaiting_qc,
    })
}

pub async fn list_activity(
    state: &AppState,
    auth: &AuthContext,
    query: ActivityQuery,
) -> Result<Vec<ActivityEntry>, ServiceError> {
    auth.require(Permission::ActivityRead)?;
    let limit = query
        .limit
        .unwrap_or(ACTIVITY_DEFAULT_LIMIT)
        .clamp(1, ACTIVITY_MAX_LIMIT);

    let db = state.db.lock().await;
    db::list_activity(&*db, &query.entity_type, &query.entity_id, limit)
        .await
        .map_err(db_error("list activity"))
}

#[cfg(test)]
mod tests {
    use super::{
        check_transition, coerce_object, parse_rating, require_status_permission,
        settle_soft_step,
    };
    use crate::auth::{AuthContext, Role};
    use crate::error::ServiceError;
    use crate::qc::Rating;
    use crate::status::TaskStatus;
    use axum::http::StatusCode;
    use serde_json::json;

    fn context(role: Role) -> AuthContext {
        AuthContext {
            user_id: 5,
            role,
            client_id: None,
        }
    }

    #[test]
    fn failed_follow_up_becomes_a_warning() {
        let mut warnings = Vec::new();
        let failed: Result<usize, ServiceError> = Err(ServiceError::new(
            StatusCode::INTERNAL_SERVER_ERROR,
            "db_error",
            "database error",
        ));
        assert_eq!(
            settle_soft_step(failed, "task migration", 1, &mut warnings),
            None
        );
        assert_eq!(
            settle_soft_step(Ok(3usize), "posting generation", 1, &mut warnings),
            Some(3)
        );
        assert_eq!(warnings, vec!["task migration failed: database error".to_string()]);
    }

    #[test]
    fn unknown_rating_is_a_bad_request() {
        let err = parse_rating(Some("stellar")).unwrap_err();
        assert_eq!(err.status, StatusCode::BAD_REQUEST);
        assert_eq!(err.body.code, "invalid_rating");
        assert_eq!(err.body.reasons.len(), 4);

        let err = parse_rating(None).unwrap_err();
        assert_eq!(err.body.code, "missing_rating");
        assert_eq!(parse_rating(Some("Good")).unwrap(), Rating::Good);
    }

    #[test]
    fn approving_through_status_update_needs_review_permission() {
        let agent = context(Role::Agent);
        assert!(require_status_permission(&agent, TaskStatus::Completed).is_ok());
        let err = require_status_permission(&agent, TaskStatus::QcApproved).unwrap_err();
        assert_eq!(err.status, StatusCode::FORBIDDEN);
        assert_eq!(err.body.reasons, vec!["qc:review".to_string()]);

        assert!(require_status_permission(&context(Role::Qc), TaskStatus::QcApproved).is_ok());
        let err = require_status_permission(&context(Role::Client), TaskStatus::Completed)
            .unwrap_err();
        assert_eq!(err.body.reasons, vec!["tasks:update_status".to_string()]);
    }

    #[test]
    fn objects_pass_through_and_scalars_are_wrapped() {
        assert_eq!(coerce_object(json!({ "a": 1 })), json!({ "a": 1 }));
        assert_eq!(coerce_object(json!("note")), json!({ "value": "note" }));
        assert_eq!(coerce_object(json!([1, 2])), json!({ "value": [1, 2] }));
    }

    #[test]
    fn illegal_transition_lists_allowed_targets() {
        let err = check_transition(TaskStatus::Cancelled, TaskStatus::Completed).unwrap_err();
        assert_eq!(err.status, StatusCode::CONFLICT);
        assert_eq!(err.body.code, "invalid_transition");
        assert_eq!(err.body.reasons, vec!["pending".to_string()]);
        assert!(check_transition(TaskStatus::Completed, TaskStatus::QcApproved).is_ok());
    }
}
