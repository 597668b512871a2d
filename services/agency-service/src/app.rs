use axum::{
    http::{header::CACHE_CONTROL, HeaderValue},
    routing::{get, patch, post},
    Router,
};
use tower_http::{set_header::SetResponseHeaderLayer, trace::TraceLayer};

use crate::handlers::{
    assignment_tasks, client_progress, dashboard_stream, dashboard_summary, healthz,
    list_activity, list_clients, me, qc_review, readyz, regenerate_tasks, trigger_posting,
    update_task_status, upgrade_package,
};
use crate::state::AppState;

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
        .route("/v1/me", get(me))
        .route("/v1/dashboard/summary", get(dashboard_summary))
        .route("/v1/dashboard/stream", get(dashboard_stream))
        .route("/v1/clients", get(list_clients))
        .route("/v1/clients/:id/progress", get(client_progress))
        .route("/v1/clients/:id/upgrade-package", post(upgrade_package))
        .route("/v1/clients/:id/posting-tasks", post(trigger_posting))
        .route("/v1/assignments/:id/tasks", get(assignment_tasks))
        .route(
            "/v1/assignments/:id/regenerate-tasks",
            post(regenerate_tasks),
        )
        .route("/v1/tasks/:id/status", patch(update_task_status))
        .route("/v1/tasks/:id/qc-review", post(qc_review))
        .route("/v1/activity", get(list_activity))
        // Every response is live data.
        .layer(SetResponseHeaderLayer::overriding(
            CACHE_CONTROL,
            HeaderValue::from_static("no-store"),
        ))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
