use axum::{
    body::Bytes,
    extract::{Path, Query, State},
    http::StatusCode,
    response::{sse::Event, sse::KeepAlive, sse::Sse, IntoResponse},
    Json,
};
use serde::de::DeserializeOwned;
use std::{convert::Infallible, time::Duration};

use crate::auth::{AuthContext, Permission};
use crate::error::ServiceError;
use crate::models::{
    ActivityQuery, PostingTasksRequest, QcReviewRequest, RegenerateTasksRequest,
    StatusUpdateRequest, UpgradePackageRequest,
};
use crate::service;
use crate::state::AppState;

/// Bodies that may be omitted: an empty body means the defaults, anything
/// else must parse.
fn optional_body<T: DeserializeOwned + Default>(body: &[u8]) -> Result<T, ServiceError> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Ok(T::default());
    }
    serde_json::from_slice(body).map_err(|err| {
        ServiceError::bad_request("invalid_body", format!("invalid JSON body: {err}"))
    })
}

pub async fn healthz() -> StatusCode {
    StatusCode::OK
}

pub async fn readyz(State(state): State<AppState>) -> impl IntoResponse {
    match service::readiness(&state).await {
        Ok(()) => StatusCode::OK.into_response(),
        Err(err) => (err.status, Json(err.body)).into_response(),
    }
}

pub async fn me(auth: AuthContext) -> impl IntoResponse {
    Json(service::me(&auth))
}

pub async fn dashboard_summary(
    State(state): State<AppState>,
    auth: AuthContext,
) -> impl IntoResponse {
    if let Err(err) = auth.require(Permission::DashboardView) {
        return err.into_response();
    }
    match service::build_dashboard(&state).await {
        Ok(summary) => (StatusCode::OK, Json(summary)).into_response(),
        Err(err) => (err.status, Json(err.body)).into_response(),
    }
}

pub async fn dashboard_stream(
    State(state): State<AppState>,
    auth: AuthContext,
) -> Result<Sse<impl tokio_stream::Stream<Item = Result<Event, Infallible>>>, ServiceError> {
    auth.require(Permission::DashboardView)?;
    let mut updates = state.updates.subscribe();
    let interval = state.config.dashboard_interval;

    let stream = async_stream::stream! {
        let mut ticker = tokio::time::interval(interval);
        loop {
            tokio::select! {
                _ = ticker.tick() => {},
                _ = updates.recv() => {},
            }

            match service::build_dashboard(&state).await {
                Ok(summary) => {
                    if let Ok(event) = Event::default().json_data(summary) {
                        yield Ok(event);
                    }
                }
                Err(err) => {
                    let fallback = serde_json::json!({ "error": err.body.message });
                    if let Ok(event) = Event::default().event("error").json_data(fallback) {
                        yield Ok(event);
                    }
                }
            }
        }
    };

    Ok(Sse::new(stream).keep_alive(
        KeepAlive::new()
            .interval(Duration::from_secs(15))
            .text("keep-alive"),
    ))
}

pub async fn list_clients(State(state): State<AppState>, auth: AuthContext) -> impl IntoResponse {
    match service::list_clients(&state, &auth).await {
        Ok(clients) => (StatusCode::OK, Json(clients)).into_response(),
        Err(err) => (err.status, Json(err.body)).into_response(),
    }
}

pub async fn client_progress(
    State(state): State<AppState>,
    auth: AuthContext,
    Path(client_id): Path<i64>,
) -> impl IntoResponse {
    match service::client_progress(&state, &auth, client_id).await {
        Ok(progress) => (StatusCode::OK, Json(progress)).into_response(),
        Err(err) => (err.status, Json(err.body)).into_response(),
    }
}

pub async fn upgrade_package(
    State(state): State<AppState>,
    auth: AuthContext,
    Path(client_id): Path<i64>,
    Json(payload): Json<UpgradePackageRequest>,
) -> impl IntoResponse {
    match service::upgrade_package(&state, &auth, client_id, payload).await {
        Ok(response) => (StatusCode::OK, Json(response)).into_response(),
        Err(err) => (err.status, Json(err.body)).into_response(),
    }
}

pub async fn trigger_posting(
    State(state): State<AppState>,
    auth: AuthContext,
    Path(client_id): Path<i64>,
    body: Bytes,
) -> impl IntoResponse {
    let payload = match optional_body::<PostingTasksRequest>(&body) {
        Ok(payload) => payload,
        Err(err) => return (err.status, Json(err.body)).into_response(),
    };
    match service::trigger_posting(&state, &auth, client_id, payload).await {
        Ok(response) => (StatusCode::CREATED, Json(response)).into_response(),
        Err(err) => (err.status, Json(err.body)).into_response(),
    }
}

pub async fn assignment_tasks(
    State(state): State<AppState>,
    auth: AuthContext,
    Path(assignment_id): Path<i64>,
) -> impl IntoResponse {
    match service::assignment_tasks(&state, &auth, assignment_id).await {
        Ok(tasks) => (StatusCode::OK, Json(tasks)).into_response(),
        Err(err) => (err.status, Json(err.body)).into_response(),
    }
}

pub async fn regenerate_tasks(
    State(state): State<AppState>,
    auth: AuthContext,
    Path(assignment_id): Path<i64>,
    body: Bytes,
) -> impl IntoResponse {
    let payload = match optional_body::<RegenerateTasksRequest>(&body) {
        Ok(payload) => payload,
        Err(err) => return (err.status, Json(err.body)).into_response(),
    };
    match service::regenerate_tasks(&state, &auth, assignment_id, payload).await {
        Ok(response) => (StatusCode::OK, Json(response)).into_response(),
        Err(err) => (err.status, Json(err.body)).into_response(),
    }
}

pub async fn update_task_status(
    State(state): State<AppState>,
    auth: AuthContext,
    Path(task_id): Path<i64>,
    Json(payload): Json<StatusUpdateRequest>,
) -> impl IntoResponse {
    match service::update_task_status(&state, &auth, task_id, payload).await {
        Ok(response) => (StatusCode::OK, Json(response)).into_response(),
        Err(err) => (err.status, Json(err.body)).into_response(),
    }
}

pub async fn qc_review(
    State(state): State<AppState>,
    auth: AuthContext,
    Path(task_id): Path<i64>,
    Json(payload): Json<QcReviewRequest>,
) -> impl IntoResponse {
    match service::qc_review(&state, &auth, task_id, payload).await {
        Ok(response) => (StatusCode::OK, Json(response)).into_response(),
        Err(err) => (err.status, Json(err.body)).into_response(),
    }
}

pub async fn list_activity(
    State(state): State<AppState>,
    auth: AuthContext,
    Query(query): Query<ActivityQuery>,
) -> impl IntoResponse {
    match service::list_activity(&state, &auth, query).await {
        Ok(entries) => (StatusCode::OK, Json(entries)).into_response(),
        Err(err) => (err.status, Json(err.body)).into_response(),
    }
}

#[cfg(test)]
mod tests {
    use super::optional_body;
    use crate::models::{PostingTasksRequest, RegenerateTasksRequest};
    use axum::http::StatusCode;

    #[test]
    fn empty_body_means_defaults() {
        let posting: PostingTasksRequest = optional_body(b"").unwrap();
        assert!(posting.asset_ids.is_none());
        let regenerate: RegenerateTasksRequest = optional_body(b"  \n").unwrap();
        assert!(!regenerate.force_recreate);
    }

    #[test]
    fn posting_body_keeps_the_asset_filter() {
        let posting: PostingTasksRequest =
            optional_body(br#"{"asset_ids":[5],"start_date":"2026-03-01"}"#).unwrap();
        assert_eq!(posting.asset_ids, Some(vec![5]));
        assert!(posting.start_date.is_some());
    }

    #[test]
    fn malformed_posting_body_is_rejected() {
        for body in [
            &br#"{"asset_ids":["5"]}"#[..],
            &br#"{"start_date":"tomorrow"}"#[..],
            &br#"{"asset_ids":[5]"#[..],
        ] {
            let err = optional_body::<PostingTasksRequest>(body).unwrap_err();
            assert_eq!(err.status, StatusCode::BAD_REQUEST);
            assert_eq!(err.body.code, "invalid_body");
        }
    }

    #[test]
    fn malformed_regenerate_body_is_rejected() {
        let err = optional_body::<RegenerateTasksRequest>(br#"{"force_recreate":"true"}"#)
            .unwrap_err();
        assert_eq!(err.status, StatusCode::BAD_REQUEST);
        assert_eq!(err.body.code, "invalid_body");

        let ok: RegenerateTasksRequest =
            optional_body(br#"{"force_recreate":true}"#).unwrap();
        assert!(ok.force_recreate);
    }
}
