//! Handlers for the `/environments` resource.

use axum::extract::{Path, Query, State};
use axum::response::IntoResponse;
use axum::Json;
use planbridge_db::models::job::JobHistoryQuery;
use serde::Serialize;

use crate::error::AppResult;
use crate::response::DataResponse;
use crate::state::AppState;

/// GET /api/v1/environments/{env}/jobs
///
/// Newest first. Supports optional `status`, `limit` and `offset`.
pub async fn list_jobs(
    State(state): State<AppState>,
    Path(environment): Path<String>,
    Query(params): Query<JobHistoryQuery>,
) -> AppResult<impl IntoResponse> {
    let jobs = state
        .store
        .list_for_environment(&environment, &params)
        .await?;
    Ok(Json(DataResponse { data: jobs }))
}

/// GET /api/v1/environments/{env}/jobs/latest
///
/// `data` is `null` when the environment has no jobs.
pub async fn latest_job(
    State(state): State<AppState>,
    Path(environment): Path<String>,
) -> AppResult<impl IntoResponse> {
    let job = state.store.find_latest_for_environment(&environment).await?;
    Ok(Json(DataResponse { data: job }))
}

/// GET /api/v1/environments/{env}/jobs/active
///
/// The pending or running job a client should reattach to after a
/// reload, or `null`.
pub async fn active_job(
    State(state): State<AppState>,
    Path(environment): Path<String>,
) -> AppResult<impl IntoResponse> {
    let job = state.store.find_active_for_environment(&environment).await?;
    Ok(Json(DataResponse { data: job }))
}

#[derive(Debug, Serialize)]
pub struct ReloadResponse {
    pub environment: String,
    /// Whether a cached budget was discarded.
    pub reloaded: bool,
}

/// POST /api/v1/environments/{env}/rate-limit/reload
///
/// Drop the cached rate budget; the next ERP call reloads it.
pub async fn reload_rate_limit(
    State(state): State<AppState>,
    Path(environment): Path<String>,
) -> AppResult<impl IntoResponse> {
    let reloaded = state.admission.reload(&environment).await;
    Ok(Json(DataResponse {
        data: ReloadResponse {
            environment,
            reloaded,
        },
    }))
}
