//! Handlers for the `/jobs` resource.

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use planbridge_core::job_kind::JobKind;
use planbridge_core::types::JobId;
use planbridge_db::models::job::CreateJob;
use planbridge_db::StoreError;
use planbridge_erp::OperationRequest;
use serde::Deserialize;

use crate::error::AppResult;
use crate::response::DataResponse;
use crate::state::AppState;
use crate::stream::sse::into_sse;

/// Body of `POST /jobs`.
#[derive(Debug, Deserialize)]
pub struct CreateJobRequest {
    pub kind: JobKind,
    pub environment: String,
    pub requested_by: String,
    #[serde(default)]
    pub parameters: serde_json::Value,
    /// Operation requests of a bulk correction.
    #[serde(default)]
    pub operations: Vec<OperationRequest>,
}

// ---------------------------------------------------------------------------
// Create
// ---------------------------------------------------------------------------

/// POST /api/v1/jobs
///
/// Returns 201 with the created job. A bulk correction with operations
/// starts immediately; other jobs stay `pending`.
pub async fn create_job(
    State(state): State<AppState>,
    Json(input): Json<CreateJobRequest>,
) -> AppResult<impl IntoResponse> {
    let create = CreateJob {
        kind: input.kind,
        environment: input.environment,
        requested_by: input.requested_by,
        parameters: input.parameters,
    };
    let job = state.jobs.create_job(create, input.operations).await?;

    Ok((StatusCode::CREATED, Json(DataResponse { data: job })))
}

// ---------------------------------------------------------------------------
// Get
// ---------------------------------------------------------------------------

/// GET /api/v1/jobs/{id}
pub async fn get_job(
    State(state): State<AppState>,
    Path(job_id): Path<JobId>,
) -> AppResult<impl IntoResponse> {
    let job = state
        .store
        .find_by_id(job_id)
        .await?
        .ok_or(StoreError::NotFound(job_id))?;
    Ok(Json(DataResponse { data: job }))
}

// ---------------------------------------------------------------------------
// Cancel
// ---------------------------------------------------------------------------

/// POST /api/v1/jobs/{id}/cancel
///
/// 204 on success, 404 for an unknown job, 409 if the job already
/// finished.
pub async fn cancel_job(
    State(state): State<AppState>,
    Path(job_id): Path<JobId>,
) -> AppResult<StatusCode> {
    state.jobs.request_cancel(job_id).await?;
    Ok(StatusCode::NO_CONTENT)
}

// ---------------------------------------------------------------------------
// Stream
// ---------------------------------------------------------------------------

/// GET /api/v1/jobs/{id}/stream
///
/// Server-Sent Events: `connected`, the current snapshot, then live
/// `progress` / `complete` / `error` frames. Closes shortly after a
/// terminal frame.
pub async fn stream_job(
    State(state): State<AppState>,
    Path(job_id): Path<JobId>,
) -> AppResult<impl IntoResponse> {
    let session = state.gateway.open(job_id).await?;
    Ok(into_sse(session))
}
