pub mod environments;
pub mod health;
pub mod jobs;

use axum::Router;

use crate::state::AppState;

/// Build the `/api/v1` route tree.
///
/// Route hierarchy:
///
/// ```text
/// /jobs                                      create (POST)
/// /jobs/{id}                                 get
/// /jobs/{id}/cancel                          cancel (POST)
/// /jobs/{id}/stream                          live progress (SSE)
///
/// /environments/{env}/jobs                   history (paginated)
/// /environments/{env}/jobs/latest            latest job
/// /environments/{env}/jobs/active            pending or running job
/// /environments/{env}/rate-limit/reload      reload ERP rate budget (POST)
/// ```
pub fn api_routes() -> Router<AppState> {
    Router::new()
        .nest("/jobs", jobs::router())
        .nest("/environments", environments::router())
}
