//! Route definitions for the `/environments` resource.

use axum::routing::{get, post};
use axum::Router;

use crate::handlers::environments;
use crate::state::AppState;

/// Routes mounted at `/environments`.
///
/// ```text
/// GET    /{env}/jobs                -> list_jobs
/// GET    /{env}/jobs/latest         -> latest_job
/// GET    /{env}/jobs/active         -> active_job
/// POST   /{env}/rate-limit/reload   -> reload_rate_limit
/// ```
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/{env}/jobs", get(environments::list_jobs))
        .route("/{env}/jobs/latest", get(environments::latest_job))
        .route("/{env}/jobs/active", get(environments::active_job))
        .route(
            "/{env}/rate-limit/reload",
            post(environments::reload_rate_limit),
        )
}
