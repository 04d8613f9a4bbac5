use std::sync::Arc;

use planbridge_core::admission::AdmissionController;
use planbridge_db::JobStore;
use planbridge_worker::JobService;

use crate::stream::StreamGateway;

/// Shared application state available to all Axum handlers via `State<AppState>`.
///
/// This is cheaply cloneable (inner data is behind `Arc` or is already `Clone`).
#[derive(Clone)]
pub struct AppState {
    /// Durable job state.
    pub store: Arc<dyn JobStore>,
    /// Job creation, dispatch and cancellation.
    pub jobs: Arc<JobService>,
    /// Per-environment ERP rate limits.
    pub admission: Arc<AdmissionController>,
    /// Live stream sessions for `/jobs/{id}/stream`.
    pub gateway: Arc<StreamGateway>,
}
