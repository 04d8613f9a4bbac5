#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use axum::body::Body;
use axum::http::{Method, Request, Response};
use axum::Router;
use http_body_util::BodyExt;
use planbridge_core::admission::{AdmissionController, RateBudget, StaticBudgetSource};
use planbridge_db::{JobStore, MemoryJobStore};
use planbridge_erp::wire::{BulkRequest, BulkResponse, WireResult};
use planbridge_erp::{BatchExecutor, BatchTransport, ExecutorConfig, TransportError};
use planbridge_events::ProgressBus;
use planbridge_worker::{JobService, WorkerConfig};
use tower::ServiceExt;

use planbridge_api::config::{ErpConfig, ServerConfig, StreamConfig};
use planbridge_api::router::build_app_router;
use planbridge_api::state::AppState;
use planbridge_api::stream::StreamGateway;

/// Build a test `ServerConfig` with safe defaults.
///
/// Streams close 10ms after their terminal frame so SSE bodies finish
/// quickly.
pub fn test_config() -> ServerConfig {
    ServerConfig {
        host: "127.0.0.1".to_string(),
        port: 0,
        cors_origins: vec!["http://localhost:5173".to_string()],
        request_timeout_secs: 30,
        job_chunk_size: 2,
        erp: ErpConfig {
            endpoints: HashMap::new(),
            bearer_token: String::new(),
            request_timeout_secs: 5,
            max_transactions_per_call: 100,
        },
        stream: test_stream_config(),
    }
}

pub fn test_stream_config() -> StreamConfig {
    StreamConfig {
        heartbeat_interval: Duration::from_secs(15),
        write_timeout: Duration::from_secs(1),
        close_grace: Duration::from_millis(10),
    }
}

/// ERP stand-in that accepts every transaction.
pub struct AcceptAll;

#[async_trait]
impl BatchTransport for AcceptAll {
    async fn execute(
        &self,
        _environment: &str,
        request: &BulkRequest,
    ) -> Result<BulkResponse, TransportError> {
        Ok(BulkResponse {
            results: request
                .transactions
                .iter()
                .map(|_| WireResult::default())
                .collect(),
            ..Default::default()
        })
    }
}

/// Build the full application router against an in-memory job store and
/// a fake ERP, returning the state too so tests can seed jobs directly.
pub fn build_test_app() -> (Router, AppState) {
    let (app, state, _) = build_test_app_with_bus();
    (app, state)
}

/// Like [`build_test_app`], also handing back the progress bus the
/// workers and stream gateway share.
pub fn build_test_app_with_bus() -> (Router, AppState, ProgressBus) {
    let config = test_config();
    let store: Arc<dyn JobStore> = Arc::new(MemoryJobStore::new());
    let bus = ProgressBus::default();

    let admission = Arc::new(AdmissionController::new(Arc::new(StaticBudgetSource::new(
        RateBudget::new(1000.0, 1000).unwrap(),
    ))));
    let executor = Arc::new(BatchExecutor::new(
        Arc::new(AcceptAll),
        Arc::clone(&admission),
        ExecutorConfig::default(),
    ));
    let jobs = Arc::new(JobService::new(
        Arc::clone(&store),
        bus.clone(),
        executor,
        WorkerConfig {
            chunk_size: config.job_chunk_size,
        },
    ));
    let gateway = Arc::new(StreamGateway::new(
        Arc::clone(&store),
        bus.clone(),
        config.stream,
    ));

    let state = AppState {
        store,
        jobs,
        admission,
        gateway,
    };

    (build_app_router(state.clone(), &config), state, bus)
}

// ---------------------------------------------------------------------------
// Request helpers
// ---------------------------------------------------------------------------

pub async fn get(app: Router, uri: &str) -> Response<Body> {
    let request = Request::builder()
        .method(Method::GET)
        .uri(uri)
        .body(Body::empty())
        .unwrap();
    app.oneshot(request).await.unwrap()
}

pub async fn post_json(app: Router, uri: &str, body: serde_json::Value) -> Response<Body> {
    let request = Request::builder()
        .method(Method::POST)
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap();
    app.oneshot(request).await.unwrap()
}

pub async fn post_empty(app: Router, uri: &str) -> Response<Body> {
    let request = Request::builder()
        .method(Method::POST)
        .uri(uri)
        .body(Body::empty())
        .unwrap();
    app.oneshot(request).await.unwrap()
}

pub async fn body_bytes(response: Response<Body>) -> Vec<u8> {
    response
        .into_body()
        .collect()
        .await
        .unwrap()
        .to_bytes()
        .to_vec()
}

pub async fn body_json(response: Response<Body>) -> serde_json::Value {
    serde_json::from_slice(&body_bytes(response).await).unwrap()
}
