//! Integration tests for the HTTP surface: health, job lifecycle,
//! environment lookups, rate limit reload and the SSE stream.

mod common;

use std::time::Duration;

use axum::http::StatusCode;
use common::{body_bytes, body_json, get, post_empty, post_json};
use planbridge_core::job_kind::JobKind;
use planbridge_core::types::new_job_id;
use planbridge_db::models::job::{CreateJob, ProgressUpdate};
use serde_json::json;

fn snapshot_refresh(environment: &str) -> serde_json::Value {
    json!({
        "kind": "snapshot-refresh",
        "environment": environment,
        "requested_by": "planner@example.com",
    })
}

// ---------------------------------------------------------------------------
// Test: health
// ---------------------------------------------------------------------------

#[tokio::test]
async fn health_check_returns_ok_with_json() {
    let (app, _) = common::build_test_app();
    let response = get(app, "/health").await;

    assert_eq!(response.status(), StatusCode::OK);
    assert!(response.headers().get("x-request-id").is_some());

    let json = body_json(response).await;
    assert_eq!(json["status"], "ok");
    assert!(json["version"].is_string());
    assert_eq!(json["store_healthy"], true);
    assert_eq!(json["active_workers"], 0);
}

#[tokio::test]
async fn unknown_route_returns_404() {
    let (app, _) = common::build_test_app();
    let response = get(app, "/this-route-does-not-exist").await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

// ---------------------------------------------------------------------------
// Test: job lifecycle
// ---------------------------------------------------------------------------

#[tokio::test]
async fn create_get_and_cancel_a_job() {
    let (app, _) = common::build_test_app();

    let response = post_json(app.clone(), "/api/v1/jobs", snapshot_refresh("prod")).await;
    assert_eq!(response.status(), StatusCode::CREATED);
    let created = body_json(response).await;
    assert_eq!(created["data"]["status"], "pending");
    assert_eq!(created["data"]["kind"], "snapshot-refresh");
    let id = created["data"]["id"].as_str().unwrap().to_string();

    let response = get(app.clone(), &format!("/api/v1/jobs/{id}")).await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_json(response).await["data"]["environment"], "prod");

    let response = post_empty(app.clone(), &format!("/api/v1/jobs/{id}/cancel")).await;
    assert_eq!(response.status(), StatusCode::NO_CONTENT);

    let response = get(app.clone(), &format!("/api/v1/jobs/{id}")).await;
    assert_eq!(body_json(response).await["data"]["status"], "cancelled");

    // Second cancel conflicts.
    let response = post_empty(app, &format!("/api/v1/jobs/{id}/cancel")).await;
    assert_eq!(response.status(), StatusCode::CONFLICT);
    assert_eq!(body_json(response).await["code"], "INVALID_STATE");
}

#[tokio::test]
async fn unknown_job_returns_404() {
    let (app, _) = common::build_test_app();
    let id = new_job_id();

    let response = get(app.clone(), &format!("/api/v1/jobs/{id}")).await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    assert_eq!(body_json(response).await["code"], "NOT_FOUND");

    let response = post_empty(app.clone(), &format!("/api/v1/jobs/{id}/cancel")).await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    let response = get(app, &format!("/api/v1/jobs/{id}/stream")).await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn invalid_job_request_returns_400() {
    let (app, _) = common::build_test_app();

    let response = post_json(app, "/api/v1/jobs", snapshot_refresh("")).await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(body_json(response).await["code"], "VALIDATION_ERROR");
}

#[tokio::test]
async fn bulk_correction_runs_to_completion() {
    let (app, _) = common::build_test_app();

    let body = json!({
        "kind": "bulk-correction",
        "environment": "prod",
        "requested_by": "planner@example.com",
        "operations": [
            { "target_program": "PMS100MI", "transaction_name": "DltOrder", "parameters": { "MFNO": "1001" } },
            { "target_program": "PMS100MI", "transaction_name": "DltOrder", "parameters": { "MFNO": "1002" } },
            { "target_program": "MMS100MI", "transaction_name": "Close", "parameters": { "TRNR": "77" } },
        ],
    });
    let response = post_json(app.clone(), "/api/v1/jobs", body).await;
    assert_eq!(response.status(), StatusCode::CREATED);
    let id = body_json(response).await["data"]["id"]
        .as_str()
        .unwrap()
        .to_string();

    let mut job = serde_json::Value::Null;
    for _ in 0..200 {
        job = body_json(get(app.clone(), &format!("/api/v1/jobs/{id}")).await).await["data"].clone();
        if job["status"] == "completed" {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert_eq!(job["status"], "completed");
    assert_eq!(job["total_items"], 3);
    assert_eq!(job["succeeded_items"], 3);
    assert_eq!(job["failed_items"], 0);
    assert_eq!(job["progress_percent"], 100);
}

// ---------------------------------------------------------------------------
// Test: environment lookups
// ---------------------------------------------------------------------------

#[tokio::test]
async fn environment_latest_active_and_history() {
    let (app, state) = common::build_test_app();

    let response = get(app.clone(), "/api/v1/environments/prod/jobs/latest").await;
    assert_eq!(response.status(), StatusCode::OK);
    assert!(body_json(response).await["data"].is_null());

    let input = CreateJob {
        kind: JobKind::SnapshotRefresh,
        environment: "prod".to_string(),
        requested_by: "planner@example.com".to_string(),
        parameters: serde_json::Value::Null,
    };
    let finished = state.store.create(&input).await.unwrap();
    state.store.mark_running(finished.id, 1).await.unwrap();
    state
        .store
        .mark_completed(finished.id, &ProgressUpdate::default())
        .await
        .unwrap();
    let running = state.store.create(&input).await.unwrap();
    state.store.mark_running(running.id, 4).await.unwrap();

    let response = get(app.clone(), "/api/v1/environments/prod/jobs/active").await;
    let active = body_json(response).await;
    assert_eq!(active["data"]["id"], running.id.to_string());
    assert_eq!(active["data"]["status"], "running");

    let response = get(app.clone(), "/api/v1/environments/prod/jobs/latest").await;
    assert_eq!(
        body_json(response).await["data"]["id"],
        running.id.to_string()
    );

    let response = get(app.clone(), "/api/v1/environments/prod/jobs?status=completed").await;
    let history = body_json(response).await;
    let rows = history["data"].as_array().unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0]["id"], finished.id.to_string());

    let response = get(app, "/api/v1/environments/test/jobs/active").await;
    assert!(body_json(response).await["data"].is_null());
}

#[tokio::test]
async fn rate_limit_reload_reports_cached_budget() {
    let (app, state) = common::build_test_app();

    let response = post_empty(app.clone(), "/api/v1/environments/prod/rate-limit/reload").await;
    assert_eq!(response.status(), StatusCode::OK);
    let json = body_json(response).await;
    assert_eq!(json["data"]["environment"], "prod");
    assert_eq!(json["data"]["reloaded"], false);

    assert!(state.admission.try_acquire("prod").await);

    let response = post_empty(app, "/api/v1/environments/prod/rate-limit/reload").await;
    assert_eq!(body_json(response).await["data"]["reloaded"], true);
}

// ---------------------------------------------------------------------------
// Test: SSE stream
// ---------------------------------------------------------------------------

#[tokio::test]
async fn stream_of_finished_job_sends_snapshot_and_closes() {
    let (app, state, bus) = common::build_test_app_with_bus();

    let input = CreateJob {
        kind: JobKind::DetectionRun,
        environment: "prod".to_string(),
        requested_by: "planner@example.com".to_string(),
        parameters: serde_json::Value::Null,
    };
    let job = state.store.create(&input).await.unwrap();
    state.store.mark_running(job.id, 2).await.unwrap();
    state
        .store
        .mark_completed(
            job.id,
            &ProgressUpdate {
                succeeded_items: 2,
                progress_percent: 100,
                ..Default::default()
            },
        )
        .await
        .unwrap();

    let response = get(app, &format!("/api/v1/jobs/{}/stream", job.id)).await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response.headers()["content-type"],
        "text/event-stream"
    );

    let body = tokio::time::timeout(Duration::from_secs(2), body_bytes(response))
        .await
        .expect("stream should close after the terminal frame");
    let text = String::from_utf8(body).unwrap();

    let connected = text.find("event: connected").unwrap();
    let complete = text.find("event: complete").unwrap();
    assert!(connected < complete);
    assert!(text.contains(&job.id.to_string()));
    assert_eq!(bus.topic_count(), 0);
}
