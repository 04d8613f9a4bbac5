//! Integration tests for the Postgres job store.
//!
//! These need a live database (`DATABASE_URL`); run them with
//! `cargo test -p planbridge-db -- --ignored`.

use assert_matches::assert_matches;
use planbridge_core::job_kind::JobKind;
use planbridge_core::status::JobStatus;
use planbridge_db::models::job::{CreateJob, JobHistoryQuery, ProgressUpdate};
use planbridge_db::{JobStore, PgJobStore, StoreError};
use sqlx::PgPool;

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn new_job(environment: &str) -> CreateJob {
    CreateJob {
        kind: JobKind::BulkCorrection,
        environment: environment.to_string(),
        requested_by: "planner@example.com".to_string(),
        parameters: serde_json::json!({ "operations": 3 }),
    }
}

fn progress(succeeded: i32, failed: i32, percent: i16) -> ProgressUpdate {
    ProgressUpdate {
        succeeded_items: succeeded,
        failed_items: failed,
        progress_percent: percent,
        current_phase: Some("correcting".into()),
        total_items: None,
    }
}

// ---------------------------------------------------------------------------
// Test: full lifecycle
// ---------------------------------------------------------------------------

#[sqlx::test(migrations = "../../db/migrations")]
#[ignore = "requires a Postgres DATABASE_URL"]
async fn test_job_lifecycle(pool: PgPool) {
    let store = PgJobStore::new(pool);

    let job = store.create(&new_job("prod")).await.unwrap();
    assert_eq!(job.status, JobStatus::Pending);
    assert_eq!(job.kind, JobKind::BulkCorrection);
    assert_eq!(job.parameters["operations"], 3);

    let job = store.mark_running(job.id, 3).await.unwrap();
    assert_eq!(job.status, JobStatus::Running);
    assert!(job.started_at.is_some());

    let job = store.update_progress(job.id, &progress(1, 0, 33)).await.unwrap();
    assert_eq!(job.progress_percent, 33);

    let job = store.update_progress(job.id, &progress(1, 0, 10)).await.unwrap();
    assert_eq!(job.progress_percent, 33, "progress must not regress");

    let job = store.mark_completed(job.id, &progress(2, 1, 100)).await.unwrap();
    assert_eq!(job.status, JobStatus::Completed);
    assert_eq!(job.progress_percent, 100);
    assert_eq!((job.succeeded_items, job.failed_items), (2, 1));
    assert!(job.completed_at.is_some());
}

// ---------------------------------------------------------------------------
// Test: cancellation wins over a late worker
// ---------------------------------------------------------------------------

#[sqlx::test(migrations = "../../db/migrations")]
#[ignore = "requires a Postgres DATABASE_URL"]
async fn test_late_completion_after_cancel_rejected(pool: PgPool) {
    let store = PgJobStore::new(pool);

    let job = store.create(&new_job("prod")).await.unwrap();
    store.mark_running(job.id, 5).await.unwrap();
    store.update_progress(job.id, &progress(2, 0, 40)).await.unwrap();

    let cancelled = store.mark_cancelled(job.id).await.unwrap();
    assert_eq!(cancelled.status, JobStatus::Cancelled);

    assert_matches!(
        store.mark_completed(job.id, &progress(5, 0, 100)).await,
        Err(StoreError::InvalidState { current: JobStatus::Cancelled, .. })
    );

    let job = store.find_by_id(job.id).await.unwrap().unwrap();
    assert_eq!(job.status, JobStatus::Cancelled);
    assert_eq!(job.succeeded_items, 2);
}

// ---------------------------------------------------------------------------
// Test: pending job cancelled directly
// ---------------------------------------------------------------------------

#[sqlx::test(migrations = "../../db/migrations")]
#[ignore = "requires a Postgres DATABASE_URL"]
async fn test_cancel_pending_job(pool: PgPool) {
    let store = PgJobStore::new(pool);

    let job = store.create(&new_job("prod")).await.unwrap();
    let job = store.mark_cancelled(job.id).await.unwrap();
    assert_eq!(job.status, JobStatus::Cancelled);
    assert!(job.started_at.is_none());

    assert_matches!(
        store.mark_running(job.id, 1).await,
        Err(StoreError::InvalidState { .. })
    );
    assert_matches!(
        store.mark_cancelled(job.id).await,
        Err(StoreError::InvalidState { .. })
    );
}

// ---------------------------------------------------------------------------
// Test: environment lookups
// ---------------------------------------------------------------------------

#[sqlx::test(migrations = "../../db/migrations")]
#[ignore = "requires a Postgres DATABASE_URL"]
async fn test_environment_lookups(pool: PgPool) {
    let store = PgJobStore::new(pool);

    let first = store.create(&new_job("prod")).await.unwrap();
    store.mark_running(first.id, 1).await.unwrap();
    store.mark_failed(first.id, "boom", &progress(0, 1, 100)).await.unwrap();

    let second = store.create(&new_job("prod")).await.unwrap();

    let latest = store.find_latest_for_environment("prod").await.unwrap().unwrap();
    assert_eq!(latest.id, second.id);

    let active = store.find_active_for_environment("prod").await.unwrap().unwrap();
    assert_eq!(active.id, second.id);

    let failed = store
        .list_for_environment(
            "prod",
            &JobHistoryQuery {
                status: Some(JobStatus::Failed),
                ..Default::default()
            },
        )
        .await
        .unwrap();
    assert_eq!(failed.len(), 1);
    assert_eq!(failed[0].error_message.as_deref(), Some("boom"));

    assert!(store.find_active_for_environment("test").await.unwrap().is_none());
}

// ---------------------------------------------------------------------------
// Test: unknown job
// ---------------------------------------------------------------------------

#[sqlx::test(migrations = "../../db/migrations")]
#[ignore = "requires a Postgres DATABASE_URL"]
async fn test_unknown_job_not_found(pool: PgPool) {
    let store = PgJobStore::new(pool);
    let id = planbridge_core::types::new_job_id();

    assert_matches!(store.mark_cancelled(id).await, Err(StoreError::NotFound(_)));
    assert!(store.find_by_id(id).await.unwrap().is_none());
}
