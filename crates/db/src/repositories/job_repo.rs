//! Repository for the `jobs` table.
//!
//! Every status transition is a guarded `UPDATE ... WHERE status_id = ANY(..)`
//! whose allowed source statuses come from [`JobStatus::allowed_sources`].
//! A guarded write that matches no row returns `None`; callers decide
//! whether that means "missing" or "wrong state".

use planbridge_core::status::{JobStatus, StatusId, TransitionActor, ACTIVE_STATUSES};
use planbridge_core::types::{new_job_id, JobId};
use sqlx::PgPool;

use crate::models::job::{CreateJob, Job, JobHistoryQuery, ProgressUpdate};

/// Column list for `jobs` queries.
const COLUMNS: &str = "\
    id, kind, environment, status_id, requested_by, parameters, \
    total_items, succeeded_items, failed_items, progress_percent, \
    current_phase, error_message, \
    created_at, started_at, completed_at, updated_at";

/// Database ids of the statuses `actor` may move a job out of into `target`.
fn source_ids(target: JobStatus, actor: TransitionActor) -> Vec<StatusId> {
    JobStatus::allowed_sources(target, actor)
        .iter()
        .map(|s| s.id())
        .collect()
}

/// Provides persistence operations for background jobs.
pub struct JobRepo;

impl JobRepo {
    /// Create a new pending job.
    pub async fn create(pool: &PgPool, input: &CreateJob) -> Result<Job, sqlx::Error> {
        let parameters = if input.parameters.is_null() {
            serde_json::json!({})
        } else {
            input.parameters.clone()
        };

        let query = format!(
            "INSERT INTO jobs (id, kind, environment, status_id, requested_by, parameters) \
             VALUES ($1, $2, $3, $4, $5, $6) \
             RETURNING {COLUMNS}"
        );
        sqlx::query_as::<_, Job>(&query)
            .bind(new_job_id())
            .bind(input.kind.as_str())
            .bind(&input.environment)
            .bind(JobStatus::Pending.id())
            .bind(&input.requested_by)
            .bind(parameters)
            .fetch_one(pool)
            .await
    }

    /// Find a job by its ID.
    pub async fn find_by_id(pool: &PgPool, id: JobId) -> Result<Option<Job>, sqlx::Error> {
        let query = format!("SELECT {COLUMNS} FROM jobs WHERE id = $1");
        sqlx::query_as::<_, Job>(&query)
            .bind(id)
            .fetch_optional(pool)
            .await
    }

    /// Most recently created job for an environment, in any status.
    pub async fn find_latest_for_environment(
        pool: &PgPool,
        environment: &str,
    ) -> Result<Option<Job>, sqlx::Error> {
        let query = format!(
            "SELECT {COLUMNS} FROM jobs \
             WHERE environment = $1 \
             ORDER BY created_at DESC, id DESC \
             LIMIT 1"
        );
        sqlx::query_as::<_, Job>(&query)
            .bind(environment)
            .fetch_optional(pool)
            .await
    }

    /// Most recently created pending or running job for an environment.
    pub async fn find_active_for_environment(
        pool: &PgPool,
        environment: &str,
    ) -> Result<Option<Job>, sqlx::Error> {
        let active: Vec<StatusId> = ACTIVE_STATUSES.iter().map(|s| s.id()).collect();
        let query = format!(
            "SELECT {COLUMNS} FROM jobs \
             WHERE environment = $1 AND status_id = ANY($2) \
             ORDER BY created_at DESC, id DESC \
             LIMIT 1"
        );
        sqlx::query_as::<_, Job>(&query)
            .bind(environment)
            .bind(&active)
            .fetch_optional(pool)
            .await
    }

    /// Job history for an environment, newest first.
    pub async fn list_for_environment(
        pool: &PgPool,
        environment: &str,
        params: &JobHistoryQuery,
    ) -> Result<Vec<Job>, sqlx::Error> {
        let status_clause = if params.status.is_some() {
            "AND status_id = $4"
        } else {
            ""
        };

        let query = format!(
            "SELECT {COLUMNS} FROM jobs \
             WHERE environment = $1 {status_clause} \
             ORDER BY created_at DESC, id DESC \
             LIMIT $2 OFFSET $3"
        );

        let mut q = sqlx::query_as::<_, Job>(&query)
            .bind(environment)
            .bind(params.limit())
            .bind(params.offset());

        if let Some(status) = params.status {
            q = q.bind(status.id());
        }

        q.fetch_all(pool).await
    }

    /// Move a pending job to running and record the planned item count.
    pub async fn mark_running(
        pool: &PgPool,
        id: JobId,
        total_items: i32,
    ) -> Result<Option<Job>, sqlx::Error> {
        let query = format!(
            "UPDATE jobs \
             SET status_id = $2, started_at = NOW(), total_items = $3, updated_at = NOW() \
             WHERE id = $1 AND status_id = ANY($4) \
             RETURNING {COLUMNS}"
        );
        sqlx::query_as::<_, Job>(&query)
            .bind(id)
            .bind(JobStatus::Running.id())
            .bind(total_items.max(0))
            .bind(source_ids(JobStatus::Running, TransitionActor::Worker))
            .fetch_optional(pool)
            .await
    }

    /// Write progress counters. Only applies while the job is running.
    ///
    /// `GREATEST` keeps `progress_percent` monotonically non-decreasing.
    pub async fn update_progress(
        pool: &PgPool,
        id: JobId,
        update: &ProgressUpdate,
    ) -> Result<Option<Job>, sqlx::Error> {
        let query = format!(
            "UPDATE jobs \
             SET succeeded_items = $2, failed_items = $3, \
                 progress_percent = GREATEST(progress_percent, $4), \
                 current_phase = COALESCE($5, current_phase), \
                 total_items = COALESCE($6, total_items), \
                 updated_at = NOW() \
             WHERE id = $1 AND status_id = $7 \
             RETURNING {COLUMNS}"
        );
        sqlx::query_as::<_, Job>(&query)
            .bind(id)
            .bind(update.succeeded_items.max(0))
            .bind(update.failed_items.max(0))
            .bind(update.clamped_percent())
            .bind(update.current_phase.as_deref())
            .bind(update.total_items.map(|total| total.max(0)))
            .bind(JobStatus::Running.id())
            .fetch_optional(pool)
            .await
    }

    /// Mark a running job completed with its final counters.
    pub async fn complete(
        pool: &PgPool,
        id: JobId,
        update: &ProgressUpdate,
    ) -> Result<Option<Job>, sqlx::Error> {
        let query = format!(
            "UPDATE jobs \
             SET status_id = $2, succeeded_items = $3, failed_items = $4, \
                 progress_percent = 100, \
                 current_phase = COALESCE($5, current_phase), \
                 total_items = COALESCE($6, total_items), \
                 completed_at = NOW(), updated_at = NOW() \
             WHERE id = $1 AND status_id = ANY($7) \
             RETURNING {COLUMNS}"
        );
        sqlx::query_as::<_, Job>(&query)
            .bind(id)
            .bind(JobStatus::Completed.id())
            .bind(update.succeeded_items.max(0))
            .bind(update.failed_items.max(0))
            .bind(update.current_phase.as_deref())
            .bind(update.total_items.map(|total| total.max(0)))
            .bind(source_ids(JobStatus::Completed, TransitionActor::Worker))
            .fetch_optional(pool)
            .await
    }

    /// Mark a running job failed. Failed jobs are kept for history.
    pub async fn fail(
        pool: &PgPool,
        id: JobId,
        error: &str,
        update: &ProgressUpdate,
    ) -> Result<Option<Job>, sqlx::Error> {
        let query = format!(
            "UPDATE jobs \
             SET status_id = $2, error_message = $3, \
                 succeeded_items = $4, failed_items = $5, \
                 progress_percent = GREATEST(progress_percent, $6), \
                 current_phase = COALESCE($7, current_phase), \
                 completed_at = NOW(), updated_at = NOW() \
             WHERE id = $1 AND status_id = ANY($8) \
             RETURNING {COLUMNS}"
        );
        sqlx::query_as::<_, Job>(&query)
            .bind(id)
            .bind(JobStatus::Failed.id())
            .bind(error)
            .bind(update.succeeded_items.max(0))
            .bind(update.failed_items.max(0))
            .bind(update.clamped_percent())
            .bind(update.current_phase.as_deref())
            .bind(source_ids(JobStatus::Failed, TransitionActor::Worker))
            .fetch_optional(pool)
            .await
    }

    /// Cancel a pending or running job. Counters written so far are kept.
    pub async fn cancel(pool: &PgPool, id: JobId) -> Result<Option<Job>, sqlx::Error> {
        let query = format!(
            "UPDATE jobs \
             SET status_id = $2, completed_at = NOW(), updated_at = NOW() \
             WHERE id = $1 AND status_id = ANY($3) \
             RETURNING {COLUMNS}"
        );
        sqlx::query_as::<_, Job>(&query)
            .bind(id)
            .bind(JobStatus::Cancelled.id())
            .bind(source_ids(JobStatus::Cancelled, TransitionActor::Cancellation))
            .fetch_optional(pool)
            .await
    }
}
