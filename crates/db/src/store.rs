//! The job store: single source of truth for what happened to a job.
//!
//! [`JobStore`] is the seam the rest of the system writes through. It
//! enforces the job state machine on every write: a transition is applied
//! only from one of its allowed source statuses, and progress is accepted
//! only while the job is running. Writes that arrive late (after a
//! cancellation already finalised the job, for instance) are rejected
//! with [`StoreError::InvalidState`] instead of being applied.
//!
//! Two implementations are provided:
//! - [`PgJobStore`]: Postgres, via [`JobRepo`].
//! - [`MemoryJobStore`]: process-local, used by tests and local runs.

use async_trait::async_trait;
use chrono::Utc;
use planbridge_core::status::{JobStatus, TransitionActor};
use planbridge_core::types::{new_job_id, JobId};
use tokio::sync::RwLock;

use crate::models::job::{CreateJob, Job, JobHistoryQuery, ProgressUpdate};
use crate::repositories::JobRepo;
use crate::DbPool;

/// Errors from [`JobStore`] operations.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Job {0} not found")]
    NotFound(JobId),

    /// The job's current status does not allow the requested write.
    #[error("Job {id} is {current}; cannot {action}")]
    InvalidState {
        id: JobId,
        current: JobStatus,
        action: &'static str,
    },

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),
}

/// Durable job state, shared by workers, the cancellation path and
/// stream gateways.
#[async_trait]
pub trait JobStore: Send + Sync {
    /// Create a job in `pending`.
    async fn create(&self, input: &CreateJob) -> Result<Job, StoreError>;

    async fn find_by_id(&self, id: JobId) -> Result<Option<Job>, StoreError>;

    async fn find_latest_for_environment(
        &self,
        environment: &str,
    ) -> Result<Option<Job>, StoreError>;

    /// Newest pending or running job; used by clients reconnecting after
    /// a page reload.
    async fn find_active_for_environment(
        &self,
        environment: &str,
    ) -> Result<Option<Job>, StoreError>;

    async fn list_for_environment(
        &self,
        environment: &str,
        query: &JobHistoryQuery,
    ) -> Result<Vec<Job>, StoreError>;

    /// Worker claims the job: `pending -> running`.
    async fn mark_running(&self, id: JobId, total_items: i32) -> Result<Job, StoreError>;

    /// Worker progress while `running`.
    async fn update_progress(&self, id: JobId, update: &ProgressUpdate)
        -> Result<Job, StoreError>;

    /// Worker finished: `running -> completed`.
    async fn mark_completed(&self, id: JobId, update: &ProgressUpdate)
        -> Result<Job, StoreError>;

    /// Worker gave up: `running -> failed`.
    async fn mark_failed(
        &self,
        id: JobId,
        error: &str,
        update: &ProgressUpdate,
    ) -> Result<Job, StoreError>;

    /// Cancellation path: `pending | running -> cancelled`.
    async fn mark_cancelled(&self, id: JobId) -> Result<Job, StoreError>;

    async fn health_check(&self) -> Result<(), StoreError>;
}

// ---------------------------------------------------------------------------
// Postgres
// ---------------------------------------------------------------------------

/// [`JobStore`] backed by the `jobs` table.
#[derive(Clone)]
pub struct PgJobStore {
    pool: DbPool,
}

impl PgJobStore {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &DbPool {
        &self.pool
    }

    /// Turn a guarded write that matched no row into the right error.
    async fn rejected(&self, id: JobId, action: &'static str) -> StoreError {
        match JobRepo::find_by_id(&self.pool, id).await {
            Ok(Some(job)) => {
                tracing::debug!(
                    job_id = %id,
                    status = %job.status,
                    action,
                    "Job write rejected",
                );
                StoreError::InvalidState {
                    id,
                    current: job.status,
                    action,
                }
            }
            Ok(None) => StoreError::NotFound(id),
            Err(e) => StoreError::Database(e),
        }
    }

    async fn guarded(
        &self,
        id: JobId,
        action: &'static str,
        result: Result<Option<Job>, sqlx::Error>,
    ) -> Result<Job, StoreError> {
        match result? {
            Some(job) => Ok(job),
            None => Err(self.rejected(id, action).await),
        }
    }
}

#[async_trait]
impl JobStore for PgJobStore {
    async fn create(&self, input: &CreateJob) -> Result<Job, StoreError> {
        Ok(JobRepo::create(&self.pool, input).await?)
    }

    async fn find_by_id(&self, id: JobId) -> Result<Option<Job>, StoreError> {
        Ok(JobRepo::find_by_id(&self.pool, id).await?)
    }

    async fn find_latest_for_environment(
        &self,
        environment: &str,
    ) -> Result<Option<Job>, StoreError> {
        Ok(JobRepo::find_latest_for_environment(&self.pool, environment).await?)
    }

    async fn find_active_for_environment(
        &self,
        environment: &str,
    ) -> Result<Option<Job>, StoreError> {
        Ok(JobRepo::find_active_for_environment(&self.pool, environment).await?)
    }

    async fn list_for_environment(
        &self,
        environment: &str,
        query: &JobHistoryQuery,
    ) -> Result<Vec<Job>, StoreError> {
        Ok(JobRepo::list_for_environment(&self.pool, environment, query).await?)
    }

    async fn mark_running(&self, id: JobId, total_items: i32) -> Result<Job, StoreError> {
        let result = JobRepo::mark_running(&self.pool, id, total_items).await;
        self.guarded(id, "start", result).await
    }

    async fn update_progress(
        &self,
        id: JobId,
        update: &ProgressUpdate,
    ) -> Result<Job, StoreError> {
        let result = JobRepo::update_progress(&self.pool, id, update).await;
        self.guarded(id, "update progress", result).await
    }

    async fn mark_completed(
        &self,
        id: JobId,
        update: &ProgressUpdate,
    ) -> Result<Job, StoreError> {
        let result = JobRepo::complete(&self.pool, id, update).await;
        self.guarded(id, "complete", result).await
    }

    async fn mark_failed(
        &self,
        id: JobId,
        error: &str,
        update: &ProgressUpdate,
    ) -> Result<Job, StoreError> {
        let result = JobRepo::fail(&self.pool, id, error, update).await;
        self.guarded(id, "fail", result).await
    }

    async fn mark_cancelled(&self, id: JobId) -> Result<Job, StoreError> {
        let result = JobRepo::cancel(&self.pool, id).await;
        self.guarded(id, "cancel", result).await
    }

    async fn health_check(&self) -> Result<(), StoreError> {
        Ok(crate::health_check(&self.pool).await?)
    }
}

// ---------------------------------------------------------------------------
// In-memory
// ---------------------------------------------------------------------------

/// Process-local [`JobStore`].
///
/// Jobs are kept in creation order, which is what "latest" means here.
#[derive(Default)]
pub struct MemoryJobStore {
    jobs: RwLock<Vec<Job>>,
}

impl MemoryJobStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Apply `write` to the job after checking the transition is allowed.
    async fn transition<F>(
        &self,
        id: JobId,
        target: JobStatus,
        actor: TransitionActor,
        action: &'static str,
        write: F,
    ) -> Result<Job, StoreError>
    where
        F: FnOnce(&mut Job) + Send,
    {
        let mut jobs = self.jobs.write().await;
        let job = jobs
            .iter_mut()
            .find(|j| j.id == id)
            .ok_or(StoreError::NotFound(id))?;

        if !job.status.can_transition_to(target, actor) {
            return Err(StoreError::InvalidState {
                id,
                current: job.status,
                action,
            });
        }

        let now = Utc::now();
        job.status = target;
        job.updated_at = now;
        write(job);
        Ok(job.clone())
    }
}

fn apply_counters(job: &mut Job, update: &ProgressUpdate) {
    job.succeeded_items = update.succeeded_items.max(0);
    job.failed_items = update.failed_items.max(0);
    if let Some(phase) = &update.current_phase {
        job.current_phase = Some(phase.clone());
    }
    if let Some(total) = update.total_items {
        job.total_items = total.max(0);
    }
}

#[async_trait]
impl JobStore for MemoryJobStore {
    async fn create(&self, input: &CreateJob) -> Result<Job, StoreError> {
        let now = Utc::now();
        let job = Job {
            id: new_job_id(),
            kind: input.kind,
            environment: input.environment.clone(),
            status: JobStatus::Pending,
            requested_by: input.requested_by.clone(),
            parameters: if input.parameters.is_null() {
                serde_json::json!({})
            } else {
                input.parameters.clone()
            },
            total_items: 0,
            succeeded_items: 0,
            failed_items: 0,
            progress_percent: 0,
            current_phase: None,
            error_message: None,
            created_at: now,
            started_at: None,
            completed_at: None,
            updated_at: now,
        };
        self.jobs.write().await.push(job.clone());
        Ok(job)
    }

    async fn find_by_id(&self, id: JobId) -> Result<Option<Job>, StoreError> {
        Ok(self.jobs.read().await.iter().find(|j| j.id == id).cloned())
    }

    async fn find_latest_for_environment(
        &self,
        environment: &str,
    ) -> Result<Option<Job>, StoreError> {
        Ok(self
            .jobs
            .read()
            .await
            .iter()
            .rev()
            .find(|j| j.environment == environment)
            .cloned())
    }

    async fn find_active_for_environment(
        &self,
        environment: &str,
    ) -> Result<Option<Job>, StoreError> {
        Ok(self
            .jobs
            .read()
            .await
            .iter()
            .rev()
            .find(|j| j.environment == environment && j.status.is_active())
            .cloned())
    }

    async fn list_for_environment(
        &self,
        environment: &str,
        query: &JobHistoryQuery,
    ) -> Result<Vec<Job>, StoreError> {
        Ok(self
            .jobs
            .read()
            .await
            .iter()
            .rev()
            .filter(|j| j.environment == environment)
            .filter(|j| query.status.map_or(true, |s| j.status == s))
            .skip(query.offset() as usize)
            .take(query.limit() as usize)
            .cloned()
            .collect())
    }

    async fn mark_running(&self, id: JobId, total_items: i32) -> Result<Job, StoreError> {
        self.transition(
            id,
            JobStatus::Running,
            TransitionActor::Worker,
            "start",
            |job| {
                job.started_at = Some(job.updated_at);
                job.total_items = total_items.max(0);
            },
        )
        .await
    }

    async fn update_progress(
        &self,
        id: JobId,
        update: &ProgressUpdate,
    ) -> Result<Job, StoreError> {
        let mut jobs = self.jobs.write().await;
        let job = jobs
            .iter_mut()
            .find(|j| j.id == id)
            .ok_or(StoreError::NotFound(id))?;

        if job.status != JobStatus::Running {
            return Err(StoreError::InvalidState {
                id,
                current: job.status,
                action: "update progress",
            });
        }

        apply_counters(job, update);
        job.progress_percent = job.progress_percent.max(update.clamped_percent());
        job.updated_at = Utc::now();
        Ok(job.clone())
    }

    async fn mark_completed(
        &self,
        id: JobId,
        update: &ProgressUpdate,
    ) -> Result<Job, StoreError> {
        self.transition(
            id,
            JobStatus::Completed,
            TransitionActor::Worker,
            "complete",
            |job| {
                apply_counters(job, update);
                job.progress_percent = 100;
                job.completed_at = Some(job.updated_at);
            },
        )
        .await
    }

    async fn mark_failed(
        &self,
        id: JobId,
        error: &str,
        update: &ProgressUpdate,
    ) -> Result<Job, StoreError> {
        self.transition(
            id,
            JobStatus::Failed,
            TransitionActor::Worker,
            "fail",
            |job| {
                apply_counters(job, update);
                job.progress_percent = job.progress_percent.max(update.clamped_percent());
                job.error_message = Some(error.to_string());
                job.completed_at = Some(job.updated_at);
            },
        )
        .await
    }

    async fn mark_cancelled(&self, id: JobId) -> Result<Job, StoreError> {
        self.transition(
            id,
            JobStatus::Cancelled,
            TransitionActor::Cancellation,
            "cancel",
            |job| {
                job.completed_at = Some(job.updated_at);
            },
        )
        .await
    }

    async fn health_check(&self) -> Result<(), StoreError> {
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
