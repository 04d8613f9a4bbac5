//! In-process job orchestration: creation, dispatch and cancellation.
//!
//! Each dispatched job runs on its own tokio task with a cancellation
//! token that is a child of the service's shutdown token, so shutting the
//! service down stops every worker.

use std::sync::Arc;

use planbridge_core::job_events::JobTopic;
use planbridge_core::job_kind::JobKind;
use planbridge_core::types::JobId;
use planbridge_db::models::job::{CreateJob, Job};
use planbridge_db::{JobStore, StoreError};
use planbridge_erp::{BatchExecutor, OperationRequest};
use planbridge_events::{ProgressBus, ProgressEvent};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

use crate::bulk::{BulkCorrectionHandler, DEFAULT_CHUNK_SIZE};
use crate::context::JobContext;
use crate::error::WorkerError;
use crate::handler::{to_i32, JobHandler};

#[derive(Debug, Clone, Copy)]
pub struct WorkerConfig {
    /// Operation requests per progress step of a bulk correction.
    pub chunk_size: usize,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
        }
    }
}

pub struct JobService {
    store: Arc<dyn JobStore>,
    bus: ProgressBus,
    executor: Arc<BatchExecutor>,
    config: WorkerConfig,
    shutdown: CancellationToken,
    tasks: TaskTracker,
}

impl JobService {
    pub fn new(
        store: Arc<dyn JobStore>,
        bus: ProgressBus,
        executor: Arc<BatchExecutor>,
        config: WorkerConfig,
    ) -> Self {
        Self {
            store,
            bus,
            executor,
            config,
            shutdown: CancellationToken::new(),
            tasks: TaskTracker::new(),
        }
    }

    /// Record a new job.
    ///
    /// A bulk correction with operations starts on an in-process worker
    /// right away; anything else stays pending for an external worker.
    pub async fn create_job(
        &self,
        mut input: CreateJob,
        operations: Vec<OperationRequest>,
    ) -> Result<Job, WorkerError> {
        if input.environment.trim().is_empty() {
            return Err(WorkerError::InvalidRequest("Environment is required".into()));
        }
        if input.requested_by.trim().is_empty() {
            return Err(WorkerError::InvalidRequest("Requester is required".into()));
        }
        if !operations.is_empty() && input.kind != JobKind::BulkCorrection {
            return Err(WorkerError::InvalidRequest(format!(
                "Jobs of kind '{}' do not take operations",
                input.kind
            )));
        }

        if operations.is_empty() {
            let job = self.store.create(&input).await?;
            tracing::info!(job_id = %job.id, kind = %job.kind, environment = %job.environment, "Job created");
            return Ok(job);
        }

        BulkCorrectionHandler::validate(&operations)?;
        input.parameters = serde_json::json!({ "operations": operations });

        let job = self.store.create(&input).await?;
        tracing::info!(
            job_id = %job.id,
            environment = %job.environment,
            operations = operations.len(),
            "Bulk correction created",
        );

        let handler = BulkCorrectionHandler::new(
            Arc::clone(&self.executor),
            operations,
            self.config.chunk_size,
        );
        self.dispatch(&job, Arc::new(handler));
        Ok(job)
    }

    /// Run `handler` for a pending `job` on its own task.
    pub fn dispatch(&self, job: &Job, handler: Arc<dyn JobHandler>) {
        let ctx = JobContext::new(
            job,
            Arc::clone(&self.store),
            self.bus.clone(),
            self.shutdown.child_token(),
        );
        self.tasks.spawn(run_job(ctx, handler));
    }

    /// Cancel a pending or running job.
    ///
    /// The store write decides the outcome: a job that finished meanwhile
    /// is reported as [`StoreError::InvalidState`] and left untouched.
    pub async fn request_cancel(&self, job_id: JobId) -> Result<Job, WorkerError> {
        let job = self
            .store
            .find_by_id(job_id)
            .await?
            .ok_or(StoreError::NotFound(job_id))?;

        if !job.status.is_cancellable() {
            return Err(StoreError::InvalidState {
                id: job_id,
                current: job.status,
                action: "cancel",
            }
            .into());
        }

        let job = self.store.mark_cancelled(job_id).await?;
        let delivered = self
            .bus
            .publish_job(JobTopic::Cancel, ProgressEvent::from_job(&job));
        tracing::info!(job_id = %job_id, delivered, "Job cancelled");
        Ok(job)
    }

    /// Jobs currently running on this service.
    pub fn active_workers(&self) -> usize {
        self.tasks.len()
    }

    /// Stop every worker and wait for their tasks to finish.
    ///
    /// Interrupted jobs are marked cancelled with the counters of their
    /// last accepted progress write.
    pub async fn shutdown(&self) {
        tracing::info!(active = self.tasks.len(), "Stopping job workers");
        self.shutdown.cancel();
        self.tasks.close();
        self.tasks.wait().await;
    }
}

/// Error message recorded when a handler panics.
pub const PANIC_MESSAGE: &str = "Worker panicked";

/// Drive one job from pending to a terminal status.
async fn run_job(ctx: JobContext, handler: Arc<dyn JobHandler>) {
    let job_id = ctx.job_id();

    if let Err(e) = ctx.start(to_i32(handler.planned_items())).await {
        tracing::warn!(job_id = %job_id, error = %e, "Job could not start");
        return;
    }

    // The handler runs on its own task so a panic still ends in a
    // terminal status.
    let ctx = Arc::new(ctx);
    let run = {
        let ctx = Arc::clone(&ctx);
        tokio::spawn(async move { handler.run(&ctx).await })
    };
    let result = match run.await {
        Ok(result) => result,
        Err(e) if e.is_panic() => {
            tracing::error!(job_id = %job_id, "Job handler panicked");
            if let Err(e) = ctx.fail(PANIC_MESSAGE, &ctx.last_progress()).await {
                tracing::error!(job_id = %job_id, error = %e, "Failed to record panicked job");
            }
            return;
        }
        Err(_) => Err(WorkerError::Cancelled(job_id)),
    };

    let recorded = match result {
        Ok(summary) if summary.all_failed() => {
            ctx.fail("Every operation failed", &summary.to_update(None))
                .await
        }
        Ok(summary) => ctx.complete(&summary.to_update(None)).await,
        Err(WorkerError::Cancelled(_)) => {
            match ctx.abandon().await {
                Ok(Some(_)) => tracing::info!(job_id = %job_id, "Job interrupted by shutdown"),
                Ok(None) => tracing::info!(job_id = %job_id, "Job stopped after cancellation"),
                Err(e) => {
                    tracing::error!(job_id = %job_id, error = %e, "Failed to record interrupted job");
                }
            }
            return;
        }
        Err(e) => ctx.fail(&e.to_string(), &ctx.last_progress()).await,
    };

    match recorded {
        Ok(_) => {}
        Err(WorkerError::Cancelled(_)) => {
            tracing::info!(job_id = %job_id, "Job was cancelled before its result was recorded");
        }
        Err(e) => {
            tracing::error!(job_id = %job_id, error = %e, "Failed to record job result");
        }
    }
}
