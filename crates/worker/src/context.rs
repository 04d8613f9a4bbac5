//! The boundary a worker writes through while it owns a job.
//!
//! Every write goes to the [`JobStore`] first and is published on the
//! [`ProgressBus`] only once the store accepted it, so live readers never
//! see a state the store does not hold.

use std::sync::{Arc, Mutex, PoisonError};

use planbridge_core::job_events::JobTopic;
use planbridge_core::status::JobStatus;
use planbridge_core::types::JobId;
use planbridge_db::models::job::{Job, ProgressUpdate};
use planbridge_db::{JobStore, StoreError};
use planbridge_events::{ProgressBus, ProgressEvent};
use tokio_util::sync::{CancellationToken, DropGuard};

use crate::error::WorkerError;

pub struct JobContext {
    job_id: JobId,
    environment: String,
    store: Arc<dyn JobStore>,
    bus: ProgressBus,
    cancel: CancellationToken,
    last_progress: Mutex<ProgressUpdate>,
    _watch: DropGuard,
}

impl JobContext {
    /// Take ownership of `job`.
    ///
    /// `cancel` fires when a cancellation is published for the job. The
    /// watch on the cancel topic ends when the context is dropped.
    pub fn new(
        job: &Job,
        store: Arc<dyn JobStore>,
        bus: ProgressBus,
        cancel: CancellationToken,
    ) -> Self {
        let done = CancellationToken::new();
        let mut subscription = bus.subscribe_job(JobTopic::Cancel, job.id);

        let job_id = job.id;
        let token = cancel.clone();
        let watch_done = done.clone();
        tokio::spawn(async move {
            tokio::select! {
                event = subscription.recv() => {
                    if event.is_some() {
                        tracing::info!(job_id = %job_id, "Cancellation received, stopping worker");
                        token.cancel();
                    }
                }
                _ = token.cancelled() => {}
                _ = watch_done.cancelled() => {}
            }
        });

        Self {
            job_id: job.id,
            environment: job.environment.clone(),
            store,
            bus,
            cancel,
            last_progress: Mutex::new(ProgressUpdate::default()),
            _watch: done.drop_guard(),
        }
    }

    pub fn job_id(&self) -> JobId {
        self.job_id
    }

    pub fn environment(&self) -> &str {
        &self.environment
    }

    pub fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Counters from the last accepted progress write.
    pub fn last_progress(&self) -> ProgressUpdate {
        self.last_progress
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Move the job from pending to running.
    pub async fn start(&self, total_items: i32) -> Result<Job, WorkerError> {
        let job = self
            .store
            .mark_running(self.job_id, total_items)
            .await
            .map_err(|e| self.store_error(e))?;
        tracing::info!(job_id = %self.job_id, total_items, "Job started");
        self.publish(JobTopic::Progress, &job);
        Ok(job)
    }

    pub async fn report_progress(&self, update: &ProgressUpdate) -> Result<Job, WorkerError> {
        let job = self
            .store
            .update_progress(self.job_id, update)
            .await
            .map_err(|e| self.store_error(e))?;
        *self
            .last_progress
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = update.clone();
        tracing::debug!(
            job_id = %self.job_id,
            percent = job.progress_percent,
            succeeded = job.succeeded_items,
            failed = job.failed_items,
            "Job progress",
        );
        self.publish(JobTopic::Progress, &job);
        Ok(job)
    }

    pub async fn complete(&self, update: &ProgressUpdate) -> Result<Job, WorkerError> {
        let job = self
            .store
            .mark_completed(self.job_id, update)
            .await
            .map_err(|e| self.store_error(e))?;
        tracing::info!(
            job_id = %self.job_id,
            succeeded = job.succeeded_items,
            failed = job.failed_items,
            "Job completed",
        );
        self.publish(JobTopic::Complete, &job);
        Ok(job)
    }

    pub async fn fail(&self, message: &str, update: &ProgressUpdate) -> Result<Job, WorkerError> {
        let job = self
            .store
            .mark_failed(self.job_id, message, update)
            .await
            .map_err(|e| self.store_error(e))?;
        tracing::warn!(job_id = %self.job_id, error = message, "Job failed");
        self.publish(JobTopic::Error, &job);
        Ok(job)
    }

    /// Record that the worker stopped before finishing.
    ///
    /// Returns `None` when the job was already cancelled by someone else.
    pub async fn abandon(&self) -> Result<Option<Job>, WorkerError> {
        match self.store.mark_cancelled(self.job_id).await {
            Ok(job) => {
                tracing::warn!(job_id = %self.job_id, "Job abandoned by its worker");
                self.publish(JobTopic::Cancel, &job);
                Ok(Some(job))
            }
            Err(StoreError::InvalidState { .. }) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn publish(&self, topic: JobTopic, job: &Job) {
        let delivered = self.bus.publish_job(topic, ProgressEvent::from_job(job));
        tracing::trace!(job_id = %self.job_id, topic = topic.prefix(), delivered, "Published job event");
    }

    /// A write refused because the job was cancelled stops the worker.
    fn store_error(&self, error: StoreError) -> WorkerError {
        match error {
            StoreError::InvalidState {
                current: JobStatus::Cancelled,
                ..
            } => {
                self.cancel.cancel();
                WorkerError::Cancelled(self.job_id)
            }
            other => WorkerError::Store(other),
        }
    }
}
