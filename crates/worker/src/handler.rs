//! Job handlers: the work a job kind performs once it is running.

use async_trait::async_trait;
use planbridge_db::models::job::ProgressUpdate;
use planbridge_erp::BulkOutcome;
use serde::Serialize;

use crate::context::JobContext;
use crate::error::WorkerError;

/// Item counters accumulated over a run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RunSummary {
    pub total: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub not_processed: usize,
}

impl RunSummary {
    pub fn new(total: usize) -> Self {
        Self {
            total,
            ..Default::default()
        }
    }

    pub fn absorb(&mut self, outcome: &BulkOutcome) {
        self.succeeded += outcome.success_count;
        self.failed += outcome.failure_count;
        self.not_processed += outcome.not_processed_count();
    }

    pub fn processed(&self) -> usize {
        self.succeeded + self.failed + self.not_processed
    }

    /// Every item was attempted and none succeeded.
    pub fn all_failed(&self) -> bool {
        self.total > 0 && self.succeeded == 0 && self.failed == self.total
    }

    pub fn percent(&self) -> i16 {
        if self.total == 0 {
            return 100;
        }
        ((self.processed().min(self.total) * 100) / self.total) as i16
    }

    pub fn to_update(&self, phase: Option<String>) -> ProgressUpdate {
        ProgressUpdate {
            succeeded_items: to_i32(self.succeeded),
            failed_items: to_i32(self.failed),
            progress_percent: self.percent(),
            current_phase: phase,
            total_items: None,
        }
    }
}

pub(crate) fn to_i32(n: usize) -> i32 {
    i32::try_from(n).unwrap_or(i32::MAX)
}

/// The work behind one job kind.
///
/// The service marks the job running with [`planned_items`] before
/// calling [`run`], and records the final status from its result.
///
/// [`planned_items`]: JobHandler::planned_items
/// [`run`]: JobHandler::run
#[async_trait]
pub trait JobHandler: Send + Sync {
    fn planned_items(&self) -> usize;

    async fn run(&self, ctx: &JobContext) -> Result<RunSummary, WorkerError>;
}
