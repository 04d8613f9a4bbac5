//! Bulk correction: push a list of operation requests to the ERP in
//! batches, reporting progress after each one.

use std::sync::Arc;

use async_trait::async_trait;
use planbridge_erp::{BatchExecutor, BulkError, OperationRequest};

use crate::context::JobContext;
use crate::error::WorkerError;
use crate::handler::{JobHandler, RunSummary};

/// Default number of operation requests per progress step.
pub const DEFAULT_CHUNK_SIZE: usize = 50;

pub struct BulkCorrectionHandler {
    executor: Arc<BatchExecutor>,
    requests: Vec<OperationRequest>,
    chunk_size: usize,
}

impl BulkCorrectionHandler {
    pub fn new(
        executor: Arc<BatchExecutor>,
        requests: Vec<OperationRequest>,
        chunk_size: usize,
    ) -> Self {
        Self {
            executor,
            requests,
            chunk_size: chunk_size.max(1),
        }
    }

    /// Reject requests the ERP could never route.
    pub fn validate(requests: &[OperationRequest]) -> Result<(), WorkerError> {
        if requests.is_empty() {
            return Err(WorkerError::InvalidRequest(
                "A bulk correction needs at least one operation".into(),
            ));
        }
        if let Some((index, _)) = requests.iter().enumerate().find(|(_, r)| {
            r.target_program.trim().is_empty() || r.transaction_name.trim().is_empty()
        }) {
            return Err(WorkerError::InvalidRequest(format!(
                "Operation {index} is missing its target program or transaction name"
            )));
        }
        Ok(())
    }
}

#[async_trait]
impl JobHandler for BulkCorrectionHandler {
    fn planned_items(&self) -> usize {
        self.requests.len()
    }

    async fn run(&self, ctx: &JobContext) -> Result<RunSummary, WorkerError> {
        let mut summary = RunSummary::new(self.requests.len());
        let batches = self.requests.len().div_ceil(self.chunk_size);

        for (index, batch) in self.requests.chunks(self.chunk_size).enumerate() {
            if ctx.is_cancelled() {
                return Err(WorkerError::Cancelled(ctx.job_id()));
            }

            let outcome = self
                .executor
                .execute_grouped(ctx.environment(), batch, ctx.cancel_token())
                .await;
            summary.absorb(&outcome.combined);

            match &outcome.error {
                Some(BulkError::Cancelled { .. }) => {
                    return Err(WorkerError::Cancelled(ctx.job_id()));
                }
                Some(err) => {
                    tracing::warn!(
                        job_id = %ctx.job_id(),
                        batch = index + 1,
                        error = %err,
                        "Batch finished with failures",
                    );
                }
                None => {}
            }

            let phase = format!("Correcting batch {}/{}", index + 1, batches);
            ctx.report_progress(&summary.to_update(Some(phase))).await?;
        }

        Ok(summary)
    }
}
