//! Grouped execution of operation requests against one environment.
//!
//! Requests are partitioned by target program (first-appearance order),
//! each partition is split into calls of at most
//! `max_transactions_per_call`, and every call waits for an admission
//! permit first. Each call is attempted exactly once.

use std::sync::Arc;

use indexmap::IndexMap;
use planbridge_core::admission::{AdmissionController, AdmissionError};
use serde::Serialize;
use tokio_util::sync::CancellationToken;

use crate::outcome::{
    BatchResult, BulkOutcome, OperationRequest, ADMISSION_ERROR_CODE, INVALID_RESPONSE_CODE,
    NETWORK_ERROR_CODE,
};
use crate::transport::{BatchTransport, TransportError};
use crate::wire::{decode_response, BulkRequest};

/// Default upper bound on transactions per outbound call.
pub const DEFAULT_MAX_TRANSACTIONS_PER_CALL: usize = 100;

#[derive(Debug, Clone, Copy)]
pub struct ExecutorConfig {
    pub max_transactions_per_call: usize,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            max_transactions_per_call: DEFAULT_MAX_TRANSACTIONS_PER_CALL,
        }
    }
}

// ---------------------------------------------------------------------------
// Outcome types
// ---------------------------------------------------------------------------

/// A call that produced no per-transaction results.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CallFailure {
    pub target_program: String,
    /// Transactions carried by the failed call.
    pub transactions: usize,
    pub code: String,
    pub message: String,
    /// HTTP status when the ERP answered with a non-success code.
    pub status: Option<u16>,
}

/// Structured error accompanying a best-effort [`BulkOutcome`].
#[derive(Debug, Clone, PartialEq, Serialize, thiserror::Error)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum BulkError {
    /// Some operations failed or were not reached. Successful partitions
    /// are still reported in the outcome.
    #[error(
        "Bulk execution partially failed: {succeeded} succeeded, {failed} failed, \
         {not_processed} not processed of {total}"
    )]
    PartialFailure {
        total: usize,
        succeeded: usize,
        failed: usize,
        not_processed: usize,
        /// Programs with at least one failed or unreached operation.
        failed_programs: Vec<String>,
        /// Calls that never produced per-transaction results.
        failed_calls: Vec<CallFailure>,
    },

    /// Cancellation fired while waiting for admission.
    #[error("Bulk execution cancelled after {completed} of {total} operations")]
    Cancelled { completed: usize, total: usize },
}

/// Outcome of one target program's partition.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProgramOutcome {
    pub target_program: String,
    pub outcome: BulkOutcome,
}

#[derive(Debug, Clone, PartialEq)]
pub struct GroupedOutcome {
    pub programs: Vec<ProgramOutcome>,
    /// Results in the caller's request order; counts summed over programs.
    pub combined: BulkOutcome,
    pub error: Option<BulkError>,
}

impl GroupedOutcome {
    pub fn is_complete_success(&self) -> bool {
        self.error.is_none()
    }

    pub fn program(&self, target_program: &str) -> Option<&ProgramOutcome> {
        self.programs
            .iter()
            .find(|p| p.target_program == target_program)
    }
}

// ---------------------------------------------------------------------------
// BatchExecutor
// ---------------------------------------------------------------------------

pub struct BatchExecutor {
    transport: Arc<dyn BatchTransport>,
    admission: Arc<AdmissionController>,
    config: ExecutorConfig,
}

impl BatchExecutor {
    pub fn new(
        transport: Arc<dyn BatchTransport>,
        admission: Arc<AdmissionController>,
        config: ExecutorConfig,
    ) -> Self {
        Self {
            transport,
            admission,
            config,
        }
    }

    pub fn config(&self) -> ExecutorConfig {
        self.config
    }

    /// Execute `requests` against `environment`, one grouped call per
    /// program chunk.
    ///
    /// Never fails outright: every request gets a result, and anything
    /// short of complete success is described by `error`.
    pub async fn execute_grouped(
        &self,
        environment: &str,
        requests: &[OperationRequest],
        cancel: &CancellationToken,
    ) -> GroupedOutcome {
        let total = requests.len();
        let chunk_size = self.config.max_transactions_per_call.max(1);

        let mut partitions: IndexMap<&str, Vec<usize>> = IndexMap::new();
        for (index, request) in requests.iter().enumerate() {
            partitions
                .entry(request.target_program.as_str())
                .or_default()
                .push(index);
        }

        let mut slots: Vec<Option<BatchResult>> = vec![None; total];
        let mut programs = Vec::with_capacity(partitions.len());
        let mut failed_calls = Vec::new();
        let mut cancelled = false;

        for (program, indices) in partitions {
            let mut outcome = BulkOutcome::default();

            for chunk in indices.chunks(chunk_size) {
                let call = if cancelled {
                    unreached(chunk.len())
                } else {
                    match self.admission.acquire(environment, cancel).await {
                        Ok(()) => {
                            let batch = chunk.iter().map(|&i| &requests[i]);
                            let (call, failure) = self
                                .call(environment, program, BulkRequest::for_program(program, batch))
                                .await;
                            failed_calls.extend(failure);
                            call
                        }
                        Err(AdmissionError::Cancelled { .. }) => {
                            tracing::info!(
                                environment,
                                program,
                                "Bulk execution cancelled while waiting for admission",
                            );
                            cancelled = true;
                            unreached(chunk.len())
                        }
                        Err(e @ AdmissionError::Budget { .. }) => {
                            tracing::error!(environment, program, error = %e, "Admission failed");
                            let message = e.to_string();
                            failed_calls.push(CallFailure {
                                target_program: program.to_string(),
                                transactions: chunk.len(),
                                code: ADMISSION_ERROR_CODE.to_string(),
                                message: message.clone(),
                                status: None,
                            });
                            failed_chunk(chunk.len(), ADMISSION_ERROR_CODE, &message)
                        }
                    }
                };

                for (&index, result) in chunk.iter().zip(&call.results) {
                    slots[index] = Some(result.clone());
                }
                outcome.absorb(call);
            }

            programs.push(ProgramOutcome {
                target_program: program.to_string(),
                outcome,
            });
        }

        let combined = BulkOutcome {
            results: slots
                .into_iter()
                .map(|slot| slot.unwrap_or_else(BatchResult::not_processed))
                .collect(),
            success_count: programs.iter().map(|p| p.outcome.success_count).sum(),
            failure_count: programs.iter().map(|p| p.outcome.failure_count).sum(),
            was_terminated_early: programs.iter().any(|p| p.outcome.was_terminated_early),
        };

        let error = if cancelled {
            Some(BulkError::Cancelled {
                completed: combined.completed_count(),
                total,
            })
        } else if combined.success_count < total {
            Some(BulkError::PartialFailure {
                total,
                succeeded: combined.success_count,
                failed: combined.failure_count,
                not_processed: combined.not_processed_count(),
                failed_programs: programs
                    .iter()
                    .filter(|p| p.outcome.success_count < p.outcome.results.len())
                    .map(|p| p.target_program.clone())
                    .collect(),
                failed_calls,
            })
        } else {
            None
        };

        tracing::info!(
            environment,
            total,
            succeeded = combined.success_count,
            failed = combined.failure_count,
            terminated = combined.was_terminated_early,
            "Bulk execution finished",
        );

        GroupedOutcome {
            programs,
            combined,
            error,
        }
    }

    /// One outbound call. Transport errors become per-item failures.
    async fn call(
        &self,
        environment: &str,
        program: &str,
        request: BulkRequest,
    ) -> (BulkOutcome, Option<CallFailure>) {
        let expected = request.transactions.len();

        match self.transport.execute(environment, &request).await {
            Ok(response) => {
                let decoded = decode_response(response, expected);
                let results = decoded.outcomes.into_iter().map(BatchResult::from).collect();
                let outcome = BulkOutcome::from_results(results, decoded.was_terminated);
                if outcome.was_terminated_early {
                    tracing::warn!(
                        environment,
                        program,
                        not_processed = outcome.not_processed_count(),
                        "ERP terminated the call early",
                    );
                }
                (outcome, None)
            }
            Err(e) => {
                let (code, status) = failure_code(&e);
                tracing::warn!(
                    environment,
                    program,
                    transactions = expected,
                    code = %code,
                    error = %e,
                    "ERP call failed",
                );
                let message = e.to_string();
                let failure = CallFailure {
                    target_program: program.to_string(),
                    transactions: expected,
                    code: code.clone(),
                    message: message.clone(),
                    status,
                };
                (failed_chunk(expected, &code, &message), Some(failure))
            }
        }
    }
}

fn failure_code(error: &TransportError) -> (String, Option<u16>) {
    match error {
        TransportError::Status { status, .. } => (format!("HTTP_{status}"), Some(*status)),
        TransportError::Decode(_) => (INVALID_RESPONSE_CODE.to_string(), None),
        TransportError::Network(_)
        | TransportError::UnknownEnvironment(_)
        | TransportError::Credentials(_) => (NETWORK_ERROR_CODE.to_string(), None),
    }
}

fn failed_chunk(len: usize, code: &str, message: &str) -> BulkOutcome {
    BulkOutcome::from_results(
        (0..len).map(|_| BatchResult::failure(code, message)).collect(),
        false,
    )
}

fn unreached(len: usize) -> BulkOutcome {
    BulkOutcome::from_results((0..len).map(|_| BatchResult::not_processed()).collect(), true)
}
