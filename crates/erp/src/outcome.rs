//! Operation requests and their typed outcomes.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

/// One record returned by a remote transaction: field name to value.
pub type Record = IndexMap<String, String>;

/// One corrective call destined for the ERP (delete/close/reschedule an
/// order, ...). Requests for the same `target_program` travel together.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OperationRequest {
    pub target_program: String,
    pub transaction_name: String,
    /// Input fields, sent in submission order.
    #[serde(default)]
    pub parameters: IndexMap<String, String>,
}

impl OperationRequest {
    pub fn new(target_program: impl Into<String>, transaction_name: impl Into<String>) -> Self {
        Self {
            target_program: target_program.into(),
            transaction_name: transaction_name.into(),
            parameters: IndexMap::new(),
        }
    }

    pub fn with_param(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.parameters.insert(key.into(), value.into());
        self
    }
}

/// What the remote side did with one transaction, decoded from the wire.
#[derive(Debug, Clone, PartialEq)]
pub enum TransactionOutcome {
    Success { records: Vec<Record> },
    Failure { code: String, message: String },
    /// The remote side stopped before reaching this transaction.
    NotProcessed,
}

/// Error code used when a call never produced a response.
pub const NETWORK_ERROR_CODE: &str = "NETWORK_ERROR";

/// Error code used when a response arrived but could not be decoded.
pub const INVALID_RESPONSE_CODE: &str = "INVALID_RESPONSE";

/// Error code used when no admission permit could be obtained.
pub const ADMISSION_ERROR_CODE: &str = "ADMISSION_ERROR";

/// Flattened outcome of one [`OperationRequest`].
///
/// `succeeded == !not_processed && error_message.is_empty()` always holds;
/// the constructors are the only way results are built.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchResult {
    pub succeeded: bool,
    pub error_code: String,
    pub error_message: String,
    pub not_processed: bool,
    pub returned_records: Vec<Record>,
}

impl BatchResult {
    pub fn success(records: Vec<Record>) -> Self {
        Self {
            succeeded: true,
            error_code: String::new(),
            error_message: String::new(),
            not_processed: false,
            returned_records: records,
        }
    }

    /// A rejected transaction. An empty message is replaced so the
    /// result can never read as a success.
    pub fn failure(code: impl Into<String>, message: impl Into<String>) -> Self {
        let code = code.into();
        let mut message = message.into();
        if message.trim().is_empty() {
            message = if code.is_empty() {
                "Transaction failed".to_string()
            } else {
                format!("Transaction failed with code {code}")
            };
        }
        Self {
            succeeded: false,
            error_code: code,
            error_message: message,
            not_processed: false,
            returned_records: Vec::new(),
        }
    }

    pub fn not_processed() -> Self {
        Self {
            succeeded: false,
            error_code: String::new(),
            error_message: String::new(),
            not_processed: true,
            returned_records: Vec::new(),
        }
    }
}

impl From<TransactionOutcome> for BatchResult {
    fn from(outcome: TransactionOutcome) -> Self {
        match outcome {
            TransactionOutcome::Success { records } => Self::success(records),
            TransactionOutcome::Failure { code, message } => Self::failure(code, message),
            TransactionOutcome::NotProcessed => Self::not_processed(),
        }
    }
}

/// Aggregate of one or more grouped calls.
///
/// `success_count + failure_count == results.len()` unless
/// `was_terminated_early`, in which case the unreached items are
/// `not_processed` and counted in neither.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BulkOutcome {
    pub results: Vec<BatchResult>,
    pub success_count: usize,
    pub failure_count: usize,
    pub was_terminated_early: bool,
}

impl BulkOutcome {
    /// Count `results` of a single call.
    ///
    /// Not-processed items count as neither success nor failure, and any
    /// of them marks the call as terminated early.
    pub fn from_results(results: Vec<BatchResult>, was_terminated_early: bool) -> Self {
        let success_count = results.iter().filter(|r| r.succeeded).count();
        let failure_count = results
            .iter()
            .filter(|r| !r.succeeded && !r.not_processed)
            .count();
        let was_terminated_early = was_terminated_early || results.iter().any(|r| r.not_processed);
        Self {
            results,
            success_count,
            failure_count,
            was_terminated_early,
        }
    }

    /// Append another call's outcome, summing its counters.
    pub fn absorb(&mut self, other: BulkOutcome) {
        self.results.extend(other.results);
        self.success_count += other.success_count;
        self.failure_count += other.failure_count;
        self.was_terminated_early |= other.was_terminated_early;
    }

    /// Items that were never attempted because processing stopped early.
    pub fn not_processed_count(&self) -> usize {
        self.results.len() - self.success_count - self.failure_count
    }

    /// Items the remote side finished with, either way.
    pub fn completed_count(&self) -> usize {
        self.success_count + self.failure_count
    }
}
