//! Wire format of the ERP bulk execution endpoint.
//!
//! One call carries every transaction for a single program:
//!
//! ```json
//! { "program": "PMS100MI",
//!   "transactions": [ { "transaction": "DltOrder", "record": { "MFNO": "7001" } } ] }
//! ```
//!
//! The response lists one result per transaction, in request order:
//!
//! ```json
//! { "nrOfSuccessfullTransactions": 1, "nrOfFailedTransactions": 0,
//!   "wasTerminated": false,
//!   "results": [ { "transaction": "DltOrder", "records": [] } ] }
//! ```
//!
//! A result with a non-empty `errorMessage` failed; `notProcessed: true`
//! means the remote side stopped before reaching it.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::outcome::{OperationRequest, Record, TransactionOutcome};

// ---------------------------------------------------------------------------
// Request
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BulkRequest {
    pub program: String,
    pub transactions: Vec<WireTransaction>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WireTransaction {
    pub transaction: String,
    pub record: IndexMap<String, String>,
}

impl BulkRequest {
    /// Build the payload for one program from requests that all target it.
    pub fn for_program<'a>(
        program: &str,
        requests: impl IntoIterator<Item = &'a OperationRequest>,
    ) -> Self {
        Self {
            program: program.to_string(),
            transactions: requests
                .into_iter()
                .map(|r| WireTransaction {
                    transaction: r.transaction_name.clone(),
                    record: r.parameters.clone(),
                })
                .collect(),
        }
    }
}

// ---------------------------------------------------------------------------
// Response
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BulkResponse {
    #[serde(default, alias = "nrOfSuccessfulTransactions")]
    pub nr_of_successfull_transactions: Option<u32>,
    #[serde(default)]
    pub nr_of_failed_transactions: Option<u32>,
    #[serde(default)]
    pub was_terminated: bool,
    #[serde(default)]
    pub termination_reason: Option<String>,
    #[serde(default)]
    pub results: Vec<WireResult>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WireResult {
    #[serde(default)]
    pub transaction: Option<String>,
    #[serde(default)]
    pub error_message: Option<String>,
    /// Some deployments send numeric codes.
    #[serde(default)]
    pub error_code: Option<serde_json::Value>,
    #[serde(default)]
    pub not_processed: bool,
    #[serde(default)]
    pub records: Vec<Record>,
}

impl WireResult {
    fn error_code(&self) -> String {
        match &self.error_code {
            Some(serde_json::Value::String(s)) => s.clone(),
            Some(serde_json::Value::Null) | None => String::new(),
            Some(other) => other.to_string(),
        }
    }

    pub fn into_outcome(self) -> TransactionOutcome {
        if self.not_processed {
            return TransactionOutcome::NotProcessed;
        }
        let code = self.error_code();
        match self.error_message {
            Some(message) if !message.trim().is_empty() => {
                TransactionOutcome::Failure { code, message }
            }
            // A code without a message is still a rejection.
            _ if !code.is_empty() => TransactionOutcome::Failure {
                code,
                message: String::new(),
            },
            _ => TransactionOutcome::Success {
                records: self.records,
            },
        }
    }
}

/// Decoded response of one call.
#[derive(Debug, Clone, PartialEq)]
pub struct DecodedCall {
    pub outcomes: Vec<TransactionOutcome>,
    pub was_terminated: bool,
}

/// Decode `response` for a call that sent `expected` transactions.
///
/// Missing trailing results are reported as not processed and mark the
/// call terminated. Surplus results are dropped.
pub fn decode_response(response: BulkResponse, expected: usize) -> DecodedCall {
    let received = response.results.len();
    let mut was_terminated = response.was_terminated;

    if received > expected {
        tracing::warn!(expected, received, "ERP returned more results than transactions sent");
    }

    let mut outcomes: Vec<TransactionOutcome> = response
        .results
        .into_iter()
        .take(expected)
        .map(WireResult::into_outcome)
        .collect();

    if received < expected {
        tracing::warn!(
            expected,
            received,
            reason = response.termination_reason.as_deref().unwrap_or(""),
            "ERP response is missing results, treating remainder as not processed",
        );
        outcomes.resize(expected, TransactionOutcome::NotProcessed);
        was_terminated = true;
    }

    if !was_terminated
        && outcomes
            .iter()
            .any(|o| matches!(o, TransactionOutcome::NotProcessed))
    {
        tracing::warn!(expected, "ERP skipped transactions without reporting termination");
        was_terminated = true;
    }

    DecodedCall {
        outcomes,
        was_terminated,
    }
}

/// Parse a raw response body.
pub fn parse_response(body: &str) -> Result<BulkResponse, serde_json::Error> {
    serde_json::from_str(body)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_serializes_in_submission_order() {
        let requests = [
            OperationRequest::new("PMS100MI", "DltOrder").with_param("MFNO", "1"),
            OperationRequest::new("PMS100MI", "DltOrder").with_param("MFNO", "2"),
        ];
        let body = serde_json::to_value(BulkRequest::for_program("PMS100MI", &requests)).unwrap();
        assert_eq!(body["program"], "PMS100MI");
        assert_eq!(body["transactions"][0]["transaction"], "DltOrder");
        assert_eq!(body["transactions"][1]["record"]["MFNO"], "2");
    }

    #[test]
    fn decodes_mixed_results() {
        let raw = r#"{
            "nrOfSuccessfullTransactions": 1,
            "nrOfFailedTransactions": 1,
            "wasTerminated": false,
            "results": [
                { "transaction": "DltOrder", "records": [ { "MFNO": "7001" } ] },
                { "transaction": "DltOrder", "errorMessage": "Order 7002 is locked", "errorCode": "WLO0101" }
            ]
        }"#;
        let decoded = decode_response(parse_response(raw).unwrap(), 2);

        assert!(!decoded.was_terminated);
        assert_eq!(decoded.outcomes.len(), 2);
        match &decoded.outcomes[0] {
            TransactionOutcome::Success { records } => assert_eq!(records[0]["MFNO"], "7001"),
            other => panic!("expected success, got {other:?}"),
        }
        assert_eq!(
            decoded.outcomes[1],
            TransactionOutcome::Failure {
                code: "WLO0101".into(),
                message: "Order 7002 is locked".into(),
            }
        );
    }

    #[test]
    fn numeric_error_code_is_stringified() {
        let raw = r#"{ "results": [ { "errorMessage": "bad", "errorCode": 42 } ] }"#;
        let decoded = decode_response(parse_response(raw).unwrap(), 1);
        assert_eq!(
            decoded.outcomes[0],
            TransactionOutcome::Failure {
                code: "42".into(),
                message: "bad".into(),
            }
        );
    }

    #[test]
    fn terminated_response_reports_not_processed() {
        let raw = r#"{
            "wasTerminated": true,
            "terminationReason": "Too many errors",
            "results": [
                { "errorMessage": "locked" },
                { "notProcessed": true }
            ]
        }"#;
        let decoded = decode_response(parse_response(raw).unwrap(), 3);

        assert!(decoded.was_terminated);
        assert_eq!(decoded.outcomes.len(), 3);
        assert_eq!(decoded.outcomes[1], TransactionOutcome::NotProcessed);
        assert_eq!(decoded.outcomes[2], TransactionOutcome::NotProcessed);
    }

    #[test]
    fn not_processed_item_marks_call_terminated() {
        let raw = r#"{
            "results": [
                {},
                { "errorMessage": "locked" },
                { "notProcessed": true }
            ]
        }"#;
        let decoded = decode_response(parse_response(raw).unwrap(), 3);

        assert!(decoded.was_terminated);
        assert_eq!(decoded.outcomes[2], TransactionOutcome::NotProcessed);
    }

    #[test]
    fn short_response_marks_call_terminated() {
        let raw = r#"{ "results": [ {} ] }"#;
        let decoded = decode_response(parse_response(raw).unwrap(), 2);
        assert!(decoded.was_terminated);
        assert_eq!(decoded.outcomes[1], TransactionOutcome::NotProcessed);
    }

    #[test]
    fn surplus_results_are_dropped() {
        let raw = r#"{ "results": [ {}, {}, {} ] }"#;
        let decoded = decode_response(parse_response(raw).unwrap(), 2);
        assert_eq!(decoded.outcomes.len(), 2);
        assert!(!decoded.was_terminated);
    }

    #[test]
    fn code_without_message_is_failure() {
        let result = WireResult {
            error_code: Some(serde_json::json!("E1")),
            ..Default::default()
        };
        assert!(matches!(result.into_outcome(), TransactionOutcome::Failure { .. }));
    }
}
