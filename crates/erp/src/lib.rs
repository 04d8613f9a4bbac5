//! Client side of the ERP bulk execution API.
//!
//! Provides:
//! - [`outcome`] -- operation requests and per-transaction results.
//! - [`wire`] -- request/response payloads of the bulk endpoint.
//! - [`transport`] -- the [`BatchTransport`](transport::BatchTransport)
//!   seam and its reqwest implementation.
//! - [`executor`] -- grouped, admission-controlled execution.

pub mod executor;
pub mod outcome;
pub mod transport;
pub mod wire;

pub use executor::{BatchExecutor, BulkError, ExecutorConfig, GroupedOutcome, ProgramOutcome};
pub use outcome::{BatchResult, BulkOutcome, OperationRequest, TransactionOutcome};
pub use transport::{BatchTransport, HttpBatchTransport, StaticBearerToken, TransportError};
