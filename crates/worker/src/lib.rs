//! Job workers for the ERP orchestration core.
//!
//! A [`JobService`] creates jobs, runs them on tokio tasks and handles
//! cancellation. Workers write through a [`JobContext`], which keeps the
//! job store and the progress bus in step.

pub mod bulk;
pub mod context;
pub mod error;
pub mod handler;
pub mod service;

pub use bulk::BulkCorrectionHandler;
pub use context::JobContext;
pub use error::WorkerError;
pub use handler::{JobHandler, RunSummary};
pub use service::{JobService, WorkerConfig};
