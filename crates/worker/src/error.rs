use planbridge_core::types::JobId;
use planbridge_db::StoreError;

#[derive(Debug, thiserror::Error)]
pub enum WorkerError {
    #[error(transparent)]
    Store(#[from] StoreError),

    /// The job was cancelled while the worker held it.
    #[error("Job {0} was cancelled")]
    Cancelled(JobId),

    #[error("Invalid job request: {0}")]
    InvalidRequest(String),

    /// The work itself could not be carried out.
    #[error("{0}")]
    Execution(String),
}
