//! Topic names and stream message kinds for job lifecycle events.
//!
//! Topics are namespaced per job (`progress.<jobId>` etc.) so that a
//! subscriber only ever sees traffic for the job it asked about.

use crate::types::JobId;

/// First frame written on every live stream.
pub const MSG_TYPE_CONNECTED: &str = "connected";

/// Progress update while a job is pending or running.
pub const MSG_TYPE_PROGRESS: &str = "progress";

/// Job completed successfully.
pub const MSG_TYPE_COMPLETE: &str = "complete";

/// Job failed, or was cancelled.
pub const MSG_TYPE_ERROR: &str = "error";

/// Per-job signal kinds carried on the progress bus.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum JobTopic {
    Progress,
    Complete,
    Error,
    Cancel,
}

impl JobTopic {
    pub fn prefix(self) -> &'static str {
        match self {
            Self::Progress => "progress",
            Self::Complete => "complete",
            Self::Error => "error",
            Self::Cancel => "cancel",
        }
    }

    /// Fully-qualified topic name for one job, e.g. `progress.<uuid>`.
    pub fn for_job(self, job_id: JobId) -> String {
        format!("{}.{job_id}", self.prefix())
    }
}
