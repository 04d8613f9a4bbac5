//! Kinds of long-running work tracked as jobs.

use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::CoreError;

/// What a job does. Stored as its kebab-case label in `jobs.kind`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum JobKind {
    /// Pull a fresh copy of planning data from the ERP.
    SnapshotRefresh,
    /// Push corrective transactions (delete/close/reschedule) to the ERP.
    BulkCorrection,
    /// Scan the latest snapshot for issues.
    DetectionRun,
}

impl JobKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::SnapshotRefresh => "snapshot-refresh",
            Self::BulkCorrection => "bulk-correction",
            Self::DetectionRun => "detection-run",
        }
    }
}

impl std::fmt::Display for JobKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobKind {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "snapshot-refresh" => Ok(Self::SnapshotRefresh),
            "bulk-correction" => Ok(Self::BulkCorrection),
            "detection-run" => Ok(Self::DetectionRun),
            other => Err(CoreError::Validation(format!("Unknown job kind '{other}'"))),
        }
    }
}

impl TryFrom<String> for JobKind {
    type Error = CoreError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}
