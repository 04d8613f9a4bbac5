//! Job entity model and DTOs for the job orchestration core.

use planbridge_core::job_kind::JobKind;
use planbridge_core::status::JobStatus;
use planbridge_core::types::{JobId, Timestamp};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// A row from the `jobs` table.
#[derive(Debug, Clone, PartialEq, FromRow, Serialize)]
pub struct Job {
    pub id: JobId,
    #[sqlx(try_from = "String")]
    pub kind: JobKind,
    pub environment: String,
    #[sqlx(rename = "status_id", try_from = "i16")]
    pub status: JobStatus,
    pub requested_by: String,
    /// Job parameters as submitted (e.g. the operation list of a
    /// bulk correction), kept for audit.
    pub parameters: serde_json::Value,
    pub total_items: i32,
    pub succeeded_items: i32,
    pub failed_items: i32,
    pub progress_percent: i16,
    pub current_phase: Option<String>,
    pub error_message: Option<String>,
    pub created_at: Timestamp,
    pub started_at: Option<Timestamp>,
    pub completed_at: Option<Timestamp>,
    pub updated_at: Timestamp,
}

/// DTO for creating a new pending job.
#[derive(Debug, Clone, Deserialize)]
pub struct CreateJob {
    pub kind: JobKind,
    pub environment: String,
    pub requested_by: String,
    #[serde(default)]
    pub parameters: serde_json::Value,
}

/// Counters written by the owning worker while a job runs, and once more
/// when it finishes.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct ProgressUpdate {
    pub succeeded_items: i32,
    pub failed_items: i32,
    /// Requested percentage. Clamped to 0-100; a value below the stored
    /// one leaves the stored percentage unchanged.
    pub progress_percent: i16,
    /// `None` keeps the current phase label.
    pub current_phase: Option<String>,
    /// `None` keeps the current total.
    pub total_items: Option<i32>,
}

impl ProgressUpdate {
    /// Percentage clamped into the 0-100 range.
    pub fn clamped_percent(&self) -> i16 {
        self.progress_percent.clamp(0, 100)
    }
}

/// Query parameters for an environment's job history.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct JobHistoryQuery {
    /// Filter by status label.
    pub status: Option<JobStatus>,
    /// Maximum number of results. Defaults to 50, capped at 100.
    pub limit: Option<i64>,
    /// Number of results to skip. Defaults to 0.
    pub offset: Option<i64>,
}

/// Maximum page size for job history.
pub const MAX_HISTORY_LIMIT: i64 = 100;

/// Default page size for job history.
pub const DEFAULT_HISTORY_LIMIT: i64 = 50;

impl JobHistoryQuery {
    pub fn limit(&self) -> i64 {
        self.limit
            .unwrap_or(DEFAULT_HISTORY_LIMIT)
            .clamp(1, MAX_HISTORY_LIMIT)
    }

    pub fn offset(&self) -> i64 {
        self.offset.unwrap_or(0).max(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn progress_percent_is_clamped() {
        let update = ProgressUpdate {
            progress_percent: 140,
            ..Default::default()
        };
        assert_eq!(update.clamped_percent(), 100);

        let update = ProgressUpdate {
            progress_percent: -3,
            ..Default::default()
        };
        assert_eq!(update.clamped_percent(), 0);
    }

    #[test]
    fn history_paging_defaults_and_caps() {
        let query = JobHistoryQuery::default();
        assert_eq!(query.limit(), DEFAULT_HISTORY_LIMIT);
        assert_eq!(query.offset(), 0);

        let query = JobHistoryQuery {
            limit: Some(5000),
            offset: Some(-10),
            ..Default::default()
        };
        assert_eq!(query.limit(), MAX_HISTORY_LIMIT);
        assert_eq!(query.offset(), 0);
    }

    #[test]
    fn create_job_parameters_default_to_null() {
        let input: CreateJob = serde_json::from_value(serde_json::json!({
            "kind": "snapshot-refresh",
            "environment": "prod",
            "requested_by": "planner",
        }))
        .unwrap();
        assert_eq!(input.kind, JobKind::SnapshotRefresh);
        assert!(input.parameters.is_null());
    }
}
