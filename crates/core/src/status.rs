//! Job status lookup enum and the job state machine.
//!
//! The discriminants match the seed order (1-based) of the
//! `job_statuses` lookup table in `db/migrations`.

use serde::{Deserialize, Serialize};

/// Status ID type matching SMALLINT in the database.
pub type StatusId = i16;

macro_rules! define_status_enum {
    (
        $(#[$meta:meta])*
        $name:ident {
            $( $(#[$vmeta:meta])* $variant:ident = $val:literal => $label:literal ),+ $(,)?
        }
    ) => {
        $(#[$meta])*
        #[repr(i16)]
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
        #[serde(rename_all = "snake_case")]
        pub enum $name {
            $( $(#[$vmeta])* $variant = $val ),+
        }

        impl $name {
            /// Return the database status ID.
            pub fn id(self) -> StatusId {
                self as StatusId
            }

            /// Resolve a database status ID, `None` for unknown IDs.
            pub fn from_id(id: StatusId) -> Option<Self> {
                match id {
                    $( $val => Some(Self::$variant), )+
                    _ => None,
                }
            }

            /// Lower-case label, identical to the serde representation.
            pub fn as_str(self) -> &'static str {
                match self {
                    $( Self::$variant => $label, )+
                }
            }
        }

        impl TryFrom<StatusId> for $name {
            type Error = crate::error::CoreError;

            fn try_from(id: StatusId) -> Result<Self, Self::Error> {
                Self::from_id(id).ok_or_else(|| {
                    crate::error::CoreError::Internal(format!(
                        "Unknown {} id {id}",
                        stringify!($name)
                    ))
                })
            }
        }

        impl From<$name> for StatusId {
            fn from(value: $name) -> Self {
                value as StatusId
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str(self.as_str())
            }
        }
    };
}

define_status_enum! {
    /// Background job execution status.
    JobStatus {
        Pending = 1 => "pending",
        Running = 2 => "running",
        Completed = 3 => "completed",
        Failed = 4 => "failed",
        Cancelled = 5 => "cancelled",
    }
}

/// Who is asking for a status transition.
///
/// The worker owns the happy path; the cancellation path may interrupt
/// any non-terminal job regardless of what the worker is doing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransitionActor {
    Worker,
    Cancellation,
}

/// Statuses in which a job still counts as active for its environment.
pub const ACTIVE_STATUSES: [JobStatus; 2] = [JobStatus::Pending, JobStatus::Running];

/// Terminal statuses: completed, failed, cancelled.
pub const TERMINAL_STATUSES: [JobStatus; 3] = [
    JobStatus::Completed,
    JobStatus::Failed,
    JobStatus::Cancelled,
];

impl JobStatus {
    /// Whether no further transition may leave this status.
    pub fn is_terminal(self) -> bool {
        TERMINAL_STATUSES.contains(&self)
    }

    /// Whether the job is pending or running.
    pub fn is_active(self) -> bool {
        ACTIVE_STATUSES.contains(&self)
    }

    /// Whether a cancellation request is accepted in this status.
    pub fn is_cancellable(self) -> bool {
        self.is_active()
    }

    /// Source statuses from which `actor` may move a job into `target`.
    ///
    /// An empty slice means the actor may never perform that transition.
    pub fn allowed_sources(target: JobStatus, actor: TransitionActor) -> &'static [JobStatus] {
        match (actor, target) {
            (TransitionActor::Worker, JobStatus::Running) => &[JobStatus::Pending],
            (TransitionActor::Worker, JobStatus::Completed | JobStatus::Failed) => {
                &[JobStatus::Running]
            }
            (TransitionActor::Cancellation, JobStatus::Cancelled) => &ACTIVE_STATUSES,
            _ => &[],
        }
    }

    /// Whether `actor` may move a job from `self` to `target`.
    pub fn can_transition_to(self, target: JobStatus, actor: TransitionActor) -> bool {
        Self::allowed_sources(target, actor).contains(&self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn job_status_ids_match_seed_data() {
        assert_eq!(JobStatus::Pending.id(), 1);
        assert_eq!(JobStatus::Running.id(), 2);
        assert_eq!(JobStatus::Completed.id(), 3);
        assert_eq!(JobStatus::Failed.id(), 4);
        assert_eq!(JobStatus::Cancelled.id(), 5);
    }

    #[test]
    fn from_id_round_trips_and_rejects_unknown() {
        for status in [
            JobStatus::Pending,
            JobStatus::Running,
            JobStatus::Completed,
            JobStatus::Failed,
            JobStatus::Cancelled,
        ] {
            assert_eq!(JobStatus::from_id(status.id()), Some(status));
        }
        assert_eq!(JobStatus::from_id(0), None);
        assert_eq!(JobStatus::from_id(6), None);
    }

    #[test]
    fn serde_label_matches_as_str() {
        let json = serde_json::to_string(&JobStatus::Cancelled).unwrap();
        assert_eq!(json, "\"cancelled\"");
        assert_eq!(JobStatus::Running.to_string(), "running");
    }

    #[test]
    fn worker_follows_happy_path_only() {
        use TransitionActor::Worker;
        assert!(JobStatus::Pending.can_transition_to(JobStatus::Running, Worker));
        assert!(JobStatus::Running.can_transition_to(JobStatus::Completed, Worker));
        assert!(JobStatus::Running.can_transition_to(JobStatus::Failed, Worker));

        assert!(!JobStatus::Running.can_transition_to(JobStatus::Running, Worker));
        assert!(!JobStatus::Pending.can_transition_to(JobStatus::Completed, Worker));
        assert!(!JobStatus::Running.can_transition_to(JobStatus::Cancelled, Worker));
    }

    #[test]
    fn cancellation_only_from_active_states() {
        use TransitionActor::Cancellation;
        assert!(JobStatus::Pending.can_transition_to(JobStatus::Cancelled, Cancellation));
        assert!(JobStatus::Running.can_transition_to(JobStatus::Cancelled, Cancellation));
        assert!(!JobStatus::Completed.can_transition_to(JobStatus::Cancelled, Cancellation));
        assert!(!JobStatus::Cancelled.can_transition_to(JobStatus::Cancelled, Cancellation));
        assert!(!JobStatus::Pending.can_transition_to(JobStatus::Running, Cancellation));
    }

    #[test]
    fn terminal_states_have_no_exits() {
        for from in TERMINAL_STATUSES {
            for to in [
                JobStatus::Pending,
                JobStatus::Running,
                JobStatus::Completed,
                JobStatus::Failed,
                JobStatus::Cancelled,
            ] {
                assert!(!from.can_transition_to(to, TransitionActor::Worker));
                assert!(!from.can_transition_to(to, TransitionActor::Cancellation));
            }
        }
    }
}
