//! Shared domain types for the PlanBridge job orchestration core.
//!
//! - [`status`]: job status lookup enum and transition rules.
//! - [`job_kind`]: kinds of long-running work.
//! - [`job_events`]: progress bus topics and stream message kinds.
//! - [`admission`]: per-environment rate limiting for ERP calls.

pub mod admission;
pub mod error;
pub mod job_events;
pub mod job_kind;
pub mod status;
pub mod types;
