//! Settlement Job States
//!
//! ```text
//! PENDING ──▶ RUNNING ──▶ COMPLETED
//!    ▲           │  ╰───▶ FAILED
//!    ╰───────────┤
//!                ╰──▶ RUNNING (still pending remotely)
//! ```

use serde::Serialize;
use std::fmt;

/// Settlement job status
///
/// Terminal states: COMPLETED, FAILED
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobStatus {
    /// Not yet attempted, or ready to retry after a retryable failure
    Pending,

    /// Attempt in flight, or submitted and awaiting remote confirmation
    Running,

    /// Terminal: external system reported the operation settled
    Completed,

    /// Terminal: fatal failure, detail recorded on the job
    Failed,
}

impl JobStatus {
    pub const ALL: [JobStatus; 4] = [
        JobStatus::Pending,
        JobStatus::Running,
        JobStatus::Completed,
        JobStatus::Failed,
    ];

    #[inline]
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed)
    }

    /// Whether `self → next` is a legal edge of the job state machine
    pub fn can_transition_to(&self, next: JobStatus) -> bool {
        match self {
            JobStatus::Pending => next == JobStatus::Running,
            JobStatus::Running => true,
            JobStatus::Completed | JobStatus::Failed => false,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Pending => "PENDING",
            JobStatus::Running => "RUNNING",
            JobStatus::Completed => "COMPLETED",
            JobStatus::Failed => "FAILED",
        }
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}
