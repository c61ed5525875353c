//! Job status lifecycle
//!
//! ```text
//! queued ──► processing ──► completed
//!   │            │  │
//!   │            │  └──► failed
//!   │            ▼
//!   │        cancelling ──► aborted | failed
//!   └──────────────────────► aborted
//! ```
//!
//! `processing` may also move straight to `aborted` when the abort flag is
//! observed at a section boundary.

use crate::error::JobError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Status of a pipeline job
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    /// Accepted, not started
    Queued,
    /// Sections being processed
    Processing,
    /// Abort requested while processing
    Cancelling,
    /// All sections processed
    Completed,
    /// Stopped by an error
    Failed,
    /// Stopped by cancellation
    Aborted,
}

impl JobStatus {
    /// Every status
    pub const ALL: [Self; 6] = [
        Self::Queued,
        Self::Processing,
        Self::Cancelling,
        Self::Completed,
        Self::Failed,
        Self::Aborted,
    ];

    /// Wire name
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Queued => "queued",
            Self::Processing => "processing",
            Self::Cancelling => "cancelling",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Aborted => "aborted",
        }
    }

    /// No further transitions
    #[inline]
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Aborted)
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|status| status.as_str() == s)
            .ok_or_else(|| format!("unknown job status '{s}'"))
    }
}

/// Statuses reachable from `from`
#[must_use]
pub fn allowed_transitions(from: JobStatus) -> &'static [JobStatus] {
    use JobStatus::{Aborted, Cancelling, Completed, Failed, Processing, Queued};
    match from {
        Queued => &[Processing, Aborted],
        Processing => &[Completed, Failed, Aborted, Cancelling],
        Cancelling => &[Aborted, Failed],
        Completed | Failed | Aborted => &[],
    }
}

/// Check a status change against the lifecycle table
///
/// # Errors
/// `IllegalTransition` when `to` is not reachable from `from`.
pub fn validate_transition(from: JobStatus, to: JobStatus) -> Result<(), JobError> {
    if allowed_transitions(from).contains(&to) {
        Ok(())
    } else {
        Err(JobError::IllegalTransition { from, to })
    }
}
