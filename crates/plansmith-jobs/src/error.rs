//! Error types for job orchestration

use crate::lifecycle::JobStatus;
use crate::types::JobId;
use plansmith_core::ConfigurationError;
use thiserror::Error;

/// Job state store failures
#[derive(Debug, Error)]
pub enum StoreError {
    /// Backend unreachable or rejected the operation
    #[error("state store unavailable: {0}")]
    Unavailable(String),

    /// Stored record cannot be interpreted
    #[error("corrupt record at {key}: {reason}")]
    Corrupt {
        /// Store key
        key: String,
        /// What was wrong
        reason: String,
    },

    /// Payload (de)serialization failed
    #[error("payload serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Versioned output repository failures
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum VersionError {
    /// Based-on reference names a version that was never committed
    #[error("{entity} has no version {version} to base on")]
    BasedOnMissing {
        /// Entity key
        entity: String,
        /// Missing version
        version: u32,
    },

    /// Backend failure
    #[error("version repository unavailable: {0}")]
    Unavailable(String),
}

/// Errors raised while running or addressing a job
#[derive(Debug, Error)]
pub enum JobError {
    /// No record for this job id (never submitted, or expired)
    #[error("job {0} not found")]
    NotFound(JobId),

    /// Status change outside the lifecycle table
    #[error("illegal job transition {from} -> {to}")]
    IllegalTransition {
        /// Current status
        from: JobStatus,
        /// Requested status
        to: JobStatus,
    },

    /// A section failed and the policy stops the job
    #[error("section {section} failed: {reason}")]
    SectionFailed {
        /// Failing section id
        section: String,
        /// Section failure message
        reason: String,
    },

    /// State store failure
    #[error(transparent)]
    Store(#[from] StoreError),

    /// Commit to the output repository failed
    #[error(transparent)]
    Version(#[from] VersionError),
}

/// Submission rejected before any job record exists
#[derive(Debug, Error)]
pub enum SubmitError {
    /// Pipeline missing, or references missing/inactive agents
    #[error(transparent)]
    Configuration(#[from] ConfigurationError),

    /// Malformed submission
    #[error("invalid submission: {0}")]
    InvalidSubmission(String),

    /// Creating the job record failed
    #[error(transparent)]
    Store(#[from] StoreError),
}
