//! Plansmith Jobs - asynchronous pipeline jobs
//!
//! Runs a resolved pipeline over ordered sections as a background job:
//! - Submission validated before any record exists
//! - One orchestrator task per job, sections strictly in order
//! - Cooperative cancellation at section boundaries
//! - Job state in an expiring key-value store
//! - Finished documents committed as numbered versions
//!
//! # Example
//!
//! ```rust,ignore
//! use plansmith_jobs::prelude::*;
//!
//! # async fn example(service: PipelineService, sections: Vec<plansmith_core::SectionInput>) -> Result<(), Box<dyn std::error::Error>> {
//! let job = service
//!     .submit(JobSubmission::new("standard", sections).with_output(OutputTarget::plan("alpha")))
//!     .await?;
//! let snapshot = service.wait(job).await?;
//! println!("{} -> {}", job, snapshot.status);
//! # Ok(())
//! # }
//! ```

#![warn(unreachable_pub)]

pub mod error;
pub mod lifecycle;
pub mod orchestrator;
pub mod service;
pub mod store;
pub mod types;
pub mod versioning;

pub use error::{JobError, StoreError, SubmitError, VersionError};
pub use lifecycle::{allowed_transitions, validate_transition, JobStatus};
pub use orchestrator::{JobOrchestrator, JobRun};
pub use service::PipelineService;
pub use store::{JobMetadata, JobStateClient, KeyValueStore, MemoryStore};
pub use types::{
    CancelAck, JobId, JobResult, JobSnapshot, JobSubmission, OutputTarget, ResultAccumulator,
};
pub use versioning::{
    EntityKind, MemoryVersionRepository, NewVersion, VersionRecord, VersionRepository,
};

/// Prelude module for common imports
pub mod prelude {
    //! Common imports for working with Plansmith Jobs
    pub use crate::{
        EntityKind, JobId, JobSnapshot, JobStatus, JobSubmission, MemoryStore,
        MemoryVersionRepository, OutputTarget, PipelineService,
    };
}

/// Version of this crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
