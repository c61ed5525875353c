//! Submit / poll / cancel surface
//!
//! Validates submissions against the definition registry, creates the job
//! record, and spawns one orchestrator task per job.

use crate::error::{JobError, SubmitError};
use crate::lifecycle::JobStatus;
use crate::orchestrator::{JobOrchestrator, JobRun};
use crate::store::{JobMetadata, JobStateClient, KeyValueStore};
use crate::types::{CancelAck, JobId, JobSnapshot, JobSubmission};
use crate::versioning::VersionRepository;
use dashmap::DashMap;
use parking_lot::RwLock;
use plansmith_core::{
    AgentInvoker, DefinitionRegistry, EngineConfig, ModelClient, SectionPipelineController,
    StageExecutor,
};
use std::sync::Arc;
use tokio::task::JoinHandle;

/// Job service over a shared definition registry
#[derive(Clone)]
pub struct PipelineService {
    registry: Arc<RwLock<DefinitionRegistry>>,
    orchestrator: JobOrchestrator,
    handles: Arc<DashMap<JobId, JoinHandle<()>>>,
}

impl std::fmt::Debug for PipelineService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PipelineService")
            .field("orchestrator", &self.orchestrator)
            .field("running", &self.handles.len())
            .finish_non_exhaustive()
    }
}

impl PipelineService {
    /// Create service with an invoker built from `config`
    #[must_use]
    pub fn new(
        registry: DefinitionRegistry,
        client: Arc<dyn ModelClient>,
        store: Arc<dyn KeyValueStore>,
        versions: Arc<dyn VersionRepository>,
        config: EngineConfig,
    ) -> Self {
        let invoker = AgentInvoker::new(client, &config);
        Self::with_invoker(registry, invoker, store, versions, config)
    }

    /// Create service around a preconfigured invoker
    #[must_use]
    pub fn with_invoker(
        registry: DefinitionRegistry,
        invoker: AgentInvoker,
        store: Arc<dyn KeyValueStore>,
        versions: Arc<dyn VersionRepository>,
        config: EngineConfig,
    ) -> Self {
        let controller = SectionPipelineController::new(StageExecutor::new(invoker, config.clone()));
        let state = JobStateClient::new(store, config.job_ttl());
        Self {
            registry: Arc::new(RwLock::new(registry)),
            orchestrator: JobOrchestrator::new(controller, state, versions, config),
            handles: Arc::new(DashMap::new()),
        }
    }

    /// Shared registry; edits never affect jobs already submitted
    #[inline]
    #[must_use]
    pub fn registry(&self) -> &Arc<RwLock<DefinitionRegistry>> {
        &self.registry
    }

    /// State client in use
    #[inline]
    #[must_use]
    pub fn state(&self) -> &JobStateClient {
        self.orchestrator.state()
    }

    /// Jobs whose task has not been joined yet
    #[must_use]
    pub fn running(&self) -> usize {
        self.handles.iter().filter(|h| !h.value().is_finished()).count()
    }

    /// Accept a job and start it in the background
    ///
    /// Nothing is recorded when the submission is rejected.
    ///
    /// # Errors
    /// - `InvalidSubmission` for empty or non-increasing sections
    /// - `Configuration` when the pipeline cannot be resolved
    /// - `Store` when the job record cannot be created
    pub async fn submit(&self, submission: JobSubmission) -> Result<JobId, SubmitError> {
        submission.check().map_err(SubmitError::InvalidSubmission)?;
        let pipeline = Arc::new(self.registry.read().resolve(&submission.pipeline_id)?);

        let job_id = JobId::new();
        let meta = JobMetadata::queued(job_id, pipeline.id.clone(), submission.sections.len());
        self.state().write_metadata(&meta).await?;
        metrics::counter!("plansmith_jobs_submitted_total").increment(1);
        tracing::info!(
            job = %job_id,
            pipeline = %pipeline.id,
            sections = submission.sections.len(),
            "job submitted"
        );

        let run = JobRun {
            job_id,
            title: submission.title.unwrap_or_else(|| pipeline.name.clone()),
            pipeline,
            sections: submission.sections,
            output: submission.output,
        };
        let orchestrator = self.orchestrator.clone();
        let handle = tokio::spawn(async move {
            if let Err(err) = orchestrator.run(run).await {
                tracing::error!(job = %job_id, error = %err, "job terminated without final status");
            }
        });

        self.handles.retain(|_, h| !h.is_finished());
        self.handles.insert(job_id, handle);
        Ok(job_id)
    }

    /// Current view of a job
    ///
    /// A processing job with the abort flag set reports `cancelling`.
    ///
    /// # Errors
    /// `NotFound` for unknown or expired jobs, or store failures.
    pub async fn poll(&self, job_id: JobId) -> Result<JobSnapshot, JobError> {
        let state = self.state();
        let meta = state.metadata(job_id).await?.ok_or(JobError::NotFound(job_id))?;
        let status = self.observed_status(&meta).await?;
        let result = state.result(job_id).await?;

        Ok(JobSnapshot {
            job_id,
            status,
            message: meta.message,
            current_index: meta.current_index,
            total_sections: meta.total_sections,
            error: meta.error,
            committed_version: meta.committed_version,
            result,
        })
    }

    /// Request cancellation; repeated calls are harmless
    ///
    /// # Errors
    /// `NotFound` for unknown or expired jobs, or store failures.
    pub async fn cancel(&self, job_id: JobId) -> Result<CancelAck, JobError> {
        let state = self.state();
        let meta = state.metadata(job_id).await?.ok_or(JobError::NotFound(job_id))?;
        let already_requested = state.request_abort(job_id).await?;
        let status = self.observed_status(&meta).await?;
        tracing::info!(job = %job_id, status = %status, already_requested, "cancel requested");

        Ok(CancelAck {
            job_id,
            status,
            already_requested,
        })
    }

    /// Wait for the job task to finish, then poll
    ///
    /// # Errors
    /// As [`Self::poll`].
    pub async fn wait(&self, job_id: JobId) -> Result<JobSnapshot, JobError> {
        if let Some((_, handle)) = self.handles.remove(&job_id) {
            if let Err(err) = handle.await {
                tracing::error!(job = %job_id, error = %err, "job task panicked");
            }
        }
        self.poll(job_id).await
    }

    async fn observed_status(&self, meta: &JobMetadata) -> Result<JobStatus, JobError> {
        if meta.status == JobStatus::Processing && self.state().abort_requested(meta.job_id).await? {
            return Ok(JobStatus::Cancelling);
        }
        Ok(meta.status)
    }
}
