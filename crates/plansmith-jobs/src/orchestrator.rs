//! Job orchestrator
//!
//! Owns one job from `queued` to a terminal status. Sections run strictly in
//! order; the abort flag is checked at every section boundary, including
//! before the first. The orchestrator is the only writer of a job's status,
//! progress and result.

use crate::error::JobError;
use crate::lifecycle::{validate_transition, JobStatus};
use crate::store::{JobMetadata, JobStateClient};
use crate::types::{JobId, OutputTarget, ResultAccumulator};
use crate::versioning::{NewVersion, VersionRepository};
use chrono::Utc;
use plansmith_core::{
    EngineConfig, ResolvedPipeline, RollingSummary, SectionInput, SectionPipelineController,
};
use std::sync::Arc;

/// Everything one job needs, captured at submission
#[derive(Debug, Clone)]
pub struct JobRun {
    /// Job
    pub job_id: JobId,
    /// Pipeline snapshot
    pub pipeline: Arc<ResolvedPipeline>,
    /// Sections in processing order
    pub sections: Vec<SectionInput>,
    /// Document title
    pub title: String,
    /// Commit target
    pub output: Option<OutputTarget>,
}

/// How the section loop ended
#[derive(Debug)]
enum Outcome {
    Completed,
    Aborted,
    Failed(String),
}

/// Drives jobs through the section pipeline
#[derive(Clone)]
pub struct JobOrchestrator {
    controller: SectionPipelineController,
    state: JobStateClient,
    versions: Arc<dyn VersionRepository>,
    config: EngineConfig,
}

impl std::fmt::Debug for JobOrchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JobOrchestrator")
            .field("state", &self.state)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl JobOrchestrator {
    /// Create new orchestrator
    #[must_use]
    pub fn new(
        controller: SectionPipelineController,
        state: JobStateClient,
        versions: Arc<dyn VersionRepository>,
        config: EngineConfig,
    ) -> Self {
        Self {
            controller,
            state,
            versions,
            config,
        }
    }

    /// State client in use
    #[inline]
    #[must_use]
    pub fn state(&self) -> &JobStateClient {
        &self.state
    }

    /// Run a job to a terminal status
    ///
    /// Failures end the job as `failed` with the error recorded; they are
    /// only returned when even that could not be stored.
    ///
    /// # Errors
    /// `NotFound` if the job record is missing, or store failures while
    /// recording the terminal status.
    #[tracing::instrument(name = "job", skip_all, fields(job = %run.job_id, pipeline = %run.pipeline.id))]
    pub async fn run(&self, run: JobRun) -> Result<JobStatus, JobError> {
        let mut meta = self
            .state
            .metadata(run.job_id)
            .await?
            .ok_or(JobError::NotFound(run.job_id))?;
        let mut results = ResultAccumulator::new(run.sections.len());

        let outcome = match self.drive(&run, &mut meta, &mut results).await {
            Ok(outcome) => outcome,
            Err(err) => {
                tracing::error!(error = %err, "job failed");
                Outcome::Failed(err.to_string())
            }
        };

        let status = self.finish(&run, &mut meta, &results, outcome).await?;
        metrics::counter!("plansmith_jobs_finished_total", "status" => status.as_str()).increment(1);
        tracing::info!(status = %status, sections = results.len(), "job finished");
        Ok(status)
    }

    async fn drive(
        &self,
        run: &JobRun,
        meta: &mut JobMetadata,
        results: &mut ResultAccumulator,
    ) -> Result<Outcome, JobError> {
        let total = run.sections.len();

        if self.state.abort_requested(run.job_id).await? {
            tracing::info!("cancelled before start");
            return Ok(Outcome::Aborted);
        }
        transition(meta, JobStatus::Processing, format!("processing section 1 of {total}"))?;
        self.state.write_metadata(meta).await?;
        tracing::info!(sections = total, "job started");

        let mut summary = RollingSummary::new(self.config.rolling_summary_max_chars);

        for section in &run.sections {
            if self.state.abort_requested(run.job_id).await? {
                tracing::info!(done = results.len(), "abort observed at section boundary");
                return Ok(Outcome::Aborted);
            }

            let result = self.controller.process(&run.pipeline, section, &mut summary).await;
            let failure = result
                .failed
                .then(|| result.failure.clone().unwrap_or_default());
            results.push(result);

            self.state.write_result(run.job_id, results.result()).await?;

            let done = results.len();
            meta.current_index = done;
            meta.message = match &failure {
                Some(_) => format!("section {} failed ({done} of {total})", section.id),
                None => format!("section {done} of {total} processed"),
            };
            meta.updated_at = Utc::now();
            self.state.write_metadata(meta).await?;

            if let Some(reason) = failure {
                if !self.config.continue_on_section_failure {
                    return Err(JobError::SectionFailed {
                        section: section.id.to_string(),
                        reason,
                    });
                }
                tracing::warn!(section = %section.id, "continuing after failed section");
            }
        }

        Ok(Outcome::Completed)
    }

    async fn finish(
        &self,
        run: &JobRun,
        meta: &mut JobMetadata,
        results: &ResultAccumulator,
        outcome: Outcome,
    ) -> Result<JobStatus, JobError> {
        let total = run.sections.len();
        let done = results.len();

        let (status, message, mut error) = match outcome {
            Outcome::Completed => (
                JobStatus::Completed,
                format!("completed {done} of {total} sections"),
                None,
            ),
            Outcome::Aborted => (
                JobStatus::Aborted,
                format!("aborted after {done} of {total} sections"),
                None,
            ),
            Outcome::Failed(reason) => (
                JobStatus::Failed,
                format!("failed after {done} of {total} sections"),
                Some(reason),
            ),
        };

        if status == JobStatus::Aborted && meta.status == JobStatus::Processing {
            transition(meta, JobStatus::Cancelling, "cancelling")?;
            self.state.write_metadata(meta).await?;
        }

        if !results.is_empty() {
            if let Err(err) = self.persist(run, meta, results).await {
                tracing::error!(error = %err, "could not persist job result");
                error.get_or_insert_with(|| err.to_string());
            }
        }

        let status = match (&error, status) {
            (Some(_), JobStatus::Completed | JobStatus::Aborted) => JobStatus::Failed,
            (_, status) => status,
        };
        if status == JobStatus::Failed && meta.status == JobStatus::Queued {
            transition(meta, JobStatus::Processing, "processing")?;
        }
        transition(meta, status, message)?;
        meta.error = error;
        self.state.write_metadata(meta).await?;
        Ok(status)
    }

    async fn persist(
        &self,
        run: &JobRun,
        meta: &mut JobMetadata,
        results: &ResultAccumulator,
    ) -> Result<(), JobError> {
        let total = run.sections.len();
        let result = results.result();
        self.state.write_result(run.job_id, result).await?;

        if let Some(target) = &run.output {
            let document = result.to_document(&run.title, &run.pipeline.id, total, Utc::now());
            let record = self
                .versions
                .commit(
                    NewVersion::draft(target.kind, target.entity_key.clone(), document)
                        .based_on(target.based_on)
                        .from_job(run.job_id),
                )
                .await?;
            meta.committed_version = Some(record.version);
        }
        Ok(())
    }
}

fn transition(meta: &mut JobMetadata, to: JobStatus, message: impl Into<String>) -> Result<(), JobError> {
    validate_transition(meta.status, to)?;
    tracing::debug!(from = %meta.status, to = %to, "job transition");
    meta.status = to;
    meta.message = message.into();
    meta.updated_at = Utc::now();
    Ok(())
}
