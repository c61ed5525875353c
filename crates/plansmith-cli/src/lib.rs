//! Plansmith CLI - operator commands
//!
//! `validate` checks a definitions document; `simulate` runs one job
//! end-to-end against the offline [`EchoModelClient`].

pub mod echo;

pub use echo::EchoModelClient;

use anyhow::{bail, Context, Result};
use plansmith_core::{DefinitionRegistry, EngineConfig, PipelineId, SectionInput};
use plansmith_jobs::prelude::*;
use serde::Serialize;
use std::fmt::Write as _;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Entity key simulated plans are committed under
pub const SIMULATION_ENTITY: &str = "simulation";

/// Outcome of `validate`
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ValidationReport {
    /// Registered agents
    pub agents: usize,
    /// Registered pipelines with their stage counts
    pub pipelines: Vec<(String, usize)>,
    /// Pipeline flagged default
    pub default_pipeline: Option<String>,
}

impl ValidationReport {
    /// Human-readable summary
    #[must_use]
    pub fn render(&self) -> String {
        let mut out = format!(
            "definitions valid: {} agents, {} pipelines\n",
            self.agents,
            self.pipelines.len()
        );
        for (id, stages) in &self.pipelines {
            let marker = if self.default_pipeline.as_deref() == Some(id.as_str()) {
                " (default)"
            } else {
                ""
            };
            let _ = writeln!(out, "  {id}: {stages} stages{marker}");
        }
        out
    }
}

/// Load and validate a definitions document
///
/// Every pipeline is validated against the agents as it is registered; the
/// single-default rule is checked afterwards.
///
/// # Errors
/// The first configuration problem found.
pub fn validate(definitions: &Path) -> Result<ValidationReport> {
    let registry = DefinitionRegistry::load(definitions)
        .with_context(|| format!("invalid definitions in {}", definitions.display()))?;
    registry.ensure_single_default()?;

    let mut pipelines: Vec<(String, usize)> = registry
        .pipelines()
        .map(|p| (p.id.to_string(), p.stages.len()))
        .collect();
    pipelines.sort();

    Ok(ValidationReport {
        agents: registry.agents().count(),
        pipelines,
        default_pipeline: registry.default_pipeline().map(|p| p.id.to_string()),
    })
}

/// Inputs of `simulate`
#[derive(Debug, Clone, Default)]
pub struct SimulateOptions {
    /// YAML definitions document
    pub definitions: PathBuf,
    /// JSON array of sections
    pub sections: PathBuf,
    /// Pipeline to run; the default pipeline when absent
    pub pipeline: Option<String>,
    /// TOML engine configuration
    pub config: Option<PathBuf>,
}

fn load_sections(path: &Path) -> Result<Vec<SectionInput>> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("cannot read sections from {}", path.display()))?;
    serde_json::from_str(&raw).with_context(|| format!("malformed sections in {}", path.display()))
}

/// Run one job to completion with the offline model client
///
/// # Errors
/// Unreadable inputs, a rejected submission, or a job store failure.
pub async fn simulate(options: &SimulateOptions) -> Result<JobSnapshot> {
    let registry = DefinitionRegistry::load(&options.definitions)
        .with_context(|| format!("invalid definitions in {}", options.definitions.display()))?;
    let config = match &options.config {
        Some(path) => EngineConfig::load(path)
            .with_context(|| format!("invalid engine config in {}", path.display()))?,
        None => EngineConfig::default(),
    };
    let sections = load_sections(&options.sections)?;

    let pipeline = match &options.pipeline {
        Some(id) => PipelineId::new(id.as_str()),
        None => match registry.default_pipeline() {
            Some(p) => p.id.clone(),
            None => bail!("no --pipeline given and no default pipeline defined"),
        },
    };
    tracing::info!(pipeline = %pipeline, sections = sections.len(), "simulating job");

    let service = PipelineService::new(
        registry,
        Arc::new(EchoModelClient::new()),
        Arc::new(MemoryStore::default()),
        Arc::new(MemoryVersionRepository::new()),
        config,
    );
    let job = service
        .submit(
            JobSubmission::new(pipeline.clone(), sections)
                .with_title(format!("Simulated {pipeline} plan"))
                .with_output(OutputTarget::plan(SIMULATION_ENTITY)),
        )
        .await?;
    Ok(service.wait(job).await?)
}

/// Human-readable rendering of a final poll result
#[must_use]
pub fn render_snapshot(snapshot: &JobSnapshot) -> String {
    let mut out = format!("job {}: {}\n", snapshot.job_id, snapshot.status);
    let _ = writeln!(
        out,
        "  {} ({} of {} sections)",
        snapshot.message, snapshot.current_index, snapshot.total_sections
    );
    if let Some(error) = &snapshot.error {
        let _ = writeln!(out, "  error: {error}");
    }
    if let Some(version) = snapshot.committed_version {
        let _ = writeln!(out, "  committed {SIMULATION_ENTITY} v{version}");
    }

    let Some(result) = &snapshot.result else {
        return out;
    };
    let _ = writeln!(
        out,
        "  totals: {} sections, {} procedures, {} requirements{}",
        result.totals.section_count,
        result.totals.procedure_count,
        result.totals.requirement_count,
        if result.partial { " (partial)" } else { "" }
    );
    for section in &result.sections {
        let state = if section.failed { "FAILED" } else { "ok" };
        let _ = writeln!(
            out,
            "  [{}] {} - {} procedures, {state}",
            section.section_id,
            section.title,
            section.procedures.len()
        );
        for note in &section.annotations {
            let _ = writeln!(out, "      note: {note}");
        }
    }
    out
}
