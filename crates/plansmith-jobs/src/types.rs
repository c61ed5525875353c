//! Job-level value types

use crate::lifecycle::JobStatus;
use crate::versioning::EntityKind;
use chrono::{DateTime, Utc};
use plansmith_core::{PipelineId, PlanDocument, PlanTotals, SectionInput, SectionResult, TotalsTally};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use ulid::Ulid;

/// Unique job identifier (ULID for sortability)
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct JobId(pub Ulid);

impl JobId {
    /// Generate new job ID
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self(Ulid::new())
    }
}

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for JobId {
    type Err = ulid::DecodeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ulid::from_string(s).map(Self)
    }
}

/// Where a finished job's document is committed
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutputTarget {
    /// Entity the document versions
    pub entity_key: String,
    /// Plan or card
    pub kind: EntityKind,
    /// Version the new one derives from
    #[serde(default)]
    pub based_on: Option<u32>,
}

impl OutputTarget {
    /// Plan target
    #[must_use]
    pub fn plan(entity_key: impl Into<String>) -> Self {
        Self {
            entity_key: entity_key.into(),
            kind: EntityKind::Plan,
            based_on: None,
        }
    }

    /// Card target
    #[must_use]
    pub fn card(entity_key: impl Into<String>) -> Self {
        Self {
            kind: EntityKind::Card,
            ..Self::plan(entity_key)
        }
    }

    /// Derive from an existing version
    #[inline]
    #[must_use]
    pub fn based_on(mut self, version: u32) -> Self {
        self.based_on = Some(version);
        self
    }
}

/// Request to run a pipeline over ordered sections
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobSubmission {
    /// Pipeline to run
    pub pipeline_id: PipelineId,
    /// Sections in processing order
    pub sections: Vec<SectionInput>,
    /// Document title
    #[serde(default)]
    pub title: Option<String>,
    /// Commit target for the finished document
    #[serde(default)]
    pub output: Option<OutputTarget>,
}

impl JobSubmission {
    /// Create new submission
    #[must_use]
    pub fn new(pipeline_id: impl Into<PipelineId>, sections: Vec<SectionInput>) -> Self {
        Self {
            pipeline_id: pipeline_id.into(),
            sections,
            title: None,
            output: None,
        }
    }

    /// With document title
    #[inline]
    #[must_use]
    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }

    /// With commit target
    #[inline]
    #[must_use]
    pub fn with_output(mut self, target: OutputTarget) -> Self {
        self.output = Some(target);
        self
    }

    /// Empty lists and non-increasing indices are rejected
    ///
    /// # Errors
    /// A human-readable reason.
    pub fn check(&self) -> Result<(), String> {
        if self.sections.is_empty() {
            return Err("no sections submitted".to_string());
        }
        for pair in self.sections.windows(2) {
            if pair[1].index <= pair[0].index {
                return Err(format!(
                    "section {} (index {}) does not follow section {} (index {})",
                    pair[1].id, pair[1].index, pair[0].id, pair[0].index
                ));
            }
        }
        Ok(())
    }
}

/// Aggregated job result, full or partial
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobResult {
    /// Fewer sections than submitted
    pub partial: bool,
    /// Section results in submission order
    pub sections: Vec<SectionResult>,
    /// Section, procedure and requirement counts
    pub totals: PlanTotals,
}

impl JobResult {
    /// Aggregate section results
    #[must_use]
    pub fn new(sections: Vec<SectionResult>, submitted: usize) -> Self {
        let mut acc = ResultAccumulator::new(submitted);
        for section in sections {
            acc.push(section);
        }
        acc.into_result()
    }

    /// Persisted document form
    #[must_use]
    pub fn to_document(
        &self,
        title: &str,
        pipeline_id: &PipelineId,
        submitted: usize,
        generated_at: DateTime<Utc>,
    ) -> PlanDocument {
        PlanDocument::assemble(
            title,
            self.sections.iter().map(SectionResult::to_plan_section).collect(),
            submitted,
            generated_at,
        )
        .with_pipeline(pipeline_id.as_str())
    }
}

/// Job result grown one section at a time, totals kept current
#[derive(Debug, Clone)]
pub struct ResultAccumulator {
    result: JobResult,
    tally: TotalsTally,
    submitted: usize,
}

impl ResultAccumulator {
    /// Empty result for a job of `submitted` sections
    #[must_use]
    pub fn new(submitted: usize) -> Self {
        Self {
            result: JobResult {
                partial: submitted > 0,
                sections: Vec::with_capacity(submitted),
                totals: PlanTotals::default(),
            },
            tally: TotalsTally::new(),
            submitted,
        }
    }

    /// Append the next section
    pub fn push(&mut self, section: SectionResult) {
        self.tally.add(&section.procedures);
        self.result.sections.push(section);
        self.result.totals = self.tally.totals();
        self.result.partial = self.result.sections.len() < self.submitted;
    }

    /// Result so far
    #[inline]
    #[must_use]
    pub fn result(&self) -> &JobResult {
        &self.result
    }

    /// Sections appended so far
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.result.sections.len()
    }

    /// Whether no section was appended
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.result.sections.is_empty()
    }

    /// Take the result
    #[must_use]
    pub fn into_result(self) -> JobResult {
        self.result
    }
}

/// What a poller sees
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct JobSnapshot {
    /// Job
    pub job_id: JobId,
    /// Observed status
    pub status: JobStatus,
    /// Progress message
    pub message: String,
    /// Sections finished so far
    pub current_index: usize,
    /// Sections submitted
    pub total_sections: usize,
    /// Error text on failure
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Version committed to the output repository
    #[serde(skip_serializing_if = "Option::is_none")]
    pub committed_version: Option<u32>,
    /// Result payload, if any section finished
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<JobResult>,
}

impl JobSnapshot {
    /// Whether the attached result covers every section
    #[must_use]
    pub fn is_full(&self) -> bool {
        self.result.as_ref().is_some_and(|r| !r.partial)
    }
}

/// Acknowledgement of a cancel request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct CancelAck {
    /// Job
    pub job_id: JobId,
    /// Status observed when the request landed
    pub status: JobStatus,
    /// Flag was already set by an earlier request
    pub already_requested: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn job_id_round_trips_through_display() {
        let id = JobId::new();
        assert_eq!(id.to_string().parse::<JobId>().unwrap(), id);
    }

    #[test]
    fn submission_checks() {
        let empty = JobSubmission::new("p", vec![]);
        assert!(empty.check().is_err());

        let unordered = JobSubmission::new(
            "p",
            vec![SectionInput::new("a", 2, "x"), SectionInput::new("b", 2, "y")],
        );
        assert!(unordered.check().unwrap_err().contains("does not follow"));

        let ok = JobSubmission::new(
            "p",
            vec![SectionInput::new("a", 0, "x"), SectionInput::new("b", 5, "y")],
        )
        .with_title("Plan")
        .with_output(OutputTarget::plan("alpha").based_on(1));
        assert!(ok.check().is_ok());
        assert_eq!(ok.output.unwrap().based_on, Some(1));
    }

    fn section(id: &str, requirements: &[&str]) -> SectionResult {
        let procedures: Vec<_> = requirements
            .iter()
            .enumerate()
            .map(|(n, req)| serde_json::json!({ "id": format!("{id}-{n}"), "requirement_id": req, "title": "t" }))
            .collect();
        serde_json::from_value(serde_json::json!({
            "section_id": id,
            "index": 0,
            "title": id,
            "stages": [],
            "procedures": procedures,
            "failed": false
        }))
        .unwrap()
    }

    #[test]
    fn accumulator_keeps_totals_current() {
        let mut acc = ResultAccumulator::new(3);
        assert!(acc.is_empty());
        assert!(acc.result().partial);

        acc.push(section("1", &["REQ-1", "REQ-2"]));
        acc.push(section("2", &["REQ-2"]));
        assert_eq!(acc.len(), 2);
        assert!(acc.result().partial);
        assert_eq!(acc.result().totals.procedure_count, 3);
        assert_eq!(acc.result().totals.requirement_count, 2);

        acc.push(section("3", &[]));
        let done = acc.into_result();
        assert!(!done.partial);
        assert_eq!(done.totals.section_count, 3);
        assert_eq!(done, JobResult::new(done.sections.clone(), 3));
    }
}
