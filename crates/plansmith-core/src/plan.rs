//! Persisted test-plan schema
//!
//! The durable compatibility contract consumed by export and extraction
//! tooling. Field names and nesting must stay stable.

use serde::{Deserialize, Deserializer, Serialize};
use std::collections::HashSet;

/// Lifecycle status of a persisted plan or card
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlanStatus {
    /// Editable draft
    #[default]
    Draft,
    /// Reviewed
    Final,
    /// Released
    Published,
}

/// One test procedure
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct TestProcedure {
    /// Procedure identifier
    #[serde(default, deserialize_with = "string_like")]
    pub id: String,
    /// Requirement it verifies
    #[serde(default, deserialize_with = "string_like")]
    pub requirement_id: String,
    /// Title
    #[serde(default, deserialize_with = "string_like")]
    pub title: String,
    /// What the procedure demonstrates
    #[serde(default, deserialize_with = "string_like")]
    pub objective: String,
    /// Preconditions and setup
    #[serde(default, deserialize_with = "string_like")]
    pub setup: String,
    /// Ordered steps
    #[serde(default, deserialize_with = "one_or_many")]
    pub steps: Vec<String>,
    /// Expected results
    #[serde(default, deserialize_with = "one_or_many")]
    pub expected_results: Vec<String>,
    /// Pass/fail criteria
    #[serde(default, deserialize_with = "string_like")]
    pub pass_fail_criteria: String,
    /// Procedure type (functional, performance, ...)
    #[serde(rename = "type", default, deserialize_with = "string_like")]
    pub procedure_type: String,
    /// Priority
    #[serde(default, deserialize_with = "string_like")]
    pub priority: String,
    /// Estimated duration
    #[serde(default, deserialize_with = "string_like")]
    pub estimated_duration: String,
}

fn value_to_string(value: serde_json::Value) -> String {
    match value {
        serde_json::Value::Null => String::new(),
        serde_json::Value::String(s) => s,
        other => other.to_string(),
    }
}

fn string_like<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    serde_json::Value::deserialize(deserializer).map(value_to_string)
}

fn one_or_many<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match serde_json::Value::deserialize(deserializer)? {
        serde_json::Value::Null => Vec::new(),
        serde_json::Value::Array(items) => items.into_iter().map(value_to_string).collect(),
        single => vec![value_to_string(single)],
    })
}

/// Synthesized content parsed from a critic's output
#[derive(Debug, Clone, PartialEq, Eq, Default, Deserialize)]
pub struct SynthesisPayload {
    /// Test procedures
    #[serde(default)]
    pub procedures: Vec<TestProcedure>,
    /// Dependencies on other sections or systems
    #[serde(default, deserialize_with = "one_or_many")]
    pub dependencies: Vec<String>,
    /// Conflicts noticed during synthesis
    #[serde(default, deserialize_with = "one_or_many")]
    pub conflicts: Vec<String>,
}

impl SynthesisPayload {
    /// Interpret a JSON value: either a bare procedure array or an object
    #[must_use]
    pub fn from_value(value: &serde_json::Value) -> Option<Self> {
        match value {
            serde_json::Value::Array(_) => serde_json::from_value::<Vec<TestProcedure>>(value.clone())
                .ok()
                .map(|procedures| Self {
                    procedures,
                    ..Self::default()
                }),
            serde_json::Value::Object(_) => serde_json::from_value(value.clone()).ok(),
            _ => None,
        }
    }
}

/// Aggregated counts
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct PlanTotals {
    /// Sections in the result
    pub section_count: usize,
    /// Procedures across all sections
    pub procedure_count: usize,
    /// Distinct requirement ids across all procedures
    pub requirement_count: usize,
}

impl PlanTotals {
    /// Compute totals over persisted sections
    #[must_use]
    pub fn compute(sections: &[PlanSection]) -> Self {
        let mut tally = TotalsTally::new();
        for section in sections {
            tally.add(&section.procedures);
        }
        tally.totals()
    }
}

/// Totals kept current as sections arrive one at a time
#[derive(Debug, Clone, Default)]
pub struct TotalsTally {
    totals: PlanTotals,
    requirements: HashSet<String>,
}

impl TotalsTally {
    /// Create empty tally
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Count one more section holding `procedures`
    pub fn add(&mut self, procedures: &[TestProcedure]) {
        self.totals.section_count += 1;
        self.totals.procedure_count += procedures.len();
        for procedure in procedures {
            let id = procedure.requirement_id.trim();
            if !id.is_empty() && !self.requirements.contains(id) {
                self.requirements.insert(id.to_string());
            }
        }
        self.totals.requirement_count = self.requirements.len();
    }

    /// Totals so far
    #[inline]
    #[must_use]
    pub fn totals(&self) -> PlanTotals {
        self.totals
    }
}

/// Document metadata block
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlanMetadata {
    /// Plan title
    pub title: String,
    /// Document status
    pub status: PlanStatus,
    /// Sections in this document
    pub section_count: usize,
    /// Distinct requirements covered
    pub requirement_count: usize,
    /// Procedures in this document
    pub procedure_count: usize,
    /// Generation time
    pub generated_at: chrono::DateTime<chrono::Utc>,
    /// Fewer sections than submitted
    #[serde(default)]
    pub partial: bool,
    /// Sections submitted
    #[serde(default)]
    pub source_section_count: usize,
    /// Pipeline that produced the plan
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pipeline_id: Option<String>,
}

/// One section of the persisted plan
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlanSection {
    /// Source section id
    pub section_id: String,
    /// Section title
    pub title: String,
    /// Test procedures
    #[serde(default)]
    pub procedures: Vec<TestProcedure>,
    /// Extracted dependencies
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub dependencies: Vec<String>,
    /// Extracted conflicts
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conflicts: Vec<String>,
    /// Cross-section contradiction notes
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub contradiction_notes: Vec<String>,
    /// Coverage-gap notes
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub gap_notes: Vec<String>,
    /// Section failed in every stage
    #[serde(default)]
    pub failed: bool,
}

/// Persisted test plan
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlanDocument {
    /// Metadata block
    pub metadata: PlanMetadata,
    /// Ordered sections
    pub sections: Vec<PlanSection>,
}

impl PlanDocument {
    /// Assemble a document, computing the counts
    #[must_use]
    pub fn assemble(
        title: impl Into<String>,
        sections: Vec<PlanSection>,
        source_section_count: usize,
        generated_at: chrono::DateTime<chrono::Utc>,
    ) -> Self {
        let totals = PlanTotals::compute(&sections);
        Self {
            metadata: PlanMetadata {
                title: title.into(),
                status: PlanStatus::Draft,
                section_count: totals.section_count,
                requirement_count: totals.requirement_count,
                procedure_count: totals.procedure_count,
                generated_at,
                partial: totals.section_count < source_section_count,
                source_section_count,
                pipeline_id: None,
            },
            sections,
        }
    }

    /// With producing pipeline
    #[inline]
    #[must_use]
    pub fn with_pipeline(mut self, pipeline_id: impl Into<String>) -> Self {
        self.metadata.pipeline_id = Some(pipeline_id.into());
        self
    }

    /// Counts recorded in the metadata block
    #[inline]
    #[must_use]
    pub fn totals(&self) -> PlanTotals {
        PlanTotals {
            section_count: self.metadata.section_count,
            procedure_count: self.metadata.procedure_count,
            requirement_count: self.metadata.requirement_count,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn procedure(id: &str, req: &str) -> TestProcedure {
        TestProcedure {
            id: id.into(),
            requirement_id: req.into(),
            title: format!("Verify {req}"),
            ..TestProcedure::default()
        }
    }

    fn section(id: &str, procedures: Vec<TestProcedure>) -> PlanSection {
        PlanSection {
            section_id: id.into(),
            title: id.into(),
            procedures,
            dependencies: vec![],
            conflicts: vec![],
            contradiction_notes: vec![],
            gap_notes: vec![],
            failed: false,
        }
    }

    #[test]
    fn procedure_field_names_are_stable() {
        let value = serde_json::to_value(procedure("TP-1", "REQ-1")).unwrap();
        let keys: Vec<&str> = value.as_object().unwrap().keys().map(String::as_str).collect();
        for expected in [
            "id",
            "requirement_id",
            "title",
            "objective",
            "setup",
            "steps",
            "expected_results",
            "pass_fail_criteria",
            "type",
            "priority",
            "estimated_duration",
        ] {
            assert!(keys.contains(&expected), "missing field {expected}");
        }
    }

    #[test]
    fn procedure_parsing_is_lenient() {
        let parsed: TestProcedure = serde_json::from_value(serde_json::json!({
            "id": 7,
            "requirement_id": "REQ-9",
            "steps": "Power on",
            "expected_results": ["LED green", 1],
            "type": "functional",
            "estimated_duration": null
        }))
        .unwrap();
        assert_eq!(parsed.id, "7");
        assert_eq!(parsed.steps, vec!["Power on".to_string()]);
        assert_eq!(parsed.expected_results, vec!["LED green".to_string(), "1".to_string()]);
        assert_eq!(parsed.procedure_type, "functional");
        assert_eq!(parsed.estimated_duration, "");
    }

    #[test]
    fn synthesis_from_array_or_object() {
        let arr = serde_json::json!([{ "id": "TP-1" }]);
        assert_eq!(SynthesisPayload::from_value(&arr).unwrap().procedures.len(), 1);

        let obj = serde_json::json!({
            "procedures": [{ "id": "TP-1" }, { "id": "TP-2" }],
            "dependencies": "power supply",
            "conflicts": ["3.1 vs 4.2"]
        });
        let payload = SynthesisPayload::from_value(&obj).unwrap();
        assert_eq!(payload.procedures.len(), 2);
        assert_eq!(payload.dependencies, vec!["power supply".to_string()]);
        assert_eq!(payload.conflicts.len(), 1);

        assert!(SynthesisPayload::from_value(&serde_json::json!("text")).is_none());
    }

    #[test]
    fn totals_count_distinct_requirements() {
        let sections = vec![
            section("1", vec![procedure("TP-1", "REQ-1"), procedure("TP-2", "REQ-1")]),
            section("2", vec![procedure("TP-3", "REQ-2"), procedure("TP-4", " ")]),
        ];
        assert_eq!(
            PlanTotals::compute(&sections),
            PlanTotals {
                section_count: 2,
                procedure_count: 4,
                requirement_count: 2,
            }
        );
    }

    #[test]
    fn tally_tracks_sections_as_they_arrive() {
        let mut tally = TotalsTally::new();
        tally.add(&[procedure("TP-1", "REQ-1")]);
        assert_eq!(tally.totals().requirement_count, 1);

        tally.add(&[procedure("TP-2", " REQ-1 "), procedure("TP-3", "REQ-2")]);
        tally.add(&[]);
        assert_eq!(
            tally.totals(),
            PlanTotals {
                section_count: 3,
                procedure_count: 3,
                requirement_count: 2,
            }
        );
    }

    #[test]
    fn assemble_flags_partial() {
        let doc = PlanDocument::assemble(
            "Plan",
            vec![section("1", vec![procedure("TP-1", "REQ-1")])],
            3,
            chrono::Utc::now(),
        )
        .with_pipeline("standard");
        assert!(doc.metadata.partial);
        assert_eq!(doc.metadata.status, PlanStatus::Draft);
        assert_eq!(doc.totals().procedure_count, 1);
        assert_eq!(doc.metadata.pipeline_id.as_deref(), Some("standard"));

        let json = serde_json::to_value(&doc).unwrap();
        assert_eq!(json["metadata"]["status"], "draft");
        assert_eq!(json["sections"][0]["procedures"][0]["requirement_id"], "REQ-1");
    }
}
