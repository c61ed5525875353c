//! Section pipeline controller
//!
//! Drives one section through a resolved stage list. Stages are plain data;
//! the controller knows nothing about what a stage is for beyond the roles
//! of its agents, which decide synthesis and note extraction.

use crate::definitions::ResolvedPipeline;
use crate::error::StageFailure;
use crate::invoker::{parse_json_lenient, AgentOutput, TokenUsage};
use crate::plan::{PlanSection, SynthesisPayload, TestProcedure};
use crate::stage::{StageExecutor, StageResult, StageStatus};
use crate::summary::RollingSummary;
use crate::template::TemplateContext;
use crate::types::{clip_chars, AgentRole, SectionId, SectionInput};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Characters of unstructured synthesis carried into the rolling summary
const SUMMARY_HEAD_CHARS: usize = 480;

/// Outcome of one section, immutable once appended to a job
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SectionResult {
    /// Source section
    pub section_id: SectionId,
    /// Ordering index of the source section
    pub index: usize,
    /// Section title
    pub title: String,
    /// Stage results in pipeline order
    pub stages: Vec<StageResult>,
    /// Synthesized test procedures
    #[serde(default)]
    pub procedures: Vec<TestProcedure>,
    /// Extracted dependencies
    #[serde(default)]
    pub dependencies: Vec<String>,
    /// Extracted conflicts
    #[serde(default)]
    pub conflicts: Vec<String>,
    /// Notes from contradiction-role agents
    #[serde(default)]
    pub contradiction_notes: Vec<String>,
    /// Notes from gap-analysis agents
    #[serde(default)]
    pub gap_notes: Vec<String>,
    /// Raw text of the synthesizing stage
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub synthesized: Option<String>,
    /// Degradation notes
    #[serde(default)]
    pub annotations: Vec<String>,
    /// No stage produced usable output
    pub failed: bool,
    /// Why the section failed
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure: Option<String>,
}

impl SectionResult {
    /// Stage result by name
    #[must_use]
    pub fn stage(&self, name: &str) -> Option<&StageResult> {
        self.stages.iter().find(|s| s.name == name)
    }

    /// Token estimate summed over all stages
    #[must_use]
    pub fn usage(&self) -> TokenUsage {
        let mut usage = TokenUsage::default();
        for stage in &self.stages {
            usage += stage.usage;
        }
        usage
    }

    /// Persisted form
    #[must_use]
    pub fn to_plan_section(&self) -> PlanSection {
        PlanSection {
            section_id: self.section_id.to_string(),
            title: self.title.clone(),
            procedures: self.procedures.clone(),
            dependencies: self.dependencies.clone(),
            conflicts: self.conflicts.clone(),
            contradiction_notes: self.contradiction_notes.clone(),
            gap_notes: self.gap_notes.clone(),
            failed: self.failed,
        }
    }

    /// Rolling-summary contribution of this section
    ///
    /// `id: title` per procedure, or the head of the synthesized text.
    #[must_use]
    pub fn summary_entry(&self) -> Option<String> {
        if self.failed {
            return None;
        }
        if !self.procedures.is_empty() {
            let entry = self
                .procedures
                .iter()
                .map(|p| format!("{}: {}", p.id, p.title))
                .collect::<Vec<_>>()
                .join("; ");
            return Some(entry);
        }
        self.synthesized
            .as_deref()
            .map(|text| clip_chars(text.trim(), SUMMARY_HEAD_CHARS).to_string())
            .filter(|head| !head.is_empty())
    }
}

/// Runs every stage of a pipeline for one section
#[derive(Debug, Clone)]
pub struct SectionPipelineController {
    executor: StageExecutor,
}

impl SectionPipelineController {
    /// Create new controller
    #[inline]
    #[must_use]
    pub fn new(executor: StageExecutor) -> Self {
        Self { executor }
    }

    /// Stage executor in use
    #[inline]
    #[must_use]
    pub fn executor(&self) -> &StageExecutor {
        &self.executor
    }

    /// Process one section and fold its synthesis into `summary`
    ///
    /// Never fails: a section whose every stage failed comes back marked
    /// failed.
    #[tracing::instrument(
        name = "section",
        skip_all,
        fields(section = %section.id, index = section.index, pipeline = %pipeline.id)
    )]
    pub async fn process(
        &self,
        pipeline: &ResolvedPipeline,
        section: &SectionInput,
        summary: &mut RollingSummary,
    ) -> SectionResult {
        tracing::info!(stages = pipeline.stages.len(), "processing section");

        let rendered_summary = summary.render();
        let mut merged: HashMap<String, String> = HashMap::new();
        let mut results: Vec<StageResult> = Vec::with_capacity(pipeline.stages.len());

        for stage in &pipeline.stages {
            let previous_stage = results.last().map(|r| r.name.clone());

            let missing = stage
                .upstream_stages(previous_stage.as_deref())
                .into_iter()
                .find(|name| !merged.contains_key(name));
            if let Some(upstream) = missing {
                tracing::warn!(stage = %stage.name, upstream = %upstream, "skipping stage");
                results.push(StageResult::failed(
                    &stage.name,
                    stage.mode,
                    &StageFailure::UpstreamUnavailable(upstream),
                ));
                continue;
            }

            let result = {
                let ctx = TemplateContext {
                    section,
                    previous: previous_stage
                        .as_deref()
                        .and_then(|name| merged.get(name))
                        .map(String::as_str),
                    stages: &merged,
                    rolling_summary: &rendered_summary,
                    input: None,
                };
                self.executor.execute(stage, &ctx).await
            };
            if result.is_usable() {
                merged.insert(result.name.clone(), result.merged.clone());
            }
            results.push(result);
        }

        let result = assemble(pipeline, section, results);
        if let Some(entry) = result.summary_entry() {
            summary.push(section.id.clone(), entry);
        }

        if result.failed {
            tracing::warn!(reason = result.failure.as_deref().unwrap_or_default(), "section failed");
        } else {
            tracing::info!(
                procedures = result.procedures.len(),
                annotations = result.annotations.len(),
                "section processed"
            );
        }
        result
    }
}

fn assemble(pipeline: &ResolvedPipeline, section: &SectionInput, stages: Vec<StageResult>) -> SectionResult {
    let mut result = SectionResult {
        section_id: section.id.clone(),
        index: section.index,
        title: section.title(),
        stages: Vec::new(),
        procedures: Vec::new(),
        dependencies: Vec::new(),
        conflicts: Vec::new(),
        contradiction_notes: Vec::new(),
        gap_notes: Vec::new(),
        synthesized: None,
        annotations: annotate(&stages),
        failed: false,
        failure: None,
    };

    if !stages.iter().any(StageResult::is_usable) {
        result.failed = true;
        result.failure = Some(format!("all {} stages failed", stages.len()));
        result.stages = stages;
        return result;
    }

    for stage in stages.iter().filter(|s| s.is_usable()) {
        for output in stage.agent_outputs() {
            let note = output.text.trim();
            if note.is_empty() {
                continue;
            }
            match output.role {
                AgentRole::Contradiction => result.contradiction_notes.push(note.to_string()),
                AgentRole::GapAnalysis => result.gap_notes.push(note.to_string()),
                _ => {}
            }
        }
    }

    // Last usable critic stage; other stages only synthesize when no stage has a critic
    let with_critic = pipeline
        .stages
        .iter()
        .zip(&stages)
        .rev()
        .find(|(def, res)| res.is_usable() && def.has_role(AgentRole::Critic));
    let has_critic = pipeline.stages.iter().any(|s| s.has_role(AgentRole::Critic));
    let synthesis = if has_critic {
        with_critic.map(|(_, res)| (res, true))
    } else {
        stages.iter().rev().find(|s| s.is_usable()).map(|res| (res, false))
    };
    if synthesis.is_none() {
        result
            .annotations
            .push("synthesis unavailable: no critic stage succeeded".to_string());
    }

    if let Some((stage, critic_only)) = synthesis {
        let outputs: Vec<&AgentOutput> = stage
            .agent_outputs()
            .into_iter()
            .filter(|o| !critic_only || o.role == AgentRole::Critic)
            .collect();

        let mut parsed_any = false;
        for output in &outputs {
            let value = output
                .structured
                .clone()
                .or_else(|| parse_json_lenient(&output.text));
            if let Some(payload) = value.as_ref().and_then(SynthesisPayload::from_value) {
                parsed_any = true;
                result.procedures.extend(payload.procedures);
                result.dependencies.extend(payload.dependencies);
                result.conflicts.extend(payload.conflicts);
            }
        }
        if !parsed_any {
            result
                .annotations
                .push(format!("stage '{}' synthesis is not structured; kept raw", stage.name));
        }
        result.synthesized = Some(stage.merged.clone());
    }

    result.stages = stages;
    result
}

fn annotate(stages: &[StageResult]) -> Vec<String> {
    let mut notes = Vec::new();
    for stage in stages {
        match stage.status {
            StageStatus::Succeeded => {}
            StageStatus::Partial => {
                for failure in &stage.failures {
                    notes.push(format!(
                        "stage '{}' partial: agent {} failed ({}): {}",
                        stage.name, failure.agent_id, failure.kind, failure.message
                    ));
                }
            }
            StageStatus::Failed => notes.push(format!(
                "stage '{}' failed: {}",
                stage.name,
                stage.failure.as_deref().unwrap_or("no output")
            )),
        }
    }
    notes
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EngineConfig;
    use crate::definitions::{AgentDefinition, ResolvedStage};
    use crate::error::ModelError;
    use crate::invoker::{AgentInvoker, ModelClient, ModelRequest, ModelResponse};
    use crate::types::ExecutionMode;
    use std::sync::{Arc, Mutex};

    /// Canned replies per agent; agents without a reply fail
    #[derive(Default)]
    struct Canned {
        replies: HashMap<String, String>,
        prompts: Mutex<Vec<(String, String)>>,
    }

    impl Canned {
        fn reply(mut self, agent: &str, text: &str) -> Self {
            self.replies.insert(agent.to_string(), text.to_string());
            self
        }

        fn prompt_of(&self, agent: &str) -> Vec<String> {
            self.prompts
                .lock()
                .unwrap()
                .iter()
                .filter(|(a, _)| a == agent)
                .map(|(_, p)| p.clone())
                .collect()
        }
    }

    #[async_trait::async_trait]
    impl ModelClient for Canned {
        async fn complete(&self, request: ModelRequest) -> Result<ModelResponse, ModelError> {
            self.prompts
                .lock()
                .unwrap()
                .push((request.agent_id.to_string(), request.user.clone()));
            self.replies
                .get(request.agent_id.as_str())
                .map(ModelResponse::new)
                .ok_or_else(|| ModelError::Unavailable("no reply".into()))
        }
    }

    fn agent(id: &str, role: AgentRole, prompt: &str) -> Arc<AgentDefinition> {
        Arc::new(AgentDefinition::new(id, role, "m", prompt, 1_000))
    }

    fn pipeline(stages: Vec<ResolvedStage>) -> ResolvedPipeline {
        ResolvedPipeline {
            id: "p".into(),
            name: "P".into(),
            stages,
        }
    }

    fn actor_critic() -> ResolvedPipeline {
        pipeline(vec![
            ResolvedStage {
                name: "extract".into(),
                mode: ExecutionMode::Parallel,
                agents: vec![
                    agent("a1", AgentRole::Actor, "{{section_text}}"),
                    agent("a2", AgentRole::Actor, "{{section_text}}"),
                ],
            },
            ResolvedStage {
                name: "review".into(),
                mode: ExecutionMode::Parallel,
                agents: vec![agent("critic", AgentRole::Critic, "{{previous}}")],
            },
        ])
    }

    fn controller(client: Arc<Canned>) -> SectionPipelineController {
        let config = EngineConfig::default();
        SectionPipelineController::new(StageExecutor::new(AgentInvoker::new(client, &config), config))
    }

    const PROCEDURES: &str = r#"```json
[{"id": "TP-1", "requirement_id": "REQ-1", "title": "Boot"},
 {"id": "TP-2", "requirement_id": "REQ-2", "title": "Halt"}]
```"#;

    #[tokio::test]
    async fn critic_synthesis_yields_procedures() {
        let client = Arc::new(
            Canned::default()
                .reply("a1", "req one")
                .reply("a2", "req two")
                .reply("critic", PROCEDURES),
        );
        let ctl = controller(client.clone());
        let mut summary = RollingSummary::new(1_000);
        let section = SectionInput::new("s1", 0, "The unit shall boot.");

        let result = ctl.process(&actor_critic(), &section, &mut summary).await;

        assert!(!result.failed);
        assert_eq!(result.stages.len(), 2);
        assert_eq!(result.stage("extract").unwrap().agent_outputs().len(), 2);
        assert_eq!(result.procedures.len(), 2);
        assert!(result.annotations.is_empty());
        assert_eq!(summary.render(), "[s1] TP-1: Boot; TP-2: Halt");

        let critic_prompt = &client.prompt_of("critic")[0];
        assert!(critic_prompt.contains("### a1\nreq one"));
        assert!(critic_prompt.contains("### a2\nreq two"));
    }

    #[tokio::test]
    async fn partial_actor_failure_is_annotated() {
        let client = Arc::new(Canned::default().reply("a1", "req one").reply("critic", PROCEDURES));
        let ctl = controller(client);
        let mut summary = RollingSummary::new(1_000);

        let result = ctl
            .process(&actor_critic(), &SectionInput::new("s1", 0, "x"), &mut summary)
            .await;

        assert!(!result.failed);
        assert_eq!(result.stage("extract").unwrap().status, StageStatus::Partial);
        assert_eq!(result.annotations.len(), 1);
        assert!(result.annotations[0].contains("stage 'extract' partial: agent a2 failed"));
    }

    #[tokio::test]
    async fn every_stage_failing_marks_section_failed() {
        let client = Arc::new(Canned::default().reply("critic", PROCEDURES));
        let ctl = controller(client.clone());
        let mut summary = RollingSummary::new(1_000);

        let result = ctl
            .process(&actor_critic(), &SectionInput::new("s1", 0, "x"), &mut summary)
            .await;

        assert!(result.failed);
        assert_eq!(result.failure.as_deref(), Some("all 2 stages failed"));
        let review = result.stage("review").unwrap();
        assert_eq!(review.failure.as_deref(), Some("upstream stage 'extract' unavailable"));
        assert!(client.prompt_of("critic").is_empty());
        assert!(summary.is_empty());
    }

    #[tokio::test]
    async fn unstructured_synthesis_kept_raw() {
        let client = Arc::new(
            Canned::default()
                .reply("a1", "one")
                .reply("a2", "two")
                .reply("critic", "Looks fine overall."),
        );
        let ctl = controller(client);
        let mut summary = RollingSummary::new(1_000);

        let result = ctl
            .process(&actor_critic(), &SectionInput::new("s1", 0, "x"), &mut summary)
            .await;

        assert!(result.procedures.is_empty());
        assert_eq!(result.synthesized.as_deref(), Some("Looks fine overall."));
        assert!(result.annotations[0].contains("not structured"));
        assert_eq!(summary.render(), "[s1] Looks fine overall.");
    }

    #[tokio::test]
    async fn cross_section_notes_see_rolling_summary() {
        let mut stages = actor_critic().stages;
        stages.push(ResolvedStage {
            name: "cross".into(),
            mode: ExecutionMode::Parallel,
            agents: vec![
                agent("contra", AgentRole::Contradiction, "{{rolling_summary}} | {{stage.review}}"),
                agent("gaps", AgentRole::GapAnalysis, "{{rolling_summary}}"),
            ],
        });
        let pipeline = pipeline(stages);
        let client = Arc::new(
            Canned::default()
                .reply("a1", "one")
                .reply("a2", "two")
                .reply("critic", PROCEDURES)
                .reply("contra", "TP-1 contradicts 2.1")
                .reply("gaps", "REQ-3 uncovered"),
        );
        let ctl = controller(client.clone());
        let mut summary = RollingSummary::new(1_000);

        let first = ctl
            .process(&pipeline, &SectionInput::new("s1", 0, "x"), &mut summary)
            .await;
        let second = ctl
            .process(&pipeline, &SectionInput::new("s2", 1, "y"), &mut summary)
            .await;

        assert_eq!(first.contradiction_notes, vec!["TP-1 contradicts 2.1".to_string()]);
        assert_eq!(second.gap_notes, vec!["REQ-3 uncovered".to_string()]);
        // Synthesis still comes from the critic stage, not the later one
        assert_eq!(second.procedures.len(), 2);

        let contra = client.prompt_of("contra");
        assert!(contra[0].starts_with(" | "));
        assert!(contra[1].starts_with("[s1] TP-1: Boot"));
    }

    #[tokio::test]
    async fn sequential_refinement_without_critic() {
        let pipeline = pipeline(vec![ResolvedStage {
            name: "draft".into(),
            mode: ExecutionMode::Sequential,
            agents: vec![
                agent("writer", AgentRole::Actor, "{{section_text}}"),
                agent("editor", AgentRole::Other, "{{input}}"),
            ],
        }]);
        let client = Arc::new(
            Canned::default()
                .reply("writer", "draft")
                .reply("editor", r#"{"procedures": [{"id": "TP-9", "title": "Edit"}], "dependencies": ["PSU"]}"#),
        );
        let ctl = controller(client.clone());
        let mut summary = RollingSummary::new(1_000);

        let result = ctl
            .process(&pipeline, &SectionInput::new("s1", 0, "x"), &mut summary)
            .await;

        assert_eq!(client.prompt_of("editor"), vec!["draft".to_string()]);
        assert_eq!(result.procedures[0].id, "TP-9");
        assert_eq!(result.dependencies, vec!["PSU".to_string()]);
        assert_eq!(result.to_plan_section().procedures.len(), 1);
    }
}
