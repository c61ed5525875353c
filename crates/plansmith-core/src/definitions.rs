//! Agent and pipeline definitions
//!
//! Definitions are plain data. A [`PipelineDefinition`] is interpreted
//! generically: new stage roles are added by configuration, never by new code.

use crate::error::ConfigurationError;
use crate::template::{self, Placeholder};
use crate::types::{AgentId, AgentRole, ExecutionMode, PipelineId};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::Arc;

/// Role-specialized model configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentDefinition {
    /// Agent identifier
    pub id: AgentId,
    /// Role in the pipeline
    pub role: AgentRole,
    /// Model identifier passed to the provider
    pub model: String,
    /// System prompt template
    #[serde(default)]
    pub system_prompt: String,
    /// User prompt template
    pub user_prompt: String,
    /// Sampling temperature
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    /// Output-token budget
    pub max_output_tokens: usize,
    /// Deactivated agents cannot be referenced by pipelines
    #[serde(default = "default_active")]
    pub active: bool,
    /// JSON Schema the output must satisfy
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_schema: Option<serde_json::Value>,
    /// Model context window in tokens
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context_window: Option<usize>,
    /// Per-agent call timeout override
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_secs: Option<u64>,
    /// Free-form description
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

fn default_temperature() -> f32 {
    0.2
}

fn default_active() -> bool {
    true
}

impl AgentDefinition {
    /// Create new active agent definition
    #[must_use]
    pub fn new(
        id: impl Into<AgentId>,
        role: AgentRole,
        model: impl Into<String>,
        user_prompt: impl Into<String>,
        max_output_tokens: usize,
    ) -> Self {
        Self {
            id: id.into(),
            role,
            model: model.into(),
            system_prompt: String::new(),
            user_prompt: user_prompt.into(),
            temperature: default_temperature(),
            max_output_tokens,
            active: true,
            output_schema: None,
            context_window: None,
            timeout_secs: None,
            description: None,
        }
    }

    /// With system prompt
    #[inline]
    #[must_use]
    pub fn with_system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.system_prompt = prompt.into();
        self
    }

    /// With temperature
    #[inline]
    #[must_use]
    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }

    /// With JSON output schema
    #[inline]
    #[must_use]
    pub fn with_output_schema(mut self, schema: serde_json::Value) -> Self {
        self.output_schema = Some(schema);
        self
    }

    /// With context window
    #[inline]
    #[must_use]
    pub fn with_context_window(mut self, tokens: usize) -> Self {
        self.context_window = Some(tokens);
        self
    }

    /// With call timeout override
    #[inline]
    #[must_use]
    pub fn with_timeout_secs(mut self, secs: u64) -> Self {
        self.timeout_secs = Some(secs);
        self
    }

    /// Deactivated copy
    #[inline]
    #[must_use]
    pub fn inactive(mut self) -> Self {
        self.active = false;
        self
    }

    /// Placeholders used across both templates
    ///
    /// # Errors
    /// `InvalidPlaceholder` for an unknown name.
    pub fn placeholders(&self) -> Result<Vec<Placeholder>, ConfigurationError> {
        let mut all = Vec::new();
        for tpl in [&self.system_prompt, &self.user_prompt] {
            let found = template::scan(tpl).map_err(|name| ConfigurationError::InvalidPlaceholder {
                agent: self.id.clone(),
                placeholder: name,
                reason: "unknown placeholder".to_string(),
            })?;
            all.extend(found);
        }
        Ok(all)
    }

    /// Check the agent on its own: placeholders and schema
    ///
    /// # Errors
    /// `InvalidPlaceholder` or `InvalidSchema`.
    pub fn validate(&self) -> Result<(), ConfigurationError> {
        self.placeholders()?;
        if let Some(schema) = &self.output_schema {
            jsonschema::JSONSchema::compile(schema).map_err(|e| ConfigurationError::InvalidSchema {
                agent: self.id.clone(),
                reason: e.to_string(),
            })?;
        }
        Ok(())
    }
}

/// One step of a pipeline
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageDefinition {
    /// Stage name, unique within its pipeline
    pub name: String,
    /// Agents in declared order
    pub agents: Vec<AgentId>,
    /// Execution mode
    #[serde(default)]
    pub mode: ExecutionMode,
}

impl StageDefinition {
    /// Parallel stage
    #[must_use]
    pub fn parallel<I, A>(name: impl Into<String>, agents: I) -> Self
    where
        I: IntoIterator<Item = A>,
        A: Into<AgentId>,
    {
        Self {
            name: name.into(),
            agents: agents.into_iter().map(Into::into).collect(),
            mode: ExecutionMode::Parallel,
        }
    }

    /// Sequential stage
    #[must_use]
    pub fn sequential<I, A>(name: impl Into<String>, agents: I) -> Self
    where
        I: IntoIterator<Item = A>,
        A: Into<AgentId>,
    {
        Self {
            mode: ExecutionMode::Sequential,
            ..Self::parallel(name, agents)
        }
    }
}

/// Named, ordered list of stages
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PipelineDefinition {
    /// Pipeline identifier
    pub id: PipelineId,
    /// Display name
    pub name: String,
    /// Default pipeline flag
    #[serde(default)]
    pub is_default: bool,
    /// Ordered stages
    pub stages: Vec<StageDefinition>,
}

impl PipelineDefinition {
    /// Create new pipeline definition
    #[must_use]
    pub fn new(id: impl Into<PipelineId>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            is_default: false,
            stages: Vec::new(),
        }
    }

    /// Append a stage
    #[inline]
    #[must_use]
    pub fn with_stage(mut self, stage: StageDefinition) -> Self {
        self.stages.push(stage);
        self
    }

    /// Mark as default
    #[inline]
    #[must_use]
    pub fn as_default(mut self) -> Self {
        self.is_default = true;
        self
    }

    /// Whether any stage references `agent`
    #[must_use]
    pub fn references(&self, agent: &AgentId) -> bool {
        self.stages.iter().any(|s| s.agents.contains(agent))
    }

    /// Structural checks that need no agent lookup
    ///
    /// # Errors
    /// `NoStages`, `EmptyStage`, `DuplicateStage`, or `DuplicateAgent`.
    pub fn validate_shape(&self) -> Result<(), ConfigurationError> {
        if self.stages.is_empty() {
            return Err(ConfigurationError::NoStages(self.id.clone()));
        }
        let mut seen = HashSet::new();
        for stage in &self.stages {
            if stage.agents.is_empty() {
                return Err(ConfigurationError::EmptyStage(stage.name.clone()));
            }
            let mut agents = HashSet::new();
            if let Some(dup) = stage.agents.iter().find(|a| !agents.insert(*a)) {
                return Err(ConfigurationError::DuplicateAgent {
                    agent: dup.clone(),
                    stage: stage.name.clone(),
                });
            }
            if !seen.insert(stage.name.as_str()) {
                return Err(ConfigurationError::DuplicateStage(stage.name.clone()));
            }
        }
        Ok(())
    }
}

/// Stage with its agents resolved
#[derive(Debug, Clone)]
pub struct ResolvedStage {
    /// Stage name
    pub name: String,
    /// Execution mode
    pub mode: ExecutionMode,
    /// Agents in declared order
    pub agents: Vec<Arc<AgentDefinition>>,
}

impl ResolvedStage {
    /// Upstream stages this stage's templates read from
    ///
    /// `previous_stage` is the name of the preceding stage, if any.
    #[must_use]
    pub fn upstream_stages(&self, previous_stage: Option<&str>) -> Vec<String> {
        let mut names: Vec<String> = Vec::new();
        for (position, agent) in self.agents.iter().enumerate() {
            // Definitions are validated at resolve time
            let placeholders = agent.placeholders().unwrap_or_default();
            for placeholder in &placeholders {
                let upstream = match placeholder {
                    Placeholder::Input if self.mode.input_is_stage_input(position) => previous_stage,
                    other => other.upstream(previous_stage),
                };
                if let Some(name) = upstream {
                    if !names.iter().any(|n| n == name) {
                        names.push(name.to_string());
                    }
                }
            }
        }
        names
    }

    /// Whether any agent plays `role`
    #[must_use]
    pub fn has_role(&self, role: AgentRole) -> bool {
        self.agents.iter().any(|a| a.role == role)
    }
}

/// Immutable snapshot of a pipeline taken at submission
#[derive(Debug, Clone)]
pub struct ResolvedPipeline {
    /// Pipeline identifier
    pub id: PipelineId,
    /// Display name
    pub name: String,
    /// Ordered, resolved stages
    pub stages: Vec<ResolvedStage>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn agent_yaml_defaults() {
        let agent: AgentDefinition = serde_yaml::from_str(
            "id: extract-a\nrole: actor\nmodel: small\nuser_prompt: '{{section_text}}'\nmax_output_tokens: 256\n",
        )
        .unwrap();
        assert!(agent.active);
        assert_eq!(agent.system_prompt, "");
        assert!((agent.temperature - 0.2).abs() < f32::EPSILON);
    }

    #[test]
    fn agent_rejects_unknown_placeholder() {
        let agent = AgentDefinition::new("a", AgentRole::Actor, "m", "{{sectoin_text}}", 10);
        assert!(matches!(
            agent.validate(),
            Err(ConfigurationError::InvalidPlaceholder { .. })
        ));
    }

    #[test]
    fn agent_rejects_bad_schema() {
        let agent = AgentDefinition::new("a", AgentRole::Critic, "m", "{{previous}}", 10)
            .with_output_schema(serde_json::json!({ "type": 12 }));
        assert!(matches!(
            agent.validate(),
            Err(ConfigurationError::InvalidSchema { .. })
        ));
    }

    #[test]
    fn pipeline_shape_checks() {
        let empty = PipelineDefinition::new("p", "P");
        assert!(matches!(
            empty.validate_shape(),
            Err(ConfigurationError::NoStages(_))
        ));

        let dup = PipelineDefinition::new("p", "P")
            .with_stage(StageDefinition::parallel("s", ["a"]))
            .with_stage(StageDefinition::parallel("s", ["b"]));
        assert!(matches!(
            dup.validate_shape(),
            Err(ConfigurationError::DuplicateStage(name)) if name == "s"
        ));

        let twice = PipelineDefinition::new("p", "P")
            .with_stage(StageDefinition::parallel("s", ["a", "b", "a"]));
        assert!(matches!(
            twice.validate_shape(),
            Err(ConfigurationError::DuplicateAgent { agent, stage }) if agent.as_str() == "a" && stage == "s"
        ));

        let hollow = PipelineDefinition::new("p", "P")
            .with_stage(StageDefinition::parallel("s", Vec::<AgentId>::new()));
        assert!(matches!(
            hollow.validate_shape(),
            Err(ConfigurationError::EmptyStage(_))
        ));
    }

    #[test]
    fn stage_mode_defaults_to_parallel() {
        let stage: StageDefinition = serde_yaml::from_str("name: x\nagents: [a, b]\n").unwrap();
        assert_eq!(stage.mode, ExecutionMode::Parallel);
        assert_eq!(stage.agents.len(), 2);
    }

    #[test]
    fn upstream_stage_collection() {
        let critic = Arc::new(AgentDefinition::new(
            "c",
            AgentRole::Critic,
            "m",
            "{{previous}} {{stage.extract}} {{section_text}}",
            10,
        ));
        let stage = ResolvedStage {
            name: "review".into(),
            mode: ExecutionMode::Parallel,
            agents: vec![critic],
        };
        assert_eq!(stage.upstream_stages(Some("extract")), vec!["extract".to_string()]);
        assert!(stage.has_role(AgentRole::Critic));
    }

    #[test]
    fn chain_head_input_depends_on_previous_stage() {
        let refine = |id: &str| Arc::new(AgentDefinition::new(id, AgentRole::Other, "m", "Refine: {{input}}", 10));
        let head = ResolvedStage {
            name: "draft".into(),
            mode: ExecutionMode::Sequential,
            agents: vec![refine("w")],
        };
        assert_eq!(head.upstream_stages(Some("extract")), vec!["extract".to_string()]);

        let writer = Arc::new(AgentDefinition::new("w", AgentRole::Actor, "m", "{{section_text}}", 10));
        let link = ResolvedStage {
            name: "draft".into(),
            mode: ExecutionMode::Sequential,
            agents: vec![writer, refine("e")],
        };
        assert!(link.upstream_stages(Some("extract")).is_empty());

        let fanned = ResolvedStage {
            name: "draft".into(),
            mode: ExecutionMode::Parallel,
            agents: vec![refine("a"), refine("b")],
        };
        assert_eq!(fanned.upstream_stages(Some("extract")), vec!["extract".to_string()]);
    }
}
