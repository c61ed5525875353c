//! Agent and pipeline definition registry
//!
//! Provides [`DefinitionRegistry`], CRUD over agent and pipeline definitions
//! with referential validation on write. Pipelines are snapshotted into a
//! [`ResolvedPipeline`] when a job is submitted.

use crate::definitions::{
    AgentDefinition, PipelineDefinition, ResolvedPipeline, ResolvedStage,
};
use crate::error::ConfigurationError;
use crate::template::Placeholder;
use crate::types::{AgentId, PipelineId};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;

/// On-disk form of a registry
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RegistryDocument {
    /// Agent definitions
    #[serde(default)]
    pub agents: Vec<AgentDefinition>,
    /// Pipeline definitions
    #[serde(default)]
    pub pipelines: Vec<PipelineDefinition>,
}

/// Catalog of agent and pipeline definitions
#[derive(Debug, Default, Clone)]
pub struct DefinitionRegistry {
    agents: BTreeMap<AgentId, AgentDefinition>,
    pipelines: BTreeMap<PipelineId, PipelineDefinition>,
}

impl DefinitionRegistry {
    /// Create empty registry
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Build from a document; agents are registered before pipelines
    ///
    /// # Errors
    /// First validation failure encountered.
    pub fn from_document(doc: RegistryDocument) -> Result<Self, ConfigurationError> {
        let mut registry = Self::new();
        for agent in doc.agents {
            registry.upsert_agent(agent)?;
        }
        for pipeline in doc.pipelines {
            registry.upsert_pipeline(pipeline)?;
        }
        Ok(registry)
    }

    /// Parse a YAML document
    ///
    /// # Errors
    /// `Document` on syntax errors, otherwise validation failures.
    pub fn from_yaml_str(raw: &str) -> Result<Self, ConfigurationError> {
        let doc: RegistryDocument =
            serde_yaml::from_str(raw).map_err(|e| ConfigurationError::Document(e.to_string()))?;
        Self::from_document(doc)
    }

    /// Load a YAML file
    ///
    /// # Errors
    /// `Document` on I/O or syntax errors, otherwise validation failures.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigurationError> {
        let raw = std::fs::read_to_string(path.as_ref()).map_err(|e| {
            ConfigurationError::Document(format!("{}: {e}", path.as_ref().display()))
        })?;
        Self::from_yaml_str(&raw)
    }

    /// Snapshot as a document
    #[must_use]
    pub fn to_document(&self) -> RegistryDocument {
        RegistryDocument {
            agents: self.agents.values().cloned().collect(),
            pipelines: self.pipelines.values().cloned().collect(),
        }
    }

    // ---- agents ----

    /// Insert or replace an agent definition
    ///
    /// # Errors
    /// `InvalidPlaceholder` or `InvalidSchema`.
    pub fn upsert_agent(&mut self, agent: AgentDefinition) -> Result<(), ConfigurationError> {
        agent.validate()?;
        tracing::debug!(agent = %agent.id, role = %agent.role, "registering agent");
        self.agents.insert(agent.id.clone(), agent);
        Ok(())
    }

    /// Look up an agent
    #[inline]
    #[must_use]
    pub fn agent(&self, id: &AgentId) -> Option<&AgentDefinition> {
        self.agents.get(id)
    }

    /// All agents in id order
    pub fn agents(&self) -> impl Iterator<Item = &AgentDefinition> {
        self.agents.values()
    }

    /// Flip an agent's active flag
    ///
    /// Pipelines referencing a deactivated agent stay stored but can no
    /// longer be resolved.
    pub fn set_agent_active(&mut self, id: &AgentId, active: bool) -> bool {
        match self.agents.get_mut(id) {
            Some(agent) => {
                agent.active = active;
                true
            }
            None => false,
        }
    }

    /// Remove an agent no pipeline references
    ///
    /// # Errors
    /// `AgentInUse` naming the first referencing pipeline.
    pub fn remove_agent(&mut self, id: &AgentId) -> Result<Option<AgentDefinition>, ConfigurationError> {
        if let Some(pipeline) = self.pipelines.values().find(|p| p.references(id)) {
            return Err(ConfigurationError::AgentInUse {
                agent: id.clone(),
                pipeline: pipeline.id.clone(),
            });
        }
        Ok(self.agents.remove(id))
    }

    // ---- pipelines ----

    /// Insert or replace a pipeline after validating its references
    ///
    /// # Errors
    /// Any [`ConfigurationError`] from [`Self::validate_pipeline`].
    pub fn upsert_pipeline(&mut self, pipeline: PipelineDefinition) -> Result<(), ConfigurationError> {
        self.validate_pipeline(&pipeline)?;
        tracing::debug!(
            pipeline = %pipeline.id,
            stages = pipeline.stages.len(),
            "registering pipeline"
        );
        self.pipelines.insert(pipeline.id.clone(), pipeline);
        Ok(())
    }

    /// Look up a pipeline
    #[inline]
    #[must_use]
    pub fn pipeline(&self, id: &PipelineId) -> Option<&PipelineDefinition> {
        self.pipelines.get(id)
    }

    /// All pipelines in id order
    pub fn pipelines(&self) -> impl Iterator<Item = &PipelineDefinition> {
        self.pipelines.values()
    }

    /// Remove a pipeline
    #[inline]
    pub fn remove_pipeline(&mut self, id: &PipelineId) -> Option<PipelineDefinition> {
        self.pipelines.remove(id)
    }

    /// First pipeline flagged default
    ///
    /// Uniqueness is not enforced here; see [`Self::ensure_single_default`].
    #[must_use]
    pub fn default_pipeline(&self) -> Option<&PipelineDefinition> {
        self.pipelines.values().find(|p| p.is_default)
    }

    /// Check that at most one pipeline is flagged default
    ///
    /// # Errors
    /// `MultipleDefaults` listing every flagged pipeline.
    pub fn ensure_single_default(&self) -> Result<(), ConfigurationError> {
        let defaults: Vec<PipelineId> = self
            .pipelines
            .values()
            .filter(|p| p.is_default)
            .map(|p| p.id.clone())
            .collect();
        if defaults.len() > 1 {
            return Err(ConfigurationError::MultipleDefaults(defaults));
        }
        Ok(())
    }

    /// Number of registered pipelines
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.pipelines.len()
    }

    /// Whether no pipeline is registered
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.pipelines.is_empty()
    }

    /// Full referential validation of a pipeline against this registry
    ///
    /// # Errors
    /// - `NoStages`, `EmptyStage`, `DuplicateStage` for shape problems
    /// - `AgentNotFound` / `AgentInactive` for dangling references
    /// - `InvalidPlaceholder` when a template reads a stage that is not
    ///   declared earlier, or reads `previous` (or `input` outside a chain
    ///   link) from the first stage
    pub fn validate_pipeline(&self, pipeline: &PipelineDefinition) -> Result<(), ConfigurationError> {
        pipeline.validate_shape()?;

        for (position, stage) in pipeline.stages.iter().enumerate() {
            let earlier: Vec<&str> = pipeline.stages[..position]
                .iter()
                .map(|s| s.name.as_str())
                .collect();

            for (link, agent_id) in stage.agents.iter().enumerate() {
                let agent = self.agents.get(agent_id).ok_or_else(|| {
                    ConfigurationError::AgentNotFound {
                        agent: agent_id.clone(),
                        stage: stage.name.clone(),
                    }
                })?;
                if !agent.active {
                    return Err(ConfigurationError::AgentInactive {
                        agent: agent_id.clone(),
                        stage: stage.name.clone(),
                    });
                }

                for placeholder in agent.placeholders()? {
                    match &placeholder {
                        Placeholder::Previous if position == 0 => {
                            return Err(ConfigurationError::InvalidPlaceholder {
                                agent: agent_id.clone(),
                                placeholder: "previous".to_string(),
                                reason: format!("stage '{}' is the first stage", stage.name),
                            });
                        }
                        Placeholder::Input if position == 0 && stage.mode.input_is_stage_input(link) => {
                            return Err(ConfigurationError::InvalidPlaceholder {
                                agent: agent_id.clone(),
                                placeholder: "input".to_string(),
                                reason: format!("stage '{}' is the first stage and has no input", stage.name),
                            });
                        }
                        Placeholder::Stage(name) if !earlier.contains(&name.as_str()) => {
                            return Err(ConfigurationError::InvalidPlaceholder {
                                agent: agent_id.clone(),
                                placeholder: format!("stage.{name}"),
                                reason: format!(
                                    "no stage named '{name}' precedes '{}'",
                                    stage.name
                                ),
                            });
                        }
                        _ => {}
                    }
                }
            }
        }
        Ok(())
    }

    /// Validate and snapshot a pipeline for execution
    ///
    /// # Errors
    /// `PipelineNotFound`, or any validation failure.
    pub fn resolve(&self, id: &PipelineId) -> Result<ResolvedPipeline, ConfigurationError> {
        let pipeline = self
            .pipelines
            .get(id)
            .ok_or_else(|| ConfigurationError::PipelineNotFound(id.clone()))?;
        self.validate_pipeline(pipeline)?;

        let stages = pipeline
            .stages
            .iter()
            .map(|stage| ResolvedStage {
                name: stage.name.clone(),
                mode: stage.mode,
                agents: stage
                    .agents
                    .iter()
                    .filter_map(|a| self.agents.get(a))
                    .map(|a| Arc::new(a.clone()))
                    .collect(),
            })
            .collect();

        Ok(ResolvedPipeline {
            id: pipeline.id.clone(),
            name: pipeline.name.clone(),
            stages,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::definitions::StageDefinition;
    use crate::types::AgentRole;

    fn actor(id: &str) -> AgentDefinition {
        AgentDefinition::new(id, AgentRole::Actor, "small", "{{section_text}}", 128)
    }

    fn critic(id: &str) -> AgentDefinition {
        AgentDefinition::new(id, AgentRole::Critic, "large", "{{section_text}}\n{{previous}}", 512)
    }

    fn registry() -> DefinitionRegistry {
        let mut reg = DefinitionRegistry::new();
        reg.upsert_agent(actor("a1")).unwrap();
        reg.upsert_agent(actor("a2")).unwrap();
        reg.upsert_agent(critic("c1")).unwrap();
        reg
    }

    fn two_stage(id: &str) -> PipelineDefinition {
        PipelineDefinition::new(id, "Two stage")
            .with_stage(StageDefinition::parallel("extract", ["a1", "a2"]))
            .with_stage(StageDefinition::parallel("synthesize", ["c1"]))
    }

    #[test]
    fn upsert_and_resolve() {
        let mut reg = registry();
        reg.upsert_pipeline(two_stage("p")).unwrap();

        let resolved = reg.resolve(&PipelineId::new("p")).unwrap();
        assert_eq!(resolved.stages.len(), 2);
        assert_eq!(resolved.stages[0].agents.len(), 2);
        assert_eq!(resolved.stages[1].agents[0].id, AgentId::new("c1"));
    }

    #[test]
    fn dangling_agent_rejected_on_write() {
        let mut reg = registry();
        let pipeline = PipelineDefinition::new("p", "P")
            .with_stage(StageDefinition::parallel("extract", ["a1", "ghost"]));
        assert!(matches!(
            reg.upsert_pipeline(pipeline),
            Err(ConfigurationError::AgentNotFound { agent, .. }) if agent.as_str() == "ghost"
        ));
        assert!(reg.is_empty());
    }

    #[test]
    fn inactive_agent_rejected() {
        let mut reg = registry();
        reg.upsert_agent(actor("sleepy").inactive()).unwrap();
        let pipeline = PipelineDefinition::new("p", "P")
            .with_stage(StageDefinition::parallel("extract", ["sleepy"]));
        assert!(matches!(
            reg.upsert_pipeline(pipeline),
            Err(ConfigurationError::AgentInactive { .. })
        ));
    }

    #[test]
    fn deactivation_breaks_resolution() {
        let mut reg = registry();
        reg.upsert_pipeline(two_stage("p")).unwrap();
        assert!(reg.set_agent_active(&AgentId::new("a2"), false));

        assert!(matches!(
            reg.resolve(&PipelineId::new("p")),
            Err(ConfigurationError::AgentInactive { .. })
        ));
    }

    #[test]
    fn previous_in_first_stage_rejected() {
        let mut reg = registry();
        let pipeline =
            PipelineDefinition::new("p", "P").with_stage(StageDefinition::parallel("only", ["c1"]));
        assert!(matches!(
            reg.upsert_pipeline(pipeline),
            Err(ConfigurationError::InvalidPlaceholder { placeholder, .. }) if placeholder == "previous"
        ));
    }

    #[test]
    fn input_in_first_stage_rejected_outside_chain_links() {
        let mut reg = registry();
        reg.upsert_agent(AgentDefinition::new("refine", AgentRole::Other, "m", "Refine: {{input}}", 64))
            .unwrap();

        let head = PipelineDefinition::new("head", "Head")
            .with_stage(StageDefinition::sequential("draft", ["refine", "a1"]));
        assert!(matches!(
            reg.upsert_pipeline(head),
            Err(ConfigurationError::InvalidPlaceholder { placeholder, .. }) if placeholder == "input"
        ));

        let fanned = PipelineDefinition::new("fanned", "Fanned")
            .with_stage(StageDefinition::parallel("draft", ["a1", "refine"]));
        assert!(reg.upsert_pipeline(fanned).is_err());

        let chained = PipelineDefinition::new("chained", "Chained")
            .with_stage(StageDefinition::sequential("draft", ["a1", "refine"]));
        reg.upsert_pipeline(chained).unwrap();

        let later = PipelineDefinition::new("later", "Later")
            .with_stage(StageDefinition::parallel("extract", ["a1"]))
            .with_stage(StageDefinition::sequential("draft", ["refine"]));
        reg.upsert_pipeline(later).unwrap();
    }

    #[test]
    fn forward_stage_reference_rejected() {
        let mut reg = registry();
        reg.upsert_agent(AgentDefinition::new(
            "peek",
            AgentRole::Other,
            "m",
            "{{stage.synthesize}}",
            10,
        ))
        .unwrap();
        let pipeline = PipelineDefinition::new("p", "P")
            .with_stage(StageDefinition::parallel("extract", ["peek"]))
            .with_stage(StageDefinition::parallel("synthesize", ["c1"]));
        assert!(matches!(
            reg.upsert_pipeline(pipeline),
            Err(ConfigurationError::InvalidPlaceholder { .. })
        ));
    }

    #[test]
    fn referenced_agent_cannot_be_removed() {
        let mut reg = registry();
        reg.upsert_pipeline(two_stage("p")).unwrap();
        assert!(matches!(
            reg.remove_agent(&AgentId::new("c1")),
            Err(ConfigurationError::AgentInUse { .. })
        ));
        reg.remove_pipeline(&PipelineId::new("p"));
        assert!(reg.remove_agent(&AgentId::new("c1")).unwrap().is_some());
    }

    #[test]
    fn default_lookup_and_uniqueness() {
        let mut reg = registry();
        reg.upsert_pipeline(two_stage("p1")).unwrap();
        assert!(reg.default_pipeline().is_none());

        reg.upsert_pipeline(two_stage("p2").as_default()).unwrap();
        assert_eq!(reg.default_pipeline().unwrap().id, PipelineId::new("p2"));
        assert!(reg.ensure_single_default().is_ok());

        // Storage accepts a second default; the explicit check catches it
        reg.upsert_pipeline(two_stage("p3").as_default()).unwrap();
        assert!(matches!(
            reg.ensure_single_default(),
            Err(ConfigurationError::MultipleDefaults(ids)) if ids.len() == 2
        ));
    }

    #[test]
    fn yaml_document_loads() {
        let yaml = r#"
agents:
  - id: a1
    role: actor
    model: small
    user_prompt: "Extract requirements:\n{{section_text}}"
    max_output_tokens: 200
  - id: c1
    role: critic
    model: large
    user_prompt: "{{section_text}}\n{{stage.extract}}"
    max_output_tokens: 800
pipelines:
  - id: standard
    name: Standard
    is_default: true
    stages:
      - name: extract
        agents: [a1]
      - name: synthesize
        mode: sequential
        agents: [c1]
"#;
        let reg = DefinitionRegistry::from_yaml_str(yaml).unwrap();
        assert_eq!(reg.len(), 1);
        assert_eq!(reg.agents().count(), 2);
        assert!(reg.default_pipeline().is_some());
    }

    #[test]
    fn yaml_syntax_error_is_document_error() {
        assert!(matches!(
            DefinitionRegistry::from_yaml_str("agents: [unclosed"),
            Err(ConfigurationError::Document(_))
        ));
    }

    #[test]
    fn snapshot_is_isolated_from_later_edits() {
        let mut reg = registry();
        reg.upsert_pipeline(two_stage("p")).unwrap();
        let snapshot = reg.resolve(&PipelineId::new("p")).unwrap();

        let mut edited = actor("a1");
        edited.max_output_tokens = 9_999;
        reg.upsert_agent(edited).unwrap();

        assert_eq!(snapshot.stages[0].agents[0].max_output_tokens, 128);
    }
}
