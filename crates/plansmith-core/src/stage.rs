//! Stage execution
//!
//! Runs every agent of one stage per the stage's [`ExecutionMode`]:
//! - `Parallel`: all agents concurrently on identical input, bounded by the
//!   fan-out cap; succeeds if at least one agent succeeds
//! - `Sequential`: declared order, each output threaded into the next
//!   agent's `{{input}}`; the first failure fails the stage

use crate::config::EngineConfig;
use crate::definitions::{AgentDefinition, ResolvedStage};
use crate::error::{InvocationError, StageFailure};
use crate::invoker::{AgentInvoker, AgentOutput, RenderedPrompt, TokenUsage};
use crate::template::{render, TemplateContext};
use crate::types::{AgentId, ExecutionMode};
use futures::stream::{self, StreamExt};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;

/// Outcome classification of a stage
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageStatus {
    /// Every agent succeeded
    Succeeded,
    /// At least one agent succeeded, at least one failed
    Partial,
    /// No usable output
    Failed,
}

/// Recorded per-agent failure
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentFailure {
    /// Failing agent
    pub agent_id: AgentId,
    /// Classification tag
    pub kind: String,
    /// Human-readable message
    pub message: String,
}

impl AgentFailure {
    fn from_error(agent_id: AgentId, err: &InvocationError) -> Self {
        Self {
            agent_id,
            kind: err.kind().to_string(),
            message: err.to_string(),
        }
    }
}

/// Mode-specific outputs of a stage
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum StageOutputs {
    /// Successful outputs keyed by agent; siblings carry no order
    Parallel {
        /// Outputs by agent id
        outputs: BTreeMap<AgentId, AgentOutput>,
    },
    /// Final output of the chain
    Sequential {
        /// Last agent's output when the chain completed
        output: Option<AgentOutput>,
        /// Agents that completed, in order
        completed: Vec<AgentId>,
    },
}

/// Result of one stage for one section
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageResult {
    /// Stage name
    pub name: String,
    /// Outcome
    pub status: StageStatus,
    /// Agent outputs
    pub outputs: StageOutputs,
    /// Agent failures, recorded as annotations
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub failures: Vec<AgentFailure>,
    /// Stage-level failure message
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure: Option<String>,
    /// Merged text handed to later stages
    pub merged: String,
    /// Summed token estimate
    pub usage: TokenUsage,
}

impl StageResult {
    /// Failed stage that produced nothing
    #[must_use]
    pub fn failed(name: impl Into<String>, mode: ExecutionMode, failure: &StageFailure) -> Self {
        let outputs = match mode {
            ExecutionMode::Parallel => StageOutputs::Parallel {
                outputs: BTreeMap::new(),
            },
            ExecutionMode::Sequential => StageOutputs::Sequential {
                output: None,
                completed: Vec::new(),
            },
        };
        Self {
            name: name.into(),
            status: StageStatus::Failed,
            outputs,
            failures: Vec::new(),
            failure: Some(failure.to_string()),
            merged: String::new(),
            usage: TokenUsage::default(),
        }
    }

    /// Whether later stages can consume this stage's output
    #[inline]
    #[must_use]
    pub fn is_usable(&self) -> bool {
        self.status != StageStatus::Failed
    }

    /// Successful outputs; parallel outputs in agent-id order
    #[must_use]
    pub fn agent_outputs(&self) -> Vec<&AgentOutput> {
        match &self.outputs {
            StageOutputs::Parallel { outputs } => outputs.values().collect(),
            StageOutputs::Sequential { output, .. } => output.iter().collect(),
        }
    }

    /// Output of a specific agent
    #[must_use]
    pub fn output_of(&self, agent: &AgentId) -> Option<&AgentOutput> {
        match &self.outputs {
            StageOutputs::Parallel { outputs } => outputs.get(agent),
            StageOutputs::Sequential { output, .. } => {
                output.as_ref().filter(|o| &o.agent_id == agent)
            }
        }
    }
}

/// Executes stages against an [`AgentInvoker`]
#[derive(Debug, Clone)]
pub struct StageExecutor {
    invoker: AgentInvoker,
    config: EngineConfig,
}

impl StageExecutor {
    /// Create new stage executor
    #[inline]
    #[must_use]
    pub fn new(invoker: AgentInvoker, config: EngineConfig) -> Self {
        Self { invoker, config }
    }

    /// Underlying invoker
    #[inline]
    #[must_use]
    pub fn invoker(&self) -> &AgentInvoker {
        &self.invoker
    }

    /// Run one stage; failures are contained in the returned result
    pub async fn execute(&self, stage: &ResolvedStage, ctx: &TemplateContext<'_>) -> StageResult {
        tracing::debug!(
            stage = %stage.name,
            mode = ?stage.mode,
            agents = stage.agents.len(),
            "executing stage"
        );
        let result = match stage.mode {
            ExecutionMode::Parallel => self.execute_parallel(stage, ctx).await,
            ExecutionMode::Sequential => self.execute_sequential(stage, ctx).await,
        };
        match result.status {
            StageStatus::Succeeded => {
                tracing::debug!(stage = %stage.name, tokens = result.usage.total(), "stage succeeded");
            }
            StageStatus::Partial => tracing::warn!(
                stage = %stage.name,
                failed = result.failures.len(),
                "stage succeeded partially"
            ),
            StageStatus::Failed => tracing::warn!(
                stage = %stage.name,
                reason = result.failure.as_deref().unwrap_or_default(),
                "stage failed"
            ),
        }
        result
    }

    async fn execute_parallel(&self, stage: &ResolvedStage, ctx: &TemplateContext<'_>) -> StageResult {
        let fan_out = self.config.fan_out_for(stage.agents.len());

        let results: Vec<(Arc<AgentDefinition>, Result<AgentOutput, InvocationError>)> =
            stream::iter(stage.agents.iter().cloned())
                .map(|agent| {
                    let prompt = render_prompt(&agent, ctx);
                    async move {
                        let result = self.invoker.invoke(&agent, prompt).await;
                        (agent, result)
                    }
                })
                .buffer_unordered(fan_out)
                .collect()
                .await;

        let mut outputs = BTreeMap::new();
        let mut failures = Vec::new();
        let mut usage = TokenUsage::default();
        for (agent, result) in results {
            match result {
                Ok(output) => {
                    usage += output.usage;
                    outputs.insert(agent.id.clone(), output);
                }
                Err(err) => failures.push(AgentFailure::from_error(agent.id.clone(), &err)),
            }
        }

        let status = if outputs.is_empty() {
            StageStatus::Failed
        } else if failures.is_empty() {
            StageStatus::Succeeded
        } else {
            StageStatus::Partial
        };
        let failure = (status == StageStatus::Failed)
            .then(|| StageFailure::AllAgentsFailed(stage.agents.len()).to_string());

        // Declared order keeps renders deterministic
        let ordered: Vec<&AgentOutput> = stage
            .agents
            .iter()
            .filter_map(|a| outputs.get(&a.id))
            .collect();
        let merged = merge_outputs(&ordered);

        StageResult {
            name: stage.name.clone(),
            status,
            outputs: StageOutputs::Parallel { outputs },
            failures,
            failure,
            merged,
            usage,
        }
    }

    async fn execute_sequential(&self, stage: &ResolvedStage, ctx: &TemplateContext<'_>) -> StageResult {
        let mut chain_input: Option<String> = None;
        let mut completed = Vec::new();
        let mut usage = TokenUsage::default();
        let mut last: Option<AgentOutput> = None;

        for agent in &stage.agents {
            let link_ctx = TemplateContext {
                input: chain_input.as_deref().or(ctx.input),
                ..*ctx
            };
            let prompt = render_prompt(agent, &link_ctx);

            match self.invoker.invoke(agent, prompt).await {
                Ok(output) => {
                    usage += output.usage;
                    completed.push(agent.id.clone());
                    chain_input = Some(output.text.clone());
                    last = Some(output);
                }
                Err(err) => {
                    let failure = StageFailure::ChainBroken {
                        agent: agent.id.clone(),
                        error: err.clone(),
                    };
                    return StageResult {
                        name: stage.name.clone(),
                        status: StageStatus::Failed,
                        outputs: StageOutputs::Sequential {
                            output: None,
                            completed,
                        },
                        failures: vec![AgentFailure::from_error(agent.id.clone(), &err)],
                        failure: Some(failure.to_string()),
                        merged: String::new(),
                        usage,
                    };
                }
            }
        }

        let merged = last.as_ref().map(|o| o.text.clone()).unwrap_or_default();
        StageResult {
            name: stage.name.clone(),
            status: StageStatus::Succeeded,
            outputs: StageOutputs::Sequential {
                output: last,
                completed,
            },
            failures: Vec::new(),
            failure: None,
            merged,
            usage,
        }
    }
}

fn render_prompt(agent: &AgentDefinition, ctx: &TemplateContext<'_>) -> RenderedPrompt {
    RenderedPrompt {
        system: render(&agent.system_prompt, ctx),
        user: render(&agent.user_prompt, ctx),
    }
}

/// Heading placed before each sibling output in a merged parallel stage
#[must_use]
pub fn output_heading(agent: &AgentId) -> String {
    format!("### {agent}\n")
}

fn merge_outputs(outputs: &[&AgentOutput]) -> String {
    match outputs {
        [] => String::new(),
        [single] => single.text.clone(),
        many => many
            .iter()
            .map(|o| format!("{}{}", output_heading(&o.agent_id), o.text))
            .collect::<Vec<_>>()
            .join("\n\n"),
    }
}
