//! Token budget law
//!
//! For a parallel actor stage of N agents capped at B output tokens, the
//! critic's rendered input never exceeds N·B plus the section source plus
//! the fixed template overhead.

use async_trait::async_trait;
use plansmith_core::stage::output_heading;
use plansmith_core::template::strip_placeholders;
use plansmith_core::types::estimate_tokens;
use plansmith_core::{
    AgentDefinition, AgentId, AgentInvoker, AgentRole, EngineConfig, ExecutionMode, ModelClient,
    ModelError, ModelRequest, ModelResponse, ResolvedPipeline, ResolvedStage, RollingSummary,
    SectionInput, SectionPipelineController, StageExecutor,
};
use proptest::prelude::*;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

const CRITIC_TEMPLATE: &str = "Section:\n{{section_text}}\n\nCandidates:\n{{previous}}\n\nReturn JSON.";

/// Actors answer with a fixed number of characters, ignoring their budget
struct Verbose {
    lengths: HashMap<String, usize>,
    critic_input: Mutex<Option<(String, String)>>,
}

#[async_trait]
impl ModelClient for Verbose {
    async fn complete(&self, request: ModelRequest) -> Result<ModelResponse, ModelError> {
        if request.agent_id.as_str() == "critic" {
            *self.critic_input.lock().unwrap() = Some((request.system, request.user));
            return Ok(ModelResponse::new("[]"));
        }
        let len = self.lengths.get(request.agent_id.as_str()).copied().unwrap_or(0);
        Ok(ModelResponse::new("x".repeat(len)))
    }
}

fn actor_ids(n: usize) -> Vec<String> {
    (0..n).map(|i| format!("actor-{i}")).collect()
}

fn pipeline(ids: &[String], budget: usize) -> ResolvedPipeline {
    ResolvedPipeline {
        id: "law".into(),
        name: "Law".into(),
        stages: vec![
            ResolvedStage {
                name: "extract".into(),
                mode: ExecutionMode::Parallel,
                agents: ids
                    .iter()
                    .map(|id| {
                        Arc::new(AgentDefinition::new(
                            id.as_str(),
                            AgentRole::Actor,
                            "m",
                            "{{section_text}}",
                            budget,
                        ))
                    })
                    .collect(),
            },
            ResolvedStage {
                name: "review".into(),
                mode: ExecutionMode::Parallel,
                agents: vec![Arc::new(AgentDefinition::new(
                    "critic",
                    AgentRole::Critic,
                    "m",
                    CRITIC_TEMPLATE,
                    4_096,
                ))],
            },
        ],
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(48))]

    #[test]
    fn critic_input_is_bounded(
        budget in 1usize..64,
        lengths in proptest::collection::vec(0usize..600, 1..6),
        source in "[a-z .]{0,300}",
    ) {
        let config = EngineConfig::default();
        let cpt = config.chars_per_token;
        let ids = actor_ids(lengths.len());
        let client = Arc::new(Verbose {
            lengths: ids.iter().cloned().zip(lengths.iter().copied()).collect(),
            critic_input: Mutex::new(None),
        });
        let controller = SectionPipelineController::new(StageExecutor::new(
            AgentInvoker::new(client.clone(), &config),
            config.clone(),
        ));

        let section = SectionInput::new("1.1", 0, source.clone());
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap();
        let result = runtime.block_on(async {
            let mut summary = RollingSummary::new(config.rolling_summary_max_chars);
            controller.process(&pipeline(&ids, budget), &section, &mut summary).await
        });
        prop_assert!(!result.failed);

        let (system, user) = client.critic_input.lock().unwrap().clone().unwrap();
        let rendered = estimate_tokens(&system, cpt) + estimate_tokens(&user, cpt);

        let n = ids.len();
        let headings: usize = if n > 1 {
            ids.iter()
                .map(|id| output_heading(&AgentId::new(id.as_str())).chars().count())
                .sum::<usize>()
                + 2 * (n - 1)
        } else {
            0
        };
        let overhead = strip_placeholders(CRITIC_TEMPLATE).chars().count() + headings;
        let bound = n * budget + estimate_tokens(&source, cpt) + overhead.div_ceil(cpt);

        prop_assert!(rendered <= bound, "rendered {} > bound {}", rendered, bound);

        let extract = result.stage("extract").unwrap();
        for output in extract.agent_outputs() {
            prop_assert!(output.usage.output <= budget);
        }
    }
}
