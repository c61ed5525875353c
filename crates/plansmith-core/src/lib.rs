//! Plansmith Core - staged agent pipeline engine
//!
//! Turns ordered document sections into structured test procedures by
//! running each section through a configurable pipeline of model agents:
//! - Agent and pipeline definitions, loaded from YAML and resolved into
//!   immutable snapshots
//! - Agent invocation with timeouts, context-window pre-flight and
//!   structured-output validation
//! - Parallel and sequential stage execution with bounded fan-out
//! - Section control with a bounded cross-section rolling summary
//!
//! # Example
//!
//! ```rust,ignore
//! use plansmith_core::prelude::*;
//!
//! # async fn example(client: std::sync::Arc<dyn ModelClient>) -> Result<(), Box<dyn std::error::Error>> {
//! let registry = DefinitionRegistry::load("definitions.yaml")?;
//! let pipeline = registry.resolve(&PipelineId::new("standard"))?;
//!
//! let config = EngineConfig::default();
//! let executor = StageExecutor::new(AgentInvoker::new(client, &config), config.clone());
//! let controller = SectionPipelineController::new(executor);
//!
//! let mut summary = RollingSummary::new(config.rolling_summary_max_chars);
//! let section = SectionInput::new("3.1", 0, "The unit shall boot in 5 seconds.");
//! let result = controller.process(&pipeline, &section, &mut summary).await;
//! println!("{} procedures", result.procedures.len());
//! # Ok(())
//! # }
//! ```

#![warn(unreachable_pub)]

pub mod config;
pub mod definitions;
pub mod error;
pub mod invoker;
pub mod plan;
pub mod registry;
pub mod section;
pub mod stage;
pub mod summary;
pub mod template;
pub mod types;

pub use config::EngineConfig;
pub use definitions::{
    AgentDefinition, PipelineDefinition, ResolvedPipeline, ResolvedStage, StageDefinition,
};
pub use error::{ConfigError, ConfigurationError, InvocationError, ModelError, StageFailure};
pub use invoker::{
    AgentInvoker, AgentOutput, ModelClient, ModelRequest, ModelResponse, RenderedPrompt,
    TokenUsage,
};
pub use plan::{
    PlanDocument, PlanMetadata, PlanSection, PlanStatus, PlanTotals, SynthesisPayload,
    TestProcedure, TotalsTally,
};
pub use registry::{DefinitionRegistry, RegistryDocument};
pub use section::{SectionPipelineController, SectionResult};
pub use stage::{AgentFailure, StageExecutor, StageOutputs, StageResult, StageStatus};
pub use summary::RollingSummary;
pub use template::TemplateContext;
pub use types::{AgentId, AgentRole, ExecutionMode, PipelineId, SectionId, SectionInput};

/// Prelude module for common imports
pub mod prelude {
    //! Common imports for working with Plansmith Core
    pub use crate::{
        AgentDefinition, AgentInvoker, AgentRole, DefinitionRegistry, EngineConfig,
        ExecutionMode, ModelClient, PipelineDefinition, PipelineId, RollingSummary,
        SectionInput, SectionPipelineController, SectionResult, StageDefinition, StageExecutor,
    };
}

/// Version of this crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
