//! Error types for the pipeline engine
//!
//! Covers:
//! - Invalid agent/pipeline definitions (fatal at submission)
//! - Per-agent invocation failures (contained at the stage)
//! - Stage failures (contained at the section)
//! - Engine configuration problems

use crate::types::{AgentId, PipelineId};

/// Invalid pipeline or agent reference
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigurationError {
    /// Pipeline id not registered
    #[error("pipeline not found: {0}")]
    PipelineNotFound(PipelineId),

    /// Agent id not registered
    #[error("agent not found: {agent} (stage '{stage}')")]
    AgentNotFound {
        /// Missing agent
        agent: AgentId,
        /// Stage referencing it
        stage: String,
    },

    /// Agent exists but is deactivated
    #[error("agent inactive: {agent} (stage '{stage}')")]
    AgentInactive {
        /// Inactive agent
        agent: AgentId,
        /// Stage referencing it
        stage: String,
    },

    /// Pipeline with no stages
    #[error("pipeline {0} has no stages")]
    NoStages(PipelineId),

    /// Stage with no agents
    #[error("stage '{0}' has no agents")]
    EmptyStage(String),

    /// Two stages share a name
    #[error("duplicate stage name: {0}")]
    DuplicateStage(String),

    /// An agent listed twice in one stage
    #[error("agent {agent} listed twice in stage '{stage}'")]
    DuplicateAgent {
        /// Repeated agent
        agent: AgentId,
        /// Stage listing it
        stage: String,
    },

    /// Template refers to an artifact that cannot exist at that point
    #[error("agent {agent}: invalid placeholder '{placeholder}': {reason}")]
    InvalidPlaceholder {
        /// Agent owning the template
        agent: AgentId,
        /// Offending placeholder
        placeholder: String,
        /// Why it is rejected
        reason: String,
    },

    /// Declared output schema does not compile
    #[error("agent {agent}: invalid output schema: {reason}")]
    InvalidSchema {
        /// Agent declaring the schema
        agent: AgentId,
        /// Compiler message
        reason: String,
    },

    /// Agent still used by a pipeline
    #[error("agent {agent} is referenced by pipeline {pipeline}")]
    AgentInUse {
        /// Agent to delete
        agent: AgentId,
        /// Referencing pipeline
        pipeline: PipelineId,
    },

    /// More than one pipeline flagged default
    #[error("multiple default pipelines: {0:?}")]
    MultipleDefaults(Vec<PipelineId>),

    /// Definition document could not be parsed
    #[error("definition document: {0}")]
    Document(String),
}

/// Failure reported by the model-invocation collaborator
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ModelError {
    /// Provider reported the prompt exceeded the context window
    #[error("context window exceeded: {0}")]
    ContextOverflow(String),

    /// Provider did not answer
    #[error("provider timed out")]
    Timeout,

    /// Any other provider or transport failure
    #[error("provider unavailable: {0}")]
    Unavailable(String),
}

/// Classified per-agent invocation failure
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum InvocationError {
    /// Provider did not respond in time
    #[error("invocation timed out after {timeout_ms}ms")]
    InvocationTimeout {
        /// Applied timeout
        timeout_ms: u64,
    },

    /// Input exceeds the model context window
    #[error("context overflow: {detail}")]
    ContextOverflow {
        /// Required vs. available tokens, or provider message
        detail: String,
    },

    /// Structured output requested but not well-formed
    #[error("schema validation failed: {}", .messages.join("; "))]
    SchemaValidationError {
        /// Validator messages
        messages: Vec<String>,
    },

    /// Other provider failure
    #[error("model unavailable: {0}")]
    ModelUnavailable(String),
}

impl InvocationError {
    /// Short classification tag, used for annotations and metric labels
    #[inline]
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::InvocationTimeout { .. } => "timeout",
            Self::ContextOverflow { .. } => "context_overflow",
            Self::SchemaValidationError { .. } => "schema_validation",
            Self::ModelUnavailable(_) => "model_unavailable",
        }
    }

    /// Whether an external retry layer may reasonably retry
    #[inline]
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::InvocationTimeout { .. } | Self::ModelUnavailable(_)
        )
    }
}

impl From<ModelError> for InvocationError {
    fn from(err: ModelError) -> Self {
        match err {
            ModelError::ContextOverflow(detail) => Self::ContextOverflow { detail },
            ModelError::Timeout => Self::InvocationTimeout { timeout_ms: 0 },
            ModelError::Unavailable(msg) => Self::ModelUnavailable(msg),
        }
    }
}

/// Stage-level failure, contained by the section controller
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StageFailure {
    /// Every parallel agent failed
    #[error("all {0} agents failed")]
    AllAgentsFailed(usize),

    /// A sequential link failed; later agents never ran
    #[error("sequential chain broken at {agent}: {error}")]
    ChainBroken {
        /// Failing agent
        agent: AgentId,
        /// Its classified failure
        error: InvocationError,
    },

    /// Required upstream artifact is missing
    #[error("upstream stage '{0}' unavailable")]
    UpstreamUnavailable(String),
}

/// Engine configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Could not read the config file
    #[error("cannot read config: {0}")]
    Io(#[from] std::io::Error),

    /// TOML syntax or type error
    #[error("cannot parse config: {0}")]
    Parse(#[from] toml::de::Error),

    /// Semantically invalid value
    #[error("invalid config value for {field}: {reason}")]
    Invalid {
        /// Field name
        field: &'static str,
        /// Why it is invalid
        reason: String,
    },
}
