//! Agent invocation
//!
//! [`AgentInvoker`] performs exactly one model call for one agent:
//! - pre-flight context-window check (overflow is surfaced, never truncated)
//! - per-call timeout
//! - output-token budget enforcement
//! - optional JSON Schema validation of structured output
//!
//! Failures are classified into [`InvocationError`] and never retried here.

use crate::config::EngineConfig;
use crate::definitions::AgentDefinition;
use crate::error::{InvocationError, ModelError};
use crate::types::{clip_chars, estimate_tokens, AgentId, AgentRole};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Request handed to the model-invocation collaborator
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ModelRequest {
    /// Calling agent
    pub agent_id: AgentId,
    /// Model identifier
    pub model: String,
    /// Rendered system prompt
    pub system: String,
    /// Rendered user prompt
    pub user: String,
    /// Sampling temperature
    pub temperature: f32,
    /// Output-token budget
    pub max_output_tokens: usize,
    /// Whether JSON output is expected
    pub json_output: bool,
}

/// Raw provider response
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ModelResponse {
    /// Response text
    pub text: String,
}

impl ModelResponse {
    /// Create from text
    #[inline]
    #[must_use]
    pub fn new(text: impl Into<String>) -> Self {
        Self { text: text.into() }
    }
}

/// Model-invocation collaborator
///
/// Authentication and rate limiting live behind this trait.
#[async_trait::async_trait]
pub trait ModelClient: Send + Sync {
    /// Perform one completion
    async fn complete(&self, request: ModelRequest) -> Result<ModelResponse, ModelError>;
}

/// Rendered system and user prompts
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct RenderedPrompt {
    /// System prompt
    pub system: String,
    /// User prompt
    pub user: String,
}

/// Token-usage estimate of one or more calls
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct TokenUsage {
    /// Estimated prompt tokens
    pub input: usize,
    /// Estimated output tokens
    pub output: usize,
}

impl TokenUsage {
    /// Sum of input and output
    #[inline]
    #[must_use]
    pub fn total(&self) -> usize {
        self.input + self.output
    }
}

impl std::ops::AddAssign for TokenUsage {
    fn add_assign(&mut self, rhs: Self) {
        self.input += rhs.input;
        self.output += rhs.output;
    }
}

/// Successful agent output
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentOutput {
    /// Producing agent
    pub agent_id: AgentId,
    /// Its role
    pub role: AgentRole,
    /// Response text, clipped to the output budget
    pub text: String,
    /// Validated JSON when the agent declares an output schema
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub structured: Option<serde_json::Value>,
    /// Token estimate
    pub usage: TokenUsage,
    /// Whether the text was clipped to the budget
    #[serde(default)]
    pub clipped: bool,
    /// Wall-clock duration of the call
    pub elapsed_ms: u64,
}

/// Performs single agent calls against a [`ModelClient`]
#[derive(Clone)]
pub struct AgentInvoker {
    client: Arc<dyn ModelClient>,
    default_timeout: Duration,
    chars_per_token: usize,
}

impl std::fmt::Debug for AgentInvoker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AgentInvoker")
            .field("default_timeout", &self.default_timeout)
            .field("chars_per_token", &self.chars_per_token)
            .finish_non_exhaustive()
    }
}

impl AgentInvoker {
    /// Create invoker using the engine's timeout and token settings
    #[must_use]
    pub fn new(client: Arc<dyn ModelClient>, config: &EngineConfig) -> Self {
        Self {
            client,
            default_timeout: config.call_timeout(),
            chars_per_token: config.chars_per_token.max(1),
        }
    }

    /// With a default timeout finer than the config's whole seconds
    #[inline]
    #[must_use]
    pub fn with_default_timeout(mut self, timeout: Duration) -> Self {
        self.default_timeout = timeout;
        self
    }

    /// Characters per estimated token
    #[inline]
    #[must_use]
    pub fn chars_per_token(&self) -> usize {
        self.chars_per_token
    }

    /// Timeout applied to `agent`
    #[inline]
    #[must_use]
    pub fn timeout_for(&self, agent: &AgentDefinition) -> Duration {
        agent
            .timeout_secs
            .map_or(self.default_timeout, Duration::from_secs)
    }

    /// Estimate tokens of `text`
    #[inline]
    #[must_use]
    pub fn estimate(&self, text: &str) -> usize {
        estimate_tokens(text, self.chars_per_token)
    }

    /// Invoke `agent` with an already rendered prompt
    ///
    /// # Errors
    /// - `ContextOverflow` if the prompt plus output budget exceeds the
    ///   agent's context window, or the provider reports an overflow
    /// - `InvocationTimeout` if the provider does not answer in time
    /// - `SchemaValidationError` if structured output is malformed
    /// - `ModelUnavailable` for other provider failures
    pub async fn invoke(
        &self,
        agent: &AgentDefinition,
        prompt: RenderedPrompt,
    ) -> Result<AgentOutput, InvocationError> {
        let result = self.invoke_inner(agent, prompt).await;
        if let Err(err) = &result {
            metrics::counter!("plansmith_agent_failures_total", "kind" => err.kind()).increment(1);
            tracing::warn!(agent = %agent.id, kind = err.kind(), "agent invocation failed: {err}");
        }
        result
    }

    async fn invoke_inner(
        &self,
        agent: &AgentDefinition,
        prompt: RenderedPrompt,
    ) -> Result<AgentOutput, InvocationError> {
        let input_tokens = self.estimate(&prompt.system) + self.estimate(&prompt.user);

        if let Some(window) = agent.context_window {
            let required = input_tokens + agent.max_output_tokens;
            if required > window {
                return Err(InvocationError::ContextOverflow {
                    detail: format!(
                        "agent {} needs {required} tokens ({input_tokens} input + {} output budget), window is {window}",
                        agent.id, agent.max_output_tokens
                    ),
                });
            }
        }

        let request = ModelRequest {
            agent_id: agent.id.clone(),
            model: agent.model.clone(),
            system: prompt.system,
            user: prompt.user,
            temperature: agent.temperature,
            max_output_tokens: agent.max_output_tokens,
            json_output: agent.output_schema.is_some(),
        };

        let timeout = self.timeout_for(agent);
        let timeout_ms = u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX);
        tracing::debug!(agent = %agent.id, model = %agent.model, input_tokens, "invoking agent");

        let started = Instant::now();
        let response = match tokio::time::timeout(timeout, self.client.complete(request)).await {
            Err(_elapsed) => return Err(InvocationError::InvocationTimeout { timeout_ms }),
            Ok(Err(ModelError::Timeout)) => return Err(InvocationError::InvocationTimeout { timeout_ms }),
            Ok(Err(err)) => return Err(err.into()),
            Ok(Ok(response)) => response,
        };
        let elapsed_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);

        let max_chars = agent.max_output_tokens.saturating_mul(self.chars_per_token);
        let clipped_text = clip_chars(&response.text, max_chars);
        let clipped = clipped_text.len() < response.text.len();
        if clipped {
            tracing::debug!(agent = %agent.id, budget = agent.max_output_tokens, "output clipped to budget");
        }
        let text = clipped_text.to_string();

        let structured = match &agent.output_schema {
            Some(schema) => Some(validate_structured(schema, &text)?),
            None => None,
        };

        Ok(AgentOutput {
            agent_id: agent.id.clone(),
            role: agent.role,
            usage: TokenUsage {
                input: input_tokens,
                output: self.estimate(&text),
            },
            text,
            structured,
            clipped,
            elapsed_ms,
        })
    }
}

fn validate_structured(
    schema: &serde_json::Value,
    text: &str,
) -> Result<serde_json::Value, InvocationError> {
    let compiled = jsonschema::JSONSchema::compile(schema).map_err(|e| {
        InvocationError::SchemaValidationError {
            messages: vec![format!("output schema does not compile: {e}")],
        }
    })?;

    let value = parse_json_lenient(text).ok_or_else(|| InvocationError::SchemaValidationError {
        messages: vec!["output is not valid JSON".to_string()],
    })?;

    if let Err(errors) = compiled.validate(&value) {
        let messages: Vec<String> = errors.map(|e| e.to_string()).collect();
        return Err(InvocationError::SchemaValidationError { messages });
    }
    Ok(value)
}

/// Parse JSON from model text, tolerating code fences and surrounding prose
#[must_use]
pub fn parse_json_lenient(text: &str) -> Option<serde_json::Value> {
    let trimmed = text.trim();
    if let Ok(value) = serde_json::from_str(trimmed) {
        return Some(value);
    }

    if let Some(body) = fenced_body(trimmed) {
        if let Ok(value) = serde_json::from_str(body.trim()) {
            return Some(value);
        }
    }

    let start = trimmed.find(['{', '['])?;
    let closer = if trimmed[start..].starts_with('{') { '}' } else { ']' };
    let end = trimmed.rfind(closer)?;
    if end <= start {
        return None;
    }
    serde_json::from_str(&trimmed[start..=end]).ok()
}

fn fenced_body(text: &str) -> Option<&str> {
    let open = text.find("```")?;
    let after_open = &text[open + 3..];
    let body_start = after_open.find('\n')? + 1;
    let body = &after_open[body_start..];
    let close = body.find("```")?;
    Some(&body[..close])
}
