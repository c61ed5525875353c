//! Offline model client
//!
//! Answers every request locally so pipelines can be exercised without a
//! provider. Plain agents get their prompt back; agents expecting JSON get a
//! one-procedure array built from the first prompt line.

use async_trait::async_trait;
use plansmith_core::{ModelClient, ModelError, ModelRequest, ModelResponse};
use serde_json::json;
use std::sync::atomic::{AtomicUsize, Ordering};

const TITLE_CHARS: usize = 80;

/// Deterministic, provider-free [`ModelClient`]
#[derive(Debug, Default)]
pub struct EchoModelClient {
    calls: AtomicUsize,
}

impl EchoModelClient {
    /// Create new echo client
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Requests answered so far
    #[must_use]
    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::Relaxed)
    }
}

fn headline(prompt: &str) -> String {
    prompt
        .lines()
        .map(str::trim)
        .find(|line| !line.is_empty())
        .unwrap_or("untitled")
        .chars()
        .take(TITLE_CHARS)
        .collect()
}

#[async_trait]
impl ModelClient for EchoModelClient {
    async fn complete(&self, request: ModelRequest) -> Result<ModelResponse, ModelError> {
        let n = self.calls.fetch_add(1, Ordering::Relaxed) + 1;
        tracing::debug!(agent = %request.agent_id, call = n, "echo completion");

        if request.json_output {
            let procedures = json!([{
                "id": format!("SIM-{n}"),
                "requirement_id": format!("SIM-REQ-{n}"),
                "title": headline(&request.user),
                "objective": format!("Simulated by {}", request.agent_id),
                "steps": ["Prepare the unit", "Exercise the requirement"],
                "expected_results": ["Behaviour matches the requirement"],
                "type": "functional",
                "priority": "medium"
            }]);
            return Ok(ModelResponse::new(procedures.to_string()));
        }

        Ok(ModelResponse::new(format!("[{}] {}", request.agent_id, request.user)))
    }
}
