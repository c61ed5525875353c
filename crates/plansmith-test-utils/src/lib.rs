//! Testing utilities for the plansmith workspace
//!
//! Scripted model client, a store that fails on demand, and definition and
//! section fixtures.

#![allow(missing_docs)]

use async_trait::async_trait;
use parking_lot::Mutex;
use plansmith_core::{
    AgentDefinition, AgentRole, DefinitionRegistry, EngineConfig, ModelClient, ModelError,
    ModelRequest, ModelResponse, PipelineDefinition, SectionInput, StageDefinition,
};
use plansmith_jobs::{
    KeyValueStore, MemoryStore, MemoryVersionRepository, PipelineService, StoreError,
};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{Notify, Semaphore};

// ---- scripted model client ----

/// What an agent answers
#[derive(Debug, Clone)]
pub enum Reply {
    /// Fixed text
    Text(String),
    /// `<agent>: <user prompt>`
    Echo,
    /// Provider failure
    Fail(String),
    /// Provider-reported context overflow
    Overflow,
}

/// Holds calls to an agent until released
#[derive(Debug)]
pub struct Gate {
    arrived: Notify,
    open: Semaphore,
}

impl Gate {
    #[must_use]
    pub fn new() -> Arc<Self> {
        Self::after(0)
    }

    /// Let the first `passes` calls straight through, hold the rest
    #[must_use]
    pub fn after(passes: usize) -> Arc<Self> {
        Arc::new(Self {
            arrived: Notify::new(),
            open: Semaphore::new(passes),
        })
    }

    /// Resolves once a call is waiting at the gate
    pub async fn arrived(&self) {
        self.arrived.notified().await;
    }

    /// Let every current and future call through
    pub fn release(&self) {
        self.open.close();
    }

    async fn pass(&self) {
        if let Ok(permit) = self.open.try_acquire() {
            permit.forget();
            return;
        }
        self.arrived.notify_one();
        // A closed semaphore is the open gate
        let _ = self.open.acquire().await;
    }
}

#[derive(Debug, Clone)]
struct Script {
    reply: Reply,
    delay: Option<Duration>,
    gate: Option<Arc<Gate>>,
}

impl Script {
    fn new(reply: Reply) -> Self {
        Self {
            reply,
            delay: None,
            gate: None,
        }
    }
}

/// One recorded model call
#[derive(Debug, Clone)]
pub struct CallRecord {
    pub agent_id: String,
    pub model: String,
    pub system: String,
    pub user: String,
    pub at: Instant,
}

/// Model client answering from per-agent scripts, recording every call
#[derive(Debug)]
pub struct ScriptedModelClient {
    scripts: HashMap<String, Script>,
    default: Reply,
    calls: Mutex<Vec<CallRecord>>,
}

impl Default for ScriptedModelClient {
    fn default() -> Self {
        Self::new()
    }
}

impl ScriptedModelClient {
    /// Unscripted agents echo
    #[must_use]
    pub fn new() -> Self {
        Self {
            scripts: HashMap::new(),
            default: Reply::Echo,
            calls: Mutex::new(Vec::new()),
        }
    }

    fn script(&mut self, agent: &str) -> &mut Script {
        let default = self.default.clone();
        self.scripts
            .entry(agent.to_string())
            .or_insert_with(|| Script::new(default))
    }

    #[must_use]
    pub fn reply(mut self, agent: &str, text: impl Into<String>) -> Self {
        self.script(agent).reply = Reply::Text(text.into());
        self
    }

    #[must_use]
    pub fn fail(mut self, agent: &str, message: impl Into<String>) -> Self {
        self.script(agent).reply = Reply::Fail(message.into());
        self
    }

    #[must_use]
    pub fn overflow(mut self, agent: &str) -> Self {
        self.script(agent).reply = Reply::Overflow;
        self
    }

    #[must_use]
    pub fn delay(mut self, agent: &str, delay: Duration) -> Self {
        self.script(agent).delay = Some(delay);
        self
    }

    #[must_use]
    pub fn gate(mut self, agent: &str, gate: Arc<Gate>) -> Self {
        self.script(agent).gate = Some(gate);
        self
    }

    /// All calls so far, in arrival order
    #[must_use]
    pub fn calls(&self) -> Vec<CallRecord> {
        self.calls.lock().clone()
    }

    /// Calls made to one agent
    #[must_use]
    pub fn calls_to(&self, agent: &str) -> Vec<CallRecord> {
        self.calls
            .lock()
            .iter()
            .filter(|c| c.agent_id == agent)
            .cloned()
            .collect()
    }

    #[must_use]
    pub fn call_count(&self) -> usize {
        self.calls.lock().len()
    }
}

#[async_trait]
impl ModelClient for ScriptedModelClient {
    async fn complete(&self, request: ModelRequest) -> Result<ModelResponse, ModelError> {
        let agent = request.agent_id.to_string();
        self.calls.lock().push(CallRecord {
            agent_id: agent.clone(),
            model: request.model.clone(),
            system: request.system.clone(),
            user: request.user.clone(),
            at: Instant::now(),
        });

        let script = self
            .scripts
            .get(&agent)
            .cloned()
            .unwrap_or_else(|| Script::new(self.default.clone()));
        if let Some(gate) = &script.gate {
            gate.pass().await;
        }
        if let Some(delay) = script.delay {
            tokio::time::sleep(delay).await;
        }

        match script.reply {
            Reply::Text(text) => Ok(ModelResponse::new(text)),
            Reply::Echo => Ok(ModelResponse::new(format!("{agent}: {}", request.user))),
            Reply::Fail(message) => Err(ModelError::Unavailable(message)),
            Reply::Overflow => Err(ModelError::ContextOverflow(format!("{agent} prompt too long"))),
        }
    }
}

// ---- faulty store ----

/// Memory store that fails a window of writes
#[derive(Debug)]
pub struct FaultyStore {
    inner: MemoryStore,
    writes: AtomicUsize,
    skip: usize,
    fail: usize,
}

impl FaultyStore {
    /// Let `skip` writes through, fail the next `fail`, then recover
    #[must_use]
    pub fn failing_writes(skip: usize, fail: usize) -> Self {
        Self {
            inner: MemoryStore::default(),
            writes: AtomicUsize::new(0),
            skip,
            fail,
        }
    }

    /// Writes attempted so far
    #[must_use]
    pub fn write_count(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }

    fn spend_write(&self) -> Result<(), StoreError> {
        let n = self.writes.fetch_add(1, Ordering::SeqCst) + 1;
        if n > self.skip && n <= self.skip + self.fail {
            return Err(StoreError::Unavailable("injected write failure".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl KeyValueStore for FaultyStore {
    async fn hset(&self, key: &str, fields: &[(&str, String)], ttl: Duration) -> Result<(), StoreError> {
        self.spend_write()?;
        self.inner.hset(key, fields, ttl).await
    }

    async fn hgetall(&self, key: &str) -> Result<HashMap<String, String>, StoreError> {
        self.inner.hgetall(key).await
    }

    async fn set(&self, key: &str, value: String, ttl: Duration) -> Result<(), StoreError> {
        // The abort flag stays writable so cancellation can be exercised
        if !key.ends_with(":abort") {
            self.spend_write()?;
        }
        self.inner.set(key, value, ttl).await
    }

    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        self.inner.get(key).await
    }

    async fn del(&self, key: &str) -> Result<(), StoreError> {
        self.inner.del(key).await
    }
}

// ---- fixtures ----

pub const ACTOR_A: &str = "actor-a";
pub const ACTOR_B: &str = "actor-b";
pub const CRITIC: &str = "critic";
pub const STANDARD: &str = "standard";

#[must_use]
pub fn actor(id: &str) -> AgentDefinition {
    AgentDefinition::new(
        id,
        AgentRole::Actor,
        "small",
        "Extract testable requirements from section {{section_id}}:\n{{section_text}}",
        256,
    )
}

#[must_use]
pub fn critic(id: &str) -> AgentDefinition {
    AgentDefinition::new(
        id,
        AgentRole::Critic,
        "large",
        "Section:\n{{section_text}}\n\nCandidates:\n{{previous}}\n\nPrior sections:\n{{rolling_summary}}",
        1_024,
    )
}

/// Two parallel actors followed by one critic, pipeline `standard`
#[must_use]
pub fn actor_critic_registry() -> DefinitionRegistry {
    let mut registry = DefinitionRegistry::new();
    for agent in [actor(ACTOR_A), actor(ACTOR_B), critic(CRITIC)] {
        registry.upsert_agent(agent).unwrap();
    }
    registry
        .upsert_pipeline(
            PipelineDefinition::new(STANDARD, "Standard")
                .as_default()
                .with_stage(StageDefinition::parallel("extract", [ACTOR_A, ACTOR_B]))
                .with_stage(StageDefinition::parallel("synthesize", [CRITIC])),
        )
        .unwrap();
    registry
}

/// `n` sections with indices 0..n and ids `1`..=n
#[must_use]
pub fn sections(n: usize) -> Vec<SectionInput> {
    (0..n)
        .map(|i| {
            SectionInput::new((i + 1).to_string(), i, format!("Requirement {}: the unit shall respond.", i + 1))
                .with_metadata(serde_json::json!({ "title": format!("Section {}", i + 1) }))
        })
        .collect()
}

/// Critic answer with `count` procedures
#[must_use]
pub fn procedures_json(count: usize) -> String {
    let procedures: Vec<_> = (1..=count)
        .map(|i| {
            serde_json::json!({
                "id": format!("TP-{i}"),
                "requirement_id": format!("REQ-{i}"),
                "title": format!("Procedure {i}"),
                "steps": ["Apply power", "Observe"],
                "expected_results": ["Unit responds"],
                "type": "functional",
                "priority": "high"
            })
        })
        .collect();
    serde_json::Value::Array(procedures).to_string()
}

/// Service over in-memory stores
pub struct Harness {
    pub service: PipelineService,
    pub client: Arc<ScriptedModelClient>,
    pub versions: Arc<MemoryVersionRepository>,
}

impl Harness {
    #[must_use]
    pub fn new(registry: DefinitionRegistry, client: ScriptedModelClient, config: EngineConfig) -> Self {
        Self::with_store(registry, client, config, Arc::new(MemoryStore::default()))
    }

    #[must_use]
    pub fn with_store(
        registry: DefinitionRegistry,
        client: ScriptedModelClient,
        config: EngineConfig,
        store: Arc<dyn KeyValueStore>,
    ) -> Self {
        let client = Arc::new(client);
        let versions = Arc::new(MemoryVersionRepository::new());
        let service = PipelineService::new(registry, client.clone(), store, versions.clone(), config);
        Self {
            service,
            client,
            versions,
        }
    }
}
