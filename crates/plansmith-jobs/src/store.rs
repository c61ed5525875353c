//! Job state store
//!
//! A redis-shaped [`KeyValueStore`] contract plus the typed
//! [`JobStateClient`] that maps job metadata, result payloads and the abort
//! flag onto it. Every key expires after the configured job TTL.
//!
//! Key layout per job:
//! - `plansmith:job:<id>:meta`   hash of [`JobMetadata`] fields
//! - `plansmith:job:<id>:result` JSON [`JobResult`]
//! - `plansmith:job:<id>:abort`  `"1"` when cancellation was requested

use crate::error::StoreError;
use crate::lifecycle::JobStatus;
use crate::types::{JobId, JobResult};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use moka::future::Cache;
use moka::Expiry;
use plansmith_core::PipelineId;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Key prefix shared by every job key
pub const KEY_PREFIX: &str = "plansmith:job";

/// Minimal key-value contract with per-key expiry
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    /// Merge `fields` into the hash at `key`, resetting its expiry
    async fn hset(&self, key: &str, fields: &[(&str, String)], ttl: Duration) -> Result<(), StoreError>;

    /// All fields of the hash at `key`; empty when absent
    async fn hgetall(&self, key: &str) -> Result<HashMap<String, String>, StoreError>;

    /// Store a string value
    async fn set(&self, key: &str, value: String, ttl: Duration) -> Result<(), StoreError>;

    /// Read a string value
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError>;

    /// Remove a key of any type
    async fn del(&self, key: &str) -> Result<(), StoreError>;
}

#[derive(Debug, Clone)]
enum Stored {
    Hash(HashMap<String, String>),
    Text(String),
}

#[derive(Debug, Clone)]
struct Entry {
    value: Arc<Stored>,
    ttl: Duration,
}

/// Expiry taken from each entry's own TTL
struct EntryTtl;

impl Expiry<String, Entry> for EntryTtl {
    fn expire_after_create(&self, _key: &String, value: &Entry, _created_at: Instant) -> Option<Duration> {
        Some(value.ttl)
    }

    fn expire_after_update(
        &self,
        _key: &String,
        value: &Entry,
        _updated_at: Instant,
        _duration_until_expiry: Option<Duration>,
    ) -> Option<Duration> {
        Some(value.ttl)
    }
}

/// In-process store on a moka cache
///
/// Hash updates are read-merge-write and not atomic across concurrent
/// writers; job metadata has a single writer.
#[derive(Debug, Clone)]
pub struct MemoryStore {
    inner: Cache<String, Entry>,
}

impl MemoryStore {
    /// Create store with max capacity (keys)
    #[must_use]
    pub fn new(max_capacity: u64) -> Self {
        Self {
            inner: Cache::builder()
                .max_capacity(max_capacity)
                .expire_after(EntryTtl)
                .build(),
        }
    }

    /// Approximate number of live keys
    #[inline]
    #[must_use]
    pub fn entry_count(&self) -> u64 {
        self.inner.entry_count()
    }

    /// Live keys, unordered
    #[must_use]
    pub fn keys(&self) -> Vec<String> {
        self.inner.iter().map(|(key, _)| key.as_ref().clone()).collect()
    }
}

impl Default for MemoryStore {
    /// Create store with default capacity (100,000 keys)
    fn default() -> Self {
        Self::new(100_000)
    }
}

#[async_trait]
impl KeyValueStore for MemoryStore {
    async fn hset(&self, key: &str, fields: &[(&str, String)], ttl: Duration) -> Result<(), StoreError> {
        let mut hash = match self.inner.get(key).await {
            None => HashMap::new(),
            Some(entry) => match entry.value.as_ref() {
                Stored::Hash(existing) => existing.clone(),
                Stored::Text(_) => {
                    return Err(StoreError::Corrupt {
                        key: key.to_string(),
                        reason: "expected a hash, found a string".to_string(),
                    })
                }
            },
        };
        for (field, value) in fields {
            hash.insert((*field).to_string(), value.clone());
        }
        self.inner
            .insert(
                key.to_string(),
                Entry {
                    value: Arc::new(Stored::Hash(hash)),
                    ttl,
                },
            )
            .await;
        Ok(())
    }

    async fn hgetall(&self, key: &str) -> Result<HashMap<String, String>, StoreError> {
        match self.inner.get(key).await {
            None => Ok(HashMap::new()),
            Some(entry) => match entry.value.as_ref() {
                Stored::Hash(hash) => Ok(hash.clone()),
                Stored::Text(_) => Err(StoreError::Corrupt {
                    key: key.to_string(),
                    reason: "expected a hash, found a string".to_string(),
                }),
            },
        }
    }

    async fn set(&self, key: &str, value: String, ttl: Duration) -> Result<(), StoreError> {
        self.inner
            .insert(
                key.to_string(),
                Entry {
                    value: Arc::new(Stored::Text(value)),
                    ttl,
                },
            )
            .await;
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        match self.inner.get(key).await {
            None => Ok(None),
            Some(entry) => match entry.value.as_ref() {
                Stored::Text(text) => Ok(Some(text.clone())),
                Stored::Hash(_) => Err(StoreError::Corrupt {
                    key: key.to_string(),
                    reason: "expected a string, found a hash".to_string(),
                }),
            },
        }
    }

    async fn del(&self, key: &str) -> Result<(), StoreError> {
        self.inner.invalidate(key).await;
        Ok(())
    }
}

/// Typed job metadata stored as a hash
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobMetadata {
    /// Job
    pub job_id: JobId,
    /// Stored status
    pub status: JobStatus,
    /// Pipeline being run
    pub pipeline_id: PipelineId,
    /// Sections submitted
    pub total_sections: usize,
    /// Sections finished
    pub current_index: usize,
    /// Progress message
    pub message: String,
    /// Error text on failure
    pub error: Option<String>,
    /// Version committed to the output repository
    pub committed_version: Option<u32>,
    /// Creation time
    pub created_at: DateTime<Utc>,
    /// Last update time
    pub updated_at: DateTime<Utc>,
}

impl JobMetadata {
    /// Fresh metadata for a queued job
    #[must_use]
    pub fn queued(job_id: JobId, pipeline_id: PipelineId, total_sections: usize) -> Self {
        let now = Utc::now();
        Self {
            job_id,
            status: JobStatus::Queued,
            pipeline_id,
            total_sections,
            current_index: 0,
            message: "queued".to_string(),
            error: None,
            committed_version: None,
            created_at: now,
            updated_at: now,
        }
    }

    fn to_fields(&self) -> Vec<(&'static str, String)> {
        vec![
            ("status", self.status.as_str().to_string()),
            ("pipeline_id", self.pipeline_id.to_string()),
            ("total_sections", self.total_sections.to_string()),
            ("current_index", self.current_index.to_string()),
            ("message", self.message.clone()),
            ("error", self.error.clone().unwrap_or_default()),
            (
                "committed_version",
                self.committed_version.map(|v| v.to_string()).unwrap_or_default(),
            ),
            ("created_at", self.created_at.to_rfc3339()),
            ("updated_at", self.updated_at.to_rfc3339()),
        ]
    }

    fn from_fields(job_id: JobId, key: &str, fields: &HashMap<String, String>) -> Result<Self, StoreError> {
        let corrupt = |reason: String| StoreError::Corrupt {
            key: key.to_string(),
            reason,
        };
        let field = |name: &str| {
            fields
                .get(name)
                .map(String::as_str)
                .ok_or_else(|| corrupt(format!("missing field '{name}'")))
        };
        let number = |name: &str| -> Result<usize, StoreError> {
            field(name)?
                .parse()
                .map_err(|e| corrupt(format!("field '{name}': {e}")))
        };
        let timestamp = |name: &str| -> Result<DateTime<Utc>, StoreError> {
            DateTime::parse_from_rfc3339(field(name)?)
                .map(|t| t.with_timezone(&Utc))
                .map_err(|e| corrupt(format!("field '{name}': {e}")))
        };
        let optional = |name: &str| fields.get(name).filter(|v| !v.is_empty());

        Ok(Self {
            job_id,
            status: field("status")?.parse().map_err(corrupt)?,
            pipeline_id: PipelineId::new(field("pipeline_id")?),
            total_sections: number("total_sections")?,
            current_index: number("current_index")?,
            message: field("message")?.to_string(),
            error: optional("error").cloned(),
            committed_version: optional("committed_version")
                .map(|v| v.parse().map_err(|e| corrupt(format!("field 'committed_version': {e}"))))
                .transpose()?,
            created_at: timestamp("created_at")?,
            updated_at: timestamp("updated_at")?,
        })
    }
}

/// Typed access to one store, scoped by job id
#[derive(Clone)]
pub struct JobStateClient {
    store: Arc<dyn KeyValueStore>,
    ttl: Duration,
}

impl std::fmt::Debug for JobStateClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JobStateClient").field("ttl", &self.ttl).finish_non_exhaustive()
    }
}

impl JobStateClient {
    /// Create new client with the record expiry
    #[must_use]
    pub fn new(store: Arc<dyn KeyValueStore>, ttl: Duration) -> Self {
        Self { store, ttl }
    }

    /// Record expiry
    #[inline]
    #[must_use]
    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    fn key(job_id: JobId, suffix: &str) -> String {
        format!("{KEY_PREFIX}:{job_id}:{suffix}")
    }

    /// Write every metadata field
    ///
    /// # Errors
    /// Store failures.
    pub async fn write_metadata(&self, meta: &JobMetadata) -> Result<(), StoreError> {
        let fields = meta.to_fields();
        self.store
            .hset(&Self::key(meta.job_id, "meta"), &fields, self.ttl)
            .await
    }

    /// Read metadata; `None` for unknown or expired jobs
    ///
    /// # Errors
    /// Store failures or a corrupt record.
    pub async fn metadata(&self, job_id: JobId) -> Result<Option<JobMetadata>, StoreError> {
        let key = Self::key(job_id, "meta");
        let fields = self.store.hgetall(&key).await?;
        if fields.is_empty() {
            return Ok(None);
        }
        JobMetadata::from_fields(job_id, &key, &fields).map(Some)
    }

    /// Store the result payload
    ///
    /// # Errors
    /// Store or serialization failures.
    pub async fn write_result(&self, job_id: JobId, result: &JobResult) -> Result<(), StoreError> {
        let payload = serde_json::to_string(result)?;
        self.store
            .set(&Self::key(job_id, "result"), payload, self.ttl)
            .await
    }

    /// Read the result payload
    ///
    /// # Errors
    /// Store or deserialization failures.
    pub async fn result(&self, job_id: JobId) -> Result<Option<JobResult>, StoreError> {
        match self.store.get(&Self::key(job_id, "result")).await? {
            Some(payload) => Ok(Some(serde_json::from_str(&payload)?)),
            None => Ok(None),
        }
    }

    /// Set the abort flag; returns whether it was already set
    ///
    /// # Errors
    /// Store failures.
    pub async fn request_abort(&self, job_id: JobId) -> Result<bool, StoreError> {
        let already = self.abort_requested(job_id).await?;
        self.store
            .set(&Self::key(job_id, "abort"), "1".to_string(), self.ttl)
            .await?;
        Ok(already)
    }

    /// Whether cancellation was requested
    ///
    /// # Errors
    /// Store failures.
    pub async fn abort_requested(&self, job_id: JobId) -> Result<bool, StoreError> {
        Ok(self
            .store
            .get(&Self::key(job_id, "abort"))
            .await?
            .is_some_and(|v| v == "1"))
    }

    /// Clear the abort flag
    ///
    /// # Errors
    /// Store failures.
    pub async fn clear_abort(&self, job_id: JobId) -> Result<(), StoreError> {
        self.store.del(&Self::key(job_id, "abort")).await
    }
}
