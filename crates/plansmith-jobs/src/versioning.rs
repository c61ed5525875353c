//! Versioned output repository
//!
//! Every commit creates a new immutable version of a plan or card entity.
//! Version numbers are monotonic per entity and start at 1; a version may
//! record the version it was derived from.

use crate::error::VersionError;
use crate::types::JobId;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use plansmith_core::{PlanDocument, PlanStatus};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Kind of versioned entity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    /// Test plan
    Plan,
    /// Test card
    Card,
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Plan => "plan",
            Self::Card => "card",
        })
    }
}

/// Version to be committed
#[derive(Debug, Clone, PartialEq)]
pub struct NewVersion {
    /// Entity kind
    pub kind: EntityKind,
    /// Entity key
    pub entity_key: String,
    /// Derived from this version
    pub based_on: Option<u32>,
    /// Document status
    pub status: PlanStatus,
    /// Document body
    pub document: PlanDocument,
    /// Job that produced it
    pub job_id: Option<JobId>,
}

impl NewVersion {
    /// Draft version of `document`
    #[must_use]
    pub fn draft(kind: EntityKind, entity_key: impl Into<String>, mut document: PlanDocument) -> Self {
        document.metadata.status = PlanStatus::Draft;
        Self {
            kind,
            entity_key: entity_key.into(),
            based_on: None,
            status: PlanStatus::Draft,
            document,
            job_id: None,
        }
    }

    /// Derived from `version`
    #[inline]
    #[must_use]
    pub fn based_on(mut self, version: Option<u32>) -> Self {
        self.based_on = version;
        self
    }

    /// With status, on the record and in the document metadata
    #[inline]
    #[must_use]
    pub fn with_status(mut self, status: PlanStatus) -> Self {
        self.status = status;
        self.document.metadata.status = status;
        self
    }

    /// Produced by `job_id`
    #[inline]
    #[must_use]
    pub fn from_job(mut self, job_id: JobId) -> Self {
        self.job_id = Some(job_id);
        self
    }
}

/// Committed, immutable version
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VersionRecord {
    /// Entity kind
    pub kind: EntityKind,
    /// Entity key
    pub entity_key: String,
    /// Version number, from 1
    pub version: u32,
    /// Document status
    pub status: PlanStatus,
    /// Derived from this version
    pub based_on: Option<u32>,
    /// Document body
    pub document: PlanDocument,
    /// Job that produced it
    pub job_id: Option<JobId>,
    /// Commit time
    pub created_at: DateTime<Utc>,
}

/// Storage of versioned plan and card documents
#[async_trait]
pub trait VersionRepository: Send + Sync {
    /// Commit a new version
    ///
    /// # Errors
    /// `BasedOnMissing` if `based_on` names an unknown version.
    async fn commit(&self, version: NewVersion) -> Result<VersionRecord, VersionError>;

    /// One version
    async fn get(&self, kind: EntityKind, entity_key: &str, version: u32)
        -> Result<Option<VersionRecord>, VersionError>;

    /// Highest version
    async fn latest(&self, kind: EntityKind, entity_key: &str) -> Result<Option<VersionRecord>, VersionError>;

    /// Every version, oldest first
    async fn history(&self, kind: EntityKind, entity_key: &str) -> Result<Vec<VersionRecord>, VersionError>;

    /// `version` followed by its based-on chain back to the root
    async fn lineage(
        &self,
        kind: EntityKind,
        entity_key: &str,
        version: u32,
    ) -> Result<Vec<VersionRecord>, VersionError> {
        let mut chain = Vec::new();
        let mut next = Some(version);
        while let Some(number) = next {
            let Some(record) = self.get(kind, entity_key, number).await? else {
                break;
            };
            next = record.based_on;
            chain.push(record);
        }
        Ok(chain)
    }
}

/// In-process repository
#[derive(Debug, Default)]
pub struct MemoryVersionRepository {
    entities: DashMap<(EntityKind, String), Vec<VersionRecord>>,
}

impl MemoryVersionRepository {
    /// Create empty repository
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl VersionRepository for MemoryVersionRepository {
    async fn commit(&self, version: NewVersion) -> Result<VersionRecord, VersionError> {
        let key = (version.kind, version.entity_key.clone());

        // Versions are never removed, so a base seen here is still there below
        if let Some(base) = version.based_on {
            let known = self
                .entities
                .get(&key)
                .is_some_and(|versions| versions.iter().any(|v| v.version == base));
            if !known {
                return Err(VersionError::BasedOnMissing {
                    entity: format!("{}:{}", version.kind, version.entity_key),
                    version: base,
                });
            }
        }

        // The entry guard serializes commits per entity
        let mut versions = self.entities.entry(key).or_default();

        let number = versions.last().map_or(1, |v| v.version + 1);
        let record = VersionRecord {
            kind: version.kind,
            entity_key: version.entity_key,
            version: number,
            status: version.status,
            based_on: version.based_on,
            document: version.document,
            job_id: version.job_id,
            created_at: Utc::now(),
        };
        versions.push(record.clone());
        tracing::info!(
            entity = %record.entity_key,
            kind = %record.kind,
            version = number,
            "committed version"
        );
        Ok(record)
    }

    async fn get(
        &self,
        kind: EntityKind,
        entity_key: &str,
        version: u32,
    ) -> Result<Option<VersionRecord>, VersionError> {
        Ok(self
            .entities
            .get(&(kind, entity_key.to_string()))
            .and_then(|versions| versions.iter().find(|v| v.version == version).cloned()))
    }

    async fn latest(&self, kind: EntityKind, entity_key: &str) -> Result<Option<VersionRecord>, VersionError> {
        Ok(self
            .entities
            .get(&(kind, entity_key.to_string()))
            .and_then(|versions| versions.last().cloned()))
    }

    async fn history(&self, kind: EntityKind, entity_key: &str) -> Result<Vec<VersionRecord>, VersionError> {
        Ok(self
            .entities
            .get(&(kind, entity_key.to_string()))
            .map(|versions| versions.clone())
            .unwrap_or_default())
    }
}
