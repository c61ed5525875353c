//! Core identifiers and small value types
//!
//! Defines the fundamental types shared by every pipeline component:
//! - Agent, pipeline and section identifiers
//! - Agent roles and stage execution modes
//! - Section inputs handed over by the ingestion collaborator
//! - Token estimation

use serde::{Deserialize, Serialize};
use std::fmt;

macro_rules! string_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub String);

        impl $name {
            /// Create from any string-like value
            #[inline]
            #[must_use]
            pub fn new(id: impl Into<String>) -> Self {
                Self(id.into())
            }

            /// Borrow the raw identifier
            #[inline]
            #[must_use]
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<&str> for $name {
            fn from(value: &str) -> Self {
                Self(value.to_string())
            }
        }

        impl From<String> for $name {
            fn from(value: String) -> Self {
                Self(value)
            }
        }
    };
}

string_id!(
    /// Administrator-chosen agent identifier
    AgentId
);

string_id!(
    /// Administrator-chosen pipeline identifier
    PipelineId
);

string_id!(
    /// Section identifier assigned by the ingestion collaborator
    SectionId
);

/// Role an agent plays inside a pipeline
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentRole {
    /// Extraction from section text
    Actor,
    /// Synthesis of upstream actor output
    Critic,
    /// Cross-section contradiction detection
    Contradiction,
    /// Coverage-gap detection
    GapAnalysis,
    /// Anything else
    Other,
}

impl AgentRole {
    /// Stable lowercase name
    #[inline]
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            AgentRole::Actor => "actor",
            AgentRole::Critic => "critic",
            AgentRole::Contradiction => "contradiction",
            AgentRole::GapAnalysis => "gap_analysis",
            AgentRole::Other => "other",
        }
    }
}

impl fmt::Display for AgentRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How a stage runs its agents
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionMode {
    /// All agents concurrently against identical input
    #[default]
    Parallel,
    /// Agents in declared order, each fed the previous output
    Sequential,
}

impl ExecutionMode {
    /// Whether the agent at `position` sees the stage input as `{{input}}`
    ///
    /// Parallel agents all do; in a chain only the head does, later links
    /// read the output before them.
    #[inline]
    #[must_use]
    pub fn input_is_stage_input(self, position: usize) -> bool {
        match self {
            Self::Parallel => true,
            Self::Sequential => position == 0,
        }
    }
}

/// One unit of source document content
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SectionInput {
    /// Section identifier
    pub id: SectionId,
    /// Position in the source document
    pub index: usize,
    /// Source text
    pub text: String,
    /// Hierarchy metadata owned by the ingestion collaborator
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<serde_json::Value>,
}

impl SectionInput {
    /// Create new section input
    #[inline]
    #[must_use]
    pub fn new(id: impl Into<SectionId>, index: usize, text: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            index,
            text: text.into(),
            metadata: None,
        }
    }

    /// With hierarchy metadata
    #[inline]
    #[must_use]
    pub fn with_metadata(mut self, metadata: serde_json::Value) -> Self {
        self.metadata = Some(metadata);
        self
    }

    /// Title taken from `metadata.title`, falling back to the section id
    #[must_use]
    pub fn title(&self) -> String {
        self.metadata
            .as_ref()
            .and_then(|m| m.get("title"))
            .and_then(serde_json::Value::as_str)
            .map_or_else(|| self.id.to_string(), str::to_string)
    }
}

/// Estimate token count of `text` at `chars_per_token` characters per token
#[inline]
#[must_use]
pub fn estimate_tokens(text: &str, chars_per_token: usize) -> usize {
    let per = chars_per_token.max(1);
    text.chars().count().div_ceil(per)
}

/// Clip `text` to at most `max_chars` characters on a char boundary
#[must_use]
pub fn clip_chars(text: &str, max_chars: usize) -> &str {
    match text.char_indices().nth(max_chars) {
        Some((byte_idx, _)) => &text[..byte_idx],
        None => text,
    }
}
