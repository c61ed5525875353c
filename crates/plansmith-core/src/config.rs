//! Engine configuration
//!
//! Tunables for fan-out, timeouts, failure policy and the rolling summary.
//! Loadable from TOML; every field has a default.

use crate::error::ConfigError;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Engine configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Upper bound on concurrent agent calls within one parallel stage
    pub max_fan_out: usize,
    /// Default per-call timeout in seconds
    pub call_timeout_secs: u64,
    /// Keep going after a section fails entirely
    pub continue_on_section_failure: bool,
    /// Character budget of the cross-section rolling summary
    pub rolling_summary_max_chars: usize,
    /// Expiry of job records in the state store
    pub job_ttl_secs: u64,
    /// Characters per token for estimates
    pub chars_per_token: usize,
}

impl EngineConfig {
    /// Create default configuration
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// With fan-out cap
    #[inline]
    #[must_use]
    pub fn with_max_fan_out(mut self, max: usize) -> Self {
        self.max_fan_out = max;
        self
    }

    /// With default call timeout
    #[inline]
    #[must_use]
    pub fn with_call_timeout(mut self, timeout: Duration) -> Self {
        self.call_timeout_secs = timeout.as_secs().max(1);
        self
    }

    /// With section failure policy
    #[inline]
    #[must_use]
    pub fn with_continue_on_section_failure(mut self, keep_going: bool) -> Self {
        self.continue_on_section_failure = keep_going;
        self
    }

    /// With rolling summary budget
    #[inline]
    #[must_use]
    pub fn with_rolling_summary_max_chars(mut self, max: usize) -> Self {
        self.rolling_summary_max_chars = max;
        self
    }

    /// With job record expiry
    #[inline]
    #[must_use]
    pub fn with_job_ttl(mut self, ttl: Duration) -> Self {
        self.job_ttl_secs = ttl.as_secs();
        self
    }

    /// Default call timeout as a `Duration`
    #[inline]
    #[must_use]
    pub fn call_timeout(&self) -> Duration {
        Duration::from_secs(self.call_timeout_secs)
    }

    /// Job record expiry as a `Duration`
    #[inline]
    #[must_use]
    pub fn job_ttl(&self) -> Duration {
        Duration::from_secs(self.job_ttl_secs)
    }

    /// Effective fan-out for a stage with `agent_count` agents
    #[inline]
    #[must_use]
    pub fn fan_out_for(&self, agent_count: usize) -> usize {
        agent_count.min(self.max_fan_out).max(1)
    }

    /// Parse and validate TOML
    pub fn from_toml_str(raw: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Load and validate a TOML file
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path)?;
        Self::from_toml_str(&raw)
    }

    /// Reject values the engine cannot run with
    pub fn validate(&self) -> Result<(), ConfigError> {
        let non_zero = [
            ("max_fan_out", self.max_fan_out as u64),
            ("call_timeout_secs", self.call_timeout_secs),
            ("job_ttl_secs", self.job_ttl_secs),
            ("chars_per_token", self.chars_per_token as u64),
        ];
        for (field, value) in non_zero {
            if value == 0 {
                return Err(ConfigError::Invalid {
                    field,
                    reason: "must be greater than zero".to_string(),
                });
            }
        }
        Ok(())
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_fan_out: 4,
            call_timeout_secs: 120,
            continue_on_section_failure: true,
            rolling_summary_max_chars: 6_000,
            job_ttl_secs: 86_400,
            chars_per_token: 4,
        }
    }
}
