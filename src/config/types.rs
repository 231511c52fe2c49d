//! Configuration data model.
//!
//! This module holds struct definitions plus default values. Source discovery
//! and env overrides live in sibling modules.

use serde::Deserialize;
use std::collections::BTreeMap;
use std::time::Duration;

use super::defaults::{
    DEFAULT_API_TIMEOUT_SECS, DEFAULT_CHAT_URL, DEFAULT_CONSECUTIVE_MATCHES,
    DEFAULT_POLL_INTERVAL_MS, DEFAULT_POLL_MAX_ATTEMPTS, DEFAULT_STATS_URL,
};
use crate::error::ConfigError;
use crate::stats::PollConfig;
use crate::types::AgentKind;

/// Top-level runtime configuration, parsed directly from `duet.toml`.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub api: ApiConfig,
    pub stats: StatsConfig,
    pub session: SessionConfig,
    pub display: DisplayConfig,
}

impl Config {
    /// Reject settings that would make the runtime misbehave.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.api.chat_url.trim().is_empty() {
            return Err(ConfigError::Invalid("api.chat_url must not be empty".into()));
        }
        if self.api.stats_url.trim().is_empty() {
            return Err(ConfigError::Invalid("api.stats_url must not be empty".into()));
        }
        for (name, value) in [
            ("stats.base_interval_ms", self.stats.base_interval_ms),
            ("stats.max_attempts", u64::from(self.stats.max_attempts)),
            (
                "stats.consecutive_matches_required",
                u64::from(self.stats.consecutive_matches_required),
            ),
        ] {
            if value == 0 {
                return Err(ConfigError::Invalid(format!(
                    "{name} must be a positive integer"
                )));
            }
        }
        Ok(())
    }
}

/// Backend endpoints and credentials.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ApiConfig {
    pub chat_url: String,
    pub stats_url: String,
    pub api_key: String,
    pub timeout_secs: u64,
}

impl ApiConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs.max(1))
    }
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            chat_url: DEFAULT_CHAT_URL.into(),
            stats_url: DEFAULT_STATS_URL.into(),
            api_key: String::new(),
            timeout_secs: DEFAULT_API_TIMEOUT_SECS,
        }
    }
}

/// Stats polling policy.
#[derive(Debug, Clone, Copy, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct StatsConfig {
    pub base_interval_ms: u64,
    pub max_attempts: u32,
    pub consecutive_matches_required: u32,
}

impl StatsConfig {
    pub fn poll_config(&self) -> PollConfig {
        PollConfig {
            base_interval: Duration::from_millis(self.base_interval_ms),
            max_attempts: self.max_attempts,
            consecutive_matches_required: self.consecutive_matches_required,
        }
    }
}

impl Default for StatsConfig {
    fn default() -> Self {
        Self {
            base_interval_ms: DEFAULT_POLL_INTERVAL_MS,
            max_attempts: DEFAULT_POLL_MAX_ATTEMPTS,
            consecutive_matches_required: DEFAULT_CONSECUTIVE_MATCHES,
        }
    }
}

/// Per-conversation defaults.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    pub default_mode: AgentKind,
    /// Forwarded as the request `env` on every turn.
    pub env: BTreeMap<String, String>,
}

/// Terminal display settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DisplayConfig {
    pub color: bool,
}

impl Default for DisplayConfig {
    fn default() -> Self {
        Self { color: true }
    }
}
