//! Pipeline configuration.
//!
//! Built once at startup (defaults, then an optional JSON file, then CLI
//! overrides) and handed to the worker and orchestrator constructors.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub const DEFAULT_FAST_MODEL: &str = "claude-3-5-haiku-20241022";
pub const DEFAULT_ESCALATED_MODEL: &str = "claude-3-5-sonnet-20241022";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("reading config {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("config JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("invalid config: {0}")]
    Invalid(String),
}

/// Backoff schedule for transient model invocation failures.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// Total attempts, including the first.
    pub max_attempts: u32,
    pub initial_backoff_ms: u64,
    pub backoff_rate: f64,
    pub max_backoff_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            initial_backoff_ms: 2_000,
            backoff_rate: 2.0,
            max_backoff_ms: 30_000,
        }
    }
}

impl RetryPolicy {
    /// Delay before retry number `retry` (1 = the sleep after the first failure).
    pub fn delay_for(&self, retry: u32) -> Duration {
        let exp = retry.saturating_sub(1).min(32) as i32;
        let millis = self.initial_backoff_ms as f64 * self.backoff_rate.powi(exp);
        let capped = millis.min(self.max_backoff_ms as f64);
        Duration::from_millis(capped as u64)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub fast_model: String,
    pub escalated_model: String,
    /// Documents estimated below this many tokens go to the fast tier.
    pub token_threshold: usize,
    /// Longer documents keep their head and tail halves.
    pub max_input_chars: usize,
    pub max_tokens: u32,
    pub temperature: f32,
    pub max_concurrency: usize,
    pub deadline_secs: Option<u64>,
    pub retry: RetryPolicy,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            fast_model: DEFAULT_FAST_MODEL.to_string(),
            escalated_model: DEFAULT_ESCALATED_MODEL.to_string(),
            token_threshold: 8_000,
            max_input_chars: 150_000,
            max_tokens: 4_096,
            temperature: 0.0,
            max_concurrency: 50,
            deadline_secs: None,
            retry: RetryPolicy::default(),
        }
    }
}

impl PipelineConfig {
    /// Load from a JSON file. Missing fields take their defaults.
    pub fn from_json_file(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let config: Self = serde_json::from_str(&text)?;
        config.validate()?;
        tracing::debug!(path = %path.display(), "loaded pipeline config");
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.fast_model.trim().is_empty() || self.escalated_model.trim().is_empty() {
            return Err(ConfigError::Invalid("model identifiers must be non-empty".into()));
        }
        if self.token_threshold == 0 {
            return Err(ConfigError::Invalid("token_threshold must be positive".into()));
        }
        if self.max_input_chars < 2 {
            return Err(ConfigError::Invalid("max_input_chars must be at least 2".into()));
        }
        if self.max_concurrency == 0 {
            return Err(ConfigError::Invalid("max_concurrency must be at least 1".into()));
        }
        if self.retry.max_attempts == 0 {
            return Err(ConfigError::Invalid("retry.max_attempts must be at least 1".into()));
        }
        let rate = self.retry.backoff_rate;
        if !(rate.is_finite() && rate >= 1.0) {
            return Err(ConfigError::Invalid(
                "retry.backoff_rate must be a finite number >= 1.0".into(),
            ));
        }
        Ok(())
    }

    pub fn deadline(&self) -> Option<Duration> {
        self.deadline_secs.map(Duration::from_secs)
    }
}
