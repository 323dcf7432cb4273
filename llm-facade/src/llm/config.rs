//! Client construction options and retry policy.

use std::env;
use std::path::PathBuf;
use std::time::Duration;

use super::models::ModelConfig;
use crate::error::Result;

/// Preset used when nothing else selects a model.
pub const DEFAULT_MODEL: &str = "gemini-pro";

/// Default directory for audit records.
pub const DEFAULT_LOG_DIR: &str = "logs/llm";

/// Exponential backoff between attempts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Delay after the first failed attempt; doubles each time
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            base_delay: Duration::from_secs(1),
        }
    }
}

impl RetryPolicy {
    pub fn new(base_delay: Duration) -> Self {
        Self { base_delay }
    }

    /// No waiting between attempts.
    pub fn immediate() -> Self {
        Self::new(Duration::ZERO)
    }

    /// Delay after the zero-based `attempt` failed: `base * 2^attempt`.
    pub fn delay(&self, attempt: u32) -> Duration {
        self.base_delay
            .saturating_mul(2u32.saturating_pow(attempt.min(31)))
    }
}

/// Options for building an `LlmClient`.
#[derive(Debug, Clone)]
pub struct ClientOptions {
    /// Preset identifier; an unknown id is an error
    pub model: Option<String>,
    /// Explicit config, wins over `model`
    pub config: Option<ModelConfig>,
    /// Preset used when neither `model` nor `config` is set
    pub default_model: String,
    /// Backing file for conversation history
    pub history_file: Option<PathBuf>,
    /// Directory for audit records
    pub log_dir: PathBuf,
    pub retry: RetryPolicy,
}

impl Default for ClientOptions {
    fn default() -> Self {
        Self {
            model: None,
            config: None,
            default_model: DEFAULT_MODEL.to_string(),
            history_file: None,
            log_dir: PathBuf::from(DEFAULT_LOG_DIR),
            retry: RetryPolicy::default(),
        }
    }
}

impl ClientOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Read `DEFAULT_MODEL`, `LLM_LOG_DIR` and `LLM_HISTORY_FILE`.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Like [`from_env`](Self::from_env) with a custom variable source.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut options = Self::default();
        if let Some(model) = lookup("DEFAULT_MODEL").filter(|m| !m.is_empty()) {
            options.default_model = model;
        }
        if let Some(dir) = lookup("LLM_LOG_DIR").filter(|d| !d.is_empty()) {
            options.log_dir = PathBuf::from(dir);
        }
        options.history_file = lookup("LLM_HISTORY_FILE")
            .filter(|f| !f.is_empty())
            .map(PathBuf::from);
        options
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    pub fn with_config(mut self, config: ModelConfig) -> Self {
        self.config = Some(config);
        self
    }

    pub fn with_history_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.history_file = Some(path.into());
        self
    }

    pub fn with_log_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.log_dir = dir.into();
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Pick the active model config.
    ///
    /// An explicit config wins, then an explicit preset id (unknown ids fail),
    /// then the default preset. An unknown default falls back to
    /// [`DEFAULT_MODEL`] with a warning.
    pub fn resolve_config(&self) -> Result<ModelConfig> {
        if let Some(config) = &self.config {
            return Ok(config.clone());
        }
        if let Some(model) = &self.model {
            return ModelConfig::preset(model);
        }
        match ModelConfig::preset(&self.default_model) {
            Ok(config) => Ok(config),
            Err(e) => {
                tracing::warn!(
                    default_model = %self.default_model,
                    error = %e,
                    "Unknown default model, falling back to {}",
                    DEFAULT_MODEL
                );
                ModelConfig::preset(DEFAULT_MODEL)
            }
        }
    }
}
