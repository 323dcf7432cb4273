//! Model configuration presets and provider naming rules.

use serde::{Deserialize, Serialize};
use std::str::FromStr;

use crate::error::{Error, Result};

/// LLM provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Provider {
    OpenAI,
    Anthropic,
    Google,
    DeepSeek,
}

impl Provider {
    pub const ALL: [Provider; 4] = [
        Provider::OpenAI,
        Provider::Anthropic,
        Provider::Google,
        Provider::DeepSeek,
    ];

    /// Environment variable holding this provider's API key.
    pub fn api_key_env(&self) -> &'static str {
        match self {
            Self::OpenAI => "OPENAI_API_KEY",
            Self::Anthropic => "ANTHROPIC_API_KEY",
            Self::Google => "GEMINI_API_KEY",
            Self::DeepSeek => "DEEPSEEK_API_KEY",
        }
    }
}

impl std::fmt::Display for Provider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::OpenAI => write!(f, "openai"),
            Self::Anthropic => write!(f, "anthropic"),
            Self::Google => write!(f, "google"),
            Self::DeepSeek => write!(f, "deepseek"),
        }
    }
}

impl FromStr for Provider {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "openai" => Ok(Self::OpenAI),
            "anthropic" => Ok(Self::Anthropic),
            "google" | "gemini" => Ok(Self::Google),
            "deepseek" => Ok(Self::DeepSeek),
            other => Err(Error::Config(format!("unknown provider: {}", other))),
        }
    }
}

/// Rewrite a bare model name into the identifier the provider's completion
/// endpoint is addressed by.
///
/// Anthropic names gain a `claude-` prefix; Google and DeepSeek names gain a
/// `<provider>/` routing prefix. Names already carrying their prefix are left
/// alone, and OpenAI names pass through unchanged.
pub fn derive_model_name(name: &str, provider: Provider) -> String {
    let prefix = match provider {
        Provider::OpenAI => return name.to_string(),
        Provider::Anthropic => "claude-",
        Provider::Google => "gemini/",
        Provider::DeepSeek => "deepseek/",
    };
    if name.starts_with(prefix) {
        name.to_string()
    } else {
        format!("{}{}", prefix, name)
    }
}

/// Call parameters and pricing for one model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelConfig {
    /// Bare model name as the vendor publishes it
    pub name: String,
    pub provider: Provider,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
    pub temperature: f64,
    pub top_p: f64,
    /// Per-attempt timeout in seconds
    pub timeout_secs: u64,
    /// Total attempts per call (at least 1)
    pub retry_count: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_base: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
    /// Input cost per 1K tokens (USD)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub input_cost_per_1k: Option<f64>,
    /// Output cost per 1K tokens (USD)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_cost_per_1k: Option<f64>,
}

impl ModelConfig {
    pub fn new(name: impl Into<String>, provider: Provider) -> Self {
        Self {
            name: name.into(),
            provider,
            max_tokens: None,
            temperature: 0.7,
            top_p: 1.0,
            timeout_secs: 60,
            retry_count: 3,
            api_base: None,
            api_key: None,
            input_cost_per_1k: None,
            output_cost_per_1k: None,
        }
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = Some(max_tokens);
        self
    }

    pub fn with_temperature(mut self, temperature: f64) -> Self {
        self.temperature = temperature;
        self
    }

    pub fn with_top_p(mut self, top_p: f64) -> Self {
        self.top_p = top_p;
        self
    }

    pub fn with_timeout(mut self, secs: u64) -> Self {
        self.timeout_secs = secs;
        self
    }

    /// Set the attempt budget; values below 1 are raised to 1.
    pub fn with_retry_count(mut self, retry_count: u32) -> Self {
        self.retry_count = retry_count.max(1);
        self
    }

    pub fn with_api_base(mut self, url: impl Into<String>) -> Self {
        self.api_base = Some(url.into());
        self
    }

    pub fn with_api_key(mut self, key: impl Into<String>) -> Self {
        self.api_key = Some(key.into());
        self
    }

    pub fn with_pricing(mut self, input_per_1k: f64, output_per_1k: f64) -> Self {
        self.input_cost_per_1k = Some(input_per_1k);
        self.output_cost_per_1k = Some(output_per_1k);
        self
    }

    /// Fully qualified model identifier for the provider.
    pub fn qualified_name(&self) -> String {
        derive_model_name(&self.name, self.provider)
    }

    /// Attempt budget, never below one.
    pub fn attempts(&self) -> u32 {
        self.retry_count.max(1)
    }

    /// Look up a preset by its short identifier.
    pub fn preset(id: &str) -> Result<Self> {
        presets()
            .into_iter()
            .find(|(name, _)| *name == id)
            .map(|(_, config)| config)
            .ok_or_else(|| Error::model_not_found(id, preset_names()))
    }
}

/// Short identifiers of every known preset, sorted.
pub fn preset_names() -> Vec<String> {
    let mut names: Vec<String> = presets()
        .into_iter()
        .map(|(name, _)| name.to_string())
        .collect();
    names.sort();
    names
}

/// Well-known models.
pub fn presets() -> Vec<(&'static str, ModelConfig)> {
    vec![
        (
            "gpt-4",
            ModelConfig::new("gpt-4", Provider::OpenAI).with_pricing(0.03, 0.06),
        ),
        (
            "gpt-4-turbo",
            ModelConfig::new("gpt-4-turbo-preview", Provider::OpenAI).with_pricing(0.01, 0.03),
        ),
        (
            "gpt-3.5-turbo",
            ModelConfig::new("gpt-3.5-turbo", Provider::OpenAI).with_pricing(0.0005, 0.0015),
        ),
        (
            "claude-3-opus",
            ModelConfig::new("claude-3-opus-20240229", Provider::Anthropic)
                .with_max_tokens(4096)
                .with_pricing(0.015, 0.075),
        ),
        (
            "claude-3-sonnet",
            ModelConfig::new("claude-3-sonnet-20240229", Provider::Anthropic)
                .with_max_tokens(4096)
                .with_pricing(0.003, 0.015),
        ),
        (
            "claude-3-haiku",
            ModelConfig::new("claude-3-haiku-20240307", Provider::Anthropic)
                .with_max_tokens(4096)
                .with_pricing(0.00025, 0.00125),
        ),
        (
            "gemini-pro",
            ModelConfig::new("gemini-pro", Provider::Google).with_pricing(0.000125, 0.000375),
        ),
        (
            "deepseek-coder",
            ModelConfig::new("deepseek-coder", Provider::DeepSeek).with_pricing(0.0001, 0.0002),
        ),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_derive_model_name() {
        assert_eq!(derive_model_name("gpt-4", Provider::OpenAI), "gpt-4");
        assert_eq!(
            derive_model_name("3-haiku", Provider::Anthropic),
            "claude-3-haiku"
        );
        assert_eq!(
            derive_model_name("claude-3-haiku", Provider::Anthropic),
            "claude-3-haiku"
        );
        assert_eq!(derive_model_name("pro", Provider::Google), "gemini/pro");
        assert_eq!(
            derive_model_name("gemini/gemini-pro", Provider::Google),
            "gemini/gemini-pro"
        );
        assert_eq!(
            derive_model_name("deepseek-coder", Provider::DeepSeek),
            "deepseek/deepseek-coder"
        );
    }

    #[test]
    fn test_preset_lookup() {
        let haiku = ModelConfig::preset("claude-3-haiku").unwrap();
        assert_eq!(haiku.provider, Provider::Anthropic);
        assert_eq!(haiku.max_tokens, Some(4096));
        assert_eq!(haiku.qualified_name(), "claude-3-haiku-20240307");

        let gemini = ModelConfig::preset("gemini-pro").unwrap();
        assert_eq!(gemini.qualified_name(), "gemini/gemini-pro");
        assert_eq!(gemini.temperature, 0.7);
        assert_eq!(gemini.top_p, 1.0);
        assert_eq!(gemini.retry_count, 3);
        assert_eq!(gemini.timeout_secs, 60);
    }

    #[test]
    fn test_unknown_preset_lists_known_ids() {
        let err = ModelConfig::preset("invalid-model-name").unwrap_err();
        match err {
            Error::ModelNotFound { model, available } => {
                assert_eq!(model, "invalid-model-name");
                assert_eq!(available, preset_names());
                assert!(available.contains(&"gpt-4".to_string()));
                assert!(available.contains(&"deepseek-coder".to_string()));
            }
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[test]
    fn test_preset_names_sorted_and_complete() {
        let names = preset_names();
        assert_eq!(names.len(), 8);
        let mut sorted = names.clone();
        sorted.sort();
        assert_eq!(names, sorted);
    }

    #[test]
    fn test_retry_count_floor() {
        let config = ModelConfig::new("gpt-4", Provider::OpenAI).with_retry_count(0);
        assert_eq!(config.retry_count, 1);
        assert_eq!(config.attempts(), 1);
    }

    #[test]
    fn test_provider_env_keys_and_parse() {
        assert_eq!(Provider::OpenAI.api_key_env(), "OPENAI_API_KEY");
        assert_eq!(Provider::Anthropic.api_key_env(), "ANTHROPIC_API_KEY");
        assert_eq!(Provider::Google.api_key_env(), "GEMINI_API_KEY");
        assert_eq!(Provider::DeepSeek.api_key_env(), "DEEPSEEK_API_KEY");
        for provider in Provider::ALL {
            assert_eq!(provider.to_string().parse::<Provider>().unwrap(), provider);
        }
        assert!("mistral".parse::<Provider>().is_err());
    }
}
