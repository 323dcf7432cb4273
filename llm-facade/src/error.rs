//! Error types for llm-facade.

use thiserror::Error;

use crate::llm::Response;

/// Result type alias using llm-facade's Error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while configuring or calling an LLM.
#[derive(Error, Debug)]
pub enum Error {
    /// Caller supplied a message in an unsupported shape
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Unknown model identifier
    #[error("Model not found: {model}. Available: {}", .available.join(", "))]
    ModelNotFound {
        model: String,
        available: Vec<String>,
    },

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Provider rejected or failed the request
    #[error("LLM API error: {provider} - {message}")]
    LlmApi { provider: String, message: String },

    /// Timeout during a provider call
    #[error("Operation timed out after {duration_ms}ms")]
    Timeout { duration_ms: u64 },

    /// All attempts failed; the recorded failed response is attached
    #[error("LLM call failed after {attempts} attempts: {message}")]
    CallFailed {
        attempts: u32,
        message: String,
        response: Box<Response>,
    },

    /// History persistence error
    #[error("Persistence error: {0}")]
    Persistence(String),

    /// Pricing lookup failed
    #[error("Pricing error: {0}")]
    Pricing(String),

    /// Filesystem error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization/deserialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl Error {
    /// Create an LLM API error.
    pub fn llm_api(provider: impl Into<String>, message: impl Into<String>) -> Self {
        Self::LlmApi {
            provider: provider.into(),
            message: message.into(),
        }
    }

    /// Create a timeout error.
    pub fn timeout(duration_ms: u64) -> Self {
        Self::Timeout { duration_ms }
    }

    /// Create a model-not-found error listing the known identifiers.
    pub fn model_not_found(model: impl Into<String>, available: Vec<String>) -> Self {
        Self::ModelNotFound {
            model: model.into(),
            available,
        }
    }

    /// Whether another attempt may succeed.
    ///
    /// Only provider-call failures are retried; input, configuration and
    /// persistence errors abort immediately.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::LlmApi { .. } | Self::Timeout { .. })
    }

    /// The failed response recorded for a terminal call failure.
    pub fn failed_response(&self) -> Option<&Response> {
        match self {
            Self::CallFailed { response, .. } => Some(response),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_kinds() {
        assert!(Error::llm_api("openai", "rate limited").is_retryable());
        assert!(Error::timeout(500).is_retryable());
        assert!(!Error::InvalidInput("bad".to_string()).is_retryable());
        assert!(!Error::Persistence("no path".to_string()).is_retryable());
        assert!(!Error::model_not_found("x", vec![]).is_retryable());
    }

    #[test]
    fn test_model_not_found_lists_available() {
        let err = Error::model_not_found(
            "invalid-model",
            vec!["gemini-pro".to_string(), "gpt-4".to_string()],
        );
        let msg = err.to_string();
        assert!(msg.contains("invalid-model"));
        assert!(msg.contains("gemini-pro, gpt-4"));
    }
}
