//! Completion provider trait and HTTP implementations.

use async_trait::async_trait;
use reqwest::Client;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use super::models::Provider;
use super::types::{ChatMessage, RawUsage, Role};
use crate::error::{Error, Result};

/// Fully resolved parameters for one completion attempt.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CompletionParams {
    /// Qualified model identifier (may carry a routing prefix)
    pub model: String,
    pub messages: Vec<ChatMessage>,
    pub temperature: f64,
    pub top_p: f64,
    /// Per-attempt timeout in seconds
    pub timeout_secs: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
    #[serde(skip_serializing)]
    pub api_key: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_base: Option<String>,
    /// Always false at this layer
    pub stream: bool,
    #[serde(skip_serializing_if = "Map::is_empty")]
    pub extra: Map<String, Value>,
}

impl CompletionParams {
    /// Model id with any `provider/` routing prefix removed.
    pub fn wire_model(&self) -> &str {
        self.model
            .split_once('/')
            .map(|(_, name)| name)
            .unwrap_or(&self.model)
    }

    fn system_prompt(&self) -> Option<String> {
        let system: Vec<&str> = self
            .messages
            .iter()
            .filter(|m| m.role == Role::System)
            .map(|m| m.content.as_str())
            .collect();
        (!system.is_empty()).then(|| system.join("\n\n"))
    }
}

/// Successful completion as returned by a provider.
#[derive(Debug, Clone, PartialEq)]
pub struct CompletionOutput {
    pub content: String,
    pub usage: RawUsage,
    /// Provider payload, kept for the audit log
    pub raw: Value,
}

/// A provider capable of producing chat completions.
#[async_trait]
pub trait CompletionProvider: Send + Sync {
    /// Run one completion attempt.
    async fn complete(&self, params: &CompletionParams) -> Result<CompletionOutput>;

    /// The provider this implementation serves.
    fn provider(&self) -> Provider;
}

/// Routes calls to the provider implementation named by a model config.
#[derive(Clone, Default)]
pub struct ProviderRouter {
    providers: HashMap<Provider, Arc<dyn CompletionProvider>>,
}

impl ProviderRouter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Router with the HTTP implementation for every known provider.
    pub fn http() -> Self {
        Self::new()
            .with_provider(Arc::new(OpenAiProvider::new()))
            .with_provider(Arc::new(OpenAiProvider::deepseek()))
            .with_provider(Arc::new(AnthropicProvider::new()))
            .with_provider(Arc::new(GoogleProvider::new()))
    }

    /// Register (or replace) the implementation for its provider.
    pub fn with_provider(mut self, provider: Arc<dyn CompletionProvider>) -> Self {
        self.providers.insert(provider.provider(), provider);
        self
    }

    /// Register one implementation under an explicit provider key.
    pub fn with_provider_as(
        mut self,
        provider: Provider,
        implementation: Arc<dyn CompletionProvider>,
    ) -> Self {
        self.providers.insert(provider, implementation);
        self
    }

    pub fn get(&self, provider: Provider) -> Result<&Arc<dyn CompletionProvider>> {
        self.providers
            .get(&provider)
            .ok_or_else(|| Error::Config(format!("No client for provider: {}", provider)))
    }

    pub fn providers(&self) -> Vec<Provider> {
        self.providers.keys().copied().collect()
    }
}

impl std::fmt::Debug for ProviderRouter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderRouter")
            .field("providers", &self.providers())
            .finish()
    }
}

/// Send a JSON request and return the parsed body, mapping HTTP failures
/// into provider errors.
async fn send_json(
    provider: Provider,
    request: reqwest::RequestBuilder,
    timeout_secs: u64,
    body: &impl Serialize,
) -> Result<Value> {
    let response = request
        .timeout(Duration::from_secs(timeout_secs))
        .header("content-type", "application/json")
        .json(body)
        .send()
        .await
        .map_err(|e| Error::llm_api(provider.to_string(), format!("HTTP request failed: {}", e)))?;

    let status = response.status();
    let text = response.text().await.map_err(|e| {
        Error::llm_api(provider.to_string(), format!("Failed to read response: {}", e))
    })?;

    if !status.is_success() {
        let message = envelope_message(&text).unwrap_or(text);
        return Err(Error::llm_api(
            provider.to_string(),
            format!("API error ({}): {}", status, message),
        ));
    }

    serde_json::from_str(&text).map_err(|e| {
        Error::llm_api(provider.to_string(), format!("Failed to parse response: {}", e))
    })
}

fn require_key(provider: Provider, params: &CompletionParams) -> Result<String> {
    params.api_key.clone().ok_or_else(|| {
        Error::llm_api(
            provider.to_string(),
            format!("missing API key (set {})", provider.api_key_env()),
        )
    })
}

fn decode<T: DeserializeOwned>(provider: Provider, raw: &Value) -> Result<T> {
    T::deserialize(raw).map_err(|e| {
        Error::llm_api(provider.to_string(), format!("Malformed response: {}", e))
    })
}

// OpenAI-compatible API types
#[derive(Debug, Serialize)]
struct OpenAiRequest<'a> {
    model: &'a str,
    messages: &'a [ChatMessage],
    temperature: f64,
    top_p: f64,
    stream: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
    #[serde(flatten)]
    extra: &'a Map<String, Value>,
}

#[derive(Debug, Deserialize)]
struct OpenAiResponse {
    choices: Vec<OpenAiChoice>,
    usage: Option<OpenAiUsage>,
}

#[derive(Debug, Deserialize)]
struct OpenAiChoice {
    message: OpenAiMessage,
}

#[derive(Debug, Deserialize)]
struct OpenAiMessage {
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct OpenAiUsage {
    prompt_tokens: u64,
    completion_tokens: u64,
    total_tokens: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct ErrorEnvelope {
    error: ErrorDetail,
}

#[derive(Debug, Deserialize)]
struct ErrorDetail {
    message: String,
}

fn envelope_message(body: &str) -> Option<String> {
    serde_json::from_str::<ErrorEnvelope>(body)
        .ok()
        .map(|e| e.error.message)
}

/// OpenAI chat-completions client; also serves OpenAI-compatible vendors.
pub struct OpenAiProvider {
    provider: Provider,
    default_base_url: &'static str,
    http: Client,
}

impl OpenAiProvider {
    const OPENAI_BASE_URL: &'static str = "https://api.openai.com/v1";
    const DEEPSEEK_BASE_URL: &'static str = "https://api.deepseek.com/v1";

    pub fn new() -> Self {
        Self::with_base(Provider::OpenAI, Self::OPENAI_BASE_URL)
    }

    /// DeepSeek speaks the OpenAI wire format.
    pub fn deepseek() -> Self {
        Self::with_base(Provider::DeepSeek, Self::DEEPSEEK_BASE_URL)
    }

    fn with_base(provider: Provider, default_base_url: &'static str) -> Self {
        Self {
            provider,
            default_base_url,
            http: Client::new(),
        }
    }
}

impl Default for OpenAiProvider {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CompletionProvider for OpenAiProvider {
    async fn complete(&self, params: &CompletionParams) -> Result<CompletionOutput> {
        let api_key = require_key(self.provider, params)?;
        let base = params.api_base.as_deref().unwrap_or(self.default_base_url);
        let url = format!("{}/chat/completions", base.trim_end_matches('/'));

        let body = OpenAiRequest {
            model: params.wire_model(),
            messages: &params.messages,
            temperature: params.temperature,
            top_p: params.top_p,
            stream: false,
            max_tokens: params.max_tokens,
            extra: &params.extra,
        };

        let request = self
            .http
            .post(&url)
            .header("Authorization", format!("Bearer {}", api_key));
        let raw = send_json(self.provider, request, params.timeout_secs, &body).await?;

        let parsed: OpenAiResponse = decode(self.provider, &raw)?;
        let choice = parsed.choices.into_iter().next().ok_or_else(|| {
            Error::llm_api(self.provider.to_string(), "No choices in response")
        })?;
        let usage = parsed
            .usage
            .map(|u| RawUsage {
                prompt_tokens: u.prompt_tokens,
                completion_tokens: u.completion_tokens,
                total_tokens: u.total_tokens,
            })
            .unwrap_or_default();

        Ok(CompletionOutput {
            content: choice.message.content.unwrap_or_default(),
            usage,
            raw,
        })
    }

    fn provider(&self) -> Provider {
        self.provider
    }
}

// Anthropic API types
#[derive(Debug, Serialize)]
struct AnthropicRequest<'a> {
    model: &'a str,
    messages: Vec<&'a ChatMessage>,
    max_tokens: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    system: Option<String>,
    temperature: f64,
    top_p: f64,
    #[serde(flatten)]
    extra: &'a Map<String, Value>,
}

#[derive(Debug, Deserialize)]
struct AnthropicResponse {
    content: Vec<AnthropicContent>,
    usage: AnthropicUsage,
}

#[derive(Debug, Deserialize)]
struct AnthropicContent {
    text: Option<String>,
}

#[derive(Debug, Deserialize)]
struct AnthropicUsage {
    input_tokens: u64,
    output_tokens: u64,
}

/// Anthropic messages API client.
pub struct AnthropicProvider {
    http: Client,
}

impl AnthropicProvider {
    const DEFAULT_BASE_URL: &'static str = "https://api.anthropic.com";
    const API_VERSION: &'static str = "2023-06-01";
    const DEFAULT_MAX_TOKENS: u32 = 4096;

    pub fn new() -> Self {
        Self {
            http: Client::new(),
        }
    }
}

impl Default for AnthropicProvider {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CompletionProvider for AnthropicProvider {
    async fn complete(&self, params: &CompletionParams) -> Result<CompletionOutput> {
        let api_key = require_key(Provider::Anthropic, params)?;
        let base = params.api_base.as_deref().unwrap_or(Self::DEFAULT_BASE_URL);
        let url = format!("{}/v1/messages", base.trim_end_matches('/'));

        // System turns travel in their own field
        let body = AnthropicRequest {
            model: params.wire_model(),
            messages: params
                .messages
                .iter()
                .filter(|m| m.role != Role::System)
                .collect(),
            max_tokens: params.max_tokens.unwrap_or(Self::DEFAULT_MAX_TOKENS),
            system: params.system_prompt(),
            temperature: params.temperature,
            top_p: params.top_p,
            extra: &params.extra,
        };

        let request = self
            .http
            .post(&url)
            .header("x-api-key", api_key)
            .header("anthropic-version", Self::API_VERSION);
        let raw = send_json(Provider::Anthropic, request, params.timeout_secs, &body).await?;

        let parsed: AnthropicResponse = decode(Provider::Anthropic, &raw)?;
        let content = parsed
            .content
            .iter()
            .filter_map(|c| c.text.as_deref())
            .collect::<Vec<_>>()
            .join("");

        Ok(CompletionOutput {
            content,
            usage: RawUsage::new(parsed.usage.input_tokens, parsed.usage.output_tokens),
            raw,
        })
    }

    fn provider(&self) -> Provider {
        Provider::Anthropic
    }
}

// Google Gemini API types
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GeminiRequest {
    contents: Vec<GeminiContent>,
    #[serde(skip_serializing_if = "Option::is_none")]
    system_instruction: Option<GeminiContent>,
    generation_config: GeminiGenerationConfig,
}

#[derive(Debug, Serialize, Deserialize)]
struct GeminiContent {
    #[serde(default)]
    role: String,
    parts: Vec<GeminiPart>,
}

#[derive(Debug, Serialize, Deserialize)]
struct GeminiPart {
    #[serde(default)]
    text: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GeminiGenerationConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    max_output_tokens: Option<u32>,
    temperature: f64,
    top_p: f64,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GeminiResponse {
    candidates: Vec<GeminiCandidate>,
    usage_metadata: Option<GeminiUsageMetadata>,
}

#[derive(Debug, Deserialize)]
struct GeminiCandidate {
    content: GeminiContent,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GeminiUsageMetadata {
    prompt_token_count: u64,
    candidates_token_count: Option<u64>,
    total_token_count: Option<u64>,
}

/// Google Gemini generateContent client.
pub struct GoogleProvider {
    http: Client,
}

impl GoogleProvider {
    const DEFAULT_BASE_URL: &'static str = "https://generativelanguage.googleapis.com";

    pub fn new() -> Self {
        Self {
            http: Client::new(),
        }
    }
}

impl Default for GoogleProvider {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CompletionProvider for GoogleProvider {
    async fn complete(&self, params: &CompletionParams) -> Result<CompletionOutput> {
        let api_key = require_key(Provider::Google, params)?;
        let base = params.api_base.as_deref().unwrap_or(Self::DEFAULT_BASE_URL);
        let url = format!(
            "{}/v1beta/models/{}:generateContent",
            base.trim_end_matches('/'),
            params.wire_model()
        );

        let contents = params
            .messages
            .iter()
            .filter(|m| m.role != Role::System)
            .map(|m| GeminiContent {
                role: match m.role {
                    Role::Assistant => "model".to_string(),
                    _ => "user".to_string(),
                },
                parts: vec![GeminiPart {
                    text: m.content.clone(),
                }],
            })
            .collect();

        let body = GeminiRequest {
            contents,
            system_instruction: params.system_prompt().map(|text| GeminiContent {
                role: "user".to_string(),
                parts: vec![GeminiPart { text }],
            }),
            generation_config: GeminiGenerationConfig {
                max_output_tokens: params.max_tokens,
                temperature: params.temperature,
                top_p: params.top_p,
            },
        };

        let request = self.http.post(&url).header("x-goog-api-key", api_key);
        let raw = send_json(Provider::Google, request, params.timeout_secs, &body).await?;

        let parsed: GeminiResponse = decode(Provider::Google, &raw)?;
        let candidate = parsed.candidates.into_iter().next().ok_or_else(|| {
            Error::llm_api(Provider::Google.to_string(), "No candidates in response")
        })?;
        let content = candidate
            .content
            .parts
            .into_iter()
            .map(|p| p.text)
            .collect::<Vec<_>>()
            .join("");
        let usage = parsed
            .usage_metadata
            .map(|u| RawUsage {
                prompt_tokens: u.prompt_token_count,
                completion_tokens: u.candidates_token_count.unwrap_or(0),
                total_tokens: u.total_token_count,
            })
            .unwrap_or_default();

        Ok(CompletionOutput {
            content,
            usage,
            raw,
        })
    }

    fn provider(&self) -> Provider {
        Provider::Google
    }
}
