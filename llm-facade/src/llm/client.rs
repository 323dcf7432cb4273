//! The chat client: normalization, retries, accounting and audit.

use chrono::Utc;
use serde_json::json;
use std::env;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, RwLock};
use tokio::time::Instant;

use super::audit::{AuditLog, AuditRecord};
use super::config::{ClientOptions, RetryPolicy};
use super::cost::{compute_usage, PricingOracle, SessionAccumulator, SessionSummary};
use super::history::ConversationHistory;
use super::models::ModelConfig;
use super::provider::{CompletionOutput, CompletionParams, CompletionProvider, ProviderRouter};
use super::types::{CallOptions, ChatInput, ChatMessage, Response, Role};
use crate::error::{Error, Result};

/// Builds an [`LlmClient`] with custom providers, pricing or accounting.
pub struct LlmClientBuilder {
    options: ClientOptions,
    router: Option<ProviderRouter>,
    oracle: Option<Arc<dyn PricingOracle>>,
    accumulator: Option<Arc<SessionAccumulator>>,
}

impl LlmClientBuilder {
    pub fn new(options: ClientOptions) -> Self {
        Self {
            options,
            router: None,
            oracle: None,
            accumulator: None,
        }
    }

    /// Replace the default HTTP providers.
    pub fn router(mut self, router: ProviderRouter) -> Self {
        self.router = Some(router);
        self
    }

    /// Consult `oracle` for call totals before falling back to local prices.
    pub fn oracle(mut self, oracle: Arc<dyn PricingOracle>) -> Self {
        self.oracle = Some(oracle);
        self
    }

    /// Share an accumulator, e.g. across several clients.
    pub fn accumulator(mut self, accumulator: Arc<SessionAccumulator>) -> Self {
        self.accumulator = Some(accumulator);
        self
    }

    /// Resolve the model, open the history and create the audit directory.
    pub fn build(self) -> Result<LlmClient> {
        let config = self.options.resolve_config()?;
        let session_id = new_session_id();
        let history = match &self.options.history_file {
            Some(path) => ConversationHistory::open(path)?,
            None => ConversationHistory::new(),
        };
        let audit = AuditLog::create(&self.options.log_dir, session_id.clone())?;

        tracing::debug!(
            session_id = %session_id,
            model = %config.qualified_name(),
            log_dir = %audit.dir().display(),
            "Created LLM client"
        );

        Ok(LlmClient {
            config: RwLock::new(config),
            history: Mutex::new(history),
            accumulator: self.accumulator.unwrap_or_default(),
            router: self.router.unwrap_or_else(ProviderRouter::http),
            oracle: self.oracle,
            audit,
            session_id,
            retry: self.options.retry,
        })
    }
}

/// Unified chat client over every supported provider.
///
/// `chat` takes `&self`, so one client can serve concurrent calls. Each
/// successful call updates history and session totals together; every call
/// that reaches a provider leaves exactly one audit record.
pub struct LlmClient {
    config: RwLock<ModelConfig>,
    history: Mutex<ConversationHistory>,
    accumulator: Arc<SessionAccumulator>,
    router: ProviderRouter,
    oracle: Option<Arc<dyn PricingOracle>>,
    audit: AuditLog,
    session_id: String,
    retry: RetryPolicy,
}

impl std::fmt::Debug for LlmClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LlmClient")
            .field("session_id", &self.session_id)
            .field("router", &self.router)
            .field("audit", &self.audit)
            .field("retry", &self.retry)
            .finish_non_exhaustive()
    }
}

impl LlmClient {
    /// Client with the HTTP providers and no pricing oracle.
    pub fn new(options: ClientOptions) -> Result<Self> {
        LlmClientBuilder::new(options).build()
    }

    pub fn builder(options: ClientOptions) -> LlmClientBuilder {
        LlmClientBuilder::new(options)
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    /// Copy of the active model config.
    pub async fn config(&self) -> ModelConfig {
        self.config.read().await.clone()
    }

    pub fn accumulator(&self) -> &Arc<SessionAccumulator> {
        &self.accumulator
    }

    pub fn audit_log(&self) -> &AuditLog {
        &self.audit
    }

    /// Send one chat request.
    ///
    /// The system prompt, when given, goes first on the wire but is never
    /// stored in history. `options` win over the model config.
    pub async fn chat(
        &self,
        input: impl Into<ChatInput>,
        system_prompt: Option<&str>,
        options: CallOptions,
    ) -> Result<Response> {
        let start = Instant::now();

        let mut messages = Vec::new();
        if let Some(system) = system_prompt {
            messages.push(ChatMessage::system(system));
        }
        messages.extend(input.into().normalize()?);

        let config = self.config().await;
        let params = build_params(&config, messages, options);
        let provider = self.router.get(config.provider)?;

        let attempts = config.attempts();
        let mut made = 0;
        let mut last_error = None;
        while made < attempts {
            if made > 0 {
                tokio::time::sleep(self.retry.delay(made - 1)).await;
            }
            made += 1;

            tracing::debug!(
                model = %params.model,
                attempt = made,
                attempts,
                "Calling provider"
            );
            match call_once(provider.as_ref(), &params).await {
                Ok(output) => return self.complete_call(&config, &params, output, start).await,
                Err(e) if e.is_retryable() && made < attempts => {
                    tracing::warn!(
                        model = %params.model,
                        attempt = made,
                        error = %e,
                        retry_in_ms = self.retry.delay(made - 1).as_millis() as u64,
                        "Provider call failed, retrying"
                    );
                    last_error = Some(e);
                }
                Err(e) => {
                    last_error = Some(e);
                    break;
                }
            }
        }

        let message = last_error
            .map(|e| e.to_string())
            .unwrap_or_else(|| "no attempts made".to_string());
        self.fail_call(&params, made, message, start)
    }

    async fn complete_call(
        &self,
        config: &ModelConfig,
        params: &CompletionParams,
        output: CompletionOutput,
        start: Instant,
    ) -> Result<Response> {
        let usage = compute_usage(config, output.usage, self.oracle.as_deref());
        let response = Response {
            content: output.content,
            usage,
            model: params.model.clone(),
            response_time: start.elapsed().as_secs_f64(),
            timestamp: Utc::now(),
            raw_response: Some(output.raw),
            error: None,
        };

        // History and totals change only once the record is on disk.
        self.audit.write(&AuditRecord::new(
            self.session_id.clone(),
            response.model.clone(),
            params.messages.clone(),
            response.raw_response.clone().unwrap_or_default(),
            &response.usage,
            response.response_time,
        ))?;

        {
            let mut history = self.history.lock().await;
            for message in params.messages.iter().filter(|m| m.role != Role::System) {
                history.add_message(message.role, message.content.clone(), None);
            }
            history.add_message(Role::Assistant, response.content.clone(), None);
            self.accumulator.merge(&response.usage).await;
        }

        tracing::info!(
            model = %response.model,
            prompt_tokens = response.usage.prompt_tokens,
            completion_tokens = response.usage.completion_tokens,
            cost = response.usage.total_cost,
            response_time = response.response_time,
            "LLM call succeeded"
        );
        Ok(response)
    }

    /// Record a terminal failure. An audit write error is logged and does not
    /// replace the `CallFailed` error.
    fn fail_call(
        &self,
        params: &CompletionParams,
        attempts: u32,
        message: String,
        start: Instant,
    ) -> Result<Response> {
        let response = Response::failed(
            params.model.clone(),
            start.elapsed().as_secs_f64(),
            message.clone(),
        );

        let record = AuditRecord::new(
            self.session_id.clone(),
            response.model.clone(),
            params.messages.clone(),
            json!({ "error": message }),
            &response.usage,
            response.response_time,
        );
        if let Err(e) = self.audit.write(&record) {
            tracing::error!(
                model = %params.model,
                error = %e,
                "Failed to write audit record for failed call"
            );
        }

        tracing::error!(model = %params.model, attempts, error = %message, "LLM call failed");
        Err(Error::CallFailed {
            attempts,
            message,
            response: Box::new(response),
        })
    }

    /// Session totals with per-call averages.
    pub async fn session_summary(&self) -> SessionSummary {
        let totals = self.accumulator.snapshot().await;
        let model = self.config.read().await.qualified_name();
        SessionSummary::from_totals(self.session_id.clone(), model, &totals)
    }

    /// Copy of the conversation history.
    pub async fn history(&self) -> ConversationHistory {
        self.history.lock().await.clone()
    }

    pub async fn clear_history(&self) {
        self.history.lock().await.clear();
    }

    /// Persist history to its backing file.
    pub async fn save_history(&self) -> Result<()> {
        self.history.lock().await.save(None)
    }

    pub async fn export_markdown(&self) -> String {
        self.history.lock().await.export_markdown()
    }

    /// Switch to another preset; calls already in flight keep the old config.
    pub async fn switch_model(&self, model: &str) -> Result<()> {
        let config = ModelConfig::preset(model)?;
        tracing::info!(model = %config.qualified_name(), "Switched model");
        *self.config.write().await = config;
        Ok(())
    }
}

/// One provider attempt bounded by the per-attempt timeout.
async fn call_once(
    provider: &dyn CompletionProvider,
    params: &CompletionParams,
) -> Result<CompletionOutput> {
    let limit = Duration::from_secs(params.timeout_secs);
    match tokio::time::timeout(limit, provider.complete(params)).await {
        Ok(result) => result,
        Err(_) => Err(Error::timeout(limit.as_millis() as u64)),
    }
}

/// Merge config defaults, the provider's key and per-call overrides.
fn build_params(
    config: &ModelConfig,
    messages: Vec<ChatMessage>,
    options: CallOptions,
) -> CompletionParams {
    let api_key = options
        .api_key
        .or_else(|| config.api_key.clone())
        .or_else(|| env::var(config.provider.api_key_env()).ok())
        .filter(|key| !key.is_empty());

    CompletionParams {
        model: config.qualified_name(),
        messages,
        temperature: options.temperature.unwrap_or(config.temperature),
        top_p: options.top_p.unwrap_or(config.top_p),
        timeout_secs: options.timeout_secs.unwrap_or(config.timeout_secs),
        max_tokens: options.max_tokens.or(config.max_tokens),
        api_key,
        api_base: options.api_base.or_else(|| config.api_base.clone()),
        stream: false,
        extra: options.extra,
    }
}

fn new_session_id() -> String {
    let suffix = uuid::Uuid::new_v4().simple().to_string();
    format!("{}_{}", Utc::now().format("%Y%m%d_%H%M%S"), &suffix[..8])
}
