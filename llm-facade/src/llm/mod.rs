//! Unified chat client over several LLM providers.
//!
//! One [`LlmClient::chat`] call normalizes the input, dispatches to the
//! provider named by the active [`ModelConfig`], retries transient failures
//! with exponential backoff, prices the call and records it in history, the
//! session totals and the audit log.
//!
//! ## Example
//!
//! ```rust,ignore
//! use llm_facade::llm::{CallOptions, ClientOptions, LlmClient};
//!
//! let client = LlmClient::new(ClientOptions::from_env().with_model("gpt-4"))?;
//! let response = client
//!     .chat("Summarize this file", Some("You are terse."), CallOptions::new())
//!     .await?;
//! println!("{} (${:.4})", response.content, response.usage.total_cost);
//! println!("{:?}", client.session_summary().await);
//! ```

mod audit;
mod client;
mod config;
mod cost;
mod history;
mod models;
mod provider;
mod types;

pub use audit::{AuditLog, AuditRecord};
pub use client::{LlmClient, LlmClientBuilder};
pub use config::{ClientOptions, RetryPolicy, DEFAULT_LOG_DIR, DEFAULT_MODEL};
pub use cost::{
    compute_usage, ModelCosts, ModelPricing, PricingCatalog, PricingOracle, SessionAccumulator,
    SessionSummary, SessionTotals,
};
pub use history::{ConversationHistory, HistoryMetadata};
pub use models::{derive_model_name, preset_names, presets, ModelConfig, Provider};
pub use provider::{
    AnthropicProvider, CompletionOutput, CompletionParams, CompletionProvider, GoogleProvider,
    OpenAiProvider, ProviderRouter,
};
pub use types::{
    CallOptions, ChatInput, ChatMessage, Message, RawUsage, Response, Role, Usage,
};
