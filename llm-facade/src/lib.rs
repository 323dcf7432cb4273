//! # llm-facade
//!
//! A single chat interface in front of OpenAI, Anthropic, Google Gemini and
//! DeepSeek, with per-call cost accounting, conversation history and an
//! on-disk audit trail.
//!
//! ## Core Components
//!
//! - **Client**: `LlmClient::chat` with retries and exponential backoff
//! - **Models**: presets and provider-qualified model names
//! - **Cost**: per-call usage pricing and session totals
//! - **History**: persistent conversation log with token-budget truncation
//! - **Audit**: one JSON record per call
//!
//! ## Example
//!
//! ```rust,ignore
//! use llm_facade::{CallOptions, ClientOptions, LlmClient};
//!
//! let client = LlmClient::new(ClientOptions::from_env())?;
//! let response = client.chat("Hello", None, CallOptions::new()).await?;
//! println!("{}", response.content);
//! ```

pub mod error;
pub mod llm;

// Re-exports for convenience
pub use error::{Error, Result};
pub use llm::{
    CallOptions, ChatInput, ChatMessage, ClientOptions, CompletionProvider, ConversationHistory,
    LlmClient, LlmClientBuilder, Message, ModelConfig, PricingOracle, Provider, ProviderRouter,
    Response, RetryPolicy, Role, SessionAccumulator, SessionSummary, Usage,
};
