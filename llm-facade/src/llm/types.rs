//! LLM types for messages, usage accounting, and responses.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::collections::HashMap;
use std::str::FromStr;

use crate::error::{Error, Result};

/// Role in a conversation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::System => "system",
            Self::User => "user",
            Self::Assistant => "assistant",
        }
    }

    /// Capitalized form used in transcripts.
    pub fn title(&self) -> &'static str {
        match self {
            Self::System => "System",
            Self::User => "User",
            Self::Assistant => "Assistant",
        }
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "system" => Ok(Self::System),
            "user" => Ok(Self::User),
            "assistant" => Ok(Self::Assistant),
            other => Err(Error::InvalidInput(format!("unknown role: {}", other))),
        }
    }
}

/// A message held in conversation history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
    pub timestamp: DateTime<Utc>,
    /// Free-form annotations carried alongside the message
    #[serde(default)]
    pub metadata: HashMap<String, Value>,
}

impl Message {
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
            timestamp: Utc::now(),
            metadata: HashMap::new(),
        }
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self::new(Role::System, content)
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::new(Role::User, content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(Role::Assistant, content)
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    /// Reduce to the role/content pair sent to providers.
    pub fn to_chat(&self) -> ChatMessage {
        ChatMessage {
            role: self.role,
            content: self.content.clone(),
        }
    }

    /// Rough token estimate: ~4 chars per token.
    pub fn approx_tokens(&self) -> usize {
        self.content.chars().count() / 4
    }
}

/// Role/content pair in the shape providers expect.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

impl ChatMessage {
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
        }
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self::new(Role::System, content)
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::new(Role::User, content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(Role::Assistant, content)
    }

    /// Parse an untyped `{"role": .., "content": ..}` record.
    pub fn from_record(record: &Value) -> Result<Self> {
        let obj = record.as_object().ok_or_else(|| {
            Error::InvalidInput(format!("Invalid message type: expected object, got {}", record))
        })?;
        let role = obj
            .get("role")
            .and_then(Value::as_str)
            .ok_or_else(|| Error::InvalidInput("message is missing a string `role`".to_string()))?
            .parse::<Role>()?;
        let content = obj
            .get("content")
            .and_then(Value::as_str)
            .ok_or_else(|| {
                Error::InvalidInput("message is missing a string `content`".to_string())
            })?;
        Ok(Self::new(role, content))
    }
}

impl From<&Message> for ChatMessage {
    fn from(message: &Message) -> Self {
        message.to_chat()
    }
}

/// Input accepted by `LlmClient::chat`.
#[derive(Debug, Clone)]
pub enum ChatInput {
    /// A single user turn
    Text(String),
    /// Structured history messages
    Messages(Vec<Message>),
    /// Typed role/content pairs
    Pairs(Vec<ChatMessage>),
    /// Untyped role/content records, validated on normalization
    Records(Vec<Value>),
}

impl ChatInput {
    /// Convert into the ordered role/content list, rejecting malformed records.
    pub fn normalize(self) -> Result<Vec<ChatMessage>> {
        match self {
            Self::Text(text) => Ok(vec![ChatMessage::user(text)]),
            Self::Messages(messages) => Ok(messages.iter().map(Message::to_chat).collect()),
            Self::Pairs(pairs) => Ok(pairs),
            Self::Records(records) => records.iter().map(ChatMessage::from_record).collect(),
        }
    }
}

impl From<&str> for ChatInput {
    fn from(text: &str) -> Self {
        Self::Text(text.to_string())
    }
}

impl From<String> for ChatInput {
    fn from(text: String) -> Self {
        Self::Text(text)
    }
}

impl From<Vec<Message>> for ChatInput {
    fn from(messages: Vec<Message>) -> Self {
        Self::Messages(messages)
    }
}

impl From<Vec<ChatMessage>> for ChatInput {
    fn from(pairs: Vec<ChatMessage>) -> Self {
        Self::Pairs(pairs)
    }
}

impl From<Vec<Value>> for ChatInput {
    fn from(records: Vec<Value>) -> Self {
        Self::Records(records)
    }
}

/// Token counts as reported by a provider.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawUsage {
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
    /// Provider-reported total, trusted as-is when present
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total_tokens: Option<u64>,
}

impl RawUsage {
    pub fn new(prompt_tokens: u64, completion_tokens: u64) -> Self {
        Self {
            prompt_tokens,
            completion_tokens,
            total_tokens: None,
        }
    }

    pub fn total(&self) -> u64 {
        self.total_tokens
            .unwrap_or(self.prompt_tokens + self.completion_tokens)
    }
}

/// Token usage and cost for one call.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Usage {
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
    pub total_tokens: u64,
    /// Cost in USD
    pub prompt_cost: f64,
    pub completion_cost: f64,
    pub total_cost: f64,
    pub model: String,
}

impl Usage {
    /// Zero usage, as recorded for failed calls.
    pub fn empty(model: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            ..Self::default()
        }
    }

    /// Breakdown written to the audit log.
    pub fn cost_breakdown(&self) -> Value {
        json!({
            "prompt": {"tokens": self.prompt_tokens, "cost": self.prompt_cost},
            "completion": {"tokens": self.completion_tokens, "cost": self.completion_cost},
            "total": {"tokens": self.total_tokens, "cost": self.total_cost},
            "model": self.model,
        })
    }
}

/// Outcome of a chat call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Response {
    pub content: String,
    pub usage: Usage,
    pub model: String,
    /// Wall-clock seconds from the start of the call
    pub response_time: f64,
    pub timestamp: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub raw_response: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl Response {
    /// Response recorded when every attempt failed.
    pub fn failed(model: impl Into<String>, response_time: f64, error: impl Into<String>) -> Self {
        let model = model.into();
        Self {
            content: String::new(),
            usage: Usage::empty(model.clone()),
            model,
            response_time,
            timestamp: Utc::now(),
            raw_response: None,
            error: Some(error.into()),
        }
    }

    pub fn is_error(&self) -> bool {
        self.error.is_some()
    }
}

/// Per-call overrides; any value set here wins over the active model config.
#[derive(Debug, Clone, Default)]
pub struct CallOptions {
    pub temperature: Option<f64>,
    pub top_p: Option<f64>,
    pub max_tokens: Option<u32>,
    pub timeout_secs: Option<u64>,
    pub api_key: Option<String>,
    pub api_base: Option<String>,
    /// Provider-specific parameters passed through untouched
    pub extra: Map<String, Value>,
}

impl CallOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_temperature(mut self, temperature: f64) -> Self {
        self.temperature = Some(temperature);
        self
    }

    pub fn with_top_p(mut self, top_p: f64) -> Self {
        self.top_p = Some(top_p);
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = Some(max_tokens);
        self
    }

    pub fn with_timeout(mut self, secs: u64) -> Self {
        self.timeout_secs = Some(secs);
        self
    }

    pub fn with_api_key(mut self, key: impl Into<String>) -> Self {
        self.api_key = Some(key.into());
        self
    }

    pub fn with_api_base(mut self, url: impl Into<String>) -> Self {
        self.api_base = Some(url.into());
        self
    }

    pub fn with_extra(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.extra.insert(key.into(), value.into());
        self
    }
}
