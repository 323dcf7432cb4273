//! Conversation history with JSON persistence and markdown export.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use super::types::{ChatMessage, Message, Role};
use crate::error::{Error, Result};

/// Creation and modification stamps for a history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryMetadata {
    pub created_at: DateTime<Utc>,
    pub last_updated: DateTime<Utc>,
}

impl HistoryMetadata {
    fn now() -> Self {
        let now = Utc::now();
        Self {
            created_at: now,
            last_updated: now,
        }
    }
}

/// Persisted document layout.
#[derive(Debug, Serialize, Deserialize)]
struct HistoryDocument {
    metadata: HistoryMetadata,
    #[serde(default)]
    messages: Vec<Message>,
}

/// Ordered message log for one conversation.
///
/// Never persisted implicitly; call [`save`](Self::save) to write it out.
#[derive(Debug, Clone)]
pub struct ConversationHistory {
    messages: Vec<Message>,
    metadata: HistoryMetadata,
    path: Option<PathBuf>,
}

impl Default for ConversationHistory {
    fn default() -> Self {
        Self::new()
    }
}

impl ConversationHistory {
    /// Empty history with no backing file.
    pub fn new() -> Self {
        Self {
            messages: Vec::new(),
            metadata: HistoryMetadata::now(),
            path: None,
        }
    }

    /// History backed by `path`, hydrated from it when the file exists.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let mut history = Self {
            path: Some(path.clone()),
            ..Self::new()
        };
        if path.exists() {
            history.load(None)?;
        }
        Ok(history)
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    pub fn metadata(&self) -> &HistoryMetadata {
        &self.metadata
    }

    fn touch(&mut self) {
        self.metadata.last_updated = Utc::now();
    }

    /// Append a message.
    pub fn add_message(
        &mut self,
        role: Role,
        content: impl Into<String>,
        metadata: Option<HashMap<String, Value>>,
    ) {
        let mut message = Message::new(role, content);
        if let Some(metadata) = metadata {
            message.metadata = metadata;
        }
        self.messages.push(message);
        self.touch();
    }

    /// The most recent `limit` messages (all when `None` or zero), oldest first.
    pub fn messages(&self, limit: Option<usize>) -> Vec<Message> {
        self.window(limit).to_vec()
    }

    /// Same window as [`messages`](Self::messages), reduced to role/content pairs.
    pub fn formatted_messages(&self, limit: Option<usize>) -> Vec<ChatMessage> {
        self.window(limit).iter().map(Message::to_chat).collect()
    }

    fn window(&self, limit: Option<usize>) -> &[Message] {
        match limit {
            Some(n) if n > 0 => &self.messages[self.messages.len().saturating_sub(n)..],
            _ => &self.messages,
        }
    }

    pub fn clear(&mut self) {
        self.messages.clear();
        self.touch();
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    fn resolve_path(&self, path: Option<&Path>, action: &str) -> Result<PathBuf> {
        path.map(Path::to_path_buf)
            .or_else(|| self.path.clone())
            .ok_or_else(|| Error::Persistence(format!("No filepath specified for {}", action)))
    }

    /// Write the full history to `path`, or to the backing file.
    pub fn save(&self, path: Option<&Path>) -> Result<()> {
        let path = self.resolve_path(path, "saving")?;
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }
        let document = HistoryDocument {
            metadata: self.metadata.clone(),
            messages: self.messages.clone(),
        };
        fs::write(&path, serde_json::to_string_pretty(&document)?)?;
        tracing::debug!(path = %path.display(), messages = self.messages.len(), "Saved history");
        Ok(())
    }

    /// Replace in-memory state with the contents of `path` or the backing file.
    pub fn load(&mut self, path: Option<&Path>) -> Result<()> {
        let path = self.resolve_path(path, "loading")?;
        let raw = fs::read_to_string(&path).map_err(|e| {
            Error::Persistence(format!("failed to read {}: {}", path.display(), e))
        })?;
        let document: HistoryDocument = serde_json::from_str(&raw).map_err(|e| {
            Error::Persistence(format!("corrupt history file {}: {}", path.display(), e))
        })?;
        self.metadata = document.metadata;
        self.messages = document.messages;
        self.touch();
        tracing::debug!(path = %path.display(), messages = self.messages.len(), "Loaded history");
        Ok(())
    }

    /// Human-readable transcript, one section per message.
    pub fn export_markdown(&self) -> String {
        let mut lines = vec![
            "# Conversation History\n".to_string(),
            format!("Created: {}\n", self.metadata.created_at.to_rfc3339()),
            format!("Last Updated: {}\n", self.metadata.last_updated.to_rfc3339()),
            "---\n".to_string(),
        ];
        for msg in &self.messages {
            lines.push(format!(
                "## {} ({})\n",
                msg.role.title(),
                msg.timestamp.format("%Y-%m-%d %H:%M:%S")
            ));
            lines.push(format!("{}\n", msg.content));
            lines.push("---\n".to_string());
        }
        lines.join("\n")
    }

    /// Crude token estimate: total characters / 4, rounded down.
    ///
    /// This is not a tokenizer; it only needs to be monotonic in content size.
    pub fn estimate_tokens(&self) -> usize {
        let chars: usize = self.messages.iter().map(|m| m.content.chars().count()).sum();
        chars / 4
    }

    /// Drop old messages until the estimate fits in `max_tokens`.
    ///
    /// System messages are kept first when `keep_system` is set. Other
    /// messages are taken newest-first until one does not fit; everything
    /// older than that is dropped.
    pub fn truncate_to_token_limit(&mut self, max_tokens: usize, keep_system: bool) {
        if self.estimate_tokens() <= max_tokens {
            return;
        }
        let before = self.messages.len();

        let (system, other): (Vec<Message>, Vec<Message>) = std::mem::take(&mut self.messages)
            .into_iter()
            .partition(|m| m.role == Role::System);

        let mut kept = Vec::new();
        let mut available = max_tokens;
        if keep_system {
            let system_tokens: usize = system.iter().map(Message::approx_tokens).sum();
            available = available.saturating_sub(system_tokens);
            kept.extend(system);
        }

        let mut recent = Vec::new();
        for msg in other.into_iter().rev() {
            let tokens = msg.approx_tokens();
            if tokens > available {
                break;
            }
            available -= tokens;
            recent.push(msg);
        }
        recent.reverse();
        kept.extend(recent);

        tracing::debug!(
            before,
            after = kept.len(),
            max_tokens,
            "Truncated history"
        );
        self.messages = kept;
        self.touch();
    }
}

impl std::fmt::Display for ConversationHistory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "ConversationHistory(messages={}, tokens≈{})",
            self.messages.len(),
            self.estimate_tokens()
        )
    }
}
