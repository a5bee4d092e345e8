//! Data models for context management

use super::summarizer::SourceLanguage;
use super::token_estimator::{Tokenizer, TokenizerError};
use crate::cache::CacheKey;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Author of a message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    #[serde(alias = "assistant")]
    Agent,
    System,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Agent => "agent",
            Role::System => "system",
        }
    }
}

/// A single conversation message
///
/// Immutable once created; the token count is measured once at construction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    role: Role,
    content: String,
    token_count: usize,
    timestamp: DateTime<Utc>,
}

impl Message {
    /// Create a message, measuring its content with the tokenizer
    pub fn new(
        role: Role,
        content: impl Into<String>,
        tokenizer: &dyn Tokenizer,
    ) -> Result<Self, TokenizerError> {
        Self::at(role, content, Utc::now(), tokenizer)
    }

    /// Create a message with an explicit timestamp
    pub fn at(
        role: Role,
        content: impl Into<String>,
        timestamp: DateTime<Utc>,
        tokenizer: &dyn Tokenizer,
    ) -> Result<Self, TokenizerError> {
        let content = content.into();
        let token_count = tokenizer.count(&content)?;
        Ok(Self {
            role,
            content,
            token_count,
            timestamp,
        })
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn content(&self) -> &str {
        &self.content
    }

    pub fn token_count(&self) -> usize {
        self.token_count
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }
}

/// Ordered conversation history
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct History {
    messages: Vec<Message>,
}

impl History {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_messages(messages: Vec<Message>) -> Self {
        Self { messages }
    }

    pub fn push(&mut self, message: Message) {
        self.messages.push(message);
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn iter(&self) -> impl Iterator<Item = &Message> {
        self.messages.iter()
    }

    pub fn into_messages(self) -> Vec<Message> {
        self.messages
    }

    /// Sum of the cached per-message token counts
    pub fn total_tokens(&self) -> usize {
        total_tokens(&self.messages)
    }
}

impl FromIterator<Message> for History {
    fn from_iter<I: IntoIterator<Item = Message>>(iter: I) -> Self {
        Self {
            messages: iter.into_iter().collect(),
        }
    }
}

/// Sum of token counts over a slice of messages
pub fn total_tokens(messages: &[Message]) -> usize {
    messages.iter().map(Message::token_count).sum()
}

/// Render messages as a readable `[role]: content` transcript
pub fn render_transcript(messages: &[Message]) -> String {
    messages
        .iter()
        .map(|m| format!("[{}]: {}", m.role().as_str(), m.content()))
        .collect::<Vec<_>>()
        .join("\n\n")
}

/// Point-in-time usage of a context window
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct UsageSnapshot {
    pub used_tokens: usize,
    pub capacity: usize,
    pub percent: f64,
}

impl UsageSnapshot {
    /// Tokens left before the capacity is reached
    pub fn remaining(&self) -> usize {
        self.capacity.saturating_sub(self.used_tokens)
    }
}

/// Usage warning level, ordered by severity
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum WarningLevel {
    Ok,
    Medium,
    High,
    Critical,
}

impl WarningLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            WarningLevel::Ok => "OK",
            WarningLevel::Medium => "MEDIUM",
            WarningLevel::High => "HIGH",
            WarningLevel::Critical => "CRITICAL",
        }
    }

    /// Advisory text shown next to the level
    pub fn message(&self) -> Option<&'static str> {
        match self {
            WarningLevel::Ok => None,
            WarningLevel::Medium => Some("Consider compressing soon."),
            WarningLevel::High => Some("Compress now to avoid overflow."),
            WarningLevel::Critical => Some("Context nearly full! Compress immediately."),
        }
    }
}

/// Token accounting for one compaction
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CompactionStats {
    pub original_tokens: usize,
    pub compacted_tokens: usize,
    pub ratio: f64,
    pub messages_summarized: usize,
    pub batches: usize,
}

impl CompactionStats {
    pub fn tokens_saved(&self) -> usize {
        self.original_tokens.saturating_sub(self.compacted_tokens)
    }
}

/// Outcome of a compaction call
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompactionResult {
    /// Synthetic summary of the old segment; `None` for a no-op
    pub summary: Option<Message>,
    pub kept_tail: Vec<Message>,
    /// Key of the verbatim old segment in the content cache; `None` for a no-op
    pub cache_key: Option<CacheKey>,
    pub stats: CompactionStats,
    /// Whether the old segment was written to the cache
    pub committed: bool,
}

impl CompactionResult {
    /// True when nothing was summarized
    pub fn is_noop(&self) -> bool {
        self.summary.is_none()
    }

    /// Assemble `[summary] + tail`
    pub fn to_history(&self) -> History {
        self.summary
            .iter()
            .chain(self.kept_tail.iter())
            .cloned()
            .collect()
    }

    pub fn into_history(self) -> History {
        self.summary.into_iter().chain(self.kept_tail).collect()
    }
}

/// How `admit` treats a candidate artifact
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AdmissionMode {
    /// Full text when within the output budget, summary otherwise
    #[default]
    Auto,
    /// Summarize and cache even when the text would fit
    ForceSummary,
    /// Full text regardless of budget; nothing is cached
    ForceFull,
    /// Keep only declaration lines of source code
    Signatures { lang: SourceLanguage },
}

/// Outcome of admitting a new artifact into the context
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AdmissionResult {
    pub accepted_text: String,
    pub cache_key: Option<CacheKey>,
    pub was_summarized: bool,
    pub original_tokens: usize,
    pub accepted_tokens: usize,
    pub output_budget: usize,
}

impl AdmissionResult {
    /// Percentage of tokens saved by summarization
    pub fn savings_percent(&self) -> f64 {
        if self.original_tokens == 0 {
            return 0.0;
        }
        (1.0 - self.accepted_tokens as f64 / self.original_tokens as f64) * 100.0
    }
}
