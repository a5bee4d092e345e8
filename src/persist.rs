//! JSON persistence for histories and usage ledgers
//!
//! Token counts are never trusted from disk: every loaded message is
//! re-measured with the caller's tokenizer.

use crate::context::models::{History, Message, Role};
use crate::context::token_estimator::Tokenizer;
use crate::error::{ContextError, Result};
use crate::ledger::UsageLedger;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::{debug, info};

#[derive(Deserialize)]
#[serde(untagged)]
enum HistoryFile {
    Bare(Vec<StoredMessage>),
    Envelope { messages: Vec<StoredMessage> },
}

#[derive(Deserialize)]
struct StoredMessage {
    role: Role,
    content: StoredContent,
    #[serde(default)]
    timestamp: Option<DateTime<Utc>>,
}

/// Plain text, or a list of content blocks whose text parts are joined
#[derive(Deserialize)]
#[serde(untagged)]
enum StoredContent {
    Text(String),
    Blocks(Vec<ContentBlock>),
}

#[derive(Deserialize)]
struct ContentBlock {
    #[serde(default)]
    text: Option<String>,
}

impl StoredContent {
    fn into_text(self) -> String {
        match self {
            StoredContent::Text(text) => text,
            StoredContent::Blocks(blocks) => blocks
                .into_iter()
                .filter_map(|block| block.text)
                .collect::<Vec<_>>()
                .join(" "),
        }
    }
}

#[derive(Serialize)]
struct HistoryEnvelope<'a> {
    messages: &'a History,
}

/// Parse a history document, re-measuring every message
pub fn parse_history(json: &str, tokenizer: &dyn Tokenizer) -> Result<History> {
    let file: HistoryFile = serde_json::from_str(json)?;
    let stored = match file {
        HistoryFile::Bare(messages) => messages,
        HistoryFile::Envelope { messages } => messages,
    };

    let now = Utc::now();
    stored
        .into_iter()
        .map(|m| -> Result<Message> {
            let timestamp = m.timestamp.unwrap_or(now);
            Ok(Message::at(m.role, m.content.into_text(), timestamp, tokenizer)?)
        })
        .collect()
}

/// Load a history from a JSON file
pub async fn load_history(path: impl AsRef<Path>, tokenizer: &dyn Tokenizer) -> Result<History> {
    let path = path.as_ref();
    let json = tokio::fs::read_to_string(path).await.map_err(|e| {
        ContextError::Persistence(format!("failed to read {}: {}", path.display(), e))
    })?;
    let history = parse_history(&json, tokenizer)?;
    info!(
        "Loaded {} messages ({} tokens) from {}",
        history.len(),
        history.total_tokens(),
        path.display()
    );
    Ok(history)
}

/// Save a history as `{ "messages": [...] }`
pub async fn save_history(path: impl AsRef<Path>, history: &History) -> Result<()> {
    let json = serde_json::to_string_pretty(&HistoryEnvelope { messages: history })?;
    write_atomic(path.as_ref(), json.as_bytes()).await
}

/// Load a ledger; a missing file yields an empty ledger
pub async fn load_ledger(path: impl AsRef<Path>) -> Result<UsageLedger> {
    let path = path.as_ref();
    match tokio::fs::read_to_string(path).await {
        Ok(json) => Ok(serde_json::from_str(&json)?),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            debug!("No ledger at {}, starting empty", path.display());
            Ok(UsageLedger::new())
        }
        Err(e) => Err(ContextError::Persistence(format!(
            "failed to read {}: {}",
            path.display(),
            e
        ))),
    }
}

pub async fn save_ledger(path: impl AsRef<Path>, ledger: &UsageLedger) -> Result<()> {
    let json = serde_json::to_string_pretty(ledger)?;
    write_atomic(path.as_ref(), json.as_bytes()).await
}

/// Write to a sibling temp file, then rename over the target
async fn write_atomic(path: &Path, bytes: &[u8]) -> Result<()> {
    let tmp = path.with_extension("tmp");
    tokio::fs::write(&tmp, bytes).await?;
    tokio::fs::rename(&tmp, path).await?;
    debug!("Wrote {} bytes to {}", bytes.len(), path.display());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::token_estimator::WordBasedTokenizer;

    fn tokenizer() -> WordBasedTokenizer {
        WordBasedTokenizer::new(1.0)
    }

    #[test]
    fn test_parse_bare_array_with_assistant_alias() {
        let json = r#"[
            {"role": "user", "content": "one two three"},
            {"role": "assistant", "content": "four five"}
        ]"#;
        let history = parse_history(json, &tokenizer()).unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!(history.messages()[1].role(), Role::Agent);
        assert_eq!(history.total_tokens(), 5);
    }

    #[test]
    fn test_parse_envelope_recomputes_tokens() {
        let json = r#"{"messages": [
            {"role": "system", "content": "a b", "token_count": 9999,
             "timestamp": "2024-03-01T10:00:00Z"}
        ]}"#;
        let history = parse_history(json, &tokenizer()).unwrap();
        let message = &history.messages()[0];
        assert_eq!(message.token_count(), 2);
        assert_eq!(message.timestamp().to_rfc3339(), "2024-03-01T10:00:00+00:00");
    }

    #[test]
    fn test_parse_content_blocks() {
        let json = r#"[{"role": "user", "content": [{"type": "text", "text": "hello"},
            {"type": "image"}, {"type": "text", "text": "world"}]}]"#;
        let history = parse_history(json, &tokenizer()).unwrap();
        assert_eq!(history.messages()[0].content(), "hello world");
    }

    #[test]
    fn test_parse_rejects_unknown_role() {
        let json = r#"[{"role": "narrator", "content": "x"}]"#;
        let err = parse_history(json, &tokenizer()).unwrap_err();
        assert!(matches!(err, ContextError::Persistence(_)));
    }

    #[tokio::test]
    async fn test_history_file_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("history.json");
        let t = tokenizer();
        let history: History = ["first message", "second one here"]
            .iter()
            .map(|text| Message::new(Role::User, *text, &t).unwrap())
            .collect();

        save_history(&path, &history).await.unwrap();
        let loaded = load_history(&path, &t).await.unwrap();
        assert_eq!(loaded, history);
        assert!(!path.with_extension("tmp").exists());
    }

    #[tokio::test]
    async fn test_load_missing_history_is_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = load_history(dir.path().join("absent.json"), &tokenizer())
            .await
            .unwrap_err();
        assert!(matches!(err, ContextError::Persistence(_)));
    }

    #[tokio::test]
    async fn test_ledger_round_trip_and_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ledger.json");

        let empty = load_ledger(&path).await.unwrap();
        assert!(empty.entries().is_empty());

        let mut ledger = UsageLedger::new();
        ledger.record("claude-3-haiku", 4000, 1000);
        save_ledger(&path, &ledger).await.unwrap();

        let loaded = load_ledger(&path).await.unwrap();
        assert_eq!(loaded.entries(), ledger.entries());
    }
}
