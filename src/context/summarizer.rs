//! Summarization of message batches

use super::circuit_breaker::{CircuitBreaker, CircuitBreakerConfig};
use super::models::{render_transcript, Message};
use async_trait::async_trait;
use reqwest::Client;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, warn};

/// Summarization capability
///
/// Output length is not guaranteed; callers re-measure the result.
#[async_trait]
pub trait Summarizer: Send + Sync {
    /// Summarize an ordered batch of messages into a short text
    async fn summarize(
        &self,
        messages: &[Message],
        timeout: Duration,
    ) -> Result<String, SummarizerError>;
}

/// Summarizer errors
#[derive(Debug, thiserror::Error)]
pub enum SummarizerError {
    #[error("Initialization error: {0}")]
    InitializationError(String),

    #[error("API error: {0}")]
    ApiError(String),

    #[error("Network error: {0}")]
    NetworkError(String),

    #[error("Summarizer timed out after {0:?}")]
    Timeout(Duration),

    #[error("Summarizer unavailable: {0}")]
    Unavailable(String),

    #[error("Unknown error")]
    Unknown,
}

/// Configuration for the LLM summarizer
#[derive(Debug, Clone)]
pub struct SummarizerConfig {
    pub endpoint: String,
    pub api_key: Option<SecretString>,
    pub model: String,
    pub max_tokens: usize,
    pub max_attempts: usize,
    /// Client-wide ceiling; per-call timeouts are tighter
    pub request_timeout: Duration,
    pub breaker: CircuitBreakerConfig,
}

impl Default for SummarizerConfig {
    fn default() -> Self {
        Self {
            endpoint: "http://localhost:8080/v1/chat/completions".to_string(),
            api_key: None,
            model: "claude-3-haiku-20240307".to_string(),
            max_tokens: 1024,
            max_attempts: 1,
            request_timeout: Duration::from_secs(60),
            breaker: CircuitBreakerConfig::default(),
        }
    }
}

const SYSTEM_PROMPT: &str =
    "You compress conversation history. Return only the summary, as bullet points.";

/// LLM-based summarizer using an OpenAI-compatible chat completions API
pub struct LlmSummarizer {
    client: Client,
    config: SummarizerConfig,
    breaker: CircuitBreaker,
}

impl LlmSummarizer {
    pub fn new(config: SummarizerConfig) -> Result<Self, SummarizerError> {
        let client = Client::builder()
            .timeout(config.request_timeout)
            .build()
            .map_err(|e| SummarizerError::InitializationError(e.to_string()))?;
        let breaker = CircuitBreaker::new(config.breaker.clone());

        Ok(Self {
            client,
            config,
            breaker,
        })
    }

    pub fn breaker(&self) -> &CircuitBreaker {
        &self.breaker
    }

    fn build_prompt(&self, messages: &[Message]) -> String {
        format!(
            "Summarize this conversation segment. Keep decisions that were made, \
            facts that were stated, agreed action items, and any names or specifics \
            that may be referred to later. Stay under 500 words.\n\n{}",
            render_transcript(messages)
        )
    }

    async fn call_once(
        &self,
        request: &ChatCompletionRequest,
        timeout: Duration,
    ) -> Result<String, SummarizerError> {
        let mut req = self
            .client
            .post(&self.config.endpoint)
            .timeout(timeout)
            .json(request);

        if let Some(ref api_key) = self.config.api_key {
            req = req.bearer_auth(api_key.expose_secret());
        }

        let response = req.send().await.map_err(|e| {
            if e.is_timeout() {
                SummarizerError::Timeout(timeout)
            } else {
                SummarizerError::NetworkError(e.to_string())
            }
        })?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(SummarizerError::ApiError(format!("HTTP {}: {}", status, body)));
        }

        let parsed = response
            .json::<ChatCompletionResponse>()
            .await
            .map_err(|e| SummarizerError::ApiError(format!("Failed to parse response: {}", e)))?;

        parsed
            .choices
            .into_iter()
            .next()
            .map(|choice| choice.message.content)
            .ok_or_else(|| SummarizerError::ApiError("No choices in response".to_string()))
    }
}

#[async_trait]
impl Summarizer for LlmSummarizer {
    async fn summarize(
        &self,
        messages: &[Message],
        timeout: Duration,
    ) -> Result<String, SummarizerError> {
        if messages.is_empty() {
            return Ok(String::new());
        }

        if self.breaker.is_open() {
            warn!("Summarizer circuit breaker is open, rejecting request");
            return Err(SummarizerError::Unavailable(format!(
                "circuit open for {}",
                self.config.endpoint
            )));
        }

        debug!("Summarizing {} messages via {}", messages.len(), self.config.model);

        let request = ChatCompletionRequest {
            model: self.config.model.clone(),
            messages: vec![
                ChatMessage {
                    role: "system".to_string(),
                    content: SYSTEM_PROMPT.to_string(),
                },
                ChatMessage {
                    role: "user".to_string(),
                    content: self.build_prompt(messages),
                },
            ],
            max_tokens: Some(self.config.max_tokens),
            temperature: Some(0.3),
        };

        let attempts = self.config.max_attempts.max(1);
        let mut last_error = None;
        for attempt in 0..attempts {
            if attempt > 0 {
                debug!("Retry attempt {} for summarization", attempt);
                tokio::time::sleep(Duration::from_millis(100 * (1 << attempt))).await;
            }

            match self.call_once(&request, timeout).await {
                Ok(summary) => {
                    self.breaker.mark_success();
                    debug!("Summarization successful");
                    return Ok(summary);
                }
                Err(e) => {
                    self.breaker.mark_failure();
                    warn!("Summarization attempt {} failed: {}", attempt + 1, e);
                    last_error = Some(e);
                }
            }
        }

        Err(last_error.unwrap_or(SummarizerError::Unknown))
    }
}

/// Deterministic offline summarizer that keeps structurally salient lines
#[derive(Debug, Clone)]
pub struct ExtractiveSummarizer {
    pub max_lines: usize,
    pub max_chars: usize,
}

impl Default for ExtractiveSummarizer {
    fn default() -> Self {
        Self {
            max_lines: 50,
            max_chars: 8_000,
        }
    }
}

impl ExtractiveSummarizer {
    fn is_salient(line: &str) -> bool {
        let len = line.chars().count();
        line.starts_with(['#', '-', '*']) || line.starts_with("1.") || (10 < len && len < 200)
    }

    /// Extract key lines from free text
    pub fn extract(&self, text: &str) -> String {
        let key_lines: Vec<&str> = text
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty() && Self::is_salient(line))
            .take(self.max_lines)
            .collect();

        if key_lines.is_empty() {
            return text.chars().take(self.max_chars).collect();
        }

        let joined = key_lines.join("\n");
        if joined.chars().count() > self.max_chars {
            joined.chars().take(self.max_chars).collect()
        } else {
            joined
        }
    }
}

#[async_trait]
impl Summarizer for ExtractiveSummarizer {
    async fn summarize(
        &self,
        messages: &[Message],
        _timeout: Duration,
    ) -> Result<String, SummarizerError> {
        Ok(self.extract(&render_transcript(messages)))
    }
}

/// Language whose declaration lines `extract_signatures` understands
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceLanguage {
    Python,
    /// Also covers TypeScript
    #[serde(alias = "typescript")]
    JavaScript,
}

impl SourceLanguage {
    /// Pick a language from a file name's extension
    pub fn from_path(path: &str) -> Option<Self> {
        let ext = path.rsplit_once('.')?.1.to_ascii_lowercase();
        match ext.as_str() {
            "py" => Some(SourceLanguage::Python),
            "js" | "jsx" | "mjs" | "cjs" | "ts" | "tsx" => Some(SourceLanguage::JavaScript),
            _ => None,
        }
    }
}

const PYTHON_DECLARATIONS: &[&str] = &["import ", "from ", "class ", "def ", "async def "];

const JS_DECLARATIONS: &[&str] = &[
    "import ",
    "export ",
    "function ",
    "async function ",
    "class ",
    "const ",
];

/// Keep the import, class and function declaration lines of a source file
///
/// Lines keep their original indentation. JavaScript lines must also open a
/// body, an arrow function or a class to count as declarations.
pub fn extract_signatures(source: &str, lang: SourceLanguage) -> String {
    source
        .lines()
        .filter(|line| match lang {
            SourceLanguage::Python => {
                let trimmed = line.trim_start();
                PYTHON_DECLARATIONS.iter().any(|p| trimmed.starts_with(p))
            }
            SourceLanguage::JavaScript => {
                let trimmed = line.trim();
                JS_DECLARATIONS.iter().any(|p| trimmed.starts_with(p))
                    && (trimmed.contains("=>") || trimmed.contains('{') || trimmed.contains("class "))
            }
        })
        .collect::<Vec<_>>()
        .join("\n")
}

// OpenAI-compatible API types
#[derive(Debug, Serialize)]
struct ChatCompletionRequest {
    model: String,
    messages: Vec<ChatMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
}

#[derive(Debug, Serialize, Deserialize)]
struct ChatMessage {
    role: String,
    content: String,
}

#[derive(Debug, Deserialize)]
struct ChatCompletionResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::models::Role;
    use crate::context::token_estimator::WordBasedTokenizer;

    fn messages(texts: &[&str]) -> Vec<Message> {
        let tokenizer = WordBasedTokenizer::default();
        texts
            .iter()
            .map(|t| Message::new(Role::User, *t, &tokenizer).unwrap())
            .collect()
    }

    fn config_for(url: String) -> SummarizerConfig {
        SummarizerConfig {
            endpoint: format!("{}/v1/chat/completions", url),
            breaker: CircuitBreakerConfig {
                failure_threshold: 2,
                reset_timeout: Duration::from_secs(60),
            },
            ..SummarizerConfig::default()
        }
    }

    #[test]
    fn test_summarizer_config_default() {
        let config = SummarizerConfig::default();
        assert_eq!(config.max_attempts, 1);
        assert_eq!(config.max_tokens, 1024);
        assert!(config.api_key.is_none());
    }

    #[test]
    fn test_extractive_keeps_structural_lines() {
        let summarizer = ExtractiveSummarizer::default();
        let text = "# Title\nok\n- bullet item\nshort\nThis line is long enough to keep.";
        let summary = summarizer.extract(text);
        assert_eq!(summary, "# Title\n- bullet item\nThis line is long enough to keep.");
    }

    #[test]
    fn test_extractive_falls_back_to_prefix() {
        let summarizer = ExtractiveSummarizer {
            max_lines: 50,
            max_chars: 3,
        };
        assert_eq!(summarizer.extract("abcdef"), "abc");
    }

    #[test]
    fn test_python_signatures() {
        let source = "import os\nfrom typing import List\n\nclass Loader:\n    \"\"\"Loads.\"\"\"\n    def load(self, path):\n        return open(path).read()\n\nasync def main():\n    pass\n";
        assert_eq!(
            extract_signatures(source, SourceLanguage::Python),
            "import os\nfrom typing import List\nclass Loader:\n    def load(self, path):\nasync def main():"
        );
    }

    #[test]
    fn test_javascript_signatures_need_a_body() {
        let source = "import { a } from './a';\nconst LIMIT = 10;\nconst add = (x, y) => x + y;\nexport function run() {\n  return add(1, 2);\n}\nexport class Runner extends Base\n  async function helper() {";
        assert_eq!(
            extract_signatures(source, SourceLanguage::JavaScript),
            "import { a } from './a';\nconst add = (x, y) => x + y;\nexport function run() {\nexport class Runner extends Base\n  async function helper() {"
        );
    }

    #[test]
    fn test_source_language_from_path() {
        assert_eq!(SourceLanguage::from_path("src/app.PY"), Some(SourceLanguage::Python));
        assert_eq!(SourceLanguage::from_path("web/index.tsx"), Some(SourceLanguage::JavaScript));
        assert_eq!(SourceLanguage::from_path("README.md"), None);
        assert_eq!(SourceLanguage::from_path("Makefile"), None);
    }

    #[tokio::test]
    async fn test_extractive_summarizer_on_messages() {
        let summarizer = ExtractiveSummarizer::default();
        let batch = messages(&["We agreed to ship on Friday.", "ok"]);
        let summary = summarizer
            .summarize(&batch, Duration::from_secs(1))
            .await
            .unwrap();
        assert!(summary.contains("ship on Friday"));
    }

    #[tokio::test]
    async fn test_llm_summarizer_parses_response() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/v1/chat/completions")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"choices":[{"message":{"role":"assistant","content":"- decided X"}}]}"#)
            .create_async()
            .await;

        let summarizer = LlmSummarizer::new(config_for(server.url())).unwrap();
        let summary = summarizer
            .summarize(&messages(&["we decided X"]), Duration::from_secs(5))
            .await
            .unwrap();

        assert_eq!(summary, "- decided X");
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_llm_summarizer_empty_input_skips_request() {
        let summarizer = LlmSummarizer::new(config_for("http://127.0.0.1:9".to_string())).unwrap();
        let summary = summarizer.summarize(&[], Duration::from_secs(1)).await.unwrap();
        assert!(summary.is_empty());
    }

    #[tokio::test]
    async fn test_llm_summarizer_opens_breaker_on_errors() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("POST", "/v1/chat/completions")
            .with_status(500)
            .with_body("boom")
            .expect_at_least(2)
            .create_async()
            .await;

        let summarizer = LlmSummarizer::new(config_for(server.url())).unwrap();
        let batch = messages(&["hello"]);

        for _ in 0..2 {
            let err = summarizer
                .summarize(&batch, Duration::from_secs(5))
                .await
                .unwrap_err();
            assert!(matches!(err, SummarizerError::ApiError(_)));
        }

        let err = summarizer
            .summarize(&batch, Duration::from_secs(5))
            .await
            .unwrap_err();
        assert!(matches!(err, SummarizerError::Unavailable(_)));
    }
}
