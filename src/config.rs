//! Configuration for the context budget engine
//!
//! Loaded from an optional TOML file, then overridden by environment
//! variables of the form `CONTEXT_BUDGET__<SECTION>__<KEY>`. A `.env` file
//! in the working directory is read first when present.

use crate::cache::{ContentCache, RetentionPolicy};
use crate::context::circuit_breaker::CircuitBreakerConfig;
use crate::context::compaction::CompactionConfig;
use crate::context::summarizer::SummarizerConfig;
use crate::error::{ContextError, Result};
use crate::logging::LoggingConfig;
use secrecy::SecretString;
use serde::Deserialize;
use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;
use tracing::debug;

/// Environment variable prefix
pub const ENV_PREFIX: &str = "CONTEXT_BUDGET";

/// Top-level configuration
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub budget: BudgetSettings,

    #[serde(default)]
    pub compaction: CompactionSettings,

    #[serde(default)]
    pub cache: CacheSettings,

    #[serde(default)]
    pub summarizer: SummarizerSettings,

    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Budget thresholds
#[derive(Debug, Clone, Deserialize)]
pub struct BudgetSettings {
    /// Context window size in tokens
    #[serde(default = "default_capacity")]
    pub capacity: usize,

    /// Usage fraction at which `check_and_compact` compacts
    #[serde(default = "default_compaction_threshold")]
    pub compaction_threshold: f64,

    /// Per-model context windows, consulted before the built-in table
    #[serde(default)]
    pub models: HashMap<String, usize>,
}

/// Context windows of known models
pub const MODEL_CAPACITIES: &[(&str, usize)] = &[
    ("claude-3-opus", 200_000),
    ("claude-3-sonnet", 200_000),
    ("claude-3-haiku", 200_000),
    ("claude-3.5-sonnet", 200_000),
    ("claude-sonnet-4", 200_000),
    ("claude-opus-4", 200_000),
];

fn default_capacity() -> usize {
    200_000
}

fn default_compaction_threshold() -> f64 {
    0.70
}

impl Default for BudgetSettings {
    fn default() -> Self {
        Self {
            capacity: default_capacity(),
            compaction_threshold: default_compaction_threshold(),
            models: HashMap::new(),
        }
    }
}

impl BudgetSettings {
    /// Capacity for `model`: configured models, then the built-in table,
    /// then `capacity`. Names match exactly, ignoring ASCII case.
    pub fn capacity_for(&self, model: &str) -> usize {
        let model = model.to_ascii_lowercase();
        self.models
            .iter()
            .find(|(name, _)| name.to_ascii_lowercase() == model)
            .map(|(_, capacity)| *capacity)
            .or_else(|| {
                MODEL_CAPACITIES
                    .iter()
                    .find(|(name, _)| *name == model)
                    .map(|(_, capacity)| *capacity)
            })
            .unwrap_or(self.capacity)
    }
}

/// Compaction tuning
#[derive(Debug, Clone, Deserialize)]
pub struct CompactionSettings {
    /// Messages kept verbatim after compaction
    #[serde(default = "default_keep_recent")]
    pub keep_recent: usize,

    #[serde(default = "default_max_batch_messages")]
    pub max_batch_messages: usize,

    #[serde(default)]
    pub max_batch_tokens: Option<usize>,

    #[serde(default = "default_max_concurrent_batches")]
    pub max_concurrent_batches: usize,

    #[serde(default = "default_summarizer_timeout_ms")]
    pub summarizer_timeout_ms: u64,
}

fn default_keep_recent() -> usize {
    5
}

fn default_max_batch_messages() -> usize {
    10
}

fn default_max_concurrent_batches() -> usize {
    1
}

fn default_summarizer_timeout_ms() -> u64 {
    30_000
}

impl Default for CompactionSettings {
    fn default() -> Self {
        Self {
            keep_recent: default_keep_recent(),
            max_batch_messages: default_max_batch_messages(),
            max_batch_tokens: None,
            max_concurrent_batches: default_max_concurrent_batches(),
            summarizer_timeout_ms: default_summarizer_timeout_ms(),
        }
    }
}

impl CompactionSettings {
    pub fn to_engine_config(&self) -> CompactionConfig {
        CompactionConfig {
            max_batch_messages: self.max_batch_messages,
            max_batch_tokens: self.max_batch_tokens,
            max_concurrent_batches: self.max_concurrent_batches,
            summarizer_timeout: Duration::from_millis(self.summarizer_timeout_ms),
        }
    }
}

/// Content cache retention
#[derive(Debug, Clone, Deserialize)]
pub struct CacheSettings {
    /// Entry lifetime in seconds; 0 disables age-based expiry
    #[serde(default = "default_max_age_secs")]
    pub max_age_secs: u64,

    /// Entry count bound; unset means unbounded
    #[serde(default)]
    pub max_entries: Option<usize>,

    /// Bytes on each side of a keyword match
    #[serde(default = "default_section_window")]
    pub section_window: usize,
}

fn default_max_age_secs() -> u64 {
    7200
}

fn default_section_window() -> usize {
    crate::cache::DEFAULT_SECTION_WINDOW
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            max_age_secs: default_max_age_secs(),
            max_entries: None,
            section_window: default_section_window(),
        }
    }
}

impl CacheSettings {
    pub fn retention(&self) -> RetentionPolicy {
        RetentionPolicy {
            max_age: (self.max_age_secs > 0).then(|| Duration::from_secs(self.max_age_secs)),
            max_entries: self.max_entries,
        }
    }

    pub fn build_cache(&self) -> ContentCache {
        ContentCache::new(self.retention()).with_section_window(self.section_window)
    }
}

/// HTTP summarizer settings
#[derive(Debug, Clone, Deserialize)]
pub struct SummarizerSettings {
    #[serde(default = "default_endpoint")]
    pub endpoint: String,

    /// Bearer token; prefer `CONTEXT_BUDGET__SUMMARIZER__API_KEY`
    #[serde(default)]
    pub api_key: Option<SecretString>,

    #[serde(default = "default_model")]
    pub model: String,

    /// Client-wide request timeout in milliseconds
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,

    #[serde(default = "default_max_attempts")]
    pub max_attempts: usize,

    #[serde(default = "default_max_tokens")]
    pub max_tokens: usize,

    #[serde(default = "default_breaker_threshold")]
    pub circuit_breaker_threshold: usize,

    #[serde(default = "default_breaker_reset_secs")]
    pub circuit_breaker_reset_secs: u64,
}

fn default_endpoint() -> String {
    "http://localhost:8080/v1/chat/completions".to_string()
}

fn default_model() -> String {
    "claude-3-haiku-20240307".to_string()
}

fn default_timeout_ms() -> u64 {
    60_000
}

fn default_max_attempts() -> usize {
    1
}

fn default_max_tokens() -> usize {
    1024
}

fn default_breaker_threshold() -> usize {
    5
}

fn default_breaker_reset_secs() -> u64 {
    30
}

impl Default for SummarizerSettings {
    fn default() -> Self {
        Self {
            endpoint: default_endpoint(),
            api_key: None,
            model: default_model(),
            timeout_ms: default_timeout_ms(),
            max_attempts: default_max_attempts(),
            max_tokens: default_max_tokens(),
            circuit_breaker_threshold: default_breaker_threshold(),
            circuit_breaker_reset_secs: default_breaker_reset_secs(),
        }
    }
}

impl SummarizerSettings {
    pub fn to_summarizer_config(&self) -> SummarizerConfig {
        SummarizerConfig {
            endpoint: self.endpoint.clone(),
            api_key: self.api_key.clone(),
            model: self.model.clone(),
            max_tokens: self.max_tokens,
            max_attempts: self.max_attempts,
            request_timeout: Duration::from_millis(self.timeout_ms),
            breaker: CircuitBreakerConfig {
                failure_threshold: self.circuit_breaker_threshold,
                reset_timeout: Duration::from_secs(self.circuit_breaker_reset_secs),
            },
        }
    }
}

impl Config {
    /// Load from the environment only
    pub fn load() -> Result<Self> {
        Self::build(None)
    }

    /// Load from a TOML file, then apply environment overrides
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        Self::build(Some(path.as_ref()))
    }

    /// Parse TOML text without consulting the environment
    pub fn from_toml_str(toml: &str) -> Result<Self> {
        let config: Config = config::Config::builder()
            .add_source(config::File::from_str(toml, config::FileFormat::Toml))
            .build()?
            .try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    fn build(path: Option<&Path>) -> Result<Self> {
        dotenvy::dotenv().ok();

        let mut builder = config::Config::builder();
        if let Some(path) = path {
            debug!("Loading configuration from {}", path.display());
            builder = builder.add_source(config::File::from(path));
        }
        builder = builder.add_source(
            config::Environment::with_prefix(ENV_PREFIX)
                .prefix_separator("__")
                .separator("__")
                .try_parsing(true),
        );

        let config: Config = builder.build()?.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// Reject settings the engine cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.budget.capacity == 0 {
            return Err(ContextError::Configuration(
                "budget.capacity must be greater than zero".to_string(),
            ));
        }
        if let Some((model, _)) = self.budget.models.iter().find(|(_, c)| **c == 0) {
            return Err(ContextError::Configuration(format!(
                "budget.models.{} must be greater than zero",
                model
            )));
        }
        let threshold = self.budget.compaction_threshold;
        if !(threshold > 0.0 && threshold <= 1.0) {
            return Err(ContextError::Configuration(format!(
                "budget.compaction_threshold must be in (0, 1], got {}",
                threshold
            )));
        }
        if self.compaction.max_batch_messages == 0 {
            return Err(ContextError::Configuration(
                "compaction.max_batch_messages must be greater than zero".to_string(),
            ));
        }
        if self.compaction.max_batch_tokens == Some(0) {
            return Err(ContextError::Configuration(
                "compaction.max_batch_tokens must be greater than zero when set".to_string(),
            ));
        }
        if self.compaction.max_concurrent_batches == 0 {
            return Err(ContextError::Configuration(
                "compaction.max_concurrent_batches must be greater than zero".to_string(),
            ));
        }
        if self.compaction.summarizer_timeout_ms == 0 {
            return Err(ContextError::Configuration(
                "compaction.summarizer_timeout_ms must be greater than zero".to_string(),
            ));
        }
        if self.summarizer.max_attempts == 0 {
            return Err(ContextError::Configuration(
                "summarizer.max_attempts must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}
