//! Context management with token budget enforcement
//!
//! Measures conversation history against a fixed capacity, compacts old
//! history into a summary when usage crosses a threshold, and admits new
//! artifacts under a usage-dependent output budget.

pub mod circuit_breaker;
pub mod compaction;
pub mod models;
pub mod orchestrator;
pub mod summarizer;
pub mod token_budget;
pub mod token_estimator;

pub use circuit_breaker::{BreakerState, BreakerStats, CircuitBreaker, CircuitBreakerConfig};
pub use compaction::{CompactionConfig, CompactionEngine, BATCH_SEPARATOR};
pub use models::{
    render_transcript, total_tokens, AdmissionMode, AdmissionResult, CompactionResult,
    CompactionStats, History, Message, Role, UsageSnapshot, WarningLevel,
};
pub use orchestrator::{BudgetOrchestrator, CheckOutcome};
pub use summarizer::{
    extract_signatures, ExtractiveSummarizer, LlmSummarizer, SourceLanguage, Summarizer,
    SummarizerConfig, SummarizerError,
};
pub use token_budget::{classify_percent, BudgetMeter, DEFAULT_COMPACTION_THRESHOLD};
pub use token_estimator::{
    fit_to_budget, CharRatioTokenizer, TiktokenTokenizer, Tokenizer, TokenizerError,
    WordBasedTokenizer,
};
