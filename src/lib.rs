//! Context budget accounting and history compaction for conversational agents
//!
//! - [`context`]: token measurement, warning levels, compaction and the
//!   per-session [`BudgetOrchestrator`]
//! - [`cache`]: content-addressed store for full artifacts and compacted
//!   history, with section retrieval
//! - [`ledger`], [`dashboard`], [`persist`]: cost tracking, read-only
//!   session snapshots and JSON persistence

pub mod cache;
pub mod config;
pub mod context;
pub mod dashboard;
pub mod error;
pub mod ledger;
pub mod logging;
pub mod metrics;
pub mod persist;

pub use cache::{CacheError, CacheKey, CacheMetadata, ContentCache, RetentionPolicy};
pub use context::{
    AdmissionMode, AdmissionResult, BudgetMeter, BudgetOrchestrator, CheckOutcome,
    CompactionConfig, CompactionEngine, CompactionResult, History, Message, Role, SourceLanguage,
    Summarizer, Tokenizer, UsageSnapshot, WarningLevel,
};
pub use dashboard::DashboardSnapshot;
pub use error::{ContextError, Result};
pub use ledger::{PricingTable, UsageLedger};
