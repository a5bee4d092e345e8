//! Per-session budget orchestration
//!
//! The orchestrator owns one conversation's history and serializes every
//! operation on it: admission of new artifacts, threshold-driven compaction
//! and previews. The content cache is shared and may outlive the session.

use super::compaction::{CompactionConfig, CompactionEngine};
use super::models::{
    AdmissionMode, AdmissionResult, CompactionResult, History, Message, Role, UsageSnapshot,
    WarningLevel,
};
use super::summarizer::{extract_signatures, Summarizer};
use super::token_budget::BudgetMeter;
use super::token_estimator::Tokenizer;
use crate::cache::{CacheMetadata, ContentCache};
use crate::dashboard::{CompressionPanel, ContextPanel, CostPanel, DashboardSnapshot};
use crate::error::Result;
use crate::ledger::UsageLedger;
use crate::metrics::METRICS;
use chrono::{DateTime, NaiveDate, Utc};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Outcome of `check_and_compact`
#[derive(Debug, Clone)]
pub struct CheckOutcome {
    /// History after the call (compacted or unchanged)
    pub history: History,
    pub usage_before: UsageSnapshot,
    pub usage_after: UsageSnapshot,
    /// `None` when usage was below the threshold
    pub compaction: Option<CompactionResult>,
}

impl CheckOutcome {
    /// True when the history was actually replaced
    pub fn compacted(&self) -> bool {
        self.compaction
            .as_ref()
            .map(|result| !result.is_noop())
            .unwrap_or(false)
    }
}

#[derive(Debug, Default)]
struct SessionState {
    history: History,
    last_compacted: Option<DateTime<Utc>>,
    compactions_on: Option<(NaiveDate, usize)>,
    tokens_saved: usize,
    consecutive_failures: usize,
}

impl SessionState {
    fn record_compaction(&mut self, at: DateTime<Utc>, tokens_saved: usize) {
        let today = at.date_naive();
        let count = match self.compactions_on {
            Some((day, count)) if day == today => count + 1,
            _ => 1,
        };
        self.compactions_on = Some((today, count));
        self.last_compacted = Some(at);
        self.tokens_saved += tokens_saved;
        self.consecutive_failures = 0;
    }

    fn compactions_today(&self) -> usize {
        match self.compactions_on {
            Some((day, count)) if day == Utc::now().date_naive() => count,
            _ => 0,
        }
    }
}

/// Budget orchestrator for one session
pub struct BudgetOrchestrator {
    session_id: Uuid,
    started_at: DateTime<Utc>,
    meter: BudgetMeter,
    tokenizer: Arc<dyn Tokenizer>,
    cache: Arc<ContentCache>,
    engine: CompactionEngine,
    state: Mutex<SessionState>,
}

impl BudgetOrchestrator {
    pub fn new(
        tokenizer: Arc<dyn Tokenizer>,
        summarizer: Arc<dyn Summarizer>,
        cache: Arc<ContentCache>,
        config: CompactionConfig,
    ) -> Self {
        let engine = CompactionEngine::new(
            Arc::clone(&tokenizer),
            summarizer,
            Arc::clone(&cache),
            config,
        );
        let session_id = Uuid::new_v4();
        info!("Starting context session {}", session_id);

        Self {
            session_id,
            started_at: Utc::now(),
            meter: BudgetMeter::new(),
            tokenizer,
            cache,
            engine,
            state: Mutex::new(SessionState::default()),
        }
    }

    /// Start from an existing history, e.g. one restored from disk
    pub fn with_history(self, history: History) -> Self {
        Self {
            state: Mutex::new(SessionState {
                history,
                ..SessionState::default()
            }),
            ..self
        }
    }

    pub fn session_id(&self) -> Uuid {
        self.session_id
    }

    pub fn cache(&self) -> &Arc<ContentCache> {
        &self.cache
    }

    /// Tokenize and append a message
    pub async fn append(&self, role: Role, content: impl Into<String>) -> Result<Message> {
        let message = Message::new(role, content, self.tokenizer.as_ref())?;
        let mut state = self.state.lock().await;
        state.history.push(message.clone());
        Ok(message)
    }

    pub async fn extend(&self, messages: impl IntoIterator<Item = Message>) {
        let mut state = self.state.lock().await;
        for message in messages {
            state.history.push(message);
        }
    }

    pub async fn history(&self) -> History {
        self.state.lock().await.history.clone()
    }

    pub async fn replace_history(&self, history: History) {
        self.state.lock().await.history = history;
    }

    pub async fn usage(&self, capacity: usize) -> Result<UsageSnapshot> {
        let state = self.state.lock().await;
        self.measure(&state.history, capacity)
    }

    pub async fn warning_level(&self, capacity: usize) -> Result<WarningLevel> {
        let usage = self.usage(capacity).await?;
        Ok(self.meter.classify(&usage))
    }

    fn measure(&self, history: &History, capacity: usize) -> Result<UsageSnapshot> {
        let usage = self.meter.usage(history, capacity)?;
        let level = self.meter.classify(&usage);
        METRICS.record_usage(usage.percent, level.as_str());
        Ok(usage)
    }

    /// Admit a new artifact under the current output budget
    ///
    /// Oversized candidates are summarized and the original stored in the
    /// cache; the returned key expands it later. The history is not touched.
    pub async fn admit(
        &self,
        candidate: &str,
        source: &str,
        capacity: usize,
    ) -> Result<AdmissionResult> {
        self.admit_with(candidate, source, capacity, AdmissionMode::Auto)
            .await
    }

    /// Admit a new artifact, overriding the budget decision with `mode`
    ///
    /// `Signatures` keeps only declaration lines and caches the original
    /// when they are less than half its size. The signatures are not cut to
    /// the output budget.
    pub async fn admit_with(
        &self,
        candidate: &str,
        source: &str,
        capacity: usize,
        mode: AdmissionMode,
    ) -> Result<AdmissionResult> {
        let state = self.state.lock().await;
        let usage = self.measure(&state.history, capacity)?;
        let output_budget = self.meter.output_budget(usage.percent);
        let original_tokens = self.tokenizer.count(candidate)?;

        let summarize = match mode {
            AdmissionMode::Signatures { lang } => {
                let signatures = extract_signatures(candidate, lang);
                let accepted_tokens = self.tokenizer.count(&signatures)?;
                let cache_key = (accepted_tokens * 2 < original_tokens)
                    .then(|| self.cache.put(candidate, CacheMetadata::document(source)));
                debug!(
                    "Admitting {} as {:?} signatures: {} of {} tokens, cached: {}",
                    source,
                    lang,
                    accepted_tokens,
                    original_tokens,
                    cache_key.is_some()
                );
                METRICS.record_admission("signatures");
                return Ok(AdmissionResult {
                    accepted_text: signatures,
                    cache_key,
                    was_summarized: true,
                    original_tokens,
                    accepted_tokens,
                    output_budget,
                });
            }
            AdmissionMode::ForceSummary => true,
            AdmissionMode::ForceFull => false,
            AdmissionMode::Auto => original_tokens > output_budget,
        };

        if !summarize {
            debug!(
                "Admitting {} in full ({:?}): {} tokens, budget {}",
                source, mode, original_tokens, output_budget
            );
            METRICS.record_admission("full");
            return Ok(AdmissionResult {
                accepted_text: candidate.to_string(),
                cache_key: None,
                was_summarized: false,
                original_tokens,
                accepted_tokens: original_tokens,
                output_budget,
            });
        }

        info!(
            "Summarizing {} for admission ({:?}): {} tokens, budget {} at {:.1}% usage",
            source,
            mode,
            original_tokens,
            output_budget,
            usage.percent * 100.0
        );
        let summary = self
            .engine
            .summarize_artifact(candidate, output_budget)
            .await?;
        let accepted_tokens = self.tokenizer.count(&summary)?;
        let cache_key = self.cache.put(candidate, CacheMetadata::document(source));
        METRICS.record_admission("summary");
        drop(state);

        Ok(AdmissionResult {
            accepted_text: summary,
            cache_key: Some(cache_key),
            was_summarized: true,
            original_tokens,
            accepted_tokens,
            output_budget,
        })
    }

    /// Compact the live history if usage reached `threshold`
    ///
    /// On failure the history is left exactly as it was and the error is
    /// returned; the failure is counted for the dashboard.
    pub async fn check_and_compact(
        &self,
        capacity: usize,
        threshold: f64,
        keep_recent: usize,
    ) -> Result<CheckOutcome> {
        let mut state = self.state.lock().await;
        let usage_before = self.measure(&state.history, capacity)?;

        if !self.meter.needs_compaction(&usage_before, threshold) {
            debug!(
                "Usage {:.1}% below threshold {:.1}%, skipping compaction",
                usage_before.percent * 100.0,
                threshold * 100.0
            );
            return Ok(CheckOutcome {
                history: state.history.clone(),
                usage_before,
                usage_after: usage_before,
                compaction: None,
            });
        }

        info!(
            "Usage {:.1}% reached threshold {:.1}%, compacting session {}",
            usage_before.percent * 100.0,
            threshold * 100.0,
            self.session_id
        );

        let result = match self.engine.compact(&state.history, keep_recent, true).await {
            Ok(result) => result,
            Err(e) => {
                state.consecutive_failures += 1;
                warn!(
                    "Compaction failed ({} consecutive), history unchanged: {}",
                    state.consecutive_failures, e
                );
                return Err(e);
            }
        };

        if result.is_noop() {
            state.consecutive_failures = 0;
        } else {
            state.history = result.to_history();
            state.record_compaction(Utc::now(), result.stats.tokens_saved());
        }

        let usage_after = self.measure(&state.history, capacity)?;
        info!(
            "Session {} now at {:.1}% ({} tokens)",
            self.session_id,
            usage_after.percent * 100.0,
            usage_after.used_tokens
        );

        Ok(CheckOutcome {
            history: state.history.clone(),
            usage_before,
            usage_after,
            compaction: Some(result),
        })
    }

    /// Dry-run compaction of the live history
    pub async fn preview_compaction(&self, keep_recent: usize) -> Result<CompactionResult> {
        let state = self.state.lock().await;
        self.engine.compact(&state.history, keep_recent, false).await
    }

    /// Retrieve a cached artifact, optionally one section of it
    pub fn expand(&self, key: &str, section: Option<&str>) -> Result<String> {
        Ok(self.cache.get(key, section)?)
    }

    /// Dashboard view of this session
    pub async fn snapshot(
        &self,
        capacity: usize,
        ledger: &UsageLedger,
        alert_at: Option<f64>,
    ) -> Result<DashboardSnapshot> {
        let state = self.state.lock().await;
        let usage = self.meter.usage(&state.history, capacity)?;

        Ok(DashboardSnapshot {
            session_id: self.session_id,
            context: ContextPanel::from(&usage),
            cost: CostPanel::from_ledger(ledger, self.started_at, alert_at),
            compression: CompressionPanel {
                last_compacted: state.last_compacted,
                compactions_today: state.compactions_today(),
                tokens_saved: state.tokens_saved,
                consecutive_failures: state.consecutive_failures,
            },
            last_updated: Utc::now(),
        })
    }
}
