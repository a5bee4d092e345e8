//! History compaction: summary of the old segment plus a verbatim tail
//!
//! Compaction is lossy for the live context and lossless for retrieval: the
//! summarized messages are written verbatim to the content cache, keyed by
//! their own content, before the compacted history is handed back.

use super::models::{
    render_transcript, total_tokens, CompactionResult, CompactionStats, History, Message, Role,
};
use super::summarizer::Summarizer;
use super::token_estimator::{fit_to_budget, Tokenizer};
use crate::cache::{CacheMetadata, ContentCache};
use crate::error::{ContextError, Result};
use crate::metrics::METRICS;
use crate::time_operation;
use chrono::Utc;
use futures::stream::{self, StreamExt, TryStreamExt};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Separator between partial summaries of consecutive batches
pub const BATCH_SEPARATOR: &str = "\n\n---\n\n";

/// Cache source label for compacted history segments
const COMPACTION_SOURCE: &str = "compaction";

/// Compaction tuning
#[derive(Debug, Clone)]
pub struct CompactionConfig {
    /// Maximum messages sent to the summarizer per call
    pub max_batch_messages: usize,
    /// Maximum tokens sent to the summarizer per call
    pub max_batch_tokens: Option<usize>,
    /// Batches summarized concurrently
    pub max_concurrent_batches: usize,
    /// Upper bound on all summarizer work of one call
    pub summarizer_timeout: Duration,
}

impl Default for CompactionConfig {
    fn default() -> Self {
        Self {
            max_batch_messages: 10,
            max_batch_tokens: None,
            max_concurrent_batches: 1,
            summarizer_timeout: Duration::from_secs(30),
        }
    }
}

/// Compaction engine
pub struct CompactionEngine {
    tokenizer: Arc<dyn Tokenizer>,
    summarizer: Arc<dyn Summarizer>,
    cache: Arc<ContentCache>,
    config: CompactionConfig,
}

impl CompactionEngine {
    pub fn new(
        tokenizer: Arc<dyn Tokenizer>,
        summarizer: Arc<dyn Summarizer>,
        cache: Arc<ContentCache>,
        config: CompactionConfig,
    ) -> Self {
        Self {
            tokenizer,
            summarizer,
            cache,
            config,
        }
    }

    pub fn config(&self) -> &CompactionConfig {
        &self.config
    }

    /// Compact `history`, keeping the last `keep_recent` messages verbatim
    ///
    /// With `commit = false` the result is computed in full (the summarizer
    /// is still called) but nothing is written to the cache. The input
    /// history is never modified; on error nothing has been written.
    pub async fn compact(
        &self,
        history: &History,
        keep_recent: usize,
        commit: bool,
    ) -> Result<CompactionResult> {
        let mode = if commit { "commit" } else { "dry_run" };
        let result = time_operation!(
            METRICS.compaction_duration,
            mode,
            self.run(history, keep_recent, commit).await
        );

        match &result {
            Ok(r) if r.is_noop() => METRICS.record_compaction("noop", 0, 0),
            Ok(r) if commit => {
                METRICS.record_compaction("committed", r.stats.tokens_saved(), r.stats.batches)
            }
            Ok(r) => METRICS.record_compaction("dry_run", 0, r.stats.batches),
            Err(_) => METRICS.record_compaction("failed", 0, 0),
        }

        result
    }

    async fn run(
        &self,
        history: &History,
        keep_recent: usize,
        commit: bool,
    ) -> Result<CompactionResult> {
        let messages = history.messages();
        let keep = keep_recent.min(messages.len());
        let original_tokens = history.total_tokens();
        let (old, tail) = messages.split_at(messages.len() - keep);

        if old.is_empty() {
            debug!(
                "Nothing to compact: keep_recent={} covers all {} messages",
                keep_recent,
                messages.len()
            );
            return Ok(CompactionResult {
                summary: None,
                kept_tail: tail.to_vec(),
                cache_key: None,
                stats: CompactionStats {
                    original_tokens,
                    compacted_tokens: original_tokens,
                    ratio: 1.0,
                    messages_summarized: 0,
                    batches: 0,
                },
                committed: false,
            });
        }

        let batches = self.partition(old);
        info!(
            "Compacting {} messages in {} batches, keeping {} recent",
            old.len(),
            batches.len(),
            tail.len()
        );

        let partials = self.summarize_batches(&batches).await?;
        let summary = self.build_summary(&partials, total_tokens(old))?;

        let transcript = render_transcript(old);
        let metadata = CacheMetadata::compacted_history(COMPACTION_SOURCE);
        let cache_key = if commit {
            self.cache.put(&transcript, metadata)
        } else {
            ContentCache::derive_key(&transcript, &metadata)
        };

        let compacted_tokens = summary.token_count() + total_tokens(tail);
        let stats = CompactionStats {
            original_tokens,
            compacted_tokens,
            ratio: ratio(compacted_tokens, original_tokens),
            messages_summarized: old.len(),
            batches: batches.len(),
        };

        debug!(
            "Compaction {}: {} -> {} tokens (ratio {:.2}), key={}",
            if commit { "committed" } else { "previewed" },
            stats.original_tokens,
            stats.compacted_tokens,
            stats.ratio,
            cache_key
        );

        Ok(CompactionResult {
            summary: Some(summary),
            kept_tail: tail.to_vec(),
            cache_key: Some(cache_key),
            stats,
            committed: commit,
        })
    }

    /// Split `old` into ordered batches bounded by message count and tokens
    ///
    /// A single message larger than the token bound forms its own batch.
    fn partition<'a>(&self, old: &'a [Message]) -> Vec<&'a [Message]> {
        let max_messages = self.config.max_batch_messages.max(1);
        let mut batches = Vec::new();
        let mut start = 0;
        let mut batch_tokens = 0;

        for (i, message) in old.iter().enumerate() {
            let in_batch = i - start;
            let over_tokens = self
                .config
                .max_batch_tokens
                .map(|max| in_batch > 0 && batch_tokens + message.token_count() > max)
                .unwrap_or(false);

            if in_batch >= max_messages || over_tokens {
                batches.push(&old[start..i]);
                start = i;
                batch_tokens = 0;
            }
            batch_tokens += message.token_count();
        }

        if start < old.len() {
            batches.push(&old[start..]);
        }
        batches
    }

    async fn summarize_batches(&self, batches: &[&[Message]]) -> Result<Vec<String>> {
        let timeout = self.config.summarizer_timeout;
        let summarizer = &self.summarizer;

        let work = stream::iter(batches.iter().copied())
            .map(|batch| summarizer.summarize(batch, timeout))
            .buffered(self.config.max_concurrent_batches.max(1))
            .try_collect::<Vec<String>>();

        match tokio::time::timeout(timeout, work).await {
            Ok(Ok(partials)) => Ok(partials),
            Ok(Err(e)) => {
                warn!("Summarizer failed, history left unchanged: {}", e);
                Err(e.into())
            }
            Err(_) => {
                warn!("Summarizer exceeded {:?}, history left unchanged", timeout);
                Err(ContextError::SummarizationTimeout { timeout })
            }
        }
    }

    /// Assemble the summary message, cut below the size of what it replaces
    ///
    /// A replaced segment of one token leaves a ceiling of zero, so the
    /// summary comes out empty.
    fn build_summary(&self, partials: &[String], old_tokens: usize) -> Result<Message> {
        let now = Utc::now();
        let mut content = format!(
            "[COMPACTED HISTORY - {}]\n\n{}",
            now.to_rfc3339(),
            partials.join(BATCH_SEPARATOR)
        );

        let ceiling = old_tokens.saturating_sub(1);
        let measured = self.tokenizer.count(&content)?;
        if measured > ceiling {
            warn!(
                "Summary ({} tokens) not smaller than the {} tokens it replaces, truncating",
                measured, old_tokens
            );
            content = fit_to_budget(&content, ceiling, self.tokenizer.as_ref())?;
            if content.is_empty() {
                warn!(
                    "No room for a summary below {} tokens, compacted segment is empty",
                    old_tokens
                );
            }
        }

        Ok(Message::at(Role::System, content, now, self.tokenizer.as_ref())?)
    }

    /// Summarize a single artifact and fit the result into `budget` tokens
    pub async fn summarize_artifact(&self, content: &str, budget: usize) -> Result<String> {
        let message = Message::new(Role::User, content, self.tokenizer.as_ref())?;
        let summaries = self.summarize_batches(&[std::slice::from_ref(&message)]).await?;
        let summary = summaries.into_iter().next().unwrap_or_default();

        let measured = self.tokenizer.count(&summary)?;
        if measured > budget {
            debug!(
                "Artifact summary ({} tokens) over budget ({}), truncating",
                measured, budget
            );
            return Ok(fit_to_budget(&summary, budget, self.tokenizer.as_ref())?);
        }
        Ok(summary)
    }
}

fn ratio(compacted: usize, original: usize) -> f64 {
    if original == 0 {
        1.0
    } else {
        compacted as f64 / original as f64
    }
}
