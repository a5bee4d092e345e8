//! Integration tests for budget accounting, compaction and admission
//!
//! These drive the public API with deterministic tokenizers and summarizers.

use async_trait::async_trait;
use context_budget::{
    cache::{CacheMetadata, ContentCache, RetentionPolicy},
    config::Config,
    context::{
        classify_percent, summarizer::SummarizerError, BudgetMeter, BudgetOrchestrator,
        CompactionConfig, CompactionEngine, ExtractiveSummarizer, History, LlmSummarizer, Message,
        Role, Summarizer, Tokenizer, WarningLevel, WordBasedTokenizer,
    },
    ledger::UsageLedger,
    persist, ContextError,
};
use std::sync::Arc;
use std::time::Duration;

/// Returns a fixed, short summary
struct StubSummarizer(&'static str);

#[async_trait]
impl Summarizer for StubSummarizer {
    async fn summarize(
        &self,
        _messages: &[Message],
        _timeout: Duration,
    ) -> Result<String, SummarizerError> {
        Ok(self.0.to_string())
    }
}

fn tokenizer() -> Arc<dyn Tokenizer> {
    Arc::new(WordBasedTokenizer::new(1.0))
}

fn words(n: usize) -> String {
    vec!["tok"; n].join(" ")
}

fn history_of(sizes: &[usize]) -> History {
    let t = tokenizer();
    sizes
        .iter()
        .enumerate()
        .map(|(i, n)| {
            let role = if i % 2 == 0 { Role::User } else { Role::Agent };
            Message::new(role, words(*n), t.as_ref()).unwrap()
        })
        .collect()
}

fn shared_cache() -> Arc<ContentCache> {
    Arc::new(ContentCache::new(RetentionPolicy::default()))
}

#[test]
fn test_classification_boundaries() {
    let cases = [
        (0.6999, WarningLevel::Ok),
        (0.70, WarningLevel::Medium),
        (0.7999, WarningLevel::Medium),
        (0.80, WarningLevel::High),
        (0.8999, WarningLevel::High),
        (0.90, WarningLevel::Critical),
    ];
    for (percent, expected) in cases {
        assert_eq!(classify_percent(percent), expected, "at {}", percent);
    }
}

#[test]
fn test_medium_usage_output_budget() {
    let meter = BudgetMeter::new();
    let usage = meter.usage_from_tokens(145_000, 200_000).unwrap();

    assert_eq!(usage.percent, 0.725);
    assert_eq!(meter.classify(&usage), WarningLevel::Medium);
    assert_eq!(meter.output_budget(usage.percent), 2000);
}

#[tokio::test]
async fn test_ten_message_history_compacts_to_summary_plus_tail() {
    let history = history_of(&[18, 18, 18, 18, 18, 19, 19, 30, 30, 29]);
    assert_eq!(history.total_tokens(), 217);

    let cache = shared_cache();
    let engine = CompactionEngine::new(
        tokenizer(),
        Arc::new(StubSummarizer("- the user asked for a report and we agreed on Friday")),
        Arc::clone(&cache),
        CompactionConfig::default(),
    );

    let result = engine.compact(&history, 3, true).await.unwrap();
    let summary = result.summary.as_ref().unwrap();

    assert!(summary.token_count() < 128);
    assert_eq!(result.kept_tail.len(), 3);
    assert_eq!(
        result.stats.compacted_tokens,
        summary.token_count() + 89
    );
    assert_eq!(result.to_history().total_tokens(), result.stats.compacted_tokens);

    let key = result.cache_key.unwrap();
    let transcript = cache.get(key.as_str(), None).unwrap();
    assert_eq!(transcript.matches("[user]: ").count(), 4);
    assert_eq!(transcript.matches("[agent]: ").count(), 3);
}

#[tokio::test]
async fn test_large_candidate_admitted_as_summary_and_expandable() {
    let mut candidate = String::from("# Overview\n");
    for i in 0..4_000 {
        candidate.push_str(&format!("line {} {}\n", i, words(10)));
    }
    candidate.push_str("## Details\nthe rollout flag is ROLL-42 for staging\n");
    for i in 0..200 {
        candidate.push_str(&format!("detail {} {}\n", i, words(10)));
    }

    let t = tokenizer();
    assert!(t.count(&candidate).unwrap() >= 50_000);

    let cache = shared_cache();
    let orch = BudgetOrchestrator::new(
        Arc::clone(&t),
        Arc::new(ExtractiveSummarizer::default()),
        Arc::clone(&cache),
        CompactionConfig::default(),
    )
    .with_history(history_of(&[30_000, 30_000]));

    let usage = orch.usage(200_000).await.unwrap();
    assert_eq!(usage.percent, 0.30);

    let admitted = orch.admit(&candidate, "design.md", 200_000).await.unwrap();
    assert!(admitted.was_summarized);
    assert_eq!(admitted.output_budget, 10_000);
    assert!(admitted.accepted_tokens <= 10_000);
    assert!(admitted.savings_percent() > 50.0);

    let key = admitted.cache_key.unwrap();
    assert_eq!(orch.expand(key.as_str(), None).unwrap(), candidate);

    let details = orch.expand(key.as_str(), Some("details")).unwrap();
    assert!(details.starts_with("## Details\n"));
    assert!(details.contains("ROLL-42"));
    assert!(candidate.contains(&details));

    let overview = orch.expand(key.as_str(), Some("overview")).unwrap();
    assert!(overview.starts_with("# Overview\nline 0 "));
    assert!(overview.len() < candidate.len() / 10);

    let window = orch.expand(key.as_str(), Some("roll-42")).unwrap();
    assert!(window.contains("ROLL-42"));
    assert!(window.len() <= 500 * 2 + "roll-42".len() + 8);

    let missing = orch.expand(key.as_str(), Some("no such heading")).unwrap_err();
    assert!(matches!(missing, ContextError::SectionNotFound { .. }));

    assert_eq!(orch.history().await.len(), 2);
}

#[tokio::test]
async fn test_identical_admissions_share_a_key_across_sessions() {
    let cache = shared_cache();
    let make = || {
        Arc::new(BudgetOrchestrator::new(
            tokenizer(),
            Arc::new(StubSummarizer("short")),
            Arc::clone(&cache),
            CompactionConfig::default(),
        ))
    };
    let (a, b) = (make(), make());
    assert_ne!(a.session_id(), b.session_id());

    let candidate = words(20_000);
    let (ra, rb) = tokio::join!(
        a.admit(&candidate, "shared.txt", 100_000),
        b.admit(&candidate, "shared.txt", 100_000)
    );
    let (ra, rb) = (ra.unwrap(), rb.unwrap());

    assert_eq!(ra.cache_key, rb.cache_key);
    assert_eq!(cache.len(), 1);
    assert_eq!(
        ra.cache_key.unwrap(),
        ContentCache::derive_key(&candidate, &CacheMetadata::document("shared.txt"))
    );
}

#[tokio::test]
async fn test_preview_never_changes_usage() {
    let orch = BudgetOrchestrator::new(
        tokenizer(),
        Arc::new(StubSummarizer("summary")),
        shared_cache(),
        CompactionConfig::default(),
    )
    .with_history(history_of(&[40, 40, 40]));

    let before = orch.usage(150).await.unwrap();
    let preview = orch.preview_compaction(1).await.unwrap();
    assert!(preview.stats.compacted_tokens < preview.stats.original_tokens);
    assert_eq!(orch.usage(150).await.unwrap(), before);
}

#[tokio::test]
async fn test_keep_recent_edges() {
    let orch = BudgetOrchestrator::new(
        tokenizer(),
        Arc::new(StubSummarizer("summary")),
        shared_cache(),
        CompactionConfig::default(),
    )
    .with_history(history_of(&[50, 50]));

    let all = orch.preview_compaction(0).await.unwrap();
    assert!(all.kept_tail.is_empty());
    assert_eq!(all.to_history().len(), 1);

    let none = orch.preview_compaction(2).await.unwrap();
    assert!(none.is_noop());
    assert_eq!(none.stats.compacted_tokens, none.stats.original_tokens);
}

#[tokio::test]
async fn test_http_summarizer_drives_compaction() {
    let mut server = mockito::Server::new_async().await;
    let mock = server
        .mock("POST", "/v1/chat/completions")
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(r#"{"choices":[{"message":{"role":"assistant","content":"- shipped v2"}}]}"#)
        .create_async()
        .await;

    let mut config = Config::default();
    config.summarizer.endpoint = format!("{}/v1/chat/completions", server.url());
    let summarizer = LlmSummarizer::new(config.summarizer.to_summarizer_config()).unwrap();

    let orch = BudgetOrchestrator::new(
        tokenizer(),
        Arc::new(summarizer),
        Arc::new(config.cache.build_cache()),
        config.compaction.to_engine_config(),
    )
    .with_history(history_of(&[30, 30, 30, 10]));

    let outcome = orch.check_and_compact(100, 0.7, 1).await.unwrap();
    assert!(outcome.compacted());
    assert!(outcome.history.messages()[0].content().ends_with("- shipped v2"));
    assert_eq!(outcome.history.len(), 2);
    mock.assert_async().await;
}

#[tokio::test]
async fn test_restored_session_snapshot() {
    let dir = tempfile::tempdir().unwrap();
    let history_path = dir.path().join("history.json");
    let ledger_path = dir.path().join("ledger.json");

    persist::save_history(&history_path, &history_of(&[60, 25]))
        .await
        .unwrap();
    let restored = persist::load_history(&history_path, tokenizer().as_ref())
        .await
        .unwrap();

    let orch = BudgetOrchestrator::new(
        tokenizer(),
        Arc::new(StubSummarizer("summary")),
        shared_cache(),
        CompactionConfig::default(),
    );
    orch.replace_history(restored).await;

    let mut ledger = persist::load_ledger(&ledger_path).await.unwrap();
    ledger.record("claude-3-sonnet", 1_000_000, 0);
    persist::save_ledger(&ledger_path, &ledger).await.unwrap();
    let ledger: UsageLedger = persist::load_ledger(&ledger_path).await.unwrap();

    let snapshot = orch.snapshot(100, &ledger, Some(2.0)).await.unwrap();
    assert_eq!(snapshot.context.tokens, 85);
    assert_eq!(snapshot.context.warning, WarningLevel::High);
    assert_eq!(snapshot.cost.session, 3.0);
    assert!(snapshot.cost.alert);
    assert_eq!(snapshot.compression.compactions_today, 0);
}
