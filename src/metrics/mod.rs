//! Metrics collection for observability

use once_cell::sync::Lazy;
use prometheus::{
    register_counter_vec_with_registry, register_counter_with_registry,
    register_histogram_vec_with_registry, register_histogram_with_registry, Counter, CounterVec,
    Histogram, HistogramVec, Opts, Registry,
};
use std::sync::Arc;

/// Global metrics registry
pub static METRICS: Lazy<Arc<Metrics>> =
    Lazy::new(|| Arc::new(Metrics::new().expect("Failed to initialize metrics")));

/// Metrics collector
pub struct Metrics {
    registry: Registry,

    // Budget metrics
    pub usage_ratio: Histogram,
    pub warning_levels: CounterVec,

    // Compaction metrics
    pub compactions: CounterVec,
    pub compaction_duration: HistogramVec,
    pub compaction_tokens_saved: Counter,
    pub summarizer_batches: Counter,

    // Admission metrics
    pub admissions: CounterVec,

    // Cache metrics
    pub cache_puts: CounterVec,
    pub cache_lookups: CounterVec,
    pub cache_evictions: Counter,
}

impl Metrics {
    /// Create a new metrics collector with its own registry
    pub fn new() -> Result<Self, prometheus::Error> {
        let registry = Registry::new();

        let usage_ratio = register_histogram_with_registry!(
            "context_usage_ratio",
            "Context usage as a fraction of capacity",
            vec![0.1, 0.2, 0.3, 0.4, 0.5, 0.6, 0.7, 0.8, 0.85, 0.9, 0.95, 1.0],
            registry
        )?;

        let warning_levels = register_counter_vec_with_registry!(
            Opts::new("context_warning_levels_total", "Usage classifications by level"),
            &["level"],
            registry
        )?;

        let compactions = register_counter_vec_with_registry!(
            Opts::new("context_compactions_total", "Compaction attempts by outcome"),
            &["status"],
            registry
        )?;

        let compaction_duration = register_histogram_vec_with_registry!(
            "context_compaction_duration_seconds",
            "Compaction duration in seconds",
            &["mode"],
            registry
        )?;

        let compaction_tokens_saved = register_counter_with_registry!(
            Opts::new("context_compaction_tokens_saved_total", "Tokens removed by committed compactions"),
            registry
        )?;

        let summarizer_batches = register_counter_with_registry!(
            Opts::new("context_summarizer_batches_total", "Batches sent to the summarizer"),
            registry
        )?;

        let admissions = register_counter_vec_with_registry!(
            Opts::new("context_admissions_total", "Admitted artifacts by mode"),
            &["mode"],
            registry
        )?;

        let cache_puts = register_counter_vec_with_registry!(
            Opts::new("content_cache_puts_total", "Cache puts by outcome"),
            &["outcome"],
            registry
        )?;

        let cache_lookups = register_counter_vec_with_registry!(
            Opts::new("content_cache_lookups_total", "Cache lookups by result"),
            &["result"],
            registry
        )?;

        let cache_evictions = register_counter_with_registry!(
            Opts::new("content_cache_evictions_total", "Entries removed by the retention policy"),
            registry
        )?;

        Ok(Self {
            registry,
            usage_ratio,
            warning_levels,
            compactions,
            compaction_duration,
            compaction_tokens_saved,
            summarizer_batches,
            admissions,
            cache_puts,
            cache_lookups,
            cache_evictions,
        })
    }

    /// Get the metrics registry for exporting
    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Record a usage measurement and its classification
    pub fn record_usage(&self, percent: f64, level: &str) {
        self.usage_ratio.observe(percent);
        self.warning_levels.with_label_values(&[level]).inc();
    }

    /// Record a compaction outcome
    pub fn record_compaction(&self, status: &str, tokens_saved: usize, batches: usize) {
        self.compactions.with_label_values(&[status]).inc();
        self.compaction_tokens_saved.inc_by(tokens_saved as f64);
        self.summarizer_batches.inc_by(batches as f64);
    }

    /// Record an admission by what was handed back: full, summary or signatures
    pub fn record_admission(&self, mode: &str) {
        self.admissions.with_label_values(&[mode]).inc();
    }

    /// Record a cache put
    pub fn record_cache_put(&self, inserted: bool) {
        let outcome = if inserted { "inserted" } else { "deduplicated" };
        self.cache_puts.with_label_values(&[outcome]).inc();
    }

    /// Record a cache lookup
    pub fn record_cache_lookup(&self, hit: bool) {
        let result = if hit { "hit" } else { "miss" };
        self.cache_lookups.with_label_values(&[result]).inc();
    }

    pub fn record_cache_evictions(&self, count: usize) {
        self.cache_evictions.inc_by(count as f64);
    }

    /// Export metrics in Prometheus text format
    pub fn export_prometheus(&self) -> String {
        use prometheus::Encoder;

        let encoder = prometheus::TextEncoder::new();
        let metric_families = self.registry.gather();

        let mut buffer = Vec::new();
        encoder.encode(&metric_families, &mut buffer).unwrap_or_default();

        String::from_utf8(buffer).unwrap_or_default()
    }
}

/// Time an expression against a labelled histogram
#[macro_export]
macro_rules! time_operation {
    ($histogram:expr, $label:expr, $operation:expr) => {{
        let timer = $histogram.with_label_values(&[$label]).start_timer();
        let result = $operation;
        timer.observe_duration();
        result
    }};
}
