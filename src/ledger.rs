//! Cost ledger for model usage
//!
//! The ledger is a plain value owned by the caller; nothing here is global.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::debug;

/// Price of one model in dollars per million tokens
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ModelPrice {
    pub input_per_million: f64,
    pub output_per_million: f64,
}

impl ModelPrice {
    pub const fn new(input_per_million: f64, output_per_million: f64) -> Self {
        Self {
            input_per_million,
            output_per_million,
        }
    }

    pub fn cost(&self, input_tokens: u64, output_tokens: u64) -> f64 {
        (input_tokens as f64 / 1e6) * self.input_per_million
            + (output_tokens as f64 / 1e6) * self.output_per_million
    }
}

/// Model-name substring -> price, checked in insertion order
#[derive(Debug, Clone, PartialEq)]
pub struct PricingTable {
    entries: Vec<(String, ModelPrice)>,
    fallback: ModelPrice,
}

impl Default for PricingTable {
    fn default() -> Self {
        Self {
            entries: vec![
                ("opus".to_string(), ModelPrice::new(15.0, 75.0)),
                ("sonnet".to_string(), ModelPrice::new(3.0, 15.0)),
                ("haiku".to_string(), ModelPrice::new(0.25, 1.25)),
            ],
            fallback: ModelPrice::new(3.0, 15.0),
        }
    }
}

impl PricingTable {
    pub fn new(fallback: ModelPrice) -> Self {
        Self {
            entries: Vec::new(),
            fallback,
        }
    }

    /// Add a pattern; earlier patterns win
    pub fn with_model(mut self, pattern: impl Into<String>, price: ModelPrice) -> Self {
        self.entries.push((pattern.into().to_lowercase(), price));
        self
    }

    pub fn price_for(&self, model: &str) -> ModelPrice {
        let model = model.to_lowercase();
        self.entries
            .iter()
            .find(|(pattern, _)| model.contains(pattern.as_str()))
            .map(|(_, price)| *price)
            .unwrap_or(self.fallback)
    }

    pub fn cost(&self, model: &str, input_tokens: u64, output_tokens: u64) -> f64 {
        self.price_for(model).cost(input_tokens, output_tokens)
    }
}

/// One recorded model call
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UsageEntry {
    pub ts: DateTime<Utc>,
    pub date: NaiveDate,
    pub model: String,
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub cost: f64,
}

/// Usage entries plus per-day cost totals
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UsageLedger {
    #[serde(default)]
    usage: Vec<UsageEntry>,
    #[serde(default)]
    daily: BTreeMap<NaiveDate, f64>,
    #[serde(skip)]
    pricing: PricingTable,
}

impl UsageLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_pricing(pricing: PricingTable) -> Self {
        Self {
            pricing,
            ..Self::default()
        }
    }

    /// Replace the pricing table, e.g. after loading a persisted ledger
    pub fn set_pricing(&mut self, pricing: PricingTable) {
        self.pricing = pricing;
    }

    pub fn pricing(&self) -> &PricingTable {
        &self.pricing
    }

    /// Record a call made now
    pub fn record(&mut self, model: &str, input_tokens: u64, output_tokens: u64) -> UsageEntry {
        self.record_at(Utc::now(), model, input_tokens, output_tokens)
    }

    /// Record a call made at `ts`
    pub fn record_at(
        &mut self,
        ts: DateTime<Utc>,
        model: &str,
        input_tokens: u64,
        output_tokens: u64,
    ) -> UsageEntry {
        let cost = self.pricing.cost(model, input_tokens, output_tokens);
        let entry = UsageEntry {
            ts,
            date: ts.date_naive(),
            model: model.to_string(),
            input_tokens,
            output_tokens,
            cost,
        };

        *self.daily.entry(entry.date).or_insert(0.0) += cost;
        self.usage.push(entry.clone());

        debug!(
            "Recorded {} in / {} out tokens for {}: ${:.6}",
            input_tokens, output_tokens, model, cost
        );
        entry
    }

    pub fn entries(&self) -> &[UsageEntry] {
        &self.usage
    }

    pub fn daily_cost(&self, date: NaiveDate) -> f64 {
        self.daily.get(&date).copied().unwrap_or(0.0)
    }

    pub fn today_cost(&self) -> f64 {
        self.daily_cost(Utc::now().date_naive())
    }

    pub fn total_cost(&self) -> f64 {
        self.daily.values().sum()
    }

    /// Cost of calls recorded at or after `since`
    pub fn session_cost(&self, since: DateTime<Utc>) -> f64 {
        self.usage
            .iter()
            .filter(|entry| entry.ts >= since)
            .map(|entry| entry.cost)
            .sum()
    }

    /// Whether today's spend reached `threshold`
    pub fn alert(&self, threshold: f64) -> bool {
        self.today_cost() >= threshold
    }
}
