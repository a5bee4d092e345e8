//! Token budget accounting against a fixed context capacity
//!
//! Warning levels:
//! - OK: below 70%
//! - MEDIUM: 70-80%
//! - HIGH: 80-90%
//! - CRITICAL: 90% and above
//!
//! Output budget for newly admitted content:
//! - below 40%: 10,000 tokens
//! - 40-70%: 5,000 tokens
//! - 70-85%: 2,000 tokens
//! - 85% and above: 500 tokens

use super::models::{History, UsageSnapshot, WarningLevel};
use crate::error::{ContextError, Result};

pub const MEDIUM_THRESHOLD: f64 = 0.70;
pub const HIGH_THRESHOLD: f64 = 0.80;
pub const CRITICAL_THRESHOLD: f64 = 0.90;

/// Usage at or above which compaction is recommended, unless the caller
/// supplies its own threshold
pub const DEFAULT_COMPACTION_THRESHOLD: f64 = 0.70;

/// Output budget steps as (upper bound exclusive, tokens)
const OUTPUT_BUDGET_STEPS: [(f64, usize); 3] = [(0.40, 10_000), (0.70, 5_000), (0.85, 2_000)];
const MIN_OUTPUT_BUDGET: usize = 500;

/// Stateless budget meter
#[derive(Debug, Clone, Copy, Default)]
pub struct BudgetMeter;

impl BudgetMeter {
    pub fn new() -> Self {
        Self
    }

    /// Compute usage of `history` against `capacity`
    pub fn usage(&self, history: &History, capacity: usize) -> Result<UsageSnapshot> {
        self.usage_from_tokens(history.total_tokens(), capacity)
    }

    /// Compute usage from an already-summed token count
    pub fn usage_from_tokens(&self, used_tokens: usize, capacity: usize) -> Result<UsageSnapshot> {
        if capacity == 0 {
            return Err(ContextError::InvalidCapacity { capacity });
        }

        Ok(UsageSnapshot {
            used_tokens,
            capacity,
            percent: used_tokens as f64 / capacity as f64,
        })
    }

    /// Classify a usage snapshot into a warning level
    pub fn classify(&self, snapshot: &UsageSnapshot) -> WarningLevel {
        classify_percent(snapshot.percent)
    }

    /// Maximum size of a newly admitted artifact at the given usage
    pub fn output_budget(&self, percent: f64) -> usize {
        OUTPUT_BUDGET_STEPS
            .iter()
            .find(|(upper, _)| percent < *upper)
            .map(|(_, tokens)| *tokens)
            .unwrap_or(MIN_OUTPUT_BUDGET)
    }

    /// Whether usage has reached the compaction threshold
    pub fn needs_compaction(&self, snapshot: &UsageSnapshot, threshold: f64) -> bool {
        snapshot.percent >= threshold
    }
}

/// Warning level for a usage fraction
pub fn classify_percent(percent: f64) -> WarningLevel {
    if percent >= CRITICAL_THRESHOLD {
        WarningLevel::Critical
    } else if percent >= HIGH_THRESHOLD {
        WarningLevel::High
    } else if percent >= MEDIUM_THRESHOLD {
        WarningLevel::Medium
    } else {
        WarningLevel::Ok
    }
}
