//! Read-only dashboard snapshot of a session

use crate::context::models::{UsageSnapshot, WarningLevel};
use crate::context::token_budget::classify_percent;
use crate::ledger::UsageLedger;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Context window panel
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContextPanel {
    pub tokens: usize,
    pub limit: usize,
    /// Percentage, 0-100, one decimal
    pub percent: f64,
    pub warning: WarningLevel,
    pub message: Option<String>,
}

impl From<&UsageSnapshot> for ContextPanel {
    fn from(usage: &UsageSnapshot) -> Self {
        let warning = classify_percent(usage.percent);
        Self {
            tokens: usage.used_tokens,
            limit: usage.capacity,
            percent: (usage.percent * 1000.0).round() / 10.0,
            warning,
            message: warning.message().map(str::to_string),
        }
    }
}

/// Spend panel, in dollars
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CostPanel {
    pub session: f64,
    pub daily: f64,
    pub total: f64,
    pub alert: bool,
}

impl CostPanel {
    /// `alert` is only raised when a threshold is given
    pub fn from_ledger(
        ledger: &UsageLedger,
        session_start: DateTime<Utc>,
        alert_at: Option<f64>,
    ) -> Self {
        Self {
            session: round_cents(ledger.session_cost(session_start)),
            daily: round_cents(ledger.today_cost()),
            total: round_cents(ledger.total_cost()),
            alert: alert_at.map(|threshold| ledger.alert(threshold)).unwrap_or(false),
        }
    }
}

/// Compaction bookkeeping panel
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CompressionPanel {
    pub last_compacted: Option<DateTime<Utc>>,
    pub compactions_today: usize,
    pub tokens_saved: usize,
    pub consecutive_failures: usize,
}

/// Everything a dashboard needs about one session
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DashboardSnapshot {
    pub session_id: Uuid,
    pub context: ContextPanel,
    pub cost: CostPanel,
    pub compression: CompressionPanel,
    pub last_updated: DateTime<Utc>,
}

impl DashboardSnapshot {
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }
}

fn round_cents(value: f64) -> f64 {
    (value * 10_000.0).round() / 10_000.0
}
