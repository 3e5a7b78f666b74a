use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::{Amount, LoanId};

/// Display tier for a loan's health factor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthTier {
    /// HF > 1.5.
    Healthy,
    /// 1.2–1.5 inclusive.
    Monitor,
    /// < 1.2. Below 1.0 the loan is liquidatable.
    AtRisk,
}

impl HealthTier {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Healthy => "healthy",
            Self::Monitor => "monitor",
            Self::AtRisk => "at_risk",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "healthy" => Some(Self::Healthy),
            "monitor" => Some(Self::Monitor),
            "at_risk" => Some(Self::AtRisk),
            _ => None,
        }
    }
}

/// One recomputation of a loan's health, persisted to `loan_health_history`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthSample {
    pub loan_id: LoanId,
    #[serde(with = "rust_decimal::serde::str")]
    pub health_factor: Decimal,
    pub tier: HealthTier,
    #[serde(with = "rust_decimal::serde::str")]
    pub price: Decimal,
    #[serde(with = "rust_decimal::serde::str")]
    pub collateral_value: Decimal,
    pub outstanding_debt: Amount,
    pub recorded_at: DateTime<Utc>,
}

/// Result of one health-monitor sweep.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SweepReport {
    pub checked: usize,
    /// Loans skipped because their asset had no fresh price.
    pub deferred: usize,
    pub tier_changes: usize,
    pub liquidated: Vec<LoanId>,
    /// Loans whose recompute or auto-liquidation errored; the sweep moved on.
    pub failed: usize,
}

impl SweepReport {
    pub fn merge(&mut self, other: SweepReport) {
        self.checked += other.checked;
        self.deferred += other.deferred;
        self.tier_changes += other.tier_changes;
        self.liquidated.extend(other.liquidated);
        self.failed += other.failed;
    }
}
