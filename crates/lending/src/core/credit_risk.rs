//! Repayment-timing categorization and harvest-calendar policy.
//!
//! Everything here is a pure function of timestamps and the seasonal config,
//! so the month boundaries can be tested directly. Two independent month
//! tables exist: one drives the required collateral ratio, the other the
//! recommended loan duration.

use chrono::{DateTime, Datelike, Utc};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;

use crate::config::SeasonalConfig;
use crate::types::{CreditCategory, CreditProfile, CreditTiming};

// ---------------------------------------------------------------------------
// Seasonal policy tables
// ---------------------------------------------------------------------------

fn month_in(months: &[u32], at: DateTime<Utc>) -> bool {
    months.contains(&at.month())
}

/// Whether `at` falls in the main harvest window of the collateral table.
pub fn is_harvest_season(config: &SeasonalConfig, at: DateTime<Utc>) -> bool {
    month_in(&config.collateral.harvest_months, at)
}

/// Required collateral value as a multiple of principal for a loan opened at `at`.
pub fn seasonal_collateral_ratio(config: &SeasonalConfig, at: DateTime<Utc>) -> Decimal {
    if is_harvest_season(config, at) {
        config.collateral.harvest_ratio
    } else {
        config.collateral.off_season_ratio
    }
}

/// Recommended loan duration for a loan opened at `at`.
///
/// Harvest months win over approaching months when the tables overlap.
pub fn recommended_duration_days(config: &SeasonalConfig, at: DateTime<Utc>) -> u32 {
    let duration = &config.duration;
    if month_in(&duration.harvest_months, at) {
        duration.harvest_days
    } else if month_in(&duration.approaching_months, at) {
        duration.approaching_days
    } else {
        duration.default_days
    }
}

// ---------------------------------------------------------------------------
// Timing categorization
// ---------------------------------------------------------------------------

/// Categorize a repayment against its due date.
///
/// Day offsets truncate toward zero, so anything within 24h of the due date
/// on either side is on time.
pub fn categorize(
    due_date: DateTime<Utc>,
    repaid_at: DateTime<Utc>,
    started_at: DateTime<Utc>,
) -> CreditCategory {
    let days_offset = (repaid_at - due_date).num_days();
    let loan_duration_days = (due_date - started_at).num_days().max(1);

    let category = if days_offset <= -1 {
        CreditTiming::Early
    } else if days_offset >= 1 {
        CreditTiming::Late
    } else {
        CreditTiming::OnTime
    };

    let penalty_days = match category {
        CreditTiming::Late => Decimal::from(days_offset),
        CreditTiming::Early | CreditTiming::OnTime => Decimal::ZERO,
    };

    CreditCategory {
        category,
        days_offset,
        penalty_days,
        loan_duration_days,
        seasonally_adjusted: false,
    }
}

/// Off-season leniency for late repayments.
///
/// Outside the harvest window growers have little cash flow, so short delays
/// are forgiven (`<= grace_days`) or half-counted (`<= halving_max_days`).
/// Longer delays and harvest-season repayments are left unchanged.
pub fn adjust_for_harvest_season(
    config: &SeasonalConfig,
    category: CreditCategory,
    repaid_at: DateTime<Utc>,
) -> CreditCategory {
    if category.category != CreditTiming::Late || is_harvest_season(config, repaid_at) {
        return category;
    }

    let days_late = category.days_offset;
    let leniency = &config.leniency;

    if days_late <= leniency.grace_days {
        CreditCategory {
            category: CreditTiming::OnTime,
            penalty_days: Decimal::ZERO,
            seasonally_adjusted: true,
            ..category
        }
    } else if days_late <= leniency.halving_max_days {
        CreditCategory {
            penalty_days: category.penalty_days / dec!(2),
            seasonally_adjusted: true,
            ..category
        }
    } else {
        category
    }
}

// ---------------------------------------------------------------------------
// Adjuster
// ---------------------------------------------------------------------------

/// Seasonal credit-risk policy bound to one configuration.
#[derive(Debug, Clone)]
pub struct CreditRiskAdjuster {
    config: SeasonalConfig,
}

impl CreditRiskAdjuster {
    pub fn new(config: SeasonalConfig) -> Self {
        Self { config }
    }

    /// Categorize and apply seasonal leniency in one step.
    pub fn categorize(
        &self,
        due_date: DateTime<Utc>,
        repaid_at: DateTime<Utc>,
        started_at: DateTime<Utc>,
    ) -> CreditCategory {
        let raw = categorize(due_date, repaid_at, started_at);
        adjust_for_harvest_season(&self.config, raw, repaid_at)
    }

    pub fn collateral_ratio(&self, at: DateTime<Utc>) -> Decimal {
        seasonal_collateral_ratio(&self.config, at)
    }

    pub fn recommended_duration_days(&self, at: DateTime<Utc>) -> u32 {
        recommended_duration_days(&self.config, at)
    }

    pub fn is_harvest_season(&self, at: DateTime<Utc>) -> bool {
        is_harvest_season(&self.config, at)
    }
}

/// Fold a borrower's recorded categories into a profile.
pub fn build_profile<'a>(
    borrower: &str,
    categories: impl IntoIterator<Item = &'a CreditCategory>,
) -> CreditProfile {
    let mut profile = CreditProfile {
        borrower: borrower.to_string(),
        ..CreditProfile::default()
    };
    for c in categories {
        match c.category {
            CreditTiming::Early => profile.early += 1,
            CreditTiming::OnTime => profile.on_time += 1,
            CreditTiming::Late => profile.late += 1,
        }
        profile.total_penalty_days += c.penalty_days;
    }
    profile
}
