use anyhow::{bail, Result};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;

use super::types::{ApyCurveConfig, LendingConfig};
use crate::constants::MAX_RETRY_BASE_DELAY_MS;

/// Validate invariants across the merged config that serde alone cannot enforce.
///
/// Every violation is collected so a broken deployment reports all of them at
/// once. Called automatically by [`super::load_config`].
pub fn validate_config(config: &LendingConfig) -> Result<()> {
    let mut errors: Vec<String> = Vec::new();

    validate_app_config(config, &mut errors);
    validate_lending_config(config, &mut errors);
    validate_seasonal_config(config, &mut errors);
    validate_apy_curve(&config.pools.apy_curve, &mut errors);
    validate_timing_config(config, &mut errors);

    if errors.is_empty() {
        Ok(())
    } else {
        let msg = format!(
            "Configuration validation failed ({} error{}):\n  - {}",
            errors.len(),
            if errors.len() == 1 { "" } else { "s" },
            errors.join("\n  - ")
        );
        bail!("{msg}");
    }
}

// ---------------------------------------------------------------------------
// App config
// ---------------------------------------------------------------------------

fn validate_app_config(config: &LendingConfig, errors: &mut Vec<String>) {
    if config.app.database.path.is_empty() {
        errors.push("app.database: path is empty".into());
    }
    if config.app.logging.log_dir.is_empty() {
        errors.push("app.logging: log_dir is empty".into());
    }
}

// ---------------------------------------------------------------------------
// Lending policy
// ---------------------------------------------------------------------------

fn validate_lending_config(config: &LendingConfig, errors: &mut Vec<String>) {
    let policy = &config.lending;

    if policy.interest_rate < Decimal::ZERO {
        errors.push(format!(
            "lending: interest_rate ({}) must be >= 0",
            policy.interest_rate
        ));
    }

    if policy.liquidation_threshold <= Decimal::ZERO || policy.liquidation_threshold > dec!(1) {
        errors.push(format!(
            "lending: liquidation_threshold ({}) must be in (0, 1]",
            policy.liquidation_threshold
        ));
    }

    if policy.liquidation_penalty < Decimal::ZERO || policy.liquidation_penalty >= dec!(1) {
        errors.push(format!(
            "lending: liquidation_penalty ({}) must be in [0, 1)",
            policy.liquidation_penalty
        ));
    }

    if policy.liquidator_reward_share < Decimal::ZERO || policy.liquidator_reward_share > dec!(1) {
        errors.push(format!(
            "lending: liquidator_reward_share ({}) must be in [0, 1]",
            policy.liquidator_reward_share
        ));
    }

    if policy.max_loan_duration_days == 0 {
        errors.push("lending: max_loan_duration_days must be > 0".into());
    }

    if policy.system_liquidator.is_empty() {
        errors.push("lending: system_liquidator is empty".into());
    }
}

// ---------------------------------------------------------------------------
// Seasonal policy
// ---------------------------------------------------------------------------

fn validate_seasonal_config(config: &LendingConfig, errors: &mut Vec<String>) {
    let seasonal = &config.seasonal;

    validate_months(
        "seasonal.collateral.harvest_months",
        &seasonal.collateral.harvest_months,
        errors,
    );
    validate_months(
        "seasonal.duration.harvest_months",
        &seasonal.duration.harvest_months,
        errors,
    );
    validate_months(
        "seasonal.duration.approaching_months",
        &seasonal.duration.approaching_months,
        errors,
    );

    for (name, ratio) in [
        ("harvest_ratio", seasonal.collateral.harvest_ratio),
        ("off_season_ratio", seasonal.collateral.off_season_ratio),
    ] {
        if ratio < dec!(1) {
            errors.push(format!(
                "seasonal.collateral.{name} ({ratio}) must be >= 1 (loans must be over-collateralized)"
            ));
        }
    }

    let max_days = config.lending.max_loan_duration_days;
    for (name, days) in [
        ("harvest_days", seasonal.duration.harvest_days),
        ("approaching_days", seasonal.duration.approaching_days),
        ("default_days", seasonal.duration.default_days),
    ] {
        if days == 0 || days > max_days {
            errors.push(format!(
                "seasonal.duration.{name} ({days}) must be in 1..={max_days}"
            ));
        }
    }

    let leniency = &seasonal.leniency;
    if leniency.grace_days < 0 || leniency.grace_days > leniency.halving_max_days {
        errors.push(format!(
            "seasonal.leniency: grace_days ({}) must be in 0..=halving_max_days ({})",
            leniency.grace_days, leniency.halving_max_days
        ));
    }
}

fn validate_months(name: &str, months: &[u32], errors: &mut Vec<String>) {
    if months.is_empty() {
        errors.push(format!("{name}: must list at least one month"));
    }
    for month in months {
        if !(1..=12).contains(month) {
            errors.push(format!("{name}: month {month} is outside 1..=12"));
        }
    }
}

// ---------------------------------------------------------------------------
// APY curve
// ---------------------------------------------------------------------------

/// The curve must be non-decreasing so APY never falls as utilization rises.
fn validate_apy_curve(curve: &ApyCurveConfig, errors: &mut Vec<String>) {
    if curve.kink_utilization <= Decimal::ZERO || curve.kink_utilization >= dec!(1) {
        errors.push(format!(
            "pools.apy_curve: kink_utilization ({}) must be in (0, 1)",
            curve.kink_utilization
        ));
    }

    if curve.base_apy < Decimal::ZERO {
        errors.push(format!(
            "pools.apy_curve: base_apy ({}) must be >= 0",
            curve.base_apy
        ));
    }

    if curve.base_apy > curve.apy_at_kink || curve.apy_at_kink > curve.apy_at_max {
        errors.push(format!(
            "pools.apy_curve: must be non-decreasing (base {} <= kink {} <= max {})",
            curve.base_apy, curve.apy_at_kink, curve.apy_at_max
        ));
    }
}

// ---------------------------------------------------------------------------
// Timing
// ---------------------------------------------------------------------------

fn validate_timing_config(config: &LendingConfig, errors: &mut Vec<String>) {
    let timing = &config.timing;

    if timing.health_monitoring.sweep_interval_seconds == 0 {
        errors.push("timing.health_monitoring: sweep_interval_seconds must be > 0".into());
    }

    if timing.health_monitoring.max_consecutive_failures == 0 {
        errors.push("timing.health_monitoring: max_consecutive_failures must be > 0".into());
    }

    if timing.price_feed.max_staleness_seconds <= 0 {
        errors.push(format!(
            "timing.price_feed: max_staleness_seconds ({}) must be > 0",
            timing.price_feed.max_staleness_seconds
        ));
    }

    if timing.concurrency.max_conflict_retries == 0 {
        errors.push("timing.concurrency: max_conflict_retries must be >= 1".into());
    }

    if timing.concurrency.retry_base_delay_ms > MAX_RETRY_BASE_DELAY_MS {
        errors.push(format!(
            "timing.concurrency: retry_base_delay_ms ({}) must be <= {MAX_RETRY_BASE_DELAY_MS}",
            timing.concurrency.retry_base_delay_ms
        ));
    }
}
