//! Loan health monitor: recomputes health factors against the price feed.
//!
//! Recomputation is triggered by a price update for one collateral asset or
//! by the scheduled sweep over every active loan. Each recomputation writes
//! a `loan_health_history` sample, the loan's health factor and the lock's
//! price mark in one transaction. A missing or stale price defers the asset:
//! nothing is written and nothing is liquidated on old data.
//!
//! Key features:
//! - Three display tiers (Healthy / Monitor / AtRisk) with transition events
//! - Auto-liquidation below 1.0 through the same path as manual liquidation
//! - Consecutive-failure tracking in the scheduled loop
//! - Graceful shutdown via CancellationToken

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::constants::{HEALTHY_ABOVE, LIQUIDATION_BELOW, MONITOR_FROM};
use crate::errors::LendingError;
use crate::store::{loans, records};
use crate::types::amount::to_decimal;
use crate::types::{
    HealthSample, HealthTier, LendingEvent, Loan, LoanId, LoanStatus, PriceQuote, SweepReport,
};

use super::context::EngineContext;
use super::liquidation_engine::LiquidationEngine;
use super::retry::with_conflict_retry;

// ---------------------------------------------------------------------------
// Pure helper functions
// ---------------------------------------------------------------------------

/// HF = (collateral × price × liquidation_threshold) / outstanding_debt.
///
/// Returns `Decimal::MAX` if debt is zero (no liquidation risk).
pub fn compute_health_factor(
    collateral_amount: Decimal,
    price: Decimal,
    liquidation_threshold: Decimal,
    outstanding_debt: Decimal,
) -> Decimal {
    if outstanding_debt <= Decimal::ZERO {
        return Decimal::MAX;
    }
    (collateral_amount * price * liquidation_threshold) / outstanding_debt
}

/// Classify a health factor into its display tier.
pub fn classify(hf: Decimal) -> HealthTier {
    if hf > HEALTHY_ABOVE {
        HealthTier::Healthy
    } else if hf >= MONITOR_FROM {
        HealthTier::Monitor
    } else {
        HealthTier::AtRisk
    }
}

pub fn is_liquidatable(hf: Decimal) -> bool {
    hf < LIQUIDATION_BELOW
}

/// Health of `loan` at `price`: `(health_factor, collateral_value)`.
pub fn loan_health(loan: &Loan, price: Decimal) -> Result<(Decimal, Decimal), LendingError> {
    let collateral = to_decimal(loan.collateral_amount)?;
    let collateral_value = collateral
        .checked_mul(price)
        .ok_or_else(|| LendingError::invalid_amount("collateral value overflows"))?;
    let debt = to_decimal(loan.remaining_balance())?;
    let hf = compute_health_factor(collateral, price, loan.liquidation_threshold, debt);
    Ok((hf, collateral_value))
}

// ---------------------------------------------------------------------------
// HealthMonitor
// ---------------------------------------------------------------------------

pub struct HealthMonitor {
    ctx: EngineContext,
    liquidations: LiquidationEngine,
    shutdown: CancellationToken,
    consecutive_failures: AtomicU32,
}

impl HealthMonitor {
    pub fn new(ctx: EngineContext, shutdown: CancellationToken) -> Self {
        Self {
            liquidations: LiquidationEngine::new(ctx.clone()),
            ctx,
            shutdown,
            consecutive_failures: AtomicU32::new(0),
        }
    }

    /// Scheduled sweep loop. Runs until the CancellationToken is cancelled.
    pub async fn run(&self) {
        let timing = &self.ctx.config.timing.health_monitoring;
        let interval = Duration::from_secs(timing.sweep_interval_seconds);
        info!(
            interval_seconds = timing.sweep_interval_seconds,
            auto_liquidate = timing.auto_liquidate,
            "health monitor started"
        );

        loop {
            tokio::select! {
                () = self.shutdown.cancelled() => {
                    info!("health monitor shutting down");
                    break;
                }
                () = tokio::time::sleep(interval) => {
                    match self.sweep(Utc::now()).await {
                        Ok(report) => {
                            self.consecutive_failures.store(0, Ordering::Relaxed);
                            debug!(
                                checked = report.checked,
                                deferred = report.deferred,
                                tier_changes = report.tier_changes,
                                liquidated = report.liquidated.len(),
                                failed = report.failed,
                                "health sweep complete"
                            );
                        }
                        Err(e) => {
                            let failures = self.consecutive_failures.fetch_add(1, Ordering::Relaxed) + 1;
                            error!(error = %e, consecutive_failures = failures, "health sweep failed");
                            if failures >= timing.max_consecutive_failures {
                                error!(
                                    consecutive_failures = failures,
                                    "health monitor degraded: loans are not being checked"
                                );
                            }
                        }
                    }
                }
            }
        }
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures.load(Ordering::Relaxed)
    }

    /// Recheck every active loan.
    pub async fn sweep(&self, now: DateTime<Utc>) -> Result<SweepReport, LendingError> {
        let mut by_asset: BTreeMap<String, Vec<Loan>> = BTreeMap::new();
        for loan in self.ctx.store.active_loans().await? {
            by_asset
                .entry(loan.collateral_asset.clone())
                .or_default()
                .push(loan);
        }

        let mut report = SweepReport::default();
        for (asset, loans) in by_asset {
            report.merge(self.check_asset(&asset, loans, now).await?);
        }
        Ok(report)
    }

    /// Recheck the active loans collateralized by `asset` after its price moved.
    pub async fn on_price_update(
        &self,
        asset: &str,
        now: DateTime<Utc>,
    ) -> Result<SweepReport, LendingError> {
        let loans = self.ctx.store.active_loans_for_asset(asset).await?;
        self.check_asset(asset, loans, now).await
    }

    /// Recompute and persist one loan's health without liquidating it.
    pub async fn recompute_loan(
        &self,
        loan_id: LoanId,
        now: DateTime<Utc>,
    ) -> Result<HealthSample, LendingError> {
        let loan = self
            .ctx
            .store
            .loan(loan_id)
            .await?
            .ok_or(LendingError::LoanNotFound { loan_id })?;
        let quote = self.ctx.fresh_price(&loan.collateral_asset, now).await?;
        let (sample, _) = self.record_health(loan_id, &quote, now).await?;
        Ok(sample)
    }

    async fn check_asset(
        &self,
        asset: &str,
        loans: Vec<Loan>,
        now: DateTime<Utc>,
    ) -> Result<SweepReport, LendingError> {
        let mut report = SweepReport::default();
        if loans.is_empty() {
            return Ok(report);
        }

        let quote = match self.ctx.fresh_price(asset, now).await {
            Ok(quote) => quote,
            Err(LendingError::PriceUnavailable { reason, .. }) => {
                warn!(asset, reason = %reason, loans = loans.len(), "price unavailable, deferring health check");
                report.deferred = loans.len();
                return Ok(report);
            }
            Err(e) => return Err(e),
        };

        let timing = &self.ctx.config.timing.health_monitoring;
        for loan in loans {
            let (sample, tier_changed) = match self.record_health(loan.id, &quote, now).await {
                Ok(checked) => checked,
                // Repaid or liquidated since the loan list was read.
                Err(LendingError::LoanNotActive { .. }) => continue,
                Err(e) => {
                    error!(loan_id = loan.id, asset, error = %e, "health recompute failed");
                    report.failed += 1;
                    continue;
                }
            };
            report.checked += 1;
            if tier_changed {
                report.tier_changes += 1;
            }

            if timing.auto_liquidate && is_liquidatable(sample.health_factor) {
                let liquidator = &self.ctx.config.lending.system_liquidator;
                match self.liquidations.liquidate(loan.id, liquidator, now).await {
                    Ok(_) => report.liquidated.push(loan.id),
                    Err(
                        e @ (LendingError::LoanNotLiquidatable { .. }
                        | LendingError::PriceUnavailable { .. }),
                    ) => {
                        debug!(loan_id = loan.id, error = %e, "auto-liquidation skipped");
                    }
                    Err(e) => {
                        error!(loan_id = loan.id, asset, error = %e, "auto-liquidation failed");
                        report.failed += 1;
                    }
                }
            }
        }
        Ok(report)
    }

    /// Persist one recomputation. Returns the sample and whether the tier moved.
    async fn record_health(
        &self,
        loan_id: LoanId,
        quote: &PriceQuote,
        now: DateTime<Utc>,
    ) -> Result<(HealthSample, bool), LendingError> {
        let concurrency = &self.ctx.config.timing.concurrency;
        let (sample, loan, previous) = with_conflict_retry(concurrency, "record_health", move || {
            self.try_record_health(loan_id, quote, now)
        })
        .await?;

        let tier_changed = previous != sample.tier;
        if tier_changed {
            warn!(
                loan_id,
                borrower = %loan.borrower,
                from = previous.as_str(),
                to = sample.tier.as_str(),
                hf = %sample.health_factor,
                "health tier transition"
            );
            self.ctx.emit(LendingEvent::HealthTierChanged {
                loan_id,
                borrower: loan.borrower.clone(),
                from: previous,
                to: sample.tier,
                health_factor: sample.health_factor,
            });
        }
        Ok((sample, tier_changed))
    }

    async fn try_record_health(
        &self,
        loan_id: LoanId,
        quote: &PriceQuote,
        now: DateTime<Utc>,
    ) -> Result<(HealthSample, Loan, HealthTier), LendingError> {
        let mut tx = self.ctx.store.begin().await?;

        let mut loan = loans::require_loan(&mut tx, loan_id).await?;
        if !loan.is_active() {
            return Err(LendingError::LoanNotActive {
                loan_id,
                status: loan.status,
            });
        }

        let previous = classify(loan.health_factor);
        let (hf, collateral_value) = loan_health(&loan, quote.price)?;
        let sample = HealthSample {
            loan_id,
            health_factor: hf,
            tier: classify(hf),
            price: quote.price,
            collateral_value,
            outstanding_debt: loan.remaining_balance(),
            recorded_at: now,
        };

        loan.health_factor = hf;
        loans::update_loan(&mut tx, &mut loan, LoanStatus::Active).await?;

        let mut lock = loans::require_lock(&mut tx, loan_id).await?;
        lock.mark_price(quote.price);
        loans::update_lock(&mut tx, &lock).await?;

        records::insert_health_sample(&mut tx, &sample).await?;
        tx.commit().await?;

        debug!(loan_id, hf = %hf, tier = sample.tier.as_str(), "health recomputed");
        Ok((sample, loan, previous))
    }
}
