//! Forced closure of under-collateralized loans.
//!
//! A liquidation re-reads the loan inside its transaction and re-checks the
//! trigger against a fresh price, so a loan that was repaid, already
//! liquidated, or recovered since the caller looked is refused with
//! `LoanNotLiquidatable`. Lock release, loan status, pool write-off and the
//! liquidation record commit together, and only after the seizure settles.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use tracing::{info, warn};

use crate::errors::LendingError;
use crate::execution::settlement::{settle_or_fail, SettlementIntent};
use crate::store::{loans, pools, records};
use crate::types::amount::{floor_amount, to_decimal};
use crate::types::{Amount, LendingEvent, LiquidationRecord, LoanId, LoanStatus};

use super::context::EngineContext;
use super::health_monitor::{is_liquidatable, loan_health};
use super::retry::with_conflict_retry;

/// How seized collateral value is divided.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LiquidationTerms {
    /// `collateral_value × penalty`, rounded down.
    pub penalty_amount: Amount,
    /// `collateral_value × (1 − penalty)`, rounded down.
    pub usdc_recovered: Amount,
    /// Liquidator's cut of the penalty, rounded down.
    pub liquidator_reward: Amount,
    /// Part of the recovery credited back to the pool (capped at the debt).
    pub pool_credit: Amount,
    /// Recovery above the outstanding debt, owed to the borrower.
    pub borrower_surplus: Amount,
}

pub fn liquidation_terms(
    collateral_value: Decimal,
    penalty: Decimal,
    reward_share: Decimal,
    outstanding_debt: Amount,
) -> Result<LiquidationTerms, LendingError> {
    let penalty_amount = floor_amount(collateral_value * penalty)?;
    let usdc_recovered = floor_amount(collateral_value * (Decimal::ONE - penalty))?;
    let liquidator_reward = floor_amount(to_decimal(penalty_amount)? * reward_share)?;
    let pool_credit = usdc_recovered.min(outstanding_debt);
    Ok(LiquidationTerms {
        penalty_amount,
        usdc_recovered,
        liquidator_reward,
        pool_credit,
        borrower_surplus: usdc_recovered - pool_credit,
    })
}

pub struct LiquidationEngine {
    ctx: EngineContext,
}

impl LiquidationEngine {
    pub fn new(ctx: EngineContext) -> Self {
        Self { ctx }
    }

    /// Liquidate `loan_id` on behalf of `liquidator`.
    pub async fn liquidate(
        &self,
        loan_id: LoanId,
        liquidator: &str,
        now: DateTime<Utc>,
    ) -> Result<LiquidationRecord, LendingError> {
        let concurrency = &self.ctx.config.timing.concurrency;
        let (record, borrower) = with_conflict_retry(concurrency, "liquidate", move || {
            self.try_liquidate(loan_id, liquidator, now)
        })
        .await?;

        warn!(
            loan_id,
            borrower = %borrower,
            liquidator,
            hf = %record.health_factor_at_liquidation,
            price = %record.liquidation_price,
            recovered = %record.usdc_recovered,
            "loan liquidated"
        );
        self.ctx.emit(LendingEvent::LoanLiquidated {
            loan_id,
            borrower,
            liquidator: liquidator.to_string(),
            health_factor: record.health_factor_at_liquidation,
            usdc_recovered: record.usdc_recovered,
        });
        Ok(record)
    }

    async fn try_liquidate(
        &self,
        loan_id: LoanId,
        liquidator: &str,
        now: DateTime<Utc>,
    ) -> Result<(LiquidationRecord, String), LendingError> {
        let current = self
            .ctx
            .store
            .loan(loan_id)
            .await?
            .ok_or(LendingError::LoanNotFound { loan_id })?;
        if !current.is_active() {
            return Err(LendingError::LoanNotLiquidatable {
                loan_id,
                reason: format!("status is {}", current.status),
            });
        }
        let asset = current.collateral_asset;
        let quote = self.ctx.fresh_price(&asset, now).await?;
        let policy = &self.ctx.config.lending;

        let mut tx = self.ctx.store.begin().await?;

        let mut loan = loans::require_loan(&mut tx, loan_id).await?;
        if !loan.is_active() {
            return Err(LendingError::LoanNotLiquidatable {
                loan_id,
                reason: format!("status is {}", loan.status),
            });
        }
        let (hf, collateral_value) = loan_health(&loan, quote.price)?;
        if !is_liquidatable(hf) {
            return Err(LendingError::LoanNotLiquidatable {
                loan_id,
                reason: format!("health factor {hf} is not below 1.0"),
            });
        }

        let outstanding_debt = loan.remaining_balance();
        let principal_outstanding = loan.outstanding_principal();
        let terms = liquidation_terms(
            collateral_value,
            policy.liquidation_penalty,
            policy.liquidator_reward_share,
            outstanding_debt,
        )?;

        let mut lock = loans::require_lock(&mut tx, loan_id).await?;
        lock.mark_price(quote.price);
        lock.release(now)?;
        loans::update_lock(&mut tx, &lock).await?;

        loan.status = LoanStatus::Liquidated;
        loan.liquidated_at = Some(now);
        loan.health_factor = hf;
        loans::update_loan(&mut tx, &mut loan, LoanStatus::Active).await?;

        let mut pool = pools::require_pool(&mut tx, &loan.collateral_asset).await?;
        pool.on_liquidation(principal_outstanding)?;
        pool.credit_recovery(terms.pool_credit, principal_outstanding)?;
        pool.refresh_rates(&self.ctx.config.pools.apy_curve);
        pools::save_pool(&mut tx, &mut pool, now).await?;

        let settlement_ref = settle_or_fail(
            self.ctx.settlement.as_ref(),
            SettlementIntent::SeizeCollateral {
                loan_id,
                asset: loan.collateral_asset.clone(),
                amount: loan.collateral_amount,
                liquidator: liquidator.to_string(),
                expected_proceeds: terms.usdc_recovered,
            },
        )
        .await?;

        let record = LiquidationRecord {
            loan_id,
            liquidator: liquidator.to_string(),
            collateral_value_at_liquidation: collateral_value,
            usdc_recovered: terms.usdc_recovered,
            liquidation_penalty: policy.liquidation_penalty,
            penalty_amount: terms.penalty_amount,
            liquidation_price: quote.price,
            health_factor_at_liquidation: hf,
            liquidator_reward: (policy.liquidator_reward_share > Decimal::ZERO)
                .then_some(terms.liquidator_reward),
            borrower_surplus: terms.borrower_surplus,
            settlement_ref,
            liquidated_at: now,
        };
        records::insert_liquidation(&mut tx, &record).await?;

        tx.commit().await?;

        info!(
            loan_id,
            principal_written_off = %principal_outstanding,
            pool_credit = %terms.pool_credit,
            borrower_surplus = %terms.borrower_surplus,
            "liquidation booked"
        );
        Ok((record, loan.borrower))
    }
}
