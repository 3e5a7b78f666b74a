//! Loan origination.
//!
//! Validates a request against the seasonal collateral requirement and a
//! fresh price, then reserves pool liquidity, creates the loan, locks the
//! collateral and disburses, all in one transaction.

use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;
use tracing::info;

use crate::errors::LendingError;
use crate::execution::settlement::{settle_or_fail, SettlementIntent};
use crate::store::{loans, pools};
use crate::types::amount::{ceil_amount, to_decimal};
use crate::types::{Amount, LendingEvent, Loan, LoanRequest, LoanStatus};

use super::collateral_vault::CollateralLock;
use super::context::EngineContext;
use super::credit_risk::CreditRiskAdjuster;
use super::health_monitor::compute_health_factor;
use super::retry::with_conflict_retry;

/// `principal × (1 + rate)`, rounded up to the minor unit.
pub fn repayment_amount(principal: Amount, interest_rate: Decimal) -> Result<Amount, LendingError> {
    let owed = to_decimal(principal)?
        .checked_mul(Decimal::ONE + interest_rate)
        .ok_or_else(|| LendingError::invalid_amount("repayment amount overflows"))?;
    ceil_amount(owed)
}

/// Collateral must be worth at least `principal × ratio` at `price`.
pub fn check_collateral(
    principal: Amount,
    collateral_amount: Amount,
    price: Decimal,
    ratio: Decimal,
) -> Result<(), LendingError> {
    let overflow = || LendingError::invalid_amount("collateral check overflows");
    let collateral_value = to_decimal(collateral_amount)?
        .checked_mul(price)
        .ok_or_else(overflow)?;
    let required_value = to_decimal(principal)?.checked_mul(ratio).ok_or_else(overflow)?;
    if collateral_value < required_value {
        return Err(LendingError::InsufficientCollateral {
            collateral_value: collateral_value.to_string(),
            required_value: required_value.to_string(),
        });
    }
    Ok(())
}

pub struct LoanOriginator {
    ctx: EngineContext,
    credit: CreditRiskAdjuster,
}

impl LoanOriginator {
    pub fn new(ctx: EngineContext) -> Self {
        Self {
            credit: CreditRiskAdjuster::new(ctx.config.seasonal.clone()),
            ctx,
        }
    }

    /// Originate a loan for `request` at `now`.
    pub async fn originate(
        &self,
        request: &LoanRequest,
        now: DateTime<Utc>,
    ) -> Result<Loan, LendingError> {
        if request.principal == 0 {
            return Err(LendingError::invalid_amount("principal must be positive"));
        }
        if request.collateral_amount == 0 {
            return Err(LendingError::invalid_amount("collateral must be positive"));
        }
        let duration_days = self.duration_days(request, now)?;

        let concurrency = &self.ctx.config.timing.concurrency;
        let loan = with_conflict_retry(concurrency, "originate", move || {
            self.try_originate(request, duration_days, now)
        })
        .await?;

        info!(
            loan_id = loan.id,
            borrower = %loan.borrower,
            asset = %loan.collateral_asset,
            principal = %loan.principal,
            collateral = %loan.collateral_amount,
            ratio = %loan.collateralization_ratio,
            hf = %loan.health_factor,
            due_date = %loan.due_date,
            "loan originated"
        );
        self.ctx.emit(LendingEvent::LoanOriginated {
            loan_id: loan.id,
            borrower: loan.borrower.clone(),
            asset: loan.collateral_asset.clone(),
            principal: loan.principal,
        });
        Ok(loan)
    }

    /// Requested duration if given, otherwise the seasonal recommendation.
    fn duration_days(&self, request: &LoanRequest, now: DateTime<Utc>) -> Result<u32, LendingError> {
        let max_days = self.ctx.config.lending.max_loan_duration_days;
        match request.duration_days {
            Some(days) if days == 0 || days > max_days => {
                Err(LendingError::InvalidDuration { days, max_days })
            }
            Some(days) => Ok(days),
            None => Ok(self.credit.recommended_duration_days(now)),
        }
    }

    async fn try_originate(
        &self,
        request: &LoanRequest,
        duration_days: u32,
        now: DateTime<Utc>,
    ) -> Result<Loan, LendingError> {
        let policy = &self.ctx.config.lending;
        let ratio = self.credit.collateral_ratio(now);
        let quote = self.ctx.fresh_price(&request.collateral_asset, now).await?;
        check_collateral(request.principal, request.collateral_amount, quote.price, ratio)?;

        let health_factor = compute_health_factor(
            to_decimal(request.collateral_amount)?,
            quote.price,
            policy.liquidation_threshold,
            to_decimal(request.principal)?,
        );
        let mut loan = Loan {
            id: 0,
            borrower: request.borrower.clone(),
            principal: request.principal,
            collateral_amount: request.collateral_amount,
            collateral_asset: request.collateral_asset.clone(),
            interest_rate: policy.interest_rate,
            collateralization_ratio: ratio,
            liquidation_threshold: policy.liquidation_threshold,
            health_factor,
            price_at_origination: quote.price,
            repayment_amount: repayment_amount(request.principal, policy.interest_rate)?,
            amount_repaid: 0,
            principal_repaid: 0,
            status: LoanStatus::Active,
            taken_at: now,
            due_date: now + Duration::days(i64::from(duration_days)),
            repaid_at: None,
            liquidated_at: None,
            disbursement_ref: None,
            version: 1,
        };

        let mut tx = self.ctx.store.begin().await?;

        let mut pool = pools::require_pool(&mut tx, &request.collateral_asset).await?;
        pool.reserve(request.principal)?;
        pool.total_loans_originated += 1;
        pool.refresh_rates(&self.ctx.config.pools.apy_curve);
        pools::save_pool(&mut tx, &mut pool, now).await?;

        loan.id = loans::insert_loan(&mut tx, &loan).await?;

        let lock = CollateralLock::lock(
            loan.id,
            &loan.collateral_asset,
            loan.collateral_amount,
            quote.price,
            now,
        )?;
        loans::insert_lock(&mut tx, &lock).await?;

        loan.disbursement_ref = settle_or_fail(
            self.ctx.settlement.as_ref(),
            SettlementIntent::Disburse {
                loan_id: loan.id,
                borrower: loan.borrower.clone(),
                amount: loan.principal,
            },
        )
        .await?;
        loans::update_loan(&mut tx, &mut loan, LoanStatus::Active).await?;

        tx.commit().await?;
        Ok(loan)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_repayment_amount_rounds_up() {
        assert_eq!(repayment_amount(1_000, dec!(0.10)).unwrap(), 1_100);
        assert_eq!(repayment_amount(999, dec!(0.10)).unwrap(), 1_099); // 1098.9
        assert_eq!(repayment_amount(1, dec!(0.10)).unwrap(), 2);
    }

    #[test]
    fn test_collateral_exactly_at_requirement_passes() {
        // 1000 × 1.25 = 1250
        assert!(check_collateral(1_000, 1_250, dec!(1.0), dec!(1.25)).is_ok());
    }

    #[test]
    fn test_collateral_one_unit_short_fails() {
        let err = check_collateral(1_000, 1_249, dec!(1.0), dec!(1.25)).unwrap_err();
        match err {
            LendingError::InsufficientCollateral {
                collateral_value,
                required_value,
            } => {
                assert_eq!(collateral_value.parse::<Decimal>().unwrap(), dec!(1249));
                assert_eq!(required_value.parse::<Decimal>().unwrap(), dec!(1250));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_harvest_ratio_accepts_less_collateral() {
        assert!(check_collateral(1_000, 1_100, dec!(1.0), dec!(1.10)).is_ok());
        assert!(check_collateral(1_000, 1_100, dec!(1.0), dec!(1.25)).is_err());
    }
}
