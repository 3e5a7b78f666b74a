//! Borrower repayments.
//!
//! Each payment is split into principal and interest, booked against the
//! pool and appended to the repayment ledger. The payment that clears the
//! balance also releases the collateral, closes the loan and records its
//! credit timing category.

use chrono::{DateTime, Utc};
use tracing::info;

use crate::errors::LendingError;
use crate::execution::settlement::{settle_or_fail, SettlementIntent};
use crate::store::{loans, pools, records};
use crate::types::{
    Amount, CreditProfile, LendingEvent, Loan, LoanId, LoanStatus, PaymentType, RepaymentEvent,
    RepaymentOutcome,
};

use super::context::EngineContext;
use super::credit_risk::{build_profile, CreditRiskAdjuster};
use super::pool_ledger::mul_div;
use super::retry::with_conflict_retry;

/// Split `amount` into `(principal_portion, interest_portion)`.
///
/// Pro rata by `principal / repayment_amount`, rounded down, then clamped so
/// neither portion exceeds what is still owed of it. The clearing payment
/// therefore takes all remaining principal.
pub fn split_payment(loan: &Loan, amount: Amount) -> Result<(Amount, Amount), LendingError> {
    let principal_owed = loan.outstanding_principal();
    let interest_paid = loan.amount_repaid.saturating_sub(loan.principal_repaid);
    let interest_owed = loan.total_interest().saturating_sub(interest_paid);

    let pro_rata = mul_div(amount, loan.principal, loan.repayment_amount)
        .ok_or_else(|| LendingError::invalid_amount("payment split overflows"))?;
    let principal_portion = pro_rata
        .max(amount.saturating_sub(interest_owed))
        .min(principal_owed)
        .min(amount);
    Ok((principal_portion, amount - principal_portion))
}

pub struct RepaymentProcessor {
    ctx: EngineContext,
    credit: CreditRiskAdjuster,
}

impl RepaymentProcessor {
    pub fn new(ctx: EngineContext) -> Self {
        Self {
            credit: CreditRiskAdjuster::new(ctx.config.seasonal.clone()),
            ctx,
        }
    }

    /// Apply a payment of `amount` to `loan_id`.
    pub async fn repay(
        &self,
        loan_id: LoanId,
        amount: Amount,
        now: DateTime<Utc>,
    ) -> Result<RepaymentOutcome, LendingError> {
        if amount == 0 {
            return Err(LendingError::invalid_amount("payment must be positive"));
        }

        let concurrency = &self.ctx.config.timing.concurrency;
        let outcome = with_conflict_retry(concurrency, "repay", move || {
            self.try_repay(loan_id, amount, now)
        })
        .await?;

        self.ctx.emit(LendingEvent::RepaymentReceived {
            loan_id,
            amount,
            remaining_balance: outcome.event.remaining_balance,
        });
        if let Some(credit) = &outcome.credit {
            info!(
                loan_id,
                borrower = %outcome.loan.borrower,
                timing = credit.category.as_str(),
                days_offset = credit.days_offset,
                seasonally_adjusted = credit.seasonally_adjusted,
                "loan repaid"
            );
            self.ctx.emit(LendingEvent::LoanRepaid {
                loan_id,
                borrower: outcome.loan.borrower.clone(),
                timing: credit.category,
            });
        } else {
            info!(
                loan_id,
                amount = %amount,
                remaining = %outcome.event.remaining_balance,
                "partial repayment received"
            );
        }
        Ok(outcome)
    }

    async fn try_repay(
        &self,
        loan_id: LoanId,
        amount: Amount,
        now: DateTime<Utc>,
    ) -> Result<RepaymentOutcome, LendingError> {
        let mut tx = self.ctx.store.begin().await?;

        let mut loan = loans::require_loan(&mut tx, loan_id).await?;
        if !loan.is_active() {
            return Err(LendingError::LoanNotActive {
                loan_id,
                status: loan.status,
            });
        }
        let remaining = loan.remaining_balance();
        if amount > remaining {
            return Err(LendingError::ExcessPayment { amount, remaining });
        }

        let (principal_portion, interest_portion) = split_payment(&loan, amount)?;
        loan.amount_repaid += amount;
        loan.principal_repaid += principal_portion;
        let remaining_balance = loan.remaining_balance();

        let mut pool = pools::require_pool(&mut tx, &loan.collateral_asset).await?;
        pool.release(amount, interest_portion)?;

        let credit = if remaining_balance == 0 {
            let mut lock = loans::require_lock(&mut tx, loan_id).await?;
            lock.release(now)?;
            loans::update_lock(&mut tx, &lock).await?;

            loan.status = LoanStatus::Repaid;
            loan.repaid_at = Some(now);
            pool.total_loans_repaid += 1;

            let category = self.credit.categorize(loan.due_date, now, loan.taken_at);
            records::insert_credit_event(&mut tx, loan_id, &loan.borrower, &category, now).await?;
            Some(category)
        } else {
            None
        };

        pool.refresh_rates(&self.ctx.config.pools.apy_curve);
        pools::save_pool(&mut tx, &mut pool, now).await?;
        loans::update_loan(&mut tx, &mut loan, LoanStatus::Active).await?;

        let settlement_ref = settle_or_fail(
            self.ctx.settlement.as_ref(),
            SettlementIntent::CollectRepayment { loan_id, amount },
        )
        .await?;

        let mut event = RepaymentEvent {
            id: 0,
            loan_id,
            payment_amount: amount,
            principal_portion,
            interest_portion,
            payment_type: if remaining_balance == 0 {
                PaymentType::Full
            } else {
                PaymentType::Partial
            },
            remaining_balance,
            settlement_ref,
            paid_at: now,
        };
        event.id = records::insert_repayment(&mut tx, &event).await?;

        tx.commit().await?;
        Ok(RepaymentOutcome {
            event,
            loan,
            credit,
        })
    }

    /// Repayment timing history for `borrower`.
    pub async fn credit_profile(&self, borrower: &str) -> Result<CreditProfile, LendingError> {
        let categories = self
            .ctx
            .store
            .credit_categories_for_borrower(borrower)
            .await?;
        Ok(build_profile(borrower, &categories))
    }
}
