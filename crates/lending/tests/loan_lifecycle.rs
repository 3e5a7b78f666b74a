mod common;

use chrono::{Datelike, Duration};
use rust_decimal_macros::dec;

use common::{harness, march, request, ASSET};
use grove_lending::core::loan_originator::LoanOriginator;
use grove_lending::core::repayment_processor::RepaymentProcessor;
use grove_lending::errors::LendingError;
use grove_lending::types::{CreditTiming, LendingEvent, LoanStatus, PaymentType};

// ---------------------------------------------------------------------------
// Origination
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_originate_at_exact_requirement() {
    let h = harness().await;
    let now = march(1);
    let loan = h.standard_loan(now).await;

    assert_eq!(loan.status, LoanStatus::Active);
    assert_eq!(loan.repayment_amount, 1_100);
    assert_eq!(loan.collateralization_ratio, dec!(1.25));
    assert_eq!(loan.health_factor, dec!(1.125));
    assert_eq!(loan.due_date, now + Duration::days(90));
    assert!(loan.disbursement_ref.is_some());

    let pool = h.store.pool_ledger(ASSET).await.unwrap().unwrap();
    assert_eq!(pool.available_liquidity, 9_000);
    assert_eq!(pool.total_borrowed, 1_000);
    assert_eq!(pool.total_loans_originated, 1);
    assert!(pool.is_balanced());

    let lock = h.store.collateral_lock(loan.id).await.unwrap().unwrap();
    assert_eq!(lock.amount, 1_250);
    assert!(lock.is_locked());
}

#[tokio::test]
async fn test_originate_one_unit_short_is_rejected() {
    let h = harness().await;
    let now = march(1);
    h.fund("lp-1", 10_000, now).await;
    h.set_price(dec!(1.0), now);

    let err = LoanOriginator::new(h.ctx.clone())
        .originate(&request("alice", 1_000, 1_249), now)
        .await
        .unwrap_err();
    assert!(matches!(err, LendingError::InsufficientCollateral { .. }), "got {err}");

    assert!(h.store.active_loans().await.unwrap().is_empty());
    let pool = h.store.pool_ledger(ASSET).await.unwrap().unwrap();
    assert_eq!(pool.available_liquidity, 10_000);
    assert_eq!(pool.total_loans_originated, 0);
}

#[tokio::test]
async fn test_harvest_season_needs_less_collateral() {
    let h = harness().await;
    let now = march(1).with_month(11).unwrap();
    h.fund("lp-1", 10_000, now).await;
    h.set_price(dec!(1.0), now);

    let loan = LoanOriginator::new(h.ctx.clone())
        .originate(&request("alice", 1_000, 1_100), now)
        .await
        .unwrap();
    assert_eq!(loan.collateralization_ratio, dec!(1.10));
    assert_eq!(loan.due_date, now + Duration::days(30));
}

#[tokio::test]
async fn test_originate_without_pool_or_price() {
    let h = harness().await;
    let now = march(1);
    let originator = LoanOriginator::new(h.ctx.clone());

    h.set_price(dec!(1.0), now);
    let err = originator
        .originate(&request("alice", 1_000, 1_250), now)
        .await
        .unwrap_err();
    assert!(matches!(err, LendingError::PoolNotFound { .. }), "got {err}");

    h.fund("lp-1", 10_000, now).await;
    h.prices.remove(ASSET);
    let err = originator
        .originate(&request("alice", 1_000, 1_250), now)
        .await
        .unwrap_err();
    assert!(matches!(err, LendingError::PriceUnavailable { .. }), "got {err}");
}

#[tokio::test]
async fn test_originate_rejects_bad_requests() {
    let h = harness().await;
    let now = march(1);
    h.fund("lp-1", 500, now).await;
    h.set_price(dec!(1.0), now);
    let originator = LoanOriginator::new(h.ctx.clone());

    let err = originator
        .originate(&request("alice", 0, 1_250), now)
        .await
        .unwrap_err();
    assert!(matches!(err, LendingError::InvalidAmount { .. }));

    let mut long = request("alice", 100, 1_250);
    long.duration_days = Some(91);
    let err = originator.originate(&long, now).await.unwrap_err();
    assert!(matches!(err, LendingError::InvalidDuration { days: 91, max_days: 90 }));

    let err = originator
        .originate(&request("alice", 1_000, 1_250), now)
        .await
        .unwrap_err();
    assert!(matches!(err, LendingError::InsufficientLiquidity { .. }), "got {err}");
}

#[tokio::test]
async fn test_settlement_failure_rolls_back_origination() {
    let h = harness().await;
    let now = march(1);
    h.fund("lp-1", 10_000, now).await;
    h.set_price(dec!(1.0), now);
    h.settlement.reject_all(true);

    let err = LoanOriginator::new(h.ctx.clone())
        .originate(&request("alice", 1_000, 1_250), now)
        .await
        .unwrap_err();
    assert!(matches!(err, LendingError::SettlementFailed { .. }), "got {err}");

    assert!(h.store.active_loans().await.unwrap().is_empty());
    assert!(h.store.loan(1).await.unwrap().is_none());
    assert!(h.store.collateral_lock(1).await.unwrap().is_none());
    let pool = h.store.pool_ledger(ASSET).await.unwrap().unwrap();
    assert_eq!(pool.available_liquidity, 10_000);
    assert_eq!(pool.total_borrowed, 0);
}

#[tokio::test]
async fn test_concurrent_originations_never_over_reserve() {
    let h = harness().await;
    let now = march(1);
    h.fund("lp-1", 1_500, now).await;
    h.set_price(dec!(1.0), now);
    let originator = LoanOriginator::new(h.ctx.clone());

    let first = request("alice", 1_000, 1_250);
    let second = request("bob", 1_000, 1_250);
    let (a, b) = tokio::join!(
        originator.originate(&first, now),
        originator.originate(&second, now),
    );

    let successes = [a.is_ok(), b.is_ok()].iter().filter(|ok| **ok).count();
    assert_eq!(successes, 1);
    let failure = a.err().or(b.err()).unwrap();
    assert!(matches!(failure, LendingError::InsufficientLiquidity { .. }), "got {failure}");

    let pool = h.store.pool_ledger(ASSET).await.unwrap().unwrap();
    assert_eq!(pool.total_borrowed, 1_000);
    assert_eq!(pool.available_liquidity, 500);
    assert!(pool.is_balanced());
}

// ---------------------------------------------------------------------------
// Repayment
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_full_repayment_moves_pool_and_closes_loan() {
    let h = harness().await;
    let now = march(1);
    let loan = h.standard_loan(now).await;
    let before = h.store.pool_ledger(ASSET).await.unwrap().unwrap();

    let outcome = RepaymentProcessor::new(h.ctx.clone())
        .repay(loan.id, 1_100, now + Duration::days(60))
        .await
        .unwrap();
    assert_eq!(outcome.event.payment_type, PaymentType::Full);
    assert_eq!(outcome.event.principal_portion, 1_000);
    assert_eq!(outcome.event.interest_portion, 100);
    assert_eq!(outcome.loan.status, LoanStatus::Repaid);
    assert_eq!(outcome.credit.unwrap().category, CreditTiming::Early);

    let after = h.store.pool_ledger(ASSET).await.unwrap().unwrap();
    assert_eq!(after.available_liquidity, before.available_liquidity + 1_100);
    assert_eq!(after.total_borrowed, before.total_borrowed - 1_000);
    assert_eq!(after.total_interest_earned, before.total_interest_earned + 100);
    assert_eq!(after.total_loans_repaid, 1);
    assert!(after.is_balanced());

    let lock = h.store.collateral_lock(loan.id).await.unwrap().unwrap();
    assert!(!lock.is_locked());
}

#[tokio::test]
async fn test_partial_repayments_then_clear() {
    let h = harness().await;
    let now = march(1);
    let loan = h.standard_loan(now).await;
    let processor = RepaymentProcessor::new(h.ctx.clone());

    let first = processor.repay(loan.id, 550, now).await.unwrap();
    assert_eq!(first.event.payment_type, PaymentType::Partial);
    assert_eq!(first.event.principal_portion, 500);
    assert_eq!(first.event.remaining_balance, 550);
    assert!(first.credit.is_none());

    let err = processor.repay(loan.id, 551, now).await.unwrap_err();
    assert!(matches!(err, LendingError::ExcessPayment { amount: 551, remaining: 550 }));

    let last = processor.repay(loan.id, 550, now).await.unwrap();
    assert_eq!(last.event.payment_type, PaymentType::Full);
    assert_eq!(last.loan.principal_repaid, 1_000);

    let history = h.store.repayments(loan.id).await.unwrap();
    assert_eq!(history.len(), 2);
    assert_eq!(
        history.iter().map(|r| r.interest_portion).sum::<u128>(),
        100
    );

    let err = processor.repay(loan.id, 1, now).await.unwrap_err();
    assert!(matches!(err, LendingError::LoanNotActive { .. }), "got {err}");
}

#[tokio::test]
async fn test_repay_unknown_loan_and_zero_amount() {
    let h = harness().await;
    let processor = RepaymentProcessor::new(h.ctx.clone());
    let err = processor.repay(42, 100, march(1)).await.unwrap_err();
    assert!(matches!(err, LendingError::LoanNotFound { loan_id: 42 }));
    let err = processor.repay(42, 0, march(1)).await.unwrap_err();
    assert!(matches!(err, LendingError::InvalidAmount { .. }));
}

#[tokio::test]
async fn test_credit_profile_counts_early_and_late() {
    let h = harness().await;
    let now = march(1);
    h.fund("lp-1", 10_000, now).await;
    h.set_price(dec!(1.0), now);
    let originator = LoanOriginator::new(h.ctx.clone());
    let processor = RepaymentProcessor::new(h.ctx.clone());

    let early = originator
        .originate(&request("alice", 1_000, 1_250), now)
        .await
        .unwrap();
    let late = originator
        .originate(&request("alice", 1_000, 1_250), now)
        .await
        .unwrap();

    processor
        .repay(early.id, 1_100, early.due_date - Duration::days(5))
        .await
        .unwrap();
    // Ten days late in June: off-season leniency halves the penalty.
    let outcome = processor
        .repay(late.id, 1_100, late.due_date + Duration::days(10))
        .await
        .unwrap();
    let credit = outcome.credit.unwrap();
    assert_eq!(credit.category, CreditTiming::Late);
    assert_eq!(credit.penalty_days, dec!(5));
    assert!(credit.seasonally_adjusted);

    let profile = processor.credit_profile("alice").await.unwrap();
    assert_eq!(profile.early, 1);
    assert_eq!(profile.late, 1);
    assert_eq!(profile.on_time, 0);
    assert_eq!(profile.total_penalty_days, dec!(5));

    let nobody = processor.credit_profile("carol").await.unwrap();
    assert_eq!(nobody.total(), 0);
}

#[tokio::test]
async fn test_lifecycle_emits_events() {
    let mut h = harness().await;
    let now = march(1);
    let loan = h.standard_loan(now).await;
    RepaymentProcessor::new(h.ctx.clone())
        .repay(loan.id, 1_100, now)
        .await
        .unwrap();

    let events = h.drain_events();
    assert!(matches!(events[0], LendingEvent::LoanOriginated { principal: 1_000, .. }));
    assert!(matches!(
        events[1],
        LendingEvent::RepaymentReceived { amount: 1_100, remaining_balance: 0, .. }
    ));
    assert!(matches!(events[2], LendingEvent::LoanRepaid { .. }));
    assert!(events.iter().all(|e| e.loan_id() == loan.id));
}
