mod common;

use rust_decimal_macros::dec;

use common::{harness, march, request, ASSET};
use grove_lending::core::loan_originator::LoanOriginator;
use grove_lending::core::pool_ledger::LiquidityPools;
use grove_lending::core::repayment_processor::RepaymentProcessor;
use grove_lending::errors::LendingError;

#[tokio::test]
async fn test_first_deposit_creates_pool() {
    let h = harness().await;
    let pools = LiquidityPools::new(h.ctx.clone());

    let err = pools.pool(ASSET).await.unwrap_err();
    assert!(matches!(err, LendingError::PoolNotFound { .. }));

    let units = pools.deposit(ASSET, "lp-1", 10_000, march(1)).await.unwrap();
    assert_eq!(units, 10_000);

    let pool = pools.pool(ASSET).await.unwrap();
    assert_eq!(pool.total_liquidity, 10_000);
    assert_eq!(pool.available_liquidity, 10_000);
    assert_eq!(pool.utilization_rate, dec!(0));
    assert_eq!(pool.current_apy, dec!(0.02));

    let position = h.store.lp_position(ASSET, "lp-1").await.unwrap().unwrap();
    assert_eq!(position.lp_units, 10_000);
    assert_eq!(position.deposited, 10_000);
}

#[tokio::test]
async fn test_interest_accrues_to_existing_providers() {
    let h = harness().await;
    let now = march(1);
    let loan = h.standard_loan(now).await;
    RepaymentProcessor::new(h.ctx.clone())
        .repay(loan.id, 1_100, now)
        .await
        .unwrap();

    let pools = LiquidityPools::new(h.ctx.clone());
    // Pool is now 10100 liquidity over 10000 units.
    let late_units = pools.deposit(ASSET, "lp-2", 1_010, now).await.unwrap();
    assert_eq!(late_units, 1_000);

    let paid = pools.withdraw(ASSET, "lp-1", 10_000, now).await.unwrap();
    assert_eq!(paid, 10_100);

    let position = h.store.lp_position(ASSET, "lp-1").await.unwrap().unwrap();
    assert_eq!(position.lp_units, 0);
    assert_eq!(position.withdrawn, 10_100);

    let pool = pools.pool(ASSET).await.unwrap();
    assert_eq!(pool.total_liquidity, 1_010);
    assert_eq!(pool.total_lp_units, 1_000);
    assert!(pool.is_balanced());
}

#[tokio::test]
async fn test_withdraw_limits() {
    let h = harness().await;
    let now = march(1);
    let pools = LiquidityPools::new(h.ctx.clone());
    pools.deposit(ASSET, "lp-1", 1_000, now).await.unwrap();
    h.set_price(dec!(1.0), now);
    LoanOriginator::new(h.ctx.clone())
        .originate(&request("alice", 800, 1_000), now)
        .await
        .unwrap();

    let err = pools.withdraw(ASSET, "lp-2", 1, now).await.unwrap_err();
    assert!(matches!(err, LendingError::InvalidAmount { .. }), "got {err}");

    let err = pools.withdraw(ASSET, "lp-1", 1_000, now).await.unwrap_err();
    assert!(matches!(err, LendingError::InsufficientLiquidity { .. }), "got {err}");

    let paid = pools.withdraw(ASSET, "lp-1", 200, now).await.unwrap();
    assert_eq!(paid, 200);
    let pool = pools.pool(ASSET).await.unwrap();
    assert_eq!(pool.available_liquidity, 0);
    assert_eq!(pool.utilization_rate, dec!(1));
    assert_eq!(pool.current_apy, dec!(0.30));
}
