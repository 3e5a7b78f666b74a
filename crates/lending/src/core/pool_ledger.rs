//! Per-asset liquidity accounting.
//!
//! `PoolLedger` is plain data with explicit, named mutations. Callers load it
//! inside a store transaction, apply one or more mutations, then persist it in
//! the same transaction as the loan state change that caused them. Every
//! mutation preserves `available_liquidity + total_borrowed == total_liquidity`.
//!
//! [`LiquidityPools`] is the supply-side service: deposits mint LP units,
//! withdrawals burn them, both against the persisted pool row.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::config::ApyCurveConfig;
use crate::errors::LendingError;
use crate::store::pools;
use crate::types::amount::to_decimal;
use crate::types::Amount;

use super::context::EngineContext;
use super::retry::with_conflict_retry;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PoolLedger {
    pub asset: String,
    pub total_liquidity: Amount,
    pub available_liquidity: Amount,
    pub total_borrowed: Amount,
    pub total_lp_units: Amount,
    #[serde(with = "rust_decimal::serde::str")]
    pub utilization_rate: Decimal,
    #[serde(with = "rust_decimal::serde::str")]
    pub current_apy: Decimal,
    pub total_interest_earned: Amount,
    pub total_loans_originated: u64,
    pub total_loans_repaid: u64,
    pub total_liquidations: u64,
    pub version: i64,
}

impl PoolLedger {
    /// Empty pool, created on the first deposit for `asset`.
    pub fn new(asset: &str) -> Self {
        Self {
            asset: asset.to_string(),
            total_liquidity: 0,
            available_liquidity: 0,
            total_borrowed: 0,
            total_lp_units: 0,
            utilization_rate: Decimal::ZERO,
            current_apy: Decimal::ZERO,
            total_interest_earned: 0,
            total_loans_originated: 0,
            total_loans_repaid: 0,
            total_liquidations: 0,
            version: 0,
        }
    }

    pub fn is_balanced(&self) -> bool {
        self.available_liquidity.checked_add(self.total_borrowed) == Some(self.total_liquidity)
    }

    // -----------------------------------------------------------------------
    // Lending side
    // -----------------------------------------------------------------------

    /// Move `amount` from available liquidity into outstanding loans.
    pub fn reserve(&mut self, amount: Amount) -> Result<(), LendingError> {
        if amount > self.available_liquidity {
            return Err(LendingError::InsufficientLiquidity {
                asset: self.asset.clone(),
                requested: amount,
                available: self.available_liquidity,
            });
        }
        self.available_liquidity -= amount;
        self.total_borrowed += amount;
        self.refresh_utilization();
        Ok(())
    }

    /// Book a repayment of `amount`, of which `interest_portion` is interest.
    ///
    /// The principal portion stops being borrowed; the interest grows the pool.
    pub fn release(&mut self, amount: Amount, interest_portion: Amount) -> Result<(), LendingError> {
        let principal_portion = amount.checked_sub(interest_portion).ok_or_else(|| {
            LendingError::invalid_amount(format!(
                "interest portion {interest_portion} exceeds payment {amount}"
            ))
        })?;
        if principal_portion > self.total_borrowed {
            return Err(LendingError::invalid_amount(format!(
                "principal portion {principal_portion} exceeds borrowed {}",
                self.total_borrowed
            )));
        }
        let available = bounded_add(self.available_liquidity, amount, "available liquidity")?;
        let total = bounded_add(self.total_liquidity, interest_portion, "total liquidity")?;
        let earned = bounded_add(self.total_interest_earned, interest_portion, "interest earned")?;

        self.total_borrowed -= principal_portion;
        self.available_liquidity = available;
        self.total_liquidity = total;
        self.total_interest_earned = earned;
        self.refresh_utilization();
        Ok(())
    }

    /// Write off the outstanding principal of a liquidated loan.
    ///
    /// Nothing returns to available liquidity here; proceeds arrive through
    /// [`PoolLedger::credit_recovery`].
    pub fn on_liquidation(&mut self, principal_outstanding: Amount) -> Result<(), LendingError> {
        if principal_outstanding > self.total_borrowed {
            return Err(LendingError::invalid_amount(format!(
                "liquidated principal {principal_outstanding} exceeds borrowed {}",
                self.total_borrowed
            )));
        }
        self.total_borrowed -= principal_outstanding;
        self.total_liquidity -= principal_outstanding;
        self.total_liquidations += 1;
        self.refresh_utilization();
        Ok(())
    }

    /// Credit liquidation proceeds. Anything recovered above the written-off
    /// principal counts as earned interest.
    pub fn credit_recovery(
        &mut self,
        recovered: Amount,
        principal_written_off: Amount,
    ) -> Result<(), LendingError> {
        let available = bounded_add(self.available_liquidity, recovered, "available liquidity")?;
        let total = bounded_add(self.total_liquidity, recovered, "total liquidity")?;
        let earned = bounded_add(
            self.total_interest_earned,
            recovered.saturating_sub(principal_written_off),
            "interest earned",
        )?;

        self.available_liquidity = available;
        self.total_liquidity = total;
        self.total_interest_earned = earned;
        self.refresh_utilization();
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Supply side
    // -----------------------------------------------------------------------

    /// Add liquidity and return the LP units minted for it.
    pub fn deposit(&mut self, amount: Amount) -> Result<Amount, LendingError> {
        if amount == 0 {
            return Err(LendingError::invalid_amount("deposit must be positive"));
        }
        let units = if self.total_lp_units == 0 || self.total_liquidity == 0 {
            amount
        } else {
            mul_div(amount, self.total_lp_units, self.total_liquidity)
                .ok_or_else(|| LendingError::invalid_amount("deposit overflows LP units"))?
        };
        if units == 0 {
            return Err(LendingError::invalid_amount(
                "deposit too small to mint a single LP unit",
            ));
        }
        let total = bounded_add(self.total_liquidity, amount, "total liquidity")?;
        let available = bounded_add(self.available_liquidity, amount, "available liquidity")?;
        let lp_units = bounded_add(self.total_lp_units, units, "LP units")?;

        self.total_liquidity = total;
        self.available_liquidity = available;
        self.total_lp_units = lp_units;
        self.refresh_utilization();
        Ok(units)
    }

    /// Current redemption value of `units`, rounded down.
    pub fn value_of_units(&self, units: Amount) -> Amount {
        if self.total_lp_units == 0 {
            return 0;
        }
        mul_div(units, self.total_liquidity, self.total_lp_units).unwrap_or(0)
    }

    /// Burn `units` and return the liquidity paid out for them.
    pub fn withdraw(&mut self, units: Amount) -> Result<Amount, LendingError> {
        if units == 0 || units > self.total_lp_units {
            return Err(LendingError::invalid_amount(format!(
                "cannot redeem {units} of {} LP units",
                self.total_lp_units
            )));
        }
        let amount = self.value_of_units(units);
        if amount > self.available_liquidity {
            return Err(LendingError::InsufficientLiquidity {
                asset: self.asset.clone(),
                requested: amount,
                available: self.available_liquidity,
            });
        }
        self.total_lp_units -= units;
        self.total_liquidity -= amount;
        self.available_liquidity -= amount;
        self.refresh_utilization();
        Ok(amount)
    }

    // -----------------------------------------------------------------------
    // Rates
    // -----------------------------------------------------------------------

    fn refresh_utilization(&mut self) {
        self.utilization_rate = utilization(self.total_borrowed, self.total_liquidity);
    }

    /// Recompute utilization and APY. Called before every persist.
    pub fn refresh_rates(&mut self, curve: &ApyCurveConfig) {
        self.refresh_utilization();
        self.current_apy = apy_for_utilization(curve, self.utilization_rate);
    }
}

/// One liquidity provider's share of a pool.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LpPosition {
    pub asset: String,
    pub provider: String,
    pub lp_units: Amount,
    /// Lifetime totals, for reporting.
    pub deposited: Amount,
    pub withdrawn: Amount,
    pub updated_at: DateTime<Utc>,
}

impl LpPosition {
    fn empty(asset: &str, provider: &str, now: DateTime<Utc>) -> Self {
        Self {
            asset: asset.to_string(),
            provider: provider.to_string(),
            lp_units: 0,
            deposited: 0,
            withdrawn: 0,
            updated_at: now,
        }
    }
}

/// `borrowed / total`, clamped to [0, 1]; zero for an empty pool.
pub fn utilization(borrowed: Amount, total: Amount) -> Decimal {
    if total == 0 {
        return Decimal::ZERO;
    }
    let (Ok(borrowed), Ok(total)) = (to_decimal(borrowed), to_decimal(total)) else {
        return Decimal::ONE;
    };
    (borrowed / total).clamp(Decimal::ZERO, Decimal::ONE)
}

/// Piecewise-linear APY. Non-decreasing in utilization for any validated curve.
pub fn apy_for_utilization(curve: &ApyCurveConfig, utilization: Decimal) -> Decimal {
    let u = utilization.clamp(Decimal::ZERO, Decimal::ONE);
    let kink = curve.kink_utilization;
    if u <= kink {
        curve.base_apy + (curve.apy_at_kink - curve.base_apy) * u / kink
    } else {
        curve.apy_at_kink + (curve.apy_at_max - curve.apy_at_kink) * (u - kink) / (dec!(1) - kink)
    }
}

/// `a + b`, refused when the sum leaves the range pool valuations run in.
fn bounded_add(a: Amount, b: Amount, what: &str) -> Result<Amount, LendingError> {
    let sum = a
        .checked_add(b)
        .ok_or_else(|| LendingError::invalid_amount(format!("{what} overflows")))?;
    to_decimal(sum)?;
    Ok(sum)
}

/// `a * b / c` rounded down, `None` on overflow or `c == 0`.
pub(crate) fn mul_div(a: Amount, b: Amount, c: Amount) -> Option<Amount> {
    if c == 0 {
        return None;
    }
    a.checked_mul(b).map(|product| product / c)
}

// ---------------------------------------------------------------------------
// Supply-side service
// ---------------------------------------------------------------------------

pub struct LiquidityPools {
    ctx: EngineContext,
}

impl LiquidityPools {
    pub fn new(ctx: EngineContext) -> Self {
        Self { ctx }
    }

    /// Supply `amount` to the `asset` pool, creating the pool on first
    /// deposit. Returns the LP units minted to `provider`.
    pub async fn deposit(
        &self,
        asset: &str,
        provider: &str,
        amount: Amount,
        now: DateTime<Utc>,
    ) -> Result<Amount, LendingError> {
        let concurrency = &self.ctx.config.timing.concurrency;
        with_conflict_retry(concurrency, "deposit", move || {
            self.try_deposit(asset, provider, amount, now)
        })
        .await
    }

    async fn try_deposit(
        &self,
        asset: &str,
        provider: &str,
        amount: Amount,
        now: DateTime<Utc>,
    ) -> Result<Amount, LendingError> {
        let mut tx = self.ctx.store.begin().await?;

        let mut pool = pools::fetch_pool(&mut tx, asset)
            .await?
            .unwrap_or_else(|| PoolLedger::new(asset));
        let units = pool.deposit(amount)?;
        pool.refresh_rates(&self.ctx.config.pools.apy_curve);
        pools::save_pool(&mut tx, &mut pool, now).await?;

        let mut position = pools::fetch_lp_position(&mut tx, asset, provider)
            .await?
            .unwrap_or_else(|| LpPosition::empty(asset, provider, now));
        position.lp_units += units;
        position.deposited = position.deposited.saturating_add(amount);
        position.updated_at = now;
        pools::upsert_lp_position(&mut tx, &position).await?;

        tx.commit().await?;

        info!(
            asset,
            provider,
            amount = %amount,
            lp_units = %units,
            total_liquidity = %pool.total_liquidity,
            "liquidity deposited"
        );
        Ok(units)
    }

    /// Redeem `units` of `provider`'s LP position. Returns the amount paid out.
    pub async fn withdraw(
        &self,
        asset: &str,
        provider: &str,
        units: Amount,
        now: DateTime<Utc>,
    ) -> Result<Amount, LendingError> {
        let concurrency = &self.ctx.config.timing.concurrency;
        with_conflict_retry(concurrency, "withdraw", move || {
            self.try_withdraw(asset, provider, units, now)
        })
        .await
    }

    async fn try_withdraw(
        &self,
        asset: &str,
        provider: &str,
        units: Amount,
        now: DateTime<Utc>,
    ) -> Result<Amount, LendingError> {
        let mut tx = self.ctx.store.begin().await?;

        let mut pool = pools::require_pool(&mut tx, asset).await?;
        let mut position = pools::fetch_lp_position(&mut tx, asset, provider)
            .await?
            .unwrap_or_else(|| LpPosition::empty(asset, provider, now));
        if units > position.lp_units {
            return Err(LendingError::invalid_amount(format!(
                "{provider} holds {} LP units, cannot redeem {units}",
                position.lp_units
            )));
        }

        let amount = pool.withdraw(units)?;
        pool.refresh_rates(&self.ctx.config.pools.apy_curve);
        pools::save_pool(&mut tx, &mut pool, now).await?;

        position.lp_units -= units;
        position.withdrawn = position.withdrawn.saturating_add(amount);
        position.updated_at = now;
        pools::upsert_lp_position(&mut tx, &position).await?;

        tx.commit().await?;

        info!(asset, provider, amount = %amount, lp_units = %units, "liquidity withdrawn");
        Ok(amount)
    }

    pub async fn pool(&self, asset: &str) -> Result<PoolLedger, LendingError> {
        self.ctx
            .store
            .pool_ledger(asset)
            .await?
            .ok_or_else(|| LendingError::PoolNotFound {
                asset: asset.to_string(),
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn funded_pool(amount: Amount) -> PoolLedger {
        let mut pool = PoolLedger::new("GROVE-A");
        pool.deposit(amount).unwrap();
        pool
    }

    #[test]
    fn test_reserve_moves_liquidity() {
        let mut pool = funded_pool(10_000);
        pool.reserve(1_000).unwrap();
        assert_eq!(pool.available_liquidity, 9_000);
        assert_eq!(pool.total_borrowed, 1_000);
        assert_eq!(pool.utilization_rate, dec!(0.1));
        assert!(pool.is_balanced());
    }

    #[test]
    fn test_reserve_beyond_available_fails_without_mutation() {
        let mut pool = funded_pool(500);
        let before = pool.clone();
        let err = pool.reserve(501).unwrap_err();
        assert!(matches!(
            err,
            LendingError::InsufficientLiquidity { requested: 501, available: 500, .. }
        ));
        assert_eq!(pool, before);
    }

    #[test]
    fn test_full_repayment_books_interest() {
        let mut pool = funded_pool(10_000);
        pool.reserve(1_000).unwrap();
        pool.release(1_100, 100).unwrap();
        assert_eq!(pool.available_liquidity, 10_100);
        assert_eq!(pool.total_borrowed, 0);
        assert_eq!(pool.total_interest_earned, 100);
        assert_eq!(pool.total_liquidity, 10_100);
        assert!(pool.is_balanced());
    }

    #[test]
    fn test_release_rejects_interest_above_payment() {
        let mut pool = funded_pool(10_000);
        pool.reserve(1_000).unwrap();
        assert!(pool.release(50, 100).is_err());
        assert!(pool.release(2_000, 0).is_err());
    }

    #[test]
    fn test_liquidation_then_recovery() {
        let mut pool = funded_pool(10_000);
        pool.reserve(1_000).unwrap();
        pool.on_liquidation(1_000).unwrap();
        assert_eq!(pool.total_borrowed, 0);
        assert_eq!(pool.available_liquidity, 9_000);
        assert_eq!(pool.total_liquidity, 9_000);
        assert_eq!(pool.total_liquidations, 1);
        assert!(pool.is_balanced());

        pool.credit_recovery(831, 1_000).unwrap();
        assert_eq!(pool.available_liquidity, 9_831);
        assert_eq!(pool.total_interest_earned, 0);
        assert!(pool.is_balanced());
    }

    #[test]
    fn test_recovery_above_principal_counts_as_interest() {
        let mut pool = funded_pool(10_000);
        pool.reserve(1_000).unwrap();
        pool.on_liquidation(1_000).unwrap();
        pool.credit_recovery(1_080, 1_000).unwrap();
        assert_eq!(pool.total_interest_earned, 80);
        assert_eq!(pool.total_liquidity, 10_080);
    }

    #[test]
    fn test_lp_units_appreciate_with_interest() {
        let mut pool = funded_pool(1_000);
        assert_eq!(pool.total_lp_units, 1_000);
        pool.reserve(1_000).unwrap();
        pool.release(1_100, 100).unwrap();

        // 1100 liquidity over 1000 units: a 1100 deposit mints 1000 units.
        let units = pool.deposit(1_100).unwrap();
        assert_eq!(units, 1_000);
        assert_eq!(pool.value_of_units(1_000), 1_100);
    }

    #[test]
    fn test_withdraw_limited_by_available() {
        let mut pool = funded_pool(1_000);
        pool.reserve(800).unwrap();
        let err = pool.withdraw(500).unwrap_err();
        assert!(matches!(err, LendingError::InsufficientLiquidity { .. }));
        assert_eq!(pool.withdraw(200).unwrap(), 200);
        assert_eq!(pool.total_lp_units, 800);
        assert!(pool.is_balanced());
    }

    #[test]
    fn test_withdraw_more_units_than_exist_fails() {
        let mut pool = funded_pool(1_000);
        assert!(pool.withdraw(1_001).is_err());
        assert!(pool.withdraw(0).is_err());
    }

    #[test]
    fn test_oversized_deposit_rejected_without_mutation() {
        let mut pool = funded_pool(1_000);
        let before = pool.clone();
        assert!(matches!(
            pool.deposit(Amount::MAX),
            Err(LendingError::InvalidAmount { .. })
        ));
        // Fits u128 but not the decimal range valuations use.
        assert!(matches!(
            pool.deposit(10u128.pow(30)),
            Err(LendingError::InvalidAmount { .. })
        ));
        assert_eq!(pool, before);
        assert_eq!(pool.deposit(1).unwrap(), 1);
        assert!(pool.is_balanced());
    }

    #[test]
    fn test_recovery_overflow_is_an_error() {
        let mut pool = funded_pool(1_000);
        let before = pool.clone();
        assert!(pool.credit_recovery(Amount::MAX, 0).is_err());
        assert!(pool.release(Amount::MAX, Amount::MAX).is_err());
        assert_eq!(pool, before);
    }

    #[test]
    fn test_zero_deposit_rejected() {
        let mut pool = PoolLedger::new("GROVE-A");
        assert!(matches!(
            pool.deposit(0),
            Err(LendingError::InvalidAmount { .. })
        ));
    }

    // -----------------------------------------------------------------------
    // APY curve
    // -----------------------------------------------------------------------

    #[test]
    fn test_apy_curve_points() {
        let curve = ApyCurveConfig::default();
        assert_eq!(apy_for_utilization(&curve, Decimal::ZERO), dec!(0.02));
        assert_eq!(apy_for_utilization(&curve, dec!(0.8)), dec!(0.08));
        assert_eq!(apy_for_utilization(&curve, Decimal::ONE), dec!(0.30));
        assert_eq!(apy_for_utilization(&curve, dec!(0.4)), dec!(0.05));
        assert_eq!(apy_for_utilization(&curve, dec!(0.9)), dec!(0.19));
    }

    #[test]
    fn test_utilization_of_empty_pool_is_zero() {
        assert_eq!(utilization(0, 0), Decimal::ZERO);
        assert_eq!(utilization(5, 0), Decimal::ZERO);
    }

    #[test]
    fn test_refresh_rates_sets_apy() {
        let mut pool = funded_pool(1_000);
        pool.reserve(800).unwrap();
        pool.refresh_rates(&ApyCurveConfig::default());
        assert_eq!(pool.utilization_rate, dec!(0.8));
        assert_eq!(pool.current_apy, dec!(0.08));
    }

    #[derive(Debug, Clone)]
    enum Op {
        Deposit(Amount),
        Reserve(Amount),
        Repay(Amount),
        Liquidate(Amount),
        Withdraw(Amount),
    }

    fn op_strategy() -> impl Strategy<Value = Op> {
        prop_oneof![
            (1u128..50_000).prop_map(Op::Deposit),
            (1u128..50_000).prop_map(Op::Reserve),
            (1u128..50_000).prop_map(Op::Repay),
            (1u128..50_000).prop_map(Op::Liquidate),
            (1u128..50_000).prop_map(Op::Withdraw),
        ]
    }

    proptest! {
        #[test]
        fn ledger_stays_balanced(ops in proptest::collection::vec(op_strategy(), 1..60)) {
            let curve = ApyCurveConfig::default();
            let mut pool = PoolLedger::new("GROVE-A");
            for op in ops {
                let _ = match op {
                    Op::Deposit(a) => pool.deposit(a).map(|_| ()),
                    Op::Reserve(a) => pool.reserve(a),
                    Op::Repay(a) => {
                        let principal = a.min(pool.total_borrowed);
                        pool.release(principal + principal / 10, principal / 10)
                    }
                    Op::Liquidate(a) => {
                        let principal = a.min(pool.total_borrowed);
                        pool.on_liquidation(principal).and_then(|_| {
                            pool.credit_recovery(principal * 9 / 10, principal)
                        })
                    }
                    Op::Withdraw(u) => pool.withdraw(u).map(|_| ()),
                };
                pool.refresh_rates(&curve);
                prop_assert!(pool.is_balanced(), "unbalanced after op: {:?}", pool);
                prop_assert!(pool.utilization_rate >= Decimal::ZERO);
                prop_assert!(pool.utilization_rate <= Decimal::ONE);
            }
        }

        #[test]
        fn apy_is_non_decreasing(a in 0u32..=10_000, b in 0u32..=10_000) {
            let curve = ApyCurveConfig::default();
            let (lo, hi) = if a <= b { (a, b) } else { (b, a) };
            let u_lo = Decimal::from(lo) / dec!(10000);
            let u_hi = Decimal::from(hi) / dec!(10000);
            prop_assert!(apy_for_utilization(&curve, u_lo) <= apy_for_utilization(&curve, u_hi));
        }
    }
}
