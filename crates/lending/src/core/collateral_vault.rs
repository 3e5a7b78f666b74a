//! Locked collateral per loan.
//!
//! One lock per loan, released exactly once: on full repayment or on
//! liquidation, never both. The store keys locks by `loan_id` and only ever
//! updates `unlocked_at` through [`CollateralLock::release`].

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::errors::LendingError;
use crate::types::amount::to_decimal;
use crate::types::{Amount, LoanId};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CollateralLock {
    /// Back-reference to the owning loan.
    pub loan_id: LoanId,
    pub token: String,
    pub amount: Amount,
    #[serde(with = "rust_decimal::serde::str")]
    pub initial_price: Decimal,
    #[serde(with = "rust_decimal::serde::str_option")]
    pub current_price: Option<Decimal>,
    pub locked_at: DateTime<Utc>,
    pub unlocked_at: Option<DateTime<Utc>>,
}

impl CollateralLock {
    /// Lock `amount` of `token` for `loan_id` at the origination price.
    pub fn lock(
        loan_id: LoanId,
        token: &str,
        amount: Amount,
        price: Decimal,
        now: DateTime<Utc>,
    ) -> Result<Self, LendingError> {
        if amount == 0 {
            return Err(LendingError::invalid_amount("collateral must be positive"));
        }
        Ok(Self {
            loan_id,
            token: token.to_string(),
            amount,
            initial_price: price,
            current_price: Some(price),
            locked_at: now,
            unlocked_at: None,
        })
    }

    pub fn is_locked(&self) -> bool {
        self.unlocked_at.is_none()
    }

    /// Record the latest observed price for the locked token.
    pub fn mark_price(&mut self, price: Decimal) {
        self.current_price = Some(price);
    }

    /// Value of the locked amount at `price`.
    pub fn value_at(&self, price: Decimal) -> Result<Decimal, LendingError> {
        Ok(to_decimal(self.amount)? * price)
    }

    /// Unlock the collateral. Fails if it was already released.
    pub fn release(&mut self, now: DateTime<Utc>) -> Result<(), LendingError> {
        if self.unlocked_at.is_some() {
            return Err(LendingError::CollateralAlreadyReleased {
                loan_id: self.loan_id,
            });
        }
        self.unlocked_at = Some(now);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use rust_decimal_macros::dec;

    fn at(hour: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 1, hour, 0, 0).unwrap()
    }

    #[test]
    fn test_lock_then_release_once() {
        let mut lock = CollateralLock::lock(1, "GROVE-A", 1_250, dec!(1.0), at(9)).unwrap();
        assert!(lock.is_locked());
        lock.release(at(10)).unwrap();
        assert_eq!(lock.unlocked_at, Some(at(10)));

        let err = lock.release(at(11)).unwrap_err();
        assert!(matches!(err, LendingError::CollateralAlreadyReleased { loan_id: 1 }));
        assert_eq!(lock.unlocked_at, Some(at(10)));
    }

    #[test]
    fn test_zero_collateral_rejected() {
        assert!(CollateralLock::lock(1, "GROVE-A", 0, dec!(1.0), at(9)).is_err());
    }

    #[test]
    fn test_value_tracks_marked_price() {
        let mut lock = CollateralLock::lock(1, "GROVE-A", 1_250, dec!(1.0), at(9)).unwrap();
        assert_eq!(lock.value_at(lock.initial_price).unwrap(), dec!(1250));
        lock.mark_price(dec!(0.70));
        assert_eq!(lock.current_price, Some(dec!(0.70)));
        assert_eq!(lock.value_at(dec!(0.70)).unwrap(), dec!(875));
    }
}
