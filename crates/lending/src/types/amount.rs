//! Conversions between integer minor-unit amounts and `Decimal` valuations.
//!
//! Rounding is always explicit: values owed to the pool round up, values paid
//! out of collateral round down.

use rust_decimal::prelude::{FromPrimitive, ToPrimitive};
use rust_decimal::Decimal;

use crate::errors::LendingError;

/// Monetary amounts and token quantities, in minor units.
pub type Amount = u128;

/// Exact `Decimal` for an amount. Fails above `Decimal::MAX` (~7.9e28).
pub fn to_decimal(amount: Amount) -> Result<Decimal, LendingError> {
    Decimal::from_u128(amount)
        .ok_or_else(|| LendingError::invalid_amount(format!("{amount} exceeds decimal range")))
}

/// Round a non-negative value down to whole minor units.
pub fn floor_amount(value: Decimal) -> Result<Amount, LendingError> {
    value
        .floor()
        .to_u128()
        .ok_or_else(|| LendingError::invalid_amount(format!("{value} is not a valid amount")))
}

/// Round a non-negative value up to whole minor units.
pub fn ceil_amount(value: Decimal) -> Result<Amount, LendingError> {
    value
        .ceil()
        .to_u128()
        .ok_or_else(|| LendingError::invalid_amount(format!("{value} is not a valid amount")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_rounding_direction() {
        assert_eq!(floor_amount(dec!(831.25)).unwrap(), 831);
        assert_eq!(ceil_amount(dec!(831.25)).unwrap(), 832);
        assert_eq!(ceil_amount(dec!(1100.0)).unwrap(), 1100);
    }

    #[test]
    fn test_negative_values_rejected() {
        assert!(floor_amount(dec!(-1)).is_err());
        assert!(floor_amount(dec!(-0.5)).is_err());
    }

    #[test]
    fn test_to_decimal_range() {
        assert_eq!(to_decimal(1_250).unwrap(), dec!(1250));
        assert!(to_decimal(u128::MAX).is_err());
    }
}
