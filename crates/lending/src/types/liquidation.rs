use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::{Amount, LoanId};

/// Immutable record of a forced closure. Exactly one per liquidated loan.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LiquidationRecord {
    pub loan_id: LoanId,
    pub liquidator: String,
    #[serde(with = "rust_decimal::serde::str")]
    pub collateral_value_at_liquidation: Decimal,
    /// `collateral_value * (1 - penalty)`, rounded down.
    pub usdc_recovered: Amount,
    /// Penalty rate applied, e.g. 0.05.
    #[serde(with = "rust_decimal::serde::str")]
    pub liquidation_penalty: Decimal,
    pub penalty_amount: Amount,
    #[serde(with = "rust_decimal::serde::str")]
    pub liquidation_price: Decimal,
    #[serde(with = "rust_decimal::serde::str")]
    pub health_factor_at_liquidation: Decimal,
    pub liquidator_reward: Option<Amount>,
    /// Recovery in excess of the outstanding debt, owed back to the borrower.
    pub borrower_surplus: Amount,
    pub settlement_ref: Option<String>,
    pub liquidated_at: DateTime<Utc>,
}
