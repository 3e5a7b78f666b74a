use std::fmt;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::Amount;

pub type LoanId = i64;

/// Loan lifecycle. Transitions only `Active -> Repaid` or `Active -> Liquidated`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LoanStatus {
    Active,
    Repaid,
    Liquidated,
    /// Written off by the surrounding system; this engine never sets it.
    Defaulted,
}

impl LoanStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Repaid => "repaid",
            Self::Liquidated => "liquidated",
            Self::Defaulted => "defaulted",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "active" => Some(Self::Active),
            "repaid" => Some(Self::Repaid),
            "liquidated" => Some(Self::Liquidated),
            "defaulted" => Some(Self::Defaulted),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Active)
    }
}

impl fmt::Display for LoanStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Borrower request handed to the loan originator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoanRequest {
    pub borrower: String,
    pub principal: Amount,
    pub collateral_asset: String,
    pub collateral_amount: Amount,
    /// Overrides the seasonal recommendation when set.
    #[serde(default)]
    pub duration_days: Option<u32>,
}

/// A loan against locked grove-token collateral.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Loan {
    pub id: LoanId,
    pub borrower: String,
    pub principal: Amount,
    pub collateral_amount: Amount,
    pub collateral_asset: String,
    #[serde(with = "rust_decimal::serde::str")]
    pub interest_rate: Decimal,
    #[serde(with = "rust_decimal::serde::str")]
    pub collateralization_ratio: Decimal,
    #[serde(with = "rust_decimal::serde::str")]
    pub liquidation_threshold: Decimal,
    /// Derived; written only by origination and the health monitor.
    #[serde(with = "rust_decimal::serde::str")]
    pub health_factor: Decimal,
    #[serde(with = "rust_decimal::serde::str")]
    pub price_at_origination: Decimal,
    /// `principal * (1 + interest_rate)`, rounded up to the minor unit.
    pub repayment_amount: Amount,
    pub amount_repaid: Amount,
    pub principal_repaid: Amount,
    pub status: LoanStatus,
    pub taken_at: DateTime<Utc>,
    pub due_date: DateTime<Utc>,
    pub repaid_at: Option<DateTime<Utc>>,
    pub liquidated_at: Option<DateTime<Utc>>,
    pub disbursement_ref: Option<String>,
    /// Optimistic-lock counter, bumped on every persisted change.
    pub version: i64,
}

impl Loan {
    /// Repayment obligation still owed (principal + interest - repaid).
    pub fn remaining_balance(&self) -> Amount {
        self.repayment_amount.saturating_sub(self.amount_repaid)
    }

    pub fn outstanding_principal(&self) -> Amount {
        self.principal.saturating_sub(self.principal_repaid)
    }

    pub fn total_interest(&self) -> Amount {
        self.repayment_amount.saturating_sub(self.principal)
    }

    pub fn is_active(&self) -> bool {
        self.status == LoanStatus::Active
    }
}
