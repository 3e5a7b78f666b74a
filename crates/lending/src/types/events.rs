use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::{Amount, CreditTiming, HealthTier, LoanId};

/// Typed events for the notification sink. Delivery is the receiver's concern.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum LendingEvent {
    LoanOriginated {
        loan_id: LoanId,
        borrower: String,
        asset: String,
        principal: Amount,
    },
    RepaymentReceived {
        loan_id: LoanId,
        amount: Amount,
        remaining_balance: Amount,
    },
    LoanRepaid {
        loan_id: LoanId,
        borrower: String,
        timing: CreditTiming,
    },
    HealthTierChanged {
        loan_id: LoanId,
        borrower: String,
        from: HealthTier,
        to: HealthTier,
        #[serde(with = "rust_decimal::serde::str")]
        health_factor: Decimal,
    },
    LoanLiquidated {
        loan_id: LoanId,
        borrower: String,
        liquidator: String,
        #[serde(with = "rust_decimal::serde::str")]
        health_factor: Decimal,
        usdc_recovered: Amount,
    },
}

impl LendingEvent {
    pub fn loan_id(&self) -> LoanId {
        match self {
            Self::LoanOriginated { loan_id, .. }
            | Self::RepaymentReceived { loan_id, .. }
            | Self::LoanRepaid { loan_id, .. }
            | Self::HealthTierChanged { loan_id, .. }
            | Self::LoanLiquidated { loan_id, .. } => *loan_id,
        }
    }
}
