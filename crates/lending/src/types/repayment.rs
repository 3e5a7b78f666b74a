use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{Amount, CreditCategory, Loan, LoanId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentType {
    Partial,
    Full,
    InterestOnly,
    Principal,
}

impl PaymentType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Partial => "partial",
            Self::Full => "full",
            Self::InterestOnly => "interest_only",
            Self::Principal => "principal",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "partial" => Some(Self::Partial),
            "full" => Some(Self::Full),
            "interest_only" => Some(Self::InterestOnly),
            "principal" => Some(Self::Principal),
            _ => None,
        }
    }
}

/// Append-only repayment ledger entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RepaymentEvent {
    pub id: i64,
    pub loan_id: LoanId,
    pub payment_amount: Amount,
    pub principal_portion: Amount,
    pub interest_portion: Amount,
    pub payment_type: PaymentType,
    pub remaining_balance: Amount,
    pub settlement_ref: Option<String>,
    pub paid_at: DateTime<Utc>,
}

/// What a repayment call produced.
#[derive(Debug, Clone)]
pub struct RepaymentOutcome {
    pub event: RepaymentEvent,
    pub loan: Loan,
    /// Present once the loan reached `Repaid`.
    pub credit: Option<CreditCategory>,
}
