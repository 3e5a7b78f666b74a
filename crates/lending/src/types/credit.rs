use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Repayment timing relative to the due date.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CreditTiming {
    Early,
    OnTime,
    Late,
}

impl CreditTiming {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Early => "early",
            Self::OnTime => "on_time",
            Self::Late => "late",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "early" => Some(Self::Early),
            "on_time" => Some(Self::OnTime),
            "late" => Some(Self::Late),
            _ => None,
        }
    }
}

/// Timing category computed when a loan is fully repaid.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreditCategory {
    pub category: CreditTiming,
    /// Whole days between due date and repayment; negative when early.
    pub days_offset: i64,
    /// Days counted against the borrower. Halved by off-season leniency.
    #[serde(with = "rust_decimal::serde::str")]
    pub penalty_days: Decimal,
    pub loan_duration_days: i64,
    pub seasonally_adjusted: bool,
}

/// Aggregate repayment history for one borrower.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreditProfile {
    pub borrower: String,
    pub early: u32,
    pub on_time: u32,
    pub late: u32,
    #[serde(with = "rust_decimal::serde::str")]
    pub total_penalty_days: Decimal,
}

impl CreditProfile {
    pub fn total(&self) -> u32 {
        self.early + self.on_time + self.late
    }

    /// Share of repayments that were not late. Zero with no history.
    pub fn punctual_share(&self) -> Decimal {
        let total = self.total();
        if total == 0 {
            return Decimal::ZERO;
        }
        Decimal::from(self.early + self.on_time) / Decimal::from(total)
    }
}
