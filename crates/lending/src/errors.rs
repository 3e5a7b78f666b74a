use thiserror::Error;

use crate::types::{Amount, LoanStatus};

/// Typed error hierarchy for the lending engine.
///
/// Validation variants are returned to the caller as-is and never retried.
/// `ConcurrentStateConflict` is the only retryable variant; the binary wraps
/// everything else with `anyhow::Context` for propagation.
#[derive(Error, Debug)]
pub enum LendingError {
    // -- Validation ---------------------------------------------------------
    #[error("invalid amount: {reason}")]
    InvalidAmount { reason: String },

    #[error("invalid loan duration: {days} days (allowed 1..={max_days})")]
    InvalidDuration { days: u32, max_days: u32 },

    #[error("insufficient collateral: value {collateral_value} < required {required_value}")]
    InsufficientCollateral {
        collateral_value: String,
        required_value: String,
    },

    #[error("insufficient liquidity in {asset} pool: requested {requested}, available {available}")]
    InsufficientLiquidity {
        asset: String,
        requested: Amount,
        available: Amount,
    },

    #[error("payment {amount} exceeds remaining balance {remaining}")]
    ExcessPayment { amount: Amount, remaining: Amount },

    // -- Lookup / state -----------------------------------------------------
    #[error("pool not found: {asset}")]
    PoolNotFound { asset: String },

    #[error("loan not found: {loan_id}")]
    LoanNotFound { loan_id: i64 },

    #[error("loan {loan_id} is not active (status: {status})")]
    LoanNotActive { loan_id: i64, status: LoanStatus },

    #[error("loan {loan_id} is not liquidatable: {reason}")]
    LoanNotLiquidatable { loan_id: i64, reason: String },

    #[error("collateral for loan {loan_id} was already released")]
    CollateralAlreadyReleased { loan_id: i64 },

    // -- Collaborators ------------------------------------------------------
    #[error("price unavailable for {asset}: {reason}")]
    PriceUnavailable { asset: String, reason: String },

    #[error("settlement failed: {reason}")]
    SettlementFailed { reason: String },

    // -- Concurrency --------------------------------------------------------
    #[error("concurrent state conflict on {entity}")]
    ConcurrentStateConflict { entity: String },

    // -- Storage ------------------------------------------------------------
    #[error("corrupt record in {table}.{column}: {value}")]
    CorruptRecord {
        table: &'static str,
        column: &'static str,
        value: String,
    },

    #[error(transparent)]
    Sqlx(sqlx::Error),

    #[error(transparent)]
    Migrate(#[from] sqlx::migrate::MigrateError),
}

impl LendingError {
    /// Whether the operation may succeed if retried from scratch.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::ConcurrentStateConflict { .. })
    }

    pub fn invalid_amount(reason: impl Into<String>) -> Self {
        Self::InvalidAmount {
            reason: reason.into(),
        }
    }
}

/// SQLite result codes for a locked database (`SQLITE_BUSY`, `SQLITE_BUSY_SNAPSHOT`).
const SQLITE_BUSY_CODES: [&str; 2] = ["5", "517"];

impl From<sqlx::Error> for LendingError {
    fn from(err: sqlx::Error) -> Self {
        let busy = err
            .as_database_error()
            .and_then(|db| db.code())
            .is_some_and(|code| SQLITE_BUSY_CODES.iter().any(|busy| *busy == code));
        if busy {
            Self::ConcurrentStateConflict {
                entity: "database".into(),
            }
        } else {
            Self::Sqlx(err)
        }
    }
}
