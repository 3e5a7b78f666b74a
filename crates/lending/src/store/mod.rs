//! SQLite persistence for pools, loans, collateral locks and audit records.
//!
//! Uses `sqlx::query()` runtime queries (not compile-time `query!` macros)
//! since the schema is created via `sqlx::migrate!`. Amounts and decimals
//! are stored as TEXT, timestamps as unix seconds.
//!
//! Every state transition runs inside one transaction obtained from
//! [`Store::begin`]: re-read, mutate in memory, write back with
//! version-conditional updates, then commit. The pool has a single
//! connection, so transactions never interleave.

pub mod loans;
pub mod pools;
pub mod records;

use std::str::FromStr;

use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqlitePoolOptions, SqliteRow};
use sqlx::{Row, Sqlite, SqlitePool, Transaction};
use tracing::info;

use crate::core::collateral_vault::CollateralLock;
use crate::core::pool_ledger::{LpPosition, PoolLedger};
use crate::errors::LendingError;
use crate::types::{
    CreditCategory, HealthSample, LiquidationRecord, Loan, LoanId, RepaymentEvent,
};

pub struct Store {
    pool: SqlitePool,
}

impl Store {
    /// Open (creating if needed) the database at `db_path` and migrate it.
    ///
    /// `:memory:` gives a private in-memory database.
    pub async fn connect(db_path: &str) -> Result<Self, LendingError> {
        if db_path == ":memory:" {
            return Self::connect_in_memory().await;
        }
        let pool = SqlitePoolOptions::new()
            .max_connections(1) // SQLite is single-writer
            .connect(&format!("sqlite:{db_path}?mode=rwc"))
            .await?;
        Self::migrate(pool, db_path).await
    }

    /// In-memory database. The single connection is never recycled, since
    /// closing it would drop the data.
    pub async fn connect_in_memory() -> Result<Self, LendingError> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect("sqlite::memory:")
            .await?;
        Self::migrate(pool, ":memory:").await
    }

    async fn migrate(pool: SqlitePool, db_path: &str) -> Result<Self, LendingError> {
        sqlx::migrate!("../../migrations").run(&pool).await?;
        info!(db_path, "lending store initialized");
        Ok(Self { pool })
    }

    /// Start the transaction that one engine operation runs in.
    ///
    /// Dropping the transaction without committing rolls it back.
    pub async fn begin(&self) -> Result<Transaction<'static, Sqlite>, LendingError> {
        Ok(self.pool.begin().await?)
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }

    // -----------------------------------------------------------------------
    // Read-only queries
    // -----------------------------------------------------------------------

    pub async fn pool_ledger(&self, asset: &str) -> Result<Option<PoolLedger>, LendingError> {
        let mut conn = self.pool.acquire().await?;
        pools::fetch_pool(&mut conn, asset).await
    }

    pub async fn lp_position(
        &self,
        asset: &str,
        provider: &str,
    ) -> Result<Option<LpPosition>, LendingError> {
        let mut conn = self.pool.acquire().await?;
        pools::fetch_lp_position(&mut conn, asset, provider).await
    }

    pub async fn loan(&self, loan_id: LoanId) -> Result<Option<Loan>, LendingError> {
        let mut conn = self.pool.acquire().await?;
        loans::fetch_loan(&mut conn, loan_id).await
    }

    pub async fn active_loans(&self) -> Result<Vec<Loan>, LendingError> {
        let mut conn = self.pool.acquire().await?;
        loans::active_loans(&mut conn, None).await
    }

    pub async fn active_loans_for_asset(&self, asset: &str) -> Result<Vec<Loan>, LendingError> {
        let mut conn = self.pool.acquire().await?;
        loans::active_loans(&mut conn, Some(asset)).await
    }

    pub async fn collateral_lock(
        &self,
        loan_id: LoanId,
    ) -> Result<Option<CollateralLock>, LendingError> {
        let mut conn = self.pool.acquire().await?;
        loans::fetch_lock(&mut conn, loan_id).await
    }

    pub async fn liquidation(
        &self,
        loan_id: LoanId,
    ) -> Result<Option<LiquidationRecord>, LendingError> {
        let mut conn = self.pool.acquire().await?;
        records::fetch_liquidation(&mut conn, loan_id).await
    }

    pub async fn liquidation_count(&self, loan_id: LoanId) -> Result<i64, LendingError> {
        let mut conn = self.pool.acquire().await?;
        records::liquidation_count(&mut conn, loan_id).await
    }

    pub async fn repayments(&self, loan_id: LoanId) -> Result<Vec<RepaymentEvent>, LendingError> {
        let mut conn = self.pool.acquire().await?;
        records::repayments_for_loan(&mut conn, loan_id).await
    }

    pub async fn health_history(&self, loan_id: LoanId) -> Result<Vec<HealthSample>, LendingError> {
        let mut conn = self.pool.acquire().await?;
        records::health_history(&mut conn, loan_id).await
    }

    pub async fn credit_categories_for_borrower(
        &self,
        borrower: &str,
    ) -> Result<Vec<CreditCategory>, LendingError> {
        let mut conn = self.pool.acquire().await?;
        records::credit_categories_for_borrower(&mut conn, borrower).await
    }
}

// ---------------------------------------------------------------------------
// Column decoding
// ---------------------------------------------------------------------------

fn corrupt(table: &'static str, column: &'static str, value: impl ToString) -> LendingError {
    LendingError::CorruptRecord {
        table,
        column,
        value: value.to_string(),
    }
}

/// Parse a TEXT column holding an amount or decimal.
pub(crate) fn parsed<T: FromStr>(
    row: &SqliteRow,
    table: &'static str,
    column: &'static str,
) -> Result<T, LendingError> {
    let raw: String = row.try_get(column)?;
    match raw.parse() {
        Ok(value) => Ok(value),
        Err(_) => Err(corrupt(table, column, raw)),
    }
}

pub(crate) fn parsed_opt<T: FromStr>(
    row: &SqliteRow,
    table: &'static str,
    column: &'static str,
) -> Result<Option<T>, LendingError> {
    let raw: Option<String> = row.try_get(column)?;
    match raw {
        None => Ok(None),
        Some(raw) => match raw.parse() {
            Ok(value) => Ok(Some(value)),
            Err(_) => Err(corrupt(table, column, raw)),
        },
    }
}

pub(crate) fn timestamp(
    row: &SqliteRow,
    table: &'static str,
    column: &'static str,
) -> Result<DateTime<Utc>, LendingError> {
    let secs: i64 = row.try_get(column)?;
    DateTime::from_timestamp(secs, 0).ok_or_else(|| corrupt(table, column, secs))
}

pub(crate) fn timestamp_opt(
    row: &SqliteRow,
    table: &'static str,
    column: &'static str,
) -> Result<Option<DateTime<Utc>>, LendingError> {
    let secs: Option<i64> = row.try_get(column)?;
    secs.map(|s| DateTime::from_timestamp(s, 0).ok_or_else(|| corrupt(table, column, s)))
        .transpose()
}

/// Decode a string-coded enum column with its `parse` function.
pub(crate) fn coded<T>(
    row: &SqliteRow,
    table: &'static str,
    column: &'static str,
    parse: fn(&str) -> Option<T>,
) -> Result<T, LendingError> {
    let raw: String = row.try_get(column)?;
    parse(&raw).ok_or_else(|| corrupt(table, column, raw))
}
