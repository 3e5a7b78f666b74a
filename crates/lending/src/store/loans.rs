use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqliteConnection};

use super::{coded, parsed, parsed_opt, timestamp, timestamp_opt};
use crate::core::collateral_vault::CollateralLock;
use crate::errors::LendingError;
use crate::types::{Loan, LoanId, LoanStatus};

const LOANS: &str = "loans";
const LOCKS: &str = "collateral_locks";

/// Insert a new loan and return its id. `loan.id` and `loan.version` are
/// ignored; the row starts at version 1.
pub async fn insert_loan(conn: &mut SqliteConnection, loan: &Loan) -> Result<LoanId, LendingError> {
    let result = sqlx::query(
        "INSERT INTO loans (borrower, principal, collateral_amount, collateral_asset, \
         interest_rate, collateralization_ratio, liquidation_threshold, health_factor, \
         price_at_origination, repayment_amount, amount_repaid, principal_repaid, status, \
         taken_at, due_date, repaid_at, liquidated_at, disbursement_ref, version) \
         VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, 1)",
    )
    .bind(&loan.borrower)
    .bind(loan.principal.to_string())
    .bind(loan.collateral_amount.to_string())
    .bind(&loan.collateral_asset)
    .bind(loan.interest_rate.to_string())
    .bind(loan.collateralization_ratio.to_string())
    .bind(loan.liquidation_threshold.to_string())
    .bind(loan.health_factor.to_string())
    .bind(loan.price_at_origination.to_string())
    .bind(loan.repayment_amount.to_string())
    .bind(loan.amount_repaid.to_string())
    .bind(loan.principal_repaid.to_string())
    .bind(loan.status.as_str())
    .bind(loan.taken_at.timestamp())
    .bind(loan.due_date.timestamp())
    .bind(loan.repaid_at.map(|t| t.timestamp()))
    .bind(loan.liquidated_at.map(|t| t.timestamp()))
    .bind(&loan.disbursement_ref)
    .execute(&mut *conn)
    .await?;
    Ok(result.last_insert_rowid())
}

pub async fn fetch_loan(
    conn: &mut SqliteConnection,
    loan_id: LoanId,
) -> Result<Option<Loan>, LendingError> {
    let row = sqlx::query("SELECT * FROM loans WHERE id = ?")
        .bind(loan_id)
        .fetch_optional(&mut *conn)
        .await?;
    row.as_ref().map(loan_from_row).transpose()
}

pub async fn require_loan(
    conn: &mut SqliteConnection,
    loan_id: LoanId,
) -> Result<Loan, LendingError> {
    fetch_loan(conn, loan_id)
        .await?
        .ok_or(LendingError::LoanNotFound { loan_id })
}

/// Write back every mutable loan column.
///
/// Conditional on the row still holding `expected_status` at the version
/// read in this transaction. Bumps `loan.version` on success.
pub async fn update_loan(
    conn: &mut SqliteConnection,
    loan: &mut Loan,
    expected_status: LoanStatus,
) -> Result<(), LendingError> {
    let next_version = loan.version + 1;
    let result = sqlx::query(
        "UPDATE loans SET health_factor = ?, amount_repaid = ?, principal_repaid = ?, \
         status = ?, repaid_at = ?, liquidated_at = ?, disbursement_ref = ?, version = ? \
         WHERE id = ? AND version = ? AND status = ?",
    )
    .bind(loan.health_factor.to_string())
    .bind(loan.amount_repaid.to_string())
    .bind(loan.principal_repaid.to_string())
    .bind(loan.status.as_str())
    .bind(loan.repaid_at.map(|t| t.timestamp()))
    .bind(loan.liquidated_at.map(|t| t.timestamp()))
    .bind(&loan.disbursement_ref)
    .bind(next_version)
    .bind(loan.id)
    .bind(loan.version)
    .bind(expected_status.as_str())
    .execute(&mut *conn)
    .await?;

    if result.rows_affected() != 1 {
        return Err(LendingError::ConcurrentStateConflict {
            entity: format!("loan {}", loan.id),
        });
    }
    loan.version = next_version;
    Ok(())
}

/// Active loans, oldest first, optionally restricted to one collateral asset.
pub async fn active_loans(
    conn: &mut SqliteConnection,
    asset: Option<&str>,
) -> Result<Vec<Loan>, LendingError> {
    let rows = match asset {
        Some(asset) => {
            sqlx::query(
                "SELECT * FROM loans WHERE status = 'active' AND collateral_asset = ? ORDER BY id",
            )
            .bind(asset)
            .fetch_all(&mut *conn)
            .await?
        }
        None => {
            sqlx::query("SELECT * FROM loans WHERE status = 'active' ORDER BY id")
                .fetch_all(&mut *conn)
                .await?
        }
    };
    rows.iter().map(loan_from_row).collect()
}

fn loan_from_row(row: &SqliteRow) -> Result<Loan, LendingError> {
    Ok(Loan {
        id: row.try_get("id")?,
        borrower: row.try_get("borrower")?,
        principal: parsed(row, LOANS, "principal")?,
        collateral_amount: parsed(row, LOANS, "collateral_amount")?,
        collateral_asset: row.try_get("collateral_asset")?,
        interest_rate: parsed(row, LOANS, "interest_rate")?,
        collateralization_ratio: parsed(row, LOANS, "collateralization_ratio")?,
        liquidation_threshold: parsed(row, LOANS, "liquidation_threshold")?,
        health_factor: parsed(row, LOANS, "health_factor")?,
        price_at_origination: parsed(row, LOANS, "price_at_origination")?,
        repayment_amount: parsed(row, LOANS, "repayment_amount")?,
        amount_repaid: parsed(row, LOANS, "amount_repaid")?,
        principal_repaid: parsed(row, LOANS, "principal_repaid")?,
        status: coded(row, LOANS, "status", LoanStatus::parse)?,
        taken_at: timestamp(row, LOANS, "taken_at")?,
        due_date: timestamp(row, LOANS, "due_date")?,
        repaid_at: timestamp_opt(row, LOANS, "repaid_at")?,
        liquidated_at: timestamp_opt(row, LOANS, "liquidated_at")?,
        disbursement_ref: row.try_get("disbursement_ref")?,
        version: row.try_get("version")?,
    })
}

// ---------------------------------------------------------------------------
// Collateral locks
// ---------------------------------------------------------------------------

pub async fn insert_lock(
    conn: &mut SqliteConnection,
    lock: &CollateralLock,
) -> Result<(), LendingError> {
    sqlx::query(
        "INSERT INTO collateral_locks \
         (loan_id, token, amount, initial_price, current_price, locked_at, unlocked_at) \
         VALUES (?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(lock.loan_id)
    .bind(&lock.token)
    .bind(lock.amount.to_string())
    .bind(lock.initial_price.to_string())
    .bind(lock.current_price.map(|p| p.to_string()))
    .bind(lock.locked_at.timestamp())
    .bind(lock.unlocked_at.map(|t| t.timestamp()))
    .execute(&mut *conn)
    .await?;
    Ok(())
}

pub async fn fetch_lock(
    conn: &mut SqliteConnection,
    loan_id: LoanId,
) -> Result<Option<CollateralLock>, LendingError> {
    let row = sqlx::query("SELECT * FROM collateral_locks WHERE loan_id = ?")
        .bind(loan_id)
        .fetch_optional(&mut *conn)
        .await?;
    row.as_ref().map(lock_from_row).transpose()
}

pub async fn require_lock(
    conn: &mut SqliteConnection,
    loan_id: LoanId,
) -> Result<CollateralLock, LendingError> {
    fetch_lock(conn, loan_id).await?.ok_or(LendingError::CorruptRecord {
        table: LOCKS,
        column: "loan_id",
        value: format!("no lock for loan {loan_id}"),
    })
}

/// Persist a lock's price mark and release time.
///
/// A release only lands on a row that is still locked, so a lock can never
/// be unlocked twice even by a stale in-memory copy.
pub async fn update_lock(
    conn: &mut SqliteConnection,
    lock: &CollateralLock,
) -> Result<(), LendingError> {
    let result = sqlx::query(
        "UPDATE collateral_locks SET current_price = ?, unlocked_at = ? \
         WHERE loan_id = ? AND unlocked_at IS NULL",
    )
    .bind(lock.current_price.map(|p| p.to_string()))
    .bind(lock.unlocked_at.map(|t| t.timestamp()))
    .bind(lock.loan_id)
    .execute(&mut *conn)
    .await?;

    if result.rows_affected() != 1 {
        return Err(LendingError::CollateralAlreadyReleased {
            loan_id: lock.loan_id,
        });
    }
    Ok(())
}

fn lock_from_row(row: &SqliteRow) -> Result<CollateralLock, LendingError> {
    Ok(CollateralLock {
        loan_id: row.try_get("loan_id")?,
        token: row.try_get("token")?,
        amount: parsed(row, LOCKS, "amount")?,
        initial_price: parsed(row, LOCKS, "initial_price")?,
        current_price: parsed_opt(row, LOCKS, "current_price")?,
        locked_at: timestamp(row, LOCKS, "locked_at")?,
        unlocked_at: timestamp_opt(row, LOCKS, "unlocked_at")?,
    })
}
