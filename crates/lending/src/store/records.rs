//! Append-only audit tables: liquidations, repayments, health samples and
//! credit events.

use chrono::{DateTime, Utc};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqliteConnection};

use super::{coded, parsed, parsed_opt, timestamp};
use crate::errors::LendingError;
use crate::types::{
    CreditCategory, CreditTiming, HealthSample, HealthTier, LiquidationRecord, LoanId,
    PaymentType, RepaymentEvent,
};

const LIQUIDATIONS: &str = "liquidations";
const REPAYMENTS: &str = "repayment_events";
const HEALTH: &str = "loan_health_history";
const CREDIT: &str = "credit_events";

// ---------------------------------------------------------------------------
// Liquidations
// ---------------------------------------------------------------------------

/// Insert the liquidation record. The unique `loan_id` constraint turns a
/// second record for the same loan into `LoanNotLiquidatable`.
pub async fn insert_liquidation(
    conn: &mut SqliteConnection,
    record: &LiquidationRecord,
) -> Result<(), LendingError> {
    let result = sqlx::query(
        "INSERT INTO liquidations (loan_id, liquidator, collateral_value_at_liquidation, \
         usdc_recovered, liquidation_penalty, penalty_amount, liquidation_price, \
         health_factor_at_liquidation, liquidator_reward, borrower_surplus, settlement_ref, \
         liquidated_at) \
         VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(record.loan_id)
    .bind(&record.liquidator)
    .bind(record.collateral_value_at_liquidation.to_string())
    .bind(record.usdc_recovered.to_string())
    .bind(record.liquidation_penalty.to_string())
    .bind(record.penalty_amount.to_string())
    .bind(record.liquidation_price.to_string())
    .bind(record.health_factor_at_liquidation.to_string())
    .bind(record.liquidator_reward.map(|r| r.to_string()))
    .bind(record.borrower_surplus.to_string())
    .bind(&record.settlement_ref)
    .bind(record.liquidated_at.timestamp())
    .execute(&mut *conn)
    .await;

    match result {
        Ok(_) => Ok(()),
        Err(sqlx::Error::Database(db)) if db.is_unique_violation() => {
            Err(LendingError::LoanNotLiquidatable {
                loan_id: record.loan_id,
                reason: "already liquidated".into(),
            })
        }
        Err(e) => Err(e.into()),
    }
}

pub async fn fetch_liquidation(
    conn: &mut SqliteConnection,
    loan_id: LoanId,
) -> Result<Option<LiquidationRecord>, LendingError> {
    let row = sqlx::query("SELECT * FROM liquidations WHERE loan_id = ?")
        .bind(loan_id)
        .fetch_optional(&mut *conn)
        .await?;
    row.as_ref().map(liquidation_from_row).transpose()
}

pub async fn liquidation_count(
    conn: &mut SqliteConnection,
    loan_id: LoanId,
) -> Result<i64, LendingError> {
    let row = sqlx::query("SELECT COUNT(*) AS n FROM liquidations WHERE loan_id = ?")
        .bind(loan_id)
        .fetch_one(&mut *conn)
        .await?;
    Ok(row.try_get("n")?)
}

fn liquidation_from_row(row: &SqliteRow) -> Result<LiquidationRecord, LendingError> {
    Ok(LiquidationRecord {
        loan_id: row.try_get("loan_id")?,
        liquidator: row.try_get("liquidator")?,
        collateral_value_at_liquidation: parsed(row, LIQUIDATIONS, "collateral_value_at_liquidation")?,
        usdc_recovered: parsed(row, LIQUIDATIONS, "usdc_recovered")?,
        liquidation_penalty: parsed(row, LIQUIDATIONS, "liquidation_penalty")?,
        penalty_amount: parsed(row, LIQUIDATIONS, "penalty_amount")?,
        liquidation_price: parsed(row, LIQUIDATIONS, "liquidation_price")?,
        health_factor_at_liquidation: parsed(row, LIQUIDATIONS, "health_factor_at_liquidation")?,
        liquidator_reward: parsed_opt(row, LIQUIDATIONS, "liquidator_reward")?,
        borrower_surplus: parsed(row, LIQUIDATIONS, "borrower_surplus")?,
        settlement_ref: row.try_get("settlement_ref")?,
        liquidated_at: timestamp(row, LIQUIDATIONS, "liquidated_at")?,
    })
}

// ---------------------------------------------------------------------------
// Repayments
// ---------------------------------------------------------------------------

/// Append a repayment event and return its id.
pub async fn insert_repayment(
    conn: &mut SqliteConnection,
    event: &RepaymentEvent,
) -> Result<i64, LendingError> {
    let result = sqlx::query(
        "INSERT INTO repayment_events (loan_id, payment_amount, principal_portion, \
         interest_portion, payment_type, remaining_balance, settlement_ref, paid_at) \
         VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(event.loan_id)
    .bind(event.payment_amount.to_string())
    .bind(event.principal_portion.to_string())
    .bind(event.interest_portion.to_string())
    .bind(event.payment_type.as_str())
    .bind(event.remaining_balance.to_string())
    .bind(&event.settlement_ref)
    .bind(event.paid_at.timestamp())
    .execute(&mut *conn)
    .await?;
    Ok(result.last_insert_rowid())
}

pub async fn repayments_for_loan(
    conn: &mut SqliteConnection,
    loan_id: LoanId,
) -> Result<Vec<RepaymentEvent>, LendingError> {
    let rows = sqlx::query("SELECT * FROM repayment_events WHERE loan_id = ? ORDER BY id")
        .bind(loan_id)
        .fetch_all(&mut *conn)
        .await?;
    rows.iter().map(repayment_from_row).collect()
}

fn repayment_from_row(row: &SqliteRow) -> Result<RepaymentEvent, LendingError> {
    Ok(RepaymentEvent {
        id: row.try_get("id")?,
        loan_id: row.try_get("loan_id")?,
        payment_amount: parsed(row, REPAYMENTS, "payment_amount")?,
        principal_portion: parsed(row, REPAYMENTS, "principal_portion")?,
        interest_portion: parsed(row, REPAYMENTS, "interest_portion")?,
        payment_type: coded(row, REPAYMENTS, "payment_type", PaymentType::parse)?,
        remaining_balance: parsed(row, REPAYMENTS, "remaining_balance")?,
        settlement_ref: row.try_get("settlement_ref")?,
        paid_at: timestamp(row, REPAYMENTS, "paid_at")?,
    })
}

// ---------------------------------------------------------------------------
// Health history
// ---------------------------------------------------------------------------

pub async fn insert_health_sample(
    conn: &mut SqliteConnection,
    sample: &HealthSample,
) -> Result<(), LendingError> {
    sqlx::query(
        "INSERT INTO loan_health_history \
         (loan_id, health_factor, tier, price, collateral_value, outstanding_debt, recorded_at) \
         VALUES (?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(sample.loan_id)
    .bind(sample.health_factor.to_string())
    .bind(sample.tier.as_str())
    .bind(sample.price.to_string())
    .bind(sample.collateral_value.to_string())
    .bind(sample.outstanding_debt.to_string())
    .bind(sample.recorded_at.timestamp())
    .execute(&mut *conn)
    .await?;
    Ok(())
}

/// Samples for one loan, oldest first.
pub async fn health_history(
    conn: &mut SqliteConnection,
    loan_id: LoanId,
) -> Result<Vec<HealthSample>, LendingError> {
    let rows = sqlx::query(
        "SELECT * FROM loan_health_history WHERE loan_id = ? ORDER BY recorded_at, id",
    )
    .bind(loan_id)
    .fetch_all(&mut *conn)
    .await?;
    rows.iter().map(health_sample_from_row).collect()
}

fn health_sample_from_row(row: &SqliteRow) -> Result<HealthSample, LendingError> {
    Ok(HealthSample {
        loan_id: row.try_get("loan_id")?,
        health_factor: parsed(row, HEALTH, "health_factor")?,
        tier: coded(row, HEALTH, "tier", HealthTier::parse)?,
        price: parsed(row, HEALTH, "price")?,
        collateral_value: parsed(row, HEALTH, "collateral_value")?,
        outstanding_debt: parsed(row, HEALTH, "outstanding_debt")?,
        recorded_at: timestamp(row, HEALTH, "recorded_at")?,
    })
}

// ---------------------------------------------------------------------------
// Credit events
// ---------------------------------------------------------------------------

pub async fn insert_credit_event(
    conn: &mut SqliteConnection,
    loan_id: LoanId,
    borrower: &str,
    category: &CreditCategory,
    recorded_at: DateTime<Utc>,
) -> Result<(), LendingError> {
    sqlx::query(
        "INSERT INTO credit_events (loan_id, borrower, category, days_offset, penalty_days, \
         loan_duration_days, seasonally_adjusted, recorded_at) \
         VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(loan_id)
    .bind(borrower)
    .bind(category.category.as_str())
    .bind(category.days_offset)
    .bind(category.penalty_days.to_string())
    .bind(category.loan_duration_days)
    .bind(category.seasonally_adjusted)
    .bind(recorded_at.timestamp())
    .execute(&mut *conn)
    .await?;
    Ok(())
}

pub async fn credit_categories_for_borrower(
    conn: &mut SqliteConnection,
    borrower: &str,
) -> Result<Vec<CreditCategory>, LendingError> {
    let rows = sqlx::query("SELECT * FROM credit_events WHERE borrower = ? ORDER BY id")
        .bind(borrower)
        .fetch_all(&mut *conn)
        .await?;
    rows.iter().map(credit_category_from_row).collect()
}

fn credit_category_from_row(row: &SqliteRow) -> Result<CreditCategory, LendingError> {
    Ok(CreditCategory {
        category: coded(row, CREDIT, "category", CreditTiming::parse)?,
        days_offset: row.try_get("days_offset")?,
        penalty_days: parsed(row, CREDIT, "penalty_days")?,
        loan_duration_days: row.try_get("loan_duration_days")?,
        seasonally_adjusted: row.try_get("seasonally_adjusted")?,
    })
}
