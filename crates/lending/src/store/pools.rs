use chrono::{DateTime, Utc};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqliteConnection};

use super::{parsed, timestamp};
use crate::core::pool_ledger::{LpPosition, PoolLedger};
use crate::errors::LendingError;

const POOLS: &str = "pools";
const LP_POSITIONS: &str = "lp_positions";

pub async fn fetch_pool(
    conn: &mut SqliteConnection,
    asset: &str,
) -> Result<Option<PoolLedger>, LendingError> {
    let row = sqlx::query("SELECT * FROM pools WHERE asset = ?")
        .bind(asset)
        .fetch_optional(&mut *conn)
        .await?;
    row.as_ref().map(pool_from_row).transpose()
}

/// Load a pool that must already exist.
pub async fn require_pool(
    conn: &mut SqliteConnection,
    asset: &str,
) -> Result<PoolLedger, LendingError> {
    fetch_pool(conn, asset)
        .await?
        .ok_or_else(|| LendingError::PoolNotFound {
            asset: asset.to_string(),
        })
}

/// Persist `pool`, inserting it on first save.
///
/// Updates are conditional on the version read earlier in the transaction;
/// on success `pool.version` is bumped to match the row.
pub async fn save_pool(
    conn: &mut SqliteConnection,
    pool: &mut PoolLedger,
    now: DateTime<Utc>,
) -> Result<(), LendingError> {
    let next_version = pool.version + 1;
    let result = if pool.version == 0 {
        sqlx::query(
            "INSERT INTO pools (asset, total_liquidity, available_liquidity, total_borrowed, \
             total_lp_units, utilization_rate, current_apy, total_interest_earned, \
             total_loans_originated, total_loans_repaid, total_liquidations, version, updated_at) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&pool.asset)
        .bind(pool.total_liquidity.to_string())
        .bind(pool.available_liquidity.to_string())
        .bind(pool.total_borrowed.to_string())
        .bind(pool.total_lp_units.to_string())
        .bind(pool.utilization_rate.to_string())
        .bind(pool.current_apy.to_string())
        .bind(pool.total_interest_earned.to_string())
        .bind(pool.total_loans_originated as i64)
        .bind(pool.total_loans_repaid as i64)
        .bind(pool.total_liquidations as i64)
        .bind(next_version)
        .bind(now.timestamp())
        .execute(&mut *conn)
        .await?
    } else {
        sqlx::query(
            "UPDATE pools SET total_liquidity = ?, available_liquidity = ?, total_borrowed = ?, \
             total_lp_units = ?, utilization_rate = ?, current_apy = ?, total_interest_earned = ?, \
             total_loans_originated = ?, total_loans_repaid = ?, total_liquidations = ?, \
             version = ?, updated_at = ? \
             WHERE asset = ? AND version = ?",
        )
        .bind(pool.total_liquidity.to_string())
        .bind(pool.available_liquidity.to_string())
        .bind(pool.total_borrowed.to_string())
        .bind(pool.total_lp_units.to_string())
        .bind(pool.utilization_rate.to_string())
        .bind(pool.current_apy.to_string())
        .bind(pool.total_interest_earned.to_string())
        .bind(pool.total_loans_originated as i64)
        .bind(pool.total_loans_repaid as i64)
        .bind(pool.total_liquidations as i64)
        .bind(next_version)
        .bind(now.timestamp())
        .bind(&pool.asset)
        .bind(pool.version)
        .execute(&mut *conn)
        .await?
    };

    if result.rows_affected() != 1 {
        return Err(LendingError::ConcurrentStateConflict {
            entity: format!("pool {}", pool.asset),
        });
    }
    pool.version = next_version;
    Ok(())
}

fn pool_from_row(row: &SqliteRow) -> Result<PoolLedger, LendingError> {
    Ok(PoolLedger {
        asset: row.try_get("asset")?,
        total_liquidity: parsed(row, POOLS, "total_liquidity")?,
        available_liquidity: parsed(row, POOLS, "available_liquidity")?,
        total_borrowed: parsed(row, POOLS, "total_borrowed")?,
        total_lp_units: parsed(row, POOLS, "total_lp_units")?,
        utilization_rate: parsed(row, POOLS, "utilization_rate")?,
        current_apy: parsed(row, POOLS, "current_apy")?,
        total_interest_earned: parsed(row, POOLS, "total_interest_earned")?,
        total_loans_originated: row.try_get::<i64, _>("total_loans_originated")? as u64,
        total_loans_repaid: row.try_get::<i64, _>("total_loans_repaid")? as u64,
        total_liquidations: row.try_get::<i64, _>("total_liquidations")? as u64,
        version: row.try_get("version")?,
    })
}

// ---------------------------------------------------------------------------
// LP positions
// ---------------------------------------------------------------------------

pub async fn fetch_lp_position(
    conn: &mut SqliteConnection,
    asset: &str,
    provider: &str,
) -> Result<Option<LpPosition>, LendingError> {
    let row = sqlx::query("SELECT * FROM lp_positions WHERE asset = ? AND provider = ?")
        .bind(asset)
        .bind(provider)
        .fetch_optional(&mut *conn)
        .await?;
    row.as_ref().map(lp_position_from_row).transpose()
}

fn lp_position_from_row(row: &SqliteRow) -> Result<LpPosition, LendingError> {
    Ok(LpPosition {
        asset: row.try_get("asset")?,
        provider: row.try_get("provider")?,
        lp_units: parsed(row, LP_POSITIONS, "lp_units")?,
        deposited: parsed(row, LP_POSITIONS, "deposited")?,
        withdrawn: parsed(row, LP_POSITIONS, "withdrawn")?,
        updated_at: timestamp(row, LP_POSITIONS, "updated_at")?,
    })
}

pub async fn upsert_lp_position(
    conn: &mut SqliteConnection,
    position: &LpPosition,
) -> Result<(), LendingError> {
    sqlx::query(
        "INSERT INTO lp_positions (asset, provider, lp_units, deposited, withdrawn, updated_at) \
         VALUES (?, ?, ?, ?, ?, ?) \
         ON CONFLICT (asset, provider) DO UPDATE SET \
         lp_units = excluded.lp_units, deposited = excluded.deposited, \
         withdrawn = excluded.withdrawn, updated_at = excluded.updated_at",
    )
    .bind(&position.asset)
    .bind(&position.provider)
    .bind(position.lp_units.to_string())
    .bind(position.deposited.to_string())
    .bind(position.withdrawn.to_string())
    .bind(position.updated_at.timestamp())
    .execute(&mut *conn)
    .await?;
    Ok(())
}
