use rust_decimal::Decimal;
use serde::Deserialize;

use crate::constants::*;

// ---------------------------------------------------------------------------
// Top-level aggregate
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize)]
pub struct LendingConfig {
    pub app: AppConfig,
    pub lending: LoanPolicyConfig,
    pub seasonal: SeasonalConfig,
    pub pools: PoolConfig,
    pub timing: TimingConfig,
}

// ---------------------------------------------------------------------------
// app.json
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub logging: LoggingConfig,
    pub database: DatabaseConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    pub log_dir: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    /// SQLite file path, or `:memory:`.
    pub path: String,
}

// ---------------------------------------------------------------------------
// lending.json
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize)]
pub struct LoanPolicyConfig {
    #[serde(with = "rust_decimal::serde::str")]
    pub interest_rate: Decimal,
    #[serde(with = "rust_decimal::serde::str")]
    pub liquidation_threshold: Decimal,
    #[serde(with = "rust_decimal::serde::str")]
    pub liquidation_penalty: Decimal,
    #[serde(with = "rust_decimal::serde::str")]
    pub liquidator_reward_share: Decimal,
    pub max_loan_duration_days: u32,
    pub system_liquidator: String,
}

impl Default for LoanPolicyConfig {
    fn default() -> Self {
        Self {
            interest_rate: DEFAULT_INTEREST_RATE,
            liquidation_threshold: DEFAULT_LIQUIDATION_THRESHOLD,
            liquidation_penalty: DEFAULT_LIQUIDATION_PENALTY,
            liquidator_reward_share: DEFAULT_LIQUIDATOR_REWARD_SHARE,
            max_loan_duration_days: DEFAULT_MAX_LOAN_DURATION_DAYS,
            system_liquidator: DEFAULT_SYSTEM_LIQUIDATOR.to_string(),
        }
    }
}

// ---------------------------------------------------------------------------
// seasonal.json
// ---------------------------------------------------------------------------

/// Harvest-calendar policy. The collateral-ratio table and the duration table
/// are deliberately independent month mappings.
#[derive(Debug, Clone, Deserialize)]
pub struct SeasonalConfig {
    pub collateral: CollateralSeasonConfig,
    pub duration: DurationSeasonConfig,
    pub leniency: LeniencyConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CollateralSeasonConfig {
    pub harvest_months: Vec<u32>,
    #[serde(with = "rust_decimal::serde::str")]
    pub harvest_ratio: Decimal,
    #[serde(with = "rust_decimal::serde::str")]
    pub off_season_ratio: Decimal,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DurationSeasonConfig {
    pub harvest_months: Vec<u32>,
    pub harvest_days: u32,
    pub approaching_months: Vec<u32>,
    pub approaching_days: u32,
    pub default_days: u32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LeniencyConfig {
    pub grace_days: i64,
    pub halving_max_days: i64,
}

impl Default for SeasonalConfig {
    fn default() -> Self {
        Self {
            collateral: CollateralSeasonConfig {
                harvest_months: DEFAULT_HARVEST_MONTHS.to_vec(),
                harvest_ratio: DEFAULT_HARVEST_COLLATERAL_RATIO,
                off_season_ratio: DEFAULT_OFF_SEASON_COLLATERAL_RATIO,
            },
            duration: DurationSeasonConfig {
                harvest_months: DEFAULT_HARVEST_MONTHS.to_vec(),
                harvest_days: DEFAULT_HARVEST_DURATION_DAYS,
                approaching_months: DEFAULT_APPROACHING_HARVEST_MONTHS.to_vec(),
                approaching_days: DEFAULT_APPROACHING_DURATION_DAYS,
                default_days: DEFAULT_OFF_SEASON_DURATION_DAYS,
            },
            leniency: LeniencyConfig {
                grace_days: DEFAULT_LENIENCY_GRACE_DAYS,
                halving_max_days: DEFAULT_LENIENCY_HALVING_MAX_DAYS,
            },
        }
    }
}

// ---------------------------------------------------------------------------
// pools.json
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, Deserialize)]
pub struct PoolConfig {
    pub apy_curve: ApyCurveConfig,
}

/// Two linear segments: `base_apy` at 0% utilization up to `apy_at_kink` at
/// `kink_utilization`, then up to `apy_at_max` at 100%.
#[derive(Debug, Clone, Deserialize)]
pub struct ApyCurveConfig {
    #[serde(with = "rust_decimal::serde::str")]
    pub base_apy: Decimal,
    #[serde(with = "rust_decimal::serde::str")]
    pub kink_utilization: Decimal,
    #[serde(with = "rust_decimal::serde::str")]
    pub apy_at_kink: Decimal,
    #[serde(with = "rust_decimal::serde::str")]
    pub apy_at_max: Decimal,
}

impl Default for ApyCurveConfig {
    fn default() -> Self {
        Self {
            base_apy: DEFAULT_BASE_APY,
            kink_utilization: DEFAULT_KINK_UTILIZATION,
            apy_at_kink: DEFAULT_APY_AT_KINK,
            apy_at_max: DEFAULT_APY_AT_MAX,
        }
    }
}

// ---------------------------------------------------------------------------
// timing.json
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, Deserialize)]
pub struct TimingConfig {
    pub health_monitoring: HealthMonitoringTiming,
    pub price_feed: PriceFeedTiming,
    pub concurrency: ConcurrencyConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct HealthMonitoringTiming {
    pub sweep_interval_seconds: u64,
    pub auto_liquidate: bool,
    pub max_consecutive_failures: u32,
}

impl Default for HealthMonitoringTiming {
    fn default() -> Self {
        Self {
            sweep_interval_seconds: DEFAULT_SWEEP_INTERVAL_SECONDS,
            auto_liquidate: true,
            max_consecutive_failures: DEFAULT_MAX_CONSECUTIVE_SWEEP_FAILURES,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct PriceFeedTiming {
    /// Quotes older than this are treated as unavailable.
    pub max_staleness_seconds: i64,
}

impl Default for PriceFeedTiming {
    fn default() -> Self {
        Self {
            max_staleness_seconds: DEFAULT_PRICE_MAX_STALENESS_SECONDS,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ConcurrencyConfig {
    pub max_conflict_retries: u32,
    pub retry_base_delay_ms: u64,
}

impl Default for ConcurrencyConfig {
    fn default() -> Self {
        Self {
            max_conflict_retries: DEFAULT_MAX_CONFLICT_RETRIES,
            retry_base_delay_ms: DEFAULT_RETRY_BASE_DELAY_MS,
        }
    }
}
