use rust_decimal::Decimal;
use rust_decimal_macros::dec;

// ---------------------------------------------------------------------------
// Loan policy defaults
// ---------------------------------------------------------------------------

/// Fixed simple interest charged over the life of a loan.
pub const DEFAULT_INTEREST_RATE: Decimal = dec!(0.10);

/// Collateral value weight used in the health factor.
pub const DEFAULT_LIQUIDATION_THRESHOLD: Decimal = dec!(0.90);

/// Haircut applied to seized collateral value.
pub const DEFAULT_LIQUIDATION_PENALTY: Decimal = dec!(0.05);

/// Portion of the penalty paid to whoever triggered the liquidation.
pub const DEFAULT_LIQUIDATOR_REWARD_SHARE: Decimal = dec!(0.5);

pub const DEFAULT_MAX_LOAN_DURATION_DAYS: u32 = 90;

/// Liquidator id recorded when the health monitor liquidates on its own.
pub const DEFAULT_SYSTEM_LIQUIDATOR: &str = "health-monitor";

// ---------------------------------------------------------------------------
// Health factor bands
// ---------------------------------------------------------------------------

pub const HEALTHY_ABOVE: Decimal = dec!(1.5);
pub const MONITOR_FROM: Decimal = dec!(1.2);
pub const LIQUIDATION_BELOW: Decimal = dec!(1.0);

// ---------------------------------------------------------------------------
// Seasonal policy defaults
// ---------------------------------------------------------------------------

/// Main harvest window (calendar months, 1-based).
pub const DEFAULT_HARVEST_MONTHS: [u32; 3] = [10, 11, 12];

pub const DEFAULT_HARVEST_COLLATERAL_RATIO: Decimal = dec!(1.10);
pub const DEFAULT_OFF_SEASON_COLLATERAL_RATIO: Decimal = dec!(1.25);

/// Months leading into harvest for the duration table.
pub const DEFAULT_APPROACHING_HARVEST_MONTHS: [u32; 2] = [8, 9];

pub const DEFAULT_HARVEST_DURATION_DAYS: u32 = 30;
pub const DEFAULT_APPROACHING_DURATION_DAYS: u32 = 60;
pub const DEFAULT_OFF_SEASON_DURATION_DAYS: u32 = 90;

/// Off-season lateness up to this many days is forgiven entirely.
pub const DEFAULT_LENIENCY_GRACE_DAYS: i64 = 7;

/// Off-season lateness up to this many days has its penalty halved.
pub const DEFAULT_LENIENCY_HALVING_MAX_DAYS: i64 = 14;

// ---------------------------------------------------------------------------
// Pool APY curve defaults
// ---------------------------------------------------------------------------

pub const DEFAULT_BASE_APY: Decimal = dec!(0.02);
pub const DEFAULT_KINK_UTILIZATION: Decimal = dec!(0.80);
pub const DEFAULT_APY_AT_KINK: Decimal = dec!(0.08);
pub const DEFAULT_APY_AT_MAX: Decimal = dec!(0.30);

// ---------------------------------------------------------------------------
// Runtime defaults
// ---------------------------------------------------------------------------

pub const DEFAULT_SWEEP_INTERVAL_SECONDS: u64 = 60;
pub const DEFAULT_PRICE_MAX_STALENESS_SECONDS: i64 = 900;
pub const DEFAULT_MAX_CONFLICT_RETRIES: u32 = 3;
pub const DEFAULT_RETRY_BASE_DELAY_MS: u64 = 25;
pub const MAX_RETRY_BASE_DELAY_MS: u64 = 10_000;
pub const DEFAULT_MAX_CONSECUTIVE_SWEEP_FAILURES: u32 = 5;
