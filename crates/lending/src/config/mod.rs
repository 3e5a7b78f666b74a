pub mod types;
pub mod validate;

pub use types::*;

use anyhow::{Context, Result};
use rust_decimal::Decimal;
use std::path::Path;
use std::str::FromStr;
use tracing::info;

/// Load and merge all config JSON files into a single [`LendingConfig`],
/// then apply environment variable overrides and validate.
///
/// Expected directory layout:
/// ```text
/// config/
///   app.json
///   lending.json
///   seasonal.json
///   pools.json
///   timing.json
/// ```
///
/// # Environment variable overrides
///
/// | Env Var                          | Config Field                                   |
/// |----------------------------------|------------------------------------------------|
/// | `LENDING_DB_PATH`                | `app.database.path`                            |
/// | `LENDING_INTEREST_RATE`          | `lending.interest_rate`                        |
/// | `LENDING_LIQUIDATION_PENALTY`    | `lending.liquidation_penalty`                  |
/// | `PRICE_MAX_STALENESS_SECONDS`    | `timing.price_feed.max_staleness_seconds`      |
/// | `HEALTH_SWEEP_INTERVAL_SECONDS`  | `timing.health_monitoring.sweep_interval_seconds` |
/// | `AUTO_LIQUIDATE`                 | `timing.health_monitoring.auto_liquidate`      |
pub fn load_config(config_dir: &Path) -> Result<LendingConfig> {
    let read = |name: &str| -> Result<String> {
        let path = config_dir.join(name);
        std::fs::read_to_string(&path)
            .with_context(|| format!("failed to read config file: {}", path.display()))
    };

    let app: AppConfig = serde_json::from_str(&read("app.json")?).context("parsing app.json")?;

    let lending: LoanPolicyConfig =
        serde_json::from_str(&read("lending.json")?).context("parsing lending.json")?;

    let seasonal: SeasonalConfig =
        serde_json::from_str(&read("seasonal.json")?).context("parsing seasonal.json")?;

    let pools: PoolConfig =
        serde_json::from_str(&read("pools.json")?).context("parsing pools.json")?;

    let timing: TimingConfig =
        serde_json::from_str(&read("timing.json")?).context("parsing timing.json")?;

    let mut config = LendingConfig {
        app,
        lending,
        seasonal,
        pools,
        timing,
    };

    apply_env_overrides(&mut config);
    validate::validate_config(&config)?;

    Ok(config)
}

// ---------------------------------------------------------------------------
// Environment variable overrides
// ---------------------------------------------------------------------------

/// Only non-empty env vars take effect. Parse failures are skipped and the
/// JSON value remains.
fn apply_env_overrides(config: &mut LendingConfig) {
    if let Some(val) = env_string("LENDING_DB_PATH") {
        info!(path = %val, "env override: LENDING_DB_PATH");
        config.app.database.path = val;
    }

    if let Some(val) = env_decimal("LENDING_INTEREST_RATE") {
        info!(%val, "env override: LENDING_INTEREST_RATE");
        config.lending.interest_rate = val;
    }

    if let Some(val) = env_decimal("LENDING_LIQUIDATION_PENALTY") {
        info!(%val, "env override: LENDING_LIQUIDATION_PENALTY");
        config.lending.liquidation_penalty = val;
    }

    if let Some(val) = env_parse::<i64>("PRICE_MAX_STALENESS_SECONDS") {
        info!(val, "env override: PRICE_MAX_STALENESS_SECONDS");
        config.timing.price_feed.max_staleness_seconds = val;
    }

    if let Some(val) = env_parse::<u64>("HEALTH_SWEEP_INTERVAL_SECONDS") {
        info!(val, "env override: HEALTH_SWEEP_INTERVAL_SECONDS");
        config.timing.health_monitoring.sweep_interval_seconds = val;
    }

    if let Some(val) = env_bool("AUTO_LIQUIDATE") {
        info!(val, "env override: AUTO_LIQUIDATE");
        config.timing.health_monitoring.auto_liquidate = val;
    }
}

fn env_string(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.is_empty())
}

/// `true`, `1`, `yes` → true; anything else → false.
fn env_bool(key: &str) -> Option<bool> {
    env_string(key).map(|v| matches!(v.to_lowercase().as_str(), "true" | "1" | "yes"))
}

fn env_parse<T: FromStr>(key: &str) -> Option<T> {
    env_string(key).and_then(|v| v.parse().ok())
}

fn env_decimal(key: &str) -> Option<Decimal> {
    env_string(key).and_then(|v| Decimal::from_str(&v).ok())
}
