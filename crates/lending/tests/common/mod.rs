#![allow(dead_code)]

use std::sync::Arc;

use chrono::{DateTime, TimeZone, Utc};
use rust_decimal::Decimal;
use tokio::sync::mpsc;

use grove_lending::config::{
    AppConfig, DatabaseConfig, LendingConfig, LoanPolicyConfig, LoggingConfig, PoolConfig,
    SeasonalConfig, TimingConfig,
};
use grove_lending::core::loan_originator::LoanOriginator;
use grove_lending::core::pool_ledger::LiquidityPools;
use grove_lending::core::EngineContext;
use grove_lending::execution::price_feed::PriceCache;
use grove_lending::execution::settlement::DryRunSettlement;
use grove_lending::store::Store;
use grove_lending::types::{Amount, LendingEvent, Loan, LoanRequest};

pub const ASSET: &str = "GROVE-SIDAMA";

/// Engine wired to an in-memory store, a price cache and dry-run settlement.
pub struct Harness {
    pub ctx: EngineContext,
    pub store: Arc<Store>,
    pub prices: Arc<PriceCache>,
    pub settlement: Arc<DryRunSettlement>,
    pub events: mpsc::Receiver<LendingEvent>,
}

pub fn test_config() -> LendingConfig {
    LendingConfig {
        app: AppConfig {
            logging: LoggingConfig {
                log_dir: "logs".into(),
            },
            database: DatabaseConfig {
                path: ":memory:".into(),
            },
        },
        lending: LoanPolicyConfig::default(),
        seasonal: SeasonalConfig::default(),
        pools: PoolConfig::default(),
        timing: TimingConfig::default(),
    }
}

pub async fn harness() -> Harness {
    harness_with(test_config()).await
}

pub async fn harness_with(config: LendingConfig) -> Harness {
    let store = Arc::new(Store::connect_in_memory().await.unwrap());
    let prices = Arc::new(PriceCache::new());
    let settlement = Arc::new(DryRunSettlement::new());
    let (tx, events) = mpsc::channel(64);
    let ctx = EngineContext::new(store.clone(), prices.clone(), settlement.clone(), config)
        .with_events(tx);
    Harness {
        ctx,
        store,
        prices,
        settlement,
        events,
    }
}

/// Off-season date in 2024, noon UTC.
pub fn march(day: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 3, day, 12, 0, 0).unwrap()
}

pub fn request(borrower: &str, principal: Amount, collateral: Amount) -> LoanRequest {
    LoanRequest {
        borrower: borrower.into(),
        principal,
        collateral_asset: ASSET.into(),
        collateral_amount: collateral,
        duration_days: None,
    }
}

impl Harness {
    pub fn set_price(&self, price: Decimal, as_of: DateTime<Utc>) {
        self.prices.set_price(ASSET, price, as_of);
    }

    pub async fn fund(&self, provider: &str, amount: Amount, now: DateTime<Utc>) -> Amount {
        LiquidityPools::new(self.ctx.clone())
            .deposit(ASSET, provider, amount, now)
            .await
            .unwrap()
    }

    /// Funded pool, price 1.0, and one 1000-principal loan on 1250 collateral.
    pub async fn standard_loan(&self, now: DateTime<Utc>) -> Loan {
        self.fund("lp-1", 10_000, now).await;
        self.set_price(Decimal::ONE, now);
        LoanOriginator::new(self.ctx.clone())
            .originate(&request("alice", 1_000, 1_250), now)
            .await
            .unwrap()
    }

    pub fn drain_events(&mut self) -> Vec<LendingEvent> {
        let mut out = Vec::new();
        while let Ok(event) = self.events.try_recv() {
            out.push(event);
        }
        out
    }
}
