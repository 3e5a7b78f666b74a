use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tracing::warn;

use crate::config::LendingConfig;
use crate::errors::LendingError;
use crate::execution::price_feed::{ensure_fresh, PriceFeed};
use crate::execution::settlement::SettlementLedger;
use crate::store::Store;
use crate::types::{LendingEvent, PriceQuote};

/// Shared handles every engine service is built from.
#[derive(Clone)]
pub struct EngineContext {
    pub store: Arc<Store>,
    pub prices: Arc<dyn PriceFeed>,
    pub settlement: Arc<dyn SettlementLedger>,
    pub config: Arc<LendingConfig>,
    event_tx: Option<mpsc::Sender<LendingEvent>>,
}

impl EngineContext {
    pub fn new(
        store: Arc<Store>,
        prices: Arc<dyn PriceFeed>,
        settlement: Arc<dyn SettlementLedger>,
        config: LendingConfig,
    ) -> Self {
        Self {
            store,
            prices,
            settlement,
            config: Arc::new(config),
            event_tx: None,
        }
    }

    /// Route typed events to a notification sink.
    pub fn with_events(mut self, event_tx: mpsc::Sender<LendingEvent>) -> Self {
        self.event_tx = Some(event_tx);
        self
    }

    /// Current price for `asset`, rejected if older than the configured window.
    pub async fn fresh_price(
        &self,
        asset: &str,
        now: DateTime<Utc>,
    ) -> Result<PriceQuote, LendingError> {
        let quote = self.prices.get_price(asset).await?;
        ensure_fresh(
            quote,
            now,
            self.config.timing.price_feed.max_staleness_seconds,
        )
    }

    /// Hand an event to the sink. Never blocks and never fails the caller.
    pub fn emit(&self, event: LendingEvent) {
        let Some(tx) = &self.event_tx else {
            return;
        };
        match tx.try_send(event) {
            Ok(()) => {}
            Err(TrySendError::Full(event)) => {
                warn!(loan_id = event.loan_id(), "event channel full, dropping event");
            }
            Err(TrySendError::Closed(event)) => {
                warn!(loan_id = event.loan_id(), "event channel closed, dropping event");
            }
        }
    }
}
