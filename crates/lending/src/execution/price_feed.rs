//! Collateral price source.
//!
//! The engine only reads prices through [`PriceFeed`]. [`PriceCache`] is the
//! in-process implementation: the embedding system pushes quotes into it and
//! the engine reads them back, applying [`ensure_fresh`] before use.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use tracing::debug;

use crate::errors::LendingError;
use crate::types::PriceQuote;

#[async_trait]
pub trait PriceFeed: Send + Sync {
    /// Latest known quote for `asset`. `PriceUnavailable` when none exists.
    async fn get_price(&self, asset: &str) -> Result<PriceQuote, LendingError>;
}

/// Reject quotes older than `max_staleness_seconds`, dated after `now`, or
/// with a non-positive price.
pub fn ensure_fresh(
    quote: PriceQuote,
    now: DateTime<Utc>,
    max_staleness_seconds: i64,
) -> Result<PriceQuote, LendingError> {
    if quote.price <= Decimal::ZERO {
        return Err(LendingError::PriceUnavailable {
            asset: quote.asset,
            reason: format!("non-positive price {}", quote.price),
        });
    }
    let age = (now - quote.as_of).num_seconds();
    if age < 0 {
        return Err(LendingError::PriceUnavailable {
            asset: quote.asset,
            reason: format!("quote is dated {}s in the future", -age),
        });
    }
    if age > max_staleness_seconds {
        return Err(LendingError::PriceUnavailable {
            asset: quote.asset,
            reason: format!("quote is {age}s old (max {max_staleness_seconds}s)"),
        });
    }
    Ok(quote)
}

/// Thread-safe cache of collateral prices keyed by asset id.
#[derive(Debug, Clone, Default)]
pub struct PriceCache {
    quotes: Arc<Mutex<HashMap<String, PriceQuote>>>,
}

impl PriceCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a price observation, replacing any earlier one for the asset.
    pub fn set_price(&self, asset: &str, price: Decimal, as_of: DateTime<Utc>) {
        self.update([PriceQuote {
            asset: asset.to_string(),
            price,
            as_of,
        }]);
    }

    /// Replace cached quotes with newer observations.
    pub fn update(&self, quotes: impl IntoIterator<Item = PriceQuote>) {
        let mut cache = self.quotes.lock().unwrap_or_else(|e| e.into_inner());
        for quote in quotes {
            debug!(asset = %quote.asset, price = %quote.price, "price cached");
            cache.insert(quote.asset.clone(), quote);
        }
    }

    /// Drop the quote for `asset`.
    pub fn remove(&self, asset: &str) {
        self.quotes
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(asset);
    }

    pub fn get(&self, asset: &str) -> Option<PriceQuote> {
        self.quotes
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(asset)
            .cloned()
    }
}

#[async_trait]
impl PriceFeed for PriceCache {
    async fn get_price(&self, asset: &str) -> Result<PriceQuote, LendingError> {
        self.get(asset).ok_or_else(|| LendingError::PriceUnavailable {
            asset: asset.to_string(),
            reason: "no quote".into(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};
    use rust_decimal_macros::dec;

    fn noon() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap()
    }

    #[tokio::test]
    async fn test_missing_quote_is_unavailable() {
        let cache = PriceCache::new();
        let err = cache.get_price("GROVE-A").await.unwrap_err();
        assert!(matches!(err, LendingError::PriceUnavailable { .. }));
    }

    #[tokio::test]
    async fn test_latest_quote_wins() {
        let cache = PriceCache::new();
        cache.set_price("GROVE-A", dec!(1.0), noon());
        cache.set_price("GROVE-A", dec!(0.7), noon() + Duration::seconds(5));
        let quote = cache.get_price("GROVE-A").await.unwrap();
        assert_eq!(quote.price, dec!(0.7));

        cache.remove("GROVE-A");
        assert!(cache.get("GROVE-A").is_none());
    }

    #[test]
    fn test_staleness_boundary() {
        let quote = PriceQuote {
            asset: "GROVE-A".into(),
            price: dec!(1.0),
            as_of: noon(),
        };
        assert!(ensure_fresh(quote.clone(), noon() + Duration::seconds(900), 900).is_ok());
        let err = ensure_fresh(quote, noon() + Duration::seconds(901), 900).unwrap_err();
        assert!(matches!(err, LendingError::PriceUnavailable { .. }));
    }

    #[test]
    fn test_future_dated_quote_rejected() {
        let quote = PriceQuote {
            asset: "GROVE-A".into(),
            price: dec!(1.0),
            as_of: noon() + Duration::seconds(1),
        };
        let err = ensure_fresh(quote.clone(), noon(), 900).unwrap_err();
        assert!(matches!(err, LendingError::PriceUnavailable { .. }));
        assert!(ensure_fresh(quote, noon() + Duration::seconds(1), 900).is_ok());
    }

    #[test]
    fn test_zero_price_rejected() {
        let quote = PriceQuote {
            asset: "GROVE-A".into(),
            price: Decimal::ZERO,
            as_of: noon(),
        };
        assert!(ensure_fresh(quote, noon(), 900).is_err());
    }
}
