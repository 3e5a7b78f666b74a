use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// A price observation for one collateral asset, in the pool's currency.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PriceQuote {
    pub asset: String,
    #[serde(with = "rust_decimal::serde::str")]
    pub price: Decimal,
    pub as_of: DateTime<Utc>,
}
