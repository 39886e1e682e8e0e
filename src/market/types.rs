//! Market data records returned by oracles.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TokenPrice {
    pub token: String,
    pub price_usd: Decimal,
    /// Where the price came from (e.g. "binance", "paper")
    pub source: String,
}

/// Latest perpetual funding observation for a token.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FundingRate {
    pub symbol: String,
    /// Rate per 8h interval, in percent (0.01 = 0.01%)
    pub funding_rate_pct: Decimal,
    pub funding_time: DateTime<Utc>,
    pub mark_price: Decimal,
}

/// One venue's supply APY for a token.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct YieldListing {
    pub venue: String,
    pub token: String,
    /// Supply APY in percent
    pub apy: Decimal,
    /// True when the venue cannot execute supply, so a deposit would be simulated
    pub simulated: bool,
}
