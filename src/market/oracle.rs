//! Price and funding-rate oracle interfaces.

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::RwLock;
use rust_decimal::Decimal;
use std::collections::HashMap;

use super::types::{FundingRate, TokenPrice};
use crate::error::{EngineError, Result};

/// Spot USD price source.
#[async_trait]
pub trait PriceOracle: Send + Sync {
    async fn price(&self, token: &str) -> Result<TokenPrice>;
}

/// Perpetual funding-rate source.
#[async_trait]
pub trait FundingRateSource: Send + Sync {
    /// Latest funding observation, or `None` when the market has no data.
    async fn latest(&self, token: &str) -> Result<Option<FundingRate>>;
}

/// Perpetual symbol for a token, e.g. `BNB` -> `BNBUSDT`.
pub fn usdt_symbol(token: &str) -> String {
    let upper = token.to_uppercase();
    if upper.ends_with("USDT") {
        upper
    } else {
        format!("{}USDT", upper)
    }
}

/// Fixed, settable market data for paper trading and tests.
#[derive(Default)]
pub struct StaticMarketData {
    prices: RwLock<HashMap<String, Decimal>>,
    funding: RwLock<HashMap<String, Decimal>>,
}

impl StaticMarketData {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_price(self, token: &str, price_usd: Decimal) -> Self {
        self.set_price(token, price_usd);
        self
    }

    pub fn with_funding_rate(self, token: &str, rate_pct: Decimal) -> Self {
        self.set_funding_rate(token, rate_pct);
        self
    }

    pub fn set_price(&self, token: &str, price_usd: Decimal) {
        self.prices.write().insert(token.to_uppercase(), price_usd);
    }

    pub fn clear_price(&self, token: &str) {
        self.prices.write().remove(&token.to_uppercase());
    }

    pub fn set_funding_rate(&self, token: &str, rate_pct: Decimal) {
        self.funding.write().insert(usdt_symbol(token), rate_pct);
    }

    pub fn clear_funding_rate(&self, token: &str) {
        self.funding.write().remove(&usdt_symbol(token));
    }
}

#[async_trait]
impl PriceOracle for StaticMarketData {
    async fn price(&self, token: &str) -> Result<TokenPrice> {
        let price = self
            .prices
            .read()
            .get(&token.to_uppercase())
            .copied()
            .ok_or_else(|| EngineError::adapter("paper", format!("no price for {}", token)))?;
        Ok(TokenPrice {
            token: token.to_uppercase(),
            price_usd: price,
            source: "paper".to_string(),
        })
    }
}

#[async_trait]
impl FundingRateSource for StaticMarketData {
    async fn latest(&self, token: &str) -> Result<Option<FundingRate>> {
        let symbol = usdt_symbol(token);
        let rate = self.funding.read().get(&symbol).copied();
        let mark = self
            .prices
            .read()
            .get(&token.to_uppercase())
            .copied()
            .unwrap_or(Decimal::ZERO);
        Ok(rate.map(|funding_rate_pct| FundingRate {
            symbol,
            funding_rate_pct,
            funding_time: Utc::now(),
            mark_price: mark,
        }))
    }
}
