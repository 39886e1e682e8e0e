//! Market data: spot prices, funding rates and yield listings.

mod binance;
mod cache;
mod oracle;
mod types;

pub use binance::BinanceMarketData;
pub use cache::TtlCache;
pub use oracle::{usdt_symbol, FundingRateSource, PriceOracle, StaticMarketData};
pub use types::{FundingRate, TokenPrice, YieldListing};
