//! Binance public market data over REST.
//!
//! No API key is needed. Endpoints used:
//! - `GET /fapi/v1/fundingRate` for the latest settled funding rate
//! - `GET /api/v3/ticker/price` for spot prices against USDT

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::Client;
use rust_decimal::Decimal;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::time::Duration;
use tracing::{debug, instrument};

use super::oracle::{usdt_symbol, FundingRateSource, PriceOracle};
use super::types::{FundingRate, TokenPrice};
use crate::config::MarketDataConfig;
use crate::error::{EngineError, Result};

const VENUE: &str = "binance";

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawFundingRate {
    symbol: String,
    #[serde(with = "rust_decimal::serde::str")]
    funding_rate: Decimal,
    funding_time: i64,
    #[serde(default, with = "rust_decimal::serde::str_option")]
    mark_price: Option<Decimal>,
}

#[derive(Debug, Deserialize)]
struct RawTickerPrice {
    #[allow(dead_code)]
    symbol: String,
    #[serde(with = "rust_decimal::serde::str")]
    price: Decimal,
}

/// Price and funding-rate oracle backed by Binance public endpoints.
pub struct BinanceMarketData {
    http: Client,
    futures_base_url: String,
    spot_base_url: String,
}

impl BinanceMarketData {
    pub fn new(config: &MarketDataConfig) -> Result<Self> {
        let http = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| EngineError::adapter(VENUE, format!("failed to create HTTP client: {}", e)))?;

        Ok(Self {
            http,
            futures_base_url: config.futures_base_url.trim_end_matches('/').to_string(),
            spot_base_url: config.spot_base_url.trim_end_matches('/').to_string(),
        })
    }

    async fn get_json<T: DeserializeOwned>(&self, url: &str, query: &[(&str, String)]) -> Result<T> {
        let response = self
            .http
            .get(url)
            .query(query)
            .send()
            .await
            .map_err(|e| EngineError::adapter(VENUE, format!("request to {} failed: {}", url, e)))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(EngineError::adapter(
                VENUE,
                format!("{} returned {}: {}", url, status, body),
            ));
        }

        response
            .json()
            .await
            .map_err(|e| EngineError::adapter(VENUE, format!("failed to parse response from {}: {}", url, e)))
    }
}

#[async_trait]
impl FundingRateSource for BinanceMarketData {
    #[instrument(skip(self))]
    async fn latest(&self, token: &str) -> Result<Option<FundingRate>> {
        let symbol = usdt_symbol(token);
        let url = format!("{}/fapi/v1/fundingRate", self.futures_base_url);
        let rates: Vec<RawFundingRate> = self
            .get_json(&url, &[("symbol", symbol.clone()), ("limit", "1".to_string())])
            .await?;

        let Some(raw) = rates.into_iter().last() else {
            debug!(%symbol, "No funding history");
            return Ok(None);
        };

        let funding_time = DateTime::<Utc>::from_timestamp_millis(raw.funding_time)
            .ok_or_else(|| EngineError::adapter(VENUE, format!("bad funding time {}", raw.funding_time)))?;

        Ok(Some(FundingRate {
            symbol: raw.symbol,
            funding_rate_pct: raw.funding_rate * Decimal::ONE_HUNDRED,
            funding_time,
            mark_price: raw.mark_price.unwrap_or(Decimal::ZERO),
        }))
    }
}

#[async_trait]
impl PriceOracle for BinanceMarketData {
    #[instrument(skip(self))]
    async fn price(&self, token: &str) -> Result<TokenPrice> {
        let upper = token.to_uppercase();
        if matches!(upper.as_str(), "USDT" | "USDC" | "BUSD" | "FDUSD") {
            return Ok(TokenPrice {
                token: upper,
                price_usd: Decimal::ONE,
                source: VENUE.to_string(),
            });
        }

        let url = format!("{}/api/v3/ticker/price", self.spot_base_url);
        let ticker: RawTickerPrice = self.get_json(&url, &[("symbol", usdt_symbol(&upper))]).await?;
        Ok(TokenPrice {
            token: upper,
            price_usd: ticker.price,
            source: VENUE.to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn client(server: &MockServer) -> BinanceMarketData {
        BinanceMarketData::new(&MarketDataConfig {
            futures_base_url: server.uri(),
            spot_base_url: server.uri(),
            timeout_secs: 5,
            ..MarketDataConfig::default()
        })
        .unwrap()
    }

    #[tokio::test]
    async fn test_latest_funding_rate_in_percent() {
        let mock_server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/fapi/v1/fundingRate"))
            .and(query_param("symbol", "BNBUSDT"))
            .and(query_param("limit", "1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!([
                {
                    "symbol": "BNBUSDT",
                    "fundingRate": "0.00010000",
                    "fundingTime": 1760486400000i64,
                    "markPrice": "601.25"
                }
            ])))
            .mount(&mock_server)
            .await;

        let rate = client(&mock_server).latest("bnb").await.unwrap().unwrap();
        assert_eq!(rate.symbol, "BNBUSDT");
        assert_eq!(rate.funding_rate_pct, dec!(0.01));
        assert_eq!(rate.mark_price, dec!(601.25));
        assert_eq!(rate.funding_time.timestamp_millis(), 1760486400000);
    }

    #[tokio::test]
    async fn test_empty_funding_history_is_none() {
        let mock_server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/fapi/v1/fundingRate"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!([])))
            .mount(&mock_server)
            .await;

        assert!(client(&mock_server).latest("CAKE").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_spot_price_and_http_error() {
        let mock_server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/api/v3/ticker/price"))
            .and(query_param("symbol", "BNBUSDT"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(serde_json::json!({ "symbol": "BNBUSDT", "price": "600.50000000" })),
            )
            .mount(&mock_server)
            .await;
        Mock::given(method("GET"))
            .and(path("/api/v3/ticker/price"))
            .and(query_param("symbol", "NOPEUSDT"))
            .respond_with(ResponseTemplate::new(400).set_body_string("{\"code\":-1121}"))
            .mount(&mock_server)
            .await;

        let market = client(&mock_server);
        assert_eq!(market.price("BNB").await.unwrap().price_usd, dec!(600.5));
        assert_eq!(market.price("usdt").await.unwrap().price_usd, Decimal::ONE);

        let err = market.price("NOPE").await.unwrap_err();
        assert!(matches!(err, EngineError::AdapterFailure { .. }));
        assert!(err.to_string().contains("400"));
    }
}
