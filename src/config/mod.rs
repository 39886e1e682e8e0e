//! Configuration management for the strategy engine.
//!
//! Loads settings from an optional `config.toml` and `ENGINE__SECTION__KEY`
//! environment variables (after reading `.env`).

use anyhow::{Context, Result};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::risk::RiskConfig;
use crate::venue::Capability;

/// Main application configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Storage and scheduling
    #[serde(default)]
    pub engine: EngineConfig,
    /// Default per-owner risk limits
    #[serde(default)]
    pub risk: RiskConfig,
    /// Arbitrage scanner thresholds
    #[serde(default)]
    pub scanner: ScannerConfig,
    #[serde(default)]
    pub delta_neutral: DeltaNeutralConfig,
    #[serde(default)]
    pub yield_optimizer: YieldOptimizerConfig,
    #[serde(default)]
    pub alerts: AlertsConfig,
    /// Public market-data endpoints
    #[serde(default)]
    pub market_data: MarketDataConfig,
    /// Paper venues used by the operator binary
    #[serde(default)]
    pub paper: PaperConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// SQLite database file
    #[serde(default = "default_database_path")]
    pub database_path: String,
    /// Auto-arb scheduler tick interval
    #[serde(default = "default_tick_interval")]
    pub tick_interval_secs: u64,
    /// Position-health and APY-drop monitor interval
    #[serde(default = "default_monitor_interval")]
    pub monitor_interval_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScannerConfig {
    /// Default token scanned when the caller names none
    #[serde(default = "default_scan_token")]
    pub token: String,
    #[serde(default = "default_quote_token")]
    pub quote_token: String,
    /// Probe size used for quotes and profit estimates
    #[serde(default = "default_probe_amount")]
    pub probe_amount: Decimal,
    /// Spreads at or below this are not reported
    #[serde(default = "default_min_spread_bps")]
    pub min_spread_bps: Decimal,
    /// Spreads above this are flagged viable
    #[serde(default = "default_viable_spread_bps")]
    pub viable_spread_bps: Decimal,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeltaNeutralConfig {
    /// Hours between funding settlements
    #[serde(default = "default_funding_interval_hours")]
    pub funding_interval_hours: u32,
    /// Venue name recorded for the simulated short leg
    #[serde(default = "default_short_venue")]
    pub short_venue: String,
    /// Quote token the spot leg is bought with
    #[serde(default = "default_quote_token")]
    pub quote_token: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct YieldOptimizerConfig {
    /// APY listing cache lifetime
    #[serde(default = "default_apy_cache_ttl")]
    pub apy_cache_ttl_secs: u64,
    /// Minimum APY improvement before a rotation is worth it
    #[serde(default = "default_min_improvement_bps")]
    pub min_improvement_bps: Decimal,
    #[serde(default = "default_max_alternatives")]
    pub max_alternatives: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AlertsConfig {
    /// APY drop (percentage points) below entry that triggers an alert
    #[serde(default = "default_apy_drop_threshold")]
    pub apy_drop_threshold: Decimal,
    /// Unread notifications kept in each listing
    #[serde(default = "default_notification_limit")]
    pub notification_limit: usize,
    /// Minimum seconds between arbitrage opportunity broadcasts
    #[serde(default = "default_arb_alert_interval")]
    pub arb_alert_interval_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MarketDataConfig {
    /// Use Binance public endpoints instead of the static paper prices
    #[serde(default)]
    pub use_binance: bool,
    #[serde(default = "default_futures_base_url")]
    pub futures_base_url: String,
    #[serde(default = "default_spot_base_url")]
    pub spot_base_url: String,
    #[serde(default = "default_http_timeout")]
    pub timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaperConfig {
    /// Owner the operator binary acts for
    #[serde(default = "default_paper_owner")]
    pub owner: String,
    /// Address reported by the paper chain client
    #[serde(default = "default_paper_address")]
    pub address: String,
    /// Static USD prices for the paper oracle
    #[serde(default = "default_paper_prices")]
    pub prices: HashMap<String, Decimal>,
    /// Static funding rates (percent per interval) for the paper oracle
    #[serde(default = "default_paper_funding")]
    pub funding_rates: HashMap<String, Decimal>,
    #[serde(default = "default_paper_venues")]
    pub venues: Vec<PaperVenueConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaperVenueConfig {
    pub name: String,
    #[serde(default)]
    pub capabilities: Vec<Capability>,
    /// Prices keyed by `FROM/TO`, e.g. `BNB/USDT`
    #[serde(default)]
    pub quotes: HashMap<String, Decimal>,
    /// Supply APYs in percent, keyed by token
    #[serde(default)]
    pub apys: HashMap<String, Decimal>,
    #[serde(default)]
    pub balances: HashMap<String, Decimal>,
}

// Default value functions
fn default_database_path() -> String {
    "engine.db".to_string()
}

fn default_tick_interval() -> u64 {
    30
}

fn default_monitor_interval() -> u64 {
    300
}

fn default_scan_token() -> String {
    "BNB".to_string()
}

fn default_quote_token() -> String {
    "USDT".to_string()
}

fn default_probe_amount() -> Decimal {
    Decimal::ONE
}

fn default_min_spread_bps() -> Decimal {
    Decimal::new(10, 0)
}

fn default_viable_spread_bps() -> Decimal {
    Decimal::new(30, 0)
}

fn default_funding_interval_hours() -> u32 {
    8
}

fn default_short_venue() -> String {
    "Binance".to_string()
}

fn default_apy_cache_ttl() -> u64 {
    120
}

fn default_min_improvement_bps() -> Decimal {
    Decimal::new(50, 0)
}

fn default_max_alternatives() -> usize {
    3
}

fn default_apy_drop_threshold() -> Decimal {
    Decimal::new(5, 1) // 0.5 points
}

fn default_notification_limit() -> usize {
    50
}

fn default_arb_alert_interval() -> u64 {
    120
}

fn default_futures_base_url() -> String {
    "https://fapi.binance.com".to_string()
}

fn default_spot_base_url() -> String {
    "https://api.binance.com".to_string()
}

fn default_http_timeout() -> u64 {
    8
}

fn default_paper_owner() -> String {
    "operator".to_string()
}

fn default_paper_address() -> String {
    "0x00000000000000000000000000000000000000aa".to_string()
}

fn default_paper_prices() -> HashMap<String, Decimal> {
    HashMap::from([
        ("BNB".to_string(), Decimal::new(600, 0)),
        ("USDT".to_string(), Decimal::ONE),
    ])
}

fn default_paper_funding() -> HashMap<String, Decimal> {
    HashMap::from([("BNB".to_string(), Decimal::new(1, 2))]) // 0.01% per 8h
}

fn default_paper_venues() -> Vec<PaperVenueConfig> {
    vec![
        PaperVenueConfig {
            name: "PancakeSwap".to_string(),
            capabilities: vec![Capability::Quote, Capability::Swap, Capability::Balance],
            quotes: HashMap::from([("BNB/USDT".to_string(), Decimal::new(600, 0))]),
            apys: HashMap::new(),
            balances: HashMap::from([("USDT".to_string(), Decimal::new(10_000, 0))]),
        },
        PaperVenueConfig {
            name: "Thena".to_string(),
            capabilities: vec![Capability::Quote, Capability::Swap],
            quotes: HashMap::from([("BNB/USDT".to_string(), Decimal::new(602, 0))]),
            apys: HashMap::new(),
            balances: HashMap::new(),
        },
        PaperVenueConfig {
            name: "Venus".to_string(),
            capabilities: vec![
                Capability::Supply,
                Capability::Withdraw,
                Capability::Apy,
                Capability::Balance,
            ],
            quotes: HashMap::new(),
            apys: HashMap::from([
                ("USDT".to_string(), Decimal::new(42, 1)),
                ("BNB".to_string(), Decimal::new(18, 1)),
            ]),
            balances: HashMap::from([("USDT".to_string(), Decimal::new(10_000, 0))]),
        },
    ]
}

impl Config {
    /// Load configuration from environment variables and config files.
    pub fn load() -> Result<Self> {
        dotenvy::dotenv().ok();

        let config = config::Config::builder()
            .add_source(config::File::with_name("config").required(false))
            .add_source(config::Environment::default().separator("__").prefix("ENGINE"))
            .build()
            .context("Failed to build configuration")?;

        config
            .try_deserialize()
            .context("Failed to deserialize configuration")
    }

    /// Validate configuration values.
    pub fn validate(&self) -> Result<()> {
        anyhow::ensure!(
            self.engine.tick_interval_secs > 0 && self.engine.monitor_interval_secs > 0,
            "tick and monitor intervals must be positive"
        );

        anyhow::ensure!(
            self.risk.max_position_usd >= Decimal::ZERO
                && self.risk.max_total_exposure_usd >= self.risk.max_position_usd,
            "max_total_exposure_usd must be >= max_position_usd >= 0"
        );

        anyhow::ensure!(
            self.scanner.probe_amount > Decimal::ZERO,
            "scanner probe_amount must be positive"
        );

        anyhow::ensure!(
            self.scanner.min_spread_bps >= Decimal::ZERO
                && self.scanner.viable_spread_bps >= self.scanner.min_spread_bps,
            "viable_spread_bps must be >= min_spread_bps >= 0"
        );

        anyhow::ensure!(
            self.delta_neutral.funding_interval_hours > 0 && 24 % self.delta_neutral.funding_interval_hours == 0,
            "funding_interval_hours must divide 24"
        );

        anyhow::ensure!(
            self.alerts.apy_drop_threshold > Decimal::ZERO,
            "apy_drop_threshold must be positive"
        );

        for venue in &self.paper.venues {
            for pair in venue.quotes.keys() {
                anyhow::ensure!(
                    pair.split_once('/').is_some(),
                    "paper venue {} quote key {:?} must look like FROM/TO",
                    venue.name,
                    pair
                );
            }
        }

        Ok(())
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            database_path: default_database_path(),
            tick_interval_secs: default_tick_interval(),
            monitor_interval_secs: default_monitor_interval(),
        }
    }
}

impl Default for ScannerConfig {
    fn default() -> Self {
        Self {
            token: default_scan_token(),
            quote_token: default_quote_token(),
            probe_amount: default_probe_amount(),
            min_spread_bps: default_min_spread_bps(),
            viable_spread_bps: default_viable_spread_bps(),
        }
    }
}

impl Default for DeltaNeutralConfig {
    fn default() -> Self {
        Self {
            funding_interval_hours: default_funding_interval_hours(),
            short_venue: default_short_venue(),
            quote_token: default_quote_token(),
        }
    }
}

impl Default for YieldOptimizerConfig {
    fn default() -> Self {
        Self {
            apy_cache_ttl_secs: default_apy_cache_ttl(),
            min_improvement_bps: default_min_improvement_bps(),
            max_alternatives: default_max_alternatives(),
        }
    }
}

impl Default for AlertsConfig {
    fn default() -> Self {
        Self {
            apy_drop_threshold: default_apy_drop_threshold(),
            notification_limit: default_notification_limit(),
            arb_alert_interval_secs: default_arb_alert_interval(),
        }
    }
}

impl Default for MarketDataConfig {
    fn default() -> Self {
        Self {
            use_binance: false,
            futures_base_url: default_futures_base_url(),
            spot_base_url: default_spot_base_url(),
            timeout_secs: default_http_timeout(),
        }
    }
}

impl Default for PaperConfig {
    fn default() -> Self {
        Self {
            owner: default_paper_owner(),
            address: default_paper_address(),
            prices: default_paper_prices(),
            funding_rates: default_paper_funding(),
            venues: default_paper_venues(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_default_config_is_valid() {
        let config = Config::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.risk.max_position_usd, dec!(1000));
        assert_eq!(config.scanner.viable_spread_bps, dec!(30));
        assert_eq!(config.paper.venues.len(), 3);
    }

    #[test]
    fn test_invalid_thresholds_rejected() {
        let mut config = Config::default();
        config.scanner.viable_spread_bps = dec!(5);
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.delta_neutral.funding_interval_hours = 5;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let raw = r#"
            [engine]
            tick_interval_secs = 10

            [risk]
            max_position_usd = 250
        "#;
        let config: Config = config::Config::builder()
            .add_source(config::File::from_str(raw, config::FileFormat::Toml))
            .build()
            .unwrap()
            .try_deserialize()
            .unwrap();

        assert_eq!(config.engine.tick_interval_secs, 10);
        assert_eq!(config.engine.monitor_interval_secs, 300);
        assert_eq!(config.risk.max_position_usd, dec!(250));
        assert_eq!(config.risk.max_total_exposure_usd, dec!(5000));
        assert_eq!(config.scanner.token, "BNB");
    }
}
