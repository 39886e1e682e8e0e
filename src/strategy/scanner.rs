//! Cross-venue spread scanner for arbitrage opportunities.

use futures_util::future::join_all;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use tracing::{debug, info, instrument, warn};

use crate::config::ScannerConfig;
use crate::utils::decimal::spread_bps;
use crate::venue::{Capability, VenueRegistry};

/// A price discrepancy between two venues. Never persisted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArbOpportunity {
    /// Stable across scans: `arb_<token>_<buy>_<sell>`, lower-cased
    pub id: String,
    pub token: String,
    pub quote_token: String,
    pub buy_venue: String,
    pub buy_price: Decimal,
    pub sell_venue: String,
    pub sell_price: Decimal,
    pub spread_bps: Decimal,
    /// Profit on the probe amount, before fees
    pub estimated_profit_usd: Decimal,
    pub viable: bool,
    /// Token amount the quotes were taken for
    pub probe_amount: Decimal,
}

pub fn opportunity_id(token: &str, buy_venue: &str, sell_venue: &str) -> String {
    format!("arb_{}_{}_{}", token, buy_venue, sell_venue)
        .to_lowercase()
        .replace(' ', "-")
}

/// Queries every quoting venue and reports pairwise spreads.
pub struct OpportunityScanner {
    venues: VenueRegistry,
    config: ScannerConfig,
}

impl OpportunityScanner {
    pub fn new(venues: VenueRegistry, config: ScannerConfig) -> Self {
        Self { venues, config }
    }

    pub fn config(&self) -> &ScannerConfig {
        &self.config
    }

    /// Scan the configured default token, quote token and probe amount.
    pub async fn scan_default(&self) -> Vec<ArbOpportunity> {
        self.scan(&self.config.token, &self.config.quote_token, self.config.probe_amount)
            .await
    }

    /// Quote `probe_amount` of `token` on every Quote-capable venue and return
    /// opportunities sorted by spread, widest first.
    #[instrument(skip(self))]
    pub async fn scan(&self, token: &str, quote_token: &str, probe_amount: Decimal) -> Vec<ArbOpportunity> {
        let quoting = self.venues.with_capability(Capability::Quote);
        let results = join_all(quoting.iter().map(|venue| async move {
            (
                venue.name().to_string(),
                venue.quote(token, quote_token, probe_amount).await,
            )
        }))
        .await;

        let mut seen = HashSet::new();
        let mut prices: Vec<(String, Decimal)> = Vec::with_capacity(results.len());
        for (venue, result) in results {
            match result {
                Ok(quote) if quote.effective_price > Decimal::ZERO => {
                    if seen.insert(venue.to_lowercase()) {
                        prices.push((venue, quote.effective_price));
                    }
                }
                Ok(quote) => {
                    warn!(%venue, price = %quote.effective_price, "Ignoring non-positive quote")
                }
                Err(e) => warn!(%venue, error = %e, "Quote failed"),
            }
        }

        if prices.len() < 2 {
            debug!(usable = prices.len(), "Not enough quotes to compare");
            return Vec::new();
        }

        // Ascending by price, then name, so each pair is (buy, sell).
        prices.sort_by(|a, b| a.1.cmp(&b.1).then_with(|| a.0.cmp(&b.0)));

        let mut opportunities = Vec::new();
        for (i, (buy_venue, buy_price)) in prices.iter().enumerate() {
            for (sell_venue, sell_price) in &prices[i + 1..] {
                let spread = spread_bps(*buy_price, *sell_price);
                if spread <= self.config.min_spread_bps {
                    continue;
                }
                opportunities.push(ArbOpportunity {
                    id: opportunity_id(token, buy_venue, sell_venue),
                    token: token.to_uppercase(),
                    quote_token: quote_token.to_uppercase(),
                    buy_venue: buy_venue.clone(),
                    buy_price: *buy_price,
                    sell_venue: sell_venue.clone(),
                    sell_price: *sell_price,
                    spread_bps: spread,
                    estimated_profit_usd: (*sell_price - *buy_price) * probe_amount,
                    viable: spread > self.config.viable_spread_bps,
                    probe_amount,
                });
            }
        }

        opportunities.sort_by(|a, b| b.spread_bps.cmp(&a.spread_bps).then_with(|| a.id.cmp(&b.id)));

        info!(
            %token,
            quotes = prices.len(),
            opportunities = opportunities.len(),
            "Arbitrage scan complete"
        );
        opportunities
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::venue::PaperVenue;
    use rust_decimal_macros::dec;
    use std::sync::Arc;

    fn dex(name: &str, price: Decimal) -> Arc<PaperVenue> {
        Arc::new(
            PaperVenue::new(name)
                .with_capabilities([Capability::Quote, Capability::Swap])
                .with_quote("BNB", "USDT", price),
        )
    }

    fn scanner(venues: Vec<Arc<PaperVenue>>) -> OpportunityScanner {
        let mut registry = VenueRegistry::new();
        for v in venues {
            registry.register(v);
        }
        OpportunityScanner::new(registry, ScannerConfig::default())
    }

    #[tokio::test]
    async fn test_sub_threshold_spread_is_ignored() {
        let scanner = scanner(vec![dex("PancakeSwap", dec!(600.00)), dex("Thena", dec!(600.50))]);
        assert!(scanner.scan_default().await.is_empty());
    }

    #[tokio::test]
    async fn test_viable_opportunity() {
        let scanner = scanner(vec![dex("PancakeSwap", dec!(600.00)), dex("Thena", dec!(602.00))]);
        let opps = scanner.scan("BNB", "USDT", dec!(3)).await;

        assert_eq!(opps.len(), 1);
        let opp = &opps[0];
        assert_eq!(opp.buy_venue, "PancakeSwap");
        assert_eq!(opp.sell_venue, "Thena");
        assert_eq!(opp.spread_bps.round_dp(2), dec!(33.33));
        assert!(opp.viable);
        assert_eq!(opp.estimated_profit_usd, dec!(6));
        assert_eq!(opp.id, "arb_bnb_pancakeswap_thena");
    }

    #[tokio::test]
    async fn test_result_independent_of_quote_order() {
        let forward = scanner(vec![
            dex("PancakeSwap", dec!(600)),
            dex("Thena", dec!(602)),
            dex("Biswap", dec!(604)),
        ])
        .scan_default()
        .await;
        let reversed = scanner(vec![
            dex("Biswap", dec!(604)),
            dex("Thena", dec!(602)),
            dex("PancakeSwap", dec!(600)),
        ])
        .scan_default()
        .await;

        assert_eq!(forward, reversed);
        assert_eq!(forward.len(), 3);
        assert_eq!(forward[0].buy_venue, "PancakeSwap");
        assert_eq!(forward[0].sell_venue, "Biswap");

        let pairs: HashSet<(String, String)> = forward
            .iter()
            .map(|o| {
                let mut pair = [o.buy_venue.clone(), o.sell_venue.clone()];
                pair.sort();
                (pair[0].clone(), pair[1].clone())
            })
            .collect();
        assert_eq!(pairs.len(), forward.len());
    }

    #[tokio::test]
    async fn test_failed_and_non_positive_quotes_are_skipped() {
        let broken = dex("Broken", dec!(500));
        broken.fail(Capability::Quote);
        let scanner = scanner(vec![
            dex("PancakeSwap", dec!(600)),
            broken,
            dex("Zero", Decimal::ZERO),
            dex("Thena", dec!(602)),
        ]);

        let opps = scanner.scan_default().await;
        assert_eq!(opps.len(), 1);
        assert_eq!(opps[0].buy_venue, "PancakeSwap");
    }

    #[tokio::test]
    async fn test_single_quote_yields_nothing() {
        let scanner = scanner(vec![dex("PancakeSwap", dec!(600))]);
        assert!(scanner.scan_default().await.is_empty());
    }
}
