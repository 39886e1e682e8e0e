//! Cross-venue arbitrage execution.
//!
//! Buys the token on the cheaper venue and sells it on the dearer one. A leg
//! goes on-chain only when its venue can swap and the owner has a signer;
//! otherwise it is simulated at the quoted price.

use async_trait::async_trait;
use rust_decimal::Decimal;
use serde::Serialize;
use std::sync::Arc;
use tracing::{info, instrument, warn};

use super::legs::{swap_leg, LegFill};
use super::scanner::{ArbOpportunity, OpportunityScanner};
use crate::error::Result;
use crate::ledger::{NewTrade, TradeKind, TradeLog};
use crate::utils::decimal::{safe_div, usd};
use crate::venue::{SignerRegistry, VenueRegistry};

/// Details of an executed buy/sell pair.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ArbExecution {
    pub opportunity_id: String,
    pub token: String,
    pub buy_venue: String,
    pub sell_venue: String,
    pub unit_amount: Decimal,
    /// Realized buy price (quote when simulated)
    pub buy_price: Decimal,
    pub sell_price: Decimal,
    pub profit_usd: Decimal,
    pub spread_bps: Decimal,
    pub buy_tx_ref: String,
    pub sell_tx_ref: String,
    pub buy_simulated: bool,
    pub sell_simulated: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ArbOutcome {
    pub success: bool,
    pub message: String,
    pub execution: Option<ArbExecution>,
}

impl ArbOutcome {
    fn failed(message: impl Into<String>) -> Self {
        Self {
            success: false,
            message: message.into(),
            execution: None,
        }
    }

    pub fn profit_usd(&self) -> Option<Decimal> {
        self.execution.as_ref().map(|e| e.profit_usd)
    }
}

/// Scan-and-execute seam used by the session scheduler.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ArbRunner: Send + Sync {
    /// Fresh opportunities for the default token, widest spread first.
    async fn scan(&self) -> Vec<ArbOpportunity>;

    /// Execute one already-scanned opportunity without re-scanning.
    async fn execute_opportunity(&self, owner: &str, opportunity: &ArbOpportunity) -> Result<ArbOutcome>;
}

pub struct ArbitrageExecutor {
    scanner: Arc<OpportunityScanner>,
    venues: VenueRegistry,
    signers: Arc<SignerRegistry>,
    trades: Arc<TradeLog>,
}

impl ArbitrageExecutor {
    pub fn new(
        scanner: Arc<OpportunityScanner>,
        venues: VenueRegistry,
        signers: Arc<SignerRegistry>,
        trades: Arc<TradeLog>,
    ) -> Self {
        Self {
            scanner,
            venues,
            signers,
            trades,
        }
    }

    /// Re-scan and execute the requested (or best) opportunity whose spread
    /// exceeds `max_slippage_bps`.
    #[instrument(skip(self))]
    pub async fn execute(
        &self,
        owner: &str,
        opportunity_id: Option<&str>,
        max_slippage_bps: Decimal,
    ) -> Result<ArbOutcome> {
        let opportunities = self.scanner.scan_default().await;
        let best_spread = opportunities.first().map(|o| o.spread_bps);

        let qualifying: Vec<&ArbOpportunity> = opportunities
            .iter()
            .filter(|o| o.spread_bps > max_slippage_bps)
            .collect();

        let Some(top) = qualifying.first() else {
            let message = match best_spread {
                Some(best) => format!(
                    "No arbitrage opportunity exceeds {} bps slippage. Best available spread: {} bps.",
                    max_slippage_bps.normalize(),
                    best.round_dp(2)
                ),
                None => "No arbitrage opportunities found.".to_string(),
            };
            info!(%owner, "{}", message);
            return Ok(ArbOutcome::failed(message));
        };

        let target = opportunity_id
            .and_then(|id| qualifying.iter().find(|o| o.id.eq_ignore_ascii_case(id)))
            .unwrap_or(top);
        if let Some(id) = opportunity_id {
            if !target.id.eq_ignore_ascii_case(id) {
                warn!(%owner, requested = %id, using = %target.id, "Requested opportunity not available");
            }
        }

        self.execute_opportunity(owner, target).await
    }

    /// Execute both legs of `opportunity` and log them.
    #[instrument(skip(self, opportunity), fields(id = %opportunity.id))]
    pub async fn execute_opportunity(&self, owner: &str, opportunity: &ArbOpportunity) -> Result<ArbOutcome> {
        let buy_venue = self.venues.require(&opportunity.buy_venue)?;
        let sell_venue = self.venues.require(&opportunity.sell_venue)?;
        let signer = self.signers.get(owner);
        let unit = opportunity.probe_amount;
        let token = &opportunity.token;
        let quote = &opportunity.quote_token;

        // Buy leg: spend quote tokens for one unit at the cheap venue.
        let spend = opportunity.buy_price * unit;
        let buy = match swap_leg(
            &buy_venue,
            signer.as_ref(),
            quote,
            token,
            spend,
            safe_div(Decimal::ONE, opportunity.buy_price),
            "arb_buy",
        )
        .await
        {
            Ok(fill) => fill,
            Err(reason) => {
                return Ok(ArbOutcome::failed(format!(
                    "Buy leg on {} failed: {}",
                    opportunity.buy_venue, reason
                )))
            }
        };
        let buy_price = if buy.simulated {
            opportunity.buy_price
        } else {
            buy.inverse_price()
        };
        self.log_leg(owner, &opportunity.buy_venue, TradeKind::ArbBuy, quote, token, &buy, buy_price)?;

        // Sell leg: sell what was bought at the expensive venue.
        let sell_amount = if buy.simulated { unit } else { buy.amount_out };
        let sell = match swap_leg(
            &sell_venue,
            signer.as_ref(),
            token,
            quote,
            sell_amount,
            opportunity.sell_price,
            "arb_sell",
        )
        .await
        {
            Ok(fill) => fill,
            Err(reason) => {
                return Ok(ArbOutcome::failed(format!(
                    "Sell leg on {} failed after buying {} {}: {}",
                    opportunity.sell_venue, sell_amount, token, reason
                )))
            }
        };
        let sell_price = if sell.simulated {
            opportunity.sell_price
        } else {
            sell.price()
        };
        self.log_leg(owner, &opportunity.sell_venue, TradeKind::ArbSell, token, quote, &sell, sell_price)?;

        // Priced on the filled amount, not the quoted unit.
        let profit_usd = (sell_price - buy_price) * sell_amount;
        info!(
            %owner,
            buy_venue = %opportunity.buy_venue,
            sell_venue = %opportunity.sell_venue,
            %buy_price,
            %sell_price,
            profit = %profit_usd,
            "Arbitrage executed"
        );

        let execution = ArbExecution {
            opportunity_id: opportunity.id.clone(),
            token: token.clone(),
            buy_venue: opportunity.buy_venue.clone(),
            sell_venue: opportunity.sell_venue.clone(),
            unit_amount: sell_amount,
            buy_price,
            sell_price,
            profit_usd,
            spread_bps: opportunity.spread_bps,
            buy_tx_ref: buy.tx_ref,
            sell_tx_ref: sell.tx_ref,
            buy_simulated: buy.simulated,
            sell_simulated: sell.simulated,
        };
        Ok(ArbOutcome {
            success: true,
            message: format!(
                "Bought {} {} on {} @ ${} and sold on {} @ ${}. Spread {} bps, profit ${}.",
                sell_amount.round_dp(8),
                token,
                execution.buy_venue,
                buy_price.round_dp(4),
                execution.sell_venue,
                sell_price.round_dp(4),
                opportunity.spread_bps.round_dp(2),
                usd(profit_usd)
            ),
            execution: Some(execution),
        })
    }

    #[allow(clippy::too_many_arguments)]
    fn log_leg(
        &self,
        owner: &str,
        venue: &str,
        kind: TradeKind,
        from: &str,
        to: &str,
        fill: &LegFill,
        token_price: Decimal,
    ) -> Result<()> {
        self.trades.append(
            NewTrade::new(owner, venue, kind, fill.tx_ref.clone())
                .from(from, fill.amount_in)
                .to(to, Some(fill.amount_out))
                .price(token_price),
        )?;
        Ok(())
    }
}

#[async_trait]
impl ArbRunner for ArbitrageExecutor {
    async fn scan(&self) -> Vec<ArbOpportunity> {
        self.scanner.scan_default().await
    }

    async fn execute_opportunity(&self, owner: &str, opportunity: &ArbOpportunity) -> Result<ArbOutcome> {
        ArbitrageExecutor::execute_opportunity(self, owner, opportunity).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ScannerConfig;
    use crate::persistence::Store;
    use crate::venue::{Capability, PaperChain, PaperVenue};
    use rust_decimal_macros::dec;

    struct Fixture {
        executor: ArbitrageExecutor,
        trades: Arc<TradeLog>,
        signers: Arc<SignerRegistry>,
        pancake: Arc<PaperVenue>,
        thena: Arc<PaperVenue>,
    }

    fn fixture(thena_price: Decimal) -> Fixture {
        let pancake = Arc::new(
            PaperVenue::new("PancakeSwap")
                .with_capabilities([Capability::Quote, Capability::Swap])
                .with_quote("BNB", "USDT", dec!(600)),
        );
        let thena = Arc::new(
            PaperVenue::new("Thena")
                .with_capabilities([Capability::Quote, Capability::Swap])
                .with_quote("BNB", "USDT", thena_price),
        );
        let venues = VenueRegistry::new().with(pancake.clone()).with(thena.clone());
        let store = Arc::new(Store::new(":memory:").unwrap());
        let trades = Arc::new(TradeLog::new(store));
        let signers = Arc::new(SignerRegistry::new());
        let scanner = Arc::new(OpportunityScanner::new(venues.clone(), ScannerConfig::default()));
        Fixture {
            executor: ArbitrageExecutor::new(scanner, venues, signers.clone(), trades.clone()),
            trades,
            signers,
            pancake,
            thena,
        }
    }

    #[tokio::test]
    async fn test_simulated_execution_logs_both_legs() {
        let fx = fixture(dec!(602));
        let outcome = fx.executor.execute("alice", None, dec!(20)).await.unwrap();

        assert!(outcome.success, "{}", outcome.message);
        let exec = outcome.execution.unwrap();
        assert_eq!(exec.buy_venue, "PancakeSwap");
        assert_eq!(exec.sell_venue, "Thena");
        assert_eq!(exec.profit_usd, dec!(2));
        assert!(exec.buy_simulated && exec.sell_simulated);

        let history = fx.trades.history("alice", None, None).unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].kind, TradeKind::ArbSell);
        assert_eq!(history[1].kind, TradeKind::ArbBuy);
    }

    #[tokio::test]
    async fn test_spread_below_slippage_reports_best() {
        let fx = fixture(dec!(602));
        let outcome = fx.executor.execute("alice", None, dec!(50)).await.unwrap();

        assert!(!outcome.success);
        assert!(outcome.message.contains("33.33 bps"), "{}", outcome.message);
        assert!(fx.trades.history("alice", None, None).unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_real_legs_use_executed_prices() {
        let fx = fixture(dec!(602));
        fx.signers.activate("alice", Arc::new(PaperChain::new("0xalice")));
        fx.thena.set_fill_price("BNB", "USDT", dec!(598));

        let outcome = fx
            .executor
            .execute("alice", Some("arb_bnb_pancakeswap_thena"), dec!(10))
            .await
            .unwrap();

        let exec = outcome.execution.unwrap();
        assert!(!exec.buy_simulated && !exec.sell_simulated);
        assert_eq!(exec.buy_price.round_dp(8), dec!(600));
        assert_eq!(exec.sell_price.round_dp(8), dec!(598));
        assert_eq!(exec.profit_usd.round_dp(8), dec!(-2));
        assert!(exec.buy_tx_ref.starts_with("0xpaper"));
    }

    #[tokio::test]
    async fn test_short_buy_fill_prices_profit_on_amount_sold() {
        let fx = fixture(dec!(602));
        fx.signers.activate("alice", Arc::new(PaperChain::new("0xalice")));
        // 600 USDT buys 0.9 BNB instead of 1
        fx.pancake.set_fill_price("USDT", "BNB", dec!(0.0015));

        let outcome = fx.executor.execute("alice", None, dec!(10)).await.unwrap();
        let exec = outcome.execution.unwrap();
        assert_eq!(exec.unit_amount, dec!(0.9));
        // Received 0.9 × 602 = 541.8 USDT for 600 spent
        assert_eq!(exec.profit_usd.round_dp(8), dec!(-58.2));

        let sell = &fx.trades.history("alice", None, Some(TradeKind::ArbSell)).unwrap()[0];
        assert_eq!(sell.from_amount, Some(dec!(0.9)));
    }

    #[tokio::test]
    async fn test_failed_sell_leg_is_reported() {
        let fx = fixture(dec!(602));
        fx.signers.activate("alice", Arc::new(PaperChain::new("0xalice")));
        fx.thena.fail(Capability::Swap);

        let outcome = fx.executor.execute("alice", None, dec!(10)).await.unwrap();
        assert!(!outcome.success);
        assert!(outcome.message.starts_with("Sell leg on Thena failed"));
        // The completed buy is still on record
        assert_eq!(fx.trades.history("alice", None, Some(TradeKind::ArbBuy)).unwrap().len(), 1);
    }
}
