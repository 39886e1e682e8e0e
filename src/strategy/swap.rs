//! Direct token swaps through a venue adapter.

use rust_decimal::Decimal;
use serde::Serialize;
use std::sync::Arc;
use tracing::{info, instrument, warn};

use super::outcome::StrategyOutcome;
use crate::error::{EngineError, Result};
use crate::ledger::{NewTrade, TradeKind, TradeLog};
use crate::utils::new_id;
use crate::venue::{Capability, SignerRegistry, VenueAdapter, VenueRegistry};

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SwapDetails {
    pub venue: String,
    pub from_token: String,
    pub to_token: String,
    pub amount_in: Decimal,
    pub amount_out: Option<Decimal>,
    /// Price of one `from_token` in `to_token`, when the venue reports it
    pub effective_price: Option<Decimal>,
}

pub struct TokenSwapper {
    venues: VenueRegistry,
    signers: Arc<SignerRegistry>,
    trades: Arc<TradeLog>,
}

impl TokenSwapper {
    pub fn new(venues: VenueRegistry, signers: Arc<SignerRegistry>, trades: Arc<TradeLog>) -> Self {
        Self {
            venues,
            signers,
            trades,
        }
    }

    /// The venue a swap would execute on: `venue` if it can swap, else the
    /// first Swap-capable venue. `None` when no venue can swap.
    pub fn route(&self, venue: Option<&str>) -> Result<Option<Arc<dyn VenueAdapter>>> {
        match venue {
            Some(name) => {
                let v = self.venues.require(name)?;
                if !v.supports(Capability::Swap) {
                    return Err(EngineError::Unsupported {
                        venue: v.name().to_string(),
                        capability: Capability::Swap,
                    });
                }
                Ok(Some(v))
            }
            None => Ok(self.venues.first_with(Capability::Swap)),
        }
    }

    /// Swap through `venue`, or the first Swap-capable venue.
    ///
    /// Requires an active signer. The trade is logged whether or not the
    /// venue accepted it.
    #[instrument(skip(self))]
    pub async fn swap(
        &self,
        owner: &str,
        from_token: &str,
        to_token: &str,
        amount: Decimal,
        venue: Option<&str>,
    ) -> Result<StrategyOutcome<SwapDetails>> {
        if amount <= Decimal::ZERO {
            return Err(EngineError::Validation(format!(
                "swap amount must be positive, got {}",
                amount
            )));
        }
        let from = from_token.to_uppercase();
        let to = to_token.to_uppercase();
        if from == to {
            return Err(EngineError::Validation(format!("cannot swap {} for itself", from)));
        }

        let chain = self.signers.require(owner)?;
        let Some(venue) = self.route(venue)? else {
            return Ok(StrategyOutcome::failed("No venue available for swaps."));
        };
        let venue_name = venue.name().to_string();

        let result = venue.swap(&from, &to, amount, chain.as_ref()).await;
        let (tx_ref, outcome_error, amount_out, price) = match result {
            Ok(tx) if tx.success => (tx.tx_ref, None, tx.amount_out, tx.executed_price),
            Ok(tx) => (
                tx.tx_ref,
                Some(tx.error.unwrap_or_else(|| "transaction reverted".to_string())),
                None,
                None,
            ),
            Err(e) => (new_id("swap_failed"), Some(e.to_string()), None, None),
        };

        let mut trade = NewTrade::new(owner, &venue_name, TradeKind::Swap, tx_ref.clone())
            .from(&from, amount)
            .to(&to, amount_out);
        if let Some(price) = price {
            trade = trade.price(price);
        }
        self.trades.append(trade)?;

        if let Some(error) = outcome_error {
            warn!(%owner, venue = %venue_name, %error, "Swap failed");
            return Ok(StrategyOutcome::failed(format!("Swap failed: {}", error)).tx(tx_ref));
        }

        info!(%owner, venue = %venue_name, %from, %to, %amount, out = ?amount_out, "Swap executed");
        Ok(StrategyOutcome::succeeded(
            format!("Swapped {} {} → {} via {}", amount, from, to, venue_name),
            SwapDetails {
                venue: venue_name,
                from_token: from,
                to_token: to,
                amount_in: amount,
                amount_out,
                effective_price: price,
            },
        )
        .tx(tx_ref))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::persistence::Store;
    use crate::venue::{PaperChain, PaperVenue};
    use rust_decimal_macros::dec;

    fn swapper() -> (TokenSwapper, Arc<TradeLog>, Arc<PaperChain>) {
        let venues = VenueRegistry::new()
            .with(Arc::new(
                PaperVenue::new("Venus").with_capabilities([Capability::Supply]),
            ))
            .with(Arc::new(
                PaperVenue::new("PancakeSwap")
                    .with_capabilities([Capability::Swap, Capability::Quote])
                    .with_quote("BNB", "USDT", dec!(600)),
            ));
        let trades = Arc::new(TradeLog::new(Arc::new(Store::new(":memory:").unwrap())));
        let signers = Arc::new(SignerRegistry::new());
        let chain = Arc::new(PaperChain::new("0xalice"));
        signers.activate("alice", chain.clone());
        (TokenSwapper::new(venues, signers, trades.clone()), trades, chain)
    }

    #[tokio::test]
    async fn test_swap_picks_first_swap_venue() {
        let (swapper, trades, _) = swapper();
        let outcome = swapper.swap("alice", "bnb", "usdt", dec!(2), None).await.unwrap();

        assert!(outcome.success);
        assert_eq!(outcome.message, "Swapped 2 BNB → USDT via PancakeSwap");
        let details = outcome.details.unwrap();
        assert_eq!(details.amount_out, Some(dec!(1200)));
        assert_eq!(details.effective_price, Some(dec!(600)));

        let logged = trades.history("alice", None, Some(TradeKind::Swap)).unwrap();
        assert_eq!(logged[0].settlement_tx_ref, outcome.tx_ref.unwrap());
    }

    #[tokio::test]
    async fn test_reverted_swap_is_still_logged() {
        let (swapper, trades, chain) = swapper();
        chain.revert_next();

        let outcome = swapper.swap("alice", "BNB", "USDT", dec!(1), None).await.unwrap();
        assert!(!outcome.success);
        assert_eq!(outcome.message, "Swap failed: swap reverted");
        assert_eq!(trades.history("alice", None, None).unwrap().len(), 1);
    }

    #[test]
    fn test_route_resolves_default_venue() {
        let (swapper, _, _) = swapper();
        assert_eq!(swapper.route(None).unwrap().unwrap().name(), "PancakeSwap");
        assert_eq!(swapper.route(Some("pancakeswap")).unwrap().unwrap().name(), "PancakeSwap");
        assert!(matches!(swapper.route(Some("Venus")), Err(EngineError::Unsupported { .. })));
        assert!(matches!(swapper.route(Some("Uniswap")), Err(EngineError::NotFound { .. })));
    }

    #[tokio::test]
    async fn test_swap_preconditions() {
        let (swapper, _, _) = swapper();
        assert!(matches!(
            swapper.swap("bob", "BNB", "USDT", dec!(1), None).await,
            Err(EngineError::NoSigner { .. })
        ));
        assert!(matches!(
            swapper.swap("alice", "BNB", "USDT", dec!(1), Some("Venus")).await,
            Err(EngineError::Unsupported { .. })
        ));
        assert!(matches!(
            swapper.swap("alice", "BNB", "bnb", dec!(1), None).await,
            Err(EngineError::Validation(_))
        ));
    }
}
