//! Yield deposits and APY-driven rotation.
//!
//! Listings come from every Apy-capable venue and are cached per token. A
//! deposit goes on-chain when the chosen venue declares Supply; otherwise it
//! is recorded as simulated so the position is still tracked.

use futures_util::future::join_all;
use rust_decimal::Decimal;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, instrument, warn};

use super::legs::simulated_ref;
use super::outcome::StrategyOutcome;
use crate::config::YieldOptimizerConfig;
use crate::error::{EngineError, Result};
use crate::ledger::{NewPosition, NewTrade, PositionKind, PositionLedger, TradeKind, TradeLog};
use crate::market::{PriceOracle, TtlCache, YieldListing};
use crate::utils::decimal::percent_points_to_bps;
use crate::venue::{Capability, ChainClient, SignerRegistry, VenueRegistry};

/// Cached APY listings across venues.
pub struct YieldAggregator {
    venues: VenueRegistry,
    cache: TtlCache<String, Vec<YieldListing>>,
}

impl YieldAggregator {
    pub fn new(venues: VenueRegistry, ttl: Duration) -> Self {
        Self {
            venues,
            cache: TtlCache::new(ttl),
        }
    }

    /// Listings for `token`, highest APY first.
    pub async fn listings(&self, token: &str) -> Vec<YieldListing> {
        let token = token.to_uppercase();
        if let Some(cached) = self.cache.get(&token) {
            return cached;
        }

        let venues = self.venues.with_capability(Capability::Apy);
        let results = join_all(venues.iter().map(|venue| {
            let token = token.clone();
            async move { (venue, venue.apy(&token).await) }
        }))
        .await;

        let mut listings: Vec<YieldListing> = results
            .into_iter()
            .filter_map(|(venue, result)| match result {
                Ok(apy) if apy > Decimal::ZERO => Some(YieldListing {
                    venue: venue.name().to_string(),
                    token: token.clone(),
                    apy,
                    simulated: !venue.supports(Capability::Supply),
                }),
                Ok(_) => None,
                Err(e) => {
                    debug!(venue = %venue.name(), %token, error = %e, "No APY listing");
                    None
                }
            })
            .collect();
        listings.sort_by(|a, b| b.apy.cmp(&a.apy).then_with(|| a.venue.cmp(&b.venue)));

        self.cache.insert(token, listings.clone());
        listings
    }

    pub fn invalidate(&self, token: &str) {
        self.cache.invalidate(&token.to_uppercase());
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DepositDetails {
    pub venue: String,
    pub token: String,
    pub amount: Decimal,
    pub apy: Decimal,
    pub simulated: bool,
    /// Runner-up listings, best first
    pub alternatives: Vec<YieldListing>,
}

/// A proposed move of a yield position to a better venue.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RotationPlan {
    pub position_id: String,
    pub current_venue: String,
    pub current_apy: Decimal,
    pub target_venue: String,
    pub target_apy: Decimal,
    pub improvement_bps: Decimal,
}

pub struct YieldOptimizer {
    aggregator: YieldAggregator,
    venues: VenueRegistry,
    signers: Arc<SignerRegistry>,
    positions: Arc<PositionLedger>,
    trades: Arc<TradeLog>,
    prices: Arc<dyn PriceOracle>,
    config: YieldOptimizerConfig,
}

impl YieldOptimizer {
    pub fn new(
        venues: VenueRegistry,
        signers: Arc<SignerRegistry>,
        positions: Arc<PositionLedger>,
        trades: Arc<TradeLog>,
        prices: Arc<dyn PriceOracle>,
        config: YieldOptimizerConfig,
    ) -> Self {
        Self {
            aggregator: YieldAggregator::new(
                venues.clone(),
                Duration::from_secs(config.apy_cache_ttl_secs),
            ),
            venues,
            signers,
            positions,
            trades,
            prices,
            config,
        }
    }

    pub fn config(&self) -> &YieldOptimizerConfig {
        &self.config
    }

    pub async fn listings(&self, token: &str) -> Vec<YieldListing> {
        self.aggregator.listings(token).await
    }

    /// Current APY for `token` at `venue`, from the listing cache.
    pub async fn current_apy(&self, venue: &str, token: &str) -> Option<Decimal> {
        self.listings(token)
            .await
            .into_iter()
            .find(|l| l.venue.eq_ignore_ascii_case(venue))
            .map(|l| l.apy)
    }

    /// Deposit into the best listing, or `forced_venue` when it is listed.
    #[instrument(skip(self))]
    pub async fn deposit(
        &self,
        owner: &str,
        token: &str,
        amount: Decimal,
        forced_venue: Option<&str>,
    ) -> Result<StrategyOutcome<DepositDetails>> {
        if amount <= Decimal::ZERO {
            return Err(EngineError::Validation(format!(
                "deposit amount must be positive, got {}",
                amount
            )));
        }
        let token = token.to_uppercase();
        let chain = self.signers.require(owner)?;

        let listings = self.listings(&token).await;
        let Some(first) = listings.first() else {
            return Ok(StrategyOutcome::failed(format!(
                "No yield opportunities found for {}",
                token
            )));
        };
        let target = match forced_venue {
            Some(name) => match listings.iter().find(|l| l.venue.eq_ignore_ascii_case(name)) {
                Some(listing) => listing.clone(),
                None => {
                    warn!(%owner, requested = %name, "Requested venue has no listing");
                    return Ok(StrategyOutcome::failed(format!(
                        "{} has no {} listing.",
                        name, token
                    )));
                }
            },
            None => first.clone(),
        };
        let alternatives: Vec<YieldListing> = listings
            .iter()
            .filter(|l| l.venue != target.venue)
            .take(self.config.max_alternatives)
            .cloned()
            .collect();

        let venue = self.venues.require(&target.venue)?;

        // Balance comes from the target venue, or any venue that can report one.
        let balance_source = if venue.supports(Capability::Balance) {
            Some(venue.clone())
        } else {
            self.venues.first_with(Capability::Balance)
        };
        if let Some(source) = balance_source {
            let available = match source.balance(&token, chain.as_ref()).await {
                Ok(balance) => balance,
                Err(e) => {
                    warn!(%owner, venue = %source.name(), error = %e, "Balance lookup failed");
                    return Ok(StrategyOutcome::failed(format!(
                        "Could not read {} balance: {}",
                        token, e
                    )));
                }
            };
            if available < amount {
                return Err(EngineError::InsufficientBalance {
                    token,
                    available,
                    required: amount,
                });
            }
        }

        let (tx_ref, simulated) = if venue.supports(Capability::Supply) {
            match venue.supply(&token, amount, chain.as_ref()).await {
                Ok(tx) if tx.success => (tx.tx_ref, false),
                Ok(tx) => {
                    let reason = tx.error.unwrap_or_else(|| "transaction reverted".to_string());
                    return Ok(StrategyOutcome::failed(format!(
                        "{} deposit failed: {}",
                        target.venue, reason
                    )));
                }
                Err(e) => {
                    return Ok(StrategyOutcome::failed(format!(
                        "{} deposit failed: {}",
                        target.venue, e
                    )))
                }
            }
        } else {
            info!(venue = %target.venue, %token, %amount, "Simulated deposit, venue cannot supply");
            (simulated_ref("deposit"), true)
        };

        let price = self.price_or_none(&token).await;
        let mut spec = NewPosition::new(owner, PositionKind::Yield, &target.venue, &token, amount)
            .entry_apy(target.apy)
            .settlement(tx_ref.clone())
            .meta("simulated", simulated);
        if let Some(price) = price {
            spec = spec.entry_price(price).current_value(amount * price);
        }
        let position = self.positions.open(spec)?;

        let mut trade = NewTrade::new(owner, &target.venue, TradeKind::Deposit, tx_ref.clone())
            .to(&token, Some(amount))
            .position(&position.id);
        if let Some(price) = price {
            trade = trade.price(price);
        }
        self.trades.append(trade)?;

        info!(
            %owner,
            position = %position.id,
            venue = %target.venue,
            %token,
            %amount,
            apy = %target.apy,
            simulated,
            "Yield deposit recorded"
        );

        let message = format!(
            "Deposited {} {} into {} at {}% APY{}",
            amount,
            token,
            target.venue,
            target.apy.round_dp(2),
            if simulated { " (simulated)" } else { "" }
        );
        Ok(StrategyOutcome::succeeded(
            message,
            DepositDetails {
                venue: target.venue,
                token,
                amount,
                apy: target.apy,
                simulated,
                alternatives,
            },
        )
        .position(position.id)
        .tx(tx_ref))
    }

    /// The rotation `rotate` would perform, if any.
    ///
    /// `None` when the position is missing, closed, not a yield position, or
    /// the best other venue improves on its entry APY by less than
    /// `min_improvement_bps`.
    pub async fn rotation_plan(
        &self,
        position_id: &str,
        min_improvement_bps: Decimal,
    ) -> Result<Option<RotationPlan>> {
        let position = match self.positions.get(position_id) {
            Ok(p) => p,
            Err(EngineError::NotFound { .. }) => return Ok(None),
            Err(e) => return Err(e),
        };
        if !position.is_open() || position.kind != PositionKind::Yield {
            return Ok(None);
        }

        let listings = self.listings(&position.token).await;
        let Some(best) = listings
            .iter()
            .find(|l| !l.venue.eq_ignore_ascii_case(&position.venue))
        else {
            return Ok(None);
        };

        let current_apy = position.entry_apy.unwrap_or(Decimal::ZERO);
        let improvement_bps = percent_points_to_bps(best.apy - current_apy);
        if improvement_bps < min_improvement_bps {
            debug!(position = %position_id, %improvement_bps, "Rotation below threshold");
            return Ok(None);
        }

        Ok(Some(RotationPlan {
            position_id: position.id,
            current_venue: position.venue,
            current_apy,
            target_venue: best.venue.clone(),
            target_apy: best.apy,
            improvement_bps,
        }))
    }

    /// Withdraw a yield position and redeposit it at a better venue.
    #[instrument(skip(self))]
    pub async fn rotate(
        &self,
        owner: &str,
        position_id: &str,
        min_improvement_bps: Option<Decimal>,
    ) -> Result<StrategyOutcome<DepositDetails>> {
        let min = min_improvement_bps.unwrap_or(self.config.min_improvement_bps);
        let Some(plan) = self.rotation_plan(position_id, min).await? else {
            return Ok(StrategyOutcome::failed(
                "No profitable rotation found: current position is optimal or improvement below threshold",
            ));
        };

        // Held through the withdraw until the old position is closed.
        let (_claim, position) = match self.positions.claim(position_id) {
            Ok(claimed) => claimed,
            Err(EngineError::InvalidState(reason)) => {
                return Ok(StrategyOutcome::failed(format!("Cannot rotate: {}.", reason)))
            }
            Err(e) => return Err(e),
        };
        if position.owner_id != owner {
            return Ok(StrategyOutcome::failed("You do not own this position."));
        }
        let chain = self.signers.require(owner)?;

        let was_real = !position.meta_bool("simulated");
        let withdraw_ref = match self
            .withdraw(&position.venue, &position.token, position.amount, chain.as_ref(), was_real)
            .await
        {
            Ok(tx_ref) => tx_ref,
            Err(reason) => {
                return Ok(StrategyOutcome::failed(format!(
                    "Withdrawal from {} failed: {}",
                    position.venue, reason
                )))
            }
        };
        self.trades.append(
            NewTrade::new(owner, &position.venue, TradeKind::Withdraw, withdraw_ref.clone())
                .from(&position.token, position.amount)
                .position(&position.id),
        )?;
        self.positions.close(position_id, Some(&withdraw_ref))?;

        info!(
            %owner,
            position = %position_id,
            from = %plan.current_venue,
            to = %plan.target_venue,
            improvement_bps = %plan.improvement_bps,
            "Rotating yield position"
        );

        self.deposit(owner, &position.token, position.amount, Some(&plan.target_venue))
            .await
    }

    /// Withdraw for real when the venue can and the funds were really supplied.
    async fn withdraw(
        &self,
        venue_name: &str,
        token: &str,
        amount: Decimal,
        chain: &dyn ChainClient,
        was_real: bool,
    ) -> std::result::Result<String, String> {
        let venue = match self.venues.get(venue_name) {
            Some(v) if was_real && v.supports(Capability::Withdraw) => v,
            _ => return Ok(simulated_ref("withdraw")),
        };
        match venue.withdraw(token, amount, chain).await {
            Ok(tx) if tx.success => Ok(tx.tx_ref),
            Ok(tx) => Err(tx.error.unwrap_or_else(|| "transaction reverted".to_string())),
            Err(e) => Err(e.to_string()),
        }
    }

    async fn price_or_none(&self, token: &str) -> Option<Decimal> {
        match self.prices.price(token).await {
            Ok(p) if p.price_usd > Decimal::ZERO => Some(p.price_usd),
            Ok(_) => None,
            Err(e) => {
                debug!(%token, error = %e, "No USD price for deposit valuation");
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::PositionStatus;
    use crate::market::StaticMarketData;
    use crate::persistence::Store;
    use crate::venue::{PaperChain, PaperVenue};
    use rust_decimal_macros::dec;

    struct Fixture {
        optimizer: YieldOptimizer,
        venus: Arc<PaperVenue>,
        beefy: Arc<PaperVenue>,
        positions: Arc<PositionLedger>,
        trades: Arc<TradeLog>,
    }

    fn fixture() -> Fixture {
        let venus = Arc::new(
            PaperVenue::new("Venus")
                .with_capabilities([
                    Capability::Supply,
                    Capability::Withdraw,
                    Capability::Apy,
                    Capability::Balance,
                ])
                .with_apy("USDT", dec!(3.8))
                .with_balance("USDT", dec!(1000)),
        );
        // Listed but cannot execute: deposits are simulated
        let beefy = Arc::new(
            PaperVenue::new("Beefy")
                .with_capabilities([Capability::Apy])
                .with_apy("USDT", dec!(3.1)),
        );
        let venues = VenueRegistry::new().with(venus.clone()).with(beefy.clone());

        let store = Arc::new(Store::new(":memory:").unwrap());
        let positions = Arc::new(PositionLedger::new(store.clone()));
        let trades = Arc::new(TradeLog::new(store));
        let signers = Arc::new(SignerRegistry::new());
        signers.activate("alice", Arc::new(PaperChain::new("0xalice")));
        let market = Arc::new(StaticMarketData::new().with_price("USDT", dec!(1)));

        Fixture {
            optimizer: YieldOptimizer::new(
                venues,
                signers,
                positions.clone(),
                trades.clone(),
                market,
                YieldOptimizerConfig::default(),
            ),
            venus,
            beefy,
            positions,
            trades,
        }
    }

    #[tokio::test]
    async fn test_listings_sorted_and_cached() {
        let fx = fixture();
        let listings = fx.optimizer.listings("usdt").await;
        assert_eq!(listings.len(), 2);
        assert_eq!(listings[0].venue, "Venus");
        assert!(!listings[0].simulated);
        assert!(listings[1].simulated);

        fx.beefy.set_apy("USDT", dec!(9));
        assert_eq!(fx.optimizer.listings("USDT").await[0].venue, "Venus");

        fx.optimizer.aggregator.invalidate("USDT");
        assert_eq!(fx.optimizer.listings("USDT").await[0].venue, "Beefy");
    }

    #[tokio::test]
    async fn test_deposit_into_best_venue() {
        let fx = fixture();
        let outcome = fx.optimizer.deposit("alice", "USDT", dec!(250), None).await.unwrap();

        assert!(outcome.success, "{}", outcome.message);
        assert_eq!(outcome.message, "Deposited 250 USDT into Venus at 3.80% APY");
        let details = outcome.details.unwrap();
        assert_eq!(details.alternatives.len(), 1);
        assert_eq!(details.alternatives[0].venue, "Beefy");
        assert_eq!(fx.venus.balance_of("USDT"), dec!(750));

        let position = fx.positions.get(outcome.position_id.as_deref().unwrap()).unwrap();
        assert_eq!(position.entry_apy, Some(dec!(3.8)));
        assert_eq!(position.current_value_usd, Some(dec!(250)));
        assert!(!position.meta_bool("simulated"));

        let trades = fx.trades.history("alice", None, Some(TradeKind::Deposit)).unwrap();
        assert_eq!(trades[0].position_id.as_deref(), Some(position.id.as_str()));
    }

    #[tokio::test]
    async fn test_forced_venue_without_supply_is_simulated() {
        let fx = fixture();
        let outcome = fx
            .optimizer
            .deposit("alice", "USDT", dec!(100), Some("beefy"))
            .await
            .unwrap();
        let details = outcome.details.unwrap();
        assert_eq!(details.venue, "Beefy");
        assert!(details.simulated);
        assert!(outcome.tx_ref.unwrap().starts_with("sim_deposit_"));
        // Balance was checked against Venus but not spent
        assert_eq!(fx.venus.balance_of("USDT"), dec!(1000));
    }

    #[tokio::test]
    async fn test_forced_unlisted_venue_fails_without_deposit() {
        let fx = fixture();
        let outcome = fx
            .optimizer
            .deposit("alice", "USDT", dec!(100), Some("Aave"))
            .await
            .unwrap();
        assert!(!outcome.success);
        assert_eq!(outcome.message, "Aave has no USDT listing.");
        assert_eq!(fx.venus.balance_of("USDT"), dec!(1000));
        assert!(fx.positions.list("alice", None).unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_concurrent_rotations_withdraw_once() {
        let fx = fixture();
        let first = fx.optimizer.deposit("alice", "USDT", dec!(100), None).await.unwrap();
        let id = first.position_id.unwrap();
        fx.beefy.set_apy("USDT", dec!(5.0));
        fx.optimizer.aggregator.invalidate("USDT");

        let (a, b) = tokio::join!(
            fx.optimizer.rotate("alice", &id, None),
            fx.optimizer.rotate("alice", &id, None)
        );
        let (a, b) = (a.unwrap(), b.unwrap());
        assert!(a.success ^ b.success, "exactly one rotation succeeds");
        assert_eq!(fx.trades.history("alice", None, Some(TradeKind::Withdraw)).unwrap().len(), 1);
        assert_eq!(fx.positions.list("alice", Some(PositionStatus::Open)).unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_deposit_preconditions() {
        let fx = fixture();
        let shortfall = fx.optimizer.deposit("alice", "USDT", dec!(5000), None).await;
        match shortfall {
            Err(EngineError::InsufficientBalance { available, required, .. }) => {
                assert_eq!(available, dec!(1000));
                assert_eq!(required, dec!(5000));
            }
            other => panic!("expected insufficient balance, got {:?}", other.map(|o| o.message)),
        }

        assert!(matches!(
            fx.optimizer.deposit("bob", "USDT", dec!(10), None).await,
            Err(EngineError::NoSigner { .. })
        ));

        let unlisted = fx.optimizer.deposit("alice", "CAKE", dec!(10), None).await.unwrap();
        assert_eq!(unlisted.message, "No yield opportunities found for CAKE");
        assert!(fx.positions.list("alice", None).unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_rotation_plan_threshold() {
        let fx = fixture();
        let outcome = fx.optimizer.deposit("alice", "USDT", dec!(100), None).await.unwrap();
        let id = outcome.position_id.unwrap();

        assert!(fx.optimizer.rotation_plan(&id, dec!(50)).await.unwrap().is_none());

        fx.beefy.set_apy("USDT", dec!(5.0));
        fx.optimizer.aggregator.invalidate("USDT");
        let plan = fx.optimizer.rotation_plan(&id, dec!(50)).await.unwrap().unwrap();
        assert_eq!(plan.target_venue, "Beefy");
        assert_eq!(plan.target_apy, dec!(5.0));
        assert_eq!(plan.improvement_bps, dec!(120));

        assert!(fx.optimizer.rotation_plan(&id, dec!(121)).await.unwrap().is_none());
        assert!(fx.optimizer.rotation_plan("pos_missing", dec!(0)).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_rotate_moves_position() {
        let fx = fixture();
        let first = fx.optimizer.deposit("alice", "USDT", dec!(100), None).await.unwrap();
        let old_id = first.position_id.unwrap();

        let none = fx.optimizer.rotate("alice", &old_id, None).await.unwrap();
        assert!(!none.success);
        assert!(none.message.starts_with("No profitable rotation found"));
        assert!(fx.positions.get(&old_id).unwrap().is_open());

        fx.beefy.set_apy("USDT", dec!(5.0));
        fx.optimizer.aggregator.invalidate("USDT");
        let rotated = fx.optimizer.rotate("alice", &old_id, None).await.unwrap();
        assert!(rotated.success, "{}", rotated.message);
        assert_eq!(rotated.details.unwrap().venue, "Beefy");

        let old = fx.positions.get(&old_id).unwrap();
        assert_eq!(old.status, PositionStatus::Closed);
        // Real withdraw returned the funds to Venus
        assert_eq!(fx.venus.balance_of("USDT"), dec!(1000));
        assert_eq!(fx.trades.history("alice", None, Some(TradeKind::Withdraw)).unwrap().len(), 1);
    }
}
