//! Delta-neutral funding-rate capture.
//!
//! Buys spot and records an equal simulated perpetual short, so price moves
//! cancel and the position earns the funding paid by shorts to longs.
//!
//! - The spot leg goes through the first Swap-capable venue when the owner
//!   has a signer; a failed real leg falls back to a simulated one.
//! - The short leg is always simulated.
//! - Funding accrues per whole settlement interval held.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Serialize;
use std::sync::Arc;
use tracing::{info, instrument, warn};

use super::legs::{simulated_ref, swap_leg};
use super::outcome::StrategyOutcome;
use crate::config::DeltaNeutralConfig;
use crate::error::{EngineError, Result};
use crate::ledger::{NewPosition, NewTrade, Position, PositionKind, PositionLedger, TradeKind, TradeLog};
use crate::market::{FundingRateSource, PriceOracle};
use crate::utils::decimal::safe_div;
use crate::venue::{Capability, SignerRegistry, VenueRegistry};

const SIMULATED_VENUE: &str = "Simulated";

/// Details of a freshly opened hedge.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DeltaOpen {
    pub token: String,
    pub notional_usd: Decimal,
    pub spot_amount: Decimal,
    pub entry_price: Decimal,
    pub funding_rate_pct: Decimal,
    pub annualized_yield_pct: Decimal,
    pub spot_simulated: bool,
    pub spot_tx_ref: String,
    pub short_tx_ref: String,
}

/// PnL breakdown of a hedge at `current_price`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DeltaPnl {
    pub spot_pnl: Decimal,
    pub short_pnl: Decimal,
    pub funding_pnl: Decimal,
    pub total_pnl: Decimal,
    pub funding_intervals: i64,
    pub hours_held: Decimal,
    pub current_price: Decimal,
}

/// Live PnL plus the latest observed funding rate.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DeltaPnlReport {
    pub position_id: String,
    #[serde(flatten)]
    pub pnl: DeltaPnl,
    pub funding_rate_pct: Decimal,
}

/// Funding rate per interval, annualized (percent).
pub fn annualized_yield_pct(rate_pct: Decimal, interval_hours: u32) -> Decimal {
    let per_day = safe_div(Decimal::from(24), Decimal::from(interval_hours.max(1)));
    rate_pct * per_day * Decimal::from(365)
}

/// PnL of `position` at `current_price` as of `now`.
///
/// Falls back to the position's own fields when metadata is missing.
pub fn compute_close_pnl(
    position: &Position,
    current_price: Decimal,
    now: DateTime<Utc>,
    interval_hours: u32,
) -> DeltaPnl {
    let spot_entry = position
        .meta_decimal("spot_entry")
        .or(position.entry_price)
        .unwrap_or(current_price);
    let spot_amount = position.meta_decimal("spot_amount").unwrap_or(position.amount);
    let short_entry = position.meta_decimal("short_entry").unwrap_or(spot_entry);
    let rate = position
        .meta_decimal("funding_rate_at_entry")
        .unwrap_or(Decimal::ZERO);

    let held = now.signed_duration_since(position.opened_at);
    let whole_hours = held.num_hours().max(0);
    let funding_intervals = whole_hours / i64::from(interval_hours.max(1));
    let hours_held = (Decimal::from(held.num_seconds().max(0)) / Decimal::from(3600)).round_dp(1);

    let spot_pnl = (current_price - spot_entry) * spot_amount;
    let short_pnl = (short_entry - current_price) * spot_amount;
    let funding_pnl =
        rate / Decimal::ONE_HUNDRED * spot_amount * current_price * Decimal::from(funding_intervals);

    DeltaPnl {
        spot_pnl,
        short_pnl,
        funding_pnl,
        total_pnl: spot_pnl + short_pnl + funding_pnl,
        funding_intervals,
        hours_held,
        current_price,
    }
}

pub struct DeltaNeutralStrategy {
    venues: VenueRegistry,
    signers: Arc<SignerRegistry>,
    positions: Arc<PositionLedger>,
    trades: Arc<TradeLog>,
    prices: Arc<dyn PriceOracle>,
    funding: Arc<dyn FundingRateSource>,
    config: DeltaNeutralConfig,
}

impl DeltaNeutralStrategy {
    pub fn new(
        venues: VenueRegistry,
        signers: Arc<SignerRegistry>,
        positions: Arc<PositionLedger>,
        trades: Arc<TradeLog>,
        prices: Arc<dyn PriceOracle>,
        funding: Arc<dyn FundingRateSource>,
        config: DeltaNeutralConfig,
    ) -> Self {
        Self {
            venues,
            signers,
            positions,
            trades,
            prices,
            funding,
            config,
        }
    }

    /// Open a hedge of `notional_usd` in `token`.
    #[instrument(skip(self))]
    pub async fn open(
        &self,
        owner: &str,
        token: &str,
        notional_usd: Decimal,
        max_funding_rate: Option<Decimal>,
    ) -> Result<StrategyOutcome<DeltaOpen>> {
        if notional_usd <= Decimal::ZERO {
            return Err(EngineError::Validation(format!(
                "notional must be positive, got {}",
                notional_usd
            )));
        }
        let token = token.to_uppercase();
        let quote = self.config.quote_token.to_uppercase();

        let rate = match self.funding.latest(&token).await {
            Ok(Some(rate)) => rate.funding_rate_pct,
            Ok(None) => {
                return Ok(StrategyOutcome::failed(format!(
                    "Could not fetch funding rate for {}. Try again later.",
                    token
                )))
            }
            Err(e) => {
                warn!(%token, error = %e, "Funding rate lookup failed");
                return Ok(StrategyOutcome::failed(format!(
                    "Could not fetch funding rate for {}. Try again later.",
                    token
                )));
            }
        };

        if rate <= Decimal::ZERO {
            return Ok(StrategyOutcome::failed(format!(
                "Current {} funding rate is {}% (not positive). Delta-neutral only earns when shorts pay longs.",
                token,
                rate.round_dp(4)
            )));
        }
        if let Some(max) = max_funding_rate {
            if rate.abs() > max {
                return Ok(StrategyOutcome::failed(format!(
                    "Funding rate {}% exceeds max {}%.",
                    rate.round_dp(4),
                    max.normalize()
                )));
            }
        }

        let price = match self.prices.price(&token).await {
            Ok(p) if p.price_usd > Decimal::ZERO => p.price_usd,
            Ok(_) | Err(_) => {
                return Ok(StrategyOutcome::failed(format!("Could not get {} price.", token)))
            }
        };
        let spot_amount = notional_usd / price;

        // Spot leg
        let signer = self.signers.get(owner);
        let spot_venue = self.venues.first_with(Capability::Swap);
        let mut spot_venue_name = SIMULATED_VENUE.to_string();
        let mut spot_tx_ref = simulated_ref("delta_spot");
        let mut spot_simulated = true;
        if let (Some(venue), Some(_)) = (&spot_venue, &signer) {
            match swap_leg(
                venue,
                signer.as_ref(),
                &quote,
                &token,
                notional_usd,
                safe_div(Decimal::ONE, price),
                "delta_spot",
            )
            .await
            {
                Ok(fill) if !fill.simulated => {
                    spot_venue_name = venue.name().to_string();
                    spot_tx_ref = fill.tx_ref;
                    spot_simulated = false;
                }
                Ok(_) => {}
                Err(reason) => {
                    warn!(%owner, venue = %venue.name(), %reason, "Spot buy failed, recording simulated leg")
                }
            }
        }

        let short_tx_ref = simulated_ref("delta_short");
        let annualized = annualized_yield_pct(rate, self.config.funding_interval_hours);

        let position = self.positions.open(
            NewPosition::new(
                owner,
                PositionKind::DeltaNeutral,
                format!("{} + {}", spot_venue_name, self.config.short_venue),
                &token,
                spot_amount,
            )
            .entry_price(price)
            .current_value(notional_usd)
            .settlement(spot_tx_ref.clone())
            .meta_decimal("spot_entry", price)
            .meta_decimal("spot_amount", spot_amount)
            .meta_decimal("short_entry", price)
            .meta_decimal("short_size_usd", notional_usd)
            .meta_decimal("funding_rate_at_entry", rate)
            .meta("spot_simulated", spot_simulated)
            .meta("short_simulated", true)
            .meta("spot_tx_ref", spot_tx_ref.clone())
            .meta("short_tx_ref", short_tx_ref.clone()),
        )?;

        self.trades.append(
            NewTrade::new(owner, &spot_venue_name, TradeKind::DeltaSpotBuy, spot_tx_ref.clone())
                .from(&quote, notional_usd)
                .to(&token, Some(spot_amount))
                .price(price)
                .position(&position.id),
        )?;
        self.trades.append(
            NewTrade::new(owner, &self.config.short_venue, TradeKind::DeltaShortOpen, short_tx_ref.clone())
                .from(&token, spot_amount)
                .to(&quote, Some(notional_usd))
                .price(price)
                .position(&position.id),
        )?;

        info!(
            %owner,
            position = %position.id,
            %token,
            %spot_amount,
            %price,
            funding_rate = %rate,
            spot_simulated,
            "Delta-neutral position opened"
        );

        let sim = if spot_simulated { " (simulated)" } else { "" };
        let message = format!(
            "Delta-neutral position opened.\n  Spot: bought {} {} @ ${}{}\n  Short: {} {} @ ${} (simulated)\n  Notional: ${}\n  Funding rate: {}% per {}h, ~{}% annualized\n  Position ID: {}",
            spot_amount.round_dp(6),
            token,
            price.round_dp(2),
            sim,
            spot_amount.round_dp(6),
            token,
            price.round_dp(2),
            notional_usd.round_dp(2),
            rate.round_dp(4),
            self.config.funding_interval_hours,
            annualized.round_dp(2),
            position.id
        );

        Ok(StrategyOutcome::succeeded(
            message,
            DeltaOpen {
                token,
                notional_usd,
                spot_amount,
                entry_price: price,
                funding_rate_pct: rate,
                annualized_yield_pct: annualized,
                spot_simulated,
                spot_tx_ref: spot_tx_ref.clone(),
                short_tx_ref,
            },
        )
        .position(position.id)
        .tx(spot_tx_ref))
    }

    /// Unwind both legs and realize the PnL.
    #[instrument(skip(self))]
    pub async fn close(&self, owner: &str, position_id: &str) -> Result<StrategyOutcome<DeltaPnl>> {
        let position = match self.positions.get(position_id) {
            Ok(p) => p,
            Err(EngineError::NotFound { .. }) => {
                return Ok(StrategyOutcome::failed(format!("Position {} not found.", position_id)))
            }
            Err(e) => return Err(e),
        };
        if position.owner_id != owner {
            return Ok(StrategyOutcome::failed("You do not own this position."));
        }
        if position.kind != PositionKind::DeltaNeutral {
            return Ok(StrategyOutcome::failed(format!(
                "Position {} is a {} position, not delta_neutral.",
                position_id, position.kind
            )));
        }
        if !position.is_open() {
            return Ok(StrategyOutcome::failed("Position is already closed."));
        }
        // Held until the position row is closed.
        let (_claim, position) = match self.positions.claim(position_id) {
            Ok(claimed) => claimed,
            Err(EngineError::InvalidState(reason)) => {
                return Ok(StrategyOutcome::failed(format!("Cannot close: {}.", reason)))
            }
            Err(e) => return Err(e),
        };

        let current = self.current_price(&position).await;
        let pnl = compute_close_pnl(&position, current, Utc::now(), self.config.funding_interval_hours);
        let spot_amount = position.meta_decimal("spot_amount").unwrap_or(position.amount);
        let proceeds = spot_amount * current;
        let quote = self.config.quote_token.to_uppercase();

        // Sell spot for real only if it was bought for real.
        let mut sell_venue = SIMULATED_VENUE.to_string();
        let mut sell_ref = simulated_ref("delta_close");
        if !position.meta_bool("spot_simulated") {
            if let (Some(venue), Some(signer)) = (
                self.venues.first_with(Capability::Swap),
                self.signers.get(owner),
            ) {
                match swap_leg(&venue, Some(&signer), &position.token, &quote, spot_amount, current, "delta_close")
                    .await
                {
                    Ok(fill) => {
                        sell_venue = venue.name().to_string();
                        sell_ref = fill.tx_ref;
                    }
                    Err(reason) => {
                        warn!(%owner, venue = %venue.name(), %reason, "Spot sell failed, recording simulated leg")
                    }
                }
            }
        }
        let short_ref = simulated_ref("delta_short_close");

        self.positions
            .refresh_value(position_id, proceeds, Some(pnl.total_pnl))?;
        self.trades.append(
            NewTrade::new(owner, &sell_venue, TradeKind::DeltaSpotSell, sell_ref.clone())
                .from(&position.token, spot_amount)
                .to(&quote, Some(proceeds))
                .price(current)
                .position(position_id),
        )?;
        self.trades.append(
            NewTrade::new(owner, &self.config.short_venue, TradeKind::DeltaShortClose, short_ref)
                .from(&quote, proceeds)
                .to(&position.token, Some(spot_amount))
                .price(current)
                .position(position_id),
        )?;
        self.positions.close(position_id, Some(&sell_ref))?;

        info!(
            %owner,
            position = %position_id,
            total_pnl = %pnl.total_pnl,
            intervals = pnl.funding_intervals,
            "Delta-neutral position closed"
        );

        let message = format!(
            "Delta-neutral position closed.\n  Spot PnL: ${}\n  Short PnL: ${}\n  Funding PnL: ${} ({} funding intervals)\n  Total PnL: ${}\n  Held for: {} hours",
            pnl.spot_pnl.round_dp(4),
            pnl.short_pnl.round_dp(4),
            pnl.funding_pnl.round_dp(4),
            pnl.funding_intervals,
            pnl.total_pnl.round_dp(4),
            pnl.hours_held
        );
        Ok(StrategyOutcome::succeeded(message, pnl)
            .position(position_id)
            .tx(sell_ref))
    }

    /// Mark-to-market PnL of an open hedge; `None` for other position kinds.
    pub async fn pnl(&self, position_id: &str) -> Result<Option<DeltaPnlReport>> {
        let position = self.positions.get(position_id)?;
        if position.kind != PositionKind::DeltaNeutral {
            return Ok(None);
        }

        let current = self.current_price(&position).await;
        let pnl = compute_close_pnl(&position, current, Utc::now(), self.config.funding_interval_hours);
        let latest = match self.funding.latest(&position.token).await {
            Ok(rate) => rate.map(|r| r.funding_rate_pct),
            Err(e) => {
                warn!(token = %position.token, error = %e, "Funding rate lookup failed");
                None
            }
        };
        let funding_rate_pct = latest
            .or_else(|| position.meta_decimal("funding_rate_at_entry"))
            .unwrap_or(Decimal::ZERO);

        Ok(Some(DeltaPnlReport {
            position_id: position.id,
            pnl,
            funding_rate_pct,
        }))
    }

    /// Oracle price, falling back to the spot entry.
    async fn current_price(&self, position: &Position) -> Decimal {
        let entry = position
            .meta_decimal("spot_entry")
            .or(position.entry_price)
            .unwrap_or(Decimal::ZERO);
        match self.prices.price(&position.token).await {
            Ok(p) if p.price_usd > Decimal::ZERO => p.price_usd,
            Ok(_) => entry,
            Err(e) => {
                warn!(token = %position.token, error = %e, "Price lookup failed, using entry price");
                entry
            }
        }
    }
}
