//! Periodic watchers over open positions.
//!
//! - Position health: a delta-neutral hedge opened at a positive funding rate
//!   whose current rate is zero or negative is now paying instead of earning.
//! - APY drop: a yield position whose venue APY fell at least the owner's
//!   threshold below its entry APY.
//! - Arbitrage: the widest viable cross-venue spread, broadcast to
//!   subscribers at most once per throttle interval.
//!
//! Position conditions alert once and re-arm after they clear.

use parking_lot::Mutex;
use rust_decimal::Decimal;
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

use super::dispatcher::AlertDispatcher;
use super::types::AlertCategory;
use crate::error::Result;
use crate::ledger::{PositionKind, PositionLedger};
use crate::market::FundingRateSource;
use crate::strategy::{OpportunityScanner, YieldOptimizer};

pub struct PositionMonitor {
    positions: Arc<PositionLedger>,
    funding: Arc<dyn FundingRateSource>,
    yields: Arc<YieldOptimizer>,
    alerts: Arc<AlertDispatcher>,
    default_apy_drop: Decimal,
    flagged_health: Mutex<HashSet<String>>,
    flagged_apy: Mutex<HashSet<String>>,
    scanner: Option<Arc<OpportunityScanner>>,
    arb_interval: Duration,
    last_arb_alert: Mutex<Option<Instant>>,
}

impl PositionMonitor {
    pub fn new(
        positions: Arc<PositionLedger>,
        funding: Arc<dyn FundingRateSource>,
        yields: Arc<YieldOptimizer>,
        alerts: Arc<AlertDispatcher>,
        default_apy_drop: Decimal,
    ) -> Self {
        Self {
            positions,
            funding,
            yields,
            alerts,
            default_apy_drop,
            flagged_health: Mutex::new(HashSet::new()),
            flagged_apy: Mutex::new(HashSet::new()),
            scanner: None,
            arb_interval: Duration::ZERO,
            last_arb_alert: Mutex::new(None),
        }
    }

    /// Also broadcast arbitrage opportunities, at most once per `interval`.
    pub fn with_arb_alerts(mut self, scanner: Arc<OpportunityScanner>, interval: Duration) -> Self {
        self.scanner = Some(scanner);
        self.arb_interval = interval;
        self
    }

    /// Broadcast a position_health alert for every hedge whose funding
    /// flipped non-positive. Returns how many hedges were newly flagged.
    pub async fn check_position_health(&self) -> Result<usize> {
        let hedges: Vec<_> = self
            .positions
            .all_open()?
            .into_iter()
            .filter(|p| p.kind == PositionKind::DeltaNeutral)
            .collect();

        let mut flagged = 0;
        for position in hedges {
            let entry = position
                .meta_decimal("funding_rate_at_entry")
                .unwrap_or(Decimal::ZERO);
            let current = match self.funding.latest(&position.token).await {
                Ok(Some(rate)) => rate.funding_rate_pct,
                Ok(None) => continue,
                Err(e) => {
                    warn!(position = %position.id, error = %e, "Funding lookup failed");
                    continue;
                }
            };

            if entry > Decimal::ZERO && current <= Decimal::ZERO {
                if !self.flagged_health.lock().insert(position.id.clone()) {
                    continue;
                }
                let message = format!(
                    "Position health alert: {} funding rate flipped for delta-neutral position {}.\n  Entry: +{}%\n  Current: {}%\nThe hedge now pays funding instead of earning it. Consider closing it.",
                    position.token,
                    position.id,
                    entry.round_dp(4),
                    current.round_dp(4)
                );
                self.alerts
                    .broadcast(AlertCategory::PositionHealth, &message)
                    .await?;
                warn!(position = %position.id, owner = %position.owner_id, %current, "Funding flipped on hedge");
                flagged += 1;
            } else {
                self.flagged_health.lock().remove(&position.id);
            }
        }
        Ok(flagged)
    }

    /// Alert owners whose yield positions lost at least their APY-drop
    /// threshold. Returns how many positions were newly flagged.
    pub async fn check_apy_drops(&self) -> Result<usize> {
        let deposits: Vec<_> = self
            .positions
            .all_open()?
            .into_iter()
            .filter(|p| p.kind == PositionKind::Yield)
            .collect();

        let mut flagged = 0;
        for position in deposits {
            let Some(entry) = position.entry_apy else {
                continue;
            };
            let Some(current) = self.yields.current_apy(&position.venue, &position.token).await else {
                debug!(position = %position.id, venue = %position.venue, "No current APY");
                continue;
            };
            let threshold = self
                .alerts
                .threshold(&position.owner_id, AlertCategory::ApyDrop)?
                .unwrap_or(self.default_apy_drop);

            if entry - current >= threshold {
                if !self.flagged_apy.lock().insert(position.id.clone()) {
                    continue;
                }
                let message = format!(
                    "APY alert: {} {} APY dropped from {}% to {}%. Your {} {} may earn less; consider rotating.",
                    position.venue,
                    position.token,
                    entry.round_dp(2),
                    current.round_dp(2),
                    position.amount,
                    position.token
                );
                self.alerts
                    .dispatch(&position.owner_id, AlertCategory::ApyDrop, &message)
                    .await?;
                flagged += 1;
            } else {
                self.flagged_apy.lock().remove(&position.id);
            }
        }
        Ok(flagged)
    }

    /// Broadcast the widest viable arbitrage opportunity to arb_opportunity
    /// subscribers. Returns whether a broadcast went out; calls inside the
    /// throttle interval do not scan.
    pub async fn check_arb_opportunities(&self) -> Result<bool> {
        let Some(scanner) = &self.scanner else {
            return Ok(false);
        };
        if let Some(last) = *self.last_arb_alert.lock() {
            if last.elapsed() < self.arb_interval {
                return Ok(false);
            }
        }

        let opportunities = scanner.scan_default().await;
        for opp in &opportunities {
            debug!(
                opportunity = %opp.id,
                buy = %opp.buy_price,
                sell = %opp.sell_price,
                spread_bps = %opp.spread_bps.round_dp(2),
                "Market snapshot"
            );
        }
        let Some(best) = opportunities
            .iter()
            .filter(|o| o.viable)
            .max_by(|a, b| a.spread_bps.cmp(&b.spread_bps))
        else {
            return Ok(false);
        };

        let message = format!(
            "Arbitrage opportunity: {}\n  Buy on {} @ ${}\n  Sell on {} @ ${}\n  Spread: {} bps\n  Est. profit: ${} per {} {}",
            best.token,
            best.buy_venue,
            best.buy_price.round_dp(4),
            best.sell_venue,
            best.sell_price.round_dp(4),
            best.spread_bps.round_dp(2),
            best.estimated_profit_usd.round_dp(4),
            best.probe_amount.normalize(),
            best.token
        );
        let delivered = self
            .alerts
            .broadcast(AlertCategory::ArbOpportunity, &message)
            .await?;
        *self.last_arb_alert.lock() = Some(Instant::now());
        info!(opportunity = %best.id, spread_bps = %best.spread_bps.round_dp(2), delivered, "Arbitrage opportunity broadcast");
        Ok(true)
    }

    /// Run every check each `interval` until `shutdown` is set.
    pub async fn run(self: Arc<Self>, interval: Duration, shutdown: Arc<AtomicBool>) {
        info!(interval_secs = interval.as_secs(), "Position monitor started");
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        while !shutdown.load(Ordering::SeqCst) {
            ticker.tick().await;
            if let Err(e) = self.check_position_health().await {
                error!(error = %e, "Position health check failed");
            }
            if let Err(e) = self.check_apy_drops().await {
                error!(error = %e, "APY drop check failed");
            }
            if let Err(e) = self.check_arb_opportunities().await {
                error!(error = %e, "Arbitrage alert check failed");
            }
        }
        info!("Position monitor stopped");
    }
}
