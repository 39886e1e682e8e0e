//! Engine facade: the single entry point every front end calls.
//!
//! Owns the shared store, venue registry and signer sessions, wires the
//! strategies together, and runs the risk gate before any action that moves
//! funds.

use rust_decimal::Decimal;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, instrument};

use crate::alerts::{
    AlertDispatcher, AlertSetting, AlertSubscription, Notification, NotificationSink, PositionMonitor,
};
use crate::config::Config;
use crate::error::Result;
use crate::ledger::{Portfolio, PositionLedger, Trade, TradeKind, TradeLog};
use crate::market::{FundingRateSource, PriceOracle, YieldListing};
use crate::persistence::Store;
use crate::risk::{RiskAction, RiskActionKind, RiskConfig, RiskConfigPatch, RiskGate};
use crate::session::{AutoArbSession, SessionReport, SessionScheduler};
use crate::strategy::{
    ArbOpportunity, ArbOutcome, ArbitrageExecutor, DeltaNeutralStrategy, DeltaOpen, DeltaPnl, DeltaPnlReport,
    DepositDetails, OpportunityScanner, RotationPlan, StrategyOutcome, SwapDetails, TokenSwapper,
    YieldOptimizer,
};
use crate::venue::{ChainClient, SignerRegistry, VenueRegistry};

pub struct Engine {
    signers: Arc<SignerRegistry>,
    positions: Arc<PositionLedger>,
    trades: Arc<TradeLog>,
    risk: RiskGate,
    scanner: Arc<OpportunityScanner>,
    arbitrage: Arc<ArbitrageExecutor>,
    delta_neutral: DeltaNeutralStrategy,
    yields: Arc<YieldOptimizer>,
    swapper: TokenSwapper,
    alerts: Arc<AlertDispatcher>,
    scheduler: Arc<SessionScheduler>,
    monitor: Arc<PositionMonitor>,
    prices: Arc<dyn PriceOracle>,
}

impl Engine {
    pub fn new(
        config: &Config,
        store: Arc<Store>,
        venues: VenueRegistry,
        prices: Arc<dyn PriceOracle>,
        funding: Arc<dyn FundingRateSource>,
        sinks: Vec<Arc<dyn NotificationSink>>,
    ) -> Self {
        let signers = Arc::new(SignerRegistry::new());
        let positions = Arc::new(PositionLedger::new(store.clone()));
        let trades = Arc::new(TradeLog::new(store.clone()));

        let alerts = Arc::new(
            sinks
                .into_iter()
                .fold(AlertDispatcher::new(store.clone(), config.alerts.notification_limit), |d, sink| {
                    d.with_sink(sink)
                }),
        );

        let scanner = Arc::new(OpportunityScanner::new(venues.clone(), config.scanner.clone()));
        let arbitrage = Arc::new(ArbitrageExecutor::new(
            scanner.clone(),
            venues.clone(),
            signers.clone(),
            trades.clone(),
        ));
        let delta_neutral = DeltaNeutralStrategy::new(
            venues.clone(),
            signers.clone(),
            positions.clone(),
            trades.clone(),
            prices.clone(),
            funding.clone(),
            config.delta_neutral.clone(),
        );
        let yields = Arc::new(YieldOptimizer::new(
            venues.clone(),
            signers.clone(),
            positions.clone(),
            trades.clone(),
            prices.clone(),
            config.yield_optimizer.clone(),
        ));
        let swapper = TokenSwapper::new(venues.clone(), signers.clone(), trades.clone());
        let scheduler = Arc::new(SessionScheduler::new(store.clone(), arbitrage.clone(), alerts.clone()));
        let monitor = Arc::new(PositionMonitor::new(
            positions.clone(),
            funding,
            yields.clone(),
            alerts.clone(),
            config.alerts.apy_drop_threshold,
        )
        .with_arb_alerts(
            scanner.clone(),
            Duration::from_secs(config.alerts.arb_alert_interval_secs),
        ));

        info!(venues = venues.len(), "Engine initialized");
        Self {
            signers,
            positions,
            trades,
            risk: RiskGate::new(store, config.risk.clone()),
            scanner,
            arbitrage,
            delta_neutral,
            yields,
            swapper,
            alerts,
            scheduler,
            monitor,
            prices,
        }
    }

    pub fn scheduler(&self) -> Arc<SessionScheduler> {
        self.scheduler.clone()
    }

    pub fn monitor(&self) -> Arc<PositionMonitor> {
        self.monitor.clone()
    }

    // ─── Signer sessions ───

    pub fn activate_signer(&self, owner: &str, client: Arc<dyn ChainClient>) {
        self.signers.activate(owner, client);
    }

    pub fn deactivate_signer(&self, owner: &str) -> bool {
        self.signers.deactivate(owner)
    }

    // ─── Yield ───

    #[instrument(skip(self))]
    pub async fn yield_deposit(
        &self,
        owner: &str,
        token: &str,
        amount: Decimal,
        venue: Option<&str>,
    ) -> Result<StrategyOutcome<DepositDetails>> {
        let amount_usd = self.usd_value(token, amount).await;
        let mut action = RiskAction::new(RiskActionKind::Deposit, amount_usd);
        // A forced venue without a listing fails in `deposit`, so the
        // checked venue is always the one that executes.
        let target = match venue {
            Some(name) => Some(name.to_string()),
            None => self.yields.listings(token).await.first().map(|l| l.venue.clone()),
        };
        if let Some(target) = &target {
            action = action.venue(target);
        }
        self.risk.check(owner, &action)?.into_result()?;

        self.yields.deposit(owner, token, amount, venue).await
    }

    #[instrument(skip(self))]
    pub async fn yield_rotate(
        &self,
        owner: &str,
        position_id: &str,
        min_improvement_bps: Option<Decimal>,
    ) -> Result<StrategyOutcome<DepositDetails>> {
        let min = min_improvement_bps.unwrap_or(self.yields.config().min_improvement_bps);
        if let Some(plan) = self.yields.rotation_plan(position_id, min).await? {
            // Funds move between venues; only the destination needs clearing.
            let action = RiskAction::new(RiskActionKind::Deposit, Decimal::ZERO).venue(&plan.target_venue);
            self.risk.check(owner, &action)?.into_result()?;
        }
        self.yields.rotate(owner, position_id, Some(min)).await
    }

    pub async fn rotation_plan(
        &self,
        position_id: &str,
        min_improvement_bps: Option<Decimal>,
    ) -> Result<Option<RotationPlan>> {
        let min = min_improvement_bps.unwrap_or(self.yields.config().min_improvement_bps);
        self.yields.rotation_plan(position_id, min).await
    }

    pub async fn yield_listings(&self, token: &str) -> Vec<YieldListing> {
        self.yields.listings(token).await
    }

    // ─── Swaps ───

    #[instrument(skip(self))]
    pub async fn swap_tokens(
        &self,
        owner: &str,
        from_token: &str,
        to_token: &str,
        amount: Decimal,
        venue: Option<&str>,
    ) -> Result<StrategyOutcome<SwapDetails>> {
        let amount_usd = self.usd_value(from_token, amount).await;
        let mut action = RiskAction::new(RiskActionKind::Swap, amount_usd);
        // Check the venue that will actually execute, including the default.
        let route = self.swapper.route(venue)?;
        let routed = route.as_ref().map(|v| v.name().to_string());
        if let Some(name) = &routed {
            action = action.venue(name);
        }
        self.risk.check(owner, &action)?.into_result()?;

        self.swapper
            .swap(owner, from_token, to_token, amount, routed.as_deref())
            .await
    }

    // ─── Arbitrage ───

    /// Execute the requested (or best) opportunity. The slippage bound
    /// defaults to the owner's risk limit.
    #[instrument(skip(self))]
    pub async fn arb_execute(
        &self,
        owner: &str,
        opportunity_id: Option<&str>,
        max_slippage_bps: Option<Decimal>,
    ) -> Result<ArbOutcome> {
        let limits = self.risk.config_for(owner)?;
        let slippage = max_slippage_bps.unwrap_or(limits.max_slippage_bps);
        let scan = self.scanner.config();
        let amount_usd = self.usd_value(&scan.token, scan.probe_amount).await;
        let action = RiskAction::new(RiskActionKind::Arb, amount_usd).slippage_bps(slippage);
        self.risk.check(owner, &action)?.into_result()?;

        self.arbitrage.execute(owner, opportunity_id, slippage).await
    }

    /// Scan `token` (default: the configured token) without executing.
    pub async fn scan_opportunities(&self, token: Option<&str>) -> Vec<ArbOpportunity> {
        match token {
            Some(token) => {
                let scan = self.scanner.config();
                self.scanner
                    .scan(token, &scan.quote_token, scan.probe_amount)
                    .await
            }
            None => self.scanner.scan_default().await,
        }
    }

    // ─── Delta-neutral ───

    #[instrument(skip(self))]
    pub async fn delta_neutral_open(
        &self,
        owner: &str,
        token: &str,
        notional_usd: Decimal,
        max_funding_rate: Option<Decimal>,
    ) -> Result<StrategyOutcome<DeltaOpen>> {
        let action = RiskAction::new(RiskActionKind::DeltaNeutral, notional_usd);
        self.risk.check(owner, &action)?.into_result()?;

        self.delta_neutral
            .open(owner, token, notional_usd, max_funding_rate)
            .await
    }

    pub async fn delta_neutral_close(&self, owner: &str, position_id: &str) -> Result<StrategyOutcome<DeltaPnl>> {
        self.delta_neutral.close(owner, position_id).await
    }

    pub async fn delta_neutral_pnl(&self, position_id: &str) -> Result<Option<DeltaPnlReport>> {
        self.delta_neutral.pnl(position_id).await
    }

    // ─── Risk ───

    pub fn risk_config(&self, owner: &str) -> Result<RiskConfig> {
        self.risk.config_for(owner)
    }

    pub fn configure_risk(&self, owner: &str, patch: &RiskConfigPatch) -> Result<RiskConfig> {
        self.risk.configure(owner, patch)
    }

    // ─── Alerts ───

    pub fn set_alert(
        &self,
        owner: &str,
        category: &str,
        active: bool,
        threshold: Option<Decimal>,
    ) -> Result<AlertSetting> {
        self.alerts.set_alert(owner, category, active, threshold)
    }

    pub fn alerts(&self, owner: &str) -> Result<Vec<AlertSubscription>> {
        self.alerts.alerts(owner)
    }

    pub fn notifications(&self, owner: &str, unread_only: bool) -> Result<Vec<Notification>> {
        if unread_only {
            self.alerts.unread(owner)
        } else {
            self.alerts.notifications(owner)
        }
    }

    pub fn mark_notifications_read(&self, owner: &str) -> Result<usize> {
        self.alerts.mark_read(owner)
    }

    // ─── Auto-arb sessions ───

    pub fn session_start(
        &self,
        owner: &str,
        duration_hours: Decimal,
        max_loss_usd: Decimal,
        max_slippage_bps: Decimal,
    ) -> Result<AutoArbSession> {
        self.scheduler
            .start(owner, duration_hours, max_loss_usd, max_slippage_bps)
    }

    pub async fn session_stop(&self, owner: &str) -> Result<AutoArbSession> {
        self.scheduler.stop(owner).await
    }

    pub fn session_status(&self, owner: &str) -> Result<Option<SessionReport>> {
        self.scheduler.status(owner)
    }

    // ─── Ledger ───

    pub fn portfolio(&self, owner: &str) -> Result<Portfolio> {
        self.positions.portfolio(owner)
    }

    pub fn trade_history(&self, owner: &str, limit: Option<usize>, kind: Option<TradeKind>) -> Result<Vec<Trade>> {
        self.trades.history(owner, limit, kind)
    }

    /// Spawn the scheduler and monitor loops.
    pub fn spawn_background(
        &self,
        tick_interval: Duration,
        monitor_interval: Duration,
        shutdown: Arc<std::sync::atomic::AtomicBool>,
    ) -> Vec<tokio::task::JoinHandle<()>> {
        vec![
            tokio::spawn(self.scheduler().run(tick_interval, shutdown.clone())),
            tokio::spawn(self.monitor().run(monitor_interval, shutdown)),
        ]
    }

    /// USD value of `amount` of `token`; unpriced tokens count at face value.
    async fn usd_value(&self, token: &str, amount: Decimal) -> Decimal {
        match self.prices.price(token).await {
            Ok(price) if price.price_usd > Decimal::ZERO => amount * price.price_usd,
            _ => {
                debug!(%token, "No USD price, valuing at face amount");
                amount
            }
        }
    }
}
