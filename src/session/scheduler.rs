//! Auto-arbitrage session lifecycle and the polling scheduler.
//!
//! A session lets the scheduler trade arbitrage for one owner until it
//! expires or its cumulative loss crosses the limit. Each tick:
//! 1. Expires sessions past their deadline
//! 2. Stops sessions already past their loss limit
//! 3. Scans for each session and executes every opportunity wider than its
//!    slippage bound, crediting PnL after every trade
//!
//! Each session scans on its own turn, so a session late in the tick does
//! not trade on quotes taken before earlier sessions moved the pools.
//!
//! Ticks never overlap; a tick that finds the previous one still running is
//! skipped. `stop` and the per-trade credit step share a per-session lock.

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use parking_lot::Mutex;
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex as AsyncMutex;
use tracing::{debug, error, info, warn};

use super::types::{AutoArbSession, SessionStatus};
use crate::alerts::{AlertCategory, AlertDispatcher};
use crate::error::{EngineError, Result};
use crate::persistence::Store;
use crate::strategy::ArbRunner;
use crate::utils::new_id;

/// Resets the busy flag when the tick ends, including on panic.
struct BusyGuard<'a> {
    flag: &'a AtomicBool,
}

impl<'a> BusyGuard<'a> {
    /// Claim the flag, or `None` if another tick holds it.
    fn acquire(flag: &'a AtomicBool) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .ok()
            .map(|_| Self { flag })
    }
}

impl Drop for BusyGuard<'_> {
    fn drop(&mut self) {
        self.flag.store(false, Ordering::SeqCst);
    }
}

/// Latest session with its remaining time.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SessionReport {
    #[serde(flatten)]
    pub session: AutoArbSession,
    /// `None` once the session is terminal
    pub minutes_remaining: Option<i64>,
}

/// What one tick did.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct TickReport {
    /// The previous tick was still running
    pub skipped: bool,
    pub sessions: usize,
    pub trades: usize,
    pub expired: usize,
    pub stopped: usize,
}

pub struct SessionScheduler {
    store: Arc<Store>,
    runner: Arc<dyn ArbRunner>,
    alerts: Arc<AlertDispatcher>,
    busy: AtomicBool,
    start_lock: Mutex<()>,
    session_locks: Mutex<HashMap<String, Arc<AsyncMutex<()>>>>,
}

impl SessionScheduler {
    pub fn new(store: Arc<Store>, runner: Arc<dyn ArbRunner>, alerts: Arc<AlertDispatcher>) -> Self {
        Self {
            store,
            runner,
            alerts,
            busy: AtomicBool::new(false),
            start_lock: Mutex::new(()),
            session_locks: Mutex::new(HashMap::new()),
        }
    }

    /// Start an auto-arb session for `owner`.
    ///
    /// Fails with `InvalidState` if the owner already has a live session.
    pub fn start(
        &self,
        owner: &str,
        duration_hours: Decimal,
        max_loss_usd: Decimal,
        max_slippage_bps: Decimal,
    ) -> Result<AutoArbSession> {
        let duration_secs = (duration_hours * Decimal::from(3600))
            .round()
            .to_i64()
            .unwrap_or(0);
        if duration_secs <= 0 {
            return Err(EngineError::Validation(format!(
                "session duration must be positive, got {} hours",
                duration_hours
            )));
        }
        if max_loss_usd < Decimal::ZERO {
            return Err(EngineError::Validation("max loss must not be negative".to_string()));
        }
        if max_slippage_bps < Decimal::ZERO {
            return Err(EngineError::Validation(
                "max slippage must not be negative".to_string(),
            ));
        }

        let _guard = self.start_lock.lock();
        let now = Utc::now();
        if let Some(mut existing) = self.store.latest_session(owner)? {
            if existing.is_active() {
                if !existing.is_expired_at(now) {
                    return Err(EngineError::InvalidState(format!(
                        "owner {} already has active session {}",
                        owner, existing.id
                    )));
                }
                // Lapsed but not yet swept by a tick
                existing.finish(SessionStatus::Expired, now);
                self.store.update_session(&existing)?;
            }
        }

        let session = AutoArbSession {
            id: new_id("ses"),
            owner_id: owner.to_string(),
            started_at: now,
            expires_at: now + ChronoDuration::seconds(duration_secs),
            max_loss_usd,
            max_slippage_bps,
            trades_count: 0,
            total_pnl_usd: Decimal::ZERO,
            status: SessionStatus::Active,
            ended_at: None,
        };
        self.store.insert_session(&session)?;

        info!(
            %owner,
            session = %session.id,
            expires_at = %session.expires_at,
            max_loss = %max_loss_usd,
            max_slippage_bps = %max_slippage_bps,
            "Auto-arb session started"
        );
        Ok(session)
    }

    /// Stop the owner's session. A terminal session is returned unchanged.
    pub async fn stop(&self, owner: &str) -> Result<AutoArbSession> {
        let latest = self
            .store
            .latest_session(owner)?
            .ok_or_else(|| EngineError::not_found("session", owner))?;
        if !latest.is_active() {
            return Ok(latest);
        }

        let lock = self.session_lock(&latest.id);
        let _held = lock.lock().await;
        let mut session = self.reload(&latest.id)?;
        if session.finish(SessionStatus::Stopped, Utc::now()) {
            self.store.update_session(&session)?;
            self.forget_lock(&session.id);
            info!(%owner, session = %session.id, trades = session.trades_count, pnl = %session.total_pnl_usd, "Auto-arb session stopped");
            self.notify(
                &session,
                AlertCategory::Session,
                format!(
                    "Auto-arb session stopped after {} trades. Total P&L: ${}",
                    session.trades_count,
                    session.total_pnl_usd.round_dp(4)
                ),
            )
            .await;
        }
        Ok(session)
    }

    /// The owner's latest session, if any.
    pub fn status(&self, owner: &str) -> Result<Option<SessionReport>> {
        self.status_at(owner, Utc::now())
    }

    pub fn status_at(&self, owner: &str, now: DateTime<Utc>) -> Result<Option<SessionReport>> {
        Ok(self.store.latest_session(owner)?.map(|session| {
            let minutes_remaining = session
                .is_active()
                .then(|| session.minutes_remaining(now));
            SessionReport {
                session,
                minutes_remaining,
            }
        }))
    }

    pub async fn tick(&self) -> Result<TickReport> {
        self.tick_at(Utc::now()).await
    }

    /// Run one scheduler pass as of `now`.
    pub async fn tick_at(&self, now: DateTime<Utc>) -> Result<TickReport> {
        let Some(_busy) = BusyGuard::acquire(&self.busy) else {
            debug!("Previous tick still running, skipping");
            return Ok(TickReport {
                skipped: true,
                ..TickReport::default()
            });
        };

        let sessions = self.store.active_sessions()?;
        let mut report = TickReport {
            sessions: sessions.len(),
            ..TickReport::default()
        };
        if sessions.is_empty() {
            return Ok(report);
        }

        for session in sessions {
            if let Err(e) = self.run_session(&session.id, now, &mut report).await
            {
                error!(session = %session.id, error = %e, "Auto-arb session pass failed");
            }
        }

        if report.trades > 0 || report.expired > 0 || report.stopped > 0 {
            info!(
                sessions = report.sessions,
                trades = report.trades,
                expired = report.expired,
                stopped = report.stopped,
                "Auto-arb tick complete"
            );
        }
        Ok(report)
    }

    async fn run_session(
        &self,
        session_id: &str,
        now: DateTime<Utc>,
        report: &mut TickReport,
    ) -> Result<()> {
        let lock = self.session_lock(session_id);

        {
            let _held = lock.lock().await;
            let mut session = self.reload(session_id)?;
            if !session.is_active() {
                return Ok(());
            }
            if session.is_expired_at(now) {
                session.finish(SessionStatus::Expired, now);
                self.store.update_session(&session)?;
                self.forget_lock(session_id);
                report.expired += 1;
                info!(session = %session.id, owner = %session.owner_id, "Auto-arb session expired");
                self.notify(
                    &session,
                    AlertCategory::Session,
                    format!(
                        "Auto-arb session expired after {} trades. Total P&L: ${}",
                        session.trades_count,
                        session.total_pnl_usd.round_dp(4)
                    ),
                )
                .await;
                return Ok(());
            }
            if session.loss_limit_breached() {
                self.stop_for_loss(&mut session, now, false).await?;
                report.stopped += 1;
                return Ok(());
            }
        }

        let opportunities = self.runner.scan().await;
        for opportunity in &opportunities {
            let _held = lock.lock().await;
            let mut session = self.reload(session_id)?;
            if !session.is_active() {
                break;
            }
            if opportunity.spread_bps <= session.max_slippage_bps {
                continue;
            }

            let outcome = match self
                .runner
                .execute_opportunity(&session.owner_id, opportunity)
                .await
            {
                Ok(outcome) => outcome,
                Err(e) => {
                    warn!(session = %session.id, opportunity = %opportunity.id, error = %e, "Auto-arb execution failed");
                    continue;
                }
            };
            let Some(profit) = outcome.profit_usd().filter(|_| outcome.success) else {
                debug!(session = %session.id, opportunity = %opportunity.id, reason = %outcome.message, "Opportunity not executed");
                continue;
            };

            session.total_pnl_usd += profit;
            session.trades_count += 1;
            self.store.update_session(&session)?;
            report.trades += 1;

            info!(
                session = %session.id,
                trade = session.trades_count,
                %profit,
                total_pnl = %session.total_pnl_usd,
                "Auto-arb trade credited"
            );
            let sign = if session.total_pnl_usd >= Decimal::ZERO { "+" } else { "" };
            self.notify(
                &session,
                AlertCategory::ArbOpportunity,
                format!(
                    "Auto-arb trade #{} executed\n\n{}\n\nCumulative P&L: ${}{} | Time left: {}m",
                    session.trades_count,
                    outcome.message,
                    sign,
                    session.total_pnl_usd.round_dp(4),
                    session.minutes_remaining(now)
                ),
            )
            .await;

            if session.loss_limit_breached() {
                self.stop_for_loss(&mut session, now, true).await?;
                report.stopped += 1;
                break;
            }
        }
        Ok(())
    }

    async fn stop_for_loss(&self, session: &mut AutoArbSession, now: DateTime<Utc>, mid_cycle: bool) -> Result<()> {
        session.finish(SessionStatus::Stopped, now);
        self.store.update_session(session)?;
        self.forget_lock(&session.id);
        warn!(
            session = %session.id,
            owner = %session.owner_id,
            pnl = %session.total_pnl_usd,
            limit = %session.max_loss_usd,
            "Auto-arb session stopped at loss limit"
        );
        let when = if mid_cycle { " mid-cycle" } else { "" };
        self.notify(
            session,
            AlertCategory::Session,
            format!(
                "Auto-arb STOPPED{}: loss limit (${}) hit. P&L: ${} after {} trades.",
                when,
                session.max_loss_usd.normalize(),
                session.total_pnl_usd.round_dp(4),
                session.trades_count
            ),
        )
        .await;
        Ok(())
    }

    /// Drive ticks every `interval` until `shutdown` is set.
    ///
    /// Ticks are spawned, so a slow tick does not delay the clock; the busy
    /// guard drops the overlapping ones.
    pub async fn run(self: Arc<Self>, interval: Duration, shutdown: Arc<AtomicBool>) {
        info!(interval_secs = interval.as_secs(), "Auto-arb scheduler started");
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        while !shutdown.load(Ordering::SeqCst) {
            ticker.tick().await;
            let scheduler = self.clone();
            tokio::spawn(async move {
                if let Err(e) = scheduler.tick().await {
                    error!(error = %e, "Auto-arb tick failed");
                }
            });
        }
        info!("Auto-arb scheduler stopped");
    }

    fn reload(&self, session_id: &str) -> Result<AutoArbSession> {
        self.store
            .get_session(session_id)?
            .ok_or_else(|| EngineError::not_found("session", session_id))
    }

    fn session_lock(&self, session_id: &str) -> Arc<AsyncMutex<()>> {
        self.session_locks
            .lock()
            .entry(session_id.to_string())
            .or_default()
            .clone()
    }

    fn forget_lock(&self, session_id: &str) {
        self.session_locks.lock().remove(session_id);
    }

    async fn notify(&self, session: &AutoArbSession, category: AlertCategory, message: String) {
        if let Err(e) = self.alerts.dispatch(&session.owner_id, category, &message).await {
            warn!(session = %session.id, error = %e, "Session alert not delivered");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::strategy::{opportunity_id, ArbExecution, ArbOpportunity, ArbOutcome, MockArbRunner};
    use async_trait::async_trait;
    use rust_decimal_macros::dec;
    use std::sync::atomic::AtomicUsize;
    use tokio::sync::Notify;

    fn opportunity(sell_venue: &str, spread: Decimal) -> ArbOpportunity {
        ArbOpportunity {
            id: opportunity_id("BNB", "PancakeSwap", sell_venue),
            token: "BNB".into(),
            quote_token: "USDT".into(),
            buy_venue: "PancakeSwap".into(),
            buy_price: dec!(600),
            sell_venue: sell_venue.into(),
            sell_price: dec!(602),
            spread_bps: spread,
            estimated_profit_usd: dec!(2),
            viable: true,
            probe_amount: dec!(1),
        }
    }

    fn outcome(opp: &ArbOpportunity, profit: Decimal) -> ArbOutcome {
        ArbOutcome {
            success: true,
            message: format!("executed {}", opp.id),
            execution: Some(ArbExecution {
                opportunity_id: opp.id.clone(),
                token: opp.token.clone(),
                buy_venue: opp.buy_venue.clone(),
                sell_venue: opp.sell_venue.clone(),
                unit_amount: dec!(1),
                buy_price: opp.buy_price,
                sell_price: opp.buy_price + profit,
                profit_usd: profit,
                spread_bps: opp.spread_bps,
                buy_tx_ref: "sim_buy".into(),
                sell_tx_ref: "sim_sell".into(),
                buy_simulated: true,
                sell_simulated: true,
            }),
        }
    }

    fn scheduler(runner: MockArbRunner) -> (SessionScheduler, Arc<AlertDispatcher>) {
        scheduler_with(Arc::new(runner))
    }

    fn scheduler_with(runner: Arc<dyn ArbRunner>) -> (SessionScheduler, Arc<AlertDispatcher>) {
        let store = Arc::new(Store::new(":memory:").unwrap());
        let alerts = Arc::new(AlertDispatcher::new(store.clone(), 50));
        (SessionScheduler::new(store, runner, alerts.clone()), alerts)
    }

    /// Parks the first execution until released.
    #[derive(Default)]
    struct GatedRunner {
        entered: Notify,
        release: Notify,
        executed: AtomicUsize,
    }

    #[async_trait]
    impl ArbRunner for GatedRunner {
        async fn scan(&self) -> Vec<ArbOpportunity> {
            vec![opportunity("Thena", dec!(40)), opportunity("Biswap", dec!(35))]
        }

        async fn execute_opportunity(&self, _owner: &str, opportunity: &ArbOpportunity) -> Result<ArbOutcome> {
            if self.executed.fetch_add(1, Ordering::SeqCst) == 0 {
                self.entered.notify_one();
                self.release.notified().await;
            }
            Ok(outcome(opportunity, dec!(2)))
        }
    }

    #[tokio::test]
    async fn test_loss_limit_stops_after_crossing_trade() {
        let mut runner = MockArbRunner::new();
        runner.expect_scan().times(1).returning(|| {
            vec![
                opportunity("Thena", dec!(40)),
                opportunity("Biswap", dec!(39)),
                opportunity("ApeSwap", dec!(38)),
                opportunity("MDEX", dec!(37)),
            ]
        });
        runner
            .expect_execute_opportunity()
            .times(3)
            .returning(|_, opp| Ok(outcome(opp, dec!(-2))));

        let (scheduler, alerts) = scheduler(runner);
        scheduler.start("alice", dec!(1), dec!(5), dec!(10)).unwrap();

        let report = scheduler.tick().await.unwrap();
        assert_eq!(report.trades, 3);
        assert_eq!(report.stopped, 1);

        let session = scheduler.status("alice").unwrap().unwrap();
        assert_eq!(session.session.status, SessionStatus::Stopped);
        assert_eq!(session.session.trades_count, 3);
        assert_eq!(session.session.total_pnl_usd, dec!(-6));
        assert_eq!(session.minutes_remaining, None);

        let unread = alerts.unread("alice").unwrap();
        assert_eq!(unread.len(), 4);
        assert!(unread[0].message.starts_with("Auto-arb STOPPED mid-cycle"));
    }

    #[tokio::test]
    async fn test_only_opportunities_above_slippage_execute() {
        let mut runner = MockArbRunner::new();
        runner
            .expect_scan()
            .returning(|| vec![opportunity("Thena", dec!(33)), opportunity("Biswap", dec!(12))]);
        runner
            .expect_execute_opportunity()
            .times(1)
            .returning(|_, opp| Ok(outcome(opp, dec!(2))));

        let (scheduler, _) = scheduler(runner);
        scheduler.start("alice", dec!(2), dec!(5), dec!(20)).unwrap();

        let report = scheduler.tick().await.unwrap();
        assert_eq!(report.trades, 1);
        let status = scheduler.status("alice").unwrap().unwrap();
        assert_eq!(status.session.total_pnl_usd, dec!(2));
        assert!(status.minutes_remaining.unwrap() > 100);
    }

    #[tokio::test]
    async fn test_failed_execution_is_skipped() {
        let mut runner = MockArbRunner::new();
        runner
            .expect_scan()
            .returning(|| vec![opportunity("Thena", dec!(40)), opportunity("Biswap", dec!(35))]);
        let mut calls = 0;
        runner.expect_execute_opportunity().times(2).returning(move |_, opp| {
            calls += 1;
            if calls == 1 {
                Err(EngineError::adapter("Thena", "rpc timeout"))
            } else {
                Ok(outcome(opp, dec!(1.5)))
            }
        });

        let (scheduler, _) = scheduler(runner);
        scheduler.start("alice", dec!(1), dec!(5), dec!(10)).unwrap();
        let report = scheduler.tick().await.unwrap();

        assert_eq!(report.trades, 1);
        let session = scheduler.status("alice").unwrap().unwrap().session;
        assert_eq!(session.trades_count, 1);
        assert_eq!(session.total_pnl_usd, dec!(1.5));
    }

    #[tokio::test]
    async fn test_expired_session_is_swept_without_scanning() {
        let mut runner = MockArbRunner::new();
        runner.expect_scan().never();
        runner.expect_execute_opportunity().never();

        let (scheduler, alerts) = scheduler(runner);
        scheduler.start("alice", dec!(1), dec!(5), dec!(10)).unwrap();

        let report = scheduler
            .tick_at(Utc::now() + ChronoDuration::hours(2))
            .await
            .unwrap();
        assert_eq!(report.expired, 1);

        let session = scheduler.status("alice").unwrap().unwrap().session;
        assert_eq!(session.status, SessionStatus::Expired);
        assert!(alerts.unread("alice").unwrap()[0]
            .message
            .starts_with("Auto-arb session expired after 0 trades"));
    }

    #[tokio::test]
    async fn test_start_stop_lifecycle() {
        let (scheduler, _) = scheduler(MockArbRunner::new());

        assert!(matches!(
            scheduler.stop("alice").await,
            Err(EngineError::NotFound { .. })
        ));
        assert!(matches!(
            scheduler.start("alice", Decimal::ZERO, dec!(5), dec!(10)),
            Err(EngineError::Validation(_))
        ));

        let started = scheduler.start("alice", dec!(0.5), dec!(5), dec!(10)).unwrap();
        assert!(matches!(
            scheduler.start("alice", dec!(1), dec!(5), dec!(10)),
            Err(EngineError::InvalidState(_))
        ));

        let stopped = scheduler.stop("alice").await.unwrap();
        assert_eq!(stopped.id, started.id);
        assert_eq!(stopped.status, SessionStatus::Stopped);
        let ended_at = stopped.ended_at;

        // Stopping again is a no-op
        let again = scheduler.stop("alice").await.unwrap();
        assert_eq!(again.ended_at, ended_at);

        // A stopped session does not block a new one
        let next = scheduler.start("alice", dec!(1), dec!(5), dec!(10)).unwrap();
        assert_ne!(next.id, started.id);
    }

    #[tokio::test]
    async fn test_overlapping_tick_is_skipped() {
        let (scheduler, _) = scheduler(MockArbRunner::new());
        scheduler.busy.store(true, Ordering::SeqCst);
        assert!(scheduler.tick().await.unwrap().skipped);

        scheduler.busy.store(false, Ordering::SeqCst);
        let report = scheduler.tick().await.unwrap();
        assert!(!report.skipped);
        assert!(!scheduler.busy.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_stop_waits_for_in_flight_trade() {
        let runner = Arc::new(GatedRunner::default());
        let (scheduler, _) = scheduler_with(runner.clone());
        let scheduler = Arc::new(scheduler);
        scheduler.start("alice", dec!(1), dec!(5), dec!(10)).unwrap();

        let ticking = tokio::spawn({
            let scheduler = scheduler.clone();
            async move { scheduler.tick().await }
        });
        runner.entered.notified().await;

        let stopping = tokio::spawn({
            let scheduler = scheduler.clone();
            async move { scheduler.stop("alice").await }
        });
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!stopping.is_finished());

        runner.release.notify_one();
        let stopped = stopping.await.unwrap().unwrap();
        let report = ticking.await.unwrap().unwrap();

        assert_eq!(stopped.status, SessionStatus::Stopped);
        assert_eq!(stopped.trades_count, 1);
        assert_eq!(stopped.total_pnl_usd, dec!(2));
        assert_eq!(report.trades, 1);
        assert_eq!(runner.executed.load(Ordering::SeqCst), 1);

        let latest = scheduler.status("alice").unwrap().unwrap().session;
        assert_eq!(latest.trades_count, 1);
        assert_eq!(latest.total_pnl_usd, dec!(2));
    }

    #[tokio::test]
    async fn test_each_session_scans_on_its_turn() {
        let mut runner = MockArbRunner::new();
        runner
            .expect_scan()
            .times(2)
            .returning(|| vec![opportunity("Thena", dec!(40))]);
        runner
            .expect_execute_opportunity()
            .times(2)
            .returning(|_, opp| Ok(outcome(opp, dec!(1))));

        let (scheduler, _) = scheduler(runner);
        scheduler.start("alice", dec!(1), dec!(5), dec!(10)).unwrap();
        scheduler.start("bob", dec!(1), dec!(5), dec!(10)).unwrap();

        let report = scheduler.tick().await.unwrap();
        assert_eq!(report.sessions, 2);
        assert_eq!(report.trades, 2);
    }
}
