//! SQLite persistence for engine state.
//!
//! Persists everything that must survive restarts:
//! - Positions and the append-only trade log
//! - Auto-arbitrage sessions
//! - Alert subscriptions and stored notifications
//! - Per-owner risk limits
//!
//! Decimals are stored as TEXT to keep them exact. Timestamps are RFC 3339
//! with fixed microsecond precision so lexical order matches time order.

use chrono::{DateTime, SecondsFormat, Utc};
use parking_lot::Mutex;
use rusqlite::types::Type;
use rusqlite::{params, Connection, OptionalExtension, Row};
use rust_decimal::Decimal;
use serde_json::{Map, Value};
use std::path::Path;
use std::str::FromStr;
use tracing::{debug, info};

use crate::alerts::{AlertCategory, AlertSubscription, Notification};
use crate::error::Result;
use crate::ledger::{Position, PositionStatus, Trade, TradeKind};
use crate::risk::RiskConfig;
use crate::session::{AutoArbSession, SessionStatus};
use crate::utils::new_id;

/// SQLite-backed store. Each statement runs under the connection mutex.
pub struct Store {
    conn: Mutex<Connection>,
}

impl Store {
    /// Open the database at `db_path`, creating the schema if needed.
    ///
    /// `":memory:"` gives a private in-memory database.
    pub fn new<P: AsRef<Path>>(db_path: P) -> Result<Self> {
        let conn = Connection::open(db_path.as_ref())?;
        let store = Self {
            conn: Mutex::new(conn),
        };
        store.init_schema()?;

        info!("Store initialized at {:?}", db_path.as_ref());
        Ok(store)
    }

    fn init_schema(&self) -> Result<()> {
        self.conn.lock().execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS positions (
                id TEXT PRIMARY KEY,
                owner_id TEXT NOT NULL,
                kind TEXT NOT NULL,
                venue TEXT NOT NULL,
                token TEXT NOT NULL,
                amount TEXT NOT NULL,
                entry_price TEXT,
                entry_apy TEXT,
                current_value_usd TEXT,
                realized_pnl_usd TEXT NOT NULL DEFAULT '0',
                status TEXT NOT NULL DEFAULT 'open',
                settlement_tx_ref TEXT,
                opened_at TEXT NOT NULL,
                closed_at TEXT,
                metadata TEXT NOT NULL DEFAULT '{}'
            );
            CREATE INDEX IF NOT EXISTS idx_positions_owner ON positions(owner_id, status);

            CREATE TABLE IF NOT EXISTS trades (
                id TEXT PRIMARY KEY,
                owner_id TEXT NOT NULL,
                venue TEXT NOT NULL,
                kind TEXT NOT NULL,
                from_token TEXT,
                to_token TEXT,
                from_amount TEXT,
                to_amount TEXT,
                price_usd TEXT,
                settlement_tx_ref TEXT NOT NULL,
                position_id TEXT,
                executed_at TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_trades_owner ON trades(owner_id, executed_at);

            CREATE TABLE IF NOT EXISTS sessions (
                id TEXT PRIMARY KEY,
                owner_id TEXT NOT NULL,
                started_at TEXT NOT NULL,
                expires_at TEXT NOT NULL,
                max_loss_usd TEXT NOT NULL,
                max_slippage_bps TEXT NOT NULL,
                trades_count INTEGER NOT NULL DEFAULT 0,
                total_pnl_usd TEXT NOT NULL DEFAULT '0',
                status TEXT NOT NULL,
                ended_at TEXT
            );
            CREATE INDEX IF NOT EXISTS idx_sessions_owner ON sessions(owner_id, status);

            CREATE TABLE IF NOT EXISTS alert_subscriptions (
                id TEXT PRIMARY KEY,
                owner_id TEXT NOT NULL,
                category TEXT NOT NULL,
                active INTEGER NOT NULL DEFAULT 1,
                threshold TEXT,
                last_triggered_at TEXT,
                UNIQUE(owner_id, category)
            );

            CREATE TABLE IF NOT EXISTS notifications (
                id TEXT PRIMARY KEY,
                owner_id TEXT NOT NULL,
                category TEXT NOT NULL,
                message TEXT NOT NULL,
                read INTEGER NOT NULL DEFAULT 0,
                created_at TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_notifications_owner ON notifications(owner_id, read);

            CREATE TABLE IF NOT EXISTS risk_configs (
                owner_id TEXT PRIMARY KEY,
                config TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );
            "#,
        )?;

        debug!("Database schema initialized");
        Ok(())
    }

    // ─── Positions ───

    pub fn insert_position(&self, position: &Position) -> Result<()> {
        self.conn.lock().execute(
            r#"
            INSERT INTO positions (id, owner_id, kind, venue, token, amount, entry_price, entry_apy,
                                   current_value_usd, realized_pnl_usd, status, settlement_tx_ref,
                                   opened_at, closed_at, metadata)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15)
            "#,
            params![
                position.id,
                position.owner_id,
                position.kind.as_str(),
                position.venue,
                position.token,
                position.amount.to_string(),
                position.entry_price.map(|v| v.to_string()),
                position.entry_apy.map(|v| v.to_string()),
                position.current_value_usd.map(|v| v.to_string()),
                position.realized_pnl_usd.to_string(),
                position.status.as_str(),
                position.settlement_tx_ref,
                ts(&position.opened_at),
                position.closed_at.as_ref().map(ts),
                serde_json::to_string(&position.metadata)?,
            ],
        )?;
        Ok(())
    }

    /// Overwrite the mutable columns of a position.
    pub fn update_position(&self, position: &Position) -> Result<()> {
        self.conn.lock().execute(
            r#"
            UPDATE positions SET current_value_usd = ?2, realized_pnl_usd = ?3, status = ?4,
                                 settlement_tx_ref = ?5, closed_at = ?6, metadata = ?7
            WHERE id = ?1
            "#,
            params![
                position.id,
                position.current_value_usd.map(|v| v.to_string()),
                position.realized_pnl_usd.to_string(),
                position.status.as_str(),
                position.settlement_tx_ref,
                position.closed_at.as_ref().map(ts),
                serde_json::to_string(&position.metadata)?,
            ],
        )?;
        Ok(())
    }

    pub fn get_position(&self, id: &str) -> Result<Option<Position>> {
        let conn = self.conn.lock();
        let position = conn
            .query_row(
                &format!("SELECT {} FROM positions WHERE id = ?1", POSITION_COLUMNS),
                [id],
                position_from_row,
            )
            .optional()?;
        Ok(position)
    }

    /// Positions filtered by owner and status, newest first.
    pub fn list_positions(
        &self,
        owner: Option<&str>,
        status: Option<PositionStatus>,
    ) -> Result<Vec<Position>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(&format!(
            r#"
            SELECT {} FROM positions
            WHERE (?1 IS NULL OR owner_id = ?1) AND (?2 IS NULL OR status = ?2)
            ORDER BY opened_at DESC, rowid DESC
            "#,
            POSITION_COLUMNS
        ))?;
        let positions = stmt
            .query_map(params![owner, status.map(|s| s.as_str())], position_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(positions)
    }

    // ─── Trades ───

    pub fn insert_trade(&self, trade: &Trade) -> Result<()> {
        self.conn.lock().execute(
            r#"
            INSERT INTO trades (id, owner_id, venue, kind, from_token, to_token, from_amount,
                                to_amount, price_usd, settlement_tx_ref, position_id, executed_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)
            "#,
            params![
                trade.id,
                trade.owner_id,
                trade.venue,
                trade.kind.as_str(),
                trade.from_token,
                trade.to_token,
                trade.from_amount.map(|v| v.to_string()),
                trade.to_amount.map(|v| v.to_string()),
                trade.price_usd.map(|v| v.to_string()),
                trade.settlement_tx_ref,
                trade.position_id,
                ts(&trade.executed_at),
            ],
        )?;
        Ok(())
    }

    /// Most recent trades for `owner`, optionally of one kind.
    pub fn list_trades(&self, owner: &str, limit: usize, kind: Option<TradeKind>) -> Result<Vec<Trade>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            r#"
            SELECT id, owner_id, venue, kind, from_token, to_token, from_amount, to_amount,
                   price_usd, settlement_tx_ref, position_id, executed_at
            FROM trades
            WHERE owner_id = ?1 AND (?2 IS NULL OR kind = ?2)
            ORDER BY executed_at DESC, rowid DESC
            LIMIT ?3
            "#,
        )?;
        let trades = stmt
            .query_map(
                params![owner, kind.map(|k| k.as_str()), limit as i64],
                |row| {
                    Ok(Trade {
                        id: row.get(0)?,
                        owner_id: row.get(1)?,
                        venue: row.get(2)?,
                        kind: parse_col(row, 3)?,
                        from_token: row.get(4)?,
                        to_token: row.get(5)?,
                        from_amount: opt_decimal_col(row, 6)?,
                        to_amount: opt_decimal_col(row, 7)?,
                        price_usd: opt_decimal_col(row, 8)?,
                        settlement_tx_ref: row.get(9)?,
                        position_id: row.get(10)?,
                        executed_at: time_col(row, 11)?,
                    })
                },
            )?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(trades)
    }

    // ─── Sessions ───

    pub fn insert_session(&self, session: &AutoArbSession) -> Result<()> {
        self.conn.lock().execute(
            r#"
            INSERT INTO sessions (id, owner_id, started_at, expires_at, max_loss_usd, max_slippage_bps,
                                  trades_count, total_pnl_usd, status, ended_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
            "#,
            params![
                session.id,
                session.owner_id,
                ts(&session.started_at),
                ts(&session.expires_at),
                session.max_loss_usd.to_string(),
                session.max_slippage_bps.to_string(),
                session.trades_count,
                session.total_pnl_usd.to_string(),
                session.status.as_str(),
                session.ended_at.as_ref().map(ts),
            ],
        )?;
        Ok(())
    }

    pub fn update_session(&self, session: &AutoArbSession) -> Result<()> {
        self.conn.lock().execute(
            r#"
            UPDATE sessions SET trades_count = ?2, total_pnl_usd = ?3, status = ?4, ended_at = ?5
            WHERE id = ?1
            "#,
            params![
                session.id,
                session.trades_count,
                session.total_pnl_usd.to_string(),
                session.status.as_str(),
                session.ended_at.as_ref().map(ts),
            ],
        )?;
        Ok(())
    }

    pub fn get_session(&self, id: &str) -> Result<Option<AutoArbSession>> {
        let conn = self.conn.lock();
        let session = conn
            .query_row(
                &format!("SELECT {} FROM sessions WHERE id = ?1", SESSION_COLUMNS),
                [id],
                session_from_row,
            )
            .optional()?;
        Ok(session)
    }

    /// The owner's most recently started session, in any state.
    pub fn latest_session(&self, owner: &str) -> Result<Option<AutoArbSession>> {
        let conn = self.conn.lock();
        let session = conn
            .query_row(
                &format!(
                    "SELECT {} FROM sessions WHERE owner_id = ?1 ORDER BY started_at DESC, rowid DESC LIMIT 1",
                    SESSION_COLUMNS
                ),
                [owner],
                session_from_row,
            )
            .optional()?;
        Ok(session)
    }

    pub fn active_sessions(&self) -> Result<Vec<AutoArbSession>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM sessions WHERE status = 'active' ORDER BY started_at, rowid",
            SESSION_COLUMNS
        ))?;
        let sessions = stmt
            .query_map([], session_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(sessions)
    }

    // ─── Alert subscriptions ───

    /// Insert or update the owner's subscription for `category`.
    pub fn upsert_subscription(
        &self,
        owner: &str,
        category: AlertCategory,
        active: bool,
        threshold: Option<Decimal>,
    ) -> Result<AlertSubscription> {
        let conn = self.conn.lock();
        conn.execute(
            r#"
            INSERT INTO alert_subscriptions (id, owner_id, category, active, threshold)
            VALUES (?1, ?2, ?3, ?4, ?5)
            ON CONFLICT(owner_id, category) DO UPDATE SET
                active = excluded.active,
                threshold = excluded.threshold
            "#,
            params![
                new_id("alr"),
                owner,
                category.as_str(),
                active,
                threshold.map(|v| v.to_string()),
            ],
        )?;
        let subscription = conn.query_row(
            &format!(
                "SELECT {} FROM alert_subscriptions WHERE owner_id = ?1 AND category = ?2",
                SUBSCRIPTION_COLUMNS
            ),
            params![owner, category.as_str()],
            subscription_from_row,
        )?;
        Ok(subscription)
    }

    pub fn subscriptions(&self, owner: &str) -> Result<Vec<AlertSubscription>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM alert_subscriptions WHERE owner_id = ?1 ORDER BY category",
            SUBSCRIPTION_COLUMNS
        ))?;
        let subscriptions = stmt
            .query_map([owner], subscription_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(subscriptions)
    }

    /// Active subscriptions for `category` across all owners.
    pub fn subscribers(&self, category: AlertCategory) -> Result<Vec<AlertSubscription>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM alert_subscriptions WHERE category = ?1 AND active = 1 ORDER BY owner_id",
            SUBSCRIPTION_COLUMNS
        ))?;
        let subscriptions = stmt
            .query_map([category.as_str()], subscription_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(subscriptions)
    }

    pub fn mark_triggered(&self, subscription_id: &str, at: DateTime<Utc>) -> Result<()> {
        self.conn.lock().execute(
            "UPDATE alert_subscriptions SET last_triggered_at = ?2 WHERE id = ?1",
            params![subscription_id, ts(&at)],
        )?;
        Ok(())
    }

    // ─── Notifications ───

    pub fn insert_notification(&self, notification: &Notification) -> Result<()> {
        self.conn.lock().execute(
            r#"
            INSERT INTO notifications (id, owner_id, category, message, read, created_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6)
            "#,
            params![
                notification.id,
                notification.owner_id,
                notification.category.as_str(),
                notification.message,
                notification.read,
                ts(&notification.created_at),
            ],
        )?;
        Ok(())
    }

    /// Notifications for `owner`, newest first.
    pub fn notifications(&self, owner: &str, unread_only: bool, limit: usize) -> Result<Vec<Notification>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            r#"
            SELECT id, owner_id, category, message, read, created_at
            FROM notifications
            WHERE owner_id = ?1 AND (?2 = 0 OR read = 0)
            ORDER BY created_at DESC, rowid DESC
            LIMIT ?3
            "#,
        )?;
        let notifications = stmt
            .query_map(params![owner, unread_only, limit as i64], |row| {
                Ok(Notification {
                    id: row.get(0)?,
                    owner_id: row.get(1)?,
                    category: parse_col(row, 2)?,
                    message: row.get(3)?,
                    read: row.get(4)?,
                    created_at: time_col(row, 5)?,
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(notifications)
    }

    /// Mark every unread notification of `owner` as read. Returns how many changed.
    pub fn mark_read(&self, owner: &str) -> Result<usize> {
        let changed = self.conn.lock().execute(
            "UPDATE notifications SET read = 1 WHERE owner_id = ?1 AND read = 0",
            [owner],
        )?;
        Ok(changed)
    }

    // ─── Risk configs ───

    pub fn risk_config(&self, owner: &str) -> Result<Option<RiskConfig>> {
        let raw: Option<String> = self
            .conn
            .lock()
            .query_row(
                "SELECT config FROM risk_configs WHERE owner_id = ?1",
                [owner],
                |row| row.get(0),
            )
            .optional()?;
        match raw {
            Some(json) => Ok(Some(serde_json::from_str(&json)?)),
            None => Ok(None),
        }
    }

    pub fn save_risk_config(&self, owner: &str, config: &RiskConfig) -> Result<()> {
        self.conn.lock().execute(
            r#"
            INSERT INTO risk_configs (owner_id, config, updated_at) VALUES (?1, ?2, ?3)
            ON CONFLICT(owner_id) DO UPDATE SET config = excluded.config, updated_at = excluded.updated_at
            "#,
            params![owner, serde_json::to_string(config)?, ts(&Utc::now())],
        )?;
        Ok(())
    }
}

const POSITION_COLUMNS: &str = "id, owner_id, kind, venue, token, amount, entry_price, entry_apy, \
     current_value_usd, realized_pnl_usd, status, settlement_tx_ref, opened_at, closed_at, metadata";

const SESSION_COLUMNS: &str = "id, owner_id, started_at, expires_at, max_loss_usd, max_slippage_bps, \
     trades_count, total_pnl_usd, status, ended_at";

const SUBSCRIPTION_COLUMNS: &str = "id, owner_id, category, active, threshold, last_triggered_at";

fn position_from_row(row: &Row<'_>) -> rusqlite::Result<Position> {
    let metadata: String = row.get(14)?;
    let metadata: Map<String, Value> = serde_json::from_str(&metadata)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(14, Type::Text, Box::new(e)))?;
    Ok(Position {
        id: row.get(0)?,
        owner_id: row.get(1)?,
        kind: parse_col(row, 2)?,
        venue: row.get(3)?,
        token: row.get(4)?,
        amount: decimal_col(row, 5)?,
        entry_price: opt_decimal_col(row, 6)?,
        entry_apy: opt_decimal_col(row, 7)?,
        current_value_usd: opt_decimal_col(row, 8)?,
        realized_pnl_usd: decimal_col(row, 9)?,
        status: parse_col(row, 10)?,
        settlement_tx_ref: row.get(11)?,
        opened_at: time_col(row, 12)?,
        closed_at: opt_time_col(row, 13)?,
        metadata,
    })
}

fn session_from_row(row: &Row<'_>) -> rusqlite::Result<AutoArbSession> {
    Ok(AutoArbSession {
        id: row.get(0)?,
        owner_id: row.get(1)?,
        started_at: time_col(row, 2)?,
        expires_at: time_col(row, 3)?,
        max_loss_usd: decimal_col(row, 4)?,
        max_slippage_bps: decimal_col(row, 5)?,
        trades_count: row.get(6)?,
        total_pnl_usd: decimal_col(row, 7)?,
        status: parse_col::<SessionStatus>(row, 8)?,
        ended_at: opt_time_col(row, 9)?,
    })
}

fn subscription_from_row(row: &Row<'_>) -> rusqlite::Result<AlertSubscription> {
    Ok(AlertSubscription {
        id: row.get(0)?,
        owner_id: row.get(1)?,
        category: parse_col(row, 2)?,
        active: row.get(3)?,
        threshold: opt_decimal_col(row, 4)?,
        last_triggered_at: opt_time_col(row, 5)?,
    })
}

fn ts(at: &DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn conversion_error<E>(idx: usize, err: E) -> rusqlite::Error
where
    E: std::error::Error + Send + Sync + 'static,
{
    rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(err))
}

fn parse_col<T>(row: &Row<'_>, idx: usize) -> rusqlite::Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    let raw: String = row.get(idx)?;
    raw.parse::<T>().map_err(|e| conversion_error(idx, e))
}

fn decimal_col(row: &Row<'_>, idx: usize) -> rusqlite::Result<Decimal> {
    parse_col(row, idx)
}

fn opt_decimal_col(row: &Row<'_>, idx: usize) -> rusqlite::Result<Option<Decimal>> {
    let raw: Option<String> = row.get(idx)?;
    raw.map(|s| Decimal::from_str(&s).map_err(|e| conversion_error(idx, e)))
        .transpose()
}

fn time_col(row: &Row<'_>, idx: usize) -> rusqlite::Result<DateTime<Utc>> {
    let raw: String = row.get(idx)?;
    DateTime::parse_from_rfc3339(&raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| conversion_error(idx, e))
}

fn opt_time_col(row: &Row<'_>, idx: usize) -> rusqlite::Result<Option<DateTime<Utc>>> {
    let raw: Option<String> = row.get(idx)?;
    raw.map(|s| {
        DateTime::parse_from_rfc3339(&s)
            .map(|dt| dt.with_timezone(&Utc))
            .map_err(|e| conversion_error(idx, e))
    })
    .transpose()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::PositionKind;
    use chrono::Duration;
    use rust_decimal_macros::dec;

    fn position(owner: &str, status: PositionStatus) -> Position {
        let mut metadata = Map::new();
        metadata.insert("is_arb".into(), Value::Bool(true));
        Position {
            id: new_id("pos"),
            owner_id: owner.into(),
            kind: PositionKind::Spot,
            venue: "PancakeSwap".into(),
            token: "BNB".into(),
            amount: dec!(1.5),
            entry_price: Some(dec!(600.123456789)),
            entry_apy: None,
            current_value_usd: None,
            realized_pnl_usd: dec!(0.25),
            status,
            settlement_tx_ref: Some("0xabc".into()),
            opened_at: Utc::now(),
            closed_at: None,
            metadata,
        }
    }

    #[test]
    fn test_position_roundtrip_keeps_precision() {
        let store = Store::new(":memory:").unwrap();
        let pos = position("alice", PositionStatus::Open);
        store.insert_position(&pos).unwrap();

        let loaded = store.get_position(&pos.id).unwrap().unwrap();
        assert_eq!(loaded.entry_price, Some(dec!(600.123456789)));
        assert_eq!(loaded.metadata, pos.metadata);
        assert!(store.get_position("pos_missing").unwrap().is_none());
    }

    #[test]
    fn test_list_positions_filters() {
        let store = Store::new(":memory:").unwrap();
        store.insert_position(&position("alice", PositionStatus::Open)).unwrap();
        store.insert_position(&position("alice", PositionStatus::Closed)).unwrap();
        store.insert_position(&position("bob", PositionStatus::Open)).unwrap();

        assert_eq!(store.list_positions(Some("alice"), None).unwrap().len(), 2);
        assert_eq!(
            store
                .list_positions(Some("alice"), Some(PositionStatus::Open))
                .unwrap()
                .len(),
            1
        );
        assert_eq!(store.list_positions(None, Some(PositionStatus::Open)).unwrap().len(), 2);
    }

    #[test]
    fn test_sessions_latest_and_active() {
        let store = Store::new(":memory:").unwrap();
        let now = Utc::now();
        let mut first = AutoArbSession {
            id: new_id("ses"),
            owner_id: "alice".into(),
            started_at: now - Duration::hours(3),
            expires_at: now - Duration::hours(1),
            max_loss_usd: dec!(5),
            max_slippage_bps: dec!(50),
            trades_count: 0,
            total_pnl_usd: Decimal::ZERO,
            status: SessionStatus::Active,
            ended_at: None,
        };
        store.insert_session(&first).unwrap();
        first.finish(SessionStatus::Expired, now);
        first.trades_count = 2;
        first.total_pnl_usd = dec!(-1.5);
        store.update_session(&first).unwrap();

        let second = AutoArbSession {
            id: new_id("ses"),
            started_at: now,
            expires_at: now + Duration::hours(1),
            status: SessionStatus::Active,
            ended_at: None,
            ..first.clone()
        };
        store.insert_session(&second).unwrap();

        assert_eq!(store.latest_session("alice").unwrap().unwrap().id, second.id);
        let active = store.active_sessions().unwrap();
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].id, second.id);

        let reloaded = store.get_session(&first.id).unwrap().unwrap();
        assert_eq!(reloaded.status, SessionStatus::Expired);
        assert_eq!(reloaded.total_pnl_usd, dec!(-1.5));
    }

    #[test]
    fn test_subscription_upsert_is_unique_per_category() {
        let store = Store::new(":memory:").unwrap();
        let first = store
            .upsert_subscription("alice", AlertCategory::ApyDrop, true, Some(dec!(0.5)))
            .unwrap();
        let second = store
            .upsert_subscription("alice", AlertCategory::ApyDrop, false, Some(dec!(1)))
            .unwrap();

        assert_eq!(first.id, second.id);
        assert!(!second.active);
        assert_eq!(second.threshold, Some(dec!(1)));
        assert!(store.subscribers(AlertCategory::ApyDrop).unwrap().is_empty());
    }

    #[test]
    fn test_notifications_read_flow() {
        let store = Store::new(":memory:").unwrap();
        for i in 0..3 {
            store
                .insert_notification(&Notification {
                    id: new_id("ntf"),
                    owner_id: "alice".into(),
                    category: AlertCategory::Session,
                    message: format!("message {}", i),
                    read: false,
                    created_at: Utc::now(),
                })
                .unwrap();
        }

        let unread = store.notifications("alice", true, 10).unwrap();
        assert_eq!(unread.len(), 3);
        assert_eq!(unread[0].message, "message 2");
        assert_eq!(store.mark_read("alice").unwrap(), 3);
        assert!(store.notifications("alice", true, 10).unwrap().is_empty());
        assert_eq!(store.notifications("alice", false, 10).unwrap().len(), 3);
    }

    #[test]
    fn test_risk_config_roundtrip() {
        let store = Store::new(":memory:").unwrap();
        assert!(store.risk_config("alice").unwrap().is_none());

        let config = RiskConfig {
            allowed_venues: vec!["Venus".into()],
            ..RiskConfig::default()
        };
        store.save_risk_config("alice", &config).unwrap();
        store.save_risk_config("alice", &config).unwrap();
        assert_eq!(store.risk_config("alice").unwrap(), Some(config));
    }
}
