//! Auto-arbitrage session record.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::EngineError;
use crate::ledger::string_enum;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    Active,
    Stopped,
    Expired,
}

string_enum!(SessionStatus {
    Active => "active",
    Stopped => "stopped",
    Expired => "expired",
});

/// A time-boxed, loss-bounded automated arbitrage session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AutoArbSession {
    pub id: String,
    pub owner_id: String,
    pub started_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub max_loss_usd: Decimal,
    pub max_slippage_bps: Decimal,
    pub trades_count: u32,
    /// Running sum of every trade attributed to this session
    pub total_pnl_usd: Decimal,
    pub status: SessionStatus,
    pub ended_at: Option<DateTime<Utc>>,
}

impl AutoArbSession {
    pub fn is_active(&self) -> bool {
        self.status == SessionStatus::Active
    }

    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        now > self.expires_at
    }

    /// Loss limit is crossed once the total falls strictly below `-max_loss_usd`.
    pub fn loss_limit_breached(&self) -> bool {
        self.total_pnl_usd < -self.max_loss_usd
    }

    pub fn minutes_remaining(&self, now: DateTime<Utc>) -> i64 {
        (self.expires_at - now).num_minutes().max(0)
    }

    /// Leave the active state. Returns false if the session was already terminal.
    pub fn finish(&mut self, status: SessionStatus, at: DateTime<Utc>) -> bool {
        if !self.is_active() || status == SessionStatus::Active {
            return false;
        }
        self.status = status;
        self.ended_at = Some(at);
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use rust_decimal_macros::dec;

    fn session() -> AutoArbSession {
        let now = Utc::now();
        AutoArbSession {
            id: "ses_1".into(),
            owner_id: "alice".into(),
            started_at: now,
            expires_at: now + Duration::hours(2),
            max_loss_usd: dec!(5),
            max_slippage_bps: dec!(50),
            trades_count: 0,
            total_pnl_usd: Decimal::ZERO,
            status: SessionStatus::Active,
            ended_at: None,
        }
    }

    #[test]
    fn test_loss_limit_is_strict() {
        let mut s = session();
        s.total_pnl_usd = dec!(-5);
        assert!(!s.loss_limit_breached());
        s.total_pnl_usd = dec!(-5.01);
        assert!(s.loss_limit_breached());
    }

    #[test]
    fn test_finish_only_once() {
        let mut s = session();
        let at = Utc::now();
        assert!(s.finish(SessionStatus::Stopped, at));
        assert!(!s.finish(SessionStatus::Expired, at));
        assert_eq!(s.status, SessionStatus::Stopped);
        assert_eq!(s.ended_at, Some(at));
    }

    #[test]
    fn test_expiry_and_remaining() {
        let s = session();
        assert!(!s.is_expired_at(s.expires_at));
        assert!(s.is_expired_at(s.expires_at + Duration::seconds(1)));
        assert_eq!(s.minutes_remaining(s.expires_at + Duration::minutes(3)), 0);
        assert_eq!(s.minutes_remaining(s.started_at + Duration::minutes(30)), 90);
    }
}
