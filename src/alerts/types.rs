//! Notification and subscription records.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::EngineError;
use crate::ledger::string_enum;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertCategory {
    ApyDrop,
    ArbOpportunity,
    PositionHealth,
    Session,
}

string_enum!(AlertCategory {
    ApyDrop => "apy_drop",
    ArbOpportunity => "arb_opportunity",
    PositionHealth => "position_health",
    Session => "session",
});

/// Stored message for an owner.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Notification {
    pub id: String,
    pub owner_id: String,
    pub category: AlertCategory,
    pub message: String,
    pub read: bool,
    pub created_at: DateTime<Utc>,
}

/// Owner opt-in for a category of alerts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlertSubscription {
    pub id: String,
    pub owner_id: String,
    pub category: AlertCategory,
    pub active: bool,
    pub threshold: Option<Decimal>,
    pub last_triggered_at: Option<DateTime<Utc>>,
}
