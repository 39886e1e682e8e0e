//! Position and trade records.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use std::str::FromStr;

use crate::error::EngineError;

/// Implements `as_str`, `Display` and `FromStr` for a snake_case string enum.
macro_rules! string_enum {
    ($name:ident { $($variant:ident => $text:literal),+ $(,)? }) => {
        impl $name {
            pub fn as_str(&self) -> &'static str {
                match self {
                    $($name::$variant => $text),+
                }
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl FromStr for $name {
            type Err = EngineError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s {
                    $($text => Ok($name::$variant),)+
                    other => Err(EngineError::Validation(format!(
                        "unknown {} '{}'",
                        stringify!($name),
                        other
                    ))),
                }
            }
        }
    };
}

pub(crate) use string_enum;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PositionKind {
    Yield,
    DeltaNeutral,
    Lp,
    Spot,
}

string_enum!(PositionKind {
    Yield => "yield",
    DeltaNeutral => "delta_neutral",
    Lp => "lp",
    Spot => "spot",
});

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PositionStatus {
    Open,
    Closed,
}

string_enum!(PositionStatus {
    Open => "open",
    Closed => "closed",
});

/// A tracked holding at a venue.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub id: String,
    pub owner_id: String,
    pub kind: PositionKind,
    pub venue: String,
    pub token: String,
    pub amount: Decimal,
    pub entry_price: Option<Decimal>,
    /// Supply APY at entry, in percent
    pub entry_apy: Option<Decimal>,
    pub current_value_usd: Option<Decimal>,
    pub realized_pnl_usd: Decimal,
    pub status: PositionStatus,
    pub settlement_tx_ref: Option<String>,
    pub opened_at: DateTime<Utc>,
    pub closed_at: Option<DateTime<Utc>>,
    /// Strategy-specific fields
    pub metadata: Map<String, Value>,
}

impl Position {
    pub fn is_open(&self) -> bool {
        self.status == PositionStatus::Open
    }

    pub fn meta_decimal(&self, key: &str) -> Option<Decimal> {
        match self.metadata.get(key)? {
            Value::String(s) => Decimal::from_str(s).ok(),
            Value::Number(n) => Decimal::from_str(&n.to_string()).ok(),
            _ => None,
        }
    }

    pub fn meta_bool(&self, key: &str) -> bool {
        self.metadata.get(key).and_then(Value::as_bool).unwrap_or(false)
    }

    pub fn meta_str(&self, key: &str) -> Option<&str> {
        self.metadata.get(key).and_then(Value::as_str)
    }

    /// Dollar exposure: current value, else amount × entry price, else zero.
    pub fn exposure_usd(&self) -> Decimal {
        self.current_value_usd
            .or_else(|| self.entry_price.map(|p| p * self.amount))
            .unwrap_or(Decimal::ZERO)
    }
}

/// Fields supplied by a strategy when opening a position.
#[derive(Debug, Clone, PartialEq)]
pub struct NewPosition {
    pub owner_id: String,
    pub kind: PositionKind,
    pub venue: String,
    pub token: String,
    pub amount: Decimal,
    pub entry_price: Option<Decimal>,
    pub entry_apy: Option<Decimal>,
    pub current_value_usd: Option<Decimal>,
    pub settlement_tx_ref: Option<String>,
    pub metadata: Map<String, Value>,
}

impl NewPosition {
    pub fn new(
        owner_id: impl Into<String>,
        kind: PositionKind,
        venue: impl Into<String>,
        token: impl Into<String>,
        amount: Decimal,
    ) -> Self {
        Self {
            owner_id: owner_id.into(),
            kind,
            venue: venue.into(),
            token: token.into(),
            amount,
            entry_price: None,
            entry_apy: None,
            current_value_usd: None,
            settlement_tx_ref: None,
            metadata: Map::new(),
        }
    }

    pub fn entry_price(mut self, price: Decimal) -> Self {
        self.entry_price = Some(price);
        self
    }

    pub fn entry_apy(mut self, apy: Decimal) -> Self {
        self.entry_apy = Some(apy);
        self
    }

    pub fn current_value(mut self, value_usd: Decimal) -> Self {
        self.current_value_usd = Some(value_usd);
        self
    }

    pub fn settlement(mut self, tx_ref: impl Into<String>) -> Self {
        self.settlement_tx_ref = Some(tx_ref.into());
        self
    }

    pub fn meta(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.metadata.insert(key.to_string(), value.into());
        self
    }

    /// Store a decimal in metadata as its exact string form.
    pub fn meta_decimal(self, key: &str, value: Decimal) -> Self {
        self.meta(key, value.to_string())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TradeKind {
    Swap,
    Deposit,
    Withdraw,
    ArbBuy,
    ArbSell,
    Rotation,
    DeltaSpotBuy,
    DeltaSpotSell,
    DeltaShortOpen,
    DeltaShortClose,
    Transfer,
}

string_enum!(TradeKind {
    Swap => "swap",
    Deposit => "deposit",
    Withdraw => "withdraw",
    ArbBuy => "arb_buy",
    ArbSell => "arb_sell",
    Rotation => "rotation",
    DeltaSpotBuy => "delta_spot_buy",
    DeltaSpotSell => "delta_spot_sell",
    DeltaShortOpen => "delta_short_open",
    DeltaShortClose => "delta_short_close",
    Transfer => "transfer",
});

/// An executed trade. Never modified once written.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Trade {
    pub id: String,
    pub owner_id: String,
    pub venue: String,
    pub kind: TradeKind,
    pub from_token: Option<String>,
    pub to_token: Option<String>,
    pub from_amount: Option<Decimal>,
    pub to_amount: Option<Decimal>,
    pub price_usd: Option<Decimal>,
    pub settlement_tx_ref: String,
    pub position_id: Option<String>,
    pub executed_at: DateTime<Utc>,
}

/// Fields supplied when logging a trade.
#[derive(Debug, Clone, PartialEq)]
pub struct NewTrade {
    pub owner_id: String,
    pub venue: String,
    pub kind: TradeKind,
    pub from_token: Option<String>,
    pub to_token: Option<String>,
    pub from_amount: Option<Decimal>,
    pub to_amount: Option<Decimal>,
    pub price_usd: Option<Decimal>,
    pub settlement_tx_ref: String,
    pub position_id: Option<String>,
}

impl NewTrade {
    pub fn new(
        owner_id: impl Into<String>,
        venue: impl Into<String>,
        kind: TradeKind,
        settlement_tx_ref: impl Into<String>,
    ) -> Self {
        Self {
            owner_id: owner_id.into(),
            venue: venue.into(),
            kind,
            from_token: None,
            to_token: None,
            from_amount: None,
            to_amount: None,
            price_usd: None,
            settlement_tx_ref: settlement_tx_ref.into(),
            position_id: None,
        }
    }

    pub fn from(mut self, token: &str, amount: Decimal) -> Self {
        self.from_token = Some(token.to_string());
        self.from_amount = Some(amount);
        self
    }

    pub fn to(mut self, token: &str, amount: Option<Decimal>) -> Self {
        self.to_token = Some(token.to_string());
        self.to_amount = amount;
        self
    }

    pub fn price(mut self, price_usd: Decimal) -> Self {
        self.price_usd = Some(price_usd);
        self
    }

    pub fn position(mut self, position_id: &str) -> Self {
        self.position_id = Some(position_id.to_string());
        self
    }
}

/// Aggregated view of an owner's open positions.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Portfolio {
    pub owner_id: String,
    pub total_value_usd: Decimal,
    pub yield_earned: Decimal,
    pub arb_profits: Decimal,
    pub positions: Vec<Position>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_string_enums_parse_and_display() {
        assert_eq!(TradeKind::from_str("delta_short_open").unwrap(), TradeKind::DeltaShortOpen);
        assert_eq!(TradeKind::ArbBuy.to_string(), "arb_buy");
        assert_eq!(PositionKind::from_str("delta_neutral").unwrap(), PositionKind::DeltaNeutral);
        assert!(matches!(PositionStatus::from_str("pending"), Err(EngineError::Validation(_))));
    }

    #[test]
    fn test_exposure_fallbacks() {
        let new = NewPosition::new("alice", PositionKind::Spot, "PancakeSwap", "BNB", dec!(2));
        let mut position = Position {
            id: "pos_1".into(),
            owner_id: new.owner_id,
            kind: new.kind,
            venue: new.venue,
            token: new.token,
            amount: new.amount,
            entry_price: None,
            entry_apy: None,
            current_value_usd: None,
            realized_pnl_usd: Decimal::ZERO,
            status: PositionStatus::Open,
            settlement_tx_ref: None,
            opened_at: Utc::now(),
            closed_at: None,
            metadata: Map::new(),
        };
        assert_eq!(position.exposure_usd(), Decimal::ZERO);

        position.entry_price = Some(dec!(600));
        assert_eq!(position.exposure_usd(), dec!(1200));

        position.current_value_usd = Some(dec!(1250));
        assert_eq!(position.exposure_usd(), dec!(1250));
    }

    #[test]
    fn test_metadata_accessors() {
        let new = NewPosition::new("alice", PositionKind::DeltaNeutral, "Binance", "BNB", dec!(1))
            .meta_decimal("spot_entry", dec!(600.25))
            .meta("short_simulated", true);
        assert_eq!(new.metadata["spot_entry"], Value::String("600.25".into()));
        assert_eq!(new.metadata["short_simulated"], Value::Bool(true));
    }
}
