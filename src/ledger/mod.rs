//! Position ledger and trade log.

mod positions;
mod trades;
mod types;

pub use positions::{PositionClaim, PositionLedger};
pub use trades::{TradeLog, DEFAULT_HISTORY_LIMIT};
pub(crate) use types::string_enum;
pub use types::{
    NewPosition, NewTrade, Portfolio, Position, PositionKind, PositionStatus, Trade, TradeKind,
};
