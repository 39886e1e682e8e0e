//! Append-only trade log.

use chrono::Utc;
use std::sync::Arc;
use tracing::info;

use super::types::{NewTrade, Trade, TradeKind};
use crate::error::Result;
use crate::persistence::Store;
use crate::utils::new_id;

/// Default number of rows returned by [`TradeLog::history`].
pub const DEFAULT_HISTORY_LIMIT: usize = 50;

pub struct TradeLog {
    store: Arc<Store>,
}

impl TradeLog {
    pub fn new(store: Arc<Store>) -> Self {
        Self { store }
    }

    pub fn append(&self, trade: NewTrade) -> Result<Trade> {
        let trade = Trade {
            id: new_id("trd"),
            owner_id: trade.owner_id,
            venue: trade.venue,
            kind: trade.kind,
            from_token: trade.from_token,
            to_token: trade.to_token,
            from_amount: trade.from_amount,
            to_amount: trade.to_amount,
            price_usd: trade.price_usd,
            settlement_tx_ref: trade.settlement_tx_ref,
            position_id: trade.position_id,
            executed_at: Utc::now(),
        };
        self.store.insert_trade(&trade)?;

        info!(
            id = %trade.id,
            owner = %trade.owner_id,
            kind = %trade.kind,
            venue = %trade.venue,
            tx = %trade.settlement_tx_ref,
            "Trade logged"
        );
        Ok(trade)
    }

    /// Newest-first trade history, `limit` defaulting to 50.
    pub fn history(&self, owner: &str, limit: Option<usize>, kind: Option<TradeKind>) -> Result<Vec<Trade>> {
        self.store
            .list_trades(owner, limit.unwrap_or(DEFAULT_HISTORY_LIMIT), kind)
    }
}
