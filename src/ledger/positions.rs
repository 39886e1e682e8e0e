//! Position lifecycle and portfolio aggregation.
//!
//! This is the only writer of position rows. A position moves from open to
//! closed exactly once; afterwards the record is frozen.

use chrono::Utc;
use parking_lot::Mutex;
use rust_decimal::Decimal;
use serde_json::Value;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, info};

use super::types::{NewPosition, Portfolio, Position, PositionKind, PositionStatus};
use crate::error::{EngineError, Result};
use crate::persistence::Store;
use crate::utils::new_id;

pub struct PositionLedger {
    store: Arc<Store>,
    claims: Mutex<HashSet<String>>,
}

/// Exclusive right to unwind one position; released on drop.
pub struct PositionClaim<'a> {
    claims: &'a Mutex<HashSet<String>>,
    id: String,
}

impl Drop for PositionClaim<'_> {
    fn drop(&mut self) {
        self.claims.lock().remove(&self.id);
    }
}

impl PositionLedger {
    pub fn new(store: Arc<Store>) -> Self {
        Self {
            store,
            claims: Mutex::new(HashSet::new()),
        }
    }

    /// Claim an open position before any external call that unwinds it.
    ///
    /// Returns the claim and a fresh read of the position. Fails with
    /// InvalidState if another caller holds the claim or the position is
    /// already closed.
    pub fn claim(&self, id: &str) -> Result<(PositionClaim<'_>, Position)> {
        if !self.claims.lock().insert(id.to_string()) {
            return Err(EngineError::InvalidState(format!(
                "position {} is already being closed",
                id
            )));
        }
        let claim = PositionClaim {
            claims: &self.claims,
            id: id.to_string(),
        };
        let position = self.get(id)?;
        if !position.is_open() {
            return Err(EngineError::InvalidState(format!(
                "position {} is already closed",
                id
            )));
        }
        Ok((claim, position))
    }

    /// Record a new open position.
    pub fn open(&self, spec: NewPosition) -> Result<Position> {
        let position = Position {
            id: new_id("pos"),
            owner_id: spec.owner_id,
            kind: spec.kind,
            venue: spec.venue,
            token: spec.token,
            amount: spec.amount,
            entry_price: spec.entry_price,
            entry_apy: spec.entry_apy,
            current_value_usd: spec.current_value_usd,
            realized_pnl_usd: Decimal::ZERO,
            status: PositionStatus::Open,
            settlement_tx_ref: spec.settlement_tx_ref,
            opened_at: Utc::now(),
            closed_at: None,
            metadata: spec.metadata,
        };
        self.store.insert_position(&position)?;

        info!(
            id = %position.id,
            owner = %position.owner_id,
            kind = %position.kind,
            venue = %position.venue,
            token = %position.token,
            amount = %position.amount,
            "Position opened"
        );
        Ok(position)
    }

    /// Close an open position, annotating `metadata.close_ref`.
    pub fn close(&self, id: &str, settlement_ref: Option<&str>) -> Result<Position> {
        let mut position = self.get(id)?;
        if !position.is_open() {
            return Err(EngineError::InvalidState(format!(
                "position {} is already closed",
                id
            )));
        }

        position.status = PositionStatus::Closed;
        position.closed_at = Some(Utc::now());
        position.metadata.insert(
            "close_ref".to_string(),
            settlement_ref.map_or(Value::Null, |r| Value::String(r.to_string())),
        );
        self.store.update_position(&position)?;

        info!(%id, owner = %position.owner_id, close_ref = ?settlement_ref, "Position closed");
        Ok(position)
    }

    pub fn get(&self, id: &str) -> Result<Position> {
        self.store
            .get_position(id)?
            .ok_or_else(|| EngineError::not_found("position", id))
    }

    pub fn list(&self, owner: &str, status: Option<PositionStatus>) -> Result<Vec<Position>> {
        self.store.list_positions(Some(owner), status)
    }

    /// Every open position across owners, for monitors.
    pub fn all_open(&self) -> Result<Vec<Position>> {
        self.store.list_positions(None, Some(PositionStatus::Open))
    }

    /// Update externally observed value and, optionally, realized PnL.
    pub fn refresh_value(
        &self,
        id: &str,
        current_value_usd: Decimal,
        realized_pnl_usd: Option<Decimal>,
    ) -> Result<Position> {
        let mut position = self.get(id)?;
        if !position.is_open() {
            return Err(EngineError::InvalidState(format!(
                "position {} is closed and cannot be revalued",
                id
            )));
        }

        position.current_value_usd = Some(current_value_usd);
        if let Some(pnl) = realized_pnl_usd {
            position.realized_pnl_usd = pnl;
        }
        self.store.update_position(&position)?;

        debug!(%id, value = %current_value_usd, "Position value refreshed");
        Ok(position)
    }

    pub fn exposure_usd(&self, position: &Position) -> Decimal {
        position.exposure_usd()
    }

    /// Aggregate an owner's open positions.
    pub fn portfolio(&self, owner: &str) -> Result<Portfolio> {
        let positions = self.list(owner, Some(PositionStatus::Open))?;

        let total_value_usd = positions
            .iter()
            .filter_map(|p| p.current_value_usd)
            .sum();
        let yield_earned = positions
            .iter()
            .filter(|p| p.kind == PositionKind::Yield)
            .map(|p| p.realized_pnl_usd)
            .sum();
        let arb_profits = positions
            .iter()
            .filter(|p| p.kind == PositionKind::Spot && p.meta_bool("is_arb"))
            .map(|p| p.realized_pnl_usd)
            .sum();

        Ok(Portfolio {
            owner_id: owner.to_string(),
            total_value_usd,
            yield_earned,
            arb_profits,
            positions,
        })
    }
}
