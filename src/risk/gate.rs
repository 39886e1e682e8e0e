//! Per-owner risk limits and the pre-trade gate every strategy passes.
//!
//! Checks run in a fixed order and stop at the first failure:
//! 1. Single position size
//! 2. Total open exposure including the new action
//! 3. Slippage tolerance
//! 4. Venue allow-list
//! 5. Concurrent delta-neutral positions

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::error::{EngineError, Result};
use crate::ledger::{Position, PositionKind, PositionStatus};
use crate::persistence::Store;
use crate::utils::decimal::usd;

/// Risk limits for one owner.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RiskConfig {
    /// Maximum size of a single action in USD
    #[serde(default = "default_max_position_usd")]
    pub max_position_usd: Decimal,
    /// Maximum open exposure across all positions in USD
    #[serde(default = "default_max_total_exposure_usd")]
    pub max_total_exposure_usd: Decimal,
    #[serde(default = "default_max_slippage_bps")]
    pub max_slippage_bps: Decimal,
    /// Venues the owner allows; empty means unrestricted
    #[serde(default)]
    pub allowed_venues: Vec<String>,
    #[serde(default = "default_max_delta_neutral")]
    pub max_concurrent_delta_neutral_positions: u32,
}

fn default_max_position_usd() -> Decimal {
    Decimal::new(1000, 0)
}

fn default_max_total_exposure_usd() -> Decimal {
    Decimal::new(5000, 0)
}

fn default_max_slippage_bps() -> Decimal {
    Decimal::new(100, 0) // 1%
}

fn default_max_delta_neutral() -> u32 {
    3
}

impl Default for RiskConfig {
    fn default() -> Self {
        Self {
            max_position_usd: default_max_position_usd(),
            max_total_exposure_usd: default_max_total_exposure_usd(),
            max_slippage_bps: default_max_slippage_bps(),
            allowed_venues: Vec::new(),
            max_concurrent_delta_neutral_positions: default_max_delta_neutral(),
        }
    }
}

impl RiskConfig {
    pub fn validate(&self) -> Result<()> {
        if self.max_position_usd < Decimal::ZERO
            || self.max_total_exposure_usd < Decimal::ZERO
            || self.max_slippage_bps < Decimal::ZERO
        {
            return Err(EngineError::Validation(
                "risk limits must not be negative".to_string(),
            ));
        }
        Ok(())
    }

    fn venue_allowed(&self, venue: &str) -> bool {
        self.allowed_venues.is_empty()
            || self
                .allowed_venues
                .iter()
                .any(|v| v.eq_ignore_ascii_case(venue))
    }
}

/// Partial update merged into a stored [`RiskConfig`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RiskConfigPatch {
    pub max_position_usd: Option<Decimal>,
    pub max_total_exposure_usd: Option<Decimal>,
    pub max_slippage_bps: Option<Decimal>,
    pub allowed_venues: Option<Vec<String>>,
    pub max_concurrent_delta_neutral_positions: Option<u32>,
}

impl RiskConfigPatch {
    pub fn apply(&self, config: &mut RiskConfig) {
        if let Some(v) = self.max_position_usd {
            config.max_position_usd = v;
        }
        if let Some(v) = self.max_total_exposure_usd {
            config.max_total_exposure_usd = v;
        }
        if let Some(v) = self.max_slippage_bps {
            config.max_slippage_bps = v;
        }
        if let Some(v) = &self.allowed_venues {
            config.allowed_venues = v.clone();
        }
        if let Some(v) = self.max_concurrent_delta_neutral_positions {
            config.max_concurrent_delta_neutral_positions = v;
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RiskActionKind {
    Deposit,
    Swap,
    Arb,
    DeltaNeutral,
}

/// An action submitted for validation.
#[derive(Debug, Clone, PartialEq)]
pub struct RiskAction {
    pub kind: RiskActionKind,
    pub amount_usd: Decimal,
    pub venue: Option<String>,
    pub slippage_bps: Option<Decimal>,
}

impl RiskAction {
    pub fn new(kind: RiskActionKind, amount_usd: Decimal) -> Self {
        Self {
            kind,
            amount_usd,
            venue: None,
            slippage_bps: None,
        }
    }

    pub fn venue(mut self, venue: &str) -> Self {
        self.venue = Some(venue.to_string());
        self
    }

    pub fn slippage_bps(mut self, bps: Decimal) -> Self {
        self.slippage_bps = Some(bps);
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RiskDecision {
    Allowed,
    Rejected(String),
}

impl RiskDecision {
    pub fn is_allowed(&self) -> bool {
        matches!(self, RiskDecision::Allowed)
    }

    /// Convert a rejection into [`EngineError::RiskRejected`].
    pub fn into_result(self) -> Result<()> {
        match self {
            RiskDecision::Allowed => Ok(()),
            RiskDecision::Rejected(reason) => Err(EngineError::RiskRejected(reason)),
        }
    }
}

/// Evaluate `action` against `config` and the owner's open positions.
pub fn evaluate(config: &RiskConfig, open_positions: &[Position], action: &RiskAction) -> RiskDecision {
    if action.amount_usd > config.max_position_usd {
        return RiskDecision::Rejected(format!(
            "Position size ${} exceeds max ${}. Update risk settings to increase.",
            usd(action.amount_usd),
            usd(config.max_position_usd)
        ));
    }

    let exposure: Decimal = open_positions
        .iter()
        .filter(|p| p.is_open())
        .map(Position::exposure_usd)
        .sum();
    let projected = exposure + action.amount_usd;
    if projected > config.max_total_exposure_usd {
        return RiskDecision::Rejected(format!(
            "Total exposure would be ${}, exceeding max ${}.",
            usd(projected),
            usd(config.max_total_exposure_usd)
        ));
    }

    if let Some(slippage) = action.slippage_bps {
        if slippage > config.max_slippage_bps {
            return RiskDecision::Rejected(format!(
                "Slippage {} bps exceeds max {} bps.",
                slippage.normalize(),
                config.max_slippage_bps.normalize()
            ));
        }
    }

    if let Some(venue) = &action.venue {
        if !config.venue_allowed(venue) {
            return RiskDecision::Rejected(format!(
                "Venue \"{}\" is not in your allowed list: {}.",
                venue,
                config.allowed_venues.join(", ")
            ));
        }
    }

    if action.kind == RiskActionKind::DeltaNeutral {
        let open = open_positions
            .iter()
            .filter(|p| p.is_open() && p.kind == PositionKind::DeltaNeutral)
            .count();
        if open as u32 >= config.max_concurrent_delta_neutral_positions {
            return RiskDecision::Rejected(format!(
                "Already have {} delta-neutral positions (max: {}).",
                open, config.max_concurrent_delta_neutral_positions
            ));
        }
    }

    RiskDecision::Allowed
}

/// Store-backed risk gate.
pub struct RiskGate {
    store: Arc<Store>,
    defaults: RiskConfig,
}

impl RiskGate {
    pub fn new(store: Arc<Store>, defaults: RiskConfig) -> Self {
        Self { store, defaults }
    }

    /// Current limits for `owner`, falling back to the configured defaults.
    pub fn config_for(&self, owner: &str) -> Result<RiskConfig> {
        Ok(self
            .store
            .risk_config(owner)?
            .unwrap_or_else(|| self.defaults.clone()))
    }

    /// Merge `patch` into the stored limits and persist the result.
    pub fn configure(&self, owner: &str, patch: &RiskConfigPatch) -> Result<RiskConfig> {
        let mut config = self.config_for(owner)?;
        patch.apply(&mut config);
        config.validate()?;
        self.store.save_risk_config(owner, &config)?;
        info!(%owner, ?config, "Risk config updated");
        Ok(config)
    }

    pub fn check(&self, owner: &str, action: &RiskAction) -> Result<RiskDecision> {
        let config = self.config_for(owner)?;
        let positions = self
            .store
            .list_positions(Some(owner), Some(PositionStatus::Open))?;
        let decision = evaluate(&config, &positions, action);
        match &decision {
            RiskDecision::Allowed => {
                debug!(%owner, kind = ?action.kind, amount_usd = %action.amount_usd, "Risk check passed")
            }
            RiskDecision::Rejected(reason) => {
                warn!(%owner, kind = ?action.kind, %reason, "Risk check rejected")
            }
        }
        Ok(decision)
    }
}
