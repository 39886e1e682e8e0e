//! Pre-trade risk management.
//!
//! Every strategy action passes the gate before touching a venue:
//! - Single position size and total exposure limits
//! - Slippage tolerance
//! - Venue allow-list
//! - Concurrent delta-neutral position cap

mod gate;

pub use gate::{
    evaluate, RiskAction, RiskActionKind, RiskConfig, RiskConfigPatch, RiskDecision, RiskGate,
};
