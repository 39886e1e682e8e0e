//! Strategy implementations.
//!
//! Contains the logic for:
//! - Cross-venue spread scanning and arbitrage execution
//! - Delta-neutral funding capture (spot long + simulated short)
//! - Yield deposits and APY-driven rotation
//! - Direct token swaps

mod arbitrage;
mod delta_neutral;
mod legs;
mod outcome;
mod scanner;
mod swap;
mod yield_optimizer;

pub use arbitrage::{ArbExecution, ArbOutcome, ArbRunner, ArbitrageExecutor};
#[cfg(test)]
pub use arbitrage::MockArbRunner;
pub use delta_neutral::{
    annualized_yield_pct, compute_close_pnl, DeltaNeutralStrategy, DeltaOpen, DeltaPnl, DeltaPnlReport,
};
pub use legs::LegFill;
pub use outcome::StrategyOutcome;
pub use scanner::{opportunity_id, ArbOpportunity, OpportunityScanner};
pub use swap::{SwapDetails, TokenSwapper};
pub use yield_optimizer::{DepositDetails, RotationPlan, YieldAggregator, YieldOptimizer};
