//! # Yield Arb Engine
//!
//! Multi-venue DeFi strategy engine: yield placement and rotation,
//! delta-neutral funding hedges, cross-venue spot arbitrage and time-boxed
//! automated arbitrage sessions, all behind a per-owner risk gate.
//!
//! ## Architecture
//!
//! - `venue`: Venue adapters with declared capabilities, chain clients, signer sessions
//! - `market`: Spot prices and funding rates (Binance public endpoints or static)
//! - `ledger`: Position ledger and append-only trade log
//! - `risk`: Per-owner limits checked before any fund-moving action
//! - `strategy`: Scanner, arbitrage, delta-neutral, yield optimizer, swaps
//! - `session`: Auto-arb sessions and the tick scheduler
//! - `alerts`: Notifications, subscriptions and position monitors
//! - `engine`: The facade front ends call
//! - `persistence`: SQLite store
//! - `config`: Configuration management and validation
//! - `utils`: Shared utilities and decimal arithmetic

pub mod alerts;
pub mod config;
pub mod engine;
pub mod error;
pub mod ledger;
pub mod market;
pub mod persistence;
pub mod risk;
pub mod session;
pub mod strategy;
pub mod utils;
pub mod venue;

pub use config::Config;
pub use engine::Engine;
pub use error::{EngineError, Result};
