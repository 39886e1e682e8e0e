//! Type definitions shared by venue adapters and chain clients.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Executable quote returned by a venue.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PriceQuote {
    pub venue: String,
    pub from_token: String,
    pub to_token: String,
    pub amount_in: Decimal,
    pub amount_out: Decimal,
    /// Price of one `from_token` in `to_token`
    pub effective_price: Decimal,
    /// Price impact in basis points
    pub price_impact_bps: Decimal,
}

/// Outcome of a state-changing venue call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TxResult {
    pub tx_ref: String,
    pub success: bool,
    pub error: Option<String>,
    /// Realized execution price, when the venue reports one
    pub executed_price: Option<Decimal>,
    pub amount_out: Option<Decimal>,
}

impl TxResult {
    pub fn confirmed(tx_ref: impl Into<String>) -> Self {
        Self {
            tx_ref: tx_ref.into(),
            success: true,
            error: None,
            executed_price: None,
            amount_out: None,
        }
    }

    pub fn reverted(tx_ref: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            tx_ref: tx_ref.into(),
            success: false,
            error: Some(error.into()),
            executed_price: None,
            amount_out: None,
        }
    }

    pub fn with_execution(mut self, price: Decimal, amount_out: Decimal) -> Self {
        self.executed_price = Some(price);
        self.amount_out = Some(amount_out);
        self
    }
}

/// Transaction request handed to a [`super::ChainClient`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TxRequest {
    /// Target contract or venue address
    pub to: String,
    pub method: String,
    pub args: serde_json::Value,
    /// Native value attached to the call
    pub value: Decimal,
}

/// Read-only call request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CallRequest {
    pub to: String,
    pub method: String,
    pub args: serde_json::Value,
}

/// Mined transaction receipt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TxReceipt {
    pub tx_ref: String,
    pub success: bool,
    pub gas_used: Option<u64>,
}
