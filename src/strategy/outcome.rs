//! Result shape shared by the position-opening strategies.

use serde::Serialize;

/// Outcome of a strategy call.
///
/// Business failures (unfavourable rate, nothing to rotate into) are
/// `success: false` with a message; `Err` is reserved for preconditions and
/// storage failures.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StrategyOutcome<T> {
    pub success: bool,
    pub message: String,
    pub position_id: Option<String>,
    pub tx_ref: Option<String>,
    pub details: Option<T>,
}

impl<T> StrategyOutcome<T> {
    pub fn failed(message: impl Into<String>) -> Self {
        Self {
            success: false,
            message: message.into(),
            position_id: None,
            tx_ref: None,
            details: None,
        }
    }

    pub fn succeeded(message: impl Into<String>, details: T) -> Self {
        Self {
            success: true,
            message: message.into(),
            position_id: None,
            tx_ref: None,
            details: Some(details),
        }
    }

    pub fn position(mut self, id: impl Into<String>) -> Self {
        self.position_id = Some(id.into());
        self
    }

    pub fn tx(mut self, tx_ref: impl Into<String>) -> Self {
        self.tx_ref = Some(tx_ref.into());
        self
    }
}
