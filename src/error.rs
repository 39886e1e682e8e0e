//! Error taxonomy for the strategy engine.
//!
//! Strategy entry points report business failures (no opportunity, funding
//! rate unfavourable, venue rejected the transaction) through their outcome
//! structs. `EngineError` is reserved for preconditions, ledger state
//! violations and storage failures that callers must handle.

use rust_decimal::Decimal;
use thiserror::Error;

use crate::venue::Capability;

/// Errors raised by the engine and its components.
#[derive(Error, Debug)]
pub enum EngineError {
    /// Malformed or missing parameters.
    #[error("validation failed: {0}")]
    Validation(String),

    /// The risk gate refused the action.
    #[error("risk check failed: {0}")]
    RiskRejected(String),

    /// A venue, oracle or chain call failed.
    #[error("{venue} call failed: {message}")]
    AdapterFailure { venue: String, message: String },

    /// Wallet balance does not cover the requested amount.
    #[error("insufficient balance: {available} {token} available, {required} {token} needed")]
    InsufficientBalance {
        token: String,
        available: Decimal,
        required: Decimal,
    },

    /// Position, session or venue lookup failed.
    #[error("{entity} {id} not found")]
    NotFound { entity: &'static str, id: String },

    /// Operation is not valid for the current lifecycle state.
    #[error("invalid state: {0}")]
    InvalidState(String),

    /// The venue does not declare the requested capability.
    #[error("{venue} does not support {capability}")]
    Unsupported {
        venue: String,
        capability: Capability,
    },

    /// No signer session is active for the owner.
    #[error("no active signer session for owner {owner}")]
    NoSigner { owner: String },

    #[error("storage error: {0}")]
    Storage(#[from] rusqlite::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl EngineError {
    /// Shorthand for an adapter failure.
    pub fn adapter(venue: impl Into<String>, message: impl Into<String>) -> Self {
        Self::AdapterFailure {
            venue: venue.into(),
            message: message.into(),
        }
    }

    pub fn not_found(entity: &'static str, id: impl Into<String>) -> Self {
        Self::NotFound {
            entity,
            id: id.into(),
        }
    }
}

/// Result alias used across the engine.
pub type Result<T> = std::result::Result<T, EngineError>;

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_insufficient_balance_message_carries_both_figures() {
        let err = EngineError::InsufficientBalance {
            token: "BNB".to_string(),
            available: dec!(0.5),
            required: dec!(2),
        };
        let msg = err.to_string();
        assert!(msg.contains("0.5 BNB available"));
        assert!(msg.contains("2 BNB needed"));
    }

    #[test]
    fn test_unsupported_names_capability() {
        let err = EngineError::Unsupported {
            venue: "Thena".to_string(),
            capability: Capability::Supply,
        };
        assert_eq!(err.to_string(), "Thena does not support supply");
    }
}
