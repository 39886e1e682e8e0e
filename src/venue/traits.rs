//! Venue-agnostic traits for execution venues and chain access.
//!
//! Every venue declares the operations it supports up front through a
//! [`CapabilitySet`]. Callers check the tag before dispatching, so a venue
//! without a capability is "not supported here" rather than an error path.

use async_trait::async_trait;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;

use super::types::{CallRequest, PriceQuote, TxReceipt, TxRequest, TxResult};
use crate::error::{EngineError, Result};

/// Operations a venue may support.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Capability {
    Supply,
    Withdraw,
    Swap,
    Quote,
    Apy,
    Balance,
}

impl Capability {
    pub const ALL: [Capability; 6] = [
        Capability::Supply,
        Capability::Withdraw,
        Capability::Swap,
        Capability::Quote,
        Capability::Apy,
        Capability::Balance,
    ];

    fn bit(self) -> u8 {
        match self {
            Capability::Supply => 1 << 0,
            Capability::Withdraw => 1 << 1,
            Capability::Swap => 1 << 2,
            Capability::Quote => 1 << 3,
            Capability::Apy => 1 << 4,
            Capability::Balance => 1 << 5,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Capability::Supply => "supply",
            Capability::Withdraw => "withdraw",
            Capability::Swap => "swap",
            Capability::Quote => "quote",
            Capability::Apy => "apy",
            Capability::Balance => "balance",
        }
    }
}

impl fmt::Display for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Set of capabilities declared by a venue.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CapabilitySet(u8);

impl CapabilitySet {
    pub const fn empty() -> Self {
        Self(0)
    }

    /// Add a capability.
    pub fn with(mut self, capability: Capability) -> Self {
        self.0 |= capability.bit();
        self
    }

    pub fn contains(&self, capability: Capability) -> bool {
        self.0 & capability.bit() != 0
    }

    pub fn is_empty(&self) -> bool {
        self.0 == 0
    }

    pub fn iter(&self) -> impl Iterator<Item = Capability> + '_ {
        Capability::ALL.into_iter().filter(|c| self.contains(*c))
    }
}

impl FromIterator<Capability> for CapabilitySet {
    fn from_iter<I: IntoIterator<Item = Capability>>(iter: I) -> Self {
        iter.into_iter().fold(Self::empty(), CapabilitySet::with)
    }
}

impl fmt::Display for CapabilitySet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names: Vec<&str> = self.iter().map(|c| c.as_str()).collect();
        write!(f, "[{}]", names.join(", "))
    }
}

/// Narrow signer/query interface for the owner's on-chain account.
///
/// Strategy code only ever sees this trait, never a concrete chain SDK.
#[async_trait]
pub trait ChainClient: Send + Sync {
    /// Address of the account this client signs for.
    fn address(&self) -> &str;

    /// Submit a state-changing transaction and return its reference.
    async fn send_transaction(&self, request: TxRequest) -> Result<String>;

    /// Wait for a submitted transaction to be mined.
    async fn wait_for_receipt(&self, tx_ref: &str) -> Result<TxReceipt>;

    /// Execute a read-only contract call.
    async fn read_only_call(&self, request: CallRequest) -> Result<serde_json::Value>;
}

/// An execution venue (lending market, DEX, vault).
///
/// Operations the venue does not declare in [`VenueAdapter::capabilities`]
/// keep the default body, which returns [`EngineError::Unsupported`].
#[async_trait]
pub trait VenueAdapter: Send + Sync {
    /// Display name, also used as the venue key in positions and trades.
    fn name(&self) -> &str;

    fn capabilities(&self) -> CapabilitySet;

    fn supports(&self, capability: Capability) -> bool {
        self.capabilities().contains(capability)
    }

    async fn supply(
        &self,
        _token: &str,
        _amount: Decimal,
        _chain: &dyn ChainClient,
    ) -> Result<TxResult> {
        Err(unsupported(self.name(), Capability::Supply))
    }

    async fn withdraw(
        &self,
        _token: &str,
        _amount: Decimal,
        _chain: &dyn ChainClient,
    ) -> Result<TxResult> {
        Err(unsupported(self.name(), Capability::Withdraw))
    }

    async fn swap(
        &self,
        _from_token: &str,
        _to_token: &str,
        _amount: Decimal,
        _chain: &dyn ChainClient,
    ) -> Result<TxResult> {
        Err(unsupported(self.name(), Capability::Swap))
    }

    /// Quote selling `amount` of `from_token` for `to_token`.
    async fn quote(&self, _from_token: &str, _to_token: &str, _amount: Decimal) -> Result<PriceQuote> {
        Err(unsupported(self.name(), Capability::Quote))
    }

    /// Current supply APY for `token`, in percent.
    async fn apy(&self, _token: &str) -> Result<Decimal> {
        Err(unsupported(self.name(), Capability::Apy))
    }

    async fn balance(&self, _token: &str, _chain: &dyn ChainClient) -> Result<Decimal> {
        Err(unsupported(self.name(), Capability::Balance))
    }
}

fn unsupported(venue: &str, capability: Capability) -> EngineError {
    EngineError::Unsupported {
        venue: venue.to_string(),
        capability,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_capability_set_builder() {
        let caps = CapabilitySet::empty()
            .with(Capability::Quote)
            .with(Capability::Swap);

        assert!(caps.contains(Capability::Quote));
        assert!(caps.contains(Capability::Swap));
        assert!(!caps.contains(Capability::Supply));
        assert_eq!(caps.to_string(), "[swap, quote]");
    }

    #[test]
    fn test_capability_set_from_iter() {
        let caps: CapabilitySet = [Capability::Apy, Capability::Balance, Capability::Apy]
            .into_iter()
            .collect();
        assert_eq!(caps.iter().count(), 2);
        assert!(!CapabilitySet::empty().contains(Capability::Apy));
        assert!(CapabilitySet::empty().is_empty());
    }

    struct QuoteOnly;

    #[async_trait]
    impl VenueAdapter for QuoteOnly {
        fn name(&self) -> &str {
            "QuoteOnly"
        }

        fn capabilities(&self) -> CapabilitySet {
            CapabilitySet::empty().with(Capability::Quote)
        }
    }

    #[tokio::test]
    async fn test_undeclared_operation_is_unsupported() {
        let venue = QuoteOnly;
        assert!(!venue.supports(Capability::Apy));

        let err = venue.apy("BNB").await.unwrap_err();
        assert!(matches!(
            err,
            EngineError::Unsupported {
                capability: Capability::Apy,
                ..
            }
        ));
    }
}
