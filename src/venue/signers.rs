//! Active signer sessions, keyed by owner.

use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::info;

use super::traits::ChainClient;
use crate::error::{EngineError, Result};

/// Owner → chain client for owners with an unlocked signer.
///
/// An owner without an entry can still run strategies; their venue legs are
/// simulated instead of submitted.
#[derive(Default)]
pub struct SignerRegistry {
    signers: RwLock<HashMap<String, Arc<dyn ChainClient>>>,
}

impl SignerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn activate(&self, owner: &str, client: Arc<dyn ChainClient>) {
        info!(%owner, address = %client.address(), "Signer session activated");
        self.signers.write().insert(owner.to_string(), client);
    }

    /// Returns true if a session was removed.
    pub fn deactivate(&self, owner: &str) -> bool {
        let removed = self.signers.write().remove(owner).is_some();
        if removed {
            info!(%owner, "Signer session deactivated");
        }
        removed
    }

    pub fn get(&self, owner: &str) -> Option<Arc<dyn ChainClient>> {
        self.signers.read().get(owner).cloned()
    }

    pub fn require(&self, owner: &str) -> Result<Arc<dyn ChainClient>> {
        self.get(owner).ok_or_else(|| EngineError::NoSigner {
            owner: owner.to_string(),
        })
    }

    pub fn is_active(&self, owner: &str) -> bool {
        self.signers.read().contains_key(owner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::venue::PaperChain;

    #[test]
    fn test_activate_and_deactivate() {
        let registry = SignerRegistry::new();
        assert!(matches!(registry.require("alice"), Err(EngineError::NoSigner { .. })));

        registry.activate("alice", Arc::new(PaperChain::new("0xalice")));
        assert!(registry.is_active("alice"));
        assert_eq!(registry.require("alice").unwrap().address(), "0xalice");

        assert!(registry.deactivate("alice"));
        assert!(!registry.deactivate("alice"));
        assert!(registry.get("alice").is_none());
    }
}
