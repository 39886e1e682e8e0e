//! Registry of venue adapters available to the engine.

use std::sync::Arc;

use super::traits::{Capability, VenueAdapter};
use crate::error::{EngineError, Result};

/// Ordered collection of venue adapters.
///
/// Registration order is preserved; it breaks ties when a strategy needs
/// "the first venue that can do X".
#[derive(Clone, Default)]
pub struct VenueRegistry {
    venues: Vec<Arc<dyn VenueAdapter>>,
}

impl VenueRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, venue: Arc<dyn VenueAdapter>) {
        self.venues.push(venue);
    }

    pub fn with(mut self, venue: Arc<dyn VenueAdapter>) -> Self {
        self.register(venue);
        self
    }

    pub fn len(&self) -> usize {
        self.venues.len()
    }

    pub fn is_empty(&self) -> bool {
        self.venues.is_empty()
    }

    /// Look up a venue by name (case-insensitive).
    pub fn get(&self, name: &str) -> Option<Arc<dyn VenueAdapter>> {
        self.venues
            .iter()
            .find(|v| v.name().eq_ignore_ascii_case(name))
            .cloned()
    }

    /// Look up a venue by name, failing with `NotFound`.
    pub fn require(&self, name: &str) -> Result<Arc<dyn VenueAdapter>> {
        self.get(name).ok_or_else(|| EngineError::not_found("venue", name))
    }

    /// All venues declaring `capability`, in registration order.
    pub fn with_capability(&self, capability: Capability) -> Vec<Arc<dyn VenueAdapter>> {
        self.venues
            .iter()
            .filter(|v| v.supports(capability))
            .cloned()
            .collect()
    }

    pub fn first_with(&self, capability: Capability) -> Option<Arc<dyn VenueAdapter>> {
        self.venues.iter().find(|v| v.supports(capability)).cloned()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<dyn VenueAdapter>> {
        self.venues.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::venue::PaperVenue;

    fn registry() -> VenueRegistry {
        VenueRegistry::new()
            .with(Arc::new(
                PaperVenue::new("Venus").with_capabilities([Capability::Supply, Capability::Apy]),
            ))
            .with(Arc::new(
                PaperVenue::new("PancakeSwap").with_capabilities([Capability::Swap, Capability::Quote]),
            ))
            .with(Arc::new(PaperVenue::new("Thena").with_capabilities([Capability::Quote])))
    }

    #[test]
    fn test_lookup_is_case_insensitive() {
        let registry = registry();
        assert_eq!(registry.get("pancakeswap").map(|v| v.name().to_string()), Some("PancakeSwap".to_string()));
        assert!(registry.get("Biswap").is_none());
        assert!(matches!(registry.require("Biswap"), Err(EngineError::NotFound { .. })));
    }

    #[test]
    fn test_capability_filter_keeps_order() {
        let registry = registry();
        let quoting: Vec<String> = registry
            .with_capability(Capability::Quote)
            .iter()
            .map(|v| v.name().to_string())
            .collect();
        assert_eq!(quoting, vec!["PancakeSwap", "Thena"]);
        assert_eq!(
            registry.first_with(Capability::Supply).map(|v| v.name().to_string()),
            Some("Venus".to_string())
        );
        assert!(registry.first_with(Capability::Withdraw).is_none());
    }
}
