//! Venue integrations.
//!
//! ## Adapters
//! Lending markets, DEXes and vaults behind the [`VenueAdapter`] trait, each
//! declaring a [`CapabilitySet`]:
//! - Supply / Withdraw for yield placement
//! - Swap / Quote for spot legs and arbitrage
//! - Apy / Balance for yield selection and balance checks
//!
//! ## Chain access
//! Signing and reads go through the narrow [`ChainClient`] interface. Owners
//! with an unlocked signer are tracked by [`SignerRegistry`].

pub mod paper;
mod registry;
mod signers;
mod traits;
mod types;

pub use paper::{PaperChain, PaperVenue};
pub use registry::VenueRegistry;
pub use signers::SignerRegistry;
pub use traits::{Capability, CapabilitySet, ChainClient, VenueAdapter};
pub use types::*;
