//! Real-or-simulated execution of a single venue leg.

use rust_decimal::Decimal;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::utils::{decimal::safe_div, new_id};
use crate::venue::{Capability, ChainClient, VenueAdapter};

/// A completed swap leg.
#[derive(Debug, Clone, PartialEq)]
pub struct LegFill {
    pub tx_ref: String,
    pub simulated: bool,
    pub amount_in: Decimal,
    pub amount_out: Decimal,
}

impl LegFill {
    /// Realized price of one `from` token in `to` tokens.
    pub fn price(&self) -> Decimal {
        safe_div(self.amount_out, self.amount_in)
    }

    /// Realized price of one `to` token in `from` tokens.
    pub fn inverse_price(&self) -> Decimal {
        safe_div(self.amount_in, self.amount_out)
    }
}

pub fn simulated_ref(label: &str) -> String {
    new_id(&format!("sim_{}", label))
}

/// Swap `amount` of `from` for `to` on `venue`.
///
/// The leg is real when the venue declares Swap and a signer is present;
/// otherwise it is simulated at `quoted_price` (price of one `from` in `to`).
/// A real leg that reverts or errors returns `Err(message)`.
pub async fn swap_leg(
    venue: &Arc<dyn VenueAdapter>,
    signer: Option<&Arc<dyn ChainClient>>,
    from: &str,
    to: &str,
    amount: Decimal,
    quoted_price: Decimal,
    label: &str,
) -> Result<LegFill, String> {
    let chain = match signer {
        Some(chain) if venue.supports(Capability::Swap) => chain,
        _ => {
            debug!(venue = %venue.name(), %from, %to, %amount, "Simulating swap leg");
            return Ok(LegFill {
                tx_ref: simulated_ref(label),
                simulated: true,
                amount_in: amount,
                amount_out: amount * quoted_price,
            });
        }
    };

    match venue.swap(from, to, amount, chain.as_ref()).await {
        Ok(tx) if tx.success => {
            let amount_out = tx
                .amount_out
                .or_else(|| tx.executed_price.map(|p| p * amount))
                .unwrap_or(amount * quoted_price);
            Ok(LegFill {
                tx_ref: tx.tx_ref,
                simulated: false,
                amount_in: amount,
                amount_out,
            })
        }
        Ok(tx) => {
            let reason = tx.error.unwrap_or_else(|| "transaction reverted".to_string());
            warn!(venue = %venue.name(), tx = %tx.tx_ref, %reason, "Swap leg reverted");
            Err(reason)
        }
        Err(e) => {
            warn!(venue = %venue.name(), error = %e, "Swap leg failed");
            Err(e.to_string())
        }
    }
}
