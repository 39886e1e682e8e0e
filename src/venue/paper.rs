//! Paper venue and chain client for simulated trading and tests.

use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use rust_decimal::Decimal;
use serde_json::json;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use tracing::debug;

use super::traits::{Capability, CapabilitySet, ChainClient, VenueAdapter};
use super::types::{CallRequest, PriceQuote, TxReceipt, TxRequest, TxResult};
use crate::config::PaperVenueConfig;
use crate::error::{EngineError, Result};

fn pair_key(from: &str, to: &str) -> String {
    format!("{}/{}", from.to_uppercase(), to.to_uppercase())
}

/// In-memory venue with configurable quotes, APYs and balances.
pub struct PaperVenue {
    name: String,
    capabilities: CapabilitySet,
    quotes: RwLock<HashMap<String, Decimal>>,
    fill_prices: RwLock<HashMap<String, Decimal>>,
    apys: RwLock<HashMap<String, Decimal>>,
    balances: RwLock<HashMap<String, Decimal>>,
    failing: RwLock<CapabilitySet>,
}

impl PaperVenue {
    /// Create a venue that declares no capabilities yet.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            capabilities: CapabilitySet::empty(),
            quotes: RwLock::new(HashMap::new()),
            fill_prices: RwLock::new(HashMap::new()),
            apys: RwLock::new(HashMap::new()),
            balances: RwLock::new(HashMap::new()),
            failing: RwLock::new(CapabilitySet::empty()),
        }
    }

    /// Build a venue from its config entry. Quote keys are `FROM/TO`; a
    /// malformed key is skipped.
    pub fn from_config(config: &PaperVenueConfig) -> Self {
        let venue = Self::new(&config.name).with_capabilities(config.capabilities.iter().copied());
        for (pair, price) in &config.quotes {
            match pair.split_once('/') {
                Some((from, to)) => venue.set_quote(from, to, *price),
                None => debug!(venue = %config.name, %pair, "Skipping malformed quote pair"),
            }
        }
        for (token, apy) in &config.apys {
            venue.set_apy(token, *apy);
        }
        for (token, amount) in &config.balances {
            venue.set_balance(token, *amount);
        }
        venue
    }

    pub fn with_capabilities(mut self, capabilities: impl IntoIterator<Item = Capability>) -> Self {
        self.capabilities = capabilities.into_iter().collect();
        self
    }

    /// Set the price of one `from` in `to`.
    pub fn with_quote(self, from: &str, to: &str, price: Decimal) -> Self {
        self.set_quote(from, to, price);
        self
    }

    pub fn with_apy(self, token: &str, apy: Decimal) -> Self {
        self.set_apy(token, apy);
        self
    }

    pub fn with_balance(self, token: &str, amount: Decimal) -> Self {
        self.set_balance(token, amount);
        self
    }

    pub fn set_quote(&self, from: &str, to: &str, price: Decimal) {
        self.quotes.write().insert(pair_key(from, to), price);
    }

    /// Override the price swaps actually fill at, independent of the quote.
    pub fn set_fill_price(&self, from: &str, to: &str, price: Decimal) {
        self.fill_prices.write().insert(pair_key(from, to), price);
    }

    pub fn set_apy(&self, token: &str, apy: Decimal) {
        self.apys.write().insert(token.to_uppercase(), apy);
    }

    pub fn set_balance(&self, token: &str, amount: Decimal) {
        self.balances.write().insert(token.to_uppercase(), amount);
    }

    /// Make calls for `capability` fail until [`PaperVenue::recover`] is called.
    pub fn fail(&self, capability: Capability) {
        let mut failing = self.failing.write();
        *failing = failing.with(capability);
    }

    pub fn recover(&self, capability: Capability) {
        let mut failing = self.failing.write();
        *failing = failing
            .iter()
            .filter(|c| *c != capability)
            .collect();
    }

    pub fn balance_of(&self, token: &str) -> Decimal {
        self.balances
            .read()
            .get(&token.to_uppercase())
            .copied()
            .unwrap_or(Decimal::ZERO)
    }

    fn guard(&self, capability: Capability) -> Result<()> {
        if !self.capabilities.contains(capability) {
            return Err(EngineError::Unsupported {
                venue: self.name.clone(),
                capability,
            });
        }
        if self.failing.read().contains(capability) {
            return Err(EngineError::adapter(
                &self.name,
                format!("simulated {} failure", capability),
            ));
        }
        Ok(())
    }

    fn price(&self, from: &str, to: &str) -> Option<Decimal> {
        let quotes = self.quotes.read();
        if let Some(price) = quotes.get(&pair_key(from, to)) {
            return Some(*price);
        }
        quotes
            .get(&pair_key(to, from))
            .filter(|p| !p.is_zero())
            .map(|p| Decimal::ONE / *p)
    }

    fn adjust_balance(&self, token: &str, delta: Decimal) {
        let mut balances = self.balances.write();
        let entry = balances.entry(token.to_uppercase()).or_insert(Decimal::ZERO);
        *entry = (*entry + delta).max(Decimal::ZERO);
    }

    async fn submit(
        &self,
        chain: &dyn ChainClient,
        method: &str,
        args: serde_json::Value,
    ) -> Result<(String, bool)> {
        let tx_ref = chain
            .send_transaction(TxRequest {
                to: format!("paper:{}", self.name.to_lowercase()),
                method: method.to_string(),
                args,
                value: Decimal::ZERO,
            })
            .await?;
        let receipt = chain.wait_for_receipt(&tx_ref).await?;
        Ok((tx_ref, receipt.success))
    }
}

#[async_trait]
impl VenueAdapter for PaperVenue {
    fn name(&self) -> &str {
        &self.name
    }

    fn capabilities(&self) -> CapabilitySet {
        self.capabilities
    }

    async fn supply(&self, token: &str, amount: Decimal, chain: &dyn ChainClient) -> Result<TxResult> {
        self.guard(Capability::Supply)?;
        let (tx_ref, success) = self
            .submit(chain, "supply", json!({ "token": token, "amount": amount.to_string() }))
            .await?;
        if !success {
            return Ok(TxResult::reverted(tx_ref, "supply reverted"));
        }
        self.adjust_balance(token, -amount);
        debug!(venue = %self.name, %token, %amount, %tx_ref, "Paper supply");
        Ok(TxResult::confirmed(tx_ref))
    }

    async fn withdraw(&self, token: &str, amount: Decimal, chain: &dyn ChainClient) -> Result<TxResult> {
        self.guard(Capability::Withdraw)?;
        let (tx_ref, success) = self
            .submit(chain, "withdraw", json!({ "token": token, "amount": amount.to_string() }))
            .await?;
        if !success {
            return Ok(TxResult::reverted(tx_ref, "withdraw reverted"));
        }
        self.adjust_balance(token, amount);
        Ok(TxResult::confirmed(tx_ref))
    }

    async fn swap(
        &self,
        from_token: &str,
        to_token: &str,
        amount: Decimal,
        chain: &dyn ChainClient,
    ) -> Result<TxResult> {
        self.guard(Capability::Swap)?;
        let fill = self
            .fill_prices
            .read()
            .get(&pair_key(from_token, to_token))
            .copied();
        let price = fill
            .or_else(|| self.price(from_token, to_token))
            .ok_or_else(|| {
                EngineError::adapter(&self.name, format!("no route {}->{}", from_token, to_token))
            })?;

        let (tx_ref, success) = self
            .submit(
                chain,
                "swap",
                json!({ "from": from_token, "to": to_token, "amount": amount.to_string() }),
            )
            .await?;
        if !success {
            return Ok(TxResult::reverted(tx_ref, "swap reverted"));
        }

        let amount_out = amount * price;
        self.adjust_balance(from_token, -amount);
        self.adjust_balance(to_token, amount_out);
        Ok(TxResult::confirmed(tx_ref).with_execution(price, amount_out))
    }

    async fn quote(&self, from_token: &str, to_token: &str, amount: Decimal) -> Result<PriceQuote> {
        self.guard(Capability::Quote)?;
        let price = self.price(from_token, to_token).ok_or_else(|| {
            EngineError::adapter(&self.name, format!("no quote for {}/{}", from_token, to_token))
        })?;
        Ok(PriceQuote {
            venue: self.name.clone(),
            from_token: from_token.to_uppercase(),
            to_token: to_token.to_uppercase(),
            amount_in: amount,
            amount_out: amount * price,
            effective_price: price,
            price_impact_bps: Decimal::ZERO,
        })
    }

    async fn apy(&self, token: &str) -> Result<Decimal> {
        self.guard(Capability::Apy)?;
        self.apys
            .read()
            .get(&token.to_uppercase())
            .copied()
            .ok_or_else(|| EngineError::adapter(&self.name, format!("no APY listed for {}", token)))
    }

    async fn balance(&self, token: &str, _chain: &dyn ChainClient) -> Result<Decimal> {
        self.guard(Capability::Balance)?;
        Ok(self.balance_of(token))
    }
}

/// In-memory chain client that records every submitted transaction.
pub struct PaperChain {
    address: String,
    nonce: AtomicU64,
    sent: Mutex<Vec<TxRequest>>,
    revert_next: AtomicBool,
}

impl PaperChain {
    pub fn new(address: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            nonce: AtomicU64::new(1),
            sent: Mutex::new(Vec::new()),
            revert_next: AtomicBool::new(false),
        }
    }

    /// The next mined receipt reports a revert.
    pub fn revert_next(&self) {
        self.revert_next.store(true, Ordering::SeqCst);
    }

    pub fn sent(&self) -> Vec<TxRequest> {
        self.sent.lock().clone()
    }
}

#[async_trait]
impl ChainClient for PaperChain {
    fn address(&self) -> &str {
        &self.address
    }

    async fn send_transaction(&self, request: TxRequest) -> Result<String> {
        let nonce = self.nonce.fetch_add(1, Ordering::SeqCst);
        self.sent.lock().push(request);
        Ok(format!("0xpaper{:016x}", nonce))
    }

    async fn wait_for_receipt(&self, tx_ref: &str) -> Result<TxReceipt> {
        let reverted = self.revert_next.swap(false, Ordering::SeqCst);
        Ok(TxReceipt {
            tx_ref: tx_ref.to_string(),
            success: !reverted,
            gas_used: Some(21_000),
        })
    }

    async fn read_only_call(&self, request: CallRequest) -> Result<serde_json::Value> {
        Ok(json!({ "to": request.to, "method": request.method, "result": null }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn dex() -> PaperVenue {
        PaperVenue::new("PancakeSwap")
            .with_capabilities([Capability::Quote, Capability::Swap, Capability::Balance])
            .with_quote("BNB", "USDT", dec!(600))
            .with_balance("USDT", dec!(1000))
    }

    #[tokio::test]
    async fn test_from_config() {
        let config = PaperVenueConfig {
            name: "Thena".to_string(),
            capabilities: vec![Capability::Quote],
            quotes: HashMap::from([
                ("bnb/usdt".to_string(), dec!(602)),
                ("garbage".to_string(), dec!(1)),
            ]),
            apys: HashMap::new(),
            balances: HashMap::from([("USDT".to_string(), dec!(50))]),
        };
        let venue = PaperVenue::from_config(&config);

        assert!(venue.supports(Capability::Quote));
        assert!(!venue.supports(Capability::Swap));
        assert_eq!(venue.quote("BNB", "USDT", dec!(1)).await.unwrap().effective_price, dec!(602));
        assert_eq!(venue.balance_of("usdt"), dec!(50));
    }

    #[tokio::test]
    async fn test_quote_and_reverse_price() {
        let venue = dex();
        let quote = venue.quote("BNB", "USDT", dec!(2)).await.unwrap();
        assert_eq!(quote.effective_price, dec!(600));
        assert_eq!(quote.amount_out, dec!(1200));

        let reverse = venue.quote("USDT", "BNB", dec!(600)).await.unwrap();
        assert_eq!(reverse.amount_out.round_dp(8), dec!(1));
    }

    #[tokio::test]
    async fn test_swap_moves_balances_and_records_tx() {
        let venue = dex();
        let chain = PaperChain::new("0xowner");

        let result = venue.swap("USDT", "BNB", dec!(600), &chain).await.unwrap();
        assert!(result.success);
        assert_eq!(result.amount_out.map(|a| a.round_dp(8)), Some(dec!(1)));
        assert_eq!(venue.balance_of("USDT"), dec!(400));
        assert_eq!(chain.sent().len(), 1);
        assert_eq!(chain.sent()[0].method, "swap");
    }

    #[tokio::test]
    async fn test_fill_price_override() {
        let venue = dex();
        venue.set_fill_price("BNB", "USDT", dec!(590));
        let chain = PaperChain::new("0xowner");

        let result = venue.swap("BNB", "USDT", dec!(1), &chain).await.unwrap();
        assert_eq!(result.executed_price, Some(dec!(590)));
    }

    #[tokio::test]
    async fn test_reverted_receipt() {
        let venue = dex();
        let chain = PaperChain::new("0xowner");
        chain.revert_next();

        let result = venue.swap("USDT", "BNB", dec!(10), &chain).await.unwrap();
        assert!(!result.success);
        assert_eq!(venue.balance_of("USDT"), dec!(1000));
    }

    #[tokio::test]
    async fn test_failure_injection_and_recovery() {
        let venue = dex();
        venue.fail(Capability::Quote);
        assert!(matches!(
            venue.quote("BNB", "USDT", dec!(1)).await,
            Err(EngineError::AdapterFailure { .. })
        ));

        venue.recover(Capability::Quote);
        assert!(venue.quote("BNB", "USDT", dec!(1)).await.is_ok());
    }

    #[tokio::test]
    async fn test_undeclared_capability_rejected() {
        let venue = dex();
        let chain = PaperChain::new("0xowner");
        assert!(matches!(
            venue.supply("BNB", dec!(1), &chain).await,
            Err(EngineError::Unsupported { .. })
        ));
    }
}
