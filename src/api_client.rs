use crate::domain::models::{OptionContract, OptionKind};
use async_trait::async_trait;
use once_cell::sync::Lazy;
use reqwest::{Client, Error as ReqwestError};
use serde::Deserialize;
use std::collections::HashMap;
use std::time::Duration;

/// Company profile data used to price and label stock/ETF holdings.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Quote {
    pub price: Option<f64>,
    pub name: Option<String>,
    pub image: Option<String>,
    pub industry: Option<String>,
}

#[async_trait]
pub trait PriceProvider: Send + Sync {
    /// None when the ticker is unknown upstream.
    async fn quote(&self, ticker: &str) -> Result<Option<Quote>, ReqwestError>;
    /// USD price per ticker; tickers without a price are absent from the map.
    async fn crypto_prices(&self, tickers: &[String]) -> Result<HashMap<String, f64>, ReqwestError>;
    async fn option_price(&self, contract: &OptionContract) -> Result<Option<f64>, ReqwestError>;
}

// CoinGecko ids for the tickers we know how to price
static COINGECKO_IDS: Lazy<HashMap<&'static str, &'static str>> = Lazy::new(|| {
    HashMap::from([
        ("BTC", "bitcoin"),
        ("ETH", "ethereum"),
        ("SOL", "solana"),
        ("XRP", "ripple"),
        ("ADA", "cardano"),
        ("DOGE", "dogecoin"),
        ("DOT", "polkadot"),
        ("AVAX", "avalanche-2"),
        ("MATIC", "matic-network"),
        ("LINK", "chainlink"),
        ("SHIB", "shiba-inu"),
        ("LTC", "litecoin"),
        ("UNI", "uniswap"),
        ("ATOM", "cosmos"),
        ("XLM", "stellar"),
        ("ALGO", "algorand"),
        ("VET", "vechain"),
        ("FIL", "filecoin"),
        ("HBAR", "hedera-hashgraph"),
        ("ICP", "internet-computer"),
        ("APT", "aptos"),
        ("ARB", "arbitrum"),
        ("OP", "optimism"),
        ("NEAR", "near"),
        ("INJ", "injective-protocol"),
        ("TIA", "celestia"),
        ("SUI", "sui"),
        ("SEI", "sei-network"),
        ("JUP", "jupiter-exchange-solana"),
        ("RENDER", "render-token"),
        ("PEPE", "pepe"),
        ("WIF", "dogwifcoin"),
        ("BONK", "bonk"),
        ("FLOKI", "floki"),
        ("ONDO", "ondo-finance"),
        ("ENA", "ethena"),
        ("FET", "fetch-ai"),
        ("BCH", "bitcoin-cash"),
        ("TRX", "tron"),
        ("TON", "the-open-network"),
        ("AAVE", "aave"),
        ("LDO", "lido-dao"),
    ])
});

pub fn coingecko_id(ticker: &str) -> Option<&'static str> {
    COINGECKO_IDS.get(ticker.to_uppercase().as_str()).copied()
}

#[derive(Debug, Clone)]
pub struct ProviderEndpoints {
    pub fmp_base_url: String,
    pub fmp_api_key: String,
    pub coingecko_base_url: String,
    pub tradier_base_url: String,
    pub tradier_api_key: String,
}

pub struct ReqwestPriceProvider {
    client: Client,
    endpoints: ProviderEndpoints,
}

impl ReqwestPriceProvider {
    pub fn new(endpoints: ProviderEndpoints) -> Self {
        let client = Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .unwrap_or_else(|_| Client::new());
        Self { client, endpoints }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct FmpProfile {
    price: Option<f64>,
    company_name: Option<String>,
    image: Option<String>,
    industry: Option<String>,
}

#[derive(Debug, Deserialize)]
struct TradierChainResponse {
    options: Option<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
struct TradierOptions {
    #[serde(default)]
    option: Vec<TradierContract>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TradierContract {
    pub option_type: String,
    pub strike: f64,
    pub last: Option<f64>,
    pub bid: Option<f64>,
    pub ask: Option<f64>,
}

/// Last trade for the matching strike/type, else the bid/ask midpoint.
pub fn select_contract_price(chain: &[TradierContract], kind: OptionKind, strike: f64) -> Option<f64> {
    let contract = chain
        .iter()
        .find(|c| c.option_type.eq_ignore_ascii_case(kind.as_str()) && (c.strike - strike).abs() < 0.01)?;
    if let Some(last) = contract.last.filter(|l| *l > 0.0) {
        return Some(last);
    }
    let bid = contract.bid.unwrap_or(0.0);
    let ask = contract.ask.unwrap_or(0.0);
    if bid > 0.0 && ask > 0.0 {
        Some(((bid + ask) / 2.0 * 100.0).round() / 100.0)
    } else {
        None
    }
}

#[async_trait]
impl PriceProvider for ReqwestPriceProvider {
    async fn quote(&self, ticker: &str) -> Result<Option<Quote>, ReqwestError> {
        if self.endpoints.fmp_api_key.is_empty() {
            tracing::debug!(ticker, "FMP_API_KEY not set, skipping quote");
            return Ok(None);
        }
        let url = format!("{}/profile", self.endpoints.fmp_base_url);
        let response = self
            .client
            .get(url)
            .query(&[("symbol", ticker), ("apikey", self.endpoints.fmp_api_key.as_str())])
            .send()
            .await?
            .error_for_status()?;

        let profiles: Vec<FmpProfile> = response.json().await?;
        Ok(profiles.into_iter().next().map(|p| Quote {
            price: p.price,
            name: p.company_name,
            image: p.image,
            industry: p.industry,
        }))
    }

    async fn crypto_prices(&self, tickers: &[String]) -> Result<HashMap<String, f64>, ReqwestError> {
        let ids: HashMap<&'static str, String> = tickers
            .iter()
            .filter_map(|t| coingecko_id(t).map(|id| (id, t.to_uppercase())))
            .collect();
        if ids.is_empty() {
            return Ok(HashMap::new());
        }

        let joined = ids.keys().copied().collect::<Vec<_>>().join(",");
        let url = format!("{}/simple/price", self.endpoints.coingecko_base_url);
        let response = self
            .client
            .get(url)
            .query(&[("ids", joined.as_str()), ("vs_currencies", "usd")])
            .send()
            .await?
            .error_for_status()?;

        let parsed: HashMap<String, HashMap<String, f64>> = response.json().await?;
        let mut out = HashMap::new();
        for (id, ticker) in ids {
            if let Some(price) = parsed.get(id).and_then(|p| p.get("usd")) {
                out.insert(ticker, *price);
            }
        }
        tracing::info!(requested = tickers.len(), priced = out.len(), "Fetched crypto prices");
        Ok(out)
    }

    async fn option_price(&self, contract: &OptionContract) -> Result<Option<f64>, ReqwestError> {
        if self.endpoints.tradier_api_key.is_empty() {
            return Ok(None);
        }
        let url = format!("{}/markets/options/chains", self.endpoints.tradier_base_url);
        let expiration = contract.expiration.format("%Y-%m-%d").to_string();
        let response = self
            .client
            .get(url)
            .bearer_auth(&self.endpoints.tradier_api_key)
            .header("Accept", "application/json")
            .query(&[
                ("symbol", contract.underlying.as_str()),
                ("expiration", expiration.as_str()),
                ("greeks", "false"),
            ])
            .send()
            .await?
            .error_for_status()?;

        let parsed: TradierChainResponse = response.json().await?;
        // Tradier sends `"options": null` (or the string "null") for empty chains
        let chain = parsed
            .options
            .and_then(|v| serde_json::from_value::<TradierOptions>(v).ok())
            .map(|o| o.option)
            .unwrap_or_default();
        if chain.is_empty() {
            tracing::debug!(underlying = %contract.underlying, expiration = %expiration, "No options chain");
            return Ok(None);
        }
        Ok(select_contract_price(&chain, contract.kind, contract.strike))
    }
}

// Simple mock provider for tests and handler mocks
#[derive(Default)]
pub struct MockPriceProvider {
    pub quotes: HashMap<String, Quote>,
    pub crypto: HashMap<String, f64>,
    // keyed by underlying ticker
    pub options: HashMap<String, f64>,
}

impl MockPriceProvider {
    #[allow(dead_code)]
    pub fn with_quote(mut self, ticker: &str, price: f64) -> Self {
        self.quotes.insert(
            ticker.to_string(),
            Quote {
                price: Some(price),
                name: Some(format!("{} Inc.", ticker)),
                image: None,
                industry: None,
            },
        );
        self
    }

    #[allow(dead_code)]
    pub fn with_crypto(mut self, ticker: &str, price: f64) -> Self {
        self.crypto.insert(ticker.to_string(), price);
        self
    }
}

#[async_trait]
impl PriceProvider for MockPriceProvider {
    async fn quote(&self, ticker: &str) -> Result<Option<Quote>, ReqwestError> {
        Ok(self.quotes.get(ticker).cloned())
    }

    async fn crypto_prices(&self, tickers: &[String]) -> Result<HashMap<String, f64>, ReqwestError> {
        Ok(tickers
            .iter()
            .filter_map(|t| self.crypto.get(t).map(|p| (t.clone(), *p)))
            .collect())
    }

    async fn option_price(&self, contract: &OptionContract) -> Result<Option<f64>, ReqwestError> {
        Ok(self.options.get(&contract.underlying).copied())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn contract(kind: &str, strike: f64, last: Option<f64>, bid: Option<f64>, ask: Option<f64>) -> TradierContract {
        TradierContract {
            option_type: kind.to_string(),
            strike,
            last,
            bid,
            ask,
        }
    }

    #[test]
    fn contract_price_prefers_last_trade() {
        let chain = vec![
            contract("put", 200.0, Some(1.0), None, None),
            contract("call", 200.0, Some(4.2), Some(4.0), Some(4.4)),
        ];
        assert_eq!(select_contract_price(&chain, OptionKind::Call, 200.0), Some(4.2));
        assert_eq!(select_contract_price(&chain, OptionKind::Put, 200.0), Some(1.0));
    }

    #[test]
    fn contract_price_falls_back_to_midpoint() {
        let chain = vec![contract("call", 150.0, Some(0.0), Some(1.0), Some(1.1))];
        assert_eq!(select_contract_price(&chain, OptionKind::Call, 150.0), Some(1.05));
        let chain = vec![contract("call", 150.0, None, Some(0.0), Some(1.0))];
        assert_eq!(select_contract_price(&chain, OptionKind::Call, 150.0), None);
        assert_eq!(select_contract_price(&chain, OptionKind::Call, 155.0), None);
    }

    #[test]
    fn coingecko_lookup_is_case_insensitive() {
        assert_eq!(coingecko_id("btc"), Some("bitcoin"));
        assert_eq!(coingecko_id("LEDGER"), None);
    }
}
