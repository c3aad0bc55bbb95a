use crate::api_client::{PriceProvider, Quote};
use crate::domain::models::OptionContract;
use async_trait::async_trait;
use reqwest::Error as ReqwestError;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;

struct Entry<T> {
    fetched_at: Instant,
    value: T,
}

type Table<T> = RwLock<HashMap<String, Entry<T>>>;

/// In-memory TTL cache in front of another provider. Errors are never
/// cached, so the next call retries upstream.
pub struct CachedPriceProvider {
    inner: Arc<dyn PriceProvider>,
    ttl: Duration,
    quotes: Table<Option<Quote>>,
    crypto: Table<f64>,
    options: Table<Option<f64>>,
}

impl CachedPriceProvider {
    pub fn new(inner: Arc<dyn PriceProvider>, ttl: Duration) -> Self {
        Self {
            inner,
            ttl,
            quotes: RwLock::new(HashMap::new()),
            crypto: RwLock::new(HashMap::new()),
            options: RwLock::new(HashMap::new()),
        }
    }

    async fn lookup<T: Clone>(&self, table: &Table<T>, key: &str) -> Option<T> {
        let guard = table.read().await;
        guard
            .get(key)
            .filter(|e| e.fetched_at.elapsed() < self.ttl)
            .map(|e| e.value.clone())
    }

    async fn store<T>(table: &Table<T>, key: String, value: T) {
        table.write().await.insert(
            key,
            Entry {
                fetched_at: Instant::now(),
                value,
            },
        );
    }
}

fn option_key(c: &OptionContract) -> String {
    format!("{}_{}_{}_{}", c.underlying, c.expiration, c.strike, c.kind.as_str())
}

#[async_trait]
impl PriceProvider for CachedPriceProvider {
    async fn quote(&self, ticker: &str) -> Result<Option<Quote>, ReqwestError> {
        if let Some(hit) = self.lookup(&self.quotes, ticker).await {
            tracing::debug!(ticker, "Quote cache hit");
            return Ok(hit);
        }
        let fresh = self.inner.quote(ticker).await?;
        Self::store(&self.quotes, ticker.to_string(), fresh.clone()).await;
        Ok(fresh)
    }

    async fn crypto_prices(&self, tickers: &[String]) -> Result<HashMap<String, f64>, ReqwestError> {
        let mut out = HashMap::new();
        let mut missing = Vec::new();
        for t in tickers {
            match self.lookup(&self.crypto, t).await {
                Some(p) => {
                    out.insert(t.clone(), p);
                }
                None => missing.push(t.clone()),
            }
        }
        if missing.is_empty() {
            tracing::debug!(count = tickers.len(), "Crypto prices served from cache");
            return Ok(out);
        }

        let fresh = self.inner.crypto_prices(&missing).await?;
        for (ticker, price) in fresh {
            Self::store(&self.crypto, ticker.clone(), price).await;
            out.insert(ticker, price);
        }
        Ok(out)
    }

    async fn option_price(&self, contract: &OptionContract) -> Result<Option<f64>, ReqwestError> {
        let key = option_key(contract);
        if let Some(hit) = self.lookup(&self.options, &key).await {
            return Ok(hit);
        }
        let fresh = self.inner.option_price(contract).await?;
        Self::store(&self.options, key, fresh).await;
        Ok(fresh)
    }
}
