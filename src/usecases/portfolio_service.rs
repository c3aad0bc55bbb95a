use crate::api_client::{PriceProvider, Quote};
use crate::csv_store::read_holdings_csv;
use crate::domain::models::{
    AllocationSlice, AssetType, EnrichedHolding, Holding, HoldingPatch, NewHolding, OptionKind,
    PortfolioView,
};
use crate::domain::repository::HoldingRepo;
use crate::error::{ServiceError, ServiceResult};
use crate::usecases::aggregate::{
    allocation_for_asset_type, build_allocation_breakdown, filter_holdings, summarize,
    AllocationGrouping, HoldingFilter, SortState,
};
use crate::usecases::valuation::enrich;
use chrono::{NaiveDate, Utc};
use once_cell::sync::Lazy;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::task::JoinSet;

static KNOWN_CRYPTOS: Lazy<HashSet<&'static str>> = Lazy::new(|| {
    HashSet::from([
        "BTC", "ETH", "SOL", "XRP", "ADA", "DOGE", "DOT", "AVAX", "MATIC", "LINK", "SHIB", "LTC",
        "UNI", "ATOM", "XLM", "ALGO", "VET", "FIL", "HBAR", "ICP", "APT", "ARB", "OP", "NEAR",
        "INJ", "TIA", "SUI", "SEI", "JUP", "RENDER", "PEPE", "WIF", "BONK", "FLOKI", "MEME",
        "ONDO", "ENA", "JASMY", "FET",
    ])
});

static KNOWN_ETFS: Lazy<HashSet<&'static str>> = Lazy::new(|| {
    HashSet::from([
        "SPY", "QQQ", "VOO", "VTI", "IWM", "ARKK", "SCHD", "VIG", "VYM", "JEPI", "VGT", "XLK",
        "XLF", "XLE", "XLV", "XLI", "XLC", "XLY", "XLP", "XLU", "IVV", "DIA", "VEA", "VWO", "EFA",
        "EEM", "AGG", "BND", "LQD", "HYG", "GLD", "SLV", "USO", "TLT", "IEF", "SHY", "IEMG", "VNQ",
        "SCHF", "SCHA", "SPLG", "SPTM", "VB", "VO", "VTV", "VUG", "VXUS", "ITOT", "IJH", "IJR",
        "QQQM", "QQQE", "SOXX", "SMH", "XBI", "IBB", "KWEB", "FXI", "MCHI",
    ])
});

static ID_SEQ: AtomicU64 = AtomicU64::new(0);

/// Asset type for a ticker when the caller did not name one.
pub fn categorize_ticker(ticker: &str) -> AssetType {
    let t = ticker.to_uppercase();
    if KNOWN_CRYPTOS.contains(t.as_str()) {
        AssetType::Crypto
    } else if KNOWN_ETFS.contains(t.as_str()) {
        AssetType::Etf
    } else {
        AssetType::Stock
    }
}

fn next_holding_id() -> String {
    let seq = ID_SEQ.fetch_add(1, Ordering::Relaxed);
    format!("h_{}_{}", Utc::now().timestamp_millis(), seq)
}

fn check_amount(field: &str, value: f64) -> ServiceResult<()> {
    if !value.is_finite() || value < 0.0 {
        return Err(ServiceError::Invalid(format!("{} must be a non-negative number", field)));
    }
    Ok(())
}

/// Validates a request and turns it into a storable holding.
fn build_holding(new: NewHolding) -> ServiceResult<Holding> {
    let ticker = new.ticker.trim().to_uppercase();
    if ticker.is_empty() {
        return Err(ServiceError::Invalid("ticker is required".to_string()));
    }
    check_amount("quantity", new.quantity)?;
    check_amount("costBasis", new.cost_basis)?;

    let asset_type = match new.asset_type.as_deref().map(str::trim).filter(|s| !s.is_empty()) {
        Some(tag) => tag
            .parse::<AssetType>()
            .map_err(|e| ServiceError::Invalid(e.to_string()))?,
        None => categorize_ticker(&ticker),
    };

    let mut holding = Holding {
        id: next_holding_id(),
        ticker,
        quantity: new.quantity,
        cost_basis: new.cost_basis,
        account_name: new.account_name.trim().to_string(),
        asset_type,
        underlying_ticker: None,
        strike_price: None,
        expiration_date: None,
        option_type: None,
        added_at: Some(Utc::now().to_rfc3339()),
        updated_at: None,
    };

    if asset_type == AssetType::StockOption {
        let underlying = new
            .underlying_ticker
            .map(|u| u.trim().to_uppercase())
            .filter(|u| !u.is_empty())
            .ok_or_else(|| ServiceError::Invalid("underlyingTicker is required for options".to_string()))?;
        let strike = new
            .strike_price
            .ok_or_else(|| ServiceError::Invalid("strikePrice is required for options".to_string()))?;
        check_amount("strikePrice", strike)?;
        let expiration = new
            .expiration_date
            .as_deref()
            .ok_or_else(|| ServiceError::Invalid("expirationDate is required for options".to_string()))
            .and_then(|d| {
                NaiveDate::parse_from_str(d.trim(), "%Y-%m-%d")
                    .map_err(|_| ServiceError::Invalid(format!("invalid expirationDate '{}'", d)))
            })?;
        let kind = match new.option_type.as_deref() {
            Some(t) => t.parse::<OptionKind>().map_err(ServiceError::Invalid)?,
            None => OptionKind::Call,
        };
        holding.underlying_ticker = Some(underlying);
        holding.strike_price = Some(strike);
        holding.expiration_date = Some(expiration);
        holding.option_type = Some(kind);
    }
    Ok(holding)
}

pub struct PortfolioService {
    pub provider: Arc<dyn PriceProvider>,
    pub repo: Arc<dyn HoldingRepo>,
}

impl PortfolioService {
    pub fn new(provider: Arc<dyn PriceProvider>, repo: Arc<dyn HoldingRepo>) -> Self {
        Self { provider, repo }
    }

    async fn fetch_quotes(&self, tickers: HashSet<String>) -> HashMap<String, Quote> {
        let mut set = JoinSet::new();
        for ticker in tickers {
            let provider = self.provider.clone();
            set.spawn(async move {
                let res = provider.quote(&ticker).await;
                (ticker, res)
            });
        }

        let mut quotes = HashMap::new();
        while let Some(joined) = set.join_next().await {
            match joined {
                Ok((ticker, Ok(Some(q)))) => {
                    quotes.insert(ticker, q);
                }
                Ok((ticker, Ok(None))) => {
                    tracing::warn!(ticker = %ticker, "No quote available, valuing at cost");
                }
                Ok((ticker, Err(e))) => {
                    tracing::error!(ticker = %ticker, error = %e, "Failed fetching quote");
                }
                Err(e) => tracing::error!(error = %e, "Quote task failed"),
            }
        }
        quotes
    }

    /// Attaches live prices. Any provider failure degrades that holding to
    /// cost valuation; this never fails as a whole.
    pub async fn enrich_all(&self, holdings: Vec<Holding>) -> Vec<EnrichedHolding> {
        let quoted: HashSet<String> = holdings
            .iter()
            .filter(|h| matches!(h.asset_type, AssetType::Stock | AssetType::Etf))
            .map(|h| h.ticker.clone())
            .collect();
        let quotes = self.fetch_quotes(quoted).await;

        let crypto_tickers: Vec<String> = holdings
            .iter()
            .filter(|h| h.asset_type == AssetType::Crypto)
            .map(|h| h.ticker.clone())
            .collect::<HashSet<_>>()
            .into_iter()
            .collect();
        let crypto_prices = if crypto_tickers.is_empty() {
            HashMap::new()
        } else {
            self.provider
                .crypto_prices(&crypto_tickers)
                .await
                .unwrap_or_else(|e| {
                    tracing::error!(error = %e, "Failed fetching crypto prices");
                    HashMap::new()
                })
        };

        let mut out = Vec::with_capacity(holdings.len());
        for holding in holdings {
            let enriched = match holding.asset_type {
                AssetType::Stock | AssetType::Etf => {
                    let quote = quotes.get(&holding.ticker).cloned().unwrap_or_default();
                    let mut e = enrich(holding, quote.price);
                    e.name = quote.name;
                    e.image = quote.image;
                    e.industry = quote.industry;
                    e
                }
                AssetType::Crypto => {
                    let price = crypto_prices.get(&holding.ticker).copied();
                    let name = holding.ticker.clone();
                    let mut e = enrich(holding, price);
                    e.name = Some(name);
                    e
                }
                AssetType::StockOption => {
                    let price = match holding.option_contract() {
                        Some(c) => self.provider.option_price(&c).await.unwrap_or_else(|e| {
                            tracing::error!(id = %holding.id, error = %e, "Failed fetching option price");
                            None
                        }),
                        None => None,
                    };
                    enrich(holding, price)
                }
                AssetType::Custom => {
                    let name = holding.ticker.clone();
                    let mut e = enrich(holding, None);
                    e.name = Some(name);
                    e
                }
                AssetType::Cash => {
                    let mut e = enrich(holding, None);
                    e.name = Some("Cash".to_string());
                    e
                }
            };
            out.push(enriched);
        }
        out
    }

    pub async fn enriched_holdings(&self) -> ServiceResult<Vec<EnrichedHolding>> {
        let holdings = self.repo.fetch_holdings().await?;
        Ok(self.enrich_all(holdings).await)
    }

    /// Holdings narrowed by `filter`, ordered by `sort`, and summarized over
    /// what is shown.
    pub async fn portfolio(
        &self,
        filter: &HoldingFilter,
        sort: SortState,
    ) -> ServiceResult<PortfolioView> {
        let mut holdings = self.enriched_holdings().await?;
        if !filter.is_empty() {
            holdings = filter_holdings(&holdings, |h| filter.matches(h));
        }
        let holdings = sort.apply(&holdings);
        let summary = summarize(&holdings);
        Ok(PortfolioView {
            count: holdings.len(),
            holdings,
            summary,
        })
    }

    pub async fn add_holding(&self, new: NewHolding) -> ServiceResult<Holding> {
        let holding = build_holding(new)?;
        if matches!(holding.asset_type, AssetType::Stock | AssetType::Etf)
            && self.provider.quote(&holding.ticker).await?.is_none()
        {
            return Err(ServiceError::NotFound(format!("Ticker {} not found", holding.ticker)));
        }
        self.repo.insert_holding(&holding).await?;
        tracing::info!(id = %holding.id, ticker = %holding.ticker, asset_type = %holding.asset_type, "Added holding");
        Ok(holding)
    }

    /// Bulk insert from CSV; tickers are not checked upstream. The whole
    /// file is validated before anything is written.
    pub async fn import_csv(&self, data: &[u8]) -> ServiceResult<usize> {
        let rows = read_holdings_csv(data)?;
        let holdings = rows
            .into_iter()
            .enumerate()
            .map(|(i, row)| {
                build_holding(row).map_err(|e| ServiceError::Invalid(format!("row {}: {}", i + 1, e)))
            })
            .collect::<ServiceResult<Vec<_>>>()?;
        self.repo.insert_holdings(&holdings).await?;
        tracing::info!(count = holdings.len(), "Imported holdings");
        Ok(holdings.len())
    }

    pub async fn update_holding(&self, id: &str, patch: HoldingPatch) -> ServiceResult<Holding> {
        if let Some(q) = patch.quantity {
            check_amount("quantity", q)?;
        }
        if let Some(c) = patch.cost_basis {
            check_amount("costBasis", c)?;
        }
        self.repo
            .update_holding(id, &patch)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Holding {} not found", id)))
    }

    pub async fn remove_holding(&self, id: &str) -> ServiceResult<Holding> {
        let existing = self.holding(id).await?;
        if !self.repo.delete_holding(id).await? {
            return Err(ServiceError::NotFound(format!("Holding {} not found", id)));
        }
        tracing::info!(id, ticker = %existing.ticker, "Removed holding");
        Ok(existing)
    }

    pub async fn holding(&self, id: &str) -> ServiceResult<Holding> {
        self.repo
            .fetch_holding(id)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Holding {} not found", id)))
    }

    /// Pie-chart slices for one asset type; `grouping` overrides the
    /// default (account for cash/custom, ticker otherwise).
    pub async fn allocation(
        &self,
        asset_type: AssetType,
        grouping: Option<AllocationGrouping>,
    ) -> ServiceResult<Vec<AllocationSlice>> {
        let holdings = self.enriched_holdings().await?;
        Ok(match grouping {
            None => allocation_for_asset_type(&holdings, asset_type),
            Some(g) => {
                let subset = filter_holdings(&holdings, |h| h.holding.asset_type == asset_type);
                build_allocation_breakdown(&subset, g)
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api_client::MockPriceProvider;
    use crate::infra::sqlite::repo::SqliteRepo;

    async fn service(provider: MockPriceProvider) -> PortfolioService {
        let repo = SqliteRepo::in_memory().await.unwrap();
        PortfolioService::new(Arc::new(provider), Arc::new(repo))
    }

    fn new_holding(ticker: &str, qty: f64, cost: f64, asset_type: Option<&str>) -> NewHolding {
        NewHolding {
            ticker: ticker.to_string(),
            quantity: qty,
            cost_basis: cost,
            account_name: "Brokerage".to_string(),
            asset_type: asset_type.map(str::to_string),
            ..Default::default()
        }
    }

    #[test]
    fn categorizes_known_tickers() {
        assert_eq!(categorize_ticker("btc"), AssetType::Crypto);
        assert_eq!(categorize_ticker("VOO"), AssetType::Etf);
        assert_eq!(categorize_ticker("AAPL"), AssetType::Stock);
    }

    #[test]
    fn build_rejects_bad_input() {
        assert!(matches!(build_holding(new_holding(" ", 1.0, 1.0, None)), Err(ServiceError::Invalid(_))));
        assert!(matches!(build_holding(new_holding("A", -1.0, 1.0, None)), Err(ServiceError::Invalid(_))));
        assert!(matches!(build_holding(new_holding("A", 1.0, f64::NAN, None)), Err(ServiceError::Invalid(_))));
        assert!(matches!(build_holding(new_holding("A", 1.0, 1.0, Some("bond"))), Err(ServiceError::Invalid(_))));
        assert!(matches!(build_holding(new_holding("A", 1.0, 1.0, Some("option"))), Err(ServiceError::Invalid(_))));
    }

    #[test]
    fn build_accepts_option_contract() {
        let mut n = new_holding("AAPL260116C200", 2.0, 3.5, Some("option"));
        n.underlying_ticker = Some("aapl".to_string());
        n.strike_price = Some(200.0);
        n.expiration_date = Some("2026-01-16".to_string());
        n.option_type = Some("put".to_string());
        let h = build_holding(n).unwrap();
        let c = h.option_contract().unwrap();
        assert_eq!(c.underlying, "AAPL");
        assert_eq!(c.kind, OptionKind::Put);
        assert_eq!(c.expiration, NaiveDate::from_ymd_opt(2026, 1, 16).unwrap());
    }

    #[tokio::test]
    async fn add_rejects_unknown_stock_ticker() {
        let svc = service(MockPriceProvider::default()).await;
        let err = svc.add_holding(new_holding("NOPE", 1.0, 1.0, None)).await.unwrap_err();
        assert!(matches!(err, ServiceError::NotFound(_)));
        // cash is never checked upstream
        svc.add_holding(new_holding("CASH", 1.0, 100.0, Some("cash"))).await.unwrap();
    }

    #[tokio::test]
    async fn portfolio_values_each_asset_type() {
        let mut provider = MockPriceProvider::default()
            .with_quote("AAPL", 200.0)
            .with_crypto("BTC", 50000.0);
        provider.options.insert("MSFT".to_string(), 4.0);
        let svc = service(provider).await;

        svc.add_holding(new_holding("aapl", 10.0, 150.0, None)).await.unwrap();
        svc.add_holding(new_holding("BTC", 0.1, 40000.0, None)).await.unwrap();
        svc.add_holding(new_holding("CASH", 1.0, 5000.0, Some("cash"))).await.unwrap();
        let mut opt = new_holding("MSFT C", 2.0, 3.0, Some("option"));
        opt.underlying_ticker = Some("MSFT".to_string());
        opt.strike_price = Some(400.0);
        opt.expiration_date = Some("2026-06-19".to_string());
        svc.add_holding(opt).await.unwrap();

        let view = svc.portfolio(&HoldingFilter::default(), SortState::default()).await.unwrap();
        assert_eq!(view.count, 4);
        let s = &view.summary;
        assert_eq!(s.asset_type(AssetType::Stock).value, 2000.0);
        assert_eq!(s.asset_type(AssetType::Crypto).value, 5000.0);
        assert_eq!(s.asset_type(AssetType::Cash).value, 5000.0);
        assert_eq!(s.asset_type(AssetType::StockOption).value, 8.0);
        assert_eq!(s.total_value, 12008.0);

        let aapl = view.holdings.iter().find(|h| h.holding.ticker == "AAPL").unwrap();
        assert_eq!(aapl.name.as_deref(), Some("AAPL Inc."));
    }

    #[tokio::test]
    async fn unpriced_crypto_is_valued_at_cost() {
        let svc = service(MockPriceProvider::default()).await;
        svc.add_holding(new_holding("LEDGERX", 2.0, 10.0, Some("crypto"))).await.unwrap();
        let view = svc.portfolio(&HoldingFilter::default(), SortState::default()).await.unwrap();
        assert_eq!(view.holdings[0].current_price, None);
        assert_eq!(view.summary.total_value, 20.0);
    }

    #[tokio::test]
    async fn update_and_remove_missing_holding_is_not_found() {
        let svc = service(MockPriceProvider::default()).await;
        let err = svc.update_holding("h_x", HoldingPatch::default()).await.unwrap_err();
        assert!(matches!(err, ServiceError::NotFound(_)));
        let err = svc.remove_holding("h_x").await.unwrap_err();
        assert!(matches!(err, ServiceError::NotFound(_)));

        let h = svc.add_holding(new_holding("CASH", 1.0, 10.0, Some("cash"))).await.unwrap();
        let patch = HoldingPatch {
            quantity: Some(-1.0),
            ..Default::default()
        };
        assert!(matches!(svc.update_holding(&h.id, patch).await, Err(ServiceError::Invalid(_))));
    }

    #[tokio::test]
    async fn import_is_all_or_nothing() {
        let svc = service(MockPriceProvider::default()).await;
        let bad = b"ticker,quantity,cost_basis,account_name,asset_type\nAAA,1,1,X,stock\nBBB,1,1,X,bond\n";
        let err = svc.import_csv(bad).await.unwrap_err();
        assert!(err.to_string().contains("row 2"));
        assert!(svc.enriched_holdings().await.unwrap().is_empty());

        let good = b"ticker,quantity,cost_basis,account_name,asset_type\nAAA,1,1,X,stock\nCASH,1,9,Bank,cash\n";
        assert_eq!(svc.import_csv(good).await.unwrap(), 2);
        assert_eq!(svc.enriched_holdings().await.unwrap().len(), 2);
    }
}
