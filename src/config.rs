use crate::api_client::ProviderEndpoints;
use std::env;
use std::str::FromStr;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub database_url: String,
    pub port: u16,
    pub cors_origins: Vec<String>,
    pub price_cache_ttl: Duration,
    pub snapshot_history_days: i64,
    pub providers: ProviderEndpoints,
}

fn var_or(key: &str, default: &str) -> String {
    env::var(key)
        .ok()
        .filter(|v| !v.trim().is_empty())
        .unwrap_or_else(|| default.to_string())
}

fn parsed_or<T: FromStr>(key: &str, default: T) -> T {
    match env::var(key) {
        Ok(raw) => raw.trim().parse().unwrap_or_else(|_| {
            tracing::warn!(key, value = %raw, "Invalid value, using default");
            default
        }),
        Err(_) => default,
    }
}

impl AppConfig {
    /// Reads `.env` (if present) and the process environment.
    pub fn from_env() -> Self {
        dotenv::dotenv().ok();
        AppConfig {
            database_url: var_or("DATABASE_URL", "sqlite://data/portfolio.db"),
            port: parsed_or("PORT", 3001),
            cors_origins: var_or("CORS_ORIGINS", "*")
                .split(',')
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect(),
            price_cache_ttl: Duration::from_secs(parsed_or("PRICE_CACHE_TTL_SECS", 900)),
            snapshot_history_days: parsed_or("SNAPSHOT_HISTORY_DAYS", 90),
            providers: ProviderEndpoints {
                fmp_base_url: var_or("FMP_BASE_URL", "https://financialmodelingprep.com/stable"),
                fmp_api_key: var_or("FMP_API_KEY", ""),
                coingecko_base_url: var_or("COINGECKO_BASE_URL", "https://api.coingecko.com/api/v3"),
                tradier_base_url: var_or("TRADIER_BASE_URL", "https://sandbox.tradier.com/v1"),
                tradier_api_key: var_or("TRADIER_API_KEY", ""),
            },
        }
    }
}
