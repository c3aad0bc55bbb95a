use anyhow::{bail, Context, Result};
use chrono::Utc;
use csv::ReaderBuilder;
use dotenv::dotenv;
use sqlx::sqlite::SqliteConnectOptions;
use sqlx::SqlitePool;
use std::env;
use std::str::FromStr;

/// Canonical tag for a CSV asset type; `misc` is the legacy name for `custom`.
fn canonical_asset_type(tag: &str) -> Option<&'static str> {
    match tag.trim().to_ascii_lowercase().as_str() {
        "stock" => Some("stock"),
        "etf" => Some("etf"),
        "crypto" => Some("crypto"),
        "custom" | "misc" => Some("custom"),
        "cash" => Some("cash"),
        "option" => Some("option"),
        _ => None,
    }
}

#[derive(Debug, serde::Deserialize)]
struct CsvRow {
    ticker: String,
    quantity: f64,
    cost_basis: f64,
    account_name: Option<String>,
    asset_type: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenv().ok();
    let db_url = env::var("DATABASE_URL").unwrap_or_else(|_| "sqlite://data/portfolio.db".to_string());
    let options = SqliteConnectOptions::from_str(&db_url)?.create_if_missing(true);
    let pool = SqlitePool::connect_with(options).await?;
    sqlx::migrate!("./migrations").run(&pool).await?;

    let path = env::args().nth(1).unwrap_or_else(|| "holdings.csv".to_string());
    println!("Importing '{}' into {}", path, db_url);

    let mut rdr = ReaderBuilder::new()
        .trim(csv::Trim::All)
        .flexible(true)
        .has_headers(true)
        .from_path(&path)
        .with_context(|| format!("opening {}", path))?;

    // validate the whole file before touching the database
    let mut rows = Vec::new();
    for (i, result) in rdr.deserialize::<CsvRow>().enumerate() {
        let row = result.with_context(|| format!("row {}", i + 1))?;
        let Some(asset_type) = row.asset_type.as_deref().filter(|t| !t.is_empty()) else {
            bail!("row {}: asset_type is required for bulk import", i + 1);
        };
        let Some(asset_type) = canonical_asset_type(asset_type) else {
            bail!("row {}: unknown asset type '{}'", i + 1, asset_type);
        };
        if asset_type == "option" {
            bail!("row {}: options must be added through the API", i + 1);
        }
        if row.ticker.is_empty() || row.quantity < 0.0 || row.cost_basis < 0.0 {
            bail!("row {}: ticker is required and amounts must be non-negative", i + 1);
        }
        rows.push((row, asset_type));
    }

    let now = Utc::now();
    let mut tx = pool.begin().await?;
    for (n, (row, asset_type)) in rows.iter().enumerate() {
        sqlx::query("INSERT INTO holdings (id, ticker, quantity, cost_basis, account_name, asset_type, added_at) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)")
            .bind(format!("h_{}_{}", now.timestamp_millis(), n))
            .bind(row.ticker.to_uppercase())
            .bind(row.quantity)
            .bind(row.cost_basis)
            .bind(row.account_name.clone().unwrap_or_default())
            .bind(*asset_type)
            .bind(now.to_rfc3339())
            .execute(&mut *tx)
            .await?;
    }
    tx.commit().await?;
    println!("Inserted {} holdings", rows.len());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn asset_types_match_api_parsing() {
        assert_eq!(canonical_asset_type("misc"), Some("custom"));
        assert_eq!(canonical_asset_type(" Cash "), Some("cash"));
        assert_eq!(canonical_asset_type("ETF"), Some("etf"));
        assert_eq!(canonical_asset_type("bond"), None);
    }
}
