use crate::domain::models::{
    AssetType, AssetTypeTotals, Holding, HoldingPatch, HoldingRow, Snapshot,
    SnapshotAssetTypeRow, SnapshotRow,
};
use crate::domain::repository::{HoldingRepo, PinRepo, RepoResult, SnapshotRepo};
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{QueryBuilder, Sqlite, SqlitePool};
use std::collections::{BTreeMap, HashMap};
use std::str::FromStr;

const DATE_FORMAT: &str = "%Y-%m-%d";

pub struct SqliteRepo {
    pub pool: SqlitePool,
}

impl SqliteRepo {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Opens (creating if needed) the database and applies migrations.
    pub async fn connect(database_url: &str) -> RepoResult<Self> {
        let options = SqliteConnectOptions::from_str(database_url)?.create_if_missing(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await?;
        sqlx::migrate!("./migrations").run(&pool).await?;
        Ok(Self::new(pool))
    }

    /// Single-connection in-memory database; every pooled connection to
    /// `sqlite::memory:` would otherwise see its own empty database.
    pub async fn in_memory() -> RepoResult<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect("sqlite::memory:")
            .await?;
        sqlx::migrate!("./migrations").run(&pool).await?;
        Ok(Self::new(pool))
    }

    async fn fetch_asset_type_rows(
        &self,
        since: Option<&str>,
    ) -> RepoResult<HashMap<String, BTreeMap<AssetType, AssetTypeTotals>>> {
        let mut qb = QueryBuilder::<Sqlite>::new(
            "SELECT date, asset_type, count, value, cost, gain_loss FROM snapshot_asset_types",
        );
        if let Some(s) = since {
            qb.push(" WHERE date >= ");
            qb.push_bind(s);
        }
        let rows = qb
            .build_query_as::<SnapshotAssetTypeRow>()
            .fetch_all(&self.pool)
            .await?;

        let mut out: HashMap<String, BTreeMap<AssetType, AssetTypeTotals>> = HashMap::new();
        for r in rows {
            let totals = AssetTypeTotals {
                count: u32::try_from(r.count).unwrap_or(0),
                value: r.value,
                cost: r.cost,
                gain_loss: r.gain_loss,
            };
            out.entry(r.date)
                .or_default()
                .insert(AssetType::from_tag(&r.asset_type), totals);
        }
        Ok(out)
    }
}

fn snapshot_from_rows(
    row: SnapshotRow,
    by_asset_type: Option<BTreeMap<AssetType, AssetTypeTotals>>,
) -> Option<Snapshot> {
    let date = match NaiveDate::parse_from_str(&row.date, DATE_FORMAT) {
        Ok(d) => d,
        Err(e) => {
            tracing::warn!(date = %row.date, error = %e, "Skipping snapshot with unparseable date");
            return None;
        }
    };
    let taken_at = DateTime::parse_from_rfc3339(&row.taken_at)
        .map(|t| t.with_timezone(&Utc))
        .unwrap_or_else(|_| date.and_hms_opt(0, 0, 0).unwrap_or_default().and_utc());

    let mut by_asset_type = by_asset_type.unwrap_or_default();
    for t in AssetType::ALL {
        by_asset_type.entry(t).or_default();
    }

    Some(Snapshot {
        date,
        total_value: row.total_value,
        total_cost: row.total_cost,
        total_gain_loss: row.total_gain_loss,
        total_gain_loss_percent: row.total_gain_loss_percent,
        by_asset_type,
        taken_at,
    })
}

const INSERT_HOLDING: &str = r#"INSERT INTO holdings (id, ticker, quantity, cost_basis, account_name, asset_type, underlying_ticker, strike_price, expiration_date, option_type, added_at, updated_at)
    VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)"#;

fn bind_holding<'q>(
    h: &'q Holding,
) -> sqlx::query::Query<'q, Sqlite, sqlx::sqlite::SqliteArguments<'q>> {
    let added_at = h.added_at.clone().unwrap_or_else(|| Utc::now().to_rfc3339());
    sqlx::query(INSERT_HOLDING)
        .bind(&h.id)
        .bind(&h.ticker)
        .bind(h.quantity)
        .bind(h.cost_basis)
        .bind(&h.account_name)
        .bind(h.asset_type.as_str())
        .bind(&h.underlying_ticker)
        .bind(h.strike_price)
        .bind(h.expiration_date.map(|d| d.format(DATE_FORMAT).to_string()))
        .bind(h.option_type.map(|k| k.as_str()))
        .bind(added_at)
        .bind(&h.updated_at)
}

#[async_trait]
impl HoldingRepo for SqliteRepo {
    async fn insert_holding(&self, h: &Holding) -> RepoResult<()> {
        bind_holding(h).execute(&self.pool).await?;
        Ok(())
    }

    async fn insert_holdings(&self, holdings: &[Holding]) -> RepoResult<()> {
        let mut tx = self.pool.begin().await?;
        for h in holdings {
            bind_holding(h).execute(&mut *tx).await?;
        }
        tx.commit().await?;
        Ok(())
    }

    async fn update_holding(&self, id: &str, patch: &HoldingPatch) -> RepoResult<Option<Holding>> {
        let res = sqlx::query(
            "UPDATE holdings SET quantity = COALESCE(?1, quantity), cost_basis = COALESCE(?2, cost_basis), account_name = COALESCE(?3, account_name), updated_at = ?4 WHERE id = ?5",
        )
        .bind(patch.quantity)
        .bind(patch.cost_basis)
        .bind(&patch.account_name)
        .bind(Utc::now().to_rfc3339())
        .bind(id)
        .execute(&self.pool)
        .await?;
        if res.rows_affected() == 0 {
            return Ok(None);
        }
        self.fetch_holding(id).await
    }

    async fn delete_holding(&self, id: &str) -> RepoResult<bool> {
        let res = sqlx::query("DELETE FROM holdings WHERE id = ?1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(res.rows_affected() > 0)
    }

    async fn fetch_holding(&self, id: &str) -> RepoResult<Option<Holding>> {
        let row = sqlx::query_as::<_, HoldingRow>("SELECT * FROM holdings WHERE id = ?1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(Holding::from))
    }

    async fn fetch_holdings(&self) -> RepoResult<Vec<Holding>> {
        let rows = sqlx::query_as::<_, HoldingRow>(
            "SELECT * FROM holdings ORDER BY added_at DESC, id DESC",
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(Holding::from).collect())
    }
}

#[async_trait]
impl SnapshotRepo for SqliteRepo {
    async fn upsert_snapshot(&self, snap: &Snapshot) -> RepoResult<()> {
        let date = snap.date.format(DATE_FORMAT).to_string();
        let mut tx = self.pool.begin().await?;
        sqlx::query("INSERT OR REPLACE INTO snapshots (date, total_value, total_cost, total_gain_loss, total_gain_loss_percent, taken_at) VALUES (?1, ?2, ?3, ?4, ?5, ?6)")
            .bind(&date)
            .bind(snap.total_value)
            .bind(snap.total_cost)
            .bind(snap.total_gain_loss)
            .bind(snap.total_gain_loss_percent)
            .bind(snap.taken_at.to_rfc3339())
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM snapshot_asset_types WHERE date = ?1")
            .bind(&date)
            .execute(&mut *tx)
            .await?;
        for (asset_type, totals) in &snap.by_asset_type {
            sqlx::query("INSERT INTO snapshot_asset_types (date, asset_type, count, value, cost, gain_loss) VALUES (?1, ?2, ?3, ?4, ?5, ?6)")
                .bind(&date)
                .bind(asset_type.as_str())
                .bind(i64::from(totals.count))
                .bind(totals.value)
                .bind(totals.cost)
                .bind(totals.gain_loss)
                .execute(&mut *tx)
                .await?;
        }
        tx.commit().await?;
        Ok(())
    }

    async fn fetch_snapshot(&self, date: NaiveDate) -> RepoResult<Option<Snapshot>> {
        let key = date.format(DATE_FORMAT).to_string();
        let row = sqlx::query_as::<_, SnapshotRow>("SELECT date, total_value, total_cost, total_gain_loss, total_gain_loss_percent, taken_at FROM snapshots WHERE date = ?1")
            .bind(&key)
            .fetch_optional(&self.pool)
            .await?;
        let Some(row) = row else {
            return Ok(None);
        };
        let mut by_date = self.fetch_asset_type_rows(Some(&key)).await?;
        let by_type = by_date.remove(&key);
        Ok(snapshot_from_rows(row, by_type))
    }

    async fn fetch_snapshots(&self, since: Option<NaiveDate>) -> RepoResult<Vec<Snapshot>> {
        let since = since.map(|d| d.format(DATE_FORMAT).to_string());
        let mut qb = QueryBuilder::<Sqlite>::new(
            "SELECT date, total_value, total_cost, total_gain_loss, total_gain_loss_percent, taken_at FROM snapshots",
        );
        if let Some(s) = &since {
            qb.push(" WHERE date >= ");
            qb.push_bind(s.as_str());
        }
        qb.push(" ORDER BY date ASC");
        let rows = qb
            .build_query_as::<SnapshotRow>()
            .fetch_all(&self.pool)
            .await?;

        let mut by_date = self.fetch_asset_type_rows(since.as_deref()).await?;
        Ok(rows
            .into_iter()
            .filter_map(|r| {
                let by_type = by_date.remove(&r.date);
                snapshot_from_rows(r, by_type)
            })
            .collect())
    }
}

#[async_trait]
impl PinRepo for SqliteRepo {
    async fn fetch_pin(&self) -> RepoResult<Option<String>> {
        let pin: Option<(String,)> = sqlx::query_as("SELECT pin FROM portfolio_pin WHERE id = 1")
            .fetch_optional(&self.pool)
            .await?;
        Ok(pin.map(|(p,)| p).filter(|p| !p.is_empty()))
    }

    async fn store_pin(&self, pin: &str) -> RepoResult<()> {
        sqlx::query("INSERT OR REPLACE INTO portfolio_pin (id, pin) VALUES (1, ?1)")
            .bind(pin)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn clear_pin(&self) -> RepoResult<()> {
        sqlx::query("DELETE FROM portfolio_pin")
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::models::PortfolioSummary;

    fn holding(id: &str, ticker: &str, added_at: &str) -> Holding {
        Holding {
            id: id.to_string(),
            ticker: ticker.to_string(),
            quantity: 2.0,
            cost_basis: 10.0,
            account_name: "Brokerage".to_string(),
            asset_type: AssetType::Stock,
            underlying_ticker: None,
            strike_price: None,
            expiration_date: None,
            option_type: None,
            added_at: Some(added_at.to_string()),
            updated_at: None,
        }
    }

    fn date(s: &str) -> NaiveDate {
        NaiveDate::parse_from_str(s, DATE_FORMAT).unwrap()
    }

    #[tokio::test]
    async fn holdings_crud_round_trip() {
        let repo = SqliteRepo::in_memory().await.unwrap();
        repo.insert_holding(&holding("h_1", "AAPL", "2025-01-01T00:00:00+00:00"))
            .await
            .unwrap();
        repo.insert_holding(&holding("h_2", "MSFT", "2025-02-01T00:00:00+00:00"))
            .await
            .unwrap();

        let all = repo.fetch_holdings().await.unwrap();
        assert_eq!(all.len(), 2);
        assert_eq!(all[0].ticker, "MSFT");

        let patch = HoldingPatch {
            quantity: Some(5.0),
            cost_basis: None,
            account_name: Some("IRA".to_string()),
        };
        let updated = repo.update_holding("h_1", &patch).await.unwrap().unwrap();
        assert_eq!(updated.quantity, 5.0);
        assert_eq!(updated.cost_basis, 10.0);
        assert_eq!(updated.account_name, "IRA");
        assert!(updated.updated_at.is_some());

        assert!(repo.update_holding("missing", &patch).await.unwrap().is_none());
        assert!(repo.delete_holding("h_2").await.unwrap());
        assert!(!repo.delete_holding("h_2").await.unwrap());
        assert!(repo.fetch_holding("h_2").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn batch_insert_is_all_or_nothing() {
        let repo = SqliteRepo::in_memory().await.unwrap();
        repo.insert_holding(&holding("h_1", "AAPL", "2025-01-01T00:00:00+00:00"))
            .await
            .unwrap();

        // second row collides with the existing primary key
        let batch = vec![
            holding("h_2", "MSFT", "2025-02-01T00:00:00+00:00"),
            holding("h_1", "NVDA", "2025-03-01T00:00:00+00:00"),
        ];
        assert!(repo.insert_holdings(&batch).await.is_err());
        let all = repo.fetch_holdings().await.unwrap();
        assert_eq!(all.len(), 1);
        assert!(repo.fetch_holding("h_2").await.unwrap().is_none());

        repo.insert_holdings(&batch[..1]).await.unwrap();
        assert_eq!(repo.fetch_holdings().await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn snapshot_upsert_replaces_same_day() {
        let repo = SqliteRepo::in_memory().await.unwrap();
        let mut summary = PortfolioSummary::zeroed();
        summary.total_value = 100.0;
        let first = Snapshot::from_summary(date("2025-03-01"), &summary, Utc::now());
        repo.upsert_snapshot(&first).await.unwrap();

        summary.total_value = 150.0;
        summary.by_asset_type.get_mut(&AssetType::Cash).unwrap().value = 150.0;
        let second = Snapshot::from_summary(date("2025-03-01"), &summary, Utc::now());
        repo.upsert_snapshot(&second).await.unwrap();

        let all = repo.fetch_snapshots(None).await.unwrap();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].total_value, 150.0);
        assert_eq!(all[0].asset_type_value(AssetType::Cash), 150.0);
        assert_eq!(all[0].by_asset_type.len(), 6);
    }

    #[tokio::test]
    async fn snapshots_are_filtered_and_ordered_by_date() {
        let repo = SqliteRepo::in_memory().await.unwrap();
        let summary = PortfolioSummary::zeroed();
        for d in ["2025-03-10", "2025-01-01", "2025-02-01"] {
            repo.upsert_snapshot(&Snapshot::from_summary(date(d), &summary, Utc::now()))
                .await
                .unwrap();
        }
        let since = repo.fetch_snapshots(Some(date("2025-02-01"))).await.unwrap();
        let dates: Vec<_> = since.iter().map(|s| s.date).collect();
        assert_eq!(dates, vec![date("2025-02-01"), date("2025-03-10")]);
        assert!(repo.fetch_snapshot(date("2025-01-01")).await.unwrap().is_some());
        assert!(repo.fetch_snapshot(date("2025-01-02")).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn pin_store_and_clear() {
        let repo = SqliteRepo::in_memory().await.unwrap();
        assert_eq!(repo.fetch_pin().await.unwrap(), None);
        repo.store_pin("1234").await.unwrap();
        assert_eq!(repo.fetch_pin().await.unwrap().as_deref(), Some("1234"));
        repo.clear_pin().await.unwrap();
        assert_eq!(repo.fetch_pin().await.unwrap(), None);
    }
}
