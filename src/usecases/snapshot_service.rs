use crate::csv_store::write_snapshots_csv;
use crate::domain::models::{PerformanceReport, Snapshot};
use crate::domain::repository::SnapshotRepo;
use crate::error::ServiceResult;
use crate::usecases::aggregate::{performance_report, summarize};
use crate::usecases::portfolio_service::PortfolioService;
use chrono::{NaiveDate, TimeDelta, Utc};
use serde::Serialize;
use std::sync::Arc;

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "status", rename_all = "camelCase")]
pub enum SnapshotOutcome {
    Saved { snapshot: Snapshot },
    AlreadyExists { snapshot: Snapshot },
    Skipped { reason: String },
}

/// First day of a `days`-long window ending today. None when the window
/// reaches past the representable calendar, meaning all history.
fn window_start(today: NaiveDate, days: i64) -> Option<NaiveDate> {
    TimeDelta::try_days(days.max(0)).and_then(|d| today.checked_sub_signed(d))
}

pub struct SnapshotService {
    pub portfolio: Arc<PortfolioService>,
    pub repo: Arc<dyn SnapshotRepo>,
    pub history_days: i64,
}

impl SnapshotService {
    pub fn new(portfolio: Arc<PortfolioService>, repo: Arc<dyn SnapshotRepo>, history_days: i64) -> Self {
        Self {
            portfolio,
            repo,
            history_days,
        }
    }

    /// Records today's value. Idempotent per calendar day unless `force`,
    /// which replaces today's snapshot.
    pub async fn take_snapshot(&self, force: bool, today: NaiveDate) -> ServiceResult<SnapshotOutcome> {
        if !force {
            if let Some(existing) = self.repo.fetch_snapshot(today).await? {
                return Ok(SnapshotOutcome::AlreadyExists { snapshot: existing });
            }
        }

        let holdings = self.portfolio.enriched_holdings().await?;
        if holdings.is_empty() {
            return Ok(SnapshotOutcome::Skipped {
                reason: "No holdings to snapshot".to_string(),
            });
        }

        let summary = summarize(&holdings);
        let snapshot = Snapshot::from_summary(today, &summary, Utc::now());
        self.repo.upsert_snapshot(&snapshot).await?;
        tracing::info!(date = %today, total_value = snapshot.total_value, force, "Saved portfolio snapshot");
        Ok(SnapshotOutcome::Saved { snapshot })
    }

    pub async fn snapshots(&self, days: i64, today: NaiveDate) -> ServiceResult<Vec<Snapshot>> {
        Ok(self.repo.fetch_snapshots(window_start(today, days)).await?)
    }

    pub async fn performance(&self, today: NaiveDate) -> ServiceResult<PerformanceReport> {
        let all = self.repo.fetch_snapshots(None).await?;
        let holdings = self.portfolio.enriched_holdings().await?;
        let current = summarize(&holdings);
        let history_since = window_start(today, self.history_days).unwrap_or(NaiveDate::MIN);
        Ok(performance_report(&all, &current, today, history_since))
    }

    pub async fn export_csv(&self, days: i64, today: NaiveDate) -> ServiceResult<String> {
        let rows = self.snapshots(days, today).await?;
        Ok(write_snapshots_csv(&rows)?)
    }
}

/// Background trigger used on startup: failures are logged and dropped.
pub fn spawn_daily_snapshot(service: Arc<SnapshotService>) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let today = chrono::Local::now().date_naive();
        match service.take_snapshot(false, today).await {
            Ok(SnapshotOutcome::Saved { .. }) => {}
            Ok(SnapshotOutcome::AlreadyExists { .. }) => {
                tracing::debug!(date = %today, "Snapshot already taken today")
            }
            Ok(SnapshotOutcome::Skipped { reason }) => tracing::debug!(reason = %reason, "Snapshot skipped"),
            Err(e) => tracing::warn!(error = %e, "Startup snapshot failed"),
        }
    })
}
