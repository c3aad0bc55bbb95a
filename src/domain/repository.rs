use crate::domain::models::{Holding, HoldingPatch, Snapshot};
use async_trait::async_trait;
use chrono::NaiveDate;

pub type RepoResult<T> = Result<T, Box<dyn std::error::Error + Send + Sync>>;

#[async_trait]
pub trait HoldingRepo: Send + Sync {
    async fn insert_holding(&self, holding: &Holding) -> RepoResult<()>;
    // All or nothing
    async fn insert_holdings(&self, holdings: &[Holding]) -> RepoResult<()>;
    // Applies only the fields present in the patch; None when the id is unknown
    async fn update_holding(&self, id: &str, patch: &HoldingPatch) -> RepoResult<Option<Holding>>;
    async fn delete_holding(&self, id: &str) -> RepoResult<bool>;
    async fn fetch_holding(&self, id: &str) -> RepoResult<Option<Holding>>;
    // Newest first
    async fn fetch_holdings(&self) -> RepoResult<Vec<Holding>>;
}

#[async_trait]
pub trait SnapshotRepo: Send + Sync {
    // Replaces any snapshot already stored for the same date
    async fn upsert_snapshot(&self, snap: &Snapshot) -> RepoResult<()>;
    async fn fetch_snapshot(&self, date: NaiveDate) -> RepoResult<Option<Snapshot>>;
    // Ascending by date, `since` inclusive
    async fn fetch_snapshots(&self, since: Option<NaiveDate>) -> RepoResult<Vec<Snapshot>>;
}

#[async_trait]
pub trait PinRepo: Send + Sync {
    async fn fetch_pin(&self) -> RepoResult<Option<String>>;
    async fn store_pin(&self, pin: &str) -> RepoResult<()>;
    async fn clear_pin(&self) -> RepoResult<()>;
}
