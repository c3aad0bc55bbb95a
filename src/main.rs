use axum::extract::{Path as AxumPath, Query, State};
use axum::http::{header, HeaderValue};
use axum::response::{IntoResponse, Json};
use axum::routing::{delete, get, post};
use axum::Router;
use serde::Deserialize;
use serde_json::json;
use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tracing::{error, info, warn};

mod api_client;
mod config;
mod csv_store;
mod domain;
mod error;
mod infra;
mod price_cache;
mod usecases;


use crate::api_client::{PriceProvider, ReqwestPriceProvider};
use crate::config::AppConfig;
use crate::domain::models::{AssetType, HoldingPatch, NewHolding, PerformanceReport, PinStatus, PortfolioView};
use crate::error::{ServiceError, ServiceResult};
use crate::infra::sqlite::repo::SqliteRepo;
use crate::price_cache::CachedPriceProvider;
use crate::usecases::aggregate::{AllocationGrouping, HoldingFilter, SortDirection, SortKey, SortState};
use crate::usecases::pin_service::PinService;
use crate::usecases::portfolio_service::PortfolioService;
use crate::usecases::snapshot_service::{spawn_daily_snapshot, SnapshotOutcome, SnapshotService};

#[derive(Clone)]
struct AppState {
    portfolio: Arc<PortfolioService>,
    snapshots: Arc<SnapshotService>,
    pin: Arc<PinService>,
}

impl AppState {
    fn new(provider: Arc<dyn PriceProvider>, repo: Arc<SqliteRepo>, history_days: i64) -> Self {
        let portfolio = Arc::new(PortfolioService::new(provider, repo.clone()));
        let snapshots = Arc::new(SnapshotService::new(portfolio.clone(), repo.clone(), history_days));
        AppState {
            portfolio,
            snapshots,
            pin: Arc::new(PinService::new(repo)),
        }
    }
}

fn today() -> chrono::NaiveDate {
    chrono::Local::now().date_naive()
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PortfolioQuery {
    sort: Option<SortKey>,
    dir: Option<SortDirection>,
    account: Option<String>,
    ticker: Option<String>,
    industry: Option<String>,
    asset_type: Option<String>,
}

#[tracing::instrument(skip(state))]
async fn api_portfolio(
    State(state): State<AppState>,
    Query(q): Query<PortfolioQuery>,
) -> ServiceResult<Json<PortfolioView>> {
    let asset_type = match q.asset_type.as_deref() {
        Some(tag) => Some(tag.parse::<AssetType>().map_err(|e| ServiceError::Invalid(e.to_string()))?),
        None => None,
    };
    let filter = HoldingFilter {
        account: q.account,
        ticker: q.ticker,
        industry: q.industry,
        asset_type,
    };
    let sort = SortState {
        active: q.sort.map(|key| (key, q.dir.unwrap_or_default())),
    };
    Ok(Json(state.portfolio.portfolio(&filter, sort).await?))
}

#[tracing::instrument(skip(state))]
async fn api_add_holding(
    State(state): State<AppState>,
    Json(body): Json<NewHolding>,
) -> ServiceResult<Json<serde_json::Value>> {
    let holding = state.portfolio.add_holding(body).await?;
    Ok(Json(json!({
        "message": format!("Added {} {} to portfolio", holding.quantity, holding.ticker),
        "holding": holding,
    })))
}

#[tracing::instrument(skip(state, body))]
async fn api_import(State(state): State<AppState>, body: axum::body::Bytes) -> ServiceResult<Json<serde_json::Value>> {
    let imported = state.portfolio.import_csv(&body).await?;
    Ok(Json(json!({ "imported": imported })))
}

#[tracing::instrument(skip(state))]
async fn api_get_holding(
    State(state): State<AppState>,
    AxumPath(id): AxumPath<String>,
) -> ServiceResult<Json<serde_json::Value>> {
    let holding = state.portfolio.holding(&id).await?;
    Ok(Json(json!({ "holding": holding })))
}

#[tracing::instrument(skip(state))]
async fn api_update_holding(
    State(state): State<AppState>,
    AxumPath(id): AxumPath<String>,
    Json(patch): Json<HoldingPatch>,
) -> ServiceResult<Json<serde_json::Value>> {
    let holding = state.portfolio.update_holding(&id, patch).await?;
    Ok(Json(json!({
        "message": format!("Updated {}", holding.ticker),
        "holding": holding,
    })))
}

#[tracing::instrument(skip(state))]
async fn api_delete_holding(
    State(state): State<AppState>,
    AxumPath(id): AxumPath<String>,
) -> ServiceResult<Json<serde_json::Value>> {
    let holding = state.portfolio.remove_holding(&id).await?;
    Ok(Json(json!({
        "message": format!("Removed {} from portfolio", holding.ticker),
        "holding": holding,
    })))
}

#[derive(Debug, Deserialize)]
struct SnapshotQuery {
    #[serde(default)]
    force: bool,
}

#[tracing::instrument(skip(state))]
async fn api_take_snapshot(
    State(state): State<AppState>,
    Query(q): Query<SnapshotQuery>,
) -> ServiceResult<Json<SnapshotOutcome>> {
    Ok(Json(state.snapshots.take_snapshot(q.force, today()).await?))
}

#[derive(Debug, Deserialize)]
struct HistoryQuery {
    days: Option<i64>,
}

#[tracing::instrument(skip(state))]
async fn api_snapshots(
    State(state): State<AppState>,
    Query(q): Query<HistoryQuery>,
) -> ServiceResult<Json<serde_json::Value>> {
    let days = q.days.unwrap_or(state.snapshots.history_days);
    let snapshots = state.snapshots.snapshots(days, today()).await?;
    Ok(Json(json!({ "days": days, "count": snapshots.len(), "snapshots": snapshots })))
}

#[tracing::instrument(skip(state))]
async fn api_snapshots_csv(
    State(state): State<AppState>,
    Query(q): Query<HistoryQuery>,
) -> ServiceResult<impl IntoResponse> {
    let days = q.days.unwrap_or(state.snapshots.history_days);
    let body = state.snapshots.export_csv(days, today()).await?;
    Ok((
        [
            (header::CONTENT_TYPE, "text/csv; charset=utf-8"),
            (header::CONTENT_DISPOSITION, "attachment; filename=\"portfolio-snapshots.csv\""),
        ],
        body,
    ))
}

#[tracing::instrument(skip(state))]
async fn api_performance(State(state): State<AppState>) -> ServiceResult<Json<PerformanceReport>> {
    Ok(Json(state.snapshots.performance(today()).await?))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AllocationQuery {
    group_by: Option<AllocationGrouping>,
}

#[tracing::instrument(skip(state))]
async fn api_allocation(
    State(state): State<AppState>,
    AxumPath(asset_type): AxumPath<String>,
    Query(q): Query<AllocationQuery>,
) -> ServiceResult<Json<serde_json::Value>> {
    let asset_type = asset_type
        .parse::<AssetType>()
        .map_err(|e| ServiceError::Invalid(e.to_string()))?;
    let slices = state.portfolio.allocation(asset_type, q.group_by).await?;
    Ok(Json(json!({ "assetType": asset_type, "allocation": slices })))
}

#[derive(Debug, Deserialize)]
struct PinRequest {
    pin: String,
}

#[derive(Debug, Deserialize)]
struct SetPinRequest {
    pin: String,
    #[serde(default, alias = "currentPin")]
    current_pin: String,
}

#[tracing::instrument(skip(state, body))]
async fn api_verify_pin(State(state): State<AppState>, Json(body): Json<PinRequest>) -> ServiceResult<Json<PinStatus>> {
    Ok(Json(state.pin.verify(&body.pin).await?))
}

#[tracing::instrument(skip(state, body))]
async fn api_set_pin(
    State(state): State<AppState>,
    Json(body): Json<SetPinRequest>,
) -> ServiceResult<Json<serde_json::Value>> {
    state.pin.set(&body.pin, &body.current_pin).await?;
    Ok(Json(json!({ "success": true })))
}

#[tracing::instrument(skip(state, body))]
async fn api_remove_pin(
    State(state): State<AppState>,
    Json(body): Json<PinRequest>,
) -> ServiceResult<Json<serde_json::Value>> {
    let removed = state.pin.remove(&body.pin).await?;
    Ok(Json(json!({ "success": true, "removed": removed })))
}

async fn api_health() -> Json<serde_json::Value> {
    Json(json!({ "status": "ok" }))
}

fn app(state: AppState) -> Router {
    Router::new()
        .route("/api/health", get(api_health))
        .route("/api/portfolio", get(api_portfolio).post(api_add_holding))
        .route("/api/portfolio/import", post(api_import))
        .route("/api/portfolio/snapshot", post(api_take_snapshot))
        .route("/api/portfolio/snapshots", get(api_snapshots))
        .route("/api/portfolio/snapshots.csv", get(api_snapshots_csv))
        .route("/api/portfolio/performance", get(api_performance))
        .route("/api/portfolio/allocation/{asset_type}", get(api_allocation))
        .route("/api/portfolio/verify-pin", post(api_verify_pin))
        .route("/api/portfolio/set-pin", post(api_set_pin))
        .route("/api/portfolio/pin", delete(api_remove_pin))
        .route(
            "/api/portfolio/{id}",
            get(api_get_holding).put(api_update_holding).delete(api_delete_holding),
        )
        .with_state(state)
}

fn cors_layer(origins: &[String]) -> CorsLayer {
    let layer = CorsLayer::new().allow_methods(Any).allow_headers(Any);
    if origins.is_empty() || origins.iter().any(|o| o == "*") {
        return layer.allow_origin(Any);
    }
    let allowed: Vec<HeaderValue> = origins
        .iter()
        .filter_map(|o| match HeaderValue::from_str(o) {
            Ok(v) => Some(v),
            Err(_) => {
                warn!(origin = %o, "Ignoring invalid CORS origin");
                None
            }
        })
        .collect();
    layer.allow_origin(AllowOrigin::list(allowed))
}

/// Creates the parent directory of a file-backed SQLite URL.
fn ensure_sqlite_dir(database_url: &str) -> std::io::Result<()> {
    let path = database_url
        .trim_start_matches("sqlite://")
        .trim_start_matches("sqlite:");
    let path = path.split('?').next().unwrap_or_default();
    if path.is_empty() || path.starts_with(":memory:") {
        return Ok(());
    }
    match Path::new(path).parent() {
        Some(parent) if !parent.as_os_str().is_empty() => std::fs::create_dir_all(parent),
        _ => Ok(()),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing subscriber for logging
    tracing_subscriber::fmt::init();

    let config = AppConfig::from_env();
    ensure_sqlite_dir(&config.database_url)?;
    let repo = Arc::new(
        SqliteRepo::connect(&config.database_url)
            .await
            .map_err(|e| anyhow::anyhow!(e))?,
    );
    info!(database = %config.database_url, "Database ready");

    let upstream: Arc<dyn PriceProvider> = Arc::new(ReqwestPriceProvider::new(config.providers.clone()));
    let provider = Arc::new(CachedPriceProvider::new(upstream, config.price_cache_ttl));
    let state = AppState::new(provider, repo, config.snapshot_history_days);

    spawn_daily_snapshot(state.snapshots.clone());

    let app = app(state).layer(cors_layer(&config.cors_origins));
    serve(app, config.port).await;
    Ok(())
}

async fn serve(app: Router, port: u16) {
    // Try to bind to the requested port; if it's in use, try a few subsequent ports.
    let max_attempts: u16 = 10;
    for try_port in candidate_ports(port, max_attempts) {
        let addr = SocketAddr::from(([127, 0, 0, 1], try_port));
        match tokio::net::TcpListener::bind(&addr).await {
            Ok(listener) => {
                info!(%addr, "Listening");
                if let Err(e) = axum::serve(listener, app).await {
                    error!(error = %e, "Server failed while serving");
                }
                return;
            }
            Err(e) => {
                warn!(port = try_port, error = %e, "Port unavailable, trying next");
            }
        }
    }
    error!(port, attempts = max_attempts, "Failed to bind to any port");
}

/// `port` and the ports after it, stopping at the top of the u16 range.
fn candidate_ports(port: u16, max_attempts: u16) -> impl Iterator<Item = u16> {
    (0..max_attempts).map_while(move |offset| port.checked_add(offset))
}
