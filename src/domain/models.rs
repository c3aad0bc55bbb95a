use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use sqlx::FromRow;
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

/// Grouping dimension for the portfolio summary. Six fixed tags.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum AssetType {
    #[default]
    Stock,
    Etf,
    Crypto,
    Custom,
    Cash,
    #[serde(rename = "option")]
    StockOption,
}

impl AssetType {
    pub const ALL: [AssetType; 6] = [
        AssetType::Stock,
        AssetType::Etf,
        AssetType::Crypto,
        AssetType::Custom,
        AssetType::Cash,
        AssetType::StockOption,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            AssetType::Stock => "stock",
            AssetType::Etf => "etf",
            AssetType::Crypto => "crypto",
            AssetType::Custom => "custom",
            AssetType::Cash => "cash",
            AssetType::StockOption => "option",
        }
    }

    /// Lenient read-side parse: anything unrecognized buckets into `Stock`
    /// so a holding always lands in exactly one group.
    pub fn from_tag(tag: &str) -> AssetType {
        tag.parse().unwrap_or_default()
    }

    /// Cash and misc holdings carry their amount in the cost basis and are
    /// never priced externally.
    pub fn is_self_priced(&self) -> bool {
        matches!(self, AssetType::Custom | AssetType::Cash)
    }
}

impl fmt::Display for AssetType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown asset type '{0}'")]
pub struct UnknownAssetType(pub String);

impl FromStr for AssetType {
    type Err = UnknownAssetType;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "stock" => Ok(AssetType::Stock),
            "etf" => Ok(AssetType::Etf),
            "crypto" => Ok(AssetType::Crypto),
            "custom" | "misc" => Ok(AssetType::Custom),
            "cash" => Ok(AssetType::Cash),
            "option" => Ok(AssetType::StockOption),
            other => Err(UnknownAssetType(other.to_string())),
        }
    }
}

impl<'de> Deserialize<'de> for AssetType {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let tag = String::deserialize(deserializer)?;
        Ok(AssetType::from_tag(&tag))
    }
}

fn lenient_asset_type<'de, D: Deserializer<'de>>(deserializer: D) -> Result<AssetType, D::Error> {
    let tag = Option::<String>::deserialize(deserializer)?;
    Ok(tag.as_deref().map(AssetType::from_tag).unwrap_or_default())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OptionKind {
    Call,
    Put,
}

impl OptionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            OptionKind::Call => "call",
            OptionKind::Put => "put",
        }
    }
}

impl FromStr for OptionKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "call" => Ok(OptionKind::Call),
            "put" => Ok(OptionKind::Put),
            other => Err(format!("unknown option type '{}'", other)),
        }
    }
}

// A single portfolio position
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Holding {
    #[serde(default)]
    pub id: String,
    pub ticker: String,
    #[serde(default)]
    pub quantity: f64,
    #[serde(default)]
    pub cost_basis: f64,
    #[serde(default)]
    pub account_name: String,
    #[serde(default, deserialize_with = "lenient_asset_type")]
    pub asset_type: AssetType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub underlying_ticker: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub strike_price: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expiration_date: Option<NaiveDate>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub option_type: Option<OptionKind>,
    #[serde(default)]
    pub added_at: Option<String>, // RFC3339
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<String>,
}

impl Holding {
    pub fn total_cost(&self) -> f64 {
        self.quantity * self.cost_basis
    }

    pub fn option_contract(&self) -> Option<OptionContract> {
        if self.asset_type != AssetType::StockOption {
            return None;
        }
        Some(OptionContract {
            underlying: self.underlying_ticker.clone()?,
            expiration: self.expiration_date?,
            strike: self.strike_price?,
            kind: self.option_type.unwrap_or(OptionKind::Call),
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct OptionContract {
    pub underlying: String,
    pub expiration: NaiveDate,
    pub strike: f64,
    pub kind: OptionKind,
}

// holdings table row
#[derive(Debug, Clone, FromRow)]
pub struct HoldingRow {
    pub id: String,
    pub ticker: String,
    pub quantity: f64,
    pub cost_basis: f64,
    pub account_name: String,
    pub asset_type: String,
    pub underlying_ticker: Option<String>,
    pub strike_price: Option<f64>,
    pub expiration_date: Option<String>,
    pub option_type: Option<String>,
    pub added_at: String,
    pub updated_at: Option<String>,
}

impl From<HoldingRow> for Holding {
    fn from(row: HoldingRow) -> Self {
        Holding {
            id: row.id,
            ticker: row.ticker,
            quantity: row.quantity,
            cost_basis: row.cost_basis,
            account_name: row.account_name,
            asset_type: AssetType::from_tag(&row.asset_type),
            underlying_ticker: row.underlying_ticker,
            strike_price: row.strike_price,
            expiration_date: row
                .expiration_date
                .as_deref()
                .and_then(|d| NaiveDate::parse_from_str(d, "%Y-%m-%d").ok()),
            option_type: row.option_type.as_deref().and_then(|t| t.parse().ok()),
            added_at: Some(row.added_at),
            updated_at: row.updated_at,
        }
    }
}

/// Request body for adding a holding. `asset_type` is validated strictly.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct NewHolding {
    pub ticker: String,
    pub quantity: f64,
    pub cost_basis: f64,
    pub account_name: String,
    pub asset_type: Option<String>,
    pub underlying_ticker: Option<String>,
    pub strike_price: Option<f64>,
    pub expiration_date: Option<String>,
    pub option_type: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HoldingPatch {
    pub quantity: Option<f64>,
    pub cost_basis: Option<f64>,
    pub account_name: Option<String>,
}

/// Holding plus live valuation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EnrichedHolding {
    #[serde(flatten)]
    pub holding: Holding,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub image: Option<String>,
    #[serde(default)]
    pub industry: Option<String>,
    #[serde(default)]
    pub current_price: Option<f64>,
    #[serde(default)]
    pub current_value: f64,
    #[serde(default)]
    pub total_cost: f64,
    #[serde(default)]
    pub gain_loss: f64,
    #[serde(default)]
    pub gain_loss_percent: Option<f64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AssetTypeTotals {
    pub count: u32,
    pub value: f64,
    pub cost: f64,
    pub gain_loss: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PortfolioSummary {
    pub total_value: f64,
    pub total_cost: f64,
    pub total_gain_loss: f64,
    pub total_gain_loss_percent: Option<f64>,
    pub by_asset_type: BTreeMap<AssetType, AssetTypeTotals>,
}

impl PortfolioSummary {
    pub fn zeroed() -> Self {
        PortfolioSummary {
            total_value: 0.0,
            total_cost: 0.0,
            total_gain_loss: 0.0,
            total_gain_loss_percent: None,
            by_asset_type: AssetType::ALL
                .iter()
                .map(|t| (*t, AssetTypeTotals::default()))
                .collect(),
        }
    }

    pub fn asset_type(&self, asset_type: AssetType) -> AssetTypeTotals {
        self.by_asset_type
            .get(&asset_type)
            .copied()
            .unwrap_or_default()
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PortfolioView {
    pub holdings: Vec<EnrichedHolding>,
    pub summary: PortfolioSummary,
    pub count: usize,
}

/// Immutable daily record of portfolio value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Snapshot {
    pub date: NaiveDate,
    pub total_value: f64,
    pub total_cost: f64,
    pub total_gain_loss: f64,
    pub total_gain_loss_percent: Option<f64>,
    pub by_asset_type: BTreeMap<AssetType, AssetTypeTotals>,
    pub taken_at: DateTime<Utc>,
}

impl Snapshot {
    pub fn from_summary(date: NaiveDate, summary: &PortfolioSummary, taken_at: DateTime<Utc>) -> Self {
        Snapshot {
            date,
            total_value: summary.total_value,
            total_cost: summary.total_cost,
            total_gain_loss: summary.total_gain_loss,
            total_gain_loss_percent: summary.total_gain_loss_percent,
            by_asset_type: AssetType::ALL
                .iter()
                .map(|t| (*t, summary.asset_type(*t)))
                .collect(),
            taken_at,
        }
    }

    pub fn asset_type_value(&self, asset_type: AssetType) -> f64 {
        self.by_asset_type
            .get(&asset_type)
            .map(|t| t.value)
            .unwrap_or(0.0)
    }
}

// snapshots table row
#[derive(Debug, Clone, FromRow)]
pub struct SnapshotRow {
    pub date: String,
    pub total_value: f64,
    pub total_cost: f64,
    pub total_gain_loss: f64,
    pub total_gain_loss_percent: Option<f64>,
    pub taken_at: String,
}

// snapshot_asset_types table row
#[derive(Debug, Clone, FromRow)]
pub struct SnapshotAssetTypeRow {
    pub date: String,
    pub asset_type: String,
    pub count: i64,
    pub value: f64,
    pub cost: f64,
    pub gain_loss: f64,
}

/// Comparison windows for performance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Period {
    #[serde(rename = "1W")]
    OneWeek,
    #[serde(rename = "1M")]
    OneMonth,
    #[serde(rename = "3M")]
    ThreeMonths,
    #[serde(rename = "YTD")]
    YearToDate,
}

impl Period {
    pub const ALL: [Period; 4] = [
        Period::OneWeek,
        Period::OneMonth,
        Period::ThreeMonths,
        Period::YearToDate,
    ];
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AssetTypeDelta {
    pub previous_value: f64,
    pub current_value: f64,
    pub change: f64,
    pub change_percent: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PerformanceDelta {
    pub period: Period,
    pub from_date: NaiveDate,
    pub to_date: NaiveDate,
    pub previous_value: f64,
    pub current_value: f64,
    pub change: f64,
    pub change_percent: Option<f64>,
    pub by_asset_type: BTreeMap<AssetType, AssetTypeDelta>,
}

/// `NoData` is distinct from a zero change: nothing was recorded at or
/// before the period boundary.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "camelCase")]
pub enum PeriodPerformance {
    NoData { period: Period },
    Available(PerformanceDelta),
}

impl PeriodPerformance {
    pub fn delta(&self) -> Option<&PerformanceDelta> {
        match self {
            PeriodPerformance::Available(d) => Some(d),
            PeriodPerformance::NoData { .. } => None,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PerformanceReport {
    pub periods: BTreeMap<Period, PeriodPerformance>,
    pub history: Vec<Snapshot>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AllocationSlice {
    pub name: String,
    pub value: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PinStatus {
    pub verified: bool,
    pub pin_set: bool,
}
