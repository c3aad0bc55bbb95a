//! Pure portfolio aggregation: summaries, ordering, filtering, allocation
//! slices and period performance. Nothing here performs I/O or fails; bad
//! inputs produce zeroed or sentinel results.

use crate::domain::models::{
    AllocationSlice, AssetType, AssetTypeDelta, AssetTypeTotals, EnrichedHolding,
    PerformanceDelta, PerformanceReport, Period, PeriodPerformance, PortfolioSummary, Snapshot,
};
use chrono::{Datelike, Duration, NaiveDate};
use serde::Deserialize;
use std::cmp::Ordering;
use std::collections::{BTreeMap, HashMap};

/// `numerator / denominator * 100`, or None when the ratio is undefined.
pub fn percent_of(numerator: f64, denominator: f64) -> Option<f64> {
    if denominator == 0.0 || !denominator.is_finite() || !numerator.is_finite() {
        return None;
    }
    Some(numerator / denominator * 100.0)
}

pub fn summarize(holdings: &[EnrichedHolding]) -> PortfolioSummary {
    let mut summary = PortfolioSummary::zeroed();

    for h in holdings {
        let group = summary
            .by_asset_type
            .entry(h.holding.asset_type)
            .or_insert_with(AssetTypeTotals::default);
        group.count += 1;
        group.value += h.current_value;
        group.cost += h.total_cost;
        group.gain_loss += h.gain_loss;
    }

    for totals in summary.by_asset_type.values() {
        summary.total_value += totals.value;
        summary.total_cost += totals.cost;
        summary.total_gain_loss += totals.gain_loss;
    }
    summary.total_gain_loss_percent = percent_of(summary.total_gain_loss, summary.total_cost);
    summary
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum SortKey {
    Ticker,
    Name,
    AccountName,
    AssetType,
    Industry,
    Quantity,
    CostBasis,
    CurrentPrice,
    CurrentValue,
    TotalCost,
    GainLoss,
    GainLossPercent,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortDirection {
    #[default]
    Asc,
    Desc,
}

enum SortValue<'a> {
    Text(Option<&'a str>),
    Number(Option<f64>),
}

fn sort_value(h: &EnrichedHolding, key: SortKey) -> SortValue<'_> {
    let hold = &h.holding;
    match key {
        SortKey::Ticker => SortValue::Text(Some(hold.ticker.as_str())),
        SortKey::Name => SortValue::Text(h.name.as_deref()),
        SortKey::AccountName => SortValue::Text(Some(hold.account_name.as_str())),
        SortKey::AssetType => SortValue::Text(Some(hold.asset_type.as_str())),
        SortKey::Industry => SortValue::Text(h.industry.as_deref()),
        SortKey::Quantity => SortValue::Number(Some(hold.quantity)),
        SortKey::CostBasis => SortValue::Number(Some(hold.cost_basis)),
        SortKey::CurrentPrice => SortValue::Number(h.current_price),
        SortKey::CurrentValue => SortValue::Number(Some(h.current_value)),
        SortKey::TotalCost => SortValue::Number(Some(h.total_cost)),
        SortKey::GainLoss => SortValue::Number(Some(h.gain_loss)),
        SortKey::GainLossPercent => SortValue::Number(h.gain_loss_percent),
    }
}

// Case-folded first so "aapl" and "AAPL" sit together, raw text breaks ties
fn compare_text(a: &str, b: &str) -> Ordering {
    a.to_lowercase()
        .cmp(&b.to_lowercase())
        .then_with(|| a.cmp(b))
}

fn compare_present(a: &SortValue<'_>, b: &SortValue<'_>) -> Option<Option<Ordering>> {
    match (a, b) {
        (SortValue::Text(Some(x)), SortValue::Text(Some(y))) => Some(Some(compare_text(x, y))),
        (SortValue::Number(Some(x)), SortValue::Number(Some(y)))
            if !x.is_nan() && !y.is_nan() =>
        {
            Some(x.partial_cmp(y))
        }
        _ => None,
    }
}

fn is_missing(v: &SortValue<'_>) -> bool {
    match v {
        SortValue::Text(t) => t.is_none(),
        SortValue::Number(n) => n.is_none_or(|x| x.is_nan()),
    }
}

/// Stable sort by a named field. Missing values go last in either direction.
pub fn sort_holdings(
    holdings: &[EnrichedHolding],
    key: SortKey,
    direction: SortDirection,
) -> Vec<EnrichedHolding> {
    let mut out = holdings.to_vec();
    out.sort_by(|a, b| {
        let (va, vb) = (sort_value(a, key), sort_value(b, key));
        match (is_missing(&va), is_missing(&vb)) {
            (true, true) => Ordering::Equal,
            (true, false) => Ordering::Greater,
            (false, true) => Ordering::Less,
            (false, false) => {
                let ord = compare_present(&va, &vb)
                    .flatten()
                    .unwrap_or(Ordering::Equal);
                match direction {
                    SortDirection::Asc => ord,
                    SortDirection::Desc => ord.reverse(),
                }
            }
        }
    });
    out
}

/// Column-header sort state: clicking the same column cycles
/// asc -> desc -> unsorted, clicking a new column starts at asc.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SortState {
    pub active: Option<(SortKey, SortDirection)>,
}

impl SortState {
    pub fn toggle(self, key: SortKey) -> SortState {
        let active = match self.active {
            Some((k, SortDirection::Asc)) if k == key => Some((key, SortDirection::Desc)),
            Some((k, SortDirection::Desc)) if k == key => None,
            _ => Some((key, SortDirection::Asc)),
        };
        SortState { active }
    }

    pub fn apply(&self, holdings: &[EnrichedHolding]) -> Vec<EnrichedHolding> {
        match self.active {
            Some((key, dir)) => sort_holdings(holdings, key, dir),
            None => holdings.to_vec(),
        }
    }
}

pub fn filter_holdings<F>(holdings: &[EnrichedHolding], predicate: F) -> Vec<EnrichedHolding>
where
    F: Fn(&EnrichedHolding) -> bool,
{
    holdings.iter().filter(|h| predicate(h)).cloned().collect()
}

/// Drill-down filter; every populated field must match (case-insensitive).
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HoldingFilter {
    pub account: Option<String>,
    pub ticker: Option<String>,
    pub industry: Option<String>,
    pub asset_type: Option<AssetType>,
}

impl HoldingFilter {
    pub fn is_empty(&self) -> bool {
        self.account.is_none()
            && self.ticker.is_none()
            && self.industry.is_none()
            && self.asset_type.is_none()
    }

    pub fn matches(&self, h: &EnrichedHolding) -> bool {
        fn eq(want: &Option<String>, have: Option<&str>) -> bool {
            match want {
                None => true,
                Some(w) => have.is_some_and(|h| h.eq_ignore_ascii_case(w.trim())),
            }
        }
        eq(&self.account, Some(h.holding.account_name.as_str()))
            && eq(&self.ticker, Some(h.holding.ticker.as_str()))
            && eq(&self.industry, h.industry.as_deref())
            && self.asset_type.is_none_or(|t| t == h.holding.asset_type)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum AllocationGrouping {
    Ticker,
    Account,
}

impl AllocationGrouping {
    pub fn for_asset_type(asset_type: AssetType) -> AllocationGrouping {
        if asset_type.is_self_priced() {
            AllocationGrouping::Account
        } else {
            AllocationGrouping::Ticker
        }
    }
}

/// Pie-chart slices: value summed per group, non-positive groups dropped,
/// largest first.
pub fn build_allocation_breakdown(
    holdings: &[EnrichedHolding],
    grouping: AllocationGrouping,
) -> Vec<AllocationSlice> {
    let mut values: HashMap<&str, f64> = HashMap::new();
    for h in holdings {
        let name = match grouping {
            AllocationGrouping::Ticker => h.holding.ticker.as_str(),
            AllocationGrouping::Account => h.holding.account_name.as_str(),
        };
        *values.entry(name).or_insert(0.0) += h.current_value;
    }

    let mut slices: Vec<AllocationSlice> = values
        .into_iter()
        .filter(|(_, v)| *v > 0.0)
        .map(|(name, value)| AllocationSlice {
            name: name.to_string(),
            value,
        })
        .collect();
    slices.sort_by(|a, b| {
        b.value
            .partial_cmp(&a.value)
            .unwrap_or(Ordering::Equal)
            .then_with(|| a.name.cmp(&b.name))
    });
    slices
}

pub fn allocation_for_asset_type(
    holdings: &[EnrichedHolding],
    asset_type: AssetType,
) -> Vec<AllocationSlice> {
    let subset = filter_holdings(holdings, |h| h.holding.asset_type == asset_type);
    build_allocation_breakdown(&subset, AllocationGrouping::for_asset_type(asset_type))
}

pub fn period_start(period: Period, today: NaiveDate) -> NaiveDate {
    match period {
        Period::OneWeek => today - Duration::days(7),
        Period::OneMonth => today - Duration::days(30),
        Period::ThreeMonths => today - Duration::days(90),
        Period::YearToDate => NaiveDate::from_ymd_opt(today.year(), 1, 1).unwrap_or(today),
    }
}

/// Latest snapshot dated on or before `boundary`. Gaps in the history are
/// fine; the input does not have to be sorted.
pub fn nearest_snapshot_at_or_before(snapshots: &[Snapshot], boundary: NaiveDate) -> Option<&Snapshot> {
    snapshots
        .iter()
        .filter(|s| s.date <= boundary)
        .max_by_key(|s| s.date)
}

pub fn compute_period_performance(
    snapshots: &[Snapshot],
    period: Period,
    current: &PortfolioSummary,
    today: NaiveDate,
) -> PeriodPerformance {
    let boundary = period_start(period, today);
    let Some(base) = nearest_snapshot_at_or_before(snapshots, boundary) else {
        return PeriodPerformance::NoData { period };
    };

    let change = current.total_value - base.total_value;
    let by_asset_type: BTreeMap<AssetType, AssetTypeDelta> = AssetType::ALL
        .iter()
        .map(|t| {
            let previous_value = base.asset_type_value(*t);
            let current_value = current.asset_type(*t).value;
            let change = current_value - previous_value;
            (
                *t,
                AssetTypeDelta {
                    previous_value,
                    current_value,
                    change,
                    change_percent: percent_of(change, previous_value),
                },
            )
        })
        .collect();

    PeriodPerformance::Available(PerformanceDelta {
        period,
        from_date: base.date,
        to_date: today,
        previous_value: base.total_value,
        current_value: current.total_value,
        change,
        change_percent: percent_of(change, base.total_value),
        by_asset_type,
    })
}

/// Every period against `current`, plus the chart history from
/// `history_since` onward. Lookups use the full snapshot list so a YTD
/// boundary older than the chart window still resolves.
pub fn performance_report(
    snapshots: &[Snapshot],
    current: &PortfolioSummary,
    today: NaiveDate,
    history_since: NaiveDate,
) -> PerformanceReport {
    let periods = Period::ALL
        .iter()
        .map(|p| (*p, compute_period_performance(snapshots, *p, current, today)))
        .collect();
    let mut history: Vec<Snapshot> = snapshots
        .iter()
        .filter(|s| s.date >= history_since)
        .cloned()
        .collect();
    history.sort_by_key(|s| s.date);
    PerformanceReport { periods, history }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::models::Holding;
    use crate::usecases::valuation::enrich;
    use chrono::Utc;

    fn holding(ticker: &str, qty: f64, cost: f64, asset_type: AssetType, account: &str) -> Holding {
        Holding {
            id: format!("h_{}", ticker),
            ticker: ticker.to_string(),
            quantity: qty,
            cost_basis: cost,
            account_name: account.to_string(),
            asset_type,
            underlying_ticker: None,
            strike_price: None,
            expiration_date: None,
            option_type: None,
            added_at: None,
            updated_at: None,
        }
    }

    fn priced(ticker: &str, qty: f64, cost: f64, price: Option<f64>) -> EnrichedHolding {
        enrich(holding(ticker, qty, cost, AssetType::Stock, "Brokerage"), price)
    }

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn snapshot(on: NaiveDate, total: f64) -> Snapshot {
        let mut summary = PortfolioSummary::zeroed();
        summary.total_value = total;
        summary.by_asset_type.get_mut(&AssetType::Stock).unwrap().value = total;
        Snapshot::from_summary(on, &summary, Utc::now())
    }

    #[test]
    fn summarize_end_to_end_example() {
        let holdings = vec![
            enrich(holding("AAPL", 10.0, 150.0, AssetType::Stock, "Brokerage"), Some(200.0)),
            enrich(holding("CASH", 1.0, 5000.0, AssetType::Cash, "Bank"), None),
        ];
        let s = summarize(&holdings);
        assert_eq!(s.total_value, 7000.0);
        assert_eq!(s.total_cost, 6500.0);
        assert_eq!(s.total_gain_loss, 500.0);

        let stock = s.asset_type(AssetType::Stock);
        assert_eq!((stock.value, stock.cost, stock.gain_loss), (2000.0, 1500.0, 500.0));
        let cash = s.asset_type(AssetType::Cash);
        assert_eq!((cash.value, cash.cost, cash.gain_loss), (5000.0, 5000.0, 0.0));
    }

    #[test]
    fn summarize_empty_is_zeroed() {
        let s = summarize(&[]);
        assert_eq!(s.total_value, 0.0);
        assert_eq!(s.total_cost, 0.0);
        assert_eq!(s.total_gain_loss, 0.0);
        assert_eq!(s.total_gain_loss_percent, None);
        assert_eq!(s.by_asset_type.len(), 6);
        assert!(s.by_asset_type.values().all(|t| t.count == 0 && t.value == 0.0));
    }

    #[test]
    fn group_values_sum_to_total() {
        let holdings = vec![
            priced("AAPL", 3.3, 120.1, Some(190.7)),
            enrich(holding("VOO", 1.7, 400.0, AssetType::Etf, "IRA"), Some(480.3)),
            enrich(holding("BTC", 0.013, 40000.0, AssetType::Crypto, "Ledger"), Some(61234.5)),
            enrich(holding("House", 1.0, 250000.0, AssetType::Custom, "Home"), None),
            enrich(holding("Bank", 1.0, 1234.56, AssetType::Cash, "Bank"), None),
        ];
        let s = summarize(&holdings);
        let sum: f64 = s.by_asset_type.values().map(|t| t.value).sum();
        assert!(((sum - s.total_value) / s.total_value).abs() < 1e-6);
        assert_eq!(s.by_asset_type.values().map(|t| t.count).sum::<u32>(), 5);
    }

    #[test]
    fn zero_cost_gives_no_percent() {
        let s = summarize(&[priced("FREE", 10.0, 0.0, Some(5.0))]);
        assert_eq!(s.total_value, 50.0);
        assert_eq!(s.total_gain_loss_percent, None);
    }

    #[test]
    fn sort_desc_reverses_asc_and_keeps_missing_last() {
        let holdings = vec![
            priced("B", 1.0, 1.0, Some(20.0)),
            priced("A", 1.0, 1.0, Some(10.0)),
            priced("C", 1.0, 1.0, Some(30.0)),
        ];
        let asc: Vec<_> = sort_holdings(&holdings, SortKey::CurrentPrice, SortDirection::Asc)
            .into_iter()
            .map(|h| h.holding.ticker)
            .collect();
        let mut desc: Vec<_> = sort_holdings(&holdings, SortKey::CurrentPrice, SortDirection::Desc)
            .into_iter()
            .map(|h| h.holding.ticker)
            .collect();
        assert_eq!(asc, vec!["A", "B", "C"]);
        desc.reverse();
        assert_eq!(asc, desc);

        let mut with_missing = holdings.clone();
        with_missing.insert(0, priced("N", 1.0, 1.0, None));
        for dir in [SortDirection::Asc, SortDirection::Desc] {
            let sorted = sort_holdings(&with_missing, SortKey::CurrentPrice, dir);
            assert_eq!(sorted.last().unwrap().holding.ticker, "N");
        }
    }

    #[test]
    fn text_sort_ignores_case() {
        let holdings = vec![
            enrich(holding("X", 1.0, 1.0, AssetType::Stock, "zeta"), None),
            enrich(holding("Y", 1.0, 1.0, AssetType::Stock, "Alpha"), None),
            enrich(holding("Z", 1.0, 1.0, AssetType::Stock, "beta"), None),
        ];
        let names: Vec<_> = sort_holdings(&holdings, SortKey::AccountName, SortDirection::Asc)
            .into_iter()
            .map(|h| h.holding.account_name)
            .collect();
        assert_eq!(names, vec!["Alpha", "beta", "zeta"]);
    }

    #[test]
    fn sort_state_cycles_asc_desc_unsorted() {
        let s = SortState::default().toggle(SortKey::Ticker);
        assert_eq!(s.active, Some((SortKey::Ticker, SortDirection::Asc)));
        let s = s.toggle(SortKey::Ticker);
        assert_eq!(s.active, Some((SortKey::Ticker, SortDirection::Desc)));
        let s = s.toggle(SortKey::Ticker);
        assert_eq!(s.active, None);
        let s = s.toggle(SortKey::GainLoss).toggle(SortKey::Ticker);
        assert_eq!(s.active, Some((SortKey::Ticker, SortDirection::Asc)));
    }

    #[test]
    fn filter_by_account_and_industry() {
        let mut a = priced("AAPL", 1.0, 1.0, Some(1.0));
        a.industry = Some("Consumer Electronics".to_string());
        let b = enrich(holding("MSFT", 1.0, 1.0, AssetType::Stock, "IRA"), Some(1.0));
        let holdings = vec![a, b];

        let f = HoldingFilter {
            account: Some("brokerage".to_string()),
            ..Default::default()
        };
        let out = filter_holdings(&holdings, |h| f.matches(h));
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].holding.ticker, "AAPL");

        let f = HoldingFilter {
            industry: Some("Software".to_string()),
            ..Default::default()
        };
        assert!(filter_holdings(&holdings, |h| f.matches(h)).is_empty());
        assert_eq!(filter_holdings(&holdings, |h| HoldingFilter::default().matches(h)).len(), 2);
    }

    #[test]
    fn allocation_collapses_lots_by_ticker() {
        let holdings = vec![
            priced("AAPL", 10.0, 100.0, Some(200.0)),
            priced("AAPL", 5.0, 100.0, Some(200.0)),
            priced("MSFT", 1.0, 100.0, Some(500.0)),
            priced("DEAD", 1.0, 100.0, Some(0.0)),
        ];
        let slices = build_allocation_breakdown(&holdings, AllocationGrouping::Ticker);
        assert_eq!(
            slices,
            vec![
                AllocationSlice { name: "AAPL".to_string(), value: 3000.0 },
                AllocationSlice { name: "MSFT".to_string(), value: 500.0 },
            ]
        );
    }

    #[test]
    fn cash_allocation_groups_by_account() {
        let holdings = vec![
            enrich(holding("CASH", 1.0, 100.0, AssetType::Cash, "Bank"), None),
            enrich(holding("CASH", 1.0, 300.0, AssetType::Cash, "Broker"), None),
            enrich(holding("CASH", 1.0, 50.0, AssetType::Cash, "Bank"), None),
            priced("AAPL", 1.0, 1.0, Some(1000.0)),
        ];
        let slices = allocation_for_asset_type(&holdings, AssetType::Cash);
        assert_eq!(slices.len(), 2);
        assert_eq!(slices[0].name, "Broker");
        assert_eq!(slices[1], AllocationSlice { name: "Bank".to_string(), value: 150.0 });
    }

    #[test]
    fn period_picks_nearest_snapshot_at_or_before_boundary() {
        let snaps = vec![snapshot(date(2025, 1, 1), 1000.0), snapshot(date(2025, 1, 10), 1100.0)];
        let chosen = nearest_snapshot_at_or_before(&snaps, date(2025, 1, 5)).unwrap();
        assert_eq!(chosen.date, date(2025, 1, 1));

        // 1W before Jan 12 is Jan 5
        let mut current = PortfolioSummary::zeroed();
        current.total_value = 1200.0;
        current.by_asset_type.get_mut(&AssetType::Stock).unwrap().value = 1200.0;
        let perf = compute_period_performance(&snaps, Period::OneWeek, &current, date(2025, 1, 12));
        let delta = perf.delta().unwrap();
        assert_eq!(delta.from_date, date(2025, 1, 1));
        assert_eq!(delta.change, 200.0);
        assert_eq!(delta.change_percent, Some(20.0));
        assert_eq!(delta.by_asset_type[&AssetType::Stock].change, 200.0);
        assert_eq!(delta.by_asset_type[&AssetType::Cash].change_percent, None);
    }

    #[test]
    fn period_without_coverage_reports_no_data() {
        let snaps = vec![snapshot(date(2025, 3, 1), 1000.0)];
        let current = PortfolioSummary::zeroed();
        let perf = compute_period_performance(&snaps, Period::ThreeMonths, &current, date(2025, 3, 2));
        assert_eq!(perf, PeriodPerformance::NoData { period: Period::ThreeMonths });
        let perf = compute_period_performance(&[], Period::OneWeek, &current, date(2025, 3, 2));
        assert!(perf.delta().is_none());
    }

    #[test]
    fn ytd_boundary_is_january_first() {
        assert_eq!(period_start(Period::YearToDate, date(2025, 6, 15)), date(2025, 1, 1));
        assert_eq!(period_start(Period::OneMonth, date(2025, 3, 31)), date(2025, 3, 1));
        let snaps = vec![snapshot(date(2024, 12, 31), 0.0)];
        let mut current = PortfolioSummary::zeroed();
        current.total_value = 10.0;
        let perf = compute_period_performance(&snaps, Period::YearToDate, &current, date(2025, 6, 15));
        let delta = perf.delta().unwrap();
        assert_eq!(delta.change, 10.0);
        assert_eq!(delta.change_percent, None);
    }

    #[test]
    fn report_covers_every_period() {
        let snaps = vec![snapshot(date(2024, 6, 1), 50.0), snapshot(date(2025, 1, 1), 100.0)];
        let report = performance_report(
            &snaps,
            &PortfolioSummary::zeroed(),
            date(2025, 1, 20),
            date(2024, 12, 1),
        );
        assert_eq!(report.periods.len(), 4);
        assert_eq!(report.periods[&Period::OneWeek].delta().unwrap().from_date, date(2025, 1, 1));
        assert_eq!(report.periods[&Period::ThreeMonths].delta().unwrap().from_date, date(2024, 6, 1));
        assert_eq!(report.history.len(), 1);
    }
}
