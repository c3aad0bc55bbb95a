use csv::{ReaderBuilder, WriterBuilder};
use serde::Deserialize;
use std::io::Read;

use crate::domain::models::{AssetType, NewHolding, Snapshot};

#[derive(Debug, Deserialize)]
struct HoldingCsv {
    ticker: String,
    quantity: f64,
    cost_basis: f64,
    #[serde(default)]
    account_name: Option<String>,
    #[serde(default)]
    asset_type: Option<String>,
    #[serde(default)]
    underlying_ticker: Option<String>,
    #[serde(default)]
    strike_price: Option<f64>,
    #[serde(default)]
    expiration_date: Option<String>,
    #[serde(default)]
    option_type: Option<String>,
}

/// Reads holdings in the import layout
/// (`ticker,quantity,cost_basis,account_name,asset_type,...`).
pub fn read_holdings_csv<R: Read>(reader: R) -> Result<Vec<NewHolding>, csv::Error> {
    let mut rdr = ReaderBuilder::new()
        .trim(csv::Trim::All)
        .flexible(true)
        .has_headers(true)
        .from_reader(reader);
    let mut out = Vec::new();
    for result in rdr.deserialize::<HoldingCsv>() {
        let row = result?;
        out.push(NewHolding {
            ticker: row.ticker,
            quantity: row.quantity,
            cost_basis: row.cost_basis,
            account_name: row.account_name.unwrap_or_default(),
            asset_type: row.asset_type.filter(|s| !s.is_empty()),
            underlying_ticker: row.underlying_ticker.filter(|s| !s.is_empty()),
            strike_price: row.strike_price,
            expiration_date: row.expiration_date.filter(|s| !s.is_empty()),
            option_type: row.option_type.filter(|s| !s.is_empty()),
        });
    }
    Ok(out)
}

pub fn write_snapshots_csv(snapshots: &[Snapshot]) -> Result<String, csv::Error> {
    let mut wtr = WriterBuilder::new().has_headers(false).from_writer(Vec::new());

    let mut header = vec![
        "date".to_string(),
        "total_value".to_string(),
        "total_cost".to_string(),
        "total_gain_loss".to_string(),
    ];
    header.extend(AssetType::ALL.iter().map(|t| format!("{}_value", t)));
    wtr.write_record(&header)?;

    for s in snapshots {
        let mut record = vec![
            s.date.format("%Y-%m-%d").to_string(),
            s.total_value.to_string(),
            s.total_cost.to_string(),
            s.total_gain_loss.to_string(),
        ];
        record.extend(AssetType::ALL.iter().map(|t| s.asset_type_value(*t).to_string()));
        wtr.write_record(&record)?;
    }
    wtr.flush()?;
    let bytes = wtr.into_inner().map_err(|e| e.into_error())?;
    Ok(String::from_utf8_lossy(&bytes).into_owned())
}
