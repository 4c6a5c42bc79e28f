use std::path::Path;

use serde::Serialize;

use crate::analytics::queries::StoreStats;
use crate::errors::EtlError;

/// Write query rows to a CSV file, one column per struct field.
///
/// An empty result still gets a file, but without a header row since the
/// writer derives headers from the first record.
pub fn write_rows_csv<T: Serialize>(rows: &[T], path: &Path) -> Result<usize, EtlError> {
    let mut wtr = csv::Writer::from_path(path)
        .map_err(|e| EtlError::FileWrite(format!("Cannot create CSV: {}", e)))?;

    for row in rows {
        wtr.serialize(row)
            .map_err(|e| EtlError::FileWrite(e.to_string()))?;
    }

    wtr.flush().map_err(|e| EtlError::FileWrite(e.to_string()))?;
    Ok(rows.len())
}

/// Write store statistics as a key-value CSV report.
pub fn write_stats_csv(stats: &StoreStats, path: &Path) -> Result<(), EtlError> {
    let mut wtr = csv::Writer::from_path(path)
        .map_err(|e| EtlError::FileWrite(format!("Cannot create CSV: {}", e)))?;

    wtr.write_record(["Metric", "Value"])
        .map_err(|e| EtlError::FileWrite(e.to_string()))?;

    let date_or_blank =
        |d: Option<chrono::NaiveDate>| d.map(|d| d.to_string()).unwrap_or_default();

    let rows: Vec<(&str, String)> = vec![
        // Tables
        ("Total Trades", stats.total_trades.to_string()),
        ("Total Instruments", stats.total_instruments.to_string()),
        ("Total Expiries", stats.total_expiries.to_string()),
        ("Total Exchanges", stats.total_exchanges.to_string()),
        // Coverage
        ("First Trade Date", date_or_blank(stats.first_trade_date)),
        ("Last Trade Date", date_or_blank(stats.last_trade_date)),
        // Activity
        ("Total Contracts", stats.total_contracts.to_string()),
        ("Total Value (Lakh)", format!("{:.2}", stats.total_value_lakh)),
    ];

    for (name, value) in &rows {
        wtr.write_record([*name, value.as_str()])
            .map_err(|e| EtlError::FileWrite(e.to_string()))?;
    }

    wtr.flush().map_err(|e| EtlError::FileWrite(e.to_string()))?;
    Ok(())
}
