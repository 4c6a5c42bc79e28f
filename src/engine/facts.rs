use rusqlite::Connection;
use tracing::{debug, info};

use crate::data::storage;
use crate::errors::EtlError;
use crate::models::record::RawRecord;
use crate::models::trade::NewTrade;

use super::dimensions::DimensionKeys;

/// What happened to one record on its way to the fact table.
#[derive(Debug, Clone, PartialEq)]
pub enum FactBinding {
    Bound(NewTrade),
    /// No instrument or no expiry matched (the identity or expiry date was
    /// null upstream)
    Unmatched,
    /// TIMESTAMP did not parse, so there is no trade date
    NoTradeDate,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FactCounts {
    pub inserted: usize,
    pub skipped_unmatched: usize,
    pub skipped_no_trade_date: usize,
}

/// Resolve a record's dimension keys and build its fact row.
///
/// Null measures become 0 ("no activity"). Sums over the loaded trades are
/// therefore unaffected, but averages are pulled toward zero compared with
/// ignoring the missing values; reports built on `AVG()` inherit that bias.
pub fn bind_record(record: &RawRecord, keys: &DimensionKeys) -> FactBinding {
    let Some(instrument_id) = keys.instrument_id(&record.instrument_key()) else {
        return FactBinding::Unmatched;
    };
    let Some(expiry_id) = record
        .contract_spec()
        .and_then(|spec| keys.expiry_id(instrument_id, &spec))
    else {
        return FactBinding::Unmatched;
    };
    let Some(timestamp) = record.timestamp else {
        return FactBinding::NoTradeDate;
    };

    FactBinding::Bound(NewTrade {
        expiry_id,
        instrument_id,
        trade_date: timestamp.date(),
        open: record.open.unwrap_or(0.0),
        high: record.high.unwrap_or(0.0),
        low: record.low.unwrap_or(0.0),
        close: record.close.unwrap_or(0.0),
        settle_price: record.settle_price.unwrap_or(0.0),
        contracts: record.contracts.unwrap_or(0),
        value_in_lakh: record.value_in_lakh.unwrap_or(0.0),
        open_interest: record.open_interest.unwrap_or(0),
        change_in_oi: record.change_in_oi.unwrap_or(0),
        timestamp,
    })
}

/// Append one trade per bindable record. Duplicate source rows each get
/// their own trade; nothing is deduplicated or updated.
pub fn load_facts(
    conn: &Connection,
    records: &[RawRecord],
    keys: &DimensionKeys,
) -> Result<FactCounts, EtlError> {
    let mut counts = FactCounts::default();

    for record in records {
        match bind_record(record, keys) {
            FactBinding::Bound(trade) => {
                storage::insert_trade(conn, &trade)?;
                counts.inserted += 1;
            }
            FactBinding::Unmatched => counts.skipped_unmatched += 1,
            FactBinding::NoTradeDate => counts.skipped_no_trade_date += 1,
        }
    }

    if counts.skipped_unmatched + counts.skipped_no_trade_date > 0 {
        debug!(
            "{} records unmatched, {} without a trade date",
            counts.skipped_unmatched, counts.skipped_no_trade_date
        );
    }
    info!(
        "Trades: {} inserted, {} skipped",
        counts.inserted,
        counts.skipped_unmatched + counts.skipped_no_trade_date
    );
    Ok(counts)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::storage::{get_all_trades, Store};
    use crate::engine::dimensions::build_dimensions;
    use chrono::NaiveDate;

    fn futures_record() -> RawRecord {
        RawRecord {
            instrument: "FUTIDX".to_string(),
            symbol: "NIFTY".to_string(),
            expiry_date: NaiveDate::from_ymd_opt(2019, 8, 29),
            open: Some(11000.0),
            high: Some(11100.0),
            low: Some(10950.0),
            close: Some(11050.0),
            settle_price: Some(11050.0),
            contracts: Some(1500),
            value_in_lakh: Some(123456.78),
            open_interest: Some(9000),
            change_in_oi: Some(150),
            timestamp: NaiveDate::from_ymd_opt(2019, 8, 1).and_then(|d| d.and_hms_opt(0, 0, 0)),
            ..Default::default()
        }
    }

    fn keys_for(store: &mut Store, records: &[RawRecord]) -> DimensionKeys {
        let tx = store.transaction().unwrap();
        let (keys, _) = build_dimensions(&tx, 1, records).unwrap();
        tx.commit().unwrap();
        keys
    }

    #[test]
    fn test_bind_defaults_missing_measures_to_zero() {
        let mut store = Store::open_in_memory().unwrap();
        let record = RawRecord {
            open: None,
            contracts: None,
            open_interest: None,
            value_in_lakh: None,
            ..futures_record()
        };
        let keys = keys_for(&mut store, std::slice::from_ref(&record));

        match bind_record(&record, &keys) {
            FactBinding::Bound(trade) => {
                assert_eq!(trade.open, 0.0);
                assert_eq!(trade.contracts, 0);
                assert_eq!(trade.open_interest, 0);
                assert_eq!(trade.value_in_lakh, 0.0);
                assert_eq!(trade.close, 11050.0);
                assert_eq!(trade.trade_date, NaiveDate::from_ymd_opt(2019, 8, 1).unwrap());
            }
            other => panic!("expected a bound trade, got {:?}", other),
        }
    }

    #[test]
    fn test_bind_unmatched_and_undated() {
        let mut store = Store::open_in_memory().unwrap();
        let keys = keys_for(&mut store, &[futures_record()]);

        let no_expiry = RawRecord {
            expiry_date: None,
            ..futures_record()
        };
        assert_eq!(bind_record(&no_expiry, &keys), FactBinding::Unmatched);

        let unknown = RawRecord {
            symbol: "BANKNIFTY".to_string(),
            ..futures_record()
        };
        assert_eq!(bind_record(&unknown, &keys), FactBinding::Unmatched);

        let undated = RawRecord {
            timestamp: None,
            ..futures_record()
        };
        assert_eq!(bind_record(&undated, &keys), FactBinding::NoTradeDate);
    }

    #[test]
    fn test_load_facts_appends_duplicates() {
        let mut store = Store::open_in_memory().unwrap();
        let records = vec![futures_record(), futures_record()];
        let keys = keys_for(&mut store, &records);

        let tx = store.transaction().unwrap();
        let counts = load_facts(&tx, &records, &keys).unwrap();
        tx.commit().unwrap();

        assert_eq!(counts.inserted, 2);
        let trades = get_all_trades(store.connection()).unwrap();
        assert_eq!(trades.len(), 2);
        assert_ne!(trades[0].trade_id, trades[1].trade_id);
        assert_eq!(trades[0].fact, trades[1].fact);
    }
}
