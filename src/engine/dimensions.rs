use std::collections::{HashMap, HashSet};

use rusqlite::Connection;
use tracing::info;

use crate::data::storage;
use crate::errors::EtlError;
use crate::models::dimension::{ContractKey, ContractSpec, InstrumentKey};
use crate::models::record::RawRecord;

/// Natural key -> surrogate key lookups handed to the fact loader.
#[derive(Debug, Clone, Default)]
pub struct DimensionKeys {
    pub instruments: HashMap<InstrumentKey, i64>,
    pub contracts: HashMap<ContractKey, i64>,
}

impl DimensionKeys {
    pub fn instrument_id(&self, key: &InstrumentKey) -> Option<i64> {
        self.instruments.get(key).copied()
    }

    pub fn expiry_id(&self, instrument_id: i64, spec: &ContractSpec) -> Option<i64> {
        let key = ContractKey {
            instrument_id,
            spec: spec.clone(),
        };
        self.contracts.get(&key).copied()
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DimensionCounts {
    pub instruments_distinct: usize,
    pub instruments_inserted: usize,
    pub expiries_distinct: usize,
    pub expiries_inserted: usize,
    /// Records whose expiry date did not parse; they get no expiry row
    pub records_without_expiry: usize,
}

/// Distinct instrument keys in first-seen order.
pub fn distinct_instruments(records: &[RawRecord]) -> Vec<InstrumentKey> {
    let mut seen = HashSet::new();
    records
        .iter()
        .map(RawRecord::instrument_key)
        .filter(|key| seen.insert(key.clone()))
        .collect()
}

/// Distinct (instrument, contract) pairs in first-seen order, skipping
/// records without an expiry date.
pub fn distinct_contracts(records: &[RawRecord]) -> Vec<(InstrumentKey, ContractSpec)> {
    let mut seen = HashSet::new();
    records
        .iter()
        .filter_map(|r| r.contract_spec().map(|spec| (r.instrument_key(), spec)))
        .filter(|pair| seen.insert(pair.clone()))
        .collect()
}

/// Insert the instrument and expiry dimensions for `records` and return the
/// key lookups for the whole exchange.
///
/// Surrogate keys are allocated by the store on first insert and read back by
/// natural key, so an existing instrument or expiry keeps its key across runs
/// no matter how the input is ordered. Re-inserting a known natural key is a
/// no-op.
pub fn build_dimensions(
    conn: &Connection,
    exchange_id: i64,
    records: &[RawRecord],
) -> Result<(DimensionKeys, DimensionCounts), EtlError> {
    let mut counts = DimensionCounts::default();

    // ── Instruments ──
    let instruments = distinct_instruments(records);
    counts.instruments_distinct = instruments.len();
    for key in &instruments {
        if storage::insert_instrument(conn, exchange_id, key)? {
            counts.instruments_inserted += 1;
        }
    }
    let instrument_ids = storage::instrument_keys(conn, exchange_id)?;
    info!(
        "Instruments: {} distinct, {} new",
        counts.instruments_distinct, counts.instruments_inserted
    );

    // ── Expiries ──
    counts.records_without_expiry = records.iter().filter(|r| r.expiry_date.is_none()).count();
    let contracts = distinct_contracts(records);
    counts.expiries_distinct = contracts.len();
    for (instrument, spec) in contracts {
        let Some(&instrument_id) = instrument_ids.get(&instrument) else {
            continue;
        };
        let key = ContractKey {
            instrument_id,
            spec,
        };
        if storage::insert_expiry(conn, &key)? {
            counts.expiries_inserted += 1;
        }
    }
    let contract_ids = storage::contract_keys(conn, exchange_id)?;
    info!(
        "Expiries: {} distinct, {} new, {} records without a parseable expiry",
        counts.expiries_distinct, counts.expiries_inserted, counts.records_without_expiry
    );

    Ok((
        DimensionKeys {
            instruments: instrument_ids,
            contracts: contract_ids,
        },
        counts,
    ))
}
