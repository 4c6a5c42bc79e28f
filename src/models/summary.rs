use serde::{Deserialize, Serialize};

/// Row counts of the four tables.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableCounts {
    pub exchanges: usize,
    pub instruments: usize,
    pub expiries: usize,
    pub trades: usize,
}

/// Outcome of a load run. Counts are the only diagnostic the pipeline
/// produces; rows lost to coercion or join misses show up as gaps here.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LoadSummary {
    pub source: String,
    pub exchange_code: String,

    // Parser
    pub rows_read: usize,
    pub rows_malformed: usize,
    pub rows_missing_identity: usize,
    pub fields_unparseable: usize,
    pub records_parsed: usize,

    // Dimensions
    pub records_without_expiry: usize,
    pub instruments_distinct: usize,
    pub instruments_inserted: usize,
    pub expiries_distinct: usize,
    pub expiries_inserted: usize,

    // Facts
    pub trades_inserted: usize,
    pub trades_skipped_unmatched: usize,
    pub trades_skipped_no_trade_date: usize,

    /// Store totals after the run
    pub totals: TableCounts,
}
