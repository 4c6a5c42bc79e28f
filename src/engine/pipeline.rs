use tracing::{info, warn};

use crate::data::parser::{self, ParseOutcome};
use crate::data::storage::{self, Store};
use crate::errors::EtlError;
use crate::models::config::PipelineConfig;
use crate::models::summary::LoadSummary;

use super::dimensions::build_dimensions;
use super::facts::load_facts;

/// Run a full load: parse the source, build the dimensions, append the
/// facts, then index.
///
/// Each write phase commits its own transaction. A failure while loading
/// facts rolls back only the fact phase, so the store may hold dimensions
/// without their trades; re-running is the recovery path.
pub fn run_load(store: &mut Store, config: &PipelineConfig) -> Result<LoadSummary, EtlError> {
    config.validate()?;
    info!(
        "Starting load: source={}, exchange={}",
        config.source_path.display(),
        config.exchange_code
    );

    let outcome = parser::parse_file(&config.source_path, config.delimiter_byte()?)?;
    let mut summary = load_records(store, &config.exchange_code, outcome)?;
    summary.source = config.source_path.display().to_string();
    Ok(summary)
}

/// Load already-parsed records into the store.
pub fn load_records(
    store: &mut Store,
    exchange_code: &str,
    outcome: ParseOutcome,
) -> Result<LoadSummary, EtlError> {
    let exchange_id = storage::exchange_id_by_code(store.connection(), exchange_code)?;

    let existing = storage::table_counts(store.connection())?;
    if existing.trades > 0 {
        warn!(
            "Store already holds {} trades; this run appends to them",
            existing.trades
        );
    }

    let mut summary = LoadSummary {
        exchange_code: exchange_code.to_string(),
        rows_read: outcome.rows_read,
        rows_malformed: outcome.rows_malformed,
        rows_missing_identity: outcome.rows_missing_identity,
        fields_unparseable: outcome.fields_unparseable,
        records_parsed: outcome.records.len(),
        ..Default::default()
    };
    let records = outcome.records;

    // ── Dimensions ──
    let tx = store.transaction()?;
    let (keys, dims) = build_dimensions(&tx, exchange_id, &records)?;
    tx.commit()?;
    summary.records_without_expiry = dims.records_without_expiry;
    summary.instruments_distinct = dims.instruments_distinct;
    summary.instruments_inserted = dims.instruments_inserted;
    summary.expiries_distinct = dims.expiries_distinct;
    summary.expiries_inserted = dims.expiries_inserted;

    // ── Facts ──
    let tx = store.transaction()?;
    let facts = load_facts(&tx, &records, &keys)?;
    tx.commit()?;
    summary.trades_inserted = facts.inserted;
    summary.trades_skipped_unmatched = facts.skipped_unmatched;
    summary.trades_skipped_no_trade_date = facts.skipped_no_trade_date;

    // ── Indexes (post-load) ──
    storage::create_indexes(store.connection())?;

    summary.totals = storage::table_counts(store.connection())?;
    info!(
        "Load complete: {} trades, {} instruments, {} expiries in store",
        summary.totals.trades, summary.totals.instruments, summary.totals.expiries
    );
    Ok(summary)
}
