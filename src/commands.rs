use std::path::{Path, PathBuf};

use serde::Serialize;
use tracing::info;

use crate::analytics::queries::{self, StoreStats};
use crate::data::storage::Store;
use crate::engine::pipeline;
use crate::errors::EtlError;
use crate::models::config::{PipelineConfig, QueryConfig};
use crate::models::summary::LoadSummary;
use crate::utils::export;

/// One CSV written by `run_queries`.
#[derive(Debug, Clone, Serialize)]
pub struct ExportedFile {
    pub path: PathBuf,
    pub rows: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct QueryReport {
    pub output_dir: PathBuf,
    pub files: Vec<ExportedFile>,
}

// ── Load Commands ──

/// Open (or create) the store and load the configured source into it.
pub fn load(config: &PipelineConfig) -> Result<LoadSummary, EtlError> {
    let mut store = Store::open(&config.db_path)?;
    let summary = pipeline::run_load(&mut store, config)?;
    info!(
        "Load finished: {} trades inserted, store now holds {}",
        summary.trades_inserted, summary.totals.trades
    );
    Ok(summary)
}

// ── Query Commands ──

/// Run every analytical query against an existing store and export each
/// result set, plus the store statistics, to `config.output_dir`.
pub fn run_queries(config: &QueryConfig) -> Result<QueryReport, EtlError> {
    let store = Store::open_read_only(&config.db_path)?;
    std::fs::create_dir_all(&config.output_dir).map_err(|e| {
        EtlError::FileWrite(format!("creating {}: {}", config.output_dir.display(), e))
    })?;

    let results = queries::run_all(store.connection(), config)?;
    let dir = config.output_dir.as_path();
    let files = vec![
        write(dir, "query1_oi_change.csv", &results.oi_change)?,
        write(dir, "query2_volatility.csv", &results.volatility)?,
        write(dir, "query3_cross_exchange.csv", &results.exchange_volume)?,
        write(dir, "query4_option_chain.csv", &results.option_chain)?,
        write(dir, "query5_max_volume.csv", &results.max_volume_days)?,
        write(dir, "query6_price_movement.csv", &results.price_movement)?,
        write(dir, "query7_active_expiries.csv", &results.active_expiries)?,
    ];

    let stats = queries::store_stats(store.connection())?;
    let stats_path = dir.join("store_stats.csv");
    export::write_stats_csv(&stats, &stats_path)?;

    info!("Wrote {} query results to {}", files.len(), dir.display());
    Ok(QueryReport {
        output_dir: config.output_dir.clone(),
        files,
    })
}

/// Summary statistics of an existing store.
pub fn stats(db_path: &Path) -> Result<StoreStats, EtlError> {
    let store = Store::open_read_only(db_path)?;
    queries::store_stats(store.connection())
}

fn write<T: Serialize>(dir: &Path, name: &str, rows: &[T]) -> Result<ExportedFile, EtlError> {
    let path = dir.join(name);
    let rows = export::write_rows_csv(rows, &path)?;
    info!("{}: {} rows", name, rows);
    Ok(ExportedFile { path, rows })
}
