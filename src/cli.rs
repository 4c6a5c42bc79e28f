use std::path::PathBuf;

use chrono::NaiveDate;
use clap::{Parser, Subcommand};

use crate::errors::EtlError;
use crate::models::config::{PipelineConfig, QueryConfig};

/// Normalize daily F&O bhavcopy dumps into a SQLite star schema and run
/// analytics over it.
#[derive(Parser)]
#[command(name = "fo-normalize", version, about)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Load a source file into the store
    Load {
        /// Path to the delimited source file
        source: Option<PathBuf>,

        /// SQLite store path (created if missing)
        #[arg(long)]
        db: Option<PathBuf>,

        /// Exchange code the source belongs to (NSE, BSE, MCX)
        #[arg(long)]
        exchange: Option<String>,

        /// Field delimiter of the source file
        #[arg(long)]
        delimiter: Option<char>,

        /// JSON config file; flags override its values
        #[arg(long)]
        config: Option<PathBuf>,
    },

    /// Run the analytical queries and export the results as CSV
    Query {
        /// SQLite store path
        #[arg(long)]
        db: Option<PathBuf>,

        /// Output directory for the CSV files
        #[arg(long, short = 'o')]
        out: Option<PathBuf>,

        /// First trade date considered by the OI and volatility queries
        #[arg(long)]
        start_date: Option<NaiveDate>,

        /// Underlying for the option chain
        #[arg(long)]
        symbol: Option<String>,

        /// The option chain uses the first expiry on or after this date
        #[arg(long)]
        expiry_from: Option<NaiveDate>,

        /// JSON config file; flags override its values
        #[arg(long)]
        config: Option<PathBuf>,
    },

    /// Print store statistics as JSON
    Stats {
        /// SQLite store path
        #[arg(long, default_value = "fo_analytics.db")]
        db: PathBuf,
    },
}

/// Start from the config file (or defaults) and apply the flags given.
pub fn pipeline_config(
    config: Option<PathBuf>,
    source: Option<PathBuf>,
    db: Option<PathBuf>,
    exchange: Option<String>,
    delimiter: Option<char>,
) -> Result<PipelineConfig, EtlError> {
    let mut cfg = match config {
        Some(path) => PipelineConfig::from_json_file(&path)?,
        None => PipelineConfig::default(),
    };
    if let Some(source) = source {
        cfg.source_path = source;
    }
    if let Some(db) = db {
        cfg.db_path = db;
    }
    if let Some(exchange) = exchange {
        cfg.exchange_code = exchange;
    }
    if let Some(delimiter) = delimiter {
        cfg.delimiter = delimiter;
    }
    Ok(cfg)
}

pub fn query_config(
    config: Option<PathBuf>,
    db: Option<PathBuf>,
    out: Option<PathBuf>,
    start_date: Option<NaiveDate>,
    symbol: Option<String>,
    expiry_from: Option<NaiveDate>,
) -> Result<QueryConfig, EtlError> {
    let mut cfg = match config {
        Some(path) => QueryConfig::from_json_file(&path)?,
        None => QueryConfig::default(),
    };
    if let Some(db) = db {
        cfg.db_path = db;
    }
    if let Some(out) = out {
        cfg.output_dir = out;
    }
    if let Some(start_date) = start_date {
        cfg.start_date = start_date;
    }
    if let Some(symbol) = symbol {
        cfg.chain_symbol = symbol;
    }
    if let Some(expiry_from) = expiry_from {
        cfg.chain_expiry_from = expiry_from;
    }
    Ok(cfg)
}

/// Machine-readable code for a failed command. Errors that did not come
/// from the library report `INTERNAL`.
pub fn error_code(err: &anyhow::Error) -> &'static str {
    err.downcast_ref::<EtlError>()
        .map(EtlError::code)
        .unwrap_or("INTERNAL")
}
