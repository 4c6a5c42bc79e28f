use anyhow::Context;
use clap::Parser;
use tracing::error;

use fo_normalize_lib::cli::{self, Cli, Command};
use fo_normalize_lib::commands;

fn main() -> anyhow::Result<()> {
    fo_normalize_lib::init_tracing();
    let cli = Cli::parse();

    run(cli).inspect_err(|err| error!(code = cli::error_code(err), "{:#}", err))
}

fn run(cli: Cli) -> anyhow::Result<()> {
    let output = match cli.command {
        Command::Load {
            source,
            db,
            exchange,
            delimiter,
            config,
        } => {
            let cfg = cli::pipeline_config(config, source, db, exchange, delimiter)?;
            let summary = commands::load(&cfg)
                .with_context(|| format!("loading {}", cfg.source_path.display()))?;
            serde_json::to_string_pretty(&summary)?
        }
        Command::Query {
            db,
            out,
            start_date,
            symbol,
            expiry_from,
            config,
        } => {
            let cfg = cli::query_config(config, db, out, start_date, symbol, expiry_from)?;
            let report = commands::run_queries(&cfg)
                .with_context(|| format!("querying {}", cfg.db_path.display()))?;
            serde_json::to_string_pretty(&report)?
        }
        Command::Stats { db } => {
            let stats = commands::stats(&db)
                .with_context(|| format!("reading stats from {}", db.display()))?;
            serde_json::to_string_pretty(&stats)?
        }
    };

    println!("{}", output);
    Ok(())
}
