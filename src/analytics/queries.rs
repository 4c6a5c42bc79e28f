use chrono::NaiveDate;
use rusqlite::{params, Connection};
use serde::Serialize;

use crate::errors::EtlError;
use crate::models::config::QueryConfig;

use super::volatility::rolling_std_dev;

const TOP_OI_LIMIT: usize = 10;
const VOLATILITY_WINDOW: usize = 7;
const VOLATILITY_LIMIT: usize = 10;
const OPTION_CHAIN_LIMIT: usize = 15;
const MAX_VOLUME_LIMIT: usize = 10;
const PRICE_RANGE_MIN_PCT: f64 = 5.0;
const PRICE_RANGE_LIMIT: usize = 10;
const ACTIVE_EXPIRY_LIMIT: usize = 15;

// ── Row types ──

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OiChangeRow {
    pub symbol: String,
    pub exchange_code: String,
    pub net_oi_change: i64,
    pub avg_open_interest: f64,
    pub cumulative_volume: i64,
    pub trading_days: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct VolatilityRow {
    pub symbol: String,
    pub latest_date: NaiveDate,
    pub avg_price: f64,
    pub avg_volatility: f64,
    pub min_volatility: f64,
    pub max_volatility: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ExchangeVolumeRow {
    pub exchange_code: String,
    pub instrument_type: String,
    pub unique_symbols: i64,
    pub total_volume: i64,
    pub total_value_lakh: f64,
    pub avg_settlement_price: f64,
}

/// One strike of an option chain with calls and puts side by side.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OptionChainRow {
    pub expiry_date: NaiveDate,
    pub strike_price: f64,
    pub ce_volume: i64,
    pub pe_volume: i64,
    pub ce_oi: i64,
    pub pe_oi: i64,
    pub ce_premium: f64,
    pub pe_premium: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MaxVolumeRow {
    pub symbol: String,
    pub trade_date: NaiveDate,
    pub daily_volume: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PriceRangeRow {
    pub symbol: String,
    pub trade_date: NaiveDate,
    pub avg_range: f64,
    pub avg_range_pct: f64,
    pub max_range: f64,
    pub num_contracts: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ActiveExpiryRow {
    pub symbol: String,
    pub expiry_date: NaiveDate,
    pub num_strikes: i64,
    pub total_volume: i64,
    pub total_value_lakh: f64,
    pub avg_oi: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct StoreStats {
    pub total_trades: i64,
    pub total_instruments: i64,
    pub total_expiries: i64,
    pub total_exchanges: i64,
    pub first_trade_date: Option<NaiveDate>,
    pub last_trade_date: Option<NaiveDate>,
    pub total_contracts: i64,
    pub total_value_lakh: f64,
}

// ── Queries ──
//
// Averages below run over zero-defaulted measures: a blank source cell counts
// as 0, not as missing.

/// Symbols with the largest absolute net change in open interest.
pub fn top_oi_change(conn: &Connection, since: NaiveDate) -> Result<Vec<OiChangeRow>, EtlError> {
    let mut stmt = conn.prepare(
        "SELECT i.symbol,
                e.exchange_code,
                SUM(t.change_in_oi),
                ROUND(AVG(t.open_interest), 0),
                SUM(t.contracts),
                COUNT(DISTINCT t.trade_date)
         FROM trades t
         JOIN instruments i ON t.instrument_id = i.instrument_id
         JOIN exchanges e ON i.exchange_id = e.exchange_id
         WHERE t.trade_date >= ?1
         GROUP BY i.symbol, e.exchange_code
         ORDER BY ABS(SUM(t.change_in_oi)) DESC, i.symbol
         LIMIT ?2",
    )?;
    let rows = stmt
        .query_map(params![since, TOP_OI_LIMIT as i64], |row| {
            Ok(OiChangeRow {
                symbol: row.get(0)?,
                exchange_code: row.get(1)?,
                net_oi_change: row.get(2)?,
                avg_open_interest: row.get(3)?,
                cumulative_volume: row.get(4)?,
                trading_days: row.get(5)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

/// 7-day rolling volatility of the daily average close, summarized per
/// symbol. The rolling deviation is computed here because SQLite has no
/// STDDEV aggregate.
pub fn rolling_volatility(
    conn: &Connection,
    since: NaiveDate,
) -> Result<Vec<VolatilityRow>, EtlError> {
    let mut stmt = conn.prepare(
        "SELECT i.symbol, t.trade_date, AVG(t.close)
         FROM trades t
         JOIN instruments i ON t.instrument_id = i.instrument_id
         WHERE t.trade_date >= ?1
         GROUP BY i.symbol, t.trade_date
         ORDER BY i.symbol, t.trade_date",
    )?;
    let daily = stmt
        .query_map([since], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, NaiveDate>(1)?,
                row.get::<_, f64>(2)?,
            ))
        })?
        .collect::<Result<Vec<_>, _>>()?;

    let mut out = Vec::new();
    for series in daily.chunk_by(|a, b| a.0 == b.0) {
        let closes: Vec<f64> = series.iter().map(|(_, _, close)| *close).collect();
        let stds = rolling_std_dev(&closes, VOLATILITY_WINDOW);

        let points: Vec<(NaiveDate, f64, f64)> = series
            .iter()
            .zip(stds)
            .filter_map(|((_, date, close), sd)| sd.map(|s| (*date, *close, s)))
            .collect();
        let Some(latest_date) = points.iter().map(|(d, _, _)| *d).max() else {
            continue;
        };
        let n = points.len() as f64;
        let vols = points.iter().map(|(_, _, s)| *s);
        out.push(VolatilityRow {
            symbol: series[0].0.clone(),
            latest_date,
            avg_price: round2(points.iter().map(|(_, c, _)| c).sum::<f64>() / n),
            avg_volatility: round2(vols.clone().sum::<f64>() / n),
            min_volatility: round2(vols.clone().fold(f64::INFINITY, f64::min)),
            max_volatility: round2(vols.fold(f64::NEG_INFINITY, f64::max)),
        });
    }

    out.sort_by(|a, b| {
        b.avg_volatility
            .total_cmp(&a.avg_volatility)
            .then_with(|| a.symbol.cmp(&b.symbol))
    });
    out.truncate(VOLATILITY_LIMIT);
    Ok(out)
}

/// Volume and value per exchange and instrument type.
pub fn cross_exchange_volume(conn: &Connection) -> Result<Vec<ExchangeVolumeRow>, EtlError> {
    let mut stmt = conn.prepare(
        "SELECT e.exchange_code,
                i.instrument_type,
                COUNT(DISTINCT i.symbol),
                SUM(t.contracts),
                ROUND(SUM(t.value_in_lakh), 2),
                ROUND(AVG(t.close), 2)
         FROM trades t
         JOIN instruments i ON t.instrument_id = i.instrument_id
         JOIN exchanges e ON i.exchange_id = e.exchange_id
         GROUP BY e.exchange_code, i.instrument_type
         ORDER BY SUM(t.contracts) DESC, e.exchange_code, i.instrument_type",
    )?;
    let rows = stmt
        .query_map([], |row| {
            Ok(ExchangeVolumeRow {
                exchange_code: row.get(0)?,
                instrument_type: row.get(1)?,
                unique_symbols: row.get(2)?,
                total_volume: row.get(3)?,
                total_value_lakh: row.get(4)?,
                avg_settlement_price: row.get(5)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

/// Calls and puts per strike for `symbol`'s first option expiry on or after
/// `expiry_from`.
pub fn option_chain(
    conn: &Connection,
    symbol: &str,
    expiry_from: NaiveDate,
) -> Result<Vec<OptionChainRow>, EtlError> {
    let mut stmt = conn.prepare(
        "WITH target AS (
            SELECT MIN(ex.expiry_date) AS expiry_date
            FROM expiries ex
            JOIN instruments i ON ex.instrument_id = i.instrument_id
            WHERE i.symbol = ?1
              AND ex.option_type IN ('CE', 'PE')
              AND ex.expiry_date >= ?2
         ),
         option_summary AS (
            SELECT ex.expiry_date,
                   ex.strike_price,
                   ex.option_type,
                   SUM(t.contracts) AS total_volume,
                   SUM(t.open_interest) AS total_oi,
                   ROUND(AVG(t.close), 2) AS avg_premium
            FROM trades t
            JOIN expiries ex ON t.expiry_id = ex.expiry_id
            JOIN instruments i ON t.instrument_id = i.instrument_id
            WHERE i.symbol = ?1
              AND ex.option_type IN ('CE', 'PE')
              AND ex.expiry_date = (SELECT expiry_date FROM target)
            GROUP BY ex.expiry_date, ex.strike_price, ex.option_type
         )
         SELECT expiry_date,
                strike_price,
                MAX(CASE WHEN option_type = 'CE' THEN total_volume ELSE 0 END),
                MAX(CASE WHEN option_type = 'PE' THEN total_volume ELSE 0 END),
                MAX(CASE WHEN option_type = 'CE' THEN total_oi ELSE 0 END),
                MAX(CASE WHEN option_type = 'PE' THEN total_oi ELSE 0 END),
                MAX(CASE WHEN option_type = 'CE' THEN avg_premium ELSE 0 END),
                MAX(CASE WHEN option_type = 'PE' THEN avg_premium ELSE 0 END)
         FROM option_summary
         GROUP BY expiry_date, strike_price
         ORDER BY strike_price
         LIMIT ?3",
    )?;
    let rows = stmt
        .query_map(params![symbol, expiry_from, OPTION_CHAIN_LIMIT as i64], |row| {
            Ok(OptionChainRow {
                expiry_date: row.get(0)?,
                strike_price: row.get(1)?,
                ce_volume: row.get(2)?,
                pe_volume: row.get(3)?,
                ce_oi: row.get(4)?,
                pe_oi: row.get(5)?,
                ce_premium: row.get(6)?,
                pe_premium: row.get(7)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

/// Each symbol's busiest trading day by summed contracts.
pub fn max_volume_days(conn: &Connection) -> Result<Vec<MaxVolumeRow>, EtlError> {
    let mut stmt = conn.prepare(
        "WITH daily AS (
            SELECT i.symbol, t.trade_date, SUM(t.contracts) AS daily_volume
            FROM trades t
            JOIN instruments i ON t.instrument_id = i.instrument_id
            WHERE t.contracts > 0
            GROUP BY i.symbol, t.trade_date
         ),
         ranked AS (
            SELECT symbol, trade_date, daily_volume,
                   ROW_NUMBER() OVER (
                       PARTITION BY symbol ORDER BY daily_volume DESC, trade_date
                   ) AS rn
            FROM daily
         )
         SELECT symbol, trade_date, daily_volume
         FROM ranked
         WHERE rn = 1
         ORDER BY daily_volume DESC, symbol
         LIMIT ?1",
    )?;
    let rows = stmt
        .query_map([MAX_VOLUME_LIMIT as i64], |row| {
            Ok(MaxVolumeRow {
                symbol: row.get(0)?,
                trade_date: row.get(1)?,
                daily_volume: row.get(2)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

/// (symbol, day) pairs whose average high-low range exceeds 5% of close.
pub fn intraday_price_movement(conn: &Connection) -> Result<Vec<PriceRangeRow>, EtlError> {
    let mut stmt = conn.prepare(
        "SELECT i.symbol,
                t.trade_date,
                ROUND(AVG(t.high - t.low), 2),
                ROUND(AVG((t.high - t.low) / t.close * 100), 2) AS avg_range_pct,
                ROUND(MAX(t.high - t.low), 2),
                COUNT(*)
         FROM trades t
         JOIN instruments i ON t.instrument_id = i.instrument_id
         WHERE (t.high - t.low) > 0
           AND t.close > 0
         GROUP BY i.symbol, t.trade_date
         HAVING AVG((t.high - t.low) / t.close * 100) > ?1
         ORDER BY avg_range_pct DESC, i.symbol, t.trade_date
         LIMIT ?2",
    )?;
    let rows = stmt
        .query_map(params![PRICE_RANGE_MIN_PCT, PRICE_RANGE_LIMIT as i64], |row| {
            Ok(PriceRangeRow {
                symbol: row.get(0)?,
                trade_date: row.get(1)?,
                avg_range: row.get(2)?,
                avg_range_pct: row.get(3)?,
                max_range: row.get(4)?,
                num_contracts: row.get(5)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

/// Option expiries ranked by traded contracts.
pub fn active_option_expiries(conn: &Connection) -> Result<Vec<ActiveExpiryRow>, EtlError> {
    let mut stmt = conn.prepare(
        "SELECT i.symbol,
                ex.expiry_date,
                COUNT(DISTINCT ex.strike_price),
                SUM(t.contracts),
                ROUND(SUM(t.value_in_lakh), 2),
                ROUND(AVG(t.open_interest), 0)
         FROM trades t
         JOIN expiries ex ON t.expiry_id = ex.expiry_id
         JOIN instruments i ON t.instrument_id = i.instrument_id
         WHERE ex.option_type IN ('CE', 'PE')
         GROUP BY i.symbol, ex.expiry_date
         ORDER BY SUM(t.contracts) DESC, i.symbol, ex.expiry_date
         LIMIT ?1",
    )?;
    let rows = stmt
        .query_map([ACTIVE_EXPIRY_LIMIT as i64], |row| {
            Ok(ActiveExpiryRow {
                symbol: row.get(0)?,
                expiry_date: row.get(1)?,
                num_strikes: row.get(2)?,
                total_volume: row.get(3)?,
                total_value_lakh: row.get(4)?,
                avg_oi: row.get(5)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

pub fn store_stats(conn: &Connection) -> Result<StoreStats, EtlError> {
    let count = |table: &str| -> Result<i64, EtlError> {
        Ok(conn.query_row(&format!("SELECT COUNT(*) FROM {table}"), [], |row| row.get(0))?)
    };
    let mut stats = StoreStats {
        total_trades: count("trades")?,
        total_instruments: count("instruments")?,
        total_expiries: count("expiries")?,
        total_exchanges: count("exchanges")?,
        ..Default::default()
    };
    conn.query_row(
        "SELECT MIN(trade_date), MAX(trade_date),
                COALESCE(SUM(contracts), 0), COALESCE(SUM(value_in_lakh), 0)
         FROM trades",
        [],
        |row| {
            stats.first_trade_date = row.get(0)?;
            stats.last_trade_date = row.get(1)?;
            stats.total_contracts = row.get(2)?;
            stats.total_value_lakh = row.get(3)?;
            Ok(())
        },
    )?;
    Ok(stats)
}

/// Every analytical query, run against one connection.
#[derive(Debug, Clone, Serialize)]
pub struct AnalyticsResults {
    pub oi_change: Vec<OiChangeRow>,
    pub volatility: Vec<VolatilityRow>,
    pub exchange_volume: Vec<ExchangeVolumeRow>,
    pub option_chain: Vec<OptionChainRow>,
    pub max_volume_days: Vec<MaxVolumeRow>,
    pub price_movement: Vec<PriceRangeRow>,
    pub active_expiries: Vec<ActiveExpiryRow>,
}

pub fn run_all(conn: &Connection, config: &QueryConfig) -> Result<AnalyticsResults, EtlError> {
    Ok(AnalyticsResults {
        oi_change: top_oi_change(conn, config.start_date)?,
        volatility: rolling_volatility(conn, config.start_date)?,
        exchange_volume: cross_exchange_volume(conn)?,
        option_chain: option_chain(conn, &config.chain_symbol, config.chain_expiry_from)?,
        max_volume_days: max_volume_days(conn)?,
        price_movement: intraday_price_movement(conn)?,
        active_expiries: active_option_expiries(conn)?,
    })
}

fn round2(v: f64) -> f64 {
    (v * 100.0).round() / 100.0
}
