use std::collections::HashMap;
use std::path::Path;

use chrono::NaiveDate;
use ordered_float::OrderedFloat;
use rusqlite::types::Type;
use rusqlite::{params, Connection, OpenFlags, OptionalExtension, Transaction};
use tracing::{debug, info};

use crate::errors::EtlError;
use crate::models::dimension::{
    seed_exchanges, ContractKey, ContractSpec, Exchange, Expiry, Instrument, InstrumentKey, Series,
};
use crate::models::summary::TableCounts;
use crate::models::trade::{NewTrade, Trade};

/// Secondary indexes on `trades`, built after the bulk load.
pub const TRADE_INDEXES: [(&str, &str); 3] = [
    ("idx_trades_instrument", "instrument_id"),
    ("idx_trades_date", "trade_date"),
    ("idx_trades_instrument_date", "instrument_id, trade_date"),
];

const SCHEMA_SQL: &str = "
    CREATE TABLE IF NOT EXISTS exchanges (
        exchange_id    INTEGER PRIMARY KEY,
        exchange_code  TEXT NOT NULL UNIQUE,
        exchange_name  TEXT NOT NULL,
        country        TEXT NOT NULL DEFAULT 'India',
        is_active      INTEGER NOT NULL DEFAULT 1
    );

    CREATE TABLE IF NOT EXISTS instruments (
        instrument_id    INTEGER PRIMARY KEY,
        exchange_id      INTEGER NOT NULL REFERENCES exchanges(exchange_id),
        instrument_type  TEXT NOT NULL,
        symbol           TEXT NOT NULL,
        series           TEXT NOT NULL,
        UNIQUE(exchange_id, instrument_type, symbol)
    );

    CREATE TABLE IF NOT EXISTS expiries (
        expiry_id      INTEGER PRIMARY KEY,
        instrument_id  INTEGER NOT NULL REFERENCES instruments(instrument_id),
        expiry_date    TEXT NOT NULL,
        strike_price   REAL NOT NULL DEFAULT 0,
        option_type    TEXT NOT NULL DEFAULT 'XX',
        UNIQUE(instrument_id, expiry_date, strike_price, option_type)
    );

    CREATE TABLE IF NOT EXISTS trades (
        trade_id       INTEGER PRIMARY KEY,
        expiry_id      INTEGER NOT NULL REFERENCES expiries(expiry_id),
        instrument_id  INTEGER NOT NULL REFERENCES instruments(instrument_id),
        trade_date     TEXT NOT NULL,
        open           REAL NOT NULL DEFAULT 0,
        high           REAL NOT NULL DEFAULT 0,
        low            REAL NOT NULL DEFAULT 0,
        close          REAL NOT NULL DEFAULT 0,
        settle_price   REAL NOT NULL DEFAULT 0,
        contracts      INTEGER NOT NULL DEFAULT 0,
        value_in_lakh  REAL NOT NULL DEFAULT 0,
        open_interest  INTEGER NOT NULL DEFAULT 0,
        change_in_oi   INTEGER NOT NULL DEFAULT 0,
        timestamp      TEXT NOT NULL
    );
";

/// Owned handle to the SQLite store.
///
/// Every pipeline component borrows the store (or a transaction on it); the
/// connection closes when the handle drops, on success and error paths alike.
pub struct Store {
    conn: Connection,
}

impl Store {
    /// Open or create a store on disk and make sure the schema exists.
    pub fn open(path: &Path) -> Result<Self, EtlError> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)
                .map_err(|e| EtlError::Database(format!("creating {}: {}", parent.display(), e)))?;
        }
        let conn = Connection::open(path)?;
        conn.execute_batch("PRAGMA synchronous = NORMAL; PRAGMA foreign_keys = ON;")?;
        initialize_schema(&conn)?;
        info!("Store ready at {}", path.display());
        Ok(Self { conn })
    }

    /// In-memory store with the schema in place.
    pub fn open_in_memory() -> Result<Self, EtlError> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        initialize_schema(&conn)?;
        Ok(Self { conn })
    }

    /// Read-only handle for the query layer. The store must already exist.
    pub fn open_read_only(path: &Path) -> Result<Self, EtlError> {
        if !path.exists() {
            return Err(EtlError::Database(format!(
                "store not found: {}",
                path.display()
            )));
        }
        let conn = Connection::open_with_flags(
            path,
            OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )?;
        Ok(Self { conn })
    }

    pub fn connection(&self) -> &Connection {
        &self.conn
    }

    /// Start a scoped write transaction; it rolls back if dropped uncommitted.
    pub fn transaction(&mut self) -> Result<Transaction<'_>, EtlError> {
        Ok(self.conn.transaction()?)
    }
}

// ── Schema / index management ──

/// Create the four tables if missing and seed the exchanges. Safe to repeat.
pub fn initialize_schema(conn: &Connection) -> Result<(), EtlError> {
    conn.execute_batch(SCHEMA_SQL)?;
    let seeded = seed_exchange_rows(conn)?;
    debug!("Schema initialized, {} exchange rows seeded", seeded);
    Ok(())
}

/// Insert the static exchanges, skipping any that already exist.
pub fn seed_exchange_rows(conn: &Connection) -> Result<usize, EtlError> {
    let mut stmt = conn.prepare_cached(
        "INSERT INTO exchanges (exchange_id, exchange_code, exchange_name, country, is_active)
         VALUES (?1, ?2, ?3, ?4, ?5)
         ON CONFLICT DO NOTHING",
    )?;
    let mut inserted = 0;
    for ex in seed_exchanges() {
        inserted += stmt.execute(params![
            ex.exchange_id,
            ex.code,
            ex.name,
            ex.country,
            ex.is_active
        ])?;
    }
    Ok(inserted)
}

/// Build the trade indexes. Called once the bulk load has finished.
pub fn create_indexes(conn: &Connection) -> Result<(), EtlError> {
    for (name, columns) in TRADE_INDEXES {
        conn.execute_batch(&format!(
            "CREATE INDEX IF NOT EXISTS {name} ON trades({columns});"
        ))?;
    }
    info!("Created {} trade indexes", TRADE_INDEXES.len());
    Ok(())
}

/// Names of the indexes currently defined on `trades`.
pub fn trade_index_names(conn: &Connection) -> Result<Vec<String>, EtlError> {
    let mut stmt = conn.prepare(
        "SELECT name FROM sqlite_master
         WHERE type = 'index' AND tbl_name = 'trades' AND sql IS NOT NULL
         ORDER BY name",
    )?;
    let names = stmt
        .query_map([], |row| row.get(0))?
        .collect::<Result<Vec<String>, _>>()?;
    Ok(names)
}

// ── Exchanges ──

pub fn exchange_id_by_code(conn: &Connection, code: &str) -> Result<i64, EtlError> {
    conn.query_row(
        "SELECT exchange_id FROM exchanges WHERE exchange_code = ?1",
        [code],
        |row| row.get(0),
    )
    .optional()?
    .ok_or_else(|| EtlError::UnknownExchange(code.to_string()))
}

pub fn get_all_exchanges(conn: &Connection) -> Result<Vec<Exchange>, EtlError> {
    let mut stmt = conn.prepare(
        "SELECT exchange_id, exchange_code, exchange_name, country, is_active
         FROM exchanges ORDER BY exchange_id",
    )?;
    let rows = stmt
        .query_map([], |row| {
            Ok(Exchange {
                exchange_id: row.get(0)?,
                code: row.get(1)?,
                name: row.get(2)?,
                country: row.get(3)?,
                is_active: row.get(4)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

// ── Instruments ──

/// Insert one instrument unless its natural key exists. Returns whether a
/// row was added.
pub fn insert_instrument(
    conn: &Connection,
    exchange_id: i64,
    key: &InstrumentKey,
) -> Result<bool, EtlError> {
    let mut stmt = conn.prepare_cached(
        "INSERT INTO instruments (exchange_id, instrument_type, symbol, series)
         VALUES (?1, ?2, ?3, ?4)
         ON CONFLICT DO NOTHING",
    )?;
    let changed = stmt.execute(params![
        exchange_id,
        key.instrument_type,
        key.symbol,
        key.series().as_str()
    ])?;
    Ok(changed == 1)
}

/// Natural key -> instrument_id for every instrument of an exchange.
pub fn instrument_keys(
    conn: &Connection,
    exchange_id: i64,
) -> Result<HashMap<InstrumentKey, i64>, EtlError> {
    let mut stmt = conn.prepare(
        "SELECT instrument_id, instrument_type, symbol FROM instruments WHERE exchange_id = ?1",
    )?;
    let rows = stmt.query_map([exchange_id], |row| {
        Ok((
            InstrumentKey::new(row.get::<_, String>(1)?, row.get::<_, String>(2)?),
            row.get::<_, i64>(0)?,
        ))
    })?;
    let mut keys = HashMap::new();
    for row in rows {
        let (key, id) = row?;
        keys.insert(key, id);
    }
    Ok(keys)
}

pub fn get_all_instruments(conn: &Connection) -> Result<Vec<Instrument>, EtlError> {
    let mut stmt = conn.prepare(
        "SELECT instrument_id, exchange_id, instrument_type, symbol, series
         FROM instruments ORDER BY instrument_id",
    )?;
    let rows = stmt
        .query_map([], |row| {
            let series: String = row.get(4)?;
            let series = series.parse::<Series>().map_err(|e| {
                rusqlite::Error::FromSqlConversionFailure(4, Type::Text, e.into())
            })?;
            Ok(Instrument {
                instrument_id: row.get(0)?,
                exchange_id: row.get(1)?,
                instrument_type: row.get(2)?,
                symbol: row.get(3)?,
                series,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

// ── Expiries ──

/// Insert one contract specification unless it exists. Returns whether a row
/// was added.
pub fn insert_expiry(conn: &Connection, key: &ContractKey) -> Result<bool, EtlError> {
    let mut stmt = conn.prepare_cached(
        "INSERT INTO expiries (instrument_id, expiry_date, strike_price, option_type)
         VALUES (?1, ?2, ?3, ?4)
         ON CONFLICT DO NOTHING",
    )?;
    let changed = stmt.execute(params![
        key.instrument_id,
        key.spec.expiry_date,
        key.spec.strike_price.into_inner(),
        key.spec.option_type
    ])?;
    Ok(changed == 1)
}

/// Contract key -> expiry_id for every expiry of an exchange's instruments.
pub fn contract_keys(
    conn: &Connection,
    exchange_id: i64,
) -> Result<HashMap<ContractKey, i64>, EtlError> {
    let mut stmt = conn.prepare(
        "SELECT e.expiry_id, e.instrument_id, e.expiry_date, e.strike_price, e.option_type
         FROM expiries e
         JOIN instruments i ON i.instrument_id = e.instrument_id
         WHERE i.exchange_id = ?1",
    )?;
    let rows = stmt.query_map([exchange_id], |row| {
        let key = ContractKey {
            instrument_id: row.get(1)?,
            spec: ContractSpec {
                expiry_date: row.get::<_, NaiveDate>(2)?,
                strike_price: OrderedFloat(row.get::<_, f64>(3)?),
                option_type: row.get(4)?,
            },
        };
        Ok((key, row.get::<_, i64>(0)?))
    })?;
    let mut keys = HashMap::new();
    for row in rows {
        let (key, id) = row?;
        keys.insert(key, id);
    }
    Ok(keys)
}

pub fn get_all_expiries(conn: &Connection) -> Result<Vec<Expiry>, EtlError> {
    let mut stmt = conn.prepare(
        "SELECT expiry_id, instrument_id, expiry_date, strike_price, option_type
         FROM expiries ORDER BY expiry_id",
    )?;
    let rows = stmt
        .query_map([], |row| {
            Ok(Expiry {
                expiry_id: row.get(0)?,
                instrument_id: row.get(1)?,
                expiry_date: row.get(2)?,
                strike_price: row.get(3)?,
                option_type: row.get(4)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

// ── Trades ──

/// Append one fact row. The store allocates the trade_id.
pub fn insert_trade(conn: &Connection, trade: &NewTrade) -> Result<i64, EtlError> {
    let mut stmt = conn.prepare_cached(
        "INSERT INTO trades (
            expiry_id, instrument_id, trade_date, open, high, low, close, settle_price,
            contracts, value_in_lakh, open_interest, change_in_oi, timestamp
         ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)",
    )?;
    stmt.execute(params![
        trade.expiry_id,
        trade.instrument_id,
        trade.trade_date,
        trade.open,
        trade.high,
        trade.low,
        trade.close,
        trade.settle_price,
        trade.contracts,
        trade.value_in_lakh,
        trade.open_interest,
        trade.change_in_oi,
        trade.timestamp,
    ])?;
    Ok(conn.last_insert_rowid())
}

pub fn get_all_trades(conn: &Connection) -> Result<Vec<Trade>, EtlError> {
    let mut stmt = conn.prepare(
        "SELECT trade_id, expiry_id, instrument_id, trade_date, open, high, low, close,
                settle_price, contracts, value_in_lakh, open_interest, change_in_oi, timestamp
         FROM trades ORDER BY trade_id",
    )?;
    let rows = stmt
        .query_map([], |row| {
            Ok(Trade {
                trade_id: row.get(0)?,
                fact: NewTrade {
                    expiry_id: row.get(1)?,
                    instrument_id: row.get(2)?,
                    trade_date: row.get(3)?,
                    open: row.get(4)?,
                    high: row.get(5)?,
                    low: row.get(6)?,
                    close: row.get(7)?,
                    settle_price: row.get(8)?,
                    contracts: row.get(9)?,
                    value_in_lakh: row.get(10)?,
                    open_interest: row.get(11)?,
                    change_in_oi: row.get(12)?,
                    timestamp: row.get(13)?,
                },
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

// ── Counts ──

pub fn table_counts(conn: &Connection) -> Result<TableCounts, EtlError> {
    let count = |table: &str| -> Result<usize, EtlError> {
        let n: i64 = conn.query_row(&format!("SELECT COUNT(*) FROM {table}"), [], |row| {
            row.get(0)
        })?;
        Ok(n as usize)
    };
    Ok(TableCounts {
        exchanges: count("exchanges")?,
        instruments: count("instruments")?,
        expiries: count("expiries")?,
        trades: count("trades")?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_schema_and_seed_are_idempotent() {
        let store = Store::open_in_memory().unwrap();
        let conn = store.connection();
        initialize_schema(conn).unwrap();
        assert_eq!(seed_exchange_rows(conn).unwrap(), 0);
        let counts = table_counts(conn).unwrap();
        assert_eq!(counts.exchanges, 3);
        assert_eq!(counts.instruments, 0);
        let codes: Vec<String> = get_all_exchanges(conn)
            .unwrap()
            .into_iter()
            .map(|e| e.code)
            .collect();
        assert_eq!(codes, ["NSE", "BSE", "MCX"]);
    }

    #[test]
    fn test_exchange_lookup() {
        let store = Store::open_in_memory().unwrap();
        assert_eq!(exchange_id_by_code(store.connection(), "NSE").unwrap(), 1);
        assert_eq!(exchange_id_by_code(store.connection(), "MCX").unwrap(), 3);
        let err = exchange_id_by_code(store.connection(), "LSE").unwrap_err();
        assert!(matches!(err, EtlError::UnknownExchange(_)));
    }

    #[test]
    fn test_duplicate_instrument_is_noop() {
        let store = Store::open_in_memory().unwrap();
        let conn = store.connection();
        let key = InstrumentKey::new("OPTIDX", "NIFTY");
        assert!(insert_instrument(conn, 1, &key).unwrap());
        assert!(!insert_instrument(conn, 1, &key).unwrap());
        // same pair on another exchange is a distinct instrument
        assert!(insert_instrument(conn, 2, &key).unwrap());

        let all = get_all_instruments(conn).unwrap();
        assert_eq!(all.len(), 2);
        assert_eq!(all[0].series, Series::Opt);
        assert_eq!(instrument_keys(conn, 1).unwrap().len(), 1);
    }

    #[test]
    fn test_corrupt_series_is_a_read_error() {
        let store = Store::open_in_memory().unwrap();
        let conn = store.connection();
        insert_instrument(conn, 1, &InstrumentKey::new("FUTIDX", "NIFTY")).unwrap();
        conn.execute("UPDATE instruments SET series = 'SWAP'", []).unwrap();

        let err = get_all_instruments(conn).unwrap_err();
        assert!(matches!(err, EtlError::Database(_)));
    }

    #[test]
    fn test_duplicate_expiry_is_noop_and_keys_round_trip() {
        let store = Store::open_in_memory().unwrap();
        let conn = store.connection();
        insert_instrument(conn, 1, &InstrumentKey::new("OPTIDX", "NIFTY")).unwrap();
        let date = NaiveDate::from_ymd_opt(2019, 8, 29).unwrap();
        let key = ContractKey {
            instrument_id: 1,
            spec: ContractSpec::new(date, Some(11000.5), Some("CE")),
        };
        assert!(insert_expiry(conn, &key).unwrap());
        assert!(!insert_expiry(conn, &key).unwrap());

        let keys = contract_keys(conn, 1).unwrap();
        assert_eq!(keys.get(&key), Some(&1));
    }

    #[test]
    fn test_indexes_created_once() {
        let store = Store::open_in_memory().unwrap();
        let conn = store.connection();
        assert!(trade_index_names(conn).unwrap().is_empty());
        create_indexes(conn).unwrap();
        create_indexes(conn).unwrap();
        assert_eq!(
            trade_index_names(conn).unwrap(),
            ["idx_trades_date", "idx_trades_instrument", "idx_trades_instrument_date"]
        );
    }

    #[test]
    fn test_trade_requires_existing_dimensions() {
        let store = Store::open_in_memory().unwrap();
        let date = NaiveDate::from_ymd_opt(2019, 8, 1).unwrap();
        let trade = NewTrade {
            expiry_id: 99,
            instrument_id: 99,
            trade_date: date,
            open: 0.0,
            high: 0.0,
            low: 0.0,
            close: 0.0,
            settle_price: 0.0,
            contracts: 0,
            value_in_lakh: 0.0,
            open_interest: 0,
            change_in_oi: 0,
            timestamp: date.and_hms_opt(0, 0, 0).unwrap(),
        };
        let err = insert_trade(store.connection(), &trade).unwrap_err();
        assert!(matches!(err, EtlError::Database(_)));
    }

    #[test]
    fn test_on_disk_store_reopens_read_only() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("fo.db");
        {
            let store = Store::open(&path).unwrap();
            insert_instrument(store.connection(), 1, &InstrumentKey::new("FUTIDX", "NIFTY"))
                .unwrap();
        }
        let ro = Store::open_read_only(&path).unwrap();
        assert_eq!(table_counts(ro.connection()).unwrap().instruments, 1);
        assert!(insert_instrument(ro.connection(), 1, &InstrumentKey::new("FUTSTK", "INFY")).is_err());
    }
}
