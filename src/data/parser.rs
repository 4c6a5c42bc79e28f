use std::fs::File;
use std::io::Read;
use std::path::Path;

use chrono::{NaiveDate, NaiveDateTime};
use csv::{ReaderBuilder, StringRecord};
use tracing::{debug, info, trace};

use crate::errors::EtlError;
use crate::models::record::RawRecord;

/// The only accepted date spelling, e.g. `29-Aug-2019`.
pub const DATE_FORMAT: &str = "%d-%b-%Y";

/// Header contract of the source dump.
pub const REQUIRED_COLUMNS: [&str; 15] = [
    "INSTRUMENT",
    "SYMBOL",
    "EXPIRY_DT",
    "STRIKE_PR",
    "OPTION_TYP",
    "OPEN",
    "HIGH",
    "LOW",
    "CLOSE",
    "SETTLE_PR",
    "CONTRACTS",
    "VAL_INLAKH",
    "OPEN_INT",
    "CHG_IN_OI",
    "TIMESTAMP",
];

/// Parsed records plus the counts of what was left behind.
#[derive(Debug, Clone, Default)]
pub struct ParseOutcome {
    pub records: Vec<RawRecord>,
    /// Data rows seen, excluding the header
    pub rows_read: usize,
    /// Rows the CSV reader could not decode at all
    pub rows_malformed: usize,
    /// Rows dropped for a blank INSTRUMENT or SYMBOL
    pub rows_missing_identity: usize,
    /// Non-blank cells that failed coercion and were nulled
    pub fields_unparseable: usize,
}

/// Parse a source file from disk.
pub fn parse_file(path: &Path, delimiter: u8) -> Result<ParseOutcome, EtlError> {
    if !path.exists() {
        return Err(EtlError::SourceNotFound(path.display().to_string()));
    }
    let file = File::open(path)
        .map_err(|e| EtlError::SourceRead(format!("{}: {}", path.display(), e)))?;
    let outcome = parse_reader(file, delimiter)?;
    info!(
        "Parsed {}: {} rows, {} records, {} malformed, {} missing identity, {} fields nulled",
        path.display(),
        outcome.rows_read,
        outcome.records.len(),
        outcome.rows_malformed,
        outcome.rows_missing_identity,
        outcome.fields_unparseable
    );
    Ok(outcome)
}

/// Parse delimited text with a header row.
///
/// Coercion failures null the field and keep the row. A row that is not
/// valid UTF-8 is skipped as malformed. Only a missing header column or an
/// I/O error aborts.
pub fn parse_reader<R: Read>(reader: R, delimiter: u8) -> Result<ParseOutcome, EtlError> {
    let mut rdr = ReaderBuilder::new()
        .delimiter(delimiter)
        .has_headers(true)
        .flexible(true)
        .from_reader(reader);

    let columns = Columns::from_headers(rdr.headers()?)?;
    let mut outcome = ParseOutcome::default();

    for result in rdr.records() {
        outcome.rows_read += 1;
        let record = match result {
            Ok(record) => record,
            Err(e) if e.is_io_error() => return Err(e.into()),
            Err(e) => {
                debug!("Skipping malformed row {}: {}", outcome.rows_read, e);
                outcome.rows_malformed += 1;
                continue;
            }
        };

        let mut row = RowParser::new(&record);
        match row.parse(&columns) {
            Some(parsed) => outcome.records.push(parsed),
            None => outcome.rows_missing_identity += 1,
        }
        outcome.fields_unparseable += row.failures;
    }

    Ok(outcome)
}

// ── Field coercion ──

/// `DD-Mon-YYYY` with a four-digit year; anything else is `None`.
pub fn parse_date(s: &str) -> Option<NaiveDate> {
    let year = s.rsplit('-').next()?;
    if year.len() != 4 || !year.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    NaiveDate::parse_from_str(s, DATE_FORMAT).ok()
}

/// The dump's TIMESTAMP column carries a date only; it becomes midnight.
pub fn parse_timestamp(s: &str) -> Option<NaiveDateTime> {
    parse_date(s)?.and_hms_opt(0, 0, 0)
}

/// Finite decimal, rounded to two places like the store's price columns.
pub fn parse_decimal(s: &str) -> Option<f64> {
    s.parse::<f64>()
        .ok()
        .filter(|v| v.is_finite())
        .map(round_cents)
}

/// Whole number; an integral decimal spelling such as `1200.00` is accepted.
pub fn parse_integer(s: &str) -> Option<i64> {
    s.parse::<i64>().ok().or_else(|| {
        let v = s.parse::<f64>().ok()?;
        let in_range = v.abs() < i64::MAX as f64;
        (v.is_finite() && v.fract() == 0.0 && in_range).then_some(v as i64)
    })
}

fn round_cents(v: f64) -> f64 {
    let rounded = (v * 100.0).round() / 100.0;
    if rounded == 0.0 {
        0.0
    } else {
        rounded
    }
}

// ── Header / row plumbing ──

/// Positions of the required columns within a header row.
struct Columns {
    instrument: usize,
    symbol: usize,
    expiry_dt: usize,
    strike_pr: usize,
    option_typ: usize,
    open: usize,
    high: usize,
    low: usize,
    close: usize,
    settle_pr: usize,
    contracts: usize,
    val_inlakh: usize,
    open_int: usize,
    chg_in_oi: usize,
    timestamp: usize,
}

impl Columns {
    fn from_headers(headers: &StringRecord) -> Result<Self, EtlError> {
        let names: Vec<String> = headers
            .iter()
            .map(|h| {
                h.trim_start_matches('\u{feff}')
                    .trim()
                    .to_ascii_uppercase()
            })
            .collect();
        let position = |name: &str| names.iter().position(|n| n == name);

        let missing: Vec<&str> = REQUIRED_COLUMNS
            .iter()
            .copied()
            .filter(|c| position(*c).is_none())
            .collect();
        if !missing.is_empty() {
            return Err(EtlError::MissingColumns(missing.join(", ")));
        }

        // Presence was checked above.
        let at = |name: &str| position(name).unwrap_or_default();
        Ok(Self {
            instrument: at("INSTRUMENT"),
            symbol: at("SYMBOL"),
            expiry_dt: at("EXPIRY_DT"),
            strike_pr: at("STRIKE_PR"),
            option_typ: at("OPTION_TYP"),
            open: at("OPEN"),
            high: at("HIGH"),
            low: at("LOW"),
            close: at("CLOSE"),
            settle_pr: at("SETTLE_PR"),
            contracts: at("CONTRACTS"),
            val_inlakh: at("VAL_INLAKH"),
            open_int: at("OPEN_INT"),
            chg_in_oi: at("CHG_IN_OI"),
            timestamp: at("TIMESTAMP"),
        })
    }
}

struct RowParser<'r> {
    record: &'r StringRecord,
    failures: usize,
}

impl<'r> RowParser<'r> {
    fn new(record: &'r StringRecord) -> Self {
        Self { record, failures: 0 }
    }

    /// Trimmed cell text; blank or absent cells are `None`.
    fn cell(&self, idx: usize) -> Option<&'r str> {
        self.record
            .get(idx)
            .map(str::trim)
            .filter(|s| !s.is_empty())
    }

    fn text(&self, idx: usize) -> Option<String> {
        self.cell(idx).map(str::to_string)
    }

    fn coerce<T>(&mut self, idx: usize, parse: fn(&str) -> Option<T>) -> Option<T> {
        let raw = self.cell(idx)?;
        let value = parse(raw);
        if value.is_none() {
            trace!("Unparseable cell {:?} in column {}", raw, idx);
            self.failures += 1;
        }
        value
    }

    fn parse(&mut self, c: &Columns) -> Option<RawRecord> {
        let instrument = self.text(c.instrument)?;
        let symbol = self.text(c.symbol)?;

        Some(RawRecord {
            instrument,
            symbol,
            expiry_date: self.coerce(c.expiry_dt, parse_date),
            strike_price: self.coerce(c.strike_pr, parse_decimal),
            option_type: self.text(c.option_typ),
            open: self.coerce(c.open, parse_decimal),
            high: self.coerce(c.high, parse_decimal),
            low: self.coerce(c.low, parse_decimal),
            close: self.coerce(c.close, parse_decimal),
            settle_price: self.coerce(c.settle_pr, parse_decimal),
            contracts: self.coerce(c.contracts, parse_integer),
            value_in_lakh: self.coerce(c.val_inlakh, parse_decimal),
            open_interest: self.coerce(c.open_int, parse_integer),
            change_in_oi: self.coerce(c.chg_in_oi, parse_integer),
            timestamp: self.coerce(c.timestamp, parse_timestamp),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const HEADER: &str = "INSTRUMENT,SYMBOL,EXPIRY_DT,STRIKE_PR,OPTION_TYP,OPEN,HIGH,LOW,CLOSE,SETTLE_PR,CONTRACTS,VAL_INLAKH,OPEN_INT,CHG_IN_OI,TIMESTAMP";

    fn parse(body: &str) -> ParseOutcome {
        let text = format!("{}\n{}", HEADER, body);
        parse_reader(text.as_bytes(), b',').unwrap()
    }

    #[test]
    fn test_parse_date_fixed_format() {
        assert_eq!(parse_date("29-Aug-2019"), NaiveDate::from_ymd_opt(2019, 8, 29));
        assert_eq!(parse_date("29-AUG-2019"), NaiveDate::from_ymd_opt(2019, 8, 29));
        assert_eq!(parse_date("32-Foo-2019"), None);
        assert_eq!(parse_date("2019-08-29"), None);
        assert_eq!(parse_date("29-Aug-19"), None);
        assert_eq!(parse_date("31-Sep-2019"), None);
    }

    #[test]
    fn test_parse_numbers() {
        assert_eq!(parse_decimal("11000"), Some(11000.0));
        assert_eq!(parse_decimal("101.006"), Some(101.01));
        assert_eq!(parse_decimal("abc"), None);
        assert_eq!(parse_decimal("NaN"), None);
        assert_eq!(parse_decimal("inf"), None);
        assert_eq!(parse_integer("1200"), Some(1200));
        assert_eq!(parse_integer("1200.00"), Some(1200));
        assert_eq!(parse_integer("-75"), Some(-75));
        assert_eq!(parse_integer("12.5"), None);
        assert_eq!(parse_integer("n/a"), None);
    }

    #[test]
    fn test_futures_row_parses_with_blank_contract_fields() {
        let out = parse("FUTIDX,NIFTY,29-Aug-2019,,,11000,11100,10950,11050,11050,1500,123456.78,9000,150,01-Aug-2019");
        assert_eq!(out.rows_read, 1);
        assert_eq!(out.records.len(), 1);
        let r = &out.records[0];
        assert_eq!(r.instrument, "FUTIDX");
        assert_eq!(r.symbol, "NIFTY");
        assert_eq!(r.strike_price, None);
        assert_eq!(r.option_type, None);
        assert_eq!(r.open, Some(11000.0));
        assert_eq!(r.contracts, Some(1500));
        assert_eq!(r.trade_date(), NaiveDate::from_ymd_opt(2019, 8, 1));
        assert_eq!(out.fields_unparseable, 0);
    }

    #[test]
    fn test_bad_measure_nulls_field_but_keeps_row() {
        let out = parse("OPTIDX,NIFTY,29-Aug-2019,11000,CE,abc,1,1,1,1,10,1.5,,7,01-Aug-2019");
        assert_eq!(out.records.len(), 1);
        let r = &out.records[0];
        assert_eq!(r.open, None);
        assert_eq!(r.open_interest, None);
        assert_eq!(r.change_in_oi, Some(7));
        // blank OPEN_INT is not a failure, "abc" is
        assert_eq!(out.fields_unparseable, 1);
    }

    #[test]
    fn test_missing_identity_dropped() {
        let out = parse(
            ",NIFTY,29-Aug-2019,,,1,1,1,1,1,1,1,1,1,01-Aug-2019\n\
             FUTIDX, ,29-Aug-2019,,,1,1,1,1,1,1,1,1,1,01-Aug-2019\n\
             FUTIDX,NIFTY,29-Aug-2019,,,1,1,1,1,1,1,1,1,1,01-Aug-2019",
        );
        assert_eq!(out.rows_read, 3);
        assert_eq!(out.rows_missing_identity, 2);
        assert_eq!(out.records.len(), 1);
    }

    #[test]
    fn test_invalid_utf8_rows_counted_as_malformed() {
        let mut bytes = format!("{}\n", HEADER).into_bytes();
        bytes.extend_from_slice(
            b"FUTIDX,NIFTY,29-Aug-2019,,,\xff\xfe,1,1,1,1,1,1,1,1,01-Aug-2019\n",
        );
        bytes.extend_from_slice(
            b"FUTIDX,NI\xffFTY,29-Aug-2019,,,1,1,1,1,1,1,1,1,1,01-Aug-2019\n",
        );
        bytes.extend_from_slice(b"FUTIDX,NIFTY,29-Aug-2019,,,1,1,1,1,1,1,1,1,1,01-Aug-2019\n");

        let out = parse_reader(bytes.as_slice(), b',').unwrap();
        assert_eq!(out.rows_read, 3);
        assert_eq!(out.rows_malformed, 2);
        assert_eq!(out.rows_missing_identity, 0);
        assert_eq!(out.fields_unparseable, 0);
        assert_eq!(out.records.len(), 1);
        assert_eq!(out.records[0].open, Some(1.0));
    }

    #[test]
    fn test_short_row_yields_nulls() {
        let out = parse("FUTSTK,INFY,29-Aug-2019,,,750");
        assert_eq!(out.records.len(), 1);
        assert_eq!(out.records[0].open, Some(750.0));
        assert_eq!(out.records[0].timestamp, None);
    }

    #[test]
    fn test_header_is_case_insensitive_and_extra_columns_ignored() {
        let text = format!(
            "{},\nFUTIDX,NIFTY,29-Aug-2019,,,1,1,1,1,1,1,1,1,1,01-Aug-2019,",
            HEADER.to_lowercase()
        );
        let out = parse_reader(text.as_bytes(), b',').unwrap();
        assert_eq!(out.records.len(), 1);
    }

    #[test]
    fn test_missing_column_is_fatal() {
        let text = "INSTRUMENT,SYMBOL,EXPIRY_DT\nFUTIDX,NIFTY,29-Aug-2019";
        match parse_reader(text.as_bytes(), b',') {
            Err(EtlError::MissingColumns(cols)) => {
                assert!(cols.contains("STRIKE_PR"));
                assert!(cols.contains("TIMESTAMP"));
            }
            other => panic!("expected MissingColumns, got {:?}", other),
        }
    }

    #[test]
    fn test_alternate_delimiter() {
        let text = format!(
            "{}\nFUTIDX;NIFTY;29-Aug-2019;;;1;1;1;1;1;1;1;1;1;01-Aug-2019",
            HEADER.replace(',', ";")
        );
        let out = parse_reader(text.as_bytes(), b';').unwrap();
        assert_eq!(out.records.len(), 1);
    }

    #[test]
    fn test_missing_file() {
        let err = parse_file(Path::new("/nonexistent/fo.csv"), b',').unwrap_err();
        assert!(matches!(err, EtlError::SourceNotFound(_)));
    }
}
