use chrono::NaiveDate;
use ordered_float::OrderedFloat;
use serde::{Deserialize, Serialize};

/// Option type recorded for contracts without one (futures).
pub const FUTURES_OPTION_TYPE: &str = "XX";

/// Strike recorded for contracts without one (futures).
pub const FUTURES_STRIKE: f64 = 0.0;

/// Substring of an instrument type that marks an options series.
const OPTIONS_MARKER: &str = "OPT";

/// A row of the static `exchanges` dimension.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Exchange {
    pub exchange_id: i64,
    pub code: String,
    pub name: String,
    pub country: String,
    pub is_active: bool,
}

/// Exchanges seeded into every store.
pub fn seed_exchanges() -> Vec<Exchange> {
    [
        (1, "NSE", "National Stock Exchange of India"),
        (2, "BSE", "Bombay Stock Exchange"),
        (3, "MCX", "Multi Commodity Exchange of India"),
    ]
    .into_iter()
    .map(|(exchange_id, code, name)| Exchange {
        exchange_id,
        code: code.to_string(),
        name: name.to_string(),
        country: "India".to_string(),
        is_active: true,
    })
    .collect()
}

/// Futures or options series, derived from the instrument type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Series {
    Fut,
    Opt,
}

impl Series {
    /// `FUTIDX` -> Fut, `OPTSTK` -> Opt.
    pub fn from_instrument_type(instrument_type: &str) -> Self {
        if instrument_type.contains(OPTIONS_MARKER) {
            Series::Opt
        } else {
            Series::Fut
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Series::Fut => "FUT",
            Series::Opt => "OPT",
        }
    }
}

impl std::fmt::Display for Series {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Series {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "FUT" => Ok(Series::Fut),
            "OPT" => Ok(Series::Opt),
            _ => Err(format!("Unknown series: {}", s)),
        }
    }
}

/// Natural key of an instrument within one exchange.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct InstrumentKey {
    pub instrument_type: String,
    pub symbol: String,
}

impl InstrumentKey {
    pub fn new(instrument_type: impl Into<String>, symbol: impl Into<String>) -> Self {
        Self {
            instrument_type: instrument_type.into(),
            symbol: symbol.into(),
        }
    }

    pub fn series(&self) -> Series {
        Series::from_instrument_type(&self.instrument_type)
    }
}

/// Contract fields of an expiry with the futures defaults already applied.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ContractSpec {
    pub expiry_date: NaiveDate,
    pub strike_price: OrderedFloat<f64>,
    pub option_type: String,
}

impl ContractSpec {
    /// Missing strike becomes 0 and missing option type becomes `XX`, so a
    /// futures contract resolves to exactly one expiry per instrument and date.
    pub fn new(expiry_date: NaiveDate, strike_price: Option<f64>, option_type: Option<&str>) -> Self {
        Self {
            expiry_date,
            strike_price: OrderedFloat(normalize_zero(strike_price.unwrap_or(FUTURES_STRIKE))),
            option_type: option_type.unwrap_or(FUTURES_OPTION_TYPE).to_string(),
        }
    }
}

/// Natural key of an expiry row as stored: the owning instrument's surrogate
/// key plus the contract fields.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ContractKey {
    pub instrument_id: i64,
    pub spec: ContractSpec,
}

/// A row of the `instruments` dimension.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Instrument {
    pub instrument_id: i64,
    pub exchange_id: i64,
    pub instrument_type: String,
    pub symbol: String,
    pub series: Series,
}

/// A row of the `expiries` dimension (one contract specification).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Expiry {
    pub expiry_id: i64,
    pub instrument_id: i64,
    pub expiry_date: NaiveDate,
    pub strike_price: f64,
    pub option_type: String,
}

// -0.0 and 0.0 must land on the same unique key.
fn normalize_zero(v: f64) -> f64 {
    if v == 0.0 {
        0.0
    } else {
        v
    }
}
