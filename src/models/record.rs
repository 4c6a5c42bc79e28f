use chrono::{NaiveDate, NaiveDateTime};

use super::dimension::{ContractSpec, InstrumentKey};

/// One source row after type coercion.
///
/// Identity columns are always present (rows without them are dropped by the
/// parser). Every other field is `None` when the cell was blank or failed to
/// coerce.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RawRecord {
    pub instrument: String,
    pub symbol: String,
    pub expiry_date: Option<NaiveDate>,
    pub strike_price: Option<f64>,
    pub option_type: Option<String>,
    pub open: Option<f64>,
    pub high: Option<f64>,
    pub low: Option<f64>,
    pub close: Option<f64>,
    pub settle_price: Option<f64>,
    pub contracts: Option<i64>,
    pub value_in_lakh: Option<f64>,
    pub open_interest: Option<i64>,
    pub change_in_oi: Option<i64>,
    pub timestamp: Option<NaiveDateTime>,
}

impl RawRecord {
    pub fn instrument_key(&self) -> InstrumentKey {
        InstrumentKey::new(self.instrument.as_str(), self.symbol.as_str())
    }

    /// `None` when the expiry date did not parse: such a record has no
    /// contract and cannot reach the fact table.
    pub fn contract_spec(&self) -> Option<ContractSpec> {
        self.expiry_date.map(|date| {
            ContractSpec::new(date, self.strike_price, self.option_type.as_deref())
        })
    }

    pub fn trade_date(&self) -> Option<NaiveDate> {
        self.timestamp.map(|ts| ts.date())
    }
}
