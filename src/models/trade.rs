use chrono::{NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};

/// A fact row ready to be appended to `trades`. Measures are already
/// defaulted, so none of them can be null in the store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewTrade {
    pub expiry_id: i64,
    pub instrument_id: i64,
    pub trade_date: NaiveDate,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub settle_price: f64,
    pub contracts: i64,
    pub value_in_lakh: f64,
    pub open_interest: i64,
    pub change_in_oi: i64,
    pub timestamp: NaiveDateTime,
}

/// A stored fact row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Trade {
    pub trade_id: i64,
    #[serde(flatten)]
    pub fact: NewTrade,
}
