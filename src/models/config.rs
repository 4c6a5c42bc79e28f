use std::path::{Path, PathBuf};

use chrono::NaiveDate;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::errors::EtlError;

/// Settings for one load run. Every field has a default, so a config file
/// only needs to name what it changes.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Source F&O dump (delimited, with header)
    pub source_path: PathBuf,
    /// SQLite store; created if missing
    pub db_path: PathBuf,
    /// Exchange the dump belongs to; must be one of the seeded codes
    pub exchange_code: String,
    /// Field delimiter of the source file
    pub delimiter: char,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            source_path: PathBuf::from("NSE_data_3M.csv"),
            db_path: PathBuf::from("fo_analytics.db"),
            exchange_code: "NSE".to_string(),
            delimiter: ',',
        }
    }
}

impl PipelineConfig {
    pub fn from_json_file(path: &Path) -> Result<Self, EtlError> {
        read_json(path)
    }

    /// The delimiter as the single byte the CSV reader expects.
    pub fn delimiter_byte(&self) -> Result<u8, EtlError> {
        if self.delimiter.is_ascii() {
            Ok(self.delimiter as u8)
        } else {
            Err(EtlError::InvalidConfig(format!(
                "delimiter must be a single ASCII character, got {:?}",
                self.delimiter
            )))
        }
    }

    pub fn validate(&self) -> Result<(), EtlError> {
        self.delimiter_byte()?;
        if self.exchange_code.trim().is_empty() {
            return Err(EtlError::InvalidConfig("exchange_code is empty".into()));
        }
        Ok(())
    }
}

/// Parameters of the analytical queries.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct QueryConfig {
    pub db_path: PathBuf,
    /// Directory the CSV results are written to
    pub output_dir: PathBuf,
    /// Lower bound on trade_date for the OI-change and volatility queries
    pub start_date: NaiveDate,
    /// Underlying shown in the option-chain query
    pub chain_symbol: String,
    /// The option chain uses the first expiry on or after this date
    pub chain_expiry_from: NaiveDate,
}

impl Default for QueryConfig {
    fn default() -> Self {
        Self {
            db_path: PathBuf::from("fo_analytics.db"),
            output_dir: PathBuf::from("query_outputs"),
            start_date: NaiveDate::from_ymd_opt(2019, 8, 1).unwrap_or_default(),
            chain_symbol: "NIFTY".to_string(),
            chain_expiry_from: NaiveDate::from_ymd_opt(2019, 9, 26).unwrap_or_default(),
        }
    }
}

impl QueryConfig {
    pub fn from_json_file(path: &Path) -> Result<Self, EtlError> {
        read_json(path)
    }
}

fn read_json<T: DeserializeOwned>(path: &Path) -> Result<T, EtlError> {
    let text = std::fs::read_to_string(path).map_err(|e| {
        EtlError::InvalidConfig(format!("cannot read {}: {}", path.display(), e))
    })?;
    Ok(serde_json::from_str(&text)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_config_uses_defaults() {
        let cfg: PipelineConfig = serde_json::from_str(r#"{"exchange_code": "BSE"}"#).unwrap();
        assert_eq!(cfg.exchange_code, "BSE");
        assert_eq!(cfg.delimiter, ',');
        assert_eq!(cfg.db_path, PathBuf::from("fo_analytics.db"));
    }

    #[test]
    fn test_non_ascii_delimiter_rejected() {
        let cfg = PipelineConfig {
            delimiter: '§',
            ..Default::default()
        };
        assert!(matches!(cfg.validate(), Err(EtlError::InvalidConfig(_))));
    }

    #[test]
    fn test_query_config_dates_from_json() {
        let cfg: QueryConfig =
            serde_json::from_str(r#"{"start_date": "2019-09-02", "chain_symbol": "BANKNIFTY"}"#)
                .unwrap();
        assert_eq!(cfg.start_date, NaiveDate::from_ymd_opt(2019, 9, 2).unwrap());
        assert_eq!(cfg.chain_symbol, "BANKNIFTY");
        assert_eq!(cfg.chain_expiry_from, NaiveDate::from_ymd_opt(2019, 9, 26).unwrap());
    }
}
