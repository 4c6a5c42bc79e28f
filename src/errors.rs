/// Fatal pipeline errors, categorized by domain.
///
/// Field-coercion failures, join misses and duplicate dimension keys are not
/// errors: they are absorbed by the pipeline and only show up in row counts.
#[derive(Debug, thiserror::Error)]
pub enum EtlError {
    // ── Source ──
    #[error("Source file not found: {0}")]
    SourceNotFound(String),

    #[error("Failed to read source: {0}")]
    SourceRead(String),

    #[error("Missing required column(s): {0}")]
    MissingColumns(String),

    #[error("Invalid source format: {0}")]
    InvalidSourceFormat(String),

    // ── Store ──
    #[error("Database error: {0}")]
    Database(String),

    #[error("Unknown exchange code: {0}")]
    UnknownExchange(String),

    // ── Configuration ──
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    // ── Export ──
    #[error("Failed to write file: {0}")]
    FileWrite(String),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl EtlError {
    /// Stable machine-readable code, used in CLI error reports.
    pub fn code(&self) -> &'static str {
        match self {
            EtlError::SourceNotFound(_) => "SOURCE_NOT_FOUND",
            EtlError::SourceRead(_) => "SOURCE_READ",
            EtlError::MissingColumns(_) => "MISSING_COLUMNS",
            EtlError::InvalidSourceFormat(_) => "INVALID_SOURCE_FORMAT",
            EtlError::Database(_) => "DATABASE",
            EtlError::UnknownExchange(_) => "UNKNOWN_EXCHANGE",
            EtlError::InvalidConfig(_) => "INVALID_CONFIG",
            EtlError::FileWrite(_) => "FILE_WRITE",
            EtlError::Serialization(_) => "SERIALIZATION",
        }
    }
}

// ── Conversions from external errors ──

impl From<rusqlite::Error> for EtlError {
    fn from(err: rusqlite::Error) -> Self {
        EtlError::Database(err.to_string())
    }
}

impl From<csv::Error> for EtlError {
    fn from(err: csv::Error) -> Self {
        if err.is_io_error() {
            EtlError::SourceRead(err.to_string())
        } else {
            EtlError::InvalidSourceFormat(err.to_string())
        }
    }
}

impl From<serde_json::Error> for EtlError {
    fn from(err: serde_json::Error) -> Self {
        EtlError::Serialization(err.to_string())
    }
}

impl From<std::io::Error> for EtlError {
    fn from(err: std::io::Error) -> Self {
        EtlError::SourceRead(err.to_string())
    }
}
