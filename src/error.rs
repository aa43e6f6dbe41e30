use std::io;
use std::path::PathBuf;

use thiserror::Error;

/// Failures that can stop a pipeline run.
///
/// Constraint and conversion errors are the exception: the loader catches
/// them per row, logs them and carries on with the next row.
#[derive(Debug, Error)]
pub enum EtlError {
    #[error(transparent)]
    Io(#[from] io::Error),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("source '{source_name}' is missing required columns: {}", .missing.join(", "))]
    MissingColumns {
        source_name: String,
        missing: Vec<String>,
    },

    #[error("unsupported source '{}': {reason}", .path.display())]
    UnsupportedSource { path: PathBuf, reason: String },

    #[error("could not connect to warehouse: {0}")]
    Connection(String),

    #[error("constraint violation: {0}")]
    Constraint(String),

    #[error("value does not fit the warehouse column: {0}")]
    Conversion(String),

    #[error("database error: {0}")]
    Database(duckdb::Error),

    #[error("zip archive error: {0}")]
    Archive(#[from] zip::result::ZipError),
}

impl EtlError {
    /// Whether the error is a schema problem with the source data.
    pub fn is_schema_error(&self) -> bool {
        matches!(
            self,
            EtlError::MissingColumns { .. } | EtlError::UnsupportedSource { .. }
        )
    }

    /// Whether the error rejects a single warehouse row rather than the run.
    pub fn is_row_rejection(&self) -> bool {
        matches!(self, EtlError::Constraint(_) | EtlError::Conversion(_))
    }
}

// Messages DuckDB and the postgres scanner use for values that do not fit
// the destination column type
const CONVERSION_MARKERS: [&str; 4] = [
    "conversion error",
    "out of range",
    "numeric field overflow",
    "value too long",
];

// DuckDB and the postgres scanner report rejected rows only through the
// message text, so classify on it.
impl From<duckdb::Error> for EtlError {
    fn from(value: duckdb::Error) -> Self {
        let message = value.to_string();
        let lowered = message.to_lowercase();
        if lowered.contains("constraint") {
            EtlError::Constraint(message)
        } else if CONVERSION_MARKERS.iter().any(|marker| lowered.contains(marker)) {
            EtlError::Conversion(message)
        } else {
            EtlError::Database(value)
        }
    }
}

impl From<serde_yaml::Error> for EtlError {
    fn from(value: serde_yaml::Error) -> Self {
        EtlError::Config(value.to_string())
    }
}

pub type Result<T> = std::result::Result<T, EtlError>;
