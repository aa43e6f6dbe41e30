pub mod config;
pub mod dataset;
pub mod dates;
pub mod duckdb_etl;
pub mod error;
pub mod file_load;
pub mod logging;

#[cfg(feature = "extension-module")]
mod duckdb_warehouse;

pub use config::PipelineConfig;
pub use duckdb_etl::{Pipeline, RunSummary};
pub use error::{EtlError, Result};
