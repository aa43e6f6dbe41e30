use std::fs::{create_dir_all, remove_file};
use std::path::Path;

use log::info;

use crate::config::SourceLocator;
use crate::dataset::Dataset;
use crate::duckdb_etl::core_processor::{path_literal, CoreProcessor};
use crate::error::{EtlError, Result};
use crate::file_load::{determine_source_format, unpack_csv_from_zip, SourceFormat};

/// Reads a raw source into DuckDB and writes the staged Parquet snapshot.
pub struct Extractor<'a> {
    core: &'a CoreProcessor,
    dataset: Dataset,
}

impl<'a> Extractor<'a> {
    pub fn new(core: &'a CoreProcessor, dataset: Dataset) -> Self {
        Self { core, dataset }
    }

    /// Stage `source` at `staging_path` and return the number of staged rows.
    pub fn extract(&self, source: &SourceLocator, staging_path: &Path) -> Result<usize> {
        let source_name = match source {
            SourceLocator::File(path) => {
                self.create_raw_table_from_file(path)?;
                path.display().to_string()
            }
            SourceLocator::Table(table) => {
                let qualified = self.core.qualified_table(table);
                self.core.conn().execute(
                    &format!(
                        "CREATE OR REPLACE TEMP TABLE raw_data AS SELECT COLUMNS(*)::VARCHAR FROM {};",
                        qualified
                    ),
                    [],
                )?;
                qualified
            }
        };

        let columns = self.core.table_columns("raw_data")?;
        check_required_columns(self.dataset, &source_name, &columns)?;

        self.write_snapshot(staging_path)?;

        let rows: i64 = self
            .core
            .conn()
            .query_row("SELECT count(*) FROM raw_data;", [], |row| row.get(0))?;
        info!(
            source = source_name.as_str(),
            staging_file = staging_path.display().to_string().as_str(),
            rows = rows;
            "Data extracted to staging area"
        );
        Ok(rows as usize)
    }

    // Every column is staged as text, coercion happens in the transformer
    fn create_raw_table_from_file(&self, path: &Path) -> Result<()> {
        let format = determine_source_format(path)?;
        info!(path = path.display().to_string().as_str(), format = format.to_string().as_str(); "Detected source format");

        match format {
            SourceFormat::Csv => self.create_raw_table_from_csv(path),
            SourceFormat::ZippedCsv => {
                // The unpacked file only has to outlive the read
                let scratch = tempfile::tempdir()?;
                let csv_path = unpack_csv_from_zip(path, scratch.path())?;
                self.create_raw_table_from_csv(&csv_path)
            }
            SourceFormat::Parquet => {
                self.core.conn().execute(
                    &format!(
                        "CREATE OR REPLACE TEMP TABLE raw_data AS SELECT COLUMNS(*)::VARCHAR FROM read_parquet({});",
                        path_literal(path)
                    ),
                    [],
                )?;
                Ok(())
            }
        }
    }

    fn create_raw_table_from_csv(&self, path: &Path) -> Result<()> {
        self.core.conn().execute(
            &format!(
                "CREATE OR REPLACE TEMP TABLE raw_data AS SELECT * FROM read_csv({}, header = true, all_varchar = true);",
                path_literal(path)
            ),
            [],
        )?;
        Ok(())
    }

    fn write_snapshot(&self, staging_path: &Path) -> Result<()> {
        prepare_output_path(staging_path)?;
        self.core.conn().execute(
            &format!(
                "COPY raw_data TO {} (FORMAT PARQUET);",
                path_literal(staging_path)
            ),
            [],
        )?;
        Ok(())
    }
}

/// Fail with a schema error naming every required column absent from `columns`.
pub fn check_required_columns(dataset: Dataset, source_name: &str, columns: &[String]) -> Result<()> {
    let missing: Vec<String> = dataset
        .required_columns()
        .filter(|required| !columns.iter().any(|column| column == required))
        .map(str::to_string)
        .collect();

    if missing.is_empty() {
        Ok(())
    } else {
        Err(EtlError::MissingColumns {
            source_name: source_name.to_string(),
            missing,
        })
    }
}

// Snapshots are replaced on every run
pub(crate) fn prepare_output_path(path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            create_dir_all(parent)?;
        }
    }
    if path.exists() {
        remove_file(path)?;
    }
    Ok(())
}
