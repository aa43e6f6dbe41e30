use std::collections::HashMap;
use std::path::Path;

use chrono::{Datelike, NaiveDate};
use duckdb::{params, ToSql};
use log::{info, warn};

use crate::dataset::Dataset;
use crate::dates::to_iso;
use crate::duckdb_etl::core_processor::{quote_ident, CoreProcessor};
use crate::duckdb_etl::news_strategy::NewsStarSchema;
use crate::duckdb_etl::sales_strategy::SalesStarSchema;
use crate::error::Result;

/// Counters collected while loading one transformed snapshot.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LoadReport {
    pub dimension_rows_inserted: usize,
    pub fact_rows_inserted: usize,
    pub fact_rows_existing: usize,
    pub rows_skipped: usize,
    pub rows_rejected: usize,
}

/// Strategy trait for loading a transformed snapshot into a star schema.
/// Each dataset owns its tables; the shared flow lives in
/// `load_into_warehouse`.
pub trait WarehouseLoader {
    fn dataset(&self) -> Dataset;

    fn fact_table(&self) -> &'static str;

    /// Create the dataset's dimension and fact tables if they are missing
    fn create_tables(&self, core: &CoreProcessor) -> Result<()>;

    fn load_dimensions(
        &self,
        core: &CoreProcessor,
        transformed_path: &Path,
        report: &mut LoadReport,
    ) -> Result<()>;

    fn load_facts(
        &self,
        core: &CoreProcessor,
        transformed_path: &Path,
        report: &mut LoadReport,
    ) -> Result<()>;

    /// Insert every row that is not already present. Re-running on the same
    /// snapshot inserts nothing.
    fn load_into_warehouse(&self, core: &CoreProcessor, transformed_path: &Path) -> Result<LoadReport> {
        core.create_schema()?;
        self.create_tables(core)?;

        let mut report = LoadReport::default();
        self.load_dimensions(core, transformed_path, &mut report)?;
        info!(
            dataset = self.dataset().to_string().as_str(),
            inserted = report.dimension_rows_inserted;
            "Dimension tables loaded"
        );

        self.load_facts(core, transformed_path, &mut report)?;
        info!(
            dataset = self.dataset().to_string().as_str(),
            inserted = report.fact_rows_inserted,
            existing = report.fact_rows_existing,
            skipped = report.rows_skipped,
            rejected = report.rows_rejected;
            "Fact table loaded"
        );

        let total = core.count_rows(self.fact_table())?;
        info!(table = self.fact_table(), rows = total; "Warehouse fact table size");
        Ok(report)
    }
}

/// Pick the loading strategy for a dataset.
pub fn loader_for(dataset: Dataset) -> Box<dyn WarehouseLoader> {
    match dataset {
        Dataset::News => Box::new(NewsStarSchema),
        Dataset::Sales => Box::new(SalesStarSchema),
    }
}

/// Run `insert`, which must be an insert-if-absent statement, and report
/// whether a row was written.
pub(crate) fn insert_if_absent(core: &CoreProcessor, insert: &str, values: &[&dyn ToSql]) -> Result<bool> {
    let written = core.conn().execute(insert, values)?;
    Ok(written > 0)
}

/// Fetch a single surrogate key, `None` when no row matches.
pub(crate) fn lookup_key(core: &CoreProcessor, query: &str, values: &[&dyn ToSql]) -> Result<Option<i64>> {
    let mut stmt = core.conn().prepare(query)?;
    let mut rows = stmt.query(values)?;
    match rows.next()? {
        Some(row) => Ok(Some(row.get(0)?)),
        None => Ok(None),
    }
}

/// Constraint and conversion errors reject the current row only; anything
/// else stops the run.
pub(crate) fn guard_row(report: &mut LoadReport, row_label: &str, outcome: Result<()>) -> Result<()> {
    match outcome {
        Ok(()) => Ok(()),
        Err(e) if e.is_row_rejection() => {
            warn!(row = row_label, error = e.to_string().as_str(); "Row rejected by warehouse, skipped");
            report.rows_rejected += 1;
            Ok(())
        }
        Err(e) => Err(e),
    }
}

pub(crate) fn skip_row(report: &mut LoadReport, row_label: &str, reason: &str) {
    warn!(row = row_label, reason = reason; "Row skipped");
    report.rows_skipped += 1;
}

/// Split a comma separated tag list into trimmed, distinct, non-empty tags.
pub fn split_tags(tags: Option<&str>) -> Vec<String> {
    let mut result: Vec<String> = Vec::new();
    for tag in tags.unwrap_or_default().split(',') {
        let tag = tag.trim();
        if !tag.is_empty() && !result.iter().any(|existing| existing == tag) {
            result.push(tag.to_string());
        }
    }
    result
}

pub(crate) const DATE_DIMENSION: &str = "dim_date";

pub(crate) fn create_date_dimension(core: &CoreProcessor) -> Result<()> {
    let key = core.surrogate_key_column(DATE_DIMENSION, "date_id")?;
    core.execute_warehouse_ddl(&format!(
        "CREATE TABLE IF NOT EXISTS {} (
            {},
            \"date\" DATE UNIQUE NOT NULL,
            day INTEGER NOT NULL,
            month INTEGER NOT NULL,
            year INTEGER NOT NULL
        );",
        core.native_table(DATE_DIMENSION),
        key
    ))
}

/// Natural key to surrogate key for one dimension table.
///
/// Read in a single scan when a load step starts, then kept current as rows
/// are inserted, so per-row work only reaches the warehouse for new values.
pub(crate) struct DimensionKeys {
    table: String,
    natural: &'static str,
    surrogate: &'static str,
    keys: HashMap<String, i64>,
}

impl DimensionKeys {
    pub(crate) fn load(
        core: &CoreProcessor,
        table: &str,
        natural: &'static str,
        surrogate: &'static str,
    ) -> Result<Self> {
        let table = core.qualified_table(table);
        let mut stmt = core.conn().prepare(&format!(
            "SELECT CAST({} AS VARCHAR), CAST({} AS BIGINT) FROM {};",
            quote_ident(natural),
            quote_ident(surrogate),
            table
        ))?;
        let keys = stmt
            .query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?)))?
            .collect::<std::result::Result<HashMap<_, _>, _>>()?;
        Ok(Self {
            table,
            natural,
            surrogate,
            keys,
        })
    }

    pub(crate) fn get(&self, value: &str) -> Option<i64> {
        self.keys.get(value).copied()
    }

    /// Run the insert-if-absent `insert` for `value` unless it is already
    /// known, and report whether a row was written.
    pub(crate) fn ensure(
        &mut self,
        core: &CoreProcessor,
        value: &str,
        insert: &str,
        values: &[&dyn ToSql],
    ) -> Result<bool> {
        if self.keys.contains_key(value) {
            return Ok(false);
        }

        let written = insert_if_absent(core, insert, values)?;
        let key = lookup_key(
            core,
            &format!(
                "SELECT CAST({} AS BIGINT) FROM {} WHERE CAST({} AS VARCHAR) = ?;",
                quote_ident(self.surrogate),
                self.table,
                quote_ident(self.natural)
            ),
            params![value],
        )?;
        if let Some(key) = key {
            self.keys.insert(value.to_string(), key);
        }
        Ok(written)
    }
}

pub(crate) fn date_keys(core: &CoreProcessor) -> Result<DimensionKeys> {
    DimensionKeys::load(core, DATE_DIMENSION, "date", "date_id")
}

pub(crate) fn ensure_date(core: &CoreProcessor, dates: &mut DimensionKeys, date: &NaiveDate) -> Result<bool> {
    let table = core.qualified_table(DATE_DIMENSION);
    let iso = to_iso(date);
    dates.ensure(
        core,
        &iso,
        &format!(
            "INSERT INTO {table} (\"date\", day, month, year)
             SELECT CAST(? AS DATE), CAST(? AS INTEGER), CAST(? AS INTEGER), CAST(? AS INTEGER)
             WHERE NOT EXISTS (SELECT 1 FROM {table} WHERE \"date\" = CAST(? AS DATE));",
            table = table
        ),
        params![iso, date.day() as i32, date.month() as i32, date.year(), iso],
    )
}

/// Rebuild a date read back from a snapshot as `YYYY-MM-DD` text.
pub(crate) fn parse_iso_date(value: Option<String>) -> Option<NaiveDate> {
    value.and_then(|v| NaiveDate::parse_from_str(&v, "%Y-%m-%d").ok())
}
