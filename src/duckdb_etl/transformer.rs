use std::path::Path;

use chrono::NaiveDateTime;
use duckdb::params;
use log::{info, warn};

use crate::dataset::{ColumnKind, ColumnSpec, Dataset};
use crate::dates::{parse_date, to_iso};
use crate::duckdb_etl::core_processor::{path_literal, quote_ident, sql_literal, CoreProcessor};
use crate::duckdb_etl::extractor::{check_required_columns, prepare_output_path};
use crate::duckdb_etl::quality::{profile_nulls, ColumnProfile};
use crate::error::Result;

/// Name of the column stamped on every transformed row.
pub const PROCESSED_AT_COLUMN: &str = "processed_at";

/// What a transformation did to the staged snapshot.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TransformReport {
    pub input_rows: usize,
    pub duplicates_removed: usize,
    pub invalid_dates: usize,
    pub invalid_values: usize,
    pub output_rows: usize,
    pub null_profile: Vec<ColumnProfile>,
}

/// Cleans a staged snapshot into the transformed snapshot.
pub struct Transformer<'a> {
    core: &'a CoreProcessor,
    dataset: Dataset,
    null_warn_percent: f64,
}

impl<'a> Transformer<'a> {
    pub fn new(core: &'a CoreProcessor, dataset: Dataset, null_warn_percent: f64) -> Self {
        Self {
            core,
            dataset,
            null_warn_percent,
        }
    }

    /// Dedup, normalise, coerce, parse dates and stamp `processed_at`.
    pub fn transform(
        &self,
        staging_path: &Path,
        transformed_path: &Path,
        processed_at: NaiveDateTime,
    ) -> Result<TransformReport> {
        let mut report = TransformReport::default();

        self.core.conn().execute(
            &format!(
                "CREATE OR REPLACE TEMP TABLE staged AS SELECT * FROM read_parquet({}, file_row_number = true);",
                path_literal(staging_path)
            ),
            [],
        )?;
        let staged_columns = self.core.table_columns("staged")?;
        check_required_columns(
            self.dataset,
            &staging_path.display().to_string(),
            &staged_columns,
        )?;
        report.input_rows = self.count("staged")?;

        self.normalize_text(&staged_columns)?;
        self.drop_duplicates()?;
        let deduped_rows = self.count("deduped")?;
        report.duplicates_removed = report.input_rows - deduped_rows;
        if report.duplicates_removed > 0 {
            info!(dataset = self.dataset.to_string().as_str(), duplicates = report.duplicates_removed; "Duplicate rows dropped");
        }

        report.invalid_values = self.count_invalid_values()?;
        report.invalid_dates = self.build_date_lookup()?;
        self.build_transformed(processed_at)?;
        report.output_rows = self.count("transformed")?;

        let mut profiled: Vec<&str> = self.dataset.columns().iter().map(|c| c.name).collect();
        profiled.push(PROCESSED_AT_COLUMN);
        report.null_profile = profile_nulls(
            self.core.conn(),
            "transformed",
            &profiled,
            self.null_warn_percent,
        )?;

        prepare_output_path(transformed_path)?;
        self.core.conn().execute(
            &format!(
                "COPY transformed TO {} (FORMAT PARQUET);",
                path_literal(transformed_path)
            ),
            [],
        )?;

        info!(
            transformed_file = transformed_path.display().to_string().as_str(),
            rows = report.output_rows,
            invalid_dates = report.invalid_dates,
            invalid_values = report.invalid_values;
            "Data transformed and saved"
        );
        Ok(report)
    }

    fn count(&self, table: &str) -> Result<usize> {
        let rows: i64 = self.core.conn().query_row(
            &format!("SELECT count(*) FROM {};", table),
            [],
            |row| row.get(0),
        )?;
        Ok(rows as usize)
    }

    // Collapse whitespace, trim and turn blanks into NULL. Optional columns
    // absent from the source become NULL columns, unknown columns are dropped.
    fn normalize_text(&self, staged_columns: &[String]) -> Result<()> {
        let mut projections = vec!["file_row_number".to_string()];
        for column in self.dataset.columns() {
            let ident = quote_ident(column.name);
            if staged_columns.iter().any(|staged| staged == column.name) {
                projections.push(format!(
                    "NULLIF(trim(regexp_replace(CAST({} AS VARCHAR), '\\s+', ' ', 'g')), '') AS {}",
                    ident, ident
                ));
            } else {
                projections.push(format!("CAST(NULL AS VARCHAR) AS {}", ident));
            }
        }

        self.core.conn().execute(
            &format!(
                "CREATE OR REPLACE TEMP TABLE normalized AS SELECT {} FROM staged;",
                projections.join(", ")
            ),
            [],
        )?;
        Ok(())
    }

    // First occurrence of each key wins. Keys are compared as they will be
    // written: normalised text, typed numbers.
    fn drop_duplicates(&self) -> Result<()> {
        let keys = self
            .dataset
            .natural_key()
            .iter()
            .map(|key| {
                let ident = quote_ident(key);
                self.dataset
                    .columns()
                    .iter()
                    .find(|column| column.name == *key)
                    .and_then(|column| coerced_expression(column, &ident))
                    .unwrap_or(ident)
            })
            .collect::<Vec<_>>()
            .join(", ");
        self.core.conn().execute(
            &format!(
                "CREATE OR REPLACE TEMP TABLE deduped AS
                 SELECT * FROM normalized
                 QUALIFY row_number() OVER (PARTITION BY {} ORDER BY file_row_number) = 1;",
                keys
            ),
            [],
        )?;
        Ok(())
    }

    // Values that will not survive coercion are counted and reported per column
    fn count_invalid_values(&self) -> Result<usize> {
        let mut total = 0;
        for column in self.dataset.columns() {
            let Some(typed) = coerced_expression(column, &quote_ident(column.name)) else {
                continue;
            };
            let invalid: i64 = self.core.conn().query_row(
                &format!(
                    "SELECT count(*) FROM deduped WHERE {} IS NOT NULL AND ({}) IS NULL;",
                    quote_ident(column.name),
                    typed
                ),
                [],
                |row| row.get(0),
            )?;
            if invalid > 0 {
                warn!(
                    column = column.name,
                    expected = column.kind.sql_type(),
                    rows = invalid;
                    "Malformed values set to null"
                );
                total += invalid as usize;
            }
        }
        Ok(total)
    }

    // Parse every distinct date string once and keep the parsed ones in a
    // lookup table. Returns the number of rows whose date was rejected.
    fn build_date_lookup(&self) -> Result<usize> {
        let conn = self.core.conn();
        conn.execute_batch(
            "CREATE OR REPLACE TEMP TABLE date_lookup (column_name VARCHAR, raw VARCHAR, parsed DATE);",
        )?;

        let mut invalid_rows = 0;
        let mut insert = conn.prepare("INSERT INTO date_lookup VALUES (?, ?, CAST(? AS DATE));")?;
        for column in self.dataset.columns_of_kind(ColumnKind::Date) {
            let ident = quote_ident(column.name);
            let mut stmt = conn.prepare(&format!(
                "SELECT {}, count(*) FROM deduped WHERE {} IS NOT NULL GROUP BY {} ORDER BY {};",
                ident, ident, ident, ident
            ))?;
            let values = stmt
                .query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?)))?
                .collect::<std::result::Result<Vec<_>, _>>()?;

            for (raw, rows) in values {
                match parse_date(&raw) {
                    Some(date) => {
                        insert.execute(params![column.name, raw, to_iso(&date)])?;
                    }
                    None => {
                        warn!(column = column.name, value = raw.as_str(), rows = rows; "Unparseable date set to null");
                        invalid_rows += rows as usize;
                    }
                }
            }
        }
        Ok(invalid_rows)
    }

    fn build_transformed(&self, processed_at: NaiveDateTime) -> Result<()> {
        let mut projections = Vec::new();
        let mut joins = Vec::new();

        for (i, column) in self.dataset.columns().iter().enumerate() {
            let ident = quote_ident(column.name);
            let source = format!("n.{}", ident);
            let expression = match column.kind {
                ColumnKind::Date => {
                    let alias = format!("d{}", i);
                    joins.push(format!(
                        "LEFT JOIN date_lookup {alias} ON {alias}.column_name = {} AND {alias}.raw = {}",
                        sql_literal(column.name),
                        source,
                        alias = alias
                    ));
                    format!("{}.parsed", alias)
                }
                _ => coerced_expression(column, &source).unwrap_or(source),
            };
            projections.push(format!("{} AS {}", expression, ident));
        }

        let timestamp = processed_at.format("%Y-%m-%d %H:%M:%S%.6f").to_string();
        projections.push(format!(
            "TIMESTAMP {} AS {}",
            sql_literal(&timestamp),
            PROCESSED_AT_COLUMN
        ));

        self.core.conn().execute(
            &format!(
                "CREATE OR REPLACE TEMP TABLE transformed AS
                 SELECT {}
                 FROM deduped n
                 {}
                 ORDER BY n.file_row_number;",
                projections.join(", "),
                joins.join("\n")
            ),
            [],
        )?;
        Ok(())
    }
}

// Typed expression for columns that need coercion, `None` for text and dates
fn coerced_expression(column: &ColumnSpec, source: &str) -> Option<String> {
    match column.kind {
        ColumnKind::Integer | ColumnKind::Decimal => Some(format!(
            "TRY_CAST({} AS {})",
            source,
            column.kind.sql_type()
        )),
        ColumnKind::Flag => Some(format!(
            "CASE WHEN lower({s}) IN ('yes', 'y', 'true', '1') THEN true \
             WHEN lower({s}) IN ('no', 'n', 'false', '0') THEN false END",
            s = source
        )),
        ColumnKind::Text | ColumnKind::Date => None,
    }
}
