use duckdb::Connection;
use log::{info, warn};

use crate::duckdb_etl::core_processor::quote_ident;
use crate::error::Result;

#[derive(Debug, Clone, PartialEq)]
pub struct ColumnProfile {
    pub column: String,
    pub null_count: usize,
    pub null_percent: f64,
}

/// Count nulls per column of `table`. Columns above `warn_percent` are
/// reported at warn level, the rest at info.
pub fn profile_nulls(
    conn: &Connection,
    table: &str,
    columns: &[&str],
    warn_percent: f64,
) -> Result<Vec<ColumnProfile>> {
    if columns.is_empty() {
        return Ok(Vec::new());
    }

    let counts = columns
        .iter()
        .map(|column| format!("count({})", quote_ident(column)))
        .collect::<Vec<_>>()
        .join(", ");
    let query = format!("SELECT count(*), {} FROM {};", counts, table);

    let mut stmt = conn.prepare(&query)?;
    let mut rows = stmt.query([])?;
    let Some(row) = rows.next()? else {
        return Ok(Vec::new());
    };

    let total: i64 = row.get(0)?;
    let mut profiles = Vec::with_capacity(columns.len());
    for (i, column) in columns.iter().enumerate() {
        let non_null: i64 = row.get(i + 1)?;
        let null_count = (total - non_null) as usize;
        let null_percent = if total == 0 {
            0.0
        } else {
            null_count as f64 * 100.0 / total as f64
        };

        if null_count > 0 {
            if null_percent > warn_percent {
                warn!(column = *column, null_count = null_count, null_percent = null_percent; "Null share above threshold");
            } else {
                info!(column = *column, null_count = null_count, null_percent = null_percent; "Column has null values");
            }
        }

        profiles.push(ColumnProfile {
            column: column.to_string(),
            null_count,
            null_percent,
        });
    }

    Ok(profiles)
}
