use std::fs::create_dir_all;
use std::path::Path;

use duckdb::Connection;
use log::{debug, info};

use crate::config::WarehouseConfig;
use crate::error::{EtlError, Result};

/// Catalog alias of the attached PostgreSQL warehouse.
pub const WAREHOUSE_ALIAS: &str = "warehouse";

// Main processor struct that owns the run's single DuckDB connection
pub struct CoreProcessor {
    conn: Connection,
    warehouse: WarehouseConfig,
}

// The CoreProcessor holds what every stage shares: the connection, the
// attached warehouse and the rules for naming and creating warehouse tables.
impl CoreProcessor {
    // Open the connection and attach the warehouse
    pub fn connect(warehouse: &WarehouseConfig) -> Result<Self> {
        let conn = match warehouse {
            WarehouseConfig::Postgres { host, database, .. } => {
                let conn = Connection::open_in_memory()
                    .map_err(|e| EtlError::Connection(e.to_string()))?;
                conn.execute_batch("INSTALL postgres; LOAD postgres;")
                    .map_err(|e| EtlError::Connection(format!("postgres extension: {}", e)))?;

                let uri = warehouse.postgres_uri().unwrap_or_default();
                conn.execute(
                    &format!(
                        "ATTACH {} AS {} (TYPE POSTGRES)",
                        sql_literal(&uri),
                        WAREHOUSE_ALIAS
                    ),
                    [],
                )
                .map_err(|e| {
                    EtlError::Connection(format!("{} on {}: {}", database, host, e))
                })?;
                info!(host = host.as_str(), database = database.as_str(); "Attached PostgreSQL warehouse");
                conn
            }
            WarehouseConfig::Duckdb { path, .. } => {
                if let Some(parent) = path.parent() {
                    if !parent.as_os_str().is_empty() {
                        create_dir_all(parent)?;
                    }
                }
                let conn = Connection::open(path).map_err(|e| {
                    EtlError::Connection(format!("{}: {}", path.display(), e))
                })?;
                info!(path = path.display().to_string().as_str(); "Opened DuckDB warehouse");
                conn
            }
        };

        Ok(Self {
            conn,
            warehouse: warehouse.clone(),
        })
    }

    pub fn conn(&self) -> &Connection {
        &self.conn
    }

    pub fn schema(&self) -> &str {
        self.warehouse.schema()
    }

    pub fn is_postgres(&self) -> bool {
        matches!(self.warehouse, WarehouseConfig::Postgres { .. })
    }

    // Table name as seen by the warehouse itself, used inside DDL
    pub fn native_table(&self, table: &str) -> String {
        format!("{}.{}", quote_ident(self.schema()), quote_ident(table))
    }

    // Table name as seen from the DuckDB connection
    pub fn qualified_table(&self, table: &str) -> String {
        if self.is_postgres() {
            format!("{}.{}", WAREHOUSE_ALIAS, self.native_table(table))
        } else {
            self.native_table(table)
        }
    }

    // Run DDL directly inside the warehouse
    pub fn execute_warehouse_ddl(&self, sql: &str) -> Result<()> {
        debug!(sql = sql; "Executing warehouse DDL");
        if self.is_postgres() {
            self.conn.execute(
                &format!(
                    "CALL postgres_execute('{}', {});",
                    WAREHOUSE_ALIAS,
                    sql_literal(sql)
                ),
                [],
            )?;
            // DDL ran behind DuckDB's back, refresh the attached catalog
            self.conn.execute("CALL pg_clear_cache();", [])?;
        } else {
            self.conn.execute_batch(sql)?;
        }
        Ok(())
    }

    // Create the schema
    pub fn create_schema(&self) -> Result<()> {
        self.execute_warehouse_ddl(&format!(
            "CREATE SCHEMA IF NOT EXISTS {};",
            quote_ident(self.schema())
        ))
    }

    // Column definition for an auto-generated surrogate key
    pub fn surrogate_key_column(&self, table: &str, column: &str) -> Result<String> {
        if self.is_postgres() {
            return Ok(format!("{} SERIAL PRIMARY KEY", quote_ident(column)));
        }

        let sequence = format!("seq_{}", table);
        self.execute_warehouse_ddl(&format!(
            "CREATE SEQUENCE IF NOT EXISTS {}.{};",
            quote_ident(self.schema()),
            quote_ident(&sequence)
        ))?;
        Ok(format!(
            "{} INTEGER PRIMARY KEY DEFAULT nextval('{}.{}')",
            quote_ident(column),
            self.schema(),
            sequence
        ))
    }

    // Count the rows of a warehouse table
    pub fn count_rows(&self, table: &str) -> Result<i64> {
        let query = format!("SELECT count(*) FROM {};", self.qualified_table(table));
        let count = self.conn.query_row(&query, [], |row| row.get(0))?;
        Ok(count)
    }

    // Column names of a table visible to the connection, in order
    pub fn table_columns(&self, table: &str) -> Result<Vec<String>> {
        let mut stmt = self.conn.prepare(&format!("DESCRIBE {};", table))?;
        let mut rows = stmt.query([])?;
        let mut columns = Vec::new();
        while let Some(row) = rows.next()? {
            let column_name: String = row.get(0)?;
            columns.push(column_name);
        }
        Ok(columns)
    }

    // Release the connection
    pub fn close(self) -> Result<()> {
        self.conn.close().map_err(|(_, e)| EtlError::from(e))?;
        info!("Warehouse connection closed");
        Ok(())
    }
}

/// Quote a string as a SQL literal.
pub fn sql_literal(value: &str) -> String {
    format!("'{}'", value.replace('\'', "''"))
}

/// Quote a SQL identifier.
pub fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

/// Quote a filesystem path as a SQL literal.
pub fn path_literal(path: &Path) -> String {
    sql_literal(&path.to_string_lossy())
}
