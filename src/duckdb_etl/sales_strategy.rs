use std::collections::HashSet;
use std::path::Path;

use chrono::NaiveDate;
use duckdb::params;

use crate::dataset::Dataset;
use crate::dates::to_iso;
use crate::duckdb_etl::core_processor::{path_literal, CoreProcessor};
use crate::duckdb_etl::warehouse_loader::{
    create_date_dimension, date_keys, ensure_date, guard_row, insert_if_absent, parse_iso_date,
    skip_row, DimensionKeys, LoadReport, WarehouseLoader,
};
use crate::error::Result;

const CUSTOMER: &str = "dim_customer";
const PRODUCT: &str = "dim_product";
const FACT: &str = "fact_sales";

/// Star schema for order lines: date, customer and product dimensions
/// around `fact_sales`, keyed by (order_id, order_line).
pub struct SalesStarSchema;

#[derive(Debug)]
struct SalesRow {
    order_id: Option<String>,
    order_line: Option<i64>,
    order_date: Option<NaiveDate>,
    customer_id: Option<String>,
    customer_name: Option<String>,
    product_id: Option<String>,
    product_name: Option<String>,
    quantity: Option<i64>,
    unit_price: Option<String>,
    customer_city: Option<String>,
    product_category: Option<String>,
    processed_at: Option<String>,
}

impl SalesRow {
    fn label(&self, index: usize) -> String {
        match (&self.order_id, self.order_line) {
            (Some(order_id), Some(line)) => format!("order {} line {}", order_id, line),
            _ => format!("sales row {}", index + 1),
        }
    }
}

fn read_rows(core: &CoreProcessor, transformed_path: &Path) -> Result<Vec<SalesRow>> {
    let mut stmt = core.conn().prepare(&format!(
        "SELECT order_id, order_line, CAST(order_date AS VARCHAR), customer_id, customer_name,
                product_id, product_name, quantity, CAST(unit_price AS VARCHAR),
                customer_city, product_category, CAST(processed_at AS VARCHAR)
         FROM read_parquet({});",
        path_literal(transformed_path)
    ))?;
    let rows = stmt
        .query_map([], |row| {
            Ok(SalesRow {
                order_id: row.get(0)?,
                order_line: row.get(1)?,
                order_date: parse_iso_date(row.get(2)?),
                customer_id: row.get(3)?,
                customer_name: row.get(4)?,
                product_id: row.get(5)?,
                product_name: row.get(6)?,
                quantity: row.get(7)?,
                unit_price: row.get(8)?,
                customer_city: row.get(9)?,
                product_category: row.get(10)?,
                processed_at: row.get(11)?,
            })
        })?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(rows)
}

// Key maps of every sales dimension
struct SalesKeys {
    dates: DimensionKeys,
    customers: DimensionKeys,
    products: DimensionKeys,
}

impl SalesKeys {
    fn load(core: &CoreProcessor) -> Result<Self> {
        Ok(Self {
            dates: date_keys(core)?,
            customers: DimensionKeys::load(core, CUSTOMER, "customer_id", "customer_key")?,
            products: DimensionKeys::load(core, PRODUCT, "product_id", "product_key")?,
        })
    }
}

// (order_id, order_line) pairs already in the fact table
fn existing_facts(core: &CoreProcessor) -> Result<HashSet<(String, i64)>> {
    let mut stmt = core.conn().prepare(&format!(
        "SELECT order_id, CAST(order_line AS BIGINT) FROM {};",
        core.qualified_table(FACT)
    ))?;
    let facts = stmt
        .query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?)))?
        .collect::<std::result::Result<HashSet<_>, _>>()?;
    Ok(facts)
}

impl SalesStarSchema {
    fn load_row_dimensions(
        &self,
        core: &CoreProcessor,
        keys: &mut SalesKeys,
        row: &SalesRow,
        inserted: &mut usize,
    ) -> Result<()> {
        if let Some(date) = &row.order_date {
            *inserted += ensure_date(core, &mut keys.dates, date)? as usize;
        }

        if let Some(customer_id) = &row.customer_id {
            let table = core.qualified_table(CUSTOMER);
            *inserted += keys.customers.ensure(
                core,
                customer_id,
                &format!(
                    "INSERT INTO {table} (customer_id, customer_name, city)
                     SELECT CAST(? AS VARCHAR), CAST(? AS VARCHAR), CAST(? AS VARCHAR)
                     WHERE NOT EXISTS (SELECT 1 FROM {table} WHERE customer_id = CAST(? AS VARCHAR));",
                    table = table
                ),
                params![customer_id, row.customer_name, row.customer_city, customer_id],
            )? as usize;
        }

        if let Some(product_id) = &row.product_id {
            let table = core.qualified_table(PRODUCT);
            *inserted += keys.products.ensure(
                core,
                product_id,
                &format!(
                    "INSERT INTO {table} (product_id, product_name, category)
                     SELECT CAST(? AS VARCHAR), CAST(? AS VARCHAR), CAST(? AS VARCHAR)
                     WHERE NOT EXISTS (SELECT 1 FROM {table} WHERE product_id = CAST(? AS VARCHAR));",
                    table = table
                ),
                params![product_id, row.product_name, row.product_category, product_id],
            )? as usize;
        }
        Ok(())
    }

    fn load_row_facts(
        &self,
        core: &CoreProcessor,
        keys: &SalesKeys,
        existing: &mut HashSet<(String, i64)>,
        row: &SalesRow,
        label: &str,
        report: &mut LoadReport,
    ) -> Result<()> {
        let (Some(order_id), Some(order_line)) = (&row.order_id, row.order_line) else {
            skip_row(report, label, "missing order id or line");
            return Ok(());
        };
        let Some(order_date) = &row.order_date else {
            skip_row(report, label, "missing order date");
            return Ok(());
        };
        let Some(date_id) = keys.dates.get(&to_iso(order_date)) else {
            skip_row(report, label, "date not found in dim_date");
            return Ok(());
        };
        let Some(customer_key) = row.customer_id.as_deref().and_then(|id| keys.customers.get(id)) else {
            skip_row(report, label, "customer not found in dim_customer");
            return Ok(());
        };
        let Some(product_key) = row.product_id.as_deref().and_then(|id| keys.products.get(id)) else {
            skip_row(report, label, "product not found in dim_product");
            return Ok(());
        };

        let fact_key = (order_id.clone(), order_line);
        if existing.contains(&fact_key) {
            report.fact_rows_existing += 1;
            return Ok(());
        }

        // amount is computed in DECIMAL; a value too wide for the column is a
        // conversion error that rejects this row
        let table = core.qualified_table(FACT);
        let written = insert_if_absent(
            core,
            &format!(
                "INSERT INTO {table}
                    (order_id, order_line, date_id, customer_key, product_key, quantity, unit_price, amount, processed_at)
                 SELECT CAST(? AS VARCHAR), CAST(? AS INTEGER), CAST(? AS INTEGER), CAST(? AS INTEGER),
                        CAST(? AS INTEGER), CAST(? AS INTEGER), CAST(? AS DECIMAL(12,2)),
                        CAST(CAST(? AS BIGINT) * CAST(? AS DECIMAL(12,2)) AS DECIMAL(12,2)),
                        CAST(? AS TIMESTAMP)
                 WHERE NOT EXISTS (
                    SELECT 1 FROM {table}
                    WHERE order_id = CAST(? AS VARCHAR) AND order_line = CAST(? AS INTEGER)
                 );",
                table = table
            ),
            params![
                order_id,
                order_line,
                date_id,
                customer_key,
                product_key,
                row.quantity,
                row.unit_price,
                row.quantity,
                row.unit_price,
                row.processed_at,
                order_id,
                order_line
            ],
        )?;
        existing.insert(fact_key);
        if written {
            report.fact_rows_inserted += 1;
        } else {
            report.fact_rows_existing += 1;
        }
        Ok(())
    }
}

impl WarehouseLoader for SalesStarSchema {
    fn fact_table(&self) -> &'static str {
        FACT
    }

    fn dataset(&self) -> Dataset {
        Dataset::Sales
    }

    fn create_tables(&self, core: &CoreProcessor) -> Result<()> {
        create_date_dimension(core)?;

        let key = core.surrogate_key_column(CUSTOMER, "customer_key")?;
        core.execute_warehouse_ddl(&format!(
            "CREATE TABLE IF NOT EXISTS {} (
                {},
                customer_id TEXT UNIQUE NOT NULL,
                customer_name TEXT NOT NULL,
                city TEXT
            );",
            core.native_table(CUSTOMER),
            key
        ))?;

        let key = core.surrogate_key_column(PRODUCT, "product_key")?;
        core.execute_warehouse_ddl(&format!(
            "CREATE TABLE IF NOT EXISTS {} (
                {},
                product_id TEXT UNIQUE NOT NULL,
                product_name TEXT NOT NULL,
                category TEXT
            );",
            core.native_table(PRODUCT),
            key
        ))?;

        core.execute_warehouse_ddl(&format!(
            "CREATE TABLE IF NOT EXISTS {} (
                order_id TEXT NOT NULL,
                order_line INTEGER NOT NULL,
                date_id INTEGER NOT NULL,
                customer_key INTEGER NOT NULL,
                product_key INTEGER NOT NULL,
                quantity INTEGER,
                unit_price DECIMAL(12,2),
                amount DECIMAL(12,2),
                processed_at TIMESTAMP,
                PRIMARY KEY (order_id, order_line)
            );",
            core.native_table(FACT)
        ))
    }

    fn load_dimensions(
        &self,
        core: &CoreProcessor,
        transformed_path: &Path,
        report: &mut LoadReport,
    ) -> Result<()> {
        let mut keys = SalesKeys::load(core)?;
        for (index, row) in read_rows(core, transformed_path)?.iter().enumerate() {
            let mut inserted = 0;
            let outcome = self.load_row_dimensions(core, &mut keys, row, &mut inserted);
            report.dimension_rows_inserted += inserted;
            guard_row(report, &row.label(index), outcome)?;
        }
        Ok(())
    }

    fn load_facts(
        &self,
        core: &CoreProcessor,
        transformed_path: &Path,
        report: &mut LoadReport,
    ) -> Result<()> {
        let keys = SalesKeys::load(core)?;
        let mut existing = existing_facts(core)?;
        for (index, row) in read_rows(core, transformed_path)?.iter().enumerate() {
            let label = row.label(index);
            let outcome = self.load_row_facts(core, &keys, &mut existing, row, &label, report);
            guard_row(report, &label, outcome)?;
        }
        Ok(())
    }
}
