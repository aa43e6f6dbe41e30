#![allow(dead_code)]

use std::path::{Path, PathBuf};

use duckdb::Connection;
use duckdb_warehouse::config::{LogConfig, QualityConfig, SourceLocator, WarehouseConfig};
use duckdb_warehouse::dataset::Dataset;
use duckdb_warehouse::PipelineConfig;

pub const NEWS_CSV: &str = "\
title,description,url,category,updated,source_category,tags,live,in_pagination
\"  Budget   vote  \",Parliament debates the budget,https://bbc.co.uk/news/1,politics,03-04-2024,uk,\"politics, economy\",No,Yes
Storm hits coast,Heavy rain expected,https://bbc.co.uk/news/2,weather,2024-04-05,uk,,Yes,No
Budget vote (repeat),Duplicate entry,https://bbc.co.uk/news/1 ,politics,03-04-2024,uk,politics,No,Yes
Match report,Late winner,https://bbc.co.uk/news/3,sport,not-a-date,,football,No,No
";

pub const SALES_CSV: &str = "\
order_id,order_line,order_date,customer_id,customer_name,product_id,product_name,quantity,unit_price,customer_city
SO-1,1,01-03-2024,C-1,Ana Lima,P-1,Notebook,2,10.50,Lisbon
SO-1,2,01-03-2024,C-1,Ana Lima,P-2,Pen,three,1.25,Lisbon
SO-2,1,2024-03-02,C-2,Ben Ode,P-1,Notebook,1,10.50,Lagos
SO-1,1,01-03-2024,C-1,Ana Lima,P-1,Notebook,2,10.50,Lisbon
";

pub fn write_file(dir: &Path, name: &str, content: &str) -> PathBuf {
    let path = dir.join(name);
    std::fs::write(&path, content).unwrap();
    path
}

pub fn warehouse_path(dir: &Path) -> PathBuf {
    dir.join("warehouse.duckdb")
}

pub fn duckdb_warehouse(dir: &Path) -> WarehouseConfig {
    WarehouseConfig::Duckdb {
        path: warehouse_path(dir),
        schema: "main".to_string(),
    }
}

pub fn pipeline_config(dir: &Path, dataset: Dataset, source: PathBuf) -> PipelineConfig {
    PipelineConfig {
        base_path: dir.to_path_buf(),
        dataset,
        source: SourceLocator::File(source),
        staging_file: PathBuf::from("processed/staging_data.parquet"),
        transformed_file: PathBuf::from("processed/transformed_data.parquet"),
        log: LogConfig::default(),
        quality: QualityConfig::default(),
        warehouse: duckdb_warehouse(dir),
    }
}

pub fn count(conn: &Connection, query: &str) -> i64 {
    conn.query_row(query, [], |row| row.get(0)).unwrap()
}

pub fn strings(conn: &Connection, query: &str) -> Vec<Option<String>> {
    let mut stmt = conn.prepare(query).unwrap();
    stmt.query_map([], |row| row.get(0))
        .unwrap()
        .collect::<Result<Vec<_>, _>>()
        .unwrap()
}
