mod common;

use chrono::{NaiveDate, NaiveDateTime};
use duckdb::Connection;
use duckdb_warehouse::config::{SourceLocator, WarehouseConfig};
use duckdb_warehouse::dataset::Dataset;
use duckdb_warehouse::{EtlError, Pipeline};

use common::{count, pipeline_config, strings, warehouse_path, write_file, NEWS_CSV, SALES_CSV};

fn run_time() -> NaiveDateTime {
    NaiveDate::from_ymd_opt(2024, 4, 10)
        .unwrap()
        .and_hms_opt(12, 30, 0)
        .unwrap()
}

#[cfg(test)]
mod news_pipeline_tests {
    use super::*;

    #[test]
    fn test_news_feed_loads_star_schema() {
        let dir = tempfile::tempdir().unwrap();
        let csv = write_file(dir.path(), "bbc_news.csv", NEWS_CSV);
        let pipeline = Pipeline::new(pipeline_config(dir.path(), Dataset::News, csv));

        let summary = pipeline.run_at(run_time()).unwrap();

        assert_eq!(summary.staged_rows, 4);
        assert_eq!(summary.transform.duplicates_removed, 1);
        assert_eq!(summary.transform.invalid_dates, 1);
        assert_eq!(summary.transform.output_rows, 3);
        // two tags for the budget story, one untagged row for the storm
        assert_eq!(summary.load.fact_rows_inserted, 3);
        assert_eq!(summary.load.fact_rows_existing, 0);
        // the match report has no usable date
        assert_eq!(summary.load.rows_skipped, 1);
        assert_eq!(summary.load.rows_rejected, 0);
        assert!(dir.path().join("processed/staging_data.parquet").exists());
        assert!(dir.path().join("processed/transformed_data.parquet").exists());

        let conn = Connection::open(warehouse_path(dir.path())).unwrap();
        assert_eq!(count(&conn, "SELECT count(*) FROM main.dim_article"), 3);
        assert_eq!(count(&conn, "SELECT count(*) FROM main.dim_date"), 2);
        assert_eq!(count(&conn, "SELECT count(*) FROM main.fact_news"), 3);
        assert_eq!(
            count(&conn, "SELECT count(*) FROM main.fact_news WHERE tag_id IS NULL"),
            1
        );
        assert_eq!(
            strings(&conn, "SELECT name FROM main.dim_tag ORDER BY name"),
            vec![
                Some("economy".to_string()),
                Some("football".to_string()),
                Some("politics".to_string()),
            ]
        );
        assert_eq!(
            strings(
                &conn,
                "SELECT title FROM main.dim_article WHERE url = 'https://bbc.co.uk/news/1'"
            ),
            vec![Some("Budget vote".to_string())]
        );
        assert_eq!(
            strings(
                &conn,
                "SELECT DISTINCT CAST(processed_at AS VARCHAR) FROM main.fact_news"
            ),
            vec![Some("2024-04-10 12:30:00".to_string())]
        );
    }

    #[test]
    fn test_second_run_inserts_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let csv = write_file(dir.path(), "bbc_news.csv", NEWS_CSV);
        let pipeline = Pipeline::new(pipeline_config(dir.path(), Dataset::News, csv));

        let first = pipeline.run_at(run_time()).unwrap();
        let second = pipeline.run().unwrap();

        assert!(first.load.dimension_rows_inserted > 0);
        assert_eq!(second.load.dimension_rows_inserted, 0);
        assert_eq!(second.load.fact_rows_inserted, 0);
        assert_eq!(second.load.fact_rows_existing, 3);

        let conn = Connection::open(warehouse_path(dir.path())).unwrap();
        assert_eq!(count(&conn, "SELECT count(*) FROM main.dim_article"), 3);
        assert_eq!(count(&conn, "SELECT count(*) FROM main.dim_category"), 3);
        assert_eq!(count(&conn, "SELECT count(*) FROM main.fact_news"), 3);
        // first write wins, the second run's timestamp is not applied
        assert_eq!(
            strings(
                &conn,
                "SELECT DISTINCT CAST(processed_at AS VARCHAR) FROM main.fact_news"
            ),
            vec![Some("2024-04-10 12:30:00".to_string())]
        );
    }

    #[test]
    fn test_rejected_row_does_not_stop_the_load() {
        let dir = tempfile::tempdir().unwrap();
        let csv = write_file(
            dir.path(),
            "bbc_news.csv",
            "title,description,url,category,updated\n\
             ,No headline,https://bbc.co.uk/news/9,world,01-04-2024\n\
             Election called,Vote in June,https://bbc.co.uk/news/10,politics,02-04-2024\n",
        );
        let pipeline = Pipeline::new(pipeline_config(dir.path(), Dataset::News, csv));

        let summary = pipeline.run_at(run_time()).unwrap();

        assert_eq!(summary.load.rows_rejected, 1);
        assert_eq!(summary.load.rows_skipped, 1);
        assert_eq!(summary.load.fact_rows_inserted, 1);

        let conn = Connection::open(warehouse_path(dir.path())).unwrap();
        assert_eq!(
            strings(&conn, "SELECT url FROM main.dim_article"),
            vec![Some("https://bbc.co.uk/news/10".to_string())]
        );
        assert_eq!(count(&conn, "SELECT count(*) FROM main.fact_news"), 1);
    }

    #[test]
    fn test_missing_required_column_stops_before_loading() {
        let dir = tempfile::tempdir().unwrap();
        let csv = write_file(
            dir.path(),
            "bbc_news.csv",
            "title,description,url,updated\nA,a,https://x/1,01-04-2024\nB,b,https://x/2,02-04-2024\n",
        );
        let pipeline = Pipeline::new(pipeline_config(dir.path(), Dataset::News, csv));

        let err = pipeline.run_at(run_time()).unwrap_err();

        assert!(err.is_schema_error());
        assert!(err.to_string().contains("category"));
        assert!(!dir.path().join("processed/transformed_data.parquet").exists());
        let conn = Connection::open(warehouse_path(dir.path())).unwrap();
        assert_eq!(
            count(
                &conn,
                "SELECT count(*) FROM information_schema.tables WHERE table_name = 'fact_news'"
            ),
            0
        );
    }

    #[test]
    fn test_relative_source_resolves_against_base_path() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("raw")).unwrap();
        write_file(&dir.path().join("raw"), "bbc_news.csv", NEWS_CSV);
        let config = pipeline_config(
            dir.path(),
            Dataset::News,
            std::path::PathBuf::from("raw/bbc_news.csv"),
        );

        let summary = Pipeline::new(config).run_at(run_time()).unwrap();

        assert_eq!(summary.staged_rows, 4);
    }

    #[test]
    fn test_header_only_feed_runs_with_nothing_to_load() {
        let dir = tempfile::tempdir().unwrap();
        let csv = write_file(
            dir.path(),
            "bbc_news.csv",
            "title,description,url,category,updated,source_category,tags,live,in_pagination\n",
        );
        let pipeline = Pipeline::new(pipeline_config(dir.path(), Dataset::News, csv));

        let summary = pipeline.run_at(run_time()).unwrap();

        assert_eq!(summary.staged_rows, 0);
        assert_eq!(summary.transform.output_rows, 0);
        assert_eq!(summary.load.fact_rows_inserted, 0);
        let conn = Connection::open(warehouse_path(dir.path())).unwrap();
        assert_eq!(count(&conn, "SELECT count(*) FROM main.fact_news"), 0);
    }

    #[test]
    fn test_missing_source_file_fails_the_run() {
        let dir = tempfile::tempdir().unwrap();
        let config = pipeline_config(
            dir.path(),
            Dataset::News,
            dir.path().join("raw/not_there.csv"),
        );

        let err = Pipeline::new(config).run_at(run_time()).unwrap_err();

        assert!(matches!(err, EtlError::Io(_)));
    }

    #[test]
    fn test_unreachable_postgres_is_connection_error() {
        let dir = tempfile::tempdir().unwrap();
        let csv = write_file(dir.path(), "bbc_news.csv", NEWS_CSV);
        let mut config = pipeline_config(dir.path(), Dataset::News, csv);
        config.warehouse = WarehouseConfig::Postgres {
            host: "127.0.0.1".to_string(),
            port: 1,
            database: "warehouse".to_string(),
            user: "etl".to_string(),
            password: "secret".to_string(),
            schema: "public".to_string(),
        };

        let err = Pipeline::new(config).run_at(run_time()).unwrap_err();

        assert!(matches!(err, EtlError::Connection(_)));
        assert!(!dir.path().join("processed/staging_data.parquet").exists());
    }
}

#[cfg(test)]
mod sales_pipeline_tests {
    use super::*;

    #[test]
    fn test_sales_orders_load_star_schema() {
        let dir = tempfile::tempdir().unwrap();
        let csv = write_file(dir.path(), "sales.csv", SALES_CSV);
        let pipeline = Pipeline::new(pipeline_config(dir.path(), Dataset::Sales, csv));

        let summary = pipeline.run_at(run_time()).unwrap();

        assert_eq!(summary.staged_rows, 4);
        assert_eq!(summary.transform.duplicates_removed, 1);
        assert_eq!(summary.transform.invalid_values, 1);
        assert_eq!(summary.load.dimension_rows_inserted, 6);
        assert_eq!(summary.load.fact_rows_inserted, 3);

        let conn = Connection::open(warehouse_path(dir.path())).unwrap();
        assert_eq!(count(&conn, "SELECT count(*) FROM main.dim_customer"), 2);
        assert_eq!(count(&conn, "SELECT count(*) FROM main.dim_product"), 2);
        assert_eq!(count(&conn, "SELECT count(*) FROM main.fact_sales"), 3);
        assert_eq!(
            strings(
                &conn,
                "SELECT CAST(amount AS VARCHAR) FROM main.fact_sales
                 WHERE order_id = 'SO-1' AND order_line = 1"
            ),
            vec![Some("21.00".to_string())]
        );
        // the unparseable quantity leaves the amount empty
        assert_eq!(
            count(
                &conn,
                "SELECT count(*) FROM main.fact_sales WHERE quantity IS NULL AND amount IS NULL"
            ),
            1
        );
        assert_eq!(
            strings(
                &conn,
                "SELECT CAST(d.\"date\" AS VARCHAR) FROM main.fact_sales f
                 JOIN main.dim_date d ON d.date_id = f.date_id
                 WHERE f.order_id = 'SO-2'"
            ),
            vec![Some("2024-03-02".to_string())]
        );
    }

    #[test]
    fn test_values_too_wide_for_the_warehouse_reject_only_their_row() {
        let dir = tempfile::tempdir().unwrap();
        let csv = write_file(
            dir.path(),
            "sales.csv",
            "order_id,order_line,order_date,customer_id,customer_name,product_id,product_name,quantity,unit_price\n\
             SO-1,1,01-03-2024,C-1,Ana Lima,P-1,Notebook,2,10.50\n\
             SO-2,1,01-03-2024,C-1,Ana Lima,P-9,Yacht,5000,9999999.99\n\
             SO-3,3000000000,01-03-2024,C-1,Ana Lima,P-1,Notebook,1,10.50\n\
             SO-4,1,02-03-2024,C-1,Ana Lima,P-1,Notebook,1,10.50\n",
        );
        let pipeline = Pipeline::new(pipeline_config(dir.path(), Dataset::Sales, csv));

        let summary = pipeline.run_at(run_time()).unwrap();

        assert_eq!(summary.load.rows_rejected, 2);
        assert_eq!(summary.load.fact_rows_inserted, 2);
        let conn = Connection::open(warehouse_path(dir.path())).unwrap();
        assert_eq!(
            strings(&conn, "SELECT order_id FROM main.fact_sales ORDER BY order_id"),
            vec![Some("SO-1".to_string()), Some("SO-4".to_string())]
        );
    }

    #[test]
    fn test_sales_from_warehouse_table() {
        let dir = tempfile::tempdir().unwrap();
        {
            let conn = Connection::open(warehouse_path(dir.path())).unwrap();
            conn.execute_batch(&format!(
                "CREATE TABLE raw_sales AS SELECT * FROM read_csv('{}', header = true, all_varchar = true);",
                write_file(dir.path(), "sales.csv", SALES_CSV).display()
            ))
            .unwrap();
        }
        let mut config = pipeline_config(dir.path(), Dataset::Sales, dir.path().join("unused.csv"));
        config.source = SourceLocator::Table("raw_sales".to_string());

        let summary = Pipeline::new(config).run_at(run_time()).unwrap();

        assert_eq!(summary.staged_rows, 4);
        assert_eq!(summary.load.fact_rows_inserted, 3);
    }
}
