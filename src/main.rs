use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use log::{error, info};

use duckdb_warehouse::logging::setup_logging;
use duckdb_warehouse::{Pipeline, PipelineConfig};

/// Extract a raw source, clean it and load it into the star-schema warehouse
#[derive(Parser, Debug)]
#[command(name = "duckdb-warehouse")]
#[command(version, about, long_about = None)]
struct Cli {
    /// Pipeline configuration file
    #[arg(short, long, default_value = "config/pipeline.yml")]
    config: PathBuf,
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let config = match PipelineConfig::load(&cli.config) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Failed to load configuration '{}': {}", cli.config.display(), e);
            return ExitCode::FAILURE;
        }
    };

    if let Err(e) = setup_logging(&config.log_path(), &config.log) {
        eprintln!("Failed to set up logging: {}", e);
        return ExitCode::FAILURE;
    }
    info!(config = cli.config.display().to_string().as_str(); "Configuration loaded");

    match Pipeline::new(config).run() {
        Ok(summary) => {
            info!(
                staged_rows = summary.staged_rows,
                duplicates_removed = summary.transform.duplicates_removed,
                invalid_dates = summary.transform.invalid_dates,
                dimension_rows_inserted = summary.load.dimension_rows_inserted,
                fact_rows_inserted = summary.load.fact_rows_inserted,
                rows_skipped = summary.load.rows_skipped,
                rows_rejected = summary.load.rows_rejected;
                "ETL run completed"
            );
            ExitCode::SUCCESS
        }
        Err(e) => {
            error!(error = e.to_string().as_str(); "ETL run aborted");
            eprintln!("ETL run aborted: {}", e);
            ExitCode::FAILURE
        }
    }
}
