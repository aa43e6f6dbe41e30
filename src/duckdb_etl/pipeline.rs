use chrono::{NaiveDateTime, Utc};
use log::{error, info};

use crate::config::{PipelineConfig, SourceLocator};
use crate::duckdb_etl::core_processor::CoreProcessor;
use crate::duckdb_etl::extractor::Extractor;
use crate::duckdb_etl::transformer::{TransformReport, Transformer};
use crate::duckdb_etl::warehouse_loader::{loader_for, LoadReport};
use crate::error::Result;

/// Outcome of one extract, transform and load pass.
#[derive(Debug, Clone, PartialEq)]
pub struct RunSummary {
    pub staged_rows: usize,
    pub transform: TransformReport,
    pub load: LoadReport,
}

pub struct Pipeline {
    config: PipelineConfig,
}

impl Pipeline {
    pub fn new(config: PipelineConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Run every stage, stamping transformed rows with the current UTC time.
    pub fn run(&self) -> Result<RunSummary> {
        self.run_at(Utc::now().naive_utc())
    }

    /// Run every stage with an explicit processing timestamp.
    ///
    /// The warehouse connection is opened once and released on every path:
    /// dropped when a stage fails, closed explicitly on success.
    pub fn run_at(&self, processed_at: NaiveDateTime) -> Result<RunSummary> {
        let dataset = self.config.dataset;
        info!(dataset = dataset.to_string().as_str(); "Starting ETL pipeline");

        let core = CoreProcessor::connect(&self.config.warehouse)?;
        let summary = match self.run_stages(&core, processed_at) {
            Ok(summary) => summary,
            Err(e) => {
                error!(dataset = dataset.to_string().as_str(), error = e.to_string().as_str(); "ETL pipeline failed");
                return Err(e);
            }
        };
        core.close()?;

        info!(
            dataset = dataset.to_string().as_str(),
            staged_rows = summary.staged_rows,
            transformed_rows = summary.transform.output_rows,
            fact_rows_inserted = summary.load.fact_rows_inserted;
            "ETL pipeline finished"
        );
        Ok(summary)
    }

    fn run_stages(&self, core: &CoreProcessor, processed_at: NaiveDateTime) -> Result<RunSummary> {
        let dataset = self.config.dataset;
        let staging_path = self.config.staging_path();
        let transformed_path = self.config.transformed_path();

        let source = match &self.config.source {
            SourceLocator::File(path) => SourceLocator::File(self.config.resolve(path)),
            table => table.clone(),
        };

        let staged_rows = Extractor::new(core, dataset).extract(&source, &staging_path)?;

        let transform = Transformer::new(core, dataset, self.config.quality.null_warn_percent)
            .transform(&staging_path, &transformed_path, processed_at)?;

        let load = loader_for(dataset).load_into_warehouse(core, &transformed_path)?;

        Ok(RunSummary {
            staged_rows,
            transform,
            load,
        })
    }
}
