use std::path::Path;

use pyo3::prelude::*;

use crate::config::PipelineConfig;
use crate::duckdb_etl::Pipeline;

/// Run the whole pipeline for a config file and return the number of fact
/// rows inserted.
#[pyfunction]
fn run_pipeline(config_path: &str) -> PyResult<usize> {
    let config = PipelineConfig::load(Path::new(config_path))
        .map_err(|e| PyErr::new::<pyo3::exceptions::PyRuntimeError, _>(e.to_string()))?;
    let summary = Pipeline::new(config)
        .run()
        .map_err(|e| PyErr::new::<pyo3::exceptions::PyRuntimeError, _>(e.to_string()))?;
    Ok(summary.load.fact_rows_inserted)
}

#[pymodule]
#[pyo3(name = "duckdb_warehouse")]
fn duckdb_warehouse(m: &Bound<'_, PyModule>) -> PyResult<()> {
    m.add_function(wrap_pyfunction!(run_pipeline, m)?)?;
    Ok(())
}
