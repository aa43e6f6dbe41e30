use std::fs::File;
use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::dataset::Dataset;
use crate::error::{EtlError, Result};

/// Environment variable that overrides the configured warehouse password.
pub const PASSWORD_ENV_VAR: &str = "ETL_WAREHOUSE_PASSWORD";

const LOG_LEVELS: [&str; 5] = ["error", "warn", "info", "debug", "trace"];

/// Everything a pipeline run needs, read from a YAML file.
#[derive(Debug, Clone, Deserialize)]
pub struct PipelineConfig {
    #[serde(default = "default_base_path")]
    pub base_path: PathBuf,
    pub dataset: Dataset,
    #[serde(with = "serde_yaml::with::singleton_map")]
    pub source: SourceLocator,
    pub staging_file: PathBuf,
    pub transformed_file: PathBuf,
    #[serde(default)]
    pub log: LogConfig,
    #[serde(default)]
    pub quality: QualityConfig,
    pub warehouse: WarehouseConfig,
}

/// Where the raw records come from.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceLocator {
    File(PathBuf),
    Table(String),
}

#[derive(Debug, Clone, Deserialize)]
pub struct LogConfig {
    #[serde(default = "default_log_file")]
    pub file: PathBuf,
    #[serde(default = "default_log_level")]
    pub level: String,
    /// Size at which the log file is rolled over to `<file>.1`.
    #[serde(default = "default_log_max_bytes")]
    pub max_bytes: u64,
    /// Number of rolled files kept next to the live one.
    #[serde(default = "default_log_backups")]
    pub backups: u32,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            file: default_log_file(),
            level: default_log_level(),
            max_bytes: default_log_max_bytes(),
            backups: default_log_backups(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct QualityConfig {
    /// Share of nulls (in percent) above which a column is reported.
    #[serde(default = "default_null_warn_percent")]
    pub null_warn_percent: f64,
}

impl Default for QualityConfig {
    fn default() -> Self {
        Self {
            null_warn_percent: default_null_warn_percent(),
        }
    }
}

/// Destination warehouse settings, tagged by backend.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "backend", rename_all = "lowercase")]
pub enum WarehouseConfig {
    Postgres {
        #[serde(default = "default_host")]
        host: String,
        #[serde(default = "default_port")]
        port: u16,
        database: String,
        user: String,
        #[serde(default)]
        password: String,
        #[serde(default = "default_postgres_schema")]
        schema: String,
    },
    Duckdb {
        path: PathBuf,
        #[serde(default = "default_duckdb_schema")]
        schema: String,
    },
}

impl WarehouseConfig {
    pub fn schema(&self) -> &str {
        match self {
            WarehouseConfig::Postgres { schema, .. } | WarehouseConfig::Duckdb { schema, .. } => {
                schema
            }
        }
    }

    /// libpq style connection string for the postgres backend.
    pub fn postgres_uri(&self) -> Option<String> {
        match self {
            WarehouseConfig::Postgres {
                host,
                port,
                database,
                user,
                password,
                ..
            } => Some(format!(
                "dbname={} user={} password={} host={} port={}",
                libpq_value(database),
                libpq_value(user),
                libpq_value(password),
                libpq_value(host),
                port
            )),
            WarehouseConfig::Duckdb { .. } => None,
        }
    }
}

// Single-quote a keyword value, escaping backslashes and quotes
fn libpq_value(value: &str) -> String {
    format!("'{}'", value.replace('\\', "\\\\").replace('\'', "\\'"))
}

fn default_base_path() -> PathBuf {
    PathBuf::from("./")
}

fn default_log_file() -> PathBuf {
    PathBuf::from("logs/etl_pipeline.log")
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_max_bytes() -> u64 {
    5 * 1024 * 1024
}

fn default_log_backups() -> u32 {
    5
}

fn default_null_warn_percent() -> f64 {
    25.0
}

fn default_host() -> String {
    "localhost".to_string()
}

fn default_port() -> u16 {
    5432
}

fn default_postgres_schema() -> String {
    "public".to_string()
}

fn default_duckdb_schema() -> String {
    "main".to_string()
}

impl PipelineConfig {
    /// Read, override from the environment and validate a config file.
    pub fn load(path: &Path) -> Result<Self> {
        let file = File::open(path).map_err(|e| {
            EtlError::Config(format!("could not open '{}': {}", path.display(), e))
        })?;
        let mut config: PipelineConfig = serde_yaml::from_reader(file)?;

        if let Ok(password) = std::env::var(PASSWORD_ENV_VAR) {
            config.apply_password_override(password);
        }

        config.validate()?;
        Ok(config)
    }

    pub fn from_yaml_str(content: &str) -> Result<Self> {
        let config: PipelineConfig = serde_yaml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    fn apply_password_override(&mut self, value: String) {
        if let WarehouseConfig::Postgres { password, .. } = &mut self.warehouse {
            *password = value;
        }
    }

    pub fn validate(&self) -> Result<()> {
        if !is_plain_identifier(self.warehouse.schema()) {
            return Err(EtlError::Config(format!(
                "schema name '{}' must be a plain identifier",
                self.warehouse.schema()
            )));
        }

        for (name, path) in [
            ("staging_file", &self.staging_file),
            ("transformed_file", &self.transformed_file),
        ] {
            if path.as_os_str().is_empty() {
                return Err(EtlError::Config(format!("{} must not be empty", name)));
            }
        }

        if !LOG_LEVELS.contains(&self.log.level.to_lowercase().as_str()) {
            return Err(EtlError::Config(format!(
                "unknown log level '{}'",
                self.log.level
            )));
        }

        if self.log.max_bytes == 0 {
            return Err(EtlError::Config("log.max_bytes must be positive".to_string()));
        }

        if let SourceLocator::Table(table) = &self.source {
            if !is_plain_identifier(table) {
                return Err(EtlError::Config(format!(
                    "source table '{}' must be a plain identifier",
                    table
                )));
            }
        }

        Ok(())
    }

    /// Resolve a configured path against `base_path`.
    pub fn resolve(&self, path: &Path) -> PathBuf {
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.base_path.join(path)
        }
    }

    pub fn staging_path(&self) -> PathBuf {
        self.resolve(&self.staging_file)
    }

    pub fn transformed_path(&self) -> PathBuf {
        self.resolve(&self.transformed_file)
    }

    pub fn log_path(&self) -> PathBuf {
        self.resolve(&self.log.file)
    }
}

fn is_plain_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(first) if first.is_ascii_alphabetic() || first == '_' => {
            chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
        }
        _ => false,
    }
}
