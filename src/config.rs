//! Configuration System
//!
//! Handles loading configuration from files and environment variables.
//! Supports TOML config files and environment variable overrides.

use crate::extract::LoopOptions;
use crate::history::TemporalOptions;
use crate::index::DEFAULT_INVERT_METRICS;
use serde::Deserialize;
use std::path::{Path, PathBuf};

/// Main configuration structure
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub paths: PathsConfig,

    #[serde(default)]
    pub extract: ExtractConfig,

    #[serde(default)]
    pub invert: InvertConfig,

    #[serde(default)]
    pub temporal: TemporalConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Input and output locations
#[derive(Debug, Clone, Deserialize)]
pub struct PathsConfig {
    /// Source documents, one subdirectory per publisher
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,

    /// Codelists, codelist mapping and exchange rates
    #[serde(default = "default_helpers_dir")]
    pub helpers_dir: PathBuf,

    #[serde(default = "default_output_dir")]
    pub output_dir: PathBuf,

    /// Version-controlled repository of committed output
    #[serde(default = "default_history_dir")]
    pub history_dir: PathBuf,
}

fn default_data_dir() -> PathBuf {
    PathBuf::from("./data")
}

fn default_helpers_dir() -> PathBuf {
    PathBuf::from("./helpers")
}

fn default_output_dir() -> PathBuf {
    PathBuf::from("./out")
}

fn default_history_dir() -> PathBuf {
    PathBuf::from("./history")
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            helpers_dir: default_helpers_dir(),
            output_dir: default_output_dir(),
            history_dir: default_history_dir(),
        }
    }
}

/// Extraction worker pool
#[derive(Debug, Clone, Deserialize)]
pub struct ExtractConfig {
    #[serde(default = "default_workers")]
    pub workers: usize,

    /// Fail the loop when more documents than this fail; unlimited when unset
    #[serde(default)]
    pub max_failures: Option<usize>,
}

fn default_workers() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(4)
}

impl Default for ExtractConfig {
    fn default() -> Self {
        Self {
            workers: default_workers(),
            max_failures: None,
        }
    }
}

impl ExtractConfig {
    pub fn loop_options(&self) -> LoopOptions {
        LoopOptions {
            workers: self.workers.max(1),
            max_failures: self.max_failures,
        }
    }
}

/// Inverted index configuration
#[derive(Debug, Clone, Deserialize)]
pub struct InvertConfig {
    #[serde(default = "default_invert_metrics")]
    pub metrics: Vec<String>,
}

fn default_invert_metrics() -> Vec<String> {
    DEFAULT_INVERT_METRICS.iter().map(|m| m.to_string()).collect()
}

impl Default for InvertConfig {
    fn default() -> Self {
        Self {
            metrics: default_invert_metrics(),
        }
    }
}

/// History replay configuration
#[derive(Debug, Clone, Deserialize)]
pub struct TemporalConfig {
    /// Metrics kept in dated snapshots; every metric when unset
    #[serde(default)]
    pub metrics: Option<Vec<String>>,

    #[serde(default = "default_aggregated_dir")]
    pub aggregated_dir: String,

    #[serde(default = "default_publisher_dir")]
    pub publisher_dir: String,
}

fn default_aggregated_dir() -> String {
    "aggregated".to_string()
}

fn default_publisher_dir() -> String {
    "aggregated-publisher".to_string()
}

impl Default for TemporalConfig {
    fn default() -> Self {
        Self {
            metrics: None,
            aggregated_dir: default_aggregated_dir(),
            publisher_dir: default_publisher_dir(),
        }
    }
}

impl TemporalConfig {
    pub fn temporal_options(&self) -> TemporalOptions {
        TemporalOptions {
            aggregated_dir: self.aggregated_dir.clone(),
            publisher_dir: self.publisher_dir.clone(),
            metrics: self
                .metrics
                .as_ref()
                .map(|names| names.iter().cloned().collect()),
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,

    #[serde(default = "default_log_format")]
    pub format: String,

    pub file: Option<PathBuf>,
}

fn default_log_level() -> String {
    "aidstats=info".to_string()
}

fn default_log_format() -> String {
    "pretty".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
            file: None,
        }
    }
}

impl Config {
    /// Load configuration from a file
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::Io {
            path: path.to_path_buf(),
            error: e.to_string(),
        })?;

        let config: Config = toml::from_str(&content).map_err(|e| ConfigError::Parse {
            path: path.to_path_buf(),
            error: e.to_string(),
        })?;

        Ok(config)
    }

    /// Load configuration from environment variables only
    pub fn from_env() -> Self {
        let mut config = Config::default();
        config.apply_env_overrides();
        config
    }

    /// Load configuration with environment variable overrides
    pub fn load_with_env(path: &Path) -> Result<Self, ConfigError> {
        let mut config = Self::load(path)?;
        config.apply_env_overrides();
        Ok(config)
    }

    /// Load from default locations or environment
    pub fn load_default() -> Self {
        let config_paths = [
            dirs::config_dir().map(|p| p.join("aidstats").join("config.toml")),
            Some(PathBuf::from("/etc/aidstats/config.toml")),
            Some(PathBuf::from("./aidstats.toml")),
        ];

        for path_opt in config_paths.iter().flatten() {
            if path_opt.exists() {
                match Self::load_with_env(path_opt) {
                    Ok(config) => {
                        tracing::info!("Loaded config from {:?}", path_opt);
                        return config;
                    }
                    Err(e) => {
                        tracing::warn!("Failed to load config from {:?}: {}", path_opt, e);
                    }
                }
            }
        }

        tracing::info!("Using default config with environment overrides");
        Self::from_env()
    }

    /// Apply environment variable overrides to an existing config
    fn apply_env_overrides(&mut self) {
        // Path overrides
        if let Ok(dir) = std::env::var("AIDSTATS_DATA_DIR") {
            self.paths.data_dir = PathBuf::from(dir);
        }
        if let Ok(dir) = std::env::var("AIDSTATS_HELPERS_DIR") {
            self.paths.helpers_dir = PathBuf::from(dir);
        }
        if let Ok(dir) = std::env::var("AIDSTATS_OUTPUT_DIR") {
            self.paths.output_dir = PathBuf::from(dir);
        }
        if let Ok(dir) = std::env::var("AIDSTATS_HISTORY_DIR") {
            self.paths.history_dir = PathBuf::from(dir);
        }

        // Extraction overrides
        if let Ok(workers) = std::env::var("AIDSTATS_WORKERS") {
            if let Ok(n) = workers.parse() {
                self.extract.workers = n;
            }
        }
        if let Ok(max) = std::env::var("AIDSTATS_MAX_FAILURES") {
            if let Ok(n) = max.parse() {
                self.extract.max_failures = Some(n);
            }
        }

        // Logging overrides
        if let Ok(level) = std::env::var("AIDSTATS_LOG_LEVEL") {
            self.logging.level = level;
        }
        if let Ok(format) = std::env::var("AIDSTATS_LOG_FORMAT") {
            self.logging.format = format;
        }
    }
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path:?}: {error}")]
    Io { path: PathBuf, error: String },

    #[error("Failed to parse config file {path:?}: {error}")]
    Parse { path: PathBuf, error: String },
}

/// Generate a default config file content
pub fn generate_default_config() -> String {
    r#"# Aidstats Configuration
#
# Environment variables override these settings:
# - AIDSTATS_DATA_DIR
# - AIDSTATS_HELPERS_DIR
# - AIDSTATS_OUTPUT_DIR
# - AIDSTATS_HISTORY_DIR
# - AIDSTATS_WORKERS
# - AIDSTATS_MAX_FAILURES
# - AIDSTATS_LOG_LEVEL
# - AIDSTATS_LOG_FORMAT

[paths]
# Source documents, one directory per publisher
data_dir = "./data"

# Codelists, codelist_mapping.json and exchange_rates.csv
helpers_dir = "./helpers"

# Where loop/, aggregated/, invert/ and gitaggregate*/ are written
output_dir = "./out"

# Git repository holding previously committed output
history_dir = "./history"

[extract]
# Concurrent extraction workers (defaults to the number of CPUs)
# workers = 8

# Fail the loop when more documents than this fail extraction
# max_failures = 100

[invert]
# Metrics to build inverted indices for
metrics = ["iati_identifiers", "reporting_orgs", "participating_orgs", "codelist_values", "currencies", "provider_activity_id"]

[temporal]
# Directory of global.json inside each historical commit
aggregated_dir = "aggregated"

# Directory of per-publisher aggregates inside each historical commit
publisher_dir = "aggregated-publisher"

# Metrics kept in dated snapshots (all metrics when unset)
# metrics = ["activities", "publishers", "activity_files", "organisation_files"]

[logging]
# Log filter: trace, debug, info, warn, error or a directive like "aidstats=debug"
level = "aidstats=info"

# Log format: pretty (for development) or json (for production)
format = "pretty"

# Optional log file path
# file = "/var/log/aidstats/aidstats.log"
"#
    .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_generated_config_parses() {
        let config: Config = toml::from_str(&generate_default_config()).unwrap();
        assert_eq!(config.paths.output_dir, PathBuf::from("./out"));
        assert_eq!(config.invert.metrics, default_invert_metrics());
        assert_eq!(config.temporal.aggregated_dir, "aggregated");
        assert_eq!(config.logging.level, "aidstats=info");
        assert!(config.extract.max_failures.is_none());
    }

    #[test]
    fn test_partial_config_uses_defaults() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("aidstats.toml");
        std::fs::write(
            &path,
            "[extract]\nworkers = 3\nmax_failures = 5\n\n[temporal]\nmetrics = [\"activities\"]\n",
        )
        .unwrap();

        let config = Config::load(&path).unwrap();
        assert_eq!(config.paths.data_dir, PathBuf::from("./data"));

        let options = config.extract.loop_options();
        assert_eq!(options.workers, 3);
        assert_eq!(options.max_failures, Some(5));

        let temporal = config.temporal.temporal_options();
        assert_eq!(temporal.publisher_dir, "aggregated-publisher");
        let metrics = temporal.metrics.unwrap();
        assert_eq!(metrics.len(), 1);
        assert!(metrics.contains("activities"));
    }

    #[test]
    fn test_zero_workers_clamped() {
        let extract = ExtractConfig {
            workers: 0,
            max_failures: None,
        };
        assert_eq!(extract.loop_options().workers, 1);
    }

    #[test]
    fn test_load_errors() {
        let dir = tempdir().unwrap();
        let missing = dir.path().join("missing.toml");
        assert!(matches!(Config::load(&missing), Err(ConfigError::Io { .. })));

        let bad = dir.path().join("bad.toml");
        std::fs::write(&bad, "[extract]\nworkers = \"many\"\n").unwrap();
        assert!(matches!(Config::load(&bad), Err(ConfigError::Parse { .. })));
    }
}
