//! Configuration file management for sitecheck.
//!
//! Settings come from three layers merged in order of precedence:
//!
//! 1. Default values (lowest priority)
//! 2. Configuration file (`sitecheck.toml` or the file given with `--config`)
//! 3. Command-line arguments (highest priority)
//!
//! # Example Configuration File
//!
//! ```toml
//! input = "hosts.csv"
//! concurrency = 5
//! http_timeout = 5
//! output = "report.csv"
//! format = "csv"
//! write_mode = "overwrite"
//! batch_size = 1000
//!
//! [prometheus]
//! enabled = true
//! address = "http://localhost:9091"
//! ```

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::dispatch::MAX_CONCURRENCY;
use crate::sink::{OutputFormat, WriteMode, CONSOLE_SENTINEL};
use crate::target::InputFormat;

/// File looked up in the working directory when `--config` is not given.
pub const DEFAULT_CONFIG_FILE: &str = "sitecheck.toml";

/// Main configuration structure.
///
/// All fields are optional to support partial configuration and merging.
#[derive(Debug, Deserialize, Serialize, Clone, Default, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct Config {
    /// Host list or CSV file to read targets from
    pub input: Option<PathBuf>,
    /// How to read `input`
    pub input_format: Option<InputFormat>,
    /// Worker threads per batch, 1 to 10
    pub concurrency: Option<usize>,
    /// HTTP request timeout in seconds
    pub http_timeout: Option<u64>,
    /// TCP connect and handshake timeout in seconds
    pub connect_timeout: Option<u64>,
    /// Output file, or `PRINT` for the console
    pub output: Option<String>,
    /// Report layout: text, csv, table
    pub format: Option<OutputFormat>,
    /// What to do with an existing output file: overwrite, append, refuse
    pub write_mode: Option<WriteMode>,
    /// Targets read and probed per batch
    pub batch_size: Option<usize>,
    /// Copy extra input columns into the report
    pub merge_metadata: Option<bool>,
    /// Try plain HTTP when HTTPS fails without a timeout
    pub plain_http_fallback: Option<bool>,
    /// tracing filter, e.g. `info` or `sitecheck=debug`
    pub log_level: Option<String>,
    /// Prometheus configuration
    pub prometheus: Option<PrometheusConfig>,
}

/// Prometheus Push Gateway settings.
#[derive(Debug, Deserialize, Serialize, Clone, Default, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct PrometheusConfig {
    /// Enable prometheus metrics pushing
    pub enabled: Option<bool>,
    /// Prometheus push gateway address (e.g., "http://localhost:9091")
    pub address: Option<String>,
}

/// Fully resolved settings for one run.
#[derive(Debug, Clone, PartialEq)]
pub struct Settings {
    pub input: PathBuf,
    pub input_format: InputFormat,
    pub concurrency: usize,
    pub http_timeout: Duration,
    pub connect_timeout: Duration,
    pub output: String,
    pub format: OutputFormat,
    pub write_mode: WriteMode,
    pub batch_size: usize,
    pub merge_metadata: bool,
    pub plain_http_fallback: bool,
    pub log_level: String,
    /// Push gateway address when metrics are enabled
    pub prometheus: Option<String>,
}

impl Config {
    /// Loads configuration from a TOML file.
    ///
    /// # Returns
    ///
    /// * `Ok(Config)` - Successfully parsed configuration
    /// * `Err(ConfigError::Io)` - File could not be read
    /// * `Err(ConfigError::Parse)` - File contains invalid TOML
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content =
            fs::read_to_string(path.as_ref()).map_err(|e| ConfigError::Io(e.to_string()))?;

        let config: Config =
            toml::from_str(&content).map_err(|e| ConfigError::Parse(e.to_string()))?;

        Ok(config)
    }

    /// Built-in defaults.
    ///
    /// # Default Values
    ///
    /// - `input`: None (must be provided)
    /// - `input_format`: auto
    /// - `concurrency`: 5
    /// - `http_timeout`: 5 seconds
    /// - `connect_timeout`: 5 seconds
    /// - `output`: "PRINT"
    /// - `format`: text
    /// - `write_mode`: refuse
    /// - `batch_size`: 1000
    /// - `merge_metadata`: false
    /// - `plain_http_fallback`: true
    /// - `log_level`: "warn"
    /// - `prometheus.enabled`: false
    /// - `prometheus.address`: "http://localhost:9091"
    pub fn defaults() -> Self {
        Config {
            input: None,
            input_format: Some(InputFormat::Auto),
            concurrency: Some(5),
            http_timeout: Some(5),
            connect_timeout: Some(5),
            output: Some(CONSOLE_SENTINEL.to_string()),
            format: Some(OutputFormat::Text),
            write_mode: Some(WriteMode::Refuse),
            batch_size: Some(1000),
            merge_metadata: Some(false),
            plain_http_fallback: Some(true),
            log_level: Some("warn".to_string()),
            prometheus: Some(PrometheusConfig {
                enabled: Some(false),
                address: Some("http://localhost:9091".to_string()),
            }),
        }
    }

    /// Merges this configuration with another, prioritizing the other's values.
    ///
    /// For each field, if the `other` config has a value (Some), it overrides
    /// this config's value. If the `other` value is None, keeps the current value.
    ///
    /// ```
    /// # use sitecheck::config::Config;
    /// let file_config = Config::from_file("sitecheck.toml").unwrap_or_default();
    /// let merged = Config::defaults().merge_with(file_config);
    /// assert!(merged.concurrency.is_some());
    /// ```
    pub fn merge_with(mut self, other: Config) -> Self {
        fn take<T>(current: &mut Option<T>, other: Option<T>) {
            if other.is_some() {
                *current = other;
            }
        }

        take(&mut self.input, other.input);
        take(&mut self.input_format, other.input_format);
        take(&mut self.concurrency, other.concurrency);
        take(&mut self.http_timeout, other.http_timeout);
        take(&mut self.connect_timeout, other.connect_timeout);
        take(&mut self.output, other.output);
        take(&mut self.format, other.format);
        take(&mut self.write_mode, other.write_mode);
        take(&mut self.batch_size, other.batch_size);
        take(&mut self.merge_metadata, other.merge_metadata);
        take(&mut self.plain_http_fallback, other.plain_http_fallback);
        take(&mut self.log_level, other.log_level);
        if let Some(other_prom) = other.prometheus {
            if let Some(ref mut self_prom) = self.prometheus {
                take(&mut self_prom.enabled, other_prom.enabled);
                take(&mut self_prom.address, other_prom.address);
            } else {
                self.prometheus = Some(other_prom);
            }
        }
        self
    }

    /// Checks ranges and required values and produces the run settings.
    ///
    /// Call on a configuration merged over [`Config::defaults`]; a field left
    /// unset is reported as missing.
    pub fn validate(&self) -> Result<Settings, ConfigError> {
        let input = self
            .input
            .clone()
            .ok_or_else(|| ConfigError::Validation("an input file is required".to_string()))?;

        let concurrency = required(self.concurrency, "concurrency")?;
        if !(1..=MAX_CONCURRENCY).contains(&concurrency) {
            return Err(ConfigError::Validation(format!(
                "concurrency must be between 1 and {}, got {}",
                MAX_CONCURRENCY, concurrency
            )));
        }
        let batch_size = required(self.batch_size, "batch_size")?;
        if batch_size == 0 {
            return Err(ConfigError::Validation(
                "batch_size must be at least 1".to_string(),
            ));
        }
        let http_timeout = seconds(self.http_timeout, "http_timeout")?;
        let connect_timeout = seconds(self.connect_timeout, "connect_timeout")?;

        let prometheus = match &self.prometheus {
            Some(PrometheusConfig {
                enabled: Some(true),
                address,
            }) => Some(address.clone().ok_or_else(|| {
                ConfigError::Validation("prometheus.address is required when enabled".to_string())
            })?),
            _ => None,
        };

        Ok(Settings {
            input,
            input_format: self.input_format.unwrap_or_default(),
            concurrency,
            http_timeout,
            connect_timeout,
            output: required(self.output.clone(), "output")?,
            format: self.format.unwrap_or_default(),
            write_mode: self.write_mode.unwrap_or_default(),
            batch_size,
            merge_metadata: self.merge_metadata.unwrap_or(false),
            plain_http_fallback: self.plain_http_fallback.unwrap_or(true),
            log_level: self.log_level.clone().unwrap_or_else(|| "warn".to_string()),
            prometheus,
        })
    }

    /// Generates an example configuration file in TOML format.
    pub fn example_toml() -> String {
        let example = Config {
            input: Some(PathBuf::from("hosts.csv")),
            input_format: Some(InputFormat::Csv),
            concurrency: Some(5),
            http_timeout: Some(5),
            connect_timeout: Some(5),
            output: Some("report.csv".to_string()),
            format: Some(OutputFormat::Csv),
            write_mode: Some(WriteMode::Overwrite),
            batch_size: Some(1000),
            merge_metadata: Some(true),
            plain_http_fallback: Some(true),
            log_level: Some("info".to_string()),
            prometheus: Some(PrometheusConfig {
                enabled: Some(false),
                address: Some("http://localhost:9091".to_string()),
            }),
        };

        toml::to_string_pretty(&example)
            .unwrap_or_else(|_| "# Error generating example".to_string())
    }
}

fn required<T>(value: Option<T>, field: &str) -> Result<T, ConfigError> {
    value.ok_or_else(|| ConfigError::Validation(format!("{} is not set", field)))
}

fn seconds(value: Option<u64>, field: &str) -> Result<Duration, ConfigError> {
    match required(value, field)? {
        0 => Err(ConfigError::Validation(format!(
            "{} must be greater than zero",
            field
        ))),
        secs => Ok(Duration::from_secs(secs)),
    }
}

/// Errors that can occur during configuration loading and parsing.
#[derive(Debug)]
pub enum ConfigError {
    /// I/O error (file not found, permission denied, etc.)
    Io(String),
    /// TOML parsing error (invalid syntax, type mismatch, etc.)
    Parse(String),
    /// Validation error (missing required fields, invalid values, etc.)
    Validation(String),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::Io(msg) => write!(f, "IO Error: {}", msg),
            ConfigError::Parse(msg) => write!(f, "Parse Error: {}", msg),
            ConfigError::Validation(msg) => write!(f, "Validation Error: {}", msg),
        }
    }
}

impl std::error::Error for ConfigError {}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_config_from_toml() {
        let toml_content = r#"
            input = "hosts.csv"
            input_format = "csv"
            concurrency = 8
            http_timeout = 2
            output = "report.csv"
            format = "csv"
            write_mode = "append"
            batch_size = 250

            [prometheus]
            enabled = true
            address = "http://localhost:9092"
        "#;

        let mut temp_file = NamedTempFile::new().unwrap();
        temp_file.write_all(toml_content.as_bytes()).unwrap();

        let config = Config::from_file(temp_file.path()).unwrap();

        assert_eq!(config.input, Some(PathBuf::from("hosts.csv")));
        assert_eq!(config.input_format, Some(InputFormat::Csv));
        assert_eq!(config.concurrency, Some(8));
        assert_eq!(config.http_timeout, Some(2));
        assert_eq!(config.connect_timeout, None);
        assert_eq!(config.format, Some(OutputFormat::Csv));
        assert_eq!(config.write_mode, Some(WriteMode::Append));
        assert_eq!(config.batch_size, Some(250));

        let prometheus = config.prometheus.unwrap();
        assert_eq!(prometheus.enabled, Some(true));
        assert_eq!(
            prometheus.address,
            Some("http://localhost:9092".to_string())
        );
    }

    #[test]
    fn test_config_merge() {
        let base_config = Config {
            input: Some(PathBuf::from("base.txt")),
            concurrency: Some(2),
            output: Some("PRINT".to_string()),
            prometheus: Some(PrometheusConfig {
                enabled: Some(false),
                address: Some("http://base:9091".to_string()),
            }),
            ..Config::default()
        };

        let override_config = Config {
            input: Some(PathBuf::from("override.csv")),
            concurrency: None,
            write_mode: Some(WriteMode::Overwrite),
            prometheus: Some(PrometheusConfig {
                enabled: Some(true),
                address: None,
            }),
            ..Config::default()
        };

        let merged = base_config.merge_with(override_config);

        assert_eq!(merged.input, Some(PathBuf::from("override.csv")));
        assert_eq!(merged.concurrency, Some(2)); // From base (not overridden)
        assert_eq!(merged.output, Some("PRINT".to_string()));
        assert_eq!(merged.write_mode, Some(WriteMode::Overwrite));

        let prometheus = merged.prometheus.unwrap();
        assert_eq!(prometheus.enabled, Some(true)); // Overridden
        assert_eq!(prometheus.address, Some("http://base:9091".to_string())); // From base
    }

    #[test]
    fn test_defaults_validate_once_input_is_set() {
        let config = Config::defaults().merge_with(Config {
            input: Some(PathBuf::from("hosts.txt")),
            ..Config::default()
        });

        let settings = config.validate().unwrap();
        assert_eq!(settings.concurrency, 5);
        assert_eq!(settings.http_timeout, Duration::from_secs(5));
        assert_eq!(settings.output, "PRINT");
        assert_eq!(settings.write_mode, WriteMode::Refuse);
        assert_eq!(settings.batch_size, 1000);
        assert!(settings.plain_http_fallback);
        assert_eq!(settings.prometheus, None);
    }

    #[test]
    fn test_validate_rejects_out_of_range_values() {
        let base = Config::defaults().merge_with(Config {
            input: Some(PathBuf::from("hosts.txt")),
            ..Config::default()
        });

        for bad in [
            Config { concurrency: Some(0), ..Config::default() },
            Config { concurrency: Some(11), ..Config::default() },
            Config { batch_size: Some(0), ..Config::default() },
            Config { http_timeout: Some(0), ..Config::default() },
        ] {
            let result = base.clone().merge_with(bad).validate();
            assert!(matches!(result, Err(ConfigError::Validation(_))));
        }
    }

    #[test]
    fn test_validate_requires_input() {
        match Config::defaults().validate() {
            Err(ConfigError::Validation(msg)) => assert!(msg.contains("input")),
            other => panic!("Expected ValidationError, got {:?}", other),
        }
    }

    #[test]
    fn test_prometheus_enabled_yields_address() {
        let config = Config::defaults().merge_with(Config {
            input: Some(PathBuf::from("hosts.txt")),
            prometheus: Some(PrometheusConfig {
                enabled: Some(true),
                address: None,
            }),
            ..Config::default()
        });
        assert_eq!(
            config.validate().unwrap().prometheus,
            Some("http://localhost:9091".to_string())
        );
    }

    #[test]
    fn test_invalid_toml() {
        let invalid_toml = "input = [invalid toml";

        let mut temp_file = NamedTempFile::new().unwrap();
        temp_file.write_all(invalid_toml.as_bytes()).unwrap();

        let result = Config::from_file(temp_file.path());
        assert!(result.is_err());

        match result.unwrap_err() {
            ConfigError::Parse(_) => {} // Expected
            other => panic!("Expected ParseError, got {:?}", other),
        }
    }

    #[test]
    fn test_unknown_write_mode_is_a_parse_error() {
        let mut temp_file = NamedTempFile::new().unwrap();
        temp_file.write_all(b"write_mode = \"clobber\"\n").unwrap();
        assert!(matches!(
            Config::from_file(temp_file.path()),
            Err(ConfigError::Parse(_))
        ));
    }

    #[test]
    fn test_example_toml_generation() {
        let example = Config::example_toml();

        // Should be valid TOML
        let parsed: Config = toml::from_str(&example).unwrap();

        assert!(parsed.input.is_some());
        assert_eq!(parsed.format, Some(OutputFormat::Csv));
        assert!(parsed.prometheus.is_some());
    }
}
