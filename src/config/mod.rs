//! Controller configuration
//!
//! Loaded from `~/.tpuslice/config.yaml` unless a path is given. Every field
//! has a default, so a missing file or an empty document is a valid config.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::cluster::retry::RetryPolicy;

/// Default control plane port
pub const DEFAULT_PORT: u16 = 8181;

/// Admission check name answered when none is configured
pub const DEFAULT_CHECK_NAME: &str = "tpu-slice";

/// Default config file location: ~/.tpuslice/config.yaml
pub fn default_config_path() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".tpuslice")
        .join("config.yaml")
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Config file not found: {0}")]
    NotFound(PathBuf),

    #[error("Failed to parse config: {0}")]
    ParseError(String),

    #[error("Invalid config: {0}")]
    Invalid(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ControllerConfig {
    #[serde(default = "default_bind_addr")]
    pub bind_addr: String,

    #[serde(default = "default_port")]
    pub port: u16,

    /// Admission check this controller reports on
    #[serde(default = "default_check_name")]
    pub admission_check_name: String,

    /// How long a slice may sit without becoming ready
    #[serde(default = "default_staleness_timeout_secs")]
    pub staleness_timeout_secs: u64,

    /// Every workload is re-enqueued this often
    #[serde(default = "default_resync_interval_secs")]
    pub resync_interval_secs: u64,

    /// Concurrent reconciles across different workloads
    #[serde(default = "default_workers")]
    pub workers: usize,

    #[serde(default)]
    pub retry: RetryPolicy,
}

fn default_bind_addr() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    DEFAULT_PORT
}

fn default_check_name() -> String {
    DEFAULT_CHECK_NAME.to_string()
}

fn default_staleness_timeout_secs() -> u64 {
    600
}

fn default_resync_interval_secs() -> u64 {
    30
}

fn default_workers() -> usize {
    4
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            bind_addr: default_bind_addr(),
            port: default_port(),
            admission_check_name: default_check_name(),
            staleness_timeout_secs: default_staleness_timeout_secs(),
            resync_interval_secs: default_resync_interval_secs(),
            workers: default_workers(),
            retry: RetryPolicy::default(),
        }
    }
}

impl ControllerConfig {
    pub fn staleness_timeout(&self) -> Duration {
        Duration::from_secs(self.staleness_timeout_secs)
    }

    pub fn resync_interval(&self) -> Duration {
        Duration::from_secs(self.resync_interval_secs)
    }

    pub fn listen_addr(&self) -> String {
        format!("{}:{}", self.bind_addr, self.port)
    }
}

// ============================================================================
// SBIO: Pure business logic (no I/O)
// ============================================================================

/// Parse and validate config from a YAML string
pub fn parse_config(content: &str) -> Result<ControllerConfig, ConfigError> {
    // An empty document deserializes as unit, not as an empty map
    if content.trim().is_empty() {
        return Ok(ControllerConfig::default());
    }
    let config: ControllerConfig =
        serde_yaml::from_str(content).map_err(|e| ConfigError::ParseError(e.to_string()))?;
    validate_config(&config)?;
    Ok(config)
}

pub fn validate_config(config: &ControllerConfig) -> Result<(), ConfigError> {
    if config.admission_check_name.trim().is_empty() {
        return Err(ConfigError::Invalid(
            "admissionCheckName must not be empty".to_string(),
        ));
    }
    if config.staleness_timeout_secs == 0 {
        return Err(ConfigError::Invalid(
            "stalenessTimeoutSecs must be positive".to_string(),
        ));
    }
    if config.resync_interval_secs == 0 {
        return Err(ConfigError::Invalid(
            "resyncIntervalSecs must be positive".to_string(),
        ));
    }
    if config.workers == 0 {
        return Err(ConfigError::Invalid("workers must be at least 1".to_string()));
    }
    if config.retry.max_attempts == 0 {
        return Err(ConfigError::Invalid(
            "retry.maxAttempts must be at least 1".to_string(),
        ));
    }
    Ok(())
}

// ============================================================================
// I/O boundary functions
// ============================================================================

/// Load config from an explicit path, or from the default location.
///
/// An explicit path must exist; a missing default file yields defaults.
pub fn load_config(path: Option<&Path>) -> Result<ControllerConfig, ConfigError> {
    match path {
        Some(path) => {
            if !path.exists() {
                return Err(ConfigError::NotFound(path.to_path_buf()));
            }
            load_config_from(path)
        }
        None => {
            let path = default_config_path();
            if !path.exists() {
                return Ok(ControllerConfig::default());
            }
            load_config_from(&path)
        }
    }
}

pub fn load_config_from(path: &Path) -> Result<ControllerConfig, ConfigError> {
    let content = std::fs::read_to_string(path)?;
    parse_config(&content)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let config = ControllerConfig::default();
        assert_eq!(config.admission_check_name, "tpu-slice");
        assert_eq!(config.staleness_timeout(), Duration::from_secs(600));
        assert_eq!(config.listen_addr(), "0.0.0.0:8181");
        assert!(validate_config(&config).is_ok());
    }

    #[test]
    fn test_parse_partial() {
        let yaml = r#"
port: 9000
admissionCheckName: slices
retry:
  maxAttempts: 2
"#;
        let config = parse_config(yaml).unwrap();
        assert_eq!(config.port, 9000);
        assert_eq!(config.admission_check_name, "slices");
        assert_eq!(config.retry.max_attempts, 2);
        assert_eq!(config.retry.initial_backoff_ms, 100);
        assert_eq!(config.workers, 4);
    }

    #[test]
    fn test_parse_empty() {
        assert_eq!(parse_config("").unwrap(), ControllerConfig::default());
    }

    #[test]
    fn test_parse_invalid() {
        assert!(matches!(
            parse_config("workers: 0"),
            Err(ConfigError::Invalid(_))
        ));
        assert!(matches!(
            parse_config("port: [1, 2]"),
            Err(ConfigError::ParseError(_))
        ));
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "stalenessTimeoutSecs: 120").unwrap();

        let config = load_config(Some(file.path())).unwrap();
        assert_eq!(config.staleness_timeout_secs, 120);
    }

    #[test]
    fn test_load_missing_explicit_path() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("nope.yaml");
        assert!(matches!(
            load_config(Some(&missing)),
            Err(ConfigError::NotFound(_))
        ));
    }

    #[test]
    fn test_default_path() {
        let path = default_config_path();
        assert!(path.ends_with(".tpuslice/config.yaml"));
    }
}
