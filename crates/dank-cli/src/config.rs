//! Configuration management for dank-cli
//!
//! Configuration is stored in TOML format.
//!
//! # Configuration File Locations
//!
//! - Linux: `~/.config/dankchat/client.toml`
//! - macOS: `~/Library/Application Support/org.dankchat.dankchat/client.toml`
//! - Windows: `%APPDATA%\dankchat\dankchat\config\client.toml`

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use dank_core::messenger::RetryPolicy;
use dank_core::reconcile::ScanConfig;

/// Configuration errors
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Failed to read config file
    #[error("Failed to read config file: {0}")]
    ReadError(#[from] std::io::Error),

    /// Failed to parse config file
    #[error("Failed to parse config file: {0}")]
    ParseError(#[from] toml::de::Error),

    /// Failed to serialize config
    #[error("Failed to serialize config: {0}")]
    SerializeError(#[from] toml::ser::Error),

    /// Invalid configuration value
    #[error("Invalid configuration: {0}")]
    ValidationError(String),
}

/// Client configuration
///
/// # Example TOML
///
/// ```toml
/// [identity]
/// key_path = ""  # Empty = default location
///
/// [relay]
/// url = "http://127.0.0.1:8080"
/// timeout_seconds = 30
///
/// [scan]
/// interval_seconds = 10
/// concurrency = 8
/// keys_limit = 1000
/// rescan_overlap_seconds = 60
///
/// [retry]
/// max_attempts = 3
/// initial_backoff_ms = 500
/// max_backoff_ms = 30000
/// multiplier = 2.0
///
/// [storage]
/// db_path = ""  # Empty = default location
///
/// [logging]
/// level = "warn"
///
/// [directory.names]
/// alice = "<128 hex chars>"
/// ```
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub identity: IdentityConfig,

    #[serde(default)]
    pub relay: RelayConfig,

    #[serde(default)]
    pub scan: ScanSettings,

    #[serde(default)]
    pub retry: RetrySettings,

    #[serde(default)]
    pub storage: StorageConfig,

    #[serde(default)]
    pub logging: LoggingConfig,

    #[serde(default)]
    pub directory: DirectoryConfig,
}

/// Identity configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct IdentityConfig {
    /// Path to identity key file (empty = default location)
    #[serde(default)]
    pub key_path: Option<PathBuf>,
}

/// Relay configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RelayConfig {
    /// Relay base URL
    #[serde(default = "default_relay_url")]
    pub url: String,

    /// Request timeout in seconds
    #[serde(default = "default_timeout")]
    pub timeout_seconds: u64,
}

fn default_relay_url() -> String {
    "http://127.0.0.1:8080".to_string()
}

fn default_timeout() -> u64 {
    30
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            url: default_relay_url(),
            timeout_seconds: default_timeout(),
        }
    }
}

/// Scan configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScanSettings {
    /// Seconds between scheduled scans in `watch`
    #[serde(default = "default_interval")]
    pub interval_seconds: u64,

    /// Candidate keys processed in parallel
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,

    /// Page size for key listing
    #[serde(default = "default_keys_limit")]
    pub keys_limit: usize,

    /// How far behind the cycle start the watermark is kept
    #[serde(default = "default_overlap")]
    pub rescan_overlap_seconds: u64,
}

fn default_interval() -> u64 {
    10
}

fn default_concurrency() -> usize {
    8
}

fn default_keys_limit() -> usize {
    1000
}

fn default_overlap() -> u64 {
    60
}

impl Default for ScanSettings {
    fn default() -> Self {
        Self {
            interval_seconds: default_interval(),
            concurrency: default_concurrency(),
            keys_limit: default_keys_limit(),
            rescan_overlap_seconds: default_overlap(),
        }
    }
}

/// Publish retry configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrySettings {
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    #[serde(default = "default_initial_backoff")]
    pub initial_backoff_ms: u64,

    #[serde(default = "default_max_backoff")]
    pub max_backoff_ms: u64,

    #[serde(default = "default_multiplier")]
    pub multiplier: f64,
}

fn default_max_attempts() -> u32 {
    3
}

fn default_initial_backoff() -> u64 {
    500
}

fn default_max_backoff() -> u64 {
    30_000
}

fn default_multiplier() -> f64 {
    2.0
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            initial_backoff_ms: default_initial_backoff(),
            max_backoff_ms: default_max_backoff(),
            multiplier: default_multiplier(),
        }
    }
}

/// Local storage configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Path to the outbox database (empty = default location)
    #[serde(default)]
    pub db_path: Option<PathBuf>,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level: "error", "warn", "info", "debug", "trace"
    #[serde(default = "default_log_level")]
    pub level: String,
}

fn default_log_level() -> String {
    "warn".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

/// Local name directory
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DirectoryConfig {
    /// Display name to identity public key (hex)
    #[serde(default)]
    pub names: BTreeMap<String, String>,
}

impl Config {
    /// Load configuration from file
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from default location
    pub fn load_default() -> Result<Self, ConfigError> {
        if let Some(path) = Self::default_path() {
            if path.exists() {
                return Self::load(&path);
            }
        }
        Ok(Self::default())
    }

    /// Load configuration from custom path or default
    pub fn load_from(custom_path: Option<&Path>) -> Result<Self, ConfigError> {
        if let Some(path) = custom_path {
            Self::load(path)
        } else {
            Self::load_default()
        }
    }

    fn project_dirs() -> Option<directories::ProjectDirs> {
        directories::ProjectDirs::from("org", "dankchat", "dankchat")
    }

    /// Get default configuration file path
    pub fn default_path() -> Option<PathBuf> {
        Self::project_dirs().map(|dirs| dirs.config_dir().join("client.toml"))
    }

    /// Get the data directory path (identity key, outbox database)
    pub fn data_dir() -> Option<PathBuf> {
        Self::project_dirs().map(|dirs| dirs.data_dir().to_path_buf())
    }

    /// Identity key file, configured or default
    pub fn key_path(&self) -> Result<PathBuf, ConfigError> {
        match &self.identity.key_path {
            Some(path) if !path.as_os_str().is_empty() => Ok(path.clone()),
            _ => Self::data_dir()
                .map(|dir| dir.join("identity.key"))
                .ok_or_else(|| ConfigError::ValidationError("no home directory; set identity.key_path".to_string())),
        }
    }

    /// Outbox database file, configured or default
    pub fn db_path(&self) -> Result<PathBuf, ConfigError> {
        match &self.storage.db_path {
            Some(path) if !path.as_os_str().is_empty() => Ok(path.clone()),
            _ => Self::data_dir()
                .map(|dir| dir.join("client.db"))
                .ok_or_else(|| ConfigError::ValidationError("no home directory; set storage.db_path".to_string())),
        }
    }

    pub fn scan_config(&self) -> ScanConfig {
        ScanConfig {
            concurrency: self.scan.concurrency,
            keys_limit: self.scan.keys_limit,
            rescan_overlap: Duration::from_secs(self.scan.rescan_overlap_seconds),
        }
    }

    pub fn scan_interval(&self) -> Duration {
        Duration::from_secs(self.scan.interval_seconds)
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.retry.max_attempts,
            initial_backoff: Duration::from_millis(self.retry.initial_backoff_ms),
            max_backoff: Duration::from_millis(self.retry.max_backoff_ms),
            multiplier: self.retry.multiplier,
        }
    }

    pub fn relay_timeout(&self) -> Duration {
        Duration::from_secs(self.relay.timeout_seconds)
    }

    /// Save configuration to file
    pub fn save(&self, path: &Path) -> Result<(), ConfigError> {
        let content = toml::to_string_pretty(self)?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Create default configuration file if it doesn't exist
    pub fn create_default_if_missing() -> Result<bool, ConfigError> {
        if let Some(path) = Self::default_path() {
            if !path.exists() {
                let config = Self::default();
                config.save(&path)?;
                return Ok(true);
            }
        }
        Ok(false)
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<(), ConfigError> {
        let valid_levels = ["error", "warn", "info", "debug", "trace"];
        if !valid_levels.contains(&self.logging.level.as_str()) {
            return Err(ConfigError::ValidationError(format!(
                "Invalid log level '{}'. Valid values: {:?}",
                self.logging.level, valid_levels
            )));
        }

        if !self.relay.url.starts_with("http://") && !self.relay.url.starts_with("https://") {
            return Err(ConfigError::ValidationError(format!(
                "Invalid relay URL '{}': must start with http:// or https://",
                self.relay.url
            )));
        }

        if self.relay.timeout_seconds == 0 {
            return Err(ConfigError::ValidationError(
                "timeout_seconds must be greater than 0".to_string(),
            ));
        }

        if self.scan.interval_seconds == 0 {
            return Err(ConfigError::ValidationError(
                "interval_seconds must be greater than 0".to_string(),
            ));
        }

        if self.scan.concurrency == 0 || self.scan.keys_limit == 0 {
            return Err(ConfigError::ValidationError(
                "concurrency and keys_limit must be greater than 0".to_string(),
            ));
        }

        if self.retry.max_attempts == 0 {
            return Err(ConfigError::ValidationError(
                "max_attempts must be greater than 0".to_string(),
            ));
        }

        if self.retry.multiplier.is_nan() || self.retry.multiplier < 1.0 {
            return Err(ConfigError::ValidationError(
                "multiplier must be at least 1.0".to_string(),
            ));
        }

        for (name, key) in &self.directory.names {
            if dank_crypto::parse_public_key(key).is_err() {
                return Err(ConfigError::ValidationError(format!(
                    "Invalid public key for directory name '{}'",
                    name
                )));
            }
        }

        Ok(())
    }
}

/// CLI configuration overrides
///
/// Command-line arguments take precedence over config file values.
#[derive(Debug, Clone, Default)]
pub struct CliOverrides {
    /// Relay URL override
    pub relay_url: Option<String>,
    /// Debug flag override
    pub debug: Option<bool>,
    /// Verbose flag override
    pub verbose: Option<bool>,
}

impl Config {
    /// Apply CLI overrides to configuration
    pub fn with_overrides(mut self, overrides: &CliOverrides) -> Self {
        if let Some(ref url) = overrides.relay_url {
            self.relay.url = url.clone();
        }
        if overrides.verbose == Some(true) {
            self.logging.level = "info".to_string();
        }
        if overrides.debug == Some(true) {
            self.logging.level = "debug".to_string();
        }
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_default_config() {
        let config = Config::default();

        assert_eq!(config.relay.url, "http://127.0.0.1:8080");
        assert_eq!(config.relay.timeout_seconds, 30);
        assert_eq!(config.scan.interval_seconds, 10);
        assert_eq!(config.scan.concurrency, 8);
        assert_eq!(config.scan.keys_limit, 1000);
        assert_eq!(config.scan.rescan_overlap_seconds, 60);
        assert_eq!(config.retry.max_attempts, 3);
        assert_eq!(config.logging.level, "warn");
        assert!(config.directory.names.is_empty());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_invalid_log_level() {
        let mut config = Config::default();
        config.logging.level = "verbose".to_string();

        let result = config.validate();
        assert!(result.unwrap_err().to_string().contains("Invalid log level"));
    }

    #[test]
    fn test_validate_invalid_url() {
        let mut config = Config::default();
        config.relay.url = "relay.example.com".to_string();

        let result = config.validate();
        assert!(result.unwrap_err().to_string().contains("Invalid relay URL"));
    }

    #[test]
    fn test_validate_zero_values() {
        let mut config = Config::default();
        config.scan.interval_seconds = 0;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.retry.max_attempts = 0;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.retry.multiplier = 0.5;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_directory_keys() {
        let mut config = Config::default();
        config.directory.names.insert("mallory".to_string(), "abcd".to_string());

        let result = config.validate();
        assert!(result.unwrap_err().to_string().contains("mallory"));

        let alice = dank_crypto::generate_identity_keypair();
        config.directory.names.insert("mallory".to_string(), alice.public_key_hex());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_save_and_load() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("client.toml");

        let mut config = Config::default();
        config.relay.url = "https://relay.example.com".to_string();
        config.save(&config_path).unwrap();

        let loaded = Config::load(&config_path).unwrap();
        assert_eq!(loaded.relay.url, "https://relay.example.com");
        assert_eq!(loaded.scan.keys_limit, config.scan.keys_limit);
    }

    #[test]
    fn test_cli_overrides() {
        let overrides = CliOverrides {
            relay_url: Some("https://other.example.com".to_string()),
            debug: Some(true),
            verbose: None,
        };

        let config = Config::default().with_overrides(&overrides);

        assert_eq!(config.relay.url, "https://other.example.com");
        assert_eq!(config.logging.level, "debug");
    }

    #[test]
    fn test_toml_parsing() {
        let alice = dank_crypto::generate_identity_keypair();
        let toml_content = format!(
            r#"
[relay]
url = "https://relay.example.com"

[scan]
interval_seconds = 5
rescan_overlap_seconds = 0

[retry]
max_attempts = 1

[directory.names]
alice = "{}"
"#,
            alice.public_key_hex()
        );

        let config: Config = toml::from_str(&toml_content).unwrap();
        assert!(config.validate().is_ok());

        assert_eq!(config.scan_interval(), Duration::from_secs(5));
        assert_eq!(config.scan_config().rescan_overlap, Duration::ZERO);
        assert_eq!(config.scan_config().concurrency, 8);
        assert_eq!(config.retry_policy().max_attempts, 1);
        assert_eq!(config.directory.names["alice"], alice.public_key_hex());
    }

    #[test]
    fn test_explicit_paths_win() {
        let mut config = Config::default();
        config.identity.key_path = Some(PathBuf::from("/tmp/me.key"));
        config.storage.db_path = Some(PathBuf::from("/tmp/me.db"));

        assert_eq!(config.key_path().unwrap(), PathBuf::from("/tmp/me.key"));
        assert_eq!(config.db_path().unwrap(), PathBuf::from("/tmp/me.db"));
    }

    #[test]
    fn test_load_from_custom_path() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("custom.toml");

        Config::default().save(&config_path).unwrap();

        let loaded = Config::load_from(Some(&config_path)).unwrap();
        assert_eq!(loaded.relay.url, default_relay_url());
    }
}
