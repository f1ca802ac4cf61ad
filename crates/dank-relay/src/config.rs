//! Configuration management

use std::net::SocketAddr;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),
    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub listen_addr: SocketAddr,
    pub database_path: PathBuf,
    /// Largest accepted ciphertext, in decoded bytes.
    pub max_message_bytes: usize,
    /// Upper bound for `GET /keys?limit=`.
    pub max_keys_limit: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_addr: SocketAddr::from(([0, 0, 0, 0], 8080)),
            database_path: PathBuf::from("relay.db"),
            max_message_bytes: 64 * 1024,
            max_keys_limit: 1000,
        }
    }
}

impl ServerConfig {
    /// Load configuration from environment variables and TOML file
    pub fn load() -> Result<Self, ConfigError> {
        let mut config = Self::default();

        if let Ok(addr) = std::env::var("DANK_RELAY_LISTEN_ADDR") {
            config.listen_addr = addr
                .parse()
                .map_err(|e| ConfigError::Invalid(format!("Invalid listen_addr: {}", e)))?;
        }

        if let Ok(path) = std::env::var("DANK_RELAY_DATABASE_PATH") {
            config.database_path = PathBuf::from(path);
        }

        if let Ok(bytes) = std::env::var("DANK_RELAY_MAX_MESSAGE_BYTES") {
            config.max_message_bytes = bytes
                .parse()
                .map_err(|e| ConfigError::Invalid(format!("Invalid max_message_bytes: {}", e)))?;
        }

        if let Ok(limit) = std::env::var("DANK_RELAY_MAX_KEYS_LIMIT") {
            config.max_keys_limit = limit
                .parse()
                .map_err(|e| ConfigError::Invalid(format!("Invalid max_keys_limit: {}", e)))?;
        }

        // TOML file (if specified) wins over the environment
        if let Ok(config_path) = std::env::var("DANK_RELAY_CONFIG") {
            let content = std::fs::read_to_string(config_path)?;
            config.apply_toml(&content)?;
        }

        config.validate()?;

        Ok(config)
    }

    /// Override fields present in a TOML document
    pub fn apply_toml(&mut self, content: &str) -> Result<(), ConfigError> {
        let toml_config: toml::Value = toml::from_str(content)?;

        if let Some(addr) = toml_config.get("listen_addr").and_then(|v| v.as_str()) {
            self.listen_addr = addr
                .parse()
                .map_err(|e| ConfigError::Invalid(format!("Invalid listen_addr in TOML: {}", e)))?;
        }

        if let Some(path) = toml_config.get("database_path").and_then(|v| v.as_str()) {
            self.database_path = PathBuf::from(path);
        }

        if let Some(bytes) = toml_config.get("max_message_bytes").and_then(|v| v.as_integer()) {
            self.max_message_bytes = usize::try_from(bytes)
                .map_err(|_| ConfigError::Invalid("max_message_bytes must be >= 0".to_string()))?;
        }

        if let Some(limit) = toml_config.get("max_keys_limit").and_then(|v| v.as_integer()) {
            self.max_keys_limit = usize::try_from(limit)
                .map_err(|_| ConfigError::Invalid("max_keys_limit must be >= 0".to_string()))?;
        }

        Ok(())
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_message_bytes == 0 {
            return Err(ConfigError::Invalid("max_message_bytes must be > 0".to_string()));
        }

        if self.max_keys_limit == 0 {
            return Err(ConfigError::Invalid("max_keys_limit must be > 0".to_string()));
        }

        Ok(())
    }

    /// Request body limit: base64 ciphertext plus room for the other fields
    pub fn max_body_bytes(&self) -> usize {
        self.max_message_bytes.div_ceil(3) * 4 + 1024
    }
}
