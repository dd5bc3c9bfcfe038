//! Configuration management for the throttling service.
//!
//! Values come from an optional YAML file, then from environment
//! variables prefixed `THROTTLED__` (sections separated by `__`, e.g.
//! `THROTTLED__SERVER__HTTP_ADDR`). Every section has defaults.

use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::Path;
use tracing::info;

use crate::error::{Result, ThrottleError};
use crate::throttle::ThrottleRulesConfig;

/// Prefix of environment variable overrides.
const ENV_PREFIX: &str = "THROTTLED";

/// Main configuration for the throttling service.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ThrottledConfig {
    /// Server configuration
    #[serde(default)]
    pub server: ServerConfig,

    /// Event store configuration
    #[serde(default)]
    pub storage: StorageConfig,

    /// Throttle rule configuration
    #[serde(default)]
    pub throttling: ThrottlingConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// HTTP server address
    #[serde(default = "default_http_addr")]
    pub http_addr: SocketAddr,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            http_addr: default_http_addr(),
        }
    }
}

fn default_http_addr() -> SocketAddr {
    SocketAddr::from(([127, 0, 0, 1], 8085))
}

/// Which event store backs the throttler.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    /// Events live in process memory and are never pruned
    Memory,
    /// Events are persisted to SQLite
    #[default]
    Sqlite,
}

/// Event store configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Storage backend
    #[serde(default)]
    pub backend: StorageBackend,

    /// SQLite connection URL, used by the `sqlite` backend
    #[serde(default = "default_sqlite_url")]
    pub sqlite_url: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: StorageBackend::default(),
            sqlite_url: default_sqlite_url(),
        }
    }
}

fn default_sqlite_url() -> String {
    "sqlite://throttled.db".to_string()
}

/// Throttle rule configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ThrottlingConfig {
    /// Path to a throttle rules file; the built-in rules are used when unset
    pub rules_path: Option<String>,
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Default filter directive, overridden by `RUST_LOG`
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Emit JSON lines instead of human-readable output
    #[serde(default)]
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

impl ThrottledConfig {
    /// Load configuration from an optional file plus environment overrides.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut builder = config::Config::builder();

        if let Some(path) = path {
            info!(path = %path.display(), "Loading service configuration");
            builder = builder.add_source(config::File::from(path).required(true));
        }

        builder
            .add_source(
                config::Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .and_then(|settings| settings.try_deserialize())
            .map_err(|e| ThrottleError::Config(e.to_string()))
    }

    /// Load configuration from a YAML string, without environment overrides.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        config::Config::builder()
            .add_source(config::File::from_str(yaml, config::FileFormat::Yaml))
            .build()
            .and_then(|settings| settings.try_deserialize())
            .map_err(|e| ThrottleError::Config(e.to_string()))
    }

    /// Load the throttle rules this configuration points at.
    pub fn load_rules(&self) -> Result<ThrottleRulesConfig> {
        match &self.throttling.rules_path {
            Some(path) => ThrottleRulesConfig::from_file(path),
            None => {
                info!("No rules file configured, using built-in throttle rules");
                ThrottleRulesConfig::defaults()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = ThrottledConfig::default();
        assert_eq!(config.server.http_addr, "127.0.0.1:8085".parse().unwrap());
        assert_eq!(config.storage.backend, StorageBackend::Sqlite);
        assert_eq!(config.storage.sqlite_url, "sqlite://throttled.db");
        assert!(config.throttling.rules_path.is_none());
        assert_eq!(config.logging.level, "info");
        assert!(!config.logging.json);
    }

    #[test]
    fn test_from_yaml_partial() {
        let yaml = r#"
server:
  http_addr: 0.0.0.0:9000
storage:
  backend: memory
logging:
  json: true
"#;
        let config = ThrottledConfig::from_yaml(yaml).unwrap();
        assert_eq!(config.server.http_addr, "0.0.0.0:9000".parse().unwrap());
        assert_eq!(config.storage.backend, StorageBackend::Memory);
        assert_eq!(config.storage.sqlite_url, "sqlite://throttled.db");
        assert!(config.logging.json);
        assert_eq!(config.logging.level, "info");
    }

    #[test]
    fn test_unknown_backend_rejected() {
        let yaml = "storage:\n  backend: redis\n";
        let err = ThrottledConfig::from_yaml(yaml).unwrap_err();
        assert!(matches!(err, ThrottleError::Config(_)));
    }

    #[test]
    fn test_missing_file_rejected() {
        let err = ThrottledConfig::load(Some(Path::new("/nonexistent/throttled.yaml"))).unwrap_err();
        assert!(matches!(err, ThrottleError::Config(_)));
    }

    #[test]
    fn test_load_rules_falls_back_to_defaults() {
        let rules = ThrottledConfig::default().load_rules().unwrap();
        assert!(rules.throttles.contains_key("sign_in_attempt"));
    }

    #[test]
    fn test_load_rules_missing_file() {
        let mut config = ThrottledConfig::default();
        config.throttling.rules_path = Some("/nonexistent/throttles.yaml".to_string());
        assert!(matches!(config.load_rules().unwrap_err(), ThrottleError::Io(_)));
    }
}
