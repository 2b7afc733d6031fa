//! Configuration management for the broker
//!
//! This module provides configuration file support with TOML format,
//! environment variable overrides, and defaults matching a single-node
//! development setup.

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::error::{Error, Result, ValidationError};

/// Main broker configuration
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct BrokerConfig {
    /// HTTP API
    #[serde(default)]
    pub http: HttpConfig,

    /// gRPC server used for task exchange
    #[serde(default)]
    pub server: ServerConfig,

    /// Coordination store
    #[serde(default)]
    pub coordinator: CoordinatorConfig,

    /// Query execution
    #[serde(default)]
    pub query: QueryConfig,

    /// Admin user
    #[serde(default)]
    pub user: UserConfig,

    /// Logging
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// HTTP configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct HttpConfig {
    /// HTTP listen port
    #[serde(default = "default_http_port")]
    pub port: u16,
}

/// gRPC server configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServerConfig {
    /// gRPC listen port
    #[serde(default = "default_grpc_port")]
    pub port: u16,
}

/// Coordination store configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct CoordinatorConfig {
    /// Key prefix for this broker cluster
    #[serde(default = "default_namespace")]
    pub namespace: String,

    /// Store endpoints
    #[serde(default = "default_endpoints")]
    pub endpoints: Vec<String>,

    /// Dial timeout in seconds
    #[serde(default = "default_dial_timeout_secs")]
    pub dial_timeout_secs: u64,

    /// Per-call timeout in seconds
    #[serde(default = "default_call_timeout_secs")]
    pub timeout_secs: u64,
}

/// Query execution configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct QueryConfig {
    /// Deadline applied when the caller gives none, in seconds
    #[serde(default = "default_query_timeout_secs")]
    pub timeout_secs: u64,

    /// Queries slower than this are logged at warn level (0 = never)
    #[serde(default = "default_slow_query_ms")]
    pub slow_query_threshold_ms: u64,
}

/// Admin user
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct UserConfig {
    /// User name
    #[serde(default = "default_username")]
    pub username: String,

    /// Password
    #[serde(default = "default_password")]
    pub password: String,
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LoggingConfig {
    /// Log level (error, warn, info, debug, trace) or an `EnvFilter` directive
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Output format
    #[serde(default)]
    pub format: LogFormat,
}

/// Log output format
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Human-readable lines
    #[default]
    Text,
    /// One JSON object per line
    Json,
}

// Default value functions
fn default_http_port() -> u16 { 9000 }
fn default_grpc_port() -> u16 { 9001 }
fn default_namespace() -> String { "/lindb/broker".to_string() }
fn default_endpoints() -> Vec<String> { vec!["http://localhost:2379".to_string()] }
fn default_dial_timeout_secs() -> u64 { 5 }
fn default_call_timeout_secs() -> u64 { 1 }
fn default_query_timeout_secs() -> u64 { 30 }
fn default_slow_query_ms() -> u64 { 5_000 }
fn default_username() -> String { "admin".to_string() }
fn default_password() -> String { "admin123".to_string() }
fn default_log_level() -> String { "info".to_string() }

impl Default for HttpConfig {
    fn default() -> Self {
        Self { port: default_http_port() }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self { port: default_grpc_port() }
    }
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            namespace: default_namespace(),
            endpoints: default_endpoints(),
            dial_timeout_secs: default_dial_timeout_secs(),
            timeout_secs: default_call_timeout_secs(),
        }
    }
}

impl CoordinatorConfig {
    /// Per-call repository timeout
    pub fn call_timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

impl Default for QueryConfig {
    fn default() -> Self {
        Self {
            timeout_secs: default_query_timeout_secs(),
            slow_query_threshold_ms: default_slow_query_ms(),
        }
    }
}

impl QueryConfig {
    /// Default query deadline
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    /// Slow query threshold, if enabled
    pub fn slow_query_threshold(&self) -> Option<Duration> {
        (self.slow_query_threshold_ms > 0).then(|| Duration::from_millis(self.slow_query_threshold_ms))
    }
}

impl Default for UserConfig {
    fn default() -> Self {
        Self {
            username: default_username(),
            password: default_password(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: LogFormat::Text,
        }
    }
}

impl BrokerConfig {
    /// Parse configuration from TOML text
    pub fn from_toml(contents: &str) -> Result<Self> {
        toml::from_str(contents)
            .map_err(|e| Error::Configuration(format!("Failed to parse config: {}", e)))
    }

    /// Load configuration from TOML file
    pub fn from_file(path: &str) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_toml(&contents)
    }

    /// Load configuration with environment variable overrides
    pub fn from_file_with_env(path: &str) -> Result<Self> {
        let mut config = Self::from_file(path)?;
        config.apply_env_overrides();
        Ok(config)
    }

    /// Load from environment variables only
    pub fn from_env() -> Self {
        let mut config = Self::default();
        config.apply_env_overrides();
        config
    }

    /// Apply environment variable overrides
    pub fn apply_env_overrides(&mut self) {
        self.apply_overrides(|key| std::env::var(key).ok());
    }

    /// Apply overrides from `lookup`, keyed by environment variable name
    pub fn apply_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(p) = lookup("BROKER_HTTP_PORT").and_then(|v| v.parse().ok()) {
            self.http.port = p;
        }
        if let Some(p) = lookup("BROKER_GRPC_PORT").and_then(|v| v.parse().ok()) {
            self.server.port = p;
        }
        if let Some(endpoints) = lookup("BROKER_COORDINATOR_ENDPOINTS") {
            self.coordinator.endpoints = endpoints
                .split(',')
                .map(str::trim)
                .filter(|e| !e.is_empty())
                .map(String::from)
                .collect();
        }
        if let Some(t) = lookup("BROKER_QUERY_TIMEOUT_SECS").and_then(|v| v.parse().ok()) {
            self.query.timeout_secs = t;
        }
        if let Some(log_level) = lookup("RUST_LOG") {
            self.logging.level = log_level;
        }
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if self.http.port == 0 {
            return Err(port_out_of_range("http.port", self.http.port));
        }
        if self.server.port == 0 {
            return Err(port_out_of_range("server.port", self.server.port));
        }
        if self.http.port == self.server.port {
            return Err(Error::Configuration(
                "HTTP and gRPC ports must differ".to_string(),
            ));
        }
        if self.coordinator.endpoints.is_empty() {
            return Err(ValidationError::MissingField("coordinator.endpoints".to_string()).into());
        }
        if self.coordinator.timeout_secs == 0 {
            return Err(ValidationError::OutOfRange {
                field: "coordinator.timeout_secs".to_string(),
                value: "0".to_string(),
                min: "1".to_string(),
                max: "60".to_string(),
            }
            .into());
        }
        if self.query.timeout_secs == 0 {
            return Err(ValidationError::OutOfRange {
                field: "query.timeout_secs".to_string(),
                value: "0".to_string(),
                min: "1".to_string(),
                max: u64::MAX.to_string(),
            }
            .into());
        }
        Ok(())
    }

    /// Save configuration to TOML file
    pub fn save_to_file(&self, path: &str) -> Result<()> {
        let contents = toml::to_string_pretty(self)
            .map_err(|e| Error::Serialization(format!("Failed to serialize config: {}", e)))?;
        std::fs::write(path, contents)?;
        Ok(())
    }
}

fn port_out_of_range(field: &str, port: u16) -> Error {
    ValidationError::OutOfRange {
        field: field.to_string(),
        value: port.to_string(),
        min: "1".to_string(),
        max: "65535".to_string(),
    }
    .into()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = BrokerConfig::default();
        assert_eq!(config.http.port, 9000);
        assert_eq!(config.server.port, 9001);
        assert_eq!(config.coordinator.namespace, "/lindb/broker");
        assert_eq!(config.query.timeout(), Duration::from_secs(30));
        assert_eq!(config.coordinator.call_timeout(), Duration::from_secs(1));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_toml_uses_defaults() {
        let config = BrokerConfig::from_toml(
            r#"
            [query]
            timeout_secs = 5

            [logging]
            level = "debug"
            format = "json"
            "#,
        )
        .unwrap();
        assert_eq!(config.query.timeout_secs, 5);
        assert_eq!(config.query.slow_query_threshold_ms, 5_000);
        assert_eq!(config.logging.level, "debug");
        assert_eq!(config.logging.format, LogFormat::Json);
        assert_eq!(config.http.port, 9000);
    }

    #[test]
    fn test_invalid_config() {
        let mut config = BrokerConfig::default();
        config.server.port = 9000;
        assert!(config.validate().is_err());

        let mut config = BrokerConfig::default();
        config.coordinator.endpoints.clear();
        assert!(config.validate().is_err());

        let mut config = BrokerConfig::default();
        config.query.timeout_secs = 0;
        assert!(config.validate().is_err());
        assert!(BrokerConfig::from_toml("[http]\nport = \"x\"").is_err());
    }

    #[test]
    fn test_file_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("broker.toml");
        let path = path.to_str().unwrap();

        let mut config = BrokerConfig::default();
        config.http.port = 19000;
        config.save_to_file(path).unwrap();

        let loaded = BrokerConfig::from_file(path).unwrap();
        assert_eq!(loaded.http.port, 19000);
        assert!(BrokerConfig::from_file("/nonexistent/broker.toml").is_err());
    }

    #[test]
    fn test_overrides() {
        let vars: std::collections::HashMap<&str, &str> = [
            ("BROKER_QUERY_TIMEOUT_SECS", "7"),
            ("BROKER_HTTP_PORT", "not-a-port"),
            ("BROKER_COORDINATOR_ENDPOINTS", "http://a:2379, ,http://b:2379"),
            ("RUST_LOG", "debug"),
        ]
        .into_iter()
        .collect();

        let mut config = BrokerConfig::default();
        config.apply_overrides(|key| vars.get(key).map(|v| v.to_string()));
        assert_eq!(config.query.timeout_secs, 7);
        // Unparseable values are ignored
        assert_eq!(config.http.port, 9000);
        assert_eq!(config.coordinator.endpoints, vec!["http://a:2379", "http://b:2379"]);
        assert_eq!(config.logging.level, "debug");
    }
}
