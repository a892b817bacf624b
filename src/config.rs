//! Relay configuration loaded from TOML
//!
//! The `[amqp]` section carries the broker endpoint and exchange names; the
//! optional `[health]` section controls the HTTP health server.

use serde::{Deserialize, Serialize};
use std::net::SocketAddrV4;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

/// Top-level relay configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RelayConfig {
    pub amqp: AmqpSection,
    #[serde(default)]
    pub health: HealthSection,
}

/// Broker endpoint, credentials and exchange names
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AmqpSection {
    /// Broker address as `ipv4:port`
    pub endpoint: String,
    #[serde(default = "default_vhost")]
    pub vhost: String,
    pub username: String,
    /// Inline password; ignored when `password_env` resolves
    #[serde(default)]
    pub password: String,
    /// Environment variable containing the password
    pub password_env: Option<String>,
    pub exchange: ExchangeSection,
    /// Publish status events to the status exchange
    #[serde(default)]
    pub send_status_messages: bool,
    /// Upper bound on a single wait for broker events
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    /// Delay after a failed connect attempt
    #[serde(default = "default_connect_backoff_ms")]
    pub connect_backoff_ms: u64,
    /// Upper bound on one connect attempt, handshake and channel setup included
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ExchangeSection {
    /// Fanout exchange carrying broadcast events
    pub broadcast: String,
    /// Topic exchange receiving status events
    pub status: String,
}

/// Health server section
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct HealthSection {
    #[serde(default = "default_health_enabled")]
    pub enabled: bool,
    #[serde(default = "default_health_port")]
    pub port: u16,
}

impl Default for HealthSection {
    fn default() -> Self {
        Self {
            enabled: default_health_enabled(),
            port: default_health_port(),
        }
    }
}

fn default_vhost() -> String {
    "/".to_string()
}

fn default_poll_interval_ms() -> u64 {
    1000
}

fn default_connect_backoff_ms() -> u64 {
    1000
}

fn default_connect_timeout_ms() -> u64 {
    10_000
}

fn default_health_enabled() -> bool {
    true
}

fn default_health_port() -> u16 {
    8080
}

/// Configuration loading errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    FileRead(#[from] std::io::Error),
    #[error("Failed to parse TOML: {0}")]
    TomlParse(#[from] toml::de::Error),
    #[error("Environment variable not found: {0}")]
    EnvVarNotFound(String),
    #[error("Broker endpoint must be an IPv4 address with port, got '{0}'")]
    InvalidEndpoint(String),
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

impl RelayConfig {
    /// Load configuration from TOML file and validate it
    pub fn load_from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        let config: RelayConfig = toml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Check every field that would otherwise fail only at connect time
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.amqp.socket_addr()?;

        if self.amqp.exchange.broadcast.trim().is_empty() {
            return Err(ConfigError::InvalidConfig(
                "amqp.exchange.broadcast must not be empty".to_string(),
            ));
        }
        if self.amqp.exchange.status.trim().is_empty() {
            return Err(ConfigError::InvalidConfig(
                "amqp.exchange.status must not be empty".to_string(),
            ));
        }
        if self.amqp.poll_interval_ms == 0 {
            return Err(ConfigError::InvalidConfig(
                "amqp.poll_interval_ms must be greater than zero".to_string(),
            ));
        }
        if self.amqp.connect_backoff_ms == 0 {
            return Err(ConfigError::InvalidConfig(
                "amqp.connect_backoff_ms must be greater than zero".to_string(),
            ));
        }
        if self.amqp.connect_timeout_ms == 0 {
            return Err(ConfigError::InvalidConfig(
                "amqp.connect_timeout_ms must be greater than zero".to_string(),
            ));
        }

        Ok(())
    }

    /// Copy of this configuration safe to print
    pub fn redacted(&self) -> Self {
        let mut copy = self.clone();
        if !copy.amqp.password.is_empty() {
            copy.amqp.password = "***".to_string();
        }
        copy
    }
}

impl AmqpSection {
    /// Parse the endpoint; hostnames and IPv6 literals are rejected
    pub fn socket_addr(&self) -> Result<SocketAddrV4, ConfigError> {
        self.endpoint
            .trim()
            .parse::<SocketAddrV4>()
            .map_err(|_| ConfigError::InvalidEndpoint(self.endpoint.clone()))
    }

    /// Resolve the broker password, preferring `password_env`
    pub fn resolve_password(&self) -> Result<String, ConfigError> {
        match &self.password_env {
            Some(name) => {
                std::env::var(name).map_err(|_| ConfigError::EnvVarNotFound(name.clone()))
            }
            None => Ok(self.password.clone()),
        }
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn connect_backoff(&self) -> Duration {
        Duration::from_millis(self.connect_backoff_ms)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    /// Create a test configuration for unit testing
    #[cfg(test)]
    pub fn test_section() -> Self {
        let toml_content = r#"
endpoint = "127.0.0.1:5672"
username = "guest"
password = "guest"
send_status_messages = true

[exchange]
broadcast = "broadcast"
status = "status"
"#;
        toml::from_str(toml_content).expect("Test config should parse")
    }
}
