//! Configuration system for SynapseLink
//!
//! A single TOML file describes the device identity, the broker, engine
//! timing and the caller-side reconnect policy. Everything except
//! `device.id` and `broker.url` has a default.

use crate::protocol::validate_device_id;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

/// Main link configuration structure
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LinkConfig {
    pub device: DeviceSection,
    pub broker: BrokerSection,
    #[serde(default)]
    pub engine: EngineSection,
    #[serde(default)]
    pub reconnect: ReconnectSection,
}

/// Device section
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DeviceSection {
    /// Device identifier, also the pub/sub topic (must match [a-zA-Z0-9._-]+)
    pub id: String,
    /// Protocol version advertised in MAXVERSION replies
    #[serde(default = "default_max_version")]
    pub max_version: u32,
}

/// Broker section
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BrokerSection {
    /// Broker URL, mqtt:// or mqtts://
    pub url: String,
    /// Environment variable containing username
    pub username_env: Option<String>,
    /// Environment variable containing password
    pub password_env: Option<String>,
    #[serde(default = "default_keep_alive")]
    pub keep_alive_secs: u64,
}

/// Engine timing
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EngineSection {
    /// Upper bound on one poll's wait for broker traffic
    #[serde(default = "default_poll_timeout")]
    pub poll_timeout_ms: u64,
    #[serde(default = "default_handshake_timeout")]
    pub handshake_timeout_ms: u64,
    /// Pause between ticks of the binary's run loop
    #[serde(default = "default_tick_interval")]
    pub tick_interval_ms: u64,
}

impl Default for EngineSection {
    fn default() -> Self {
        Self {
            poll_timeout_ms: default_poll_timeout(),
            handshake_timeout_ms: default_handshake_timeout(),
            tick_interval_ms: default_tick_interval(),
        }
    }
}

impl EngineSection {
    pub fn poll_timeout(&self) -> Duration {
        Duration::from_millis(self.poll_timeout_ms)
    }

    pub fn handshake_timeout(&self) -> Duration {
        Duration::from_millis(self.handshake_timeout_ms)
    }

    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms)
    }
}

/// Reconnect policy consulted by the caller between connect attempts
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ReconnectSection {
    #[serde(default = "default_backoff")]
    pub backoff_ms: Vec<u64>,
    #[serde(default = "default_sustained_delay")]
    pub sustained_delay_ms: u64,
    /// None = unlimited
    pub max_attempts: Option<u32>,
}

impl Default for ReconnectSection {
    fn default() -> Self {
        Self {
            backoff_ms: default_backoff(),
            sustained_delay_ms: default_sustained_delay(),
            max_attempts: None,
        }
    }
}

fn default_max_version() -> u32 {
    1
}

fn default_keep_alive() -> u64 {
    15
}

fn default_poll_timeout() -> u64 {
    1000
}

fn default_handshake_timeout() -> u64 {
    5000
}

fn default_tick_interval() -> u64 {
    50
}

fn default_backoff() -> Vec<u64> {
    vec![250, 500, 1000, 2000]
}

fn default_sustained_delay() -> u64 {
    2000
}

/// Configuration loading errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    FileRead(#[from] std::io::Error),

    #[error("Failed to parse TOML: {0}")]
    TomlParse(#[from] toml::de::Error),

    #[error("Invalid device ID format: {0}")]
    InvalidDeviceId(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

impl LinkConfig {
    /// Load and validate configuration from a TOML file
    pub fn load_from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let config: LinkConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        validate_device_id(&self.device.id).map_err(|e| {
            ConfigError::InvalidDeviceId(format!("Device ID '{}': {e}", self.device.id))
        })?;

        let url = url::Url::parse(&self.broker.url).map_err(|e| {
            ConfigError::InvalidConfig(format!("broker.url '{}': {e}", self.broker.url))
        })?;
        if !matches!(url.scheme(), "mqtt" | "mqtts") {
            return Err(ConfigError::InvalidConfig(format!(
                "broker.url scheme must be mqtt or mqtts, got '{}'",
                url.scheme()
            )));
        }

        // keep alive below 5s is rejected by the MQTT client
        if self.broker.keep_alive_secs < 5 {
            return Err(ConfigError::InvalidConfig(
                "broker.keep_alive_secs must be at least 5".to_string(),
            ));
        }

        if self.engine.poll_timeout_ms == 0 {
            return Err(ConfigError::InvalidConfig(
                "engine.poll_timeout_ms must be greater than zero".to_string(),
            ));
        }

        if self.engine.handshake_timeout_ms == 0 {
            return Err(ConfigError::InvalidConfig(
                "engine.handshake_timeout_ms must be greater than zero".to_string(),
            ));
        }

        if self.reconnect.max_attempts == Some(0) {
            return Err(ConfigError::InvalidConfig(
                "reconnect.max_attempts must be at least 1 when set".to_string(),
            ));
        }

        Ok(())
    }

    fn get_env_var_optional(env_var_name: Option<&String>) -> Option<String> {
        env_var_name.and_then(|name| std::env::var(name).ok())
    }

    /// Broker username from the configured environment variable
    pub fn broker_username(&self) -> Option<String> {
        Self::get_env_var_optional(self.broker.username_env.as_ref())
    }

    pub fn broker_password(&self) -> Option<String> {
        Self::get_env_var_optional(self.broker.password_env.as_ref())
    }

    #[cfg(test)]
    pub fn test_config() -> Self {
        let toml_content = r#"
[device]
id = "synapsepod-test"

[broker]
url = "mqtt://localhost:1883"
"#;

        toml::from_str(toml_content).expect("Test config should parse")
    }
}
