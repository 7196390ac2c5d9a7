//! Configuration system for the MQTT relay
//!
//! Configuration is read once at startup, either from a TOML file or entirely
//! from environment variables. Credentials are never stored in the file; the
//! file names the environment variables that hold them.

use rumqttc::v5::mqttbytes::QoS;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use thiserror::Error;
use url::Url;

/// Environment variable holding the broker URL when no config file is used
pub const BROKER_URL_ENV: &str = "MQTT_BROKER_URL";
/// Default environment variable holding the broker username
pub const USERNAME_ENV: &str = "MQTT_USERNAME";
/// Default environment variable holding the broker password
pub const PASSWORD_ENV: &str = "MQTT_PASSWORD";
/// Smallest keep alive the MQTT client accepts
pub const MIN_KEEP_ALIVE_SECS: u64 = 5;

/// Main relay configuration structure
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RelayConfig {
    pub mqtt: MqttSection,
    #[serde(default)]
    pub health: HealthSection,
    #[serde(default)]
    pub subscriptions: SubscriptionSection,
}

/// MQTT connection settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MqttSection {
    /// MQTT broker URL with protocol and port
    pub broker_url: String,
    /// Environment variable containing username
    #[serde(default = "default_username_env")]
    pub username_env: Option<String>,
    /// Environment variable containing password
    #[serde(default = "default_password_env")]
    pub password_env: Option<String>,
    /// Prefix of the generated client identifier
    #[serde(default = "default_client_id_prefix")]
    pub client_id_prefix: String,
    /// Keep alive interval in seconds
    #[serde(default = "default_keep_alive_secs")]
    pub keep_alive_secs: u64,
    /// Pause between automatic reconnect attempts after a network error
    #[serde(default = "default_reconnect_period_ms")]
    pub reconnect_period_ms: u64,
    /// Ask the broker to discard any previous session on connect
    #[serde(default = "default_true")]
    pub clean_start: bool,
}

fn default_username_env() -> Option<String> {
    Some(USERNAME_ENV.to_string())
}

fn default_password_env() -> Option<String> {
    Some(PASSWORD_ENV.to_string())
}

fn default_client_id_prefix() -> String {
    "mqttClient_".to_string()
}

fn default_keep_alive_secs() -> u64 {
    60
}

fn default_reconnect_period_ms() -> u64 {
    1000
}

fn default_true() -> bool {
    true
}

impl MqttSection {
    /// Build a section for the given broker with every other field defaulted
    pub fn with_broker(broker_url: impl Into<String>) -> Self {
        Self {
            broker_url: broker_url.into(),
            username_env: default_username_env(),
            password_env: default_password_env(),
            client_id_prefix: default_client_id_prefix(),
            keep_alive_secs: default_keep_alive_secs(),
            reconnect_period_ms: default_reconnect_period_ms(),
            clean_start: true,
        }
    }

    pub fn reconnect_period(&self) -> Duration {
        Duration::from_millis(self.reconnect_period_ms)
    }

    /// Resolve the username from its environment variable
    pub fn username(&self) -> Option<String> {
        get_env_var_optional(self.username_env.as_ref())
    }

    /// Resolve the password from its environment variable
    pub fn password(&self) -> Option<String> {
        get_env_var_optional(self.password_env.as_ref())
    }
}

/// Health check loop settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct HealthSection {
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Seconds between two connection samples (default: 10)
    #[serde(default = "default_health_interval_secs")]
    pub interval_secs: u64,
    /// Consecutive failed samples that force a reconnect (default: 3)
    #[serde(default = "default_max_failed_checks")]
    pub max_failed_checks: u32,
}

fn default_health_interval_secs() -> u64 {
    10
}

fn default_max_failed_checks() -> u32 {
    3
}

impl Default for HealthSection {
    fn default() -> Self {
        Self {
            enabled: true,
            interval_secs: default_health_interval_secs(),
            max_failed_checks: default_max_failed_checks(),
        }
    }
}

impl HealthSection {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }
}

/// Broker-level subscription settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SubscriptionSection {
    /// QoS used for every broker subscription (0, 1 or 2; default: 2)
    #[serde(default = "default_qos")]
    pub qos: u8,
    /// Re-issue subscriptions for live topics after a reconnect
    #[serde(default = "default_true")]
    pub resubscribe_on_reconnect: bool,
}

fn default_qos() -> u8 {
    2
}

impl Default for SubscriptionSection {
    fn default() -> Self {
        Self {
            qos: default_qos(),
            resubscribe_on_reconnect: true,
        }
    }
}

impl SubscriptionSection {
    /// QoS level as understood by the MQTT client
    pub fn qos_level(&self) -> Result<QoS, ConfigError> {
        match self.qos {
            0 => Ok(QoS::AtMostOnce),
            1 => Ok(QoS::AtLeastOnce),
            2 => Ok(QoS::ExactlyOnce),
            other => Err(ConfigError::InvalidConfig(format!(
                "subscriptions.qos must be 0, 1 or 2, got {other}"
            ))),
        }
    }
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
    #[error("Invalid broker URL: {0}")]
    InvalidBrokerUrl(String),
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

impl RelayConfig {
    /// Load configuration from a TOML file and validate it
    pub fn load_from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    /// Parse and validate configuration from TOML text
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let config: RelayConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Build configuration from environment variables only
    ///
    /// `MQTT_BROKER_URL` is required; credentials are read from
    /// `MQTT_USERNAME` / `MQTT_PASSWORD` when the connection is opened.
    pub fn from_env() -> Result<Self, ConfigError> {
        let broker_url = get_env_var_required(BROKER_URL_ENV)?;
        let config = Self::with_broker(broker_url);
        config.validate()?;
        Ok(config)
    }

    /// Default configuration pointing at the given broker
    pub fn with_broker(broker_url: impl Into<String>) -> Self {
        Self {
            mqtt: MqttSection::with_broker(broker_url),
            health: HealthSection::default(),
            subscriptions: SubscriptionSection::default(),
        }
    }

    /// Validate cross-field constraints
    pub fn validate(&self) -> Result<(), ConfigError> {
        validate_broker_url(&self.mqtt.broker_url)?;
        self.subscriptions.qos_level()?;

        if self.health.interval_secs == 0 {
            return Err(ConfigError::InvalidConfig(
                "health.interval_secs must be greater than 0".to_string(),
            ));
        }
        if self.health.max_failed_checks == 0 {
            return Err(ConfigError::InvalidConfig(
                "health.max_failed_checks must be greater than 0".to_string(),
            ));
        }
        if self.mqtt.keep_alive_secs < MIN_KEEP_ALIVE_SECS {
            return Err(ConfigError::InvalidConfig(format!(
                "mqtt.keep_alive_secs must be at least {MIN_KEEP_ALIVE_SECS}"
            )));
        }
        if self.mqtt.reconnect_period_ms == 0 {
            return Err(ConfigError::InvalidConfig(
                "mqtt.reconnect_period_ms must be greater than 0".to_string(),
            ));
        }
        Ok(())
    }
}

fn get_env_var_optional(env_var_name: Option<&String>) -> Option<String> {
    env_var_name.and_then(|name| std::env::var(name).ok())
}

fn get_env_var_required(env_var_name: &str) -> Result<String, ConfigError> {
    std::env::var(env_var_name).map_err(|_| ConfigError::EnvVarNotFound(env_var_name.to_string()))
}

/// Broker URLs must be mqtt:// or mqtts:// with a host
fn validate_broker_url(broker_url: &str) -> Result<(), ConfigError> {
    let url =
        Url::parse(broker_url).map_err(|_| ConfigError::InvalidBrokerUrl(broker_url.to_string()))?;

    if !matches!(url.scheme(), "mqtt" | "mqtts" | "tcp" | "ssl") {
        return Err(ConfigError::InvalidBrokerUrl(format!(
            "{broker_url} (unsupported scheme '{}')",
            url.scheme()
        )));
    }
    if url.host_str().is_none() {
        return Err(ConfigError::InvalidBrokerUrl(broker_url.to_string()));
    }
    Ok(())
}
