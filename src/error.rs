//! Top-level error type for the MQTT relay
//!
//! Subscribe and unsubscribe failures never reach this type; they terminate in
//! a log statement. Only startup (configuration, client construction) and
//! explicit lifecycle calls return errors to application code.

use crate::config::ConfigError;
use crate::transport::mqtt::MqttError;
use thiserror::Error;

/// Main error type for relay operations
#[derive(Debug, Error)]
pub enum RelayError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Transport error: {0}")]
    Transport(#[from] MqttError),

    #[error("Background task failed: {message}")]
    TaskFailed { message: String },
}

impl RelayError {
    /// Create background task error
    pub fn task_failed<S: Into<String>>(message: S) -> Self {
        Self::TaskFailed {
            message: message.into(),
        }
    }
}

/// Result type alias for relay operations
pub type RelayResult<T> = Result<T, RelayError>;
