//! MQTT client implementation for the relay
//!
//! This module separates pure functions from I/O operations for better
//! testability.
//!
//! # Architecture
//!
//! - [`connection`] - Connection state and option construction
//! - [`message_handler`] - Event routing, payload decoding, ack correlation
//! - [`health_monitor`] - State transitions and the failure streak used by the health check
//! - [`client`] - The `rumqttc` event loop supervisor and request pump
//!
//! # Usage
//!
//! ```rust,no_run
//! use mqtt_relay::config::MqttSection;
//! use mqtt_relay::manager::{ConnectionManager, SubscriptionOptions};
//! use mqtt_relay::transport::mqtt::MqttClient;
//! use std::sync::Arc;
//! use tokio::sync::watch;
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let client = Arc::new(MqttClient::new(MqttSection::with_broker("mqtt://localhost:1883"))?);
//! let manager = Arc::new(ConnectionManager::new(client.clone(), SubscriptionOptions::default()));
//! let (_shutdown_tx, shutdown_rx) = watch::channel(false);
//! client.start(manager.clone(), shutdown_rx).await?;
//!
//! manager
//!     .subscribe("sensors/temp", |msg| println!("{}", msg.message))
//!     .await;
//! # Ok(())
//! # }
//! ```

pub mod client;
pub mod connection;
pub mod health_monitor;
pub mod message_handler;

// Re-export public types for convenience
pub use client::MqttClient;
pub use connection::{ConnectionState, MqttError};
pub use health_monitor::{
    ConnectionEvent, FailureStreak, HealthMonitor, HealthSample, HealthVerdict,
};
pub use message_handler::{AckTracker, EventRoute, MessageHandler};
