//! MQTT Relay
//!
//! A single shared MQTT connection with topic-keyed listeners for the rest of
//! an application.
//!
//! # Overview
//!
//! This crate provides:
//! - A connection manager that accepts subscriptions before the broker is
//!   reachable and issues them once connected
//! - A topic emitter with MQTT wildcard matching for local fan-out
//! - An MQTT v5 transport over `rumqttc` with automatic reconnection
//! - A periodic health check that forces a reconnect after repeated failures
//! - A connection context that owns all of the above and shuts it down cleanly
//!
//! # Quick Start
//!
//! ```rust
//! use mqtt_relay::emitter::{Emitter, TopicMessage};
//!
//! let emitter = Emitter::new();
//! emitter.on("sensors/+/temperature", |msg: &TopicMessage| {
//!     println!("{} -> {}", msg.topic, msg.message);
//! });
//!
//! let delivered = emitter.emit(&TopicMessage::new("sensors/kitchen/temperature", "21.5"));
//! assert_eq!(delivered, 1);
//! ```

pub mod config;
pub mod context;
pub mod emitter;
pub mod error;
pub mod health;
pub mod manager;
pub mod observability;
pub mod testing;
pub mod transport;

pub use config::{ConfigError, RelayConfig};
pub use context::ConnectionContext;
pub use emitter::{Emitter, ListenerId, TopicMessage};
pub use error::{RelayError, RelayResult};
pub use manager::{ConnectionManager, SubscriptionOptions};
pub use transport::mqtt::{ConnectionState, MqttClient};
