//! Transport layer for the relay
//!
//! This module provides the broker abstraction used by the connection manager
//! and its MQTT implementation.

use rumqttc::v5::mqttbytes::QoS;

pub mod mqtt;

use mqtt::MqttError;

/// Broker-side operations the connection manager relies on
///
/// This trait provides an abstraction over the MQTT client so the manager's
/// subscription bookkeeping can be driven without a live broker.
#[async_trait::async_trait]
pub trait BrokerLink: Send + Sync {
    /// Request a broker subscription for a topic filter
    async fn subscribe(&self, topic: &str, qos: QoS) -> Result<(), MqttError>;

    /// Request removal of a broker subscription
    async fn unsubscribe(&self, topic: &str) -> Result<(), MqttError>;

    /// Drop the current connection and open a fresh one
    async fn reconnect(&self) -> Result<(), MqttError>;
}
