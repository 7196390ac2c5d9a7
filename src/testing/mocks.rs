//! Mock implementations for testing
//!
//! Provides a recording [`BrokerLink`] so manager behaviour can be asserted
//! on the exact requests it would send to a broker.

use crate::transport::mqtt::MqttError;
use crate::transport::BrokerLink;
use async_trait::async_trait;
use rumqttc::v5::mqttbytes::QoS;
use std::sync::{Arc, Mutex, PoisonError};

/// A request the manager sent to the broker link
#[derive(Debug, Clone, PartialEq)]
pub enum BrokerRequest {
    Subscribe { topic: String, qos: QoS },
    Unsubscribe { topic: String },
    Reconnect,
}

/// Broker link that records requests instead of sending them
#[derive(Debug, Clone, Default)]
pub struct MockBroker {
    requests: Arc<Mutex<Vec<BrokerRequest>>>,
    pub should_fail: bool,
}

impl MockBroker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records requests but reports every one as failed
    pub fn with_failure() -> Self {
        Self {
            should_fail: true,
            ..Default::default()
        }
    }

    pub fn requests(&self) -> Vec<BrokerRequest> {
        self.lock().clone()
    }

    pub fn subscribe_count(&self, topic: &str) -> usize {
        self.lock()
            .iter()
            .filter(|r| matches!(r, BrokerRequest::Subscribe { topic: t, .. } if t == topic))
            .count()
    }

    pub fn unsubscribe_count(&self, topic: &str) -> usize {
        self.lock()
            .iter()
            .filter(|r| matches!(r, BrokerRequest::Unsubscribe { topic: t } if t == topic))
            .count()
    }

    pub fn reconnect_count(&self) -> usize {
        self.lock()
            .iter()
            .filter(|r| matches!(r, BrokerRequest::Reconnect))
            .count()
    }

    pub fn clear_history(&self) {
        self.lock().clear();
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Vec<BrokerRequest>> {
        self.requests.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn record(&self, request: BrokerRequest) -> Result<(), MqttError> {
        self.lock().push(request);

        if self.should_fail {
            Err(MqttError::SupervisorStopped)
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl BrokerLink for MockBroker {
    async fn subscribe(&self, topic: &str, qos: QoS) -> Result<(), MqttError> {
        self.record(BrokerRequest::Subscribe {
            topic: topic.to_string(),
            qos,
        })
    }

    async fn unsubscribe(&self, topic: &str) -> Result<(), MqttError> {
        self.record(BrokerRequest::Unsubscribe {
            topic: topic.to_string(),
        })
    }

    async fn reconnect(&self) -> Result<(), MqttError> {
        self.record(BrokerRequest::Reconnect)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_mock_broker_records_requests() {
        let broker = MockBroker::new();
        broker.subscribe("a/b", QoS::ExactlyOnce).await.unwrap();
        broker.unsubscribe("a/b").await.unwrap();
        broker.reconnect().await.unwrap();

        assert_eq!(
            broker.requests(),
            vec![
                BrokerRequest::Subscribe {
                    topic: "a/b".to_string(),
                    qos: QoS::ExactlyOnce
                },
                BrokerRequest::Unsubscribe {
                    topic: "a/b".to_string()
                },
                BrokerRequest::Reconnect,
            ]
        );
        assert_eq!(broker.subscribe_count("a/b"), 1);
        assert_eq!(broker.unsubscribe_count("a/b"), 1);
        assert_eq!(broker.reconnect_count(), 1);
    }

    #[tokio::test]
    async fn test_mock_broker_failure_mode_still_records() {
        let broker = MockBroker::with_failure();
        assert!(matches!(
            broker.subscribe("a", QoS::AtMostOnce).await,
            Err(MqttError::SupervisorStopped)
        ));
        assert!(broker.reconnect().await.is_err());
        assert_eq!(broker.requests().len(), 2);

        broker.clear_history();
        assert!(broker.requests().is_empty());
    }
}
