//! Connection manager: topic subscriptions over a single broker link
//!
//! The manager owns the emitter, the connection state machine and the queue
//! of broker subscriptions deferred until the next successful connection.
//! Local listeners are registered immediately; broker subscriptions are issued
//! immediately when connected and otherwise exactly once on the next
//! transition into [`ConnectionState::Connected`].

use crate::config::{ConfigError, SubscriptionSection};
use crate::emitter::{Emitter, ListenerId, TopicMessage};
use crate::transport::mqtt::{
    ConnectionEvent, ConnectionState, HealthMonitor, HealthSample, MessageHandler,
};
use crate::transport::BrokerLink;
use chrono::Utc;
use rumqttc::v5::mqttbytes::QoS;
use std::collections::BTreeSet;
use std::mem::discriminant;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::{watch, Mutex};
use tracing::{debug, info, warn};

/// Broker-level subscription behaviour
#[derive(Debug, Clone, PartialEq)]
pub struct SubscriptionOptions {
    pub qos: QoS,
    pub resubscribe_on_reconnect: bool,
}

impl Default for SubscriptionOptions {
    fn default() -> Self {
        Self {
            qos: QoS::ExactlyOnce,
            resubscribe_on_reconnect: true,
        }
    }
}

impl SubscriptionOptions {
    pub fn from_config(section: &SubscriptionSection) -> Result<Self, ConfigError> {
        Ok(Self {
            qos: section.qos_level()?,
            resubscribe_on_reconnect: section.resubscribe_on_reconnect,
        })
    }
}

/// Broker subscriptions owned by the manager
#[derive(Debug, Default)]
struct SubscriptionRegistry {
    /// One entry per subscribe call made while not connected
    pending: Vec<String>,
    /// Topics subscribed through the manager and not unsubscribed since
    subscribed: BTreeSet<String>,
    connected_before: bool,
}

impl SubscriptionRegistry {
    fn defer(&mut self, topic: &str) {
        self.pending.push(topic.to_string());
        self.subscribed.insert(topic.to_string());
    }

    fn record(&mut self, topic: &str) {
        self.subscribed.insert(topic.to_string());
    }

    fn cancel(&mut self, topic: &str) -> usize {
        self.subscribed.remove(topic);
        let before = self.pending.len();
        self.pending.retain(|pending| pending != topic);
        before - self.pending.len()
    }

    /// Topics to subscribe on entering Connected
    ///
    /// Deferred requests are drained as-is. On a reconnection without a
    /// retained session, every subscribed topic that still has listeners and
    /// is not already in the list is added.
    fn flush(
        &mut self,
        resubscribe: bool,
        session_present: bool,
        has_listeners: impl Fn(&str) -> bool,
    ) -> Vec<String> {
        let mut topics: Vec<String> = self.pending.drain(..).collect();

        if self.connected_before && resubscribe && !session_present {
            for topic in &self.subscribed {
                if has_listeners(topic) && !topics.contains(topic) {
                    topics.push(topic.clone());
                }
            }
        }

        self.connected_before = true;
        topics
    }
}

/// Owner of the emitter, the connection state and the subscription queue
pub struct ConnectionManager {
    link: Arc<dyn BrokerLink>,
    emitter: Emitter,
    options: SubscriptionOptions,
    state_tx: watch::Sender<ConnectionState>,
    registry: Mutex<SubscriptionRegistry>,
    initialized: AtomicBool,
}

impl ConnectionManager {
    pub fn new(link: Arc<dyn BrokerLink>, options: SubscriptionOptions) -> Self {
        let (state_tx, _) = watch::channel(ConnectionState::default());
        Self {
            link,
            emitter: Emitter::new(),
            options,
            state_tx,
            registry: Mutex::new(SubscriptionRegistry::default()),
            initialized: AtomicBool::new(false),
        }
    }

    /// Direct access to the emitter for lower-level listeners
    pub fn emitter(&self) -> &Emitter {
        &self.emitter
    }

    pub fn options(&self) -> &SubscriptionOptions {
        &self.options
    }

    pub fn connection_state(&self) -> ConnectionState {
        self.state_tx.borrow().clone()
    }

    pub fn is_connected(&self) -> bool {
        self.state_tx.borrow().is_connected()
    }

    /// Receiver notified on every state change
    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.state_tx.subscribe()
    }

    /// Whether a connection has been started for this manager
    pub fn is_initialized(&self) -> bool {
        self.initialized.load(Ordering::SeqCst)
    }

    /// Number of broker subscriptions waiting for the next connection
    pub async fn pending_subscriptions(&self) -> usize {
        self.registry.lock().await.pending.len()
    }

    /// Register a listener and make sure the broker delivers the topic
    ///
    /// Safe to call before the connection is established. Every call adds an
    /// independent local listener and an independent broker request.
    pub async fn subscribe<F>(&self, topic: &str, callback: F) -> ListenerId
    where
        F: Fn(&TopicMessage) + Send + Sync + 'static,
    {
        let id = self.emitter.on(topic, callback);

        let issue_now = {
            let mut registry = self.registry.lock().await;
            if HealthMonitor::can_subscribe(&self.state_tx.borrow()) {
                registry.record(topic);
                true
            } else {
                registry.defer(topic);
                debug!(topic, "Not connected, broker subscription deferred");
                false
            }
        };

        if issue_now {
            self.issue_subscribe(topic).await;
        }
        id
    }

    /// Remove every local listener of a topic and drop the broker subscription
    ///
    /// Returns the number of local listeners removed.
    pub async fn unsubscribe(&self, topic: &str) -> usize {
        let removed = self.emitter.off_all(topic);
        let cancelled = self.registry.lock().await.cancel(topic);
        if cancelled > 0 {
            debug!(topic, cancelled, "Dropped deferred broker subscriptions");
        }

        match self.link.unsubscribe(topic).await {
            Ok(()) => debug!(topic, listeners = removed, "Unsubscription requested"),
            Err(e) => warn!(topic, "Failed to request unsubscription: {}", e),
        }
        removed
    }

    /// Remove a single listener; the broker subscription is left in place
    pub fn remove_listener(&self, topic: &str, id: ListenerId) -> bool {
        self.emitter.off(topic, id)
    }

    /// Decode an incoming payload and fan it out to matching listeners
    pub fn dispatch(&self, topic: &str, payload: &[u8], retain: bool) -> usize {
        let message = TopicMessage {
            topic: topic.to_string(),
            message: MessageHandler::decode_payload(payload),
            retain,
            received_at: Utc::now(),
        };

        let delivered = self.emitter.emit(&message);
        if delivered == 0 {
            debug!(topic, "Message had no local listeners");
        }
        delivered
    }

    /// Apply a connection event to the state machine
    ///
    /// Entering Connected flushes deferred subscriptions and, after a
    /// reconnection, re-subscribes the topics subscribed through this manager
    /// that still have listeners.
    pub async fn handle_connection_event(&self, event: ConnectionEvent) {
        if event == ConnectionEvent::ConnectionStarted {
            self.initialized.store(true, Ordering::SeqCst);
        }
        let session_present = matches!(
            event,
            ConnectionEvent::ConnAckReceived {
                session_present: true
            }
        );
        let next = HealthMonitor::determine_next_state(&event);

        let topics = {
            let mut registry = self.registry.lock().await;
            let previous = self.state_tx.send_replace(next.clone());

            if discriminant(&previous) != discriminant(&next) {
                HealthMonitor::log_state_transition(&previous, &next);
            } else {
                debug!("MQTT connection state unchanged: {:?}", next);
            }

            if !previous.is_connected() && next.is_connected() {
                registry.flush(
                    self.options.resubscribe_on_reconnect,
                    session_present,
                    |topic| self.emitter.has_listeners(topic),
                )
            } else {
                Vec::new()
            }
        };

        if !topics.is_empty() {
            info!(count = topics.len(), "Issuing broker subscriptions after connect");
        }
        for topic in topics {
            self.issue_subscribe(&topic).await;
        }
    }

    /// Sample taken by the health check
    pub fn health_sample(&self) -> HealthSample {
        if !self.is_initialized() {
            return HealthSample::NoConnection;
        }
        HealthSample::from_state(&self.state_tx.borrow())
    }

    /// Ask the link to drop and re-open the broker connection
    pub async fn force_reconnect(&self) {
        match self.link.reconnect().await {
            Ok(()) => info!("Forced MQTT reconnect requested"),
            Err(e) => warn!("Forced MQTT reconnect failed: {}", e),
        }
    }

    async fn issue_subscribe(&self, topic: &str) {
        match self.link.subscribe(topic, self.options.qos).await {
            Ok(()) => debug!(topic, qos = ?self.options.qos, "Subscription requested"),
            Err(e) => warn!(topic, "Failed to request subscription: {}", e),
        }
    }
}

impl std::fmt::Debug for ConnectionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionManager")
            .field("state", &*self.state_tx.borrow())
            .field("options", &self.options)
            .field("emitter", &self.emitter)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn live(topics: &[&str]) -> Vec<String> {
        topics.iter().map(|t| t.to_string()).collect()
    }

    #[test]
    fn test_first_flush_drains_pending_only() {
        let mut registry = SubscriptionRegistry::default();
        registry.defer("a");
        registry.defer("a");

        let topics = registry.flush(true, false, |_| true);
        assert_eq!(topics, live(&["a", "a"]));
        assert!(registry.pending.is_empty());
    }

    #[test]
    fn test_reconnect_flush_adds_subscribed_topics_once() {
        let mut registry = SubscriptionRegistry::default();
        registry.record("a");
        registry.flush(true, false, |_| true);
        registry.defer("b");

        let topics = registry.flush(true, false, |_| true);
        assert_eq!(topics, live(&["b", "a"]));
    }

    #[test]
    fn test_reconnect_flush_skips_topics_without_listeners() {
        let mut registry = SubscriptionRegistry::default();
        registry.record("a");
        registry.record("b");
        registry.flush(true, false, |_| true);

        let topics = registry.flush(true, false, |topic| topic == "b");
        assert_eq!(topics, live(&["b"]));
    }

    #[test]
    fn test_reconnect_flush_respects_session_and_setting() {
        let mut registry = SubscriptionRegistry::default();
        registry.record("a");
        registry.flush(true, false, |_| true);

        assert!(registry.flush(true, true, |_| true).is_empty());
        assert!(registry.flush(false, false, |_| true).is_empty());
    }

    #[test]
    fn test_cancel_removes_every_pending_entry() {
        let mut registry = SubscriptionRegistry::default();
        registry.defer("a");
        registry.defer("b");
        registry.defer("a");

        assert_eq!(registry.cancel("a"), 2);
        assert_eq!(registry.pending, live(&["b"]));
        assert!(!registry.subscribed.contains("a"));
        assert!(registry.subscribed.contains("b"));
    }

    #[test]
    fn test_subscription_options_from_config() {
        let options = SubscriptionOptions::from_config(&SubscriptionSection::default()).unwrap();
        assert_eq!(options, SubscriptionOptions::default());

        let section = SubscriptionSection {
            qos: 1,
            resubscribe_on_reconnect: false,
        };
        let options = SubscriptionOptions::from_config(&section).unwrap();
        assert_eq!(options.qos, QoS::AtLeastOnce);
        assert!(!options.resubscribe_on_reconnect);
    }
}
