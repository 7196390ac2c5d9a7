//! Pure message routing and processing logic for MQTT events
//!
//! This module contains pure functions for handling MQTT events,
//! payload decoding, topic filter matching and acknowledgement correlation.

use bytes::Bytes;
use rumqttc::v5::mqttbytes::v5::{
    ConnectReturnCode, Packet, SubscribeReasonCode, UnsubAckReason,
};
use rumqttc::v5::Event;
use rumqttc::Outgoing;
use std::collections::VecDeque;

/// Pure message routing decisions based on MQTT events
pub struct MessageHandler;

impl MessageHandler {
    /// Route MQTT event to appropriate handler (pure routing decision)
    pub fn route_mqtt_event(event: &Event) -> EventRoute {
        match event {
            Event::Incoming(incoming) => match incoming {
                Packet::ConnAck(connack) => {
                    if connack.code == ConnectReturnCode::Success {
                        EventRoute::ConnectionAcknowledged {
                            session_present: connack.session_present,
                        }
                    } else {
                        EventRoute::Disconnected(format!(
                            "Connection refused: {:?}",
                            connack.code
                        ))
                    }
                }
                Packet::Publish(publish) => EventRoute::MessageReceived {
                    topic: String::from_utf8_lossy(&publish.topic).to_string(),
                    payload: publish.payload.clone(),
                    retain: publish.retain,
                },
                Packet::SubAck(suback) => EventRoute::SubscriptionAcknowledged {
                    success: suback
                        .return_codes
                        .iter()
                        .all(|code| matches!(code, SubscribeReasonCode::Success(_))),
                    details: format!("{:?}", suback.return_codes),
                },
                Packet::UnsubAck(unsuback) => EventRoute::UnsubscriptionAcknowledged {
                    success: unsuback
                        .reasons
                        .iter()
                        .all(|reason| matches!(reason, UnsubAckReason::Success)),
                    details: format!("{:?}", unsuback.reasons),
                },
                Packet::Disconnect(disconnect) => EventRoute::Disconnected(format!(
                    "Broker disconnected: {:?}",
                    disconnect.reason_code
                )),
                other => EventRoute::InfrastructureEvent(format!("{other:?}")),
            },
            Event::Outgoing(Outgoing::Subscribe(_)) => EventRoute::SubscribeWritten,
            Event::Outgoing(Outgoing::Unsubscribe(_)) => EventRoute::UnsubscribeWritten,
            Event::Outgoing(_) => EventRoute::OutgoingEvent,
        }
    }

    /// Decode a payload to text, replacing invalid UTF-8 sequences
    pub fn decode_payload(payload: &[u8]) -> String {
        String::from_utf8_lossy(payload).into_owned()
    }
}

/// Routing decisions for MQTT events
#[derive(Debug, Clone)]
pub enum EventRoute {
    /// Connection acknowledged by the broker
    ConnectionAcknowledged { session_present: bool },
    /// Message received on a subscribed topic
    MessageReceived {
        topic: String,
        payload: Bytes,
        retain: bool,
    },
    /// SUBSCRIBE packet written to the network
    SubscribeWritten,
    /// UNSUBSCRIBE packet written to the network
    UnsubscribeWritten,
    /// SubAck for the oldest written subscription
    SubscriptionAcknowledged { success: bool, details: String },
    /// UnsubAck for the oldest written unsubscription
    UnsubscriptionAcknowledged { success: bool, details: String },
    /// Broker refused or closed the connection
    Disconnected(String),
    /// Infrastructure event (PingResp, PubRel, etc.)
    InfrastructureEvent(String),
    /// Other outgoing event (handled automatically)
    OutgoingEvent,
}

/// Check whether a topic matches an MQTT subscription filter
///
/// - `+` matches exactly one level
/// - `#` matches the parent level and everything below it (must be last)
/// - topics starting with `$` never match a filter whose first level is a wildcard
pub fn topic_matches_filter(topic: &str, filter: &str) -> bool {
    if topic == filter {
        return true;
    }
    if topic.starts_with('$') && (filter.starts_with('+') || filter.starts_with('#')) {
        return false;
    }
    if filter == "#" {
        return true;
    }

    let topic_parts: Vec<&str> = topic.split('/').collect();
    let filter_parts: Vec<&str> = filter.split('/').collect();

    let mut ti = 0;
    for (fi, fp) in filter_parts.iter().enumerate() {
        if *fp == "#" {
            return fi == filter_parts.len() - 1;
        }
        if ti >= topic_parts.len() {
            return false;
        }
        if *fp != "+" && *fp != topic_parts[ti] {
            return false;
        }
        ti += 1;
    }

    ti == topic_parts.len()
}

/// Requests of one kind, in the order they were handed to the client
#[derive(Debug, Default)]
struct AckQueue {
    /// Handed to the client, not yet written to the network
    queued: VecDeque<String>,
    /// Written on the current connection, waiting for the broker's ack
    written: VecDeque<String>,
}

impl AckQueue {
    fn len(&self) -> usize {
        self.queued.len() + self.written.len()
    }

    fn mark_written(&mut self) {
        if let Some(topic) = self.queued.pop_front() {
            self.written.push_back(topic);
        }
    }
}

/// FIFO correlation of broker acknowledgements with the topics requested
///
/// Brokers acknowledge SUBSCRIBE and UNSUBSCRIBE in request order on a single
/// connection, so the oldest written topic is the one being acknowledged.
/// Requests written to a connection that then drops are never acknowledged;
/// requests still queued in the client are sent after the reconnect.
#[derive(Debug, Default)]
pub struct AckTracker {
    subscriptions: AckQueue,
    unsubscriptions: AckQueue,
}

impl AckTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscription_queued(&mut self, topic: impl Into<String>) {
        self.subscriptions.queued.push_back(topic.into());
    }

    /// Forget the most recent subscription when the client rejected the request
    pub fn subscription_not_queued(&mut self) {
        self.subscriptions.queued.pop_back();
    }

    pub fn subscription_written(&mut self) {
        self.subscriptions.mark_written();
    }

    pub fn subscription_acknowledged(&mut self) -> Option<String> {
        self.subscriptions.written.pop_front()
    }

    pub fn unsubscription_queued(&mut self, topic: impl Into<String>) {
        self.unsubscriptions.queued.push_back(topic.into());
    }

    pub fn unsubscription_not_queued(&mut self) {
        self.unsubscriptions.queued.pop_back();
    }

    pub fn unsubscription_written(&mut self) {
        self.unsubscriptions.mark_written();
    }

    pub fn unsubscription_acknowledged(&mut self) -> Option<String> {
        self.unsubscriptions.written.pop_front()
    }

    pub fn in_flight(&self) -> usize {
        self.subscriptions.len() + self.unsubscriptions.len()
    }

    /// Drop requests written to a connection that has gone away
    ///
    /// Returns how many requests will never be acknowledged.
    pub fn connection_lost(&mut self) -> usize {
        let lost = self.subscriptions.written.len() + self.unsubscriptions.written.len();
        self.subscriptions.written.clear();
        self.unsubscriptions.written.clear();
        lost
    }

    /// Drop everything, for a client that is being replaced
    pub fn reset(&mut self) -> usize {
        let abandoned = self.in_flight();
        self.subscriptions = AckQueue::default();
        self.unsubscriptions = AckQueue::default();
        abandoned
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rumqttc::v5::mqttbytes::v5::{ConnAck, Disconnect, DisconnectReasonCode, Publish};
    use rumqttc::v5::mqttbytes::QoS;

    #[test]
    fn test_route_connack() {
        let connack = Event::Incoming(Packet::ConnAck(ConnAck {
            session_present: true,
            code: ConnectReturnCode::Success,
            properties: None,
        }));
        assert!(matches!(
            MessageHandler::route_mqtt_event(&connack),
            EventRoute::ConnectionAcknowledged {
                session_present: true
            }
        ));
    }

    #[test]
    fn test_route_refused_connack() {
        let connack = Event::Incoming(Packet::ConnAck(ConnAck {
            session_present: false,
            code: ConnectReturnCode::NotAuthorized,
            properties: None,
        }));
        assert!(matches!(
            MessageHandler::route_mqtt_event(&connack),
            EventRoute::Disconnected(_)
        ));
    }

    #[test]
    fn test_route_disconnect() {
        let disconnect = Event::Incoming(Packet::Disconnect(Disconnect {
            reason_code: DisconnectReasonCode::NormalDisconnection,
            properties: None,
        }));
        assert!(matches!(
            MessageHandler::route_mqtt_event(&disconnect),
            EventRoute::Disconnected(_)
        ));
    }

    #[test]
    fn test_route_publish() {
        let publish = Event::Incoming(Packet::Publish(Publish {
            dup: false,
            qos: QoS::ExactlyOnce,
            retain: true,
            topic: Bytes::from("sensors/temp"),
            pkid: 7,
            payload: Bytes::from("21.5"),
            properties: None,
        }));

        if let EventRoute::MessageReceived {
            topic,
            payload,
            retain,
        } = MessageHandler::route_mqtt_event(&publish)
        {
            assert_eq!(topic, "sensors/temp");
            assert_eq!(payload, Bytes::from("21.5"));
            assert!(retain);
        } else {
            panic!("Expected MessageReceived route");
        }
    }

    #[test]
    fn test_decode_payload() {
        assert_eq!(MessageHandler::decode_payload(b"hello"), "hello");
        assert_eq!(
            MessageHandler::decode_payload("温度".as_bytes()),
            "温度".to_string()
        );
        assert_eq!(MessageHandler::decode_payload(&[0x66, 0xff]), "f\u{fffd}");
    }

    #[test]
    fn test_topic_matches_filter_exact() {
        assert!(topic_matches_filter("sensors/temp", "sensors/temp"));
        assert!(!topic_matches_filter("sensors/temp", "sensors/humidity"));
        assert!(!topic_matches_filter("sensors", "sensors/temp"));
        assert!(!topic_matches_filter("sensors/temp/raw", "sensors/temp"));
    }

    #[test]
    fn test_topic_matches_filter_wildcards() {
        assert!(topic_matches_filter("sensors/temp", "sensors/+"));
        assert!(!topic_matches_filter("sensors/temp/raw", "sensors/+"));
        assert!(topic_matches_filter("sensors", "sensors/#"));
        assert!(topic_matches_filter("sensors/temp/raw", "sensors/#"));
        assert!(topic_matches_filter("anything/at/all", "#"));
        assert!(topic_matches_filter("a/b/c", "+/b/+"));
        assert!(!topic_matches_filter("a/x/c", "+/b/+"));
        assert!(!topic_matches_filter("a/b", "a/#/b"));
    }

    #[test]
    fn test_dollar_topics_skip_leading_wildcards() {
        assert!(!topic_matches_filter("$SYS/broker/uptime", "#"));
        assert!(!topic_matches_filter("$SYS/broker/uptime", "+/broker/uptime"));
        assert!(topic_matches_filter("$SYS/broker/uptime", "$SYS/#"));
        assert!(topic_matches_filter("$SYS/broker/uptime", "$SYS/+/uptime"));
        assert!(topic_matches_filter("$SYS/broker/uptime", "$SYS/broker/uptime"));
    }

    #[test]
    fn test_route_outgoing_subscribe_and_unsubscribe() {
        assert!(matches!(
            MessageHandler::route_mqtt_event(&Event::Outgoing(Outgoing::Subscribe(3))),
            EventRoute::SubscribeWritten
        ));
        assert!(matches!(
            MessageHandler::route_mqtt_event(&Event::Outgoing(Outgoing::Unsubscribe(4))),
            EventRoute::UnsubscribeWritten
        ));
        assert!(matches!(
            MessageHandler::route_mqtt_event(&Event::Outgoing(Outgoing::PingReq)),
            EventRoute::OutgoingEvent
        ));
    }

    #[test]
    fn test_ack_tracker_fifo() {
        let mut tracker = AckTracker::new();
        tracker.subscription_queued("a");
        tracker.subscription_queued("b");
        tracker.unsubscription_queued("c");
        assert_eq!(tracker.in_flight(), 3);

        // Nothing is acknowledged before it is written
        assert_eq!(tracker.subscription_acknowledged(), None);

        tracker.subscription_written();
        tracker.subscription_written();
        tracker.unsubscription_written();
        assert_eq!(tracker.subscription_acknowledged().as_deref(), Some("a"));
        assert_eq!(tracker.unsubscription_acknowledged().as_deref(), Some("c"));
        assert_eq!(tracker.subscription_acknowledged().as_deref(), Some("b"));
        assert_eq!(tracker.subscription_acknowledged(), None);
        assert_eq!(tracker.in_flight(), 0);
    }

    #[test]
    fn test_ack_tracker_keeps_queued_requests_across_connection_loss() {
        let mut tracker = AckTracker::new();
        tracker.subscription_queued("lost");
        tracker.subscription_written();
        tracker.subscription_queued("replayed");

        assert_eq!(tracker.connection_lost(), 1);
        assert_eq!(tracker.in_flight(), 1);

        // The queued request goes out on the new connection
        tracker.subscription_written();
        assert_eq!(tracker.subscription_acknowledged().as_deref(), Some("replayed"));
    }

    #[test]
    fn test_ack_tracker_not_queued_and_reset() {
        let mut tracker = AckTracker::new();
        tracker.subscription_queued("a");
        tracker.subscription_queued("b");
        tracker.subscription_not_queued();
        assert_eq!(tracker.in_flight(), 1);

        tracker.subscription_written();
        tracker.unsubscription_queued("c");
        assert_eq!(tracker.reset(), 2);
        assert_eq!(tracker.in_flight(), 0);
    }
}
