//! Impure I/O operations for MQTT client
//!
//! This module handles network communication and async coordination with the
//! rumqttc client. Two tasks run per client:
//!
//! - the supervisor polls the event loop, feeds connection events and
//!   incoming messages to the [`ConnectionManager`], and rebuilds the
//!   connection on a forced reconnect;
//! - the request pump forwards subscribe/unsubscribe requests to the
//!   `AsyncClient`, so the supervisor never waits on the client's bounded
//!   request channel while it is the only task able to drain it.

use super::connection::{configure_mqtt_options, redact_broker_url, MqttError};
use super::health_monitor::ConnectionEvent;
use super::message_handler::{AckTracker, EventRoute, MessageHandler};
use crate::config::MqttSection;
use crate::manager::ConnectionManager;
use crate::mqtt_span;
use crate::transport::BrokerLink;
use async_trait::async_trait;
use rumqttc::v5::mqttbytes::QoS;
use rumqttc::v5::{AsyncClient, EventLoop};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, PoisonError};
use std::time::Duration;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, watch, Mutex, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn, Instrument};

/// Capacity of the rumqttc request channel
const REQUEST_CHANNEL_CAPACITY: usize = 64;

/// Upper bound for flushing a DISCONNECT packet on shutdown
const DISCONNECT_GRACE: Duration = Duration::from_secs(1);

/// Broker request queued for the pump task
#[derive(Debug, Clone, PartialEq)]
enum LinkRequest {
    Subscribe { topic: String, qos: QoS },
    Unsubscribe { topic: String },
}

/// Commands handled by the supervisor task
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SupervisorCommand {
    Reconnect,
}

/// Receivers and event loop handed to the tasks on start
struct StartParts {
    event_loop: EventLoop,
    request_rx: mpsc::UnboundedReceiver<LinkRequest>,
    command_rx: mpsc::Receiver<SupervisorCommand>,
}

/// MQTT transport client backing the connection manager
pub struct MqttClient {
    config: MqttSection,
    client: Arc<RwLock<AsyncClient>>,
    acks: Arc<std::sync::Mutex<AckTracker>>,
    request_tx: mpsc::UnboundedSender<LinkRequest>,
    command_tx: mpsc::Sender<SupervisorCommand>,
    parts: Mutex<Option<StartParts>>,
    started: AtomicBool,
}

impl MqttClient {
    /// Build the client; no network I/O happens until [`MqttClient::start`]
    pub fn new(config: MqttSection) -> Result<Self, MqttError> {
        let (client, event_loop) = Self::create_connection(&config)?;
        let (request_tx, request_rx) = mpsc::unbounded_channel();
        let (command_tx, command_rx) = mpsc::channel(1);

        Ok(MqttClient {
            config,
            client: Arc::new(RwLock::new(client)),
            acks: Arc::new(std::sync::Mutex::new(AckTracker::new())),
            request_tx,
            command_tx,
            parts: Mutex::new(Some(StartParts {
                event_loop,
                request_rx,
                command_rx,
            })),
            started: AtomicBool::new(false),
        })
    }

    /// Helper method to create new MQTT connection and event loop
    /// Used for initial connection and forced reconnects
    fn create_connection(config: &MqttSection) -> Result<(AsyncClient, EventLoop), MqttError> {
        let mqtt_options = configure_mqtt_options(config)?;
        Ok(AsyncClient::new(mqtt_options, REQUEST_CHANNEL_CAPACITY))
    }

    pub fn is_started(&self) -> bool {
        self.started.load(Ordering::SeqCst)
    }

    /// Spawn the supervisor and request pump tasks
    ///
    /// Both tasks stop once `shutdown_rx` observes `true`; the supervisor
    /// sends a DISCONNECT to the broker on the way out.
    pub async fn start(
        self: &Arc<Self>,
        manager: Arc<ConnectionManager>,
        shutdown_rx: watch::Receiver<bool>,
    ) -> Result<Vec<JoinHandle<()>>, MqttError> {
        let parts = self
            .parts
            .lock()
            .await
            .take()
            .ok_or(MqttError::AlreadyStarted)?;
        self.started.store(true, Ordering::SeqCst);

        info!(
            broker = %redact_broker_url(&self.config.broker_url),
            "Starting MQTT client"
        );

        let pump = tokio::spawn(
            run_request_pump(
                self.client.clone(),
                self.acks.clone(),
                parts.request_rx,
                shutdown_rx.clone(),
            )
            .instrument(mqtt_span!(task = "request_pump")),
        );
        let supervisor = tokio::spawn(
            self.clone()
                .run_supervisor(manager, parts.event_loop, parts.command_rx, shutdown_rx)
                .instrument(mqtt_span!(task = "supervisor")),
        );

        Ok(vec![supervisor, pump])
    }

    async fn run_supervisor(
        self: Arc<Self>,
        manager: Arc<ConnectionManager>,
        mut event_loop: EventLoop,
        mut command_rx: mpsc::Receiver<SupervisorCommand>,
        mut shutdown_rx: watch::Receiver<bool>,
    ) {
        manager
            .handle_connection_event(ConnectionEvent::ConnectionStarted)
            .await;

        loop {
            tokio::select! {
                changed = shutdown_rx.changed() => {
                    if changed.is_err() || *shutdown_rx.borrow() {
                        info!("Shutdown signal received, stopping MQTT supervisor");
                        break;
                    }
                }
                Some(command) = command_rx.recv() => match command {
                    SupervisorCommand::Reconnect => match self.rebuild_connection().await {
                        Ok(new_event_loop) => {
                            event_loop = new_event_loop;
                            manager
                                .handle_connection_event(ConnectionEvent::ReconnectRequested)
                                .await;
                        }
                        Err(e) => error!("Failed to rebuild MQTT connection: {}", e),
                    },
                },
                event_result = event_loop.poll() => match event_result {
                    Ok(event) => {
                        let route = MessageHandler::route_mqtt_event(&event);
                        self.process_event_route(route, &manager).await;
                    }
                    Err(e) => {
                        self.drop_written_acks();
                        manager
                            .handle_connection_event(ConnectionEvent::NetworkError(e.to_string()))
                            .await;

                        if !interruptible_sleep(shutdown_rx.clone(), self.config.reconnect_period()).await {
                            break;
                        }
                    }
                },
            }
        }

        if manager.is_connected() {
            self.send_disconnect(&mut event_loop).await;
        }
        manager
            .handle_connection_event(ConnectionEvent::ClientShutdown)
            .await;
        info!("MQTT supervisor stopped");
    }

    /// Process routed MQTT event
    async fn process_event_route(&self, route: EventRoute, manager: &ConnectionManager) {
        match route {
            EventRoute::ConnectionAcknowledged { session_present } => {
                manager
                    .handle_connection_event(ConnectionEvent::ConnAckReceived { session_present })
                    .await;
            }
            EventRoute::MessageReceived {
                topic,
                payload,
                retain,
            } => {
                debug!(target: "mqtt_transport", "Received MQTT message on topic: {}", topic);
                manager.dispatch(&topic, &payload, retain);
            }
            EventRoute::SubscriptionAcknowledged { success, details } => {
                let topic = self.with_acks(|acks| acks.subscription_acknowledged());
                let topic = topic.as_deref().unwrap_or("<unknown>");
                if success {
                    info!(topic, "Subscribed to topic");
                } else {
                    warn!(topic, "Broker rejected subscription: {}", details);
                }
            }
            EventRoute::UnsubscriptionAcknowledged { success, details } => {
                let topic = self.with_acks(|acks| acks.unsubscription_acknowledged());
                let topic = topic.as_deref().unwrap_or("<unknown>");
                if success {
                    info!(topic, "Unsubscribed from topic");
                } else {
                    warn!(topic, "Broker rejected unsubscription: {}", details);
                }
            }
            EventRoute::Disconnected(reason) => {
                self.drop_written_acks();
                manager
                    .handle_connection_event(ConnectionEvent::DisconnectedByBroker(reason))
                    .await;
            }
            EventRoute::InfrastructureEvent(event_str) => {
                debug!(target: "mqtt_transport", "MQTT event: {}", event_str);
            }
            EventRoute::SubscribeWritten => self.with_acks(AckTracker::subscription_written),
            EventRoute::UnsubscribeWritten => self.with_acks(AckTracker::unsubscription_written),
            EventRoute::OutgoingEvent => {}
        }
    }

    /// Replace client and event loop with a freshly configured pair
    async fn rebuild_connection(&self) -> Result<EventLoop, MqttError> {
        let (new_client, new_event_loop) = Self::create_connection(&self.config)?;
        *self.client.write().await = new_client;
        self.reset_acks();
        info!("Rebuilt MQTT connection with a new client id");
        Ok(new_event_loop)
    }

    /// Best effort DISCONNECT so the broker drops the session cleanly
    async fn send_disconnect(&self, event_loop: &mut EventLoop) {
        if let Err(e) = self.client.read().await.try_disconnect() {
            debug!("Could not queue DISCONNECT: {}", e);
            return;
        }

        // The event loop reports an error once the connection is closed
        let flushed = tokio::time::timeout(DISCONNECT_GRACE, async {
            while event_loop.poll().await.is_ok() {}
        })
        .await;

        if flushed.is_err() {
            debug!("Timed out flushing DISCONNECT");
        }
    }

    fn with_acks<T>(&self, f: impl FnOnce(&mut AckTracker) -> T) -> T {
        track(&self.acks, f)
    }

    /// Requests still queued in the client are replayed after reconnecting
    fn drop_written_acks(&self) {
        let lost = self.with_acks(AckTracker::connection_lost);
        if lost > 0 {
            warn!(lost, "Connection dropped with unacknowledged requests");
        }
    }

    fn reset_acks(&self) {
        let abandoned = self.with_acks(AckTracker::reset);
        if abandoned > 0 {
            warn!(abandoned, "Replaced client with unacknowledged requests");
        }
    }
}

#[async_trait]
impl BrokerLink for MqttClient {
    async fn subscribe(&self, topic: &str, qos: QoS) -> Result<(), MqttError> {
        self.request_tx
            .send(LinkRequest::Subscribe {
                topic: topic.to_string(),
                qos,
            })
            .map_err(|_| MqttError::SupervisorStopped)
    }

    async fn unsubscribe(&self, topic: &str) -> Result<(), MqttError> {
        self.request_tx
            .send(LinkRequest::Unsubscribe {
                topic: topic.to_string(),
            })
            .map_err(|_| MqttError::SupervisorStopped)
    }

    async fn reconnect(&self) -> Result<(), MqttError> {
        if !self.is_started() {
            return Err(MqttError::NotStarted);
        }
        match self.command_tx.try_send(SupervisorCommand::Reconnect) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(_)) => {
                debug!("Reconnect already pending");
                Ok(())
            }
            Err(TrySendError::Closed(_)) => Err(MqttError::SupervisorStopped),
        }
    }
}

/// Forward queued requests to the current `AsyncClient`
async fn run_request_pump(
    client: Arc<RwLock<AsyncClient>>,
    acks: Arc<std::sync::Mutex<AckTracker>>,
    mut request_rx: mpsc::UnboundedReceiver<LinkRequest>,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    loop {
        let request = tokio::select! {
            changed = shutdown_rx.changed() => {
                if changed.is_err() || *shutdown_rx.borrow() {
                    break;
                }
                continue;
            }
            request = request_rx.recv() => match request {
                Some(request) => request,
                None => break,
            },
        };

        // Clone so a forced reconnect can swap the client while we wait
        let current = client.read().await.clone();
        match request {
            LinkRequest::Subscribe { topic, qos } => {
                track(&acks, |tracker| tracker.subscription_queued(topic.clone()));
                if let Err(e) = current.subscribe(topic.clone(), qos).await {
                    track(&acks, AckTracker::subscription_not_queued);
                    error!(topic = %topic, "Failed to send subscription: {}", e);
                }
            }
            LinkRequest::Unsubscribe { topic } => {
                track(&acks, |tracker| tracker.unsubscription_queued(topic.clone()));
                if let Err(e) = current.unsubscribe(topic.clone()).await {
                    track(&acks, AckTracker::unsubscription_not_queued);
                    error!(topic = %topic, "Failed to send unsubscription: {}", e);
                }
            }
        }
    }

    debug!("MQTT request pump stopped");
}

fn track<T>(acks: &std::sync::Mutex<AckTracker>, f: impl FnOnce(&mut AckTracker) -> T) -> T {
    let mut guard = acks.lock().unwrap_or_else(PoisonError::into_inner);
    f(&mut guard)
}

/// Perform interruptible sleep with shutdown monitoring
/// Returns true if sleep completed, false if shutdown requested
async fn interruptible_sleep(mut shutdown_rx: watch::Receiver<bool>, delay: Duration) -> bool {
    tokio::select! {
        changed = shutdown_rx.changed() => {
            if changed.is_err() || *shutdown_rx.borrow() {
                info!("Shutdown signal received during reconnect delay, stopping");
                return false;
            }
            true
        }
        _ = tokio::time::sleep(delay) => true,
    }
}
