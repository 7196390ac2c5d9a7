//! Connection context owned by the application root
//!
//! Bundles the connection manager with the background tasks that serve it
//! (MQTT supervisor, request pump, health check) and the shutdown signal that
//! stops them. Components receive the context, or the manager it exposes, by
//! reference instead of reaching for process-wide state.

use crate::config::RelayConfig;
use crate::emitter::{Emitter, ListenerId, TopicMessage};
use crate::error::{RelayError, RelayResult};
use crate::health::{spawn_health_check, HealthCheckConfig};
use crate::lifecycle_span;
use crate::manager::{ConnectionManager, SubscriptionOptions};
use crate::transport::mqtt::MqttClient;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{info, warn, Instrument};

/// How long shutdown waits for each background task
const TASK_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(3);

/// Live connection plus the tasks that keep it running
pub struct ConnectionContext {
    manager: Arc<ConnectionManager>,
    shutdown_tx: watch::Sender<bool>,
    tasks: Vec<JoinHandle<()>>,
}

impl ConnectionContext {
    /// Open the broker connection and start the background tasks
    pub async fn initialize(config: &RelayConfig) -> RelayResult<Self> {
        Self::start(config)
            .instrument(lifecycle_span!(phase = "initialize"))
            .await
    }

    async fn start(config: &RelayConfig) -> RelayResult<Self> {
        config.validate()?;
        let options = SubscriptionOptions::from_config(&config.subscriptions)?;

        let client = Arc::new(MqttClient::new(config.mqtt.clone())?);
        let manager = Arc::new(ConnectionManager::new(client.clone(), options));
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let mut tasks = client.start(manager.clone(), shutdown_rx.clone()).await?;
        if config.health.enabled {
            tasks.push(spawn_health_check(
                manager.clone(),
                HealthCheckConfig::from(&config.health),
                shutdown_rx,
            ));
        } else {
            info!("Health check disabled by configuration");
        }

        info!(tasks = tasks.len(), "Connection context initialized");
        Ok(Self {
            manager,
            shutdown_tx,
            tasks,
        })
    }

    /// Assemble a context from parts created elsewhere
    pub fn from_parts(
        manager: Arc<ConnectionManager>,
        shutdown_tx: watch::Sender<bool>,
        tasks: Vec<JoinHandle<()>>,
    ) -> Self {
        Self {
            manager,
            shutdown_tx,
            tasks,
        }
    }

    pub fn manager(&self) -> &Arc<ConnectionManager> {
        &self.manager
    }

    pub fn emitter(&self) -> &Emitter {
        self.manager.emitter()
    }

    /// See [`ConnectionManager::subscribe`]
    pub async fn subscribe<F>(&self, topic: &str, callback: F) -> ListenerId
    where
        F: Fn(&TopicMessage) + Send + Sync + 'static,
    {
        self.manager.subscribe(topic, callback).await
    }

    /// See [`ConnectionManager::unsubscribe`]
    pub async fn unsubscribe(&self, topic: &str) -> usize {
        self.manager.unsubscribe(topic).await
    }

    /// Stop every background task and disconnect from the broker
    pub async fn shutdown(self) -> RelayResult<()> {
        let span = lifecycle_span!(phase = "shutdown");
        let _ = self.shutdown_tx.send(true);
        span.in_scope(|| info!("Shutdown signal sent to background tasks"));

        let mut failures = Vec::new();
        for handle in self.tasks {
            match tokio::time::timeout(TASK_SHUTDOWN_TIMEOUT, handle).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) if e.is_cancelled() => {}
                Ok(Err(e)) => failures.push(e.to_string()),
                Err(_) => {
                    span.in_scope(|| warn!("Background task did not stop in time"));
                    failures.push("timed out".to_string());
                }
            }
        }

        if failures.is_empty() {
            span.in_scope(|| info!("Connection context shut down"));
            Ok(())
        } else {
            Err(RelayError::task_failed(failures.join("; ")))
        }
    }
}

impl std::fmt::Debug for ConnectionContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionContext")
            .field("manager", &self.manager)
            .field("tasks", &self.tasks.len())
            .finish()
    }
}
