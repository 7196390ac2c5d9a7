//! Periodic connection health check
//!
//! Samples the manager's connection state on a fixed period and forces a
//! reconnect after a configured number of consecutive failed samples. The
//! task stops when the shutdown signal is raised.

use crate::config::HealthSection;
use crate::manager::ConnectionManager;
use crate::transport::mqtt::{FailureStreak, HealthVerdict};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

/// Health check settings
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HealthCheckConfig {
    pub interval: Duration,
    pub max_failed_checks: u32,
}

impl Default for HealthCheckConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(10),
            max_failed_checks: 3,
        }
    }
}

impl From<&HealthSection> for HealthCheckConfig {
    fn from(section: &HealthSection) -> Self {
        Self {
            interval: section.interval(),
            max_failed_checks: section.max_failed_checks,
        }
    }
}

/// Spawn the health check loop
pub fn spawn_health_check(
    manager: Arc<ConnectionManager>,
    config: HealthCheckConfig,
    shutdown_rx: watch::Receiver<bool>,
) -> JoinHandle<()> {
    tokio::spawn(run_health_check(manager, config, shutdown_rx))
}

/// Run the health check until shutdown is signalled
///
/// The first sample is taken one full period after start.
pub async fn run_health_check(
    manager: Arc<ConnectionManager>,
    config: HealthCheckConfig,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    let mut ticker = interval_at(Instant::now() + config.interval, config.interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut streak = FailureStreak::new(config.max_failed_checks);

    info!(
        interval_secs = config.interval.as_secs(),
        max_failed_checks = config.max_failed_checks,
        "Health check started"
    );

    loop {
        tokio::select! {
            changed = shutdown_rx.changed() => {
                if changed.is_err() || *shutdown_rx.borrow() {
                    break;
                }
            }
            _ = ticker.tick() => {
                match streak.observe(manager.health_sample()) {
                    HealthVerdict::Idle => debug!("Health check skipped, connection not created"),
                    HealthVerdict::Healthy => debug!("Health check passed"),
                    HealthVerdict::Degraded { failures } => {
                        warn!(failures, "Health check failed, MQTT not connected");
                    }
                    HealthVerdict::ReconnectRequired => {
                        warn!(
                            failures = config.max_failed_checks,
                            "Consecutive health checks failed, forcing reconnect"
                        );
                        manager.force_reconnect().await;
                    }
                }
            }
        }
    }

    info!("Health check stopped");
}
