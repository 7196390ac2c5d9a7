//! Pure health monitoring and reconnection logic for MQTT client
//!
//! This module contains pure functions for connection state transitions and
//! the consecutive-failure streak that decides when a reconnect is forced.

use super::connection::ConnectionState;
use tracing::{debug, error, info, warn};

/// Pure health monitoring and state transition logic
pub struct HealthMonitor;

impl HealthMonitor {
    /// Determine next state after connection event (pure function)
    pub fn determine_next_state(event: &ConnectionEvent) -> ConnectionState {
        match event {
            ConnectionEvent::ConnectionStarted | ConnectionEvent::ReconnectRequested => {
                ConnectionState::Connecting
            }
            ConnectionEvent::ConnAckReceived { .. } => ConnectionState::Connected,
            ConnectionEvent::DisconnectedByBroker(reason)
            | ConnectionEvent::NetworkError(reason) => ConnectionState::Disconnected(reason.clone()),
            ConnectionEvent::ClientShutdown => {
                ConnectionState::Disconnected("Client shut down".to_string())
            }
        }
    }

    /// Check if connection state allows subscribing (pure function)
    pub fn can_subscribe(state: &ConnectionState) -> bool {
        matches!(state, ConnectionState::Connected)
    }

    /// Log connection state transition (pure logging function)
    pub fn log_state_transition(from: &ConnectionState, to: &ConnectionState) {
        match (from, to) {
            (ConnectionState::Connecting, ConnectionState::Connected) => {
                info!("MQTT connection established successfully");
            }
            (ConnectionState::Disconnected(_), ConnectionState::Connected) => {
                info!("MQTT connection re-established");
            }
            (ConnectionState::Connected, ConnectionState::Disconnected(reason)) => {
                warn!("MQTT connection lost: {}", reason);
            }
            (ConnectionState::Connecting, ConnectionState::Disconnected(reason)) => {
                error!("MQTT connection attempt failed: {}", reason);
            }
            (from, to) if from == to => {}
            _ => {
                info!("MQTT connection state: {:?} -> {:?}", from, to);
            }
        }
    }
}

/// Connection events that trigger state transitions
#[derive(Debug, Clone, PartialEq)]
pub enum ConnectionEvent {
    /// Supervisor started polling the event loop
    ConnectionStarted,
    /// ConnAck received from broker
    ConnAckReceived { session_present: bool },
    /// Broker refused or closed the connection
    DisconnectedByBroker(String),
    /// Network or protocol error
    NetworkError(String),
    /// Forced reconnect replaced the connection
    ReconnectRequested,
    /// Application is shutting down
    ClientShutdown,
}

/// One observation taken by the health check
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HealthSample {
    /// The connection has not been created yet
    NoConnection,
    Connected,
    Disconnected,
}

impl HealthSample {
    pub fn from_state(state: &ConnectionState) -> Self {
        if state.is_connected() {
            HealthSample::Connected
        } else {
            HealthSample::Disconnected
        }
    }
}

/// Outcome of feeding one sample to a [`FailureStreak`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HealthVerdict {
    /// Nothing to check yet
    Idle,
    Healthy,
    /// Not connected, below the reconnect threshold
    Degraded { failures: u32 },
    /// Threshold reached; the streak has been reset
    ReconnectRequired,
}

/// Counter of consecutive failed health checks
#[derive(Debug, Clone)]
pub struct FailureStreak {
    failures: u32,
    threshold: u32,
}

impl FailureStreak {
    pub fn new(threshold: u32) -> Self {
        Self {
            failures: 0,
            threshold: threshold.max(1),
        }
    }

    pub fn failures(&self) -> u32 {
        self.failures
    }

    /// Record one sample and decide what the health check should do
    pub fn observe(&mut self, sample: HealthSample) -> HealthVerdict {
        match sample {
            HealthSample::NoConnection => HealthVerdict::Idle,
            HealthSample::Connected => {
                if self.failures > 0 {
                    debug!(failures = self.failures, "Connection healthy again, streak reset");
                }
                self.failures = 0;
                HealthVerdict::Healthy
            }
            HealthSample::Disconnected => {
                self.failures += 1;
                if self.failures >= self.threshold {
                    self.failures = 0;
                    HealthVerdict::ReconnectRequired
                } else {
                    HealthVerdict::Degraded {
                        failures: self.failures,
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_determine_next_state() {
        assert_eq!(
            HealthMonitor::determine_next_state(&ConnectionEvent::ConnectionStarted),
            ConnectionState::Connecting
        );
        assert_eq!(
            HealthMonitor::determine_next_state(&ConnectionEvent::ConnAckReceived {
                session_present: false
            }),
            ConnectionState::Connected
        );
        assert_eq!(
            HealthMonitor::determine_next_state(&ConnectionEvent::NetworkError(
                "refused".to_string()
            )),
            ConnectionState::Disconnected("refused".to_string())
        );
        assert_eq!(
            HealthMonitor::determine_next_state(&ConnectionEvent::ReconnectRequested),
            ConnectionState::Connecting
        );
        assert!(matches!(
            HealthMonitor::determine_next_state(&ConnectionEvent::ClientShutdown),
            ConnectionState::Disconnected(_)
        ));
    }

    #[test]
    fn test_can_subscribe() {
        assert!(HealthMonitor::can_subscribe(&ConnectionState::Connected));
        assert!(!HealthMonitor::can_subscribe(&ConnectionState::Connecting));
        assert!(!HealthMonitor::can_subscribe(&ConnectionState::default()));
    }

    #[test]
    fn test_three_failures_require_reconnect() {
        let mut streak = FailureStreak::new(3);
        assert_eq!(
            streak.observe(HealthSample::Disconnected),
            HealthVerdict::Degraded { failures: 1 }
        );
        assert_eq!(
            streak.observe(HealthSample::Disconnected),
            HealthVerdict::Degraded { failures: 2 }
        );
        assert_eq!(
            streak.observe(HealthSample::Disconnected),
            HealthVerdict::ReconnectRequired
        );
        assert_eq!(streak.failures(), 0);
    }

    #[test]
    fn test_connected_sample_resets_streak() {
        let mut streak = FailureStreak::new(3);
        streak.observe(HealthSample::Disconnected);
        streak.observe(HealthSample::Disconnected);
        assert_eq!(streak.observe(HealthSample::Connected), HealthVerdict::Healthy);
        assert_eq!(
            streak.observe(HealthSample::Disconnected),
            HealthVerdict::Degraded { failures: 1 }
        );
    }

    #[test]
    fn test_no_connection_is_ignored() {
        let mut streak = FailureStreak::new(3);
        streak.observe(HealthSample::Disconnected);
        assert_eq!(streak.observe(HealthSample::NoConnection), HealthVerdict::Idle);
        assert_eq!(streak.failures(), 1);
    }

    fn sample_strategy() -> impl Strategy<Value = HealthSample> {
        prop_oneof![
            Just(HealthSample::NoConnection),
            Just(HealthSample::Connected),
            Just(HealthSample::Disconnected),
        ]
    }

    proptest! {
        #[test]
        fn prop_reconnect_iff_run_is_multiple_of_threshold(
            samples in prop::collection::vec(sample_strategy(), 0..64),
            threshold in 1u32..6,
        ) {
            let mut streak = FailureStreak::new(threshold);
            let mut run = 0u32;

            for sample in samples {
                match sample {
                    HealthSample::Connected => run = 0,
                    HealthSample::Disconnected => run += 1,
                    HealthSample::NoConnection => {}
                }
                let expect_reconnect =
                    sample == HealthSample::Disconnected && run % threshold == 0;
                let verdict = streak.observe(sample);
                prop_assert_eq!(verdict == HealthVerdict::ReconnectRequired, expect_reconnect);
            }
        }
    }
}
