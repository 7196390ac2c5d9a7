//! Topic-keyed in-process event emitter
//!
//! Listeners are registered under a topic filter and receive every
//! [`TopicMessage`] whose topic matches that filter. A filter without MQTT
//! wildcards matches only the identical topic.

use crate::transport::mqtt::message_handler::topic_matches_filter;
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use tracing::{debug, trace};

/// A broker message after payload decoding
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TopicMessage {
    pub topic: String,
    /// Payload decoded as UTF-8 (invalid sequences replaced)
    pub message: String,
    #[serde(default)]
    pub retain: bool,
    pub received_at: DateTime<Utc>,
}

impl TopicMessage {
    pub fn new(topic: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            topic: topic.into(),
            message: message.into(),
            retain: false,
            received_at: Utc::now(),
        }
    }

    /// Parse the message text as JSON
    pub fn json<T: DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        serde_json::from_str(&self.message)
    }
}

/// Handle identifying one registered listener
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ListenerId(u64);

/// Callback invoked for each matching message
pub type Listener = Arc<dyn Fn(&TopicMessage) + Send + Sync>;

/// Thread-safe registry of topic listeners
#[derive(Clone, Default)]
pub struct Emitter {
    listeners: Arc<RwLock<HashMap<String, Vec<(ListenerId, Listener)>>>>,
    next_id: Arc<AtomicU64>,
}

impl std::fmt::Debug for Emitter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Emitter")
            .field("topics", &self.topics())
            .finish()
    }
}

impl Emitter {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> RwLockReadGuard<'_, HashMap<String, Vec<(ListenerId, Listener)>>> {
        self.listeners.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, HashMap<String, Vec<(ListenerId, Listener)>>> {
        self.listeners.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Register a listener under a topic filter
    pub fn on<F>(&self, topic: &str, callback: F) -> ListenerId
    where
        F: Fn(&TopicMessage) + Send + Sync + 'static,
    {
        self.on_shared(topic, Arc::new(callback))
    }

    /// Register an already shared listener
    pub fn on_shared(&self, topic: &str, callback: Listener) -> ListenerId {
        let id = ListenerId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.write()
            .entry(topic.to_string())
            .or_default()
            .push((id, callback));
        debug!(topic, listener = id.0, "Listener registered");
        id
    }

    /// Remove one listener; returns false if it was not registered
    pub fn off(&self, topic: &str, id: ListenerId) -> bool {
        let mut listeners = self.write();
        let Some(entries) = listeners.get_mut(topic) else {
            return false;
        };

        let before = entries.len();
        entries.retain(|(entry_id, _)| *entry_id != id);
        let removed = entries.len() != before;
        if entries.is_empty() {
            listeners.remove(topic);
        }
        removed
    }

    /// Remove every listener of a topic, returning how many were removed
    pub fn off_all(&self, topic: &str) -> usize {
        self.write().remove(topic).map_or(0, |entries| entries.len())
    }

    /// Remove every listener of every topic
    pub fn clear(&self) {
        self.write().clear();
    }

    /// Deliver a message to all matching listeners
    ///
    /// Listeners run after the registry lock is released, so a callback may
    /// register or remove listeners itself.
    pub fn emit(&self, message: &TopicMessage) -> usize {
        let matching: Vec<Listener> = self
            .read()
            .iter()
            .filter(|(filter, _)| topic_matches_filter(&message.topic, filter))
            .flat_map(|(_, entries)| entries.iter().map(|(_, callback)| callback.clone()))
            .collect();

        for callback in &matching {
            callback(message);
        }

        trace!(topic = %message.topic, delivered = matching.len(), "Message emitted");
        matching.len()
    }

    pub fn listener_count(&self, topic: &str) -> usize {
        self.read().get(topic).map_or(0, Vec::len)
    }

    pub fn has_listeners(&self, topic: &str) -> bool {
        self.listener_count(topic) > 0
    }

    /// Topic filters that currently have at least one listener, sorted
    pub fn topics(&self) -> Vec<String> {
        let mut topics: Vec<String> = self.read().keys().cloned().collect();
        topics.sort();
        topics
    }
}
