//! In-memory log event bus keyed by deployment
//!
//! Each deployment owns a topic holding its full event history and the set of
//! live subscribers. `publish` and `subscribe` take the same lock, so a
//! subscriber's history snapshot and its live channel meet exactly at one
//! event boundary. Subscribers get a bounded queue each; one that falls
//! behind past the bound is disconnected instead of stalling publication.

mod subscription;

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::errors::BusError;
use crate::models::deployment::DeploymentStatus;

pub use subscription::Subscription;

/// Wire representation of one log line or state transition
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogEvent {
    pub deployment_id: String,

    /// Position in the deployment's event sequence, starting at 0
    pub seq: u64,

    pub timestamp: DateTime<Utc>,

    pub message: String,

    /// Set on state-transition events only
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<DeploymentStatus>,
}

/// Bus options
#[derive(Debug, Clone)]
pub struct BusOptions {
    /// Queue bound per subscriber
    pub subscriber_capacity: usize,

    /// How long a completed topic stays replayable
    pub retention: Duration,
}

impl Default for BusOptions {
    fn default() -> Self {
        Self {
            subscriber_capacity: 1024,
            retention: Duration::from_secs(900),
        }
    }
}

struct Subscriber {
    id: u64,
    tx: mpsc::Sender<LogEvent>,
    evicted: Arc<AtomicBool>,
}

#[derive(Default)]
struct Topic {
    history: Vec<LogEvent>,
    subscribers: Vec<Subscriber>,
    completed_at: Option<Instant>,
    terminal_status: Option<DeploymentStatus>,
}

struct Inner {
    topics: Mutex<HashMap<String, Topic>>,
    next_subscriber_id: std::sync::atomic::AtomicU64,
    options: BusOptions,
}

/// Cloneable handle to the bus
#[derive(Clone)]
pub struct LogBus {
    inner: Arc<Inner>,
}

impl LogBus {
    pub fn new(options: BusOptions) -> Self {
        Self {
            inner: Arc::new(Inner {
                topics: Mutex::new(HashMap::new()),
                next_subscriber_id: std::sync::atomic::AtomicU64::new(0),
                options,
            }),
        }
    }

    pub fn options(&self) -> &BusOptions {
        &self.inner.options
    }

    /// Append an event to the deployment's history and deliver it to every
    /// live subscriber. Never waits on a subscriber.
    pub fn publish(
        &self,
        deployment_id: &str,
        timestamp: DateTime<Utc>,
        message: impl Into<String>,
        status: Option<DeploymentStatus>,
    ) -> Result<LogEvent, BusError> {
        let mut topics = self.inner.topics.lock().unwrap_or_else(|e| e.into_inner());
        let topic = topics.entry(deployment_id.to_string()).or_default();

        if topic.completed_at.is_some() {
            return Err(BusError::Closed(deployment_id.to_string()));
        }

        let event = LogEvent {
            deployment_id: deployment_id.to_string(),
            seq: topic.history.len() as u64,
            timestamp,
            message: message.into(),
            status,
        };
        topic.history.push(event.clone());

        topic.subscribers.retain(|sub| match sub.tx.try_send(event.clone()) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(_)) => {
                warn!(
                    deployment_id = %deployment_id,
                    subscriber = sub.id,
                    "Subscriber fell behind, disconnecting it"
                );
                sub.evicted.store(true, Ordering::SeqCst);
                false
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                debug!(deployment_id = %deployment_id, subscriber = sub.id, "Subscriber gone");
                false
            }
        });

        Ok(event)
    }

    /// Snapshot the history and register for every later event.
    ///
    /// Returns `None` when the bus holds no topic for the deployment. On a
    /// completed topic the live channel is already closed.
    pub fn subscribe(&self, deployment_id: &str) -> Option<Subscription> {
        let mut topics = self.inner.topics.lock().unwrap_or_else(|e| e.into_inner());
        let topic = topics.get_mut(deployment_id)?;

        let (tx, rx) = mpsc::channel(self.inner.options.subscriber_capacity.max(1));
        let id = self.inner.next_subscriber_id.fetch_add(1, Ordering::SeqCst);
        let evicted = Arc::new(AtomicBool::new(false));

        if topic.completed_at.is_none() {
            topic.subscribers.push(Subscriber {
                id,
                tx,
                evicted: evicted.clone(),
            });
        }

        debug!(deployment_id = %deployment_id, subscriber = id, "Subscriber attached");

        Some(Subscription::new(
            deployment_id.to_string(),
            id,
            topic.history.clone(),
            rx,
            evicted,
            topic.terminal_status,
            Arc::downgrade(&self.inner),
        ))
    }

    /// Create an empty topic so observers can attach before the first event
    pub fn open(&self, deployment_id: &str) {
        let mut topics = self.inner.topics.lock().unwrap_or_else(|e| e.into_inner());
        topics.entry(deployment_id.to_string()).or_default();
    }

    /// Remove a topic outright, for a deployment that was never created
    pub fn discard(&self, deployment_id: &str) {
        let mut topics = self.inner.topics.lock().unwrap_or_else(|e| e.into_inner());
        if topics.remove(deployment_id).is_some() {
            debug!(deployment_id = %deployment_id, "Log topic discarded");
        }
    }

    /// Mark a deployment terminal: no more publishes, live channels close
    /// after draining, and the retention clock starts. Unknown topics are
    /// left alone so readers fall back to the record store.
    pub fn complete(&self, deployment_id: &str, status: DeploymentStatus) {
        let mut topics = self.inner.topics.lock().unwrap_or_else(|e| e.into_inner());
        let Some(topic) = topics.get_mut(deployment_id) else {
            return;
        };

        if topic.completed_at.is_some() {
            return;
        }
        topic.completed_at = Some(Instant::now());
        topic.terminal_status = Some(status);
        topic.subscribers.clear();

        info!(deployment_id = %deployment_id, %status, events = topic.history.len(), "Log stream completed");
    }

    /// Terminal status of a completed topic
    pub fn terminal_status(&self, deployment_id: &str) -> Option<DeploymentStatus> {
        let topics = self.inner.topics.lock().unwrap_or_else(|e| e.into_inner());
        topics.get(deployment_id).and_then(|t| t.terminal_status)
    }

    /// Full history currently buffered for a deployment
    pub fn history(&self, deployment_id: &str) -> Option<Vec<LogEvent>> {
        let topics = self.inner.topics.lock().unwrap_or_else(|e| e.into_inner());
        topics.get(deployment_id).map(|t| t.history.clone())
    }

    /// Number of live subscribers of a deployment
    pub fn subscriber_count(&self, deployment_id: &str) -> usize {
        let topics = self.inner.topics.lock().unwrap_or_else(|e| e.into_inner());
        topics
            .get(deployment_id)
            .map(|t| t.subscribers.len())
            .unwrap_or(0)
    }

    pub fn contains(&self, deployment_id: &str) -> bool {
        let topics = self.inner.topics.lock().unwrap_or_else(|e| e.into_inner());
        topics.contains_key(deployment_id)
    }

    /// Drop replay buffers of topics completed longer than the retention
    /// window ago. Returns the number of topics evicted.
    pub fn evict_expired(&self, now: Instant) -> usize {
        let retention = self.inner.options.retention;
        let mut topics = self.inner.topics.lock().unwrap_or_else(|e| e.into_inner());
        let before = topics.len();

        topics.retain(|_, topic| match topic.completed_at {
            Some(done) => now.saturating_duration_since(done) < retention,
            None => true,
        });

        before - topics.len()
    }
}

impl Inner {
    fn unsubscribe(&self, deployment_id: &str, subscriber_id: u64) {
        let mut topics = self.topics.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(topic) = topics.get_mut(deployment_id) {
            topic.subscribers.retain(|s| s.id != subscriber_id);
        }
    }
}
