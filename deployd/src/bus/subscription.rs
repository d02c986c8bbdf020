//! Subscriber side of the bus

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use futures::stream::{self, Stream, StreamExt};
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tracing::debug;

use super::{Inner, LogEvent};
use crate::models::deployment::DeploymentStatus;

/// One observer's view of a deployment: the history captured at subscribe
/// time plus a channel carrying every event published afterwards.
///
/// Dropping the subscription unsubscribes it.
pub struct Subscription {
    deployment_id: String,
    id: u64,
    history: Vec<LogEvent>,
    rx: Option<mpsc::Receiver<LogEvent>>,
    evicted: Arc<AtomicBool>,
    terminal_status: Option<DeploymentStatus>,
    bus: Weak<Inner>,
}

impl Subscription {
    pub(super) fn new(
        deployment_id: String,
        id: u64,
        history: Vec<LogEvent>,
        rx: mpsc::Receiver<LogEvent>,
        evicted: Arc<AtomicBool>,
        terminal_status: Option<DeploymentStatus>,
        bus: Weak<Inner>,
    ) -> Self {
        Self {
            deployment_id,
            id,
            history,
            rx: Some(rx),
            evicted,
            terminal_status,
            bus,
        }
    }

    pub fn deployment_id(&self) -> &str {
        &self.deployment_id
    }

    /// Events published before this subscription was created
    pub fn history(&self) -> &[LogEvent] {
        &self.history
    }

    /// Status of the deployment if it was already terminal at subscribe time
    pub fn terminal_status(&self) -> Option<DeploymentStatus> {
        self.terminal_status
    }

    /// Next live event; `None` once the deployment completed or this
    /// subscriber was disconnected
    pub async fn recv(&mut self) -> Option<LogEvent> {
        match self.rx.as_mut() {
            Some(rx) => rx.recv().await,
            None => None,
        }
    }

    /// Whether the bus dropped this subscriber for falling behind
    pub fn was_evicted(&self) -> bool {
        self.evicted.load(Ordering::SeqCst)
    }

    /// History followed by the live tail, as one ordered stream. The
    /// subscription stays registered until the stream is dropped.
    pub fn into_stream(mut self) -> impl Stream<Item = LogEvent> + Send + 'static {
        let history = std::mem::take(&mut self.history);
        let live = match self.rx.take() {
            Some(rx) => ReceiverStream::new(rx).left_stream(),
            None => stream::empty().right_stream(),
        };
        let guard = Unsubscribe {
            deployment_id: self.deployment_id.clone(),
            id: self.id,
            bus: std::mem::take(&mut self.bus),
        };

        stream::iter(history).chain(live).map(move |event| {
            let _held = &guard;
            event
        })
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        unsubscribe(&self.bus, &self.deployment_id, self.id);
    }
}

/// Releases a subscriber slot when the owning stream is dropped
struct Unsubscribe {
    deployment_id: String,
    id: u64,
    bus: Weak<Inner>,
}

impl Drop for Unsubscribe {
    fn drop(&mut self) {
        unsubscribe(&self.bus, &self.deployment_id, self.id);
    }
}

fn unsubscribe(bus: &Weak<Inner>, deployment_id: &str, id: u64) {
    if let Some(inner) = bus.upgrade() {
        inner.unsubscribe(deployment_id, id);
        debug!(deployment_id = %deployment_id, subscriber = id, "Subscriber released");
    }
}
