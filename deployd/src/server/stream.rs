//! Live deployment log stream over Server-Sent Events
//!
//! A connection replays the deployment's history from its bus topic, then
//! relays live events in publish order until the deployment completes. When
//! the topic has already been retired, the durable log history is replayed
//! from the record store instead. Dropping the connection drops the
//! subscription, which releases its slot on the bus.

use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::{Path, State};
use axum::response::sse::{Event, KeepAlive, Sse};
use deployd_api::StreamEnd;
use futures::stream::{Stream, StreamExt};
use tracing::{debug, warn};

use crate::bus::{LogBus, LogEvent, Subscription};
use crate::errors::CoordinatorError;
use crate::models::deployment::{Deployment, DeploymentStatus};
use crate::server::state::ServerState;
use crate::store::DeploymentStore;

/// Interval between keep-alive comments on an idle stream
pub const KEEP_ALIVE_INTERVAL: Duration = Duration::from_secs(15);

enum Source {
    Live(Subscription),
    Retired(Deployment),
}

/// SSE endpoint for one deployment's logs
pub async fn logs_handler(
    State(state): State<Arc<ServerState>>,
    Path(deployment_id): Path<String>,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, CoordinatorError> {
    let source = match state.bus.subscribe(&deployment_id) {
        Some(subscription) => Source::Live(subscription),
        None => match state.store.get(&deployment_id).await? {
            Some(deployment) => Source::Retired(deployment),
            None => return Err(CoordinatorError::DeploymentNotFound(deployment_id)),
        },
    };

    let stream = log_frames(source, state.bus.clone(), state.store.clone());
    Ok(Sse::new(stream).keep_alive(KeepAlive::new().interval(KEEP_ALIVE_INTERVAL).text("ping")))
}

fn log_frames(
    source: Source,
    bus: LogBus,
    store: Arc<dyn DeploymentStore>,
) -> impl Stream<Item = Result<Event, Infallible>> {
    async_stream::stream! {
        match source {
            Source::Live(subscription) => {
                let deployment_id = subscription.deployment_id().to_string();
                let mut final_status = subscription.terminal_status();
                debug!(deployment_id = %deployment_id, backlog = subscription.history().len(), "Log stream attached");

                let mut events = Box::pin(subscription.into_stream());
                while let Some(event) = events.next().await {
                    if let Some(status) = event.status.filter(|s| s.is_terminal()) {
                        final_status = Some(status);
                    }
                    if let Some(frame) = log_frame(&event) {
                        yield Ok(frame);
                    }
                }

                // The live channel also closes when this subscriber is
                // disconnected for falling behind; only announce an end
                // once the deployment really is terminal.
                let status = match final_status.or_else(|| bus.terminal_status(&deployment_id)) {
                    Some(status) => Some(status),
                    None => match store.get(&deployment_id).await {
                        Ok(Some(d)) if d.is_terminal() => Some(d.status),
                        _ => None,
                    },
                };
                match status {
                    Some(status) => yield Ok(end_frame(status)),
                    None => debug!(deployment_id = %deployment_id, "Log stream closed before completion"),
                }
            }
            Source::Retired(deployment) => {
                debug!(deployment_id = %deployment.id, lines = deployment.logs.len(), "Replaying retired log stream");
                for event in replay_events(&deployment) {
                    if let Some(frame) = log_frame(&event) {
                        yield Ok(frame);
                    }
                }
                if deployment.is_terminal() {
                    yield Ok(end_frame(deployment.status));
                }
            }
        }
    }
}

/// Rebuild bus events from a stored log history
pub fn replay_events(deployment: &Deployment) -> Vec<LogEvent> {
    deployment
        .logs
        .iter()
        .enumerate()
        .map(|(seq, entry)| LogEvent {
            deployment_id: deployment.id.clone(),
            seq: seq as u64,
            timestamp: entry.timestamp,
            message: entry.message.clone(),
            status: None,
        })
        .collect()
}

fn log_frame(event: &LogEvent) -> Option<Event> {
    match serde_json::to_string(event) {
        Ok(json) => Some(
            Event::default()
                .event("log")
                .id(event.seq.to_string())
                .data(json),
        ),
        Err(e) => {
            warn!(deployment_id = %event.deployment_id, seq = event.seq, "Unable to encode log event: {}", e);
            None
        }
    }
}

fn end_frame(status: DeploymentStatus) -> Event {
    let body = StreamEnd {
        status: status.to_string(),
    };
    let data = serde_json::to_string(&body)
        .unwrap_or_else(|_| format!("{{\"status\":\"{}\"}}", status));
    Event::default().event("end").data(data)
}
