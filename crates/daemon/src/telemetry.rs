//! Telemetry subscriber: consumes actuator-state events, detects pose
//! convergence, completes tasks and wakes pose waiters.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use metrics::counter;
use robot_core::model::{InvalidEvent, PoseTarget, TelemetryEvent};
use thiserror::Error;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use zeromq::{Socket, SocketRecv, SubSocket};

use crate::metrics::{POSE_WAITERS_RESOLVED, TELEMETRY_INVALID};
use crate::registry::TaskRegistry;
use crate::waiters::PoseWaiters;

#[derive(Debug, Error)]
pub enum FeedError {
    #[error("connect to {endpoint} failed: {message}")]
    Connect { endpoint: String, message: String },
    #[error("feed receive failed: {0}")]
    Receive(String),
    #[error("feed closed")]
    Closed,
}

/// A connected feed yielding raw event payloads in arrival order.
#[async_trait]
pub trait TelemetryFeed: Send {
    async fn next_payload(&mut self) -> Result<Bytes, FeedError>;
}

/// Something the subscriber can (re)connect to.
#[async_trait]
pub trait TelemetrySource: Send + Sync {
    async fn connect(&self) -> Result<Box<dyn TelemetryFeed>, FeedError>;

    fn describe(&self) -> String;
}

/// ZeroMQ SUB socket; messages are `[topic, json]`.
#[derive(Debug, Clone)]
pub struct ZmqTelemetrySource {
    endpoint: String,
    topic: String,
}

impl ZmqTelemetrySource {
    pub fn new(endpoint: impl Into<String>, topic: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            topic: topic.into(),
        }
    }
}

#[async_trait]
impl TelemetrySource for ZmqTelemetrySource {
    async fn connect(&self) -> Result<Box<dyn TelemetryFeed>, FeedError> {
        let connect_err = |e: zeromq::ZmqError| FeedError::Connect {
            endpoint: self.endpoint.clone(),
            message: e.to_string(),
        };
        let mut socket = SubSocket::new();
        socket.connect(&self.endpoint).await.map_err(connect_err)?;
        socket.subscribe(&self.topic).await.map_err(connect_err)?;
        Ok(Box::new(ZmqFeed { socket }))
    }

    fn describe(&self) -> String {
        format!("{} (topic {:?})", self.endpoint, self.topic)
    }
}

struct ZmqFeed {
    socket: SubSocket,
}

#[async_trait]
impl TelemetryFeed for ZmqFeed {
    async fn next_payload(&mut self) -> Result<Bytes, FeedError> {
        let msg = self
            .socket
            .recv()
            .await
            .map_err(|e| FeedError::Receive(e.to_string()))?;
        // The payload is the last frame; earlier frames carry the topic.
        msg.len()
            .checked_sub(1)
            .and_then(|last| msg.get(last))
            .cloned()
            .ok_or_else(|| FeedError::Receive("empty message".into()))
    }
}

/// Reconnect delay policy: doubles from `initial` up to `max`.
#[derive(Debug, Clone)]
pub struct Backoff {
    initial: Duration,
    max: Duration,
    current: Duration,
}

impl Backoff {
    pub fn new(initial: Duration, max: Duration) -> Self {
        Self {
            initial,
            max,
            current: initial,
        }
    }

    pub fn next_delay(&mut self) -> Duration {
        let delay = self.current;
        self.current = (self.current * 2).min(self.max);
        delay
    }

    pub fn reset(&mut self) {
        self.current = self.initial;
    }
}

impl Default for Backoff {
    fn default() -> Self {
        Self::new(Duration::from_millis(500), Duration::from_secs(30))
    }
}

/// What one event did to shared state.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EventOutcome {
    pub converged: bool,
    pub waiters_resolved: usize,
    pub tasks_completed: Vec<String>,
}

pub struct TelemetrySubscriber {
    target: PoseTarget,
    registry: Arc<TaskRegistry>,
    waiters: PoseWaiters,
}

impl TelemetrySubscriber {
    pub fn new(target: PoseTarget, registry: Arc<TaskRegistry>, waiters: PoseWaiters) -> Self {
        Self {
            target,
            registry,
            waiters,
        }
    }

    pub fn handle_payload(&self, raw: &[u8]) -> Result<EventOutcome, InvalidEvent> {
        let event = TelemetryEvent::parse(raw)?;
        Ok(self.handle_event(&event))
    }

    /// Applies one event: resolves waiters on convergence, then completes
    /// running tasks if the event reports success.
    pub fn handle_event(&self, event: &TelemetryEvent) -> EventOutcome {
        let mut outcome = EventOutcome::default();

        if self.target.is_converged(&event.joints) {
            outcome.converged = true;
            outcome.waiters_resolved = self.waiters.resolve_all(event);
            if outcome.waiters_resolved > 0 {
                counter!(POSE_WAITERS_RESOLVED).increment(outcome.waiters_resolved as u64);
                info!(waiters = outcome.waiters_resolved, "pose reached; waiters resolved");
            }
        }

        if event.reports_success() {
            outcome.tasks_completed = self.registry.complete_running();
            for cmd_id in &outcome.tasks_completed {
                info!(cmd_id = %cmd_id, "task completed");
            }
        }

        outcome
    }

    /// Processes payloads until the feed fails. Returns how many payloads
    /// were received and the error that ended the connection.
    pub async fn consume(&self, feed: &mut dyn TelemetryFeed) -> (u64, FeedError) {
        let mut received = 0u64;
        loop {
            let raw = match feed.next_payload().await {
                Ok(raw) => raw,
                Err(err) => return (received, err),
            };
            received += 1;
            match self.handle_payload(&raw) {
                Ok(outcome) => debug!(?outcome, "telemetry event applied"),
                Err(err) => {
                    counter!(TELEMETRY_INVALID).increment(1);
                    warn!(error = %err, "dropping invalid telemetry event");
                }
            }
        }
    }

    /// Runs forever, reconnecting to `source` with `backoff` whenever the
    /// feed cannot be opened or drops.
    pub async fn run(self, source: Arc<dyn TelemetrySource>, mut backoff: Backoff) {
        loop {
            match source.connect().await {
                Ok(mut feed) => {
                    info!(source = %source.describe(), "telemetry feed connected");
                    let (received, err) = self.consume(feed.as_mut()).await;
                    if received > 0 {
                        backoff.reset();
                    }
                    warn!(error = %err, received, "telemetry feed lost");
                }
                Err(err) => warn!(error = %err, "telemetry connect failed"),
            }
            let delay = backoff.next_delay();
            info!(delay_ms = delay.as_millis() as u64, "reconnecting telemetry feed");
            tokio::time::sleep(delay).await;
        }
    }

    pub fn spawn(self, source: Arc<dyn TelemetrySource>, backoff: Backoff) -> JoinHandle<()> {
        tokio::spawn(self.run(source, backoff))
    }
}
