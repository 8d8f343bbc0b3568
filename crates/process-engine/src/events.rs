//! Step execution events.
//!
//! The engine publishes one [`StepProcessed`] event per step run. Publishing
//! is fire-and-forget: publishers must not block and their failures never
//! reach the pipeline.

use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;

use crate::operation::Operation;

/// Snapshot of a single step run.
#[derive(Debug, Clone, Serialize)]
pub struct StepProcessed {
    pub step_name: String,
    pub stage: String,
    /// Operation passed into the step.
    pub old_operation: Operation,
    /// Operation returned by the step.
    pub operation: Operation,
    /// Wall-clock duration of the step call.
    pub duration: Duration,
    /// Requested retry delay, zero when none.
    pub retry_after: Duration,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Events emitted by the process engine.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ProcessEvent {
    StepProcessed(StepProcessed),
}

/// Sink for process events.
pub trait EventPublisher: Send + Sync {
    fn publish(&self, event: ProcessEvent);
}

/// Discards every event.
#[derive(Debug, Default, Clone)]
pub struct NoopPublisher;

impl EventPublisher for NoopPublisher {
    fn publish(&self, _event: ProcessEvent) {}
}

/// Writes a structured log line per event.
#[derive(Debug, Default, Clone)]
pub struct TracingPublisher;

impl EventPublisher for TracingPublisher {
    fn publish(&self, event: ProcessEvent) {
        match event {
            ProcessEvent::StepProcessed(e) => match e.error {
                Some(error) => tracing::warn!(
                    operation_id = %e.operation.id,
                    stage = %e.stage,
                    step = %e.step_name,
                    duration_ms = e.duration.as_millis() as u64,
                    error = %error,
                    "Step failed"
                ),
                None => tracing::debug!(
                    operation_id = %e.operation.id,
                    stage = %e.stage,
                    step = %e.step_name,
                    duration_ms = e.duration.as_millis() as u64,
                    retry_after_secs = e.retry_after.as_secs(),
                    state = %e.operation.state,
                    "Step processed"
                ),
            },
        }
    }
}

/// Fans events out to broadcast subscribers.
///
/// Slow subscribers lag and lose events; having no subscriber is fine.
#[derive(Debug, Clone)]
pub struct BroadcastPublisher {
    sender: broadcast::Sender<ProcessEvent>,
}

impl BroadcastPublisher {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ProcessEvent> {
        self.sender.subscribe()
    }
}

impl EventPublisher for BroadcastPublisher {
    fn publish(&self, event: ProcessEvent) {
        // An error only means nobody is listening.
        let _ = self.sender.send(event);
    }
}

/// Forwards every event to a list of publishers.
#[derive(Default, Clone)]
pub struct Publishers {
    publishers: Vec<Arc<dyn EventPublisher>>,
}

impl Publishers {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, publisher: Arc<dyn EventPublisher>) -> Self {
        self.publishers.push(publisher);
        self
    }

    pub fn len(&self) -> usize {
        self.publishers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.publishers.is_empty()
    }
}

impl EventPublisher for Publishers {
    fn publish(&self, event: ProcessEvent) {
        for publisher in &self.publishers {
            publisher.publish(event.clone());
        }
    }
}
