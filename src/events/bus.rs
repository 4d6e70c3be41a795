//! Event bus - central pub/sub system for swarm events
//!
//! The EventBus uses tokio broadcast channels to deliver events to all
//! subscribers with minimal latency. Components emit events; consumers
//! (CLI forwarder, dashboards) subscribe. Emission is fire-and-forget and
//! never blocks the emitter.

use std::sync::Arc;

use tokio::sync::broadcast;
use tracing::debug;

use super::types::{Phase, SwarmEvent};

/// Default channel capacity (events)
///
/// Streaming tokens dominate event volume; at ~100 tokens/second this
/// provides ~100 seconds of buffer per subscriber.
pub const DEFAULT_CHANNEL_CAPACITY: usize = 10_000;

/// Central event bus for swarm activity streaming
pub struct EventBus {
    tx: broadcast::Sender<SwarmEvent>,
}

impl EventBus {
    /// Create a new event bus with the given capacity
    pub fn new(capacity: usize) -> Self {
        debug!(capacity, "EventBus::new: creating event bus");
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    /// Create a new event bus with default capacity
    pub fn with_default_capacity() -> Self {
        Self::new(DEFAULT_CHANNEL_CAPACITY)
    }

    /// Emit an event to all subscribers
    ///
    /// If there are no subscribers the event is dropped. If a subscriber's
    /// buffer is full its oldest events are dropped (it sees a Lagged error
    /// and continues).
    pub fn emit(&self, event: SwarmEvent) {
        debug!(topic = event.topic(), "EventBus::emit");
        let _ = self.tx.send(event);
    }

    /// Subscribe to receive events
    ///
    /// Events emitted before subscription are not received.
    pub fn subscribe(&self) -> broadcast::Receiver<SwarmEvent> {
        self.tx.subscribe()
    }

    /// Create an emitter handle bound to a project
    pub fn emitter_for(&self, project_id: impl Into<String>) -> EventEmitter {
        EventEmitter {
            tx: self.tx.clone(),
            project_id: project_id.into(),
        }
    }

    /// Get the number of active subscribers
    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::with_default_capacity()
    }
}

/// Handle for components to emit events without owning the bus
///
/// Cheap to clone; carries a pre-bound project ID.
#[derive(Clone)]
pub struct EventEmitter {
    tx: broadcast::Sender<SwarmEvent>,
    project_id: String,
}

impl EventEmitter {
    /// Get the project ID this emitter is bound to
    pub fn project_id(&self) -> &str {
        &self.project_id
    }

    /// Emit a raw event
    pub fn emit(&self, event: SwarmEvent) {
        let _ = self.tx.send(event);
    }

    // === Convenience methods ===

    pub fn phase(&self, phase: Phase) {
        self.emit(SwarmEvent::OrchestratorPhase {
            project_id: self.project_id.clone(),
            phase,
        });
    }

    pub fn plan(&self, subtask_count: usize) {
        self.emit(SwarmEvent::OrchestratorPlan {
            project_id: self.project_id.clone(),
            subtask_count,
        });
    }

    pub fn review(&self, decision_count: usize) {
        self.emit(SwarmEvent::OrchestratorReview {
            project_id: self.project_id.clone(),
            decision_count,
        });
    }

    pub fn iteration(&self, iteration: u32, completed: usize, total: usize) {
        self.emit(SwarmEvent::OrchestratorIteration {
            project_id: self.project_id.clone(),
            iteration,
            completed,
            total,
        });
    }

    pub fn subtask_assigned(&self, subtask_id: &str, title: &str, worker: usize) {
        self.emit(SwarmEvent::SubtaskAssigned {
            project_id: self.project_id.clone(),
            subtask_id: subtask_id.to_string(),
            title: title.to_string(),
            worker,
        });
    }

    pub fn subtask_progress(&self, subtask_id: &str, worker: usize, detail: &str) {
        self.emit(SwarmEvent::SubtaskProgress {
            project_id: self.project_id.clone(),
            subtask_id: subtask_id.to_string(),
            worker,
            detail: detail.to_string(),
        });
    }

    pub fn subtask_completed(&self, subtask_id: &str, status: &str, attempts: u32) {
        self.emit(SwarmEvent::SubtaskCompleted {
            project_id: self.project_id.clone(),
            subtask_id: subtask_id.to_string(),
            status: status.to_string(),
            attempts,
        });
    }

    pub fn worker_token(&self, subtask_id: &str, worker: usize, token: &str) {
        self.emit(SwarmEvent::WorkerToken {
            project_id: self.project_id.clone(),
            subtask_id: subtask_id.to_string(),
            worker,
            token: token.to_string(),
        });
    }

    pub fn file_written(&self, path: &str, bytes: usize) {
        self.emit(SwarmEvent::FileWritten {
            project_id: self.project_id.clone(),
            path: path.to_string(),
            bytes,
        });
    }

    pub fn project_done(&self, summary: &str) {
        self.emit(SwarmEvent::ProjectDone {
            project_id: self.project_id.clone(),
            summary: summary.to_string(),
        });
    }

    pub fn project_error(&self, message: &str) {
        self.emit(SwarmEvent::ProjectError {
            project_id: self.project_id.clone(),
            message: message.to_string(),
        });
    }
}

/// Create an event bus wrapped in an Arc for shared ownership
pub fn create_event_bus() -> Arc<EventBus> {
    Arc::new(EventBus::with_default_capacity())
}
