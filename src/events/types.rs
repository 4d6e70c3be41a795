//! Event types for swarm activity streaming
//!
//! Every externally observable action in the swarm emits one of these
//! events: orchestrator phase changes, subtask lifecycle, streaming worker
//! tokens, file writes, rate-limit waits, and token accounting updates.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Orchestrator phase within a build iteration
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Executing,
    Dispatching,
    Reviewing,
    Verifying,
    FinalReview,
}

impl Phase {
    pub fn as_str(&self) -> &'static str {
        match self {
            Phase::Executing => "executing",
            Phase::Dispatching => "dispatching",
            Phase::Reviewing => "reviewing",
            Phase::Verifying => "verifying",
            Phase::FinalReview => "final_review",
        }
    }
}

impl std::fmt::Display for Phase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Core event enum - the vocabulary of swarm activity
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum SwarmEvent {
    // === Orchestrator lifecycle ===
    /// The orchestrator entered a new phase
    OrchestratorPhase { project_id: String, phase: Phase },
    /// A plan was accepted, creating subtasks
    OrchestratorPlan {
        project_id: String,
        subtask_count: usize,
    },
    /// A review round produced decisions
    OrchestratorReview {
        project_id: String,
        decision_count: usize,
    },
    /// One main-loop iteration finished
    OrchestratorIteration {
        project_id: String,
        iteration: u32,
        completed: usize,
        total: usize,
    },

    // === Subtask lifecycle ===
    /// A subtask was assigned to a worker slot
    SubtaskAssigned {
        project_id: String,
        subtask_id: String,
        title: String,
        worker: usize,
    },
    /// A worker made progress on a subtask (tool call, etc.)
    SubtaskProgress {
        project_id: String,
        subtask_id: String,
        worker: usize,
        detail: String,
    },
    /// A worker finished a subtask attempt
    SubtaskCompleted {
        project_id: String,
        subtask_id: String,
        status: String,
        attempts: u32,
    },

    // === Streaming ===
    /// A token was received from a worker's LLM stream
    WorkerToken {
        project_id: String,
        subtask_id: String,
        worker: usize,
        token: String,
    },

    // === Filesystem ===
    /// A tool wrote or patched a file
    FileWritten {
        project_id: String,
        path: String,
        bytes: usize,
    },

    // === Terminal outcomes ===
    /// The build completed successfully
    ProjectDone { project_id: String, summary: String },
    /// The build failed terminally
    ProjectError { project_id: String, message: String },

    // === Shared substrate ===
    /// A caller is sleeping on the hourly rate-limit window
    RateLimitWait { wait_ms: u64 },
    /// The LLM transport is retrying after a transient error
    LlmRetry {
        attempt: u32,
        delay_ms: u64,
        reason: String,
    },
    /// Aggregate token usage changed
    TokensUpdate {
        prompt_tokens: u64,
        completion_tokens: u64,
        calls: u64,
    },
}

impl SwarmEvent {
    /// Get the documented topic string for this event
    pub fn topic(&self) -> &'static str {
        match self {
            SwarmEvent::OrchestratorPhase { .. } => "orchestrator:phase",
            SwarmEvent::OrchestratorPlan { .. } => "orchestrator:plan",
            SwarmEvent::OrchestratorReview { .. } => "orchestrator:review",
            SwarmEvent::OrchestratorIteration { .. } => "orchestrator:iteration",
            SwarmEvent::SubtaskAssigned { .. } => "subtask:assigned",
            SwarmEvent::SubtaskProgress { .. } => "subtask:progress",
            SwarmEvent::SubtaskCompleted { .. } => "subtask:completed",
            SwarmEvent::WorkerToken { .. } => "worker:token",
            SwarmEvent::FileWritten { .. } => "file:written",
            SwarmEvent::ProjectDone { .. } => "project:done",
            SwarmEvent::ProjectError { .. } => "project:error",
            SwarmEvent::RateLimitWait { .. } => "rate-limit:wait",
            SwarmEvent::LlmRetry { .. } => "llm:retry",
            SwarmEvent::TokensUpdate { .. } => "tokens:update",
        }
    }

    /// Get the project ID for this event, if it is bound to one
    pub fn project_id(&self) -> Option<&str> {
        match self {
            SwarmEvent::OrchestratorPhase { project_id, .. }
            | SwarmEvent::OrchestratorPlan { project_id, .. }
            | SwarmEvent::OrchestratorReview { project_id, .. }
            | SwarmEvent::OrchestratorIteration { project_id, .. }
            | SwarmEvent::SubtaskAssigned { project_id, .. }
            | SwarmEvent::SubtaskProgress { project_id, .. }
            | SwarmEvent::SubtaskCompleted { project_id, .. }
            | SwarmEvent::WorkerToken { project_id, .. }
            | SwarmEvent::FileWritten { project_id, .. }
            | SwarmEvent::ProjectDone { project_id, .. }
            | SwarmEvent::ProjectError { project_id, .. } => Some(project_id),
            SwarmEvent::RateLimitWait { .. }
            | SwarmEvent::LlmRetry { .. }
            | SwarmEvent::TokensUpdate { .. } => None,
        }
    }
}

/// A timestamped event log entry for file persistence
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct EventLogEntry {
    /// Timestamp of the event
    #[serde(rename = "ts")]
    pub timestamp: DateTime<Utc>,
    /// The event
    pub event: SwarmEvent,
}

impl EventLogEntry {
    /// Create a new log entry with current timestamp
    pub fn new(event: SwarmEvent) -> Self {
        Self {
            timestamp: Utc::now(),
            event,
        }
    }
}
