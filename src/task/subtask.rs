//! Subtask and project data model
//!
//! A Subtask is the unit of work planned by the orchestrator and executed
//! by one worker. The ProjectContext owns the subtask collection and the
//! orchestrator conversation for the duration of a build; all mutation of
//! subtasks goes through the task manager.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::llm::ChatMessage;

/// Stored worker summaries are capped at this many chars to bound context
/// growth; truncation happens at storage time, not read time.
pub const RESULT_CAP: usize = 2000;

/// Subtask lifecycle status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubtaskStatus {
    Pending,
    InProgress,
    Completed,
    Failed,
}

impl SubtaskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SubtaskStatus::Pending => "pending",
            SubtaskStatus::InProgress => "in_progress",
            SubtaskStatus::Completed => "completed",
            SubtaskStatus::Failed => "failed",
        }
    }
}

impl std::fmt::Display for SubtaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// The central planning entity
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Subtask {
    pub id: String,
    pub title: String,
    pub description: String,

    /// Sibling subtask ids that must be completed before this is ready
    #[serde(default)]
    pub dependencies: Vec<String>,

    /// Worker slot currently or last assigned
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub assigned_worker: Option<usize>,

    pub status: SubtaskStatus,

    /// Last worker summary, truncated to [`RESULT_CAP`] at storage time
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<String>,

    /// Append-only history of project-relative paths this subtask touched
    #[serde(default)]
    pub artifacts: Vec<String>,

    /// Settled worker runs (successful and failed)
    #[serde(default)]
    pub attempts: u32,

    /// Reviewer guidance for the next attempt
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub feedback: Option<String>,
}

impl Subtask {
    pub fn new(title: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            id: Uuid::now_v7().to_string(),
            title: title.into(),
            description: description.into(),
            dependencies: Vec::new(),
            assigned_worker: None,
            status: SubtaskStatus::Pending,
            result: None,
            artifacts: Vec::new(),
            attempts: 0,
            feedback: None,
        }
    }
}

/// One entry of an incoming plan, before ids and dependency resolution
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlannedSubtask {
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub dependencies: Vec<String>,
}

/// Outcome status of one worker run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkerStatus {
    Completed,
    Failed,
}

/// What a worker returns after driving one subtask
#[derive(Debug, Clone)]
pub struct WorkerResult {
    pub subtask_id: String,
    pub status: WorkerStatus,
    pub summary: String,
    pub artifacts: Vec<String>,
    pub error: Option<String>,
}

impl WorkerResult {
    pub fn completed(subtask_id: impl Into<String>, summary: impl Into<String>, artifacts: Vec<String>) -> Self {
        Self {
            subtask_id: subtask_id.into(),
            status: WorkerStatus::Completed,
            summary: summary.into(),
            artifacts,
            error: None,
        }
    }

    pub fn failed(subtask_id: impl Into<String>, error: impl Into<String>, artifacts: Vec<String>) -> Self {
        let error = error.into();
        Self {
            subtask_id: subtask_id.into(),
            status: WorkerStatus::Failed,
            summary: String::new(),
            artifacts,
            error: Some(error),
        }
    }
}

/// Reviewer verdict on one subtask in a batch
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReviewVerdict {
    Accept,
    Revise,
    Reassign,
}

/// One review decision parsed from the orchestrator LLM
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReviewDecision {
    #[serde(alias = "subtaskId", alias = "id")]
    pub subtask_id: String,
    pub verdict: ReviewVerdict,
    #[serde(default)]
    pub feedback: Option<String>,
}

/// The state of one build: subtasks plus the orchestrator conversation
#[derive(Debug, Clone)]
pub struct ProjectContext {
    pub id: String,
    pub root_dir: PathBuf,
    pub task_description: String,

    /// Insertion-ordered; id is the key. Subtasks are never deleted.
    pub subtasks: Vec<Subtask>,

    /// The running orchestrator conversation (not persisted)
    pub orchestrator_messages: Vec<ChatMessage>,

    pub project_file_tree: Option<String>,
    pub planning_context: Option<String>,
}

impl ProjectContext {
    pub fn new(root_dir: PathBuf, task_description: impl Into<String>) -> Self {
        Self {
            id: Uuid::now_v7().to_string(),
            root_dir,
            task_description: task_description.into(),
            subtasks: Vec::new(),
            orchestrator_messages: Vec::new(),
            project_file_tree: None,
            planning_context: None,
        }
    }

    pub fn subtask(&self, id: &str) -> Option<&Subtask> {
        self.subtasks.iter().find(|s| s.id == id)
    }

    pub fn subtask_mut(&mut self, id: &str) -> Option<&mut Subtask> {
        self.subtasks.iter_mut().find(|s| s.id == id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_subtask_defaults() {
        let subtask = Subtask::new("Build parser", "Write the parser module");
        assert_eq!(subtask.status, SubtaskStatus::Pending);
        assert_eq!(subtask.attempts, 0);
        assert!(subtask.dependencies.is_empty());
        assert!(subtask.assigned_worker.is_none());
        assert!(!subtask.id.is_empty());
    }

    #[test]
    fn test_subtask_ids_are_unique() {
        let a = Subtask::new("a", "");
        let b = Subtask::new("b", "");
        assert_ne!(a.id, b.id);
    }

    #[test]
    fn test_status_serialization() {
        assert_eq!(serde_json::to_string(&SubtaskStatus::InProgress).unwrap(), "\"in_progress\"");
        let status: SubtaskStatus = serde_json::from_str("\"failed\"").unwrap();
        assert_eq!(status, SubtaskStatus::Failed);
    }

    #[test]
    fn test_review_decision_accepts_id_aliases() {
        let decision: ReviewDecision =
            serde_json::from_str(r#"{"subtaskId": "s1", "verdict": "accept"}"#).unwrap();
        assert_eq!(decision.subtask_id, "s1");
        assert_eq!(decision.verdict, ReviewVerdict::Accept);

        let decision: ReviewDecision =
            serde_json::from_str(r#"{"id": "s2", "verdict": "revise", "feedback": "fix X"}"#).unwrap();
        assert_eq!(decision.subtask_id, "s2");
        assert_eq!(decision.feedback.as_deref(), Some("fix X"));
    }

    #[test]
    fn test_project_context_lookup() {
        let mut ctx = ProjectContext::new(PathBuf::from("/tmp/p"), "build it");
        let subtask = Subtask::new("a", "desc");
        let id = subtask.id.clone();
        ctx.subtasks.push(subtask);

        assert_eq!(ctx.subtask(&id).unwrap().title, "a");
        ctx.subtask_mut(&id).unwrap().attempts = 2;
        assert_eq!(ctx.subtask(&id).unwrap().attempts, 2);
        assert!(ctx.subtask("missing").is_none());
    }
}
