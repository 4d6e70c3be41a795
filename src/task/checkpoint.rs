//! Checkpointer - persist and restore subtask state
//!
//! Only subtask state is persisted; the orchestrator conversation is
//! rebuilt on resume from a fresh system prompt plus a synthetic resume
//! message. Any subtask caught in_progress by a crash loads as pending.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use eyre::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::subtask::{ProjectContext, Subtask, SubtaskStatus};

/// Well-known checkpoint file name at the project root
pub const CHECKPOINT_FILE: &str = ".swarm-checkpoint.json";

/// On-disk snapshot of a build's subtask state
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Checkpoint {
    pub id: String,
    pub root_dir: PathBuf,
    pub task_description: String,
    pub subtasks: Vec<Subtask>,
    pub saved_at: DateTime<Utc>,
}

/// Saves and restores checkpoints at a project root
pub struct Checkpointer {
    root: PathBuf,
}

impl Checkpointer {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn path(&self) -> PathBuf {
        self.root.join(CHECKPOINT_FILE)
    }

    /// Persist the current subtask state
    pub async fn save(&self, ctx: &ProjectContext) -> Result<()> {
        let checkpoint = Checkpoint {
            id: ctx.id.clone(),
            root_dir: ctx.root_dir.clone(),
            task_description: ctx.task_description.clone(),
            subtasks: ctx.subtasks.clone(),
            saved_at: Utc::now(),
        };

        let json = serde_json::to_string_pretty(&checkpoint).context("Failed to serialize checkpoint")?;
        tokio::fs::write(self.path(), json)
            .await
            .context(format!("Failed to write checkpoint to {}", self.path().display()))?;

        debug!(path = %self.path().display(), subtasks = checkpoint.subtasks.len(), "Checkpointer::save");
        Ok(())
    }

    /// Load the checkpoint, or `None` if absent or invalid
    ///
    /// Subtasks found in_progress were interrupted and are promoted back to
    /// pending so a resumed build re-dispatches them.
    pub async fn load(&self) -> Option<Checkpoint> {
        let path = self.path();
        let content = match tokio::fs::read_to_string(&path).await {
            Ok(content) => content,
            Err(_) => {
                debug!(path = %path.display(), "Checkpointer::load: no checkpoint");
                return None;
            }
        };

        let mut checkpoint: Checkpoint = match serde_json::from_str(&content) {
            Ok(checkpoint) => checkpoint,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Checkpointer::load: invalid checkpoint, ignoring");
                return None;
            }
        };

        for subtask in &mut checkpoint.subtasks {
            if subtask.status == SubtaskStatus::InProgress {
                debug!(subtask_id = %subtask.id, "Checkpointer::load: resetting interrupted subtask");
                subtask.status = SubtaskStatus::Pending;
            }
        }

        Some(checkpoint)
    }

    /// Restore a ProjectContext from a checkpoint
    pub fn restore(checkpoint: Checkpoint, root: &Path) -> ProjectContext {
        let mut ctx = ProjectContext::new(root.to_path_buf(), checkpoint.task_description);
        ctx.id = checkpoint.id;
        ctx.subtasks = checkpoint.subtasks;
        ctx
    }
}
