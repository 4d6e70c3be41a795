//! ToolContext - execution context for tools
//!
//! Each worker run gets a context scoped to the project root: file
//! operations are validated against the root (sandbox), writes go through
//! the shared per-path file lock, and produced artifacts accumulate in a
//! list that only this worker's subtask owns.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio::sync::Mutex;

use crate::events::EventEmitter;
use crate::limits::FileLockRegistry;

use super::ToolError;

/// Execution context for tools - scoped to a single subtask run
#[derive(Clone)]
pub struct ToolContext {
    /// Project root - all file ops constrained here
    pub root: PathBuf,

    /// Subtask being executed
    pub subtask_id: String,

    /// Worker slot executing it (lock re-entrancy key)
    pub worker_index: usize,

    /// Shared per-path write lock
    locks: Arc<FileLockRegistry>,

    /// Project-relative paths this run created or modified
    artifacts: Arc<Mutex<Vec<String>>>,

    /// Event emitter for file:written notifications
    emitter: Option<EventEmitter>,
}

impl ToolContext {
    /// Create a new context with a private lock registry (tests, one-offs)
    pub fn new(root: PathBuf, subtask_id: impl Into<String>, worker_index: usize) -> Self {
        Self {
            root,
            subtask_id: subtask_id.into(),
            worker_index,
            locks: Arc::new(FileLockRegistry::new()),
            artifacts: Arc::new(Mutex::new(Vec::new())),
            emitter: None,
        }
    }

    /// Use the shared lock registry
    pub fn with_locks(mut self, locks: Arc<FileLockRegistry>) -> Self {
        self.locks = locks;
        self
    }

    /// Emit file:written events through this emitter
    pub fn with_emitter(mut self, emitter: EventEmitter) -> Self {
        self.emitter = Some(emitter);
        self
    }

    /// Normalize a path relative to the project root
    fn normalize_path(&self, path: &Path) -> PathBuf {
        if path.is_absolute() { path.to_path_buf() } else { self.root.join(path) }
    }

    /// Validate that a path resolves inside the project root
    ///
    /// Existing paths are canonicalized to defeat symlink escapes; for a
    /// path that does not exist yet, the nearest existing parent is
    /// canonicalized and checked instead.
    pub fn validate_path(&self, path: &Path) -> Result<PathBuf, ToolError> {
        let normalized = self.normalize_path(path);

        let canonical = if normalized.exists() {
            normalized.canonicalize().unwrap_or_else(|_| normalized.clone())
        } else if let Some(parent) = normalized.parent() {
            if parent.exists() {
                let canonical_parent = parent.canonicalize().unwrap_or_else(|_| parent.to_path_buf());
                canonical_parent.join(normalized.file_name().unwrap_or_default())
            } else {
                normalized.clone()
            }
        } else {
            normalized.clone()
        };

        let root_canonical = self.root.canonicalize().unwrap_or_else(|_| self.root.clone());

        if canonical.starts_with(&root_canonical) {
            Ok(canonical)
        } else {
            Err(ToolError::SandboxViolation {
                path: path.to_path_buf(),
                root: self.root.clone(),
            })
        }
    }

    /// Project-relative rendering of a validated path
    pub fn relative(&self, path: &Path) -> String {
        let root_canonical = self.root.canonicalize().unwrap_or_else(|_| self.root.clone());
        path.strip_prefix(&root_canonical)
            .unwrap_or(path)
            .to_string_lossy()
            .replace('\\', "/")
    }

    /// Take the per-path write lock (re-entrant for this worker)
    pub async fn lock_path(&self, relative_path: &str) {
        self.locks.acquire(relative_path, self.worker_index).await;
    }

    /// Release the per-path write lock
    pub async fn unlock_path(&self, relative_path: &str) {
        self.locks.release(relative_path).await;
    }

    /// Record an artifact produced by this run
    pub async fn record_artifact(&self, relative_path: &str) {
        let mut artifacts = self.artifacts.lock().await;
        artifacts.push(relative_path.to_string());
    }

    /// Snapshot of the artifacts recorded so far
    pub async fn artifacts(&self) -> Vec<String> {
        self.artifacts.lock().await.clone()
    }

    /// Announce a file write on the event bus
    pub fn emit_file_written(&self, relative_path: &str, bytes: usize) {
        if let Some(emitter) = &self.emitter {
            emitter.file_written(relative_path, bytes);
        }
    }
}

impl std::fmt::Debug for ToolContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ToolContext")
            .field("root", &self.root)
            .field("subtask_id", &self.subtask_id)
            .field("worker_index", &self.worker_index)
            .finish()
    }
}
