//! Tool error types

use std::path::PathBuf;
use thiserror::Error;

/// Errors that can occur during tool execution
#[derive(Debug, Error)]
pub enum ToolError {
    #[error("Path {path} escapes project root {root}")]
    SandboxViolation { path: PathBuf, root: PathBuf },

    #[error("Command '{command}' is not on the allow-list")]
    CommandNotAllowed { command: String },

    #[error("Argument '{argument}' contains forbidden characters")]
    ForbiddenArgument { argument: String },

    #[error("Command timed out after {timeout_ms}ms")]
    CommandTimeout { timeout_ms: u64 },

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("String pattern not found in file")]
    PatternNotFound,

    #[error("String pattern found {count} times, expected 1 (use replace_all=true for multiple)")]
    PatternNotUnique { count: usize },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),
}
