//! write_file tool - write content to a file

use async_trait::async_trait;
use serde_json::Value;
use std::path::Path;
use tracing::debug;

use crate::tools::{Tool, ToolContext, ToolResult};

pub struct WriteFileTool;

#[async_trait]
impl Tool for WriteFileTool {
    fn name(&self) -> &'static str {
        "write_file"
    }

    fn description(&self) -> &'static str {
        "Write content to a file, creating parent directories if needed. Overwrites existing content."
    }

    fn input_schema(&self) -> Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "path": {
                    "type": "string",
                    "description": "File path relative to the project root"
                },
                "content": {
                    "type": "string",
                    "description": "Content to write"
                }
            },
            "required": ["path", "content"]
        })
    }

    async fn execute(&self, input: Value, ctx: &ToolContext) -> ToolResult {
        let path = match input["path"].as_str() {
            Some(p) => p,
            None => return ToolResult::error("path is required"),
        };
        let content = match input["content"].as_str() {
            Some(c) => c,
            None => return ToolResult::error("content is required"),
        };

        let full_path = match ctx.validate_path(Path::new(path)) {
            Ok(p) => p,
            Err(e) => return ToolResult::error(e.to_string()),
        };
        let relative = ctx.relative(&full_path);

        // Writers take the per-path lock; readers do not
        ctx.lock_path(&relative).await;

        if let Some(parent) = full_path.parent()
            && let Err(e) = tokio::fs::create_dir_all(parent).await
        {
            ctx.unlock_path(&relative).await;
            return ToolResult::error(format!("Failed to create directories: {}", e));
        }

        let write_result = tokio::fs::write(&full_path, content).await;
        ctx.unlock_path(&relative).await;

        if let Err(e) = write_result {
            return ToolResult::error(format!("Failed to write file: {}", e));
        }

        ctx.record_artifact(&relative).await;
        ctx.emit_file_written(&relative, content.len());

        debug!(path = %relative, bytes = content.len(), "WriteFileTool: wrote file");
        ToolResult::success(format!("Wrote {} bytes to {}", content.len(), relative))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[tokio::test]
    async fn test_write_file_basic() {
        let temp = tempdir().unwrap();
        let ctx = ToolContext::new(temp.path().to_path_buf(), "s1", 0);

        let result = WriteFileTool
            .execute(serde_json::json!({"path": "out.txt", "content": "data"}), &ctx)
            .await;

        assert!(!result.is_error);
        let written = std::fs::read_to_string(temp.path().join("out.txt")).unwrap();
        assert_eq!(written, "data");
        assert_eq!(ctx.artifacts().await, vec!["out.txt"]);
    }

    #[tokio::test]
    async fn test_write_file_creates_parents() {
        let temp = tempdir().unwrap();
        let ctx = ToolContext::new(temp.path().to_path_buf(), "s1", 0);

        let result = WriteFileTool
            .execute(serde_json::json!({"path": "deep/nested/file.rs", "content": "fn main() {}"}), &ctx)
            .await;

        assert!(!result.is_error);
        assert!(temp.path().join("deep/nested/file.rs").exists());
    }

    #[tokio::test]
    async fn test_write_file_outside_root_rejected() {
        let temp = tempdir().unwrap();
        let ctx = ToolContext::new(temp.path().to_path_buf(), "s1", 0);

        let result = WriteFileTool
            .execute(serde_json::json!({"path": "../escape.txt", "content": "x"}), &ctx)
            .await;

        assert!(result.is_error);
        assert!(ctx.artifacts().await.is_empty());
    }

    #[tokio::test]
    async fn test_write_file_missing_content() {
        let temp = tempdir().unwrap();
        let ctx = ToolContext::new(temp.path().to_path_buf(), "s1", 0);

        let result = WriteFileTool.execute(serde_json::json!({"path": "x.txt"}), &ctx).await;
        assert!(result.is_error);
    }
}
