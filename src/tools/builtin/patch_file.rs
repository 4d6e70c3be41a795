//! patch_file tool - replace an exact string in a file

use async_trait::async_trait;
use serde_json::Value;
use std::path::Path;
use tracing::debug;

use crate::tools::{Tool, ToolContext, ToolResult};

pub struct PatchFileTool;

#[async_trait]
impl Tool for PatchFileTool {
    fn name(&self) -> &'static str {
        "patch_file"
    }

    fn description(&self) -> &'static str {
        "Replace an exact string in a file. The old string must match exactly, including whitespace."
    }

    fn input_schema(&self) -> Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "path": {
                    "type": "string",
                    "description": "File path relative to the project root"
                },
                "old_string": {
                    "type": "string",
                    "description": "Exact string to find and replace"
                },
                "new_string": {
                    "type": "string",
                    "description": "Replacement string"
                },
                "replace_all": {
                    "type": "boolean",
                    "description": "Replace all occurrences (default: false)"
                }
            },
            "required": ["path", "old_string", "new_string"]
        })
    }

    async fn execute(&self, input: Value, ctx: &ToolContext) -> ToolResult {
        let path = match input["path"].as_str() {
            Some(p) => p,
            None => return ToolResult::error("path is required"),
        };
        let old_string = match input["old_string"].as_str() {
            Some(s) => s,
            None => return ToolResult::error("old_string is required"),
        };
        let new_string = match input["new_string"].as_str() {
            Some(s) => s,
            None => return ToolResult::error("new_string is required"),
        };
        let replace_all = input["replace_all"].as_bool().unwrap_or(false);

        let full_path = match ctx.validate_path(Path::new(path)) {
            Ok(p) => p,
            Err(e) => return ToolResult::error(e.to_string()),
        };
        let relative = ctx.relative(&full_path);

        ctx.lock_path(&relative).await;
        let result = patch(&full_path, old_string, new_string, replace_all).await;
        ctx.unlock_path(&relative).await;

        match result {
            Ok(count) => {
                ctx.record_artifact(&relative).await;
                ctx.emit_file_written(&relative, new_string.len());
                debug!(path = %relative, count, "PatchFileTool: patched");
                ToolResult::success(format!("Replaced {} occurrence(s) in {}", count, relative))
            }
            Err(message) => ToolResult::error(message),
        }
    }
}

async fn patch(path: &Path, old_string: &str, new_string: &str, replace_all: bool) -> Result<usize, String> {
    let content = tokio::fs::read_to_string(path)
        .await
        .map_err(|e| format!("Failed to read file: {}", e))?;

    let count = content.matches(old_string).count();
    if count == 0 {
        return Err("old_string not found in file. Make sure it matches exactly including whitespace.".to_string());
    }
    if count > 1 && !replace_all {
        return Err(format!(
            "old_string found {} times. Use replace_all=true or provide more context.",
            count
        ));
    }

    let new_content = if replace_all {
        content.replace(old_string, new_string)
    } else {
        content.replacen(old_string, new_string, 1)
    };

    tokio::fs::write(path, new_content)
        .await
        .map_err(|e| format!("Failed to write file: {}", e))?;

    Ok(if replace_all { count } else { 1 })
}
