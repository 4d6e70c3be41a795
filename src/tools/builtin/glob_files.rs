//! glob_files tool - find files matching a glob pattern

use async_trait::async_trait;
use serde_json::Value;

use crate::tools::{Tool, ToolContext, ToolResult};

/// Matches past this count are dropped
const MAX_MATCHES: usize = 200;

pub struct GlobFilesTool;

#[async_trait]
impl Tool for GlobFilesTool {
    fn name(&self) -> &'static str {
        "glob_files"
    }

    fn description(&self) -> &'static str {
        "Find files matching a glob pattern (e.g. 'src/**/*.rs'), relative to the project root."
    }

    fn input_schema(&self) -> Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "pattern": {
                    "type": "string",
                    "description": "Glob pattern relative to the project root"
                }
            },
            "required": ["pattern"]
        })
    }

    async fn execute(&self, input: Value, ctx: &ToolContext) -> ToolResult {
        let pattern = match input["pattern"].as_str() {
            Some(p) => p,
            None => return ToolResult::error("pattern is required"),
        };

        if pattern.contains("..") {
            return ToolResult::error("pattern must not contain '..'");
        }

        let root = ctx.root.canonicalize().unwrap_or_else(|_| ctx.root.clone());
        let full_pattern = root.join(pattern).to_string_lossy().to_string();

        let paths = match glob::glob(&full_pattern) {
            Ok(paths) => paths,
            Err(e) => return ToolResult::error(format!("Invalid glob pattern: {}", e)),
        };

        let mut matches = Vec::new();
        let mut total = 0usize;
        for entry in paths.flatten() {
            // Matches outside the root (via symlinks) are skipped
            if !entry.starts_with(&root) {
                continue;
            }
            total += 1;
            if matches.len() < MAX_MATCHES {
                matches.push(
                    entry
                        .strip_prefix(&root)
                        .unwrap_or(&entry)
                        .to_string_lossy()
                        .replace('\\', "/"),
                );
            }
        }
        matches.sort();

        if matches.is_empty() {
            ToolResult::success(format!("No files match '{}'", pattern))
        } else if total > MAX_MATCHES {
            ToolResult::success(format!("{}\n[{} more matches not shown]", matches.join("\n"), total - MAX_MATCHES))
        } else {
            ToolResult::success(matches.join("\n"))
        }
    }
}
