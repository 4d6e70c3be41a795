//! search_files tool - regex content search across the project

use async_trait::async_trait;
use grep_regex::RegexMatcher;
use grep_searcher::sinks::UTF8;
use grep_searcher::{BinaryDetection, SearcherBuilder};
use serde_json::Value;
use std::path::Path;
use walkdir::WalkDir;

use crate::tools::{Tool, ToolContext, ToolResult};

/// Matches past this count are dropped
const MAX_MATCHES: usize = 100;

/// Directories never searched
const SKIP_DIRS: &[&str] = &[".git", "target", "node_modules", ".swarm"];

pub struct SearchFilesTool;

#[async_trait]
impl Tool for SearchFilesTool {
    fn name(&self) -> &'static str {
        "search_files"
    }

    fn description(&self) -> &'static str {
        "Search file contents with a regex. Returns path:line: text for each match."
    }

    fn input_schema(&self) -> Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "pattern": {
                    "type": "string",
                    "description": "Regular expression to search for"
                },
                "path": {
                    "type": "string",
                    "description": "Subdirectory to search (default: the whole project)"
                }
            },
            "required": ["pattern"]
        })
    }

    async fn execute(&self, input: Value, ctx: &ToolContext) -> ToolResult {
        let pattern = match input["pattern"].as_str() {
            Some(p) => p.to_string(),
            None => return ToolResult::error("pattern is required"),
        };
        let sub_path = input["path"].as_str().unwrap_or(".");

        let search_root = match ctx.validate_path(Path::new(sub_path)) {
            Ok(p) => p,
            Err(e) => return ToolResult::error(e.to_string()),
        };

        let root = ctx.root.canonicalize().unwrap_or_else(|_| ctx.root.clone());

        // grep-searcher is synchronous; run the walk off the async runtime
        let result = tokio::task::spawn_blocking(move || search(&pattern, &search_root, &root)).await;

        match result {
            Ok(Ok(matches)) if matches.is_empty() => ToolResult::success("No matches found"),
            Ok(Ok(matches)) => ToolResult::success(matches.join("\n")),
            Ok(Err(message)) => ToolResult::error(message),
            Err(e) => ToolResult::error(format!("Search task failed: {}", e)),
        }
    }
}

fn search(pattern: &str, search_root: &Path, project_root: &Path) -> Result<Vec<String>, String> {
    let matcher = RegexMatcher::new(pattern).map_err(|e| format!("Invalid regex: {}", e))?;
    let mut searcher = SearcherBuilder::new()
        .binary_detection(BinaryDetection::quit(b'\x00'))
        .line_number(true)
        .build();

    let mut matches = Vec::new();

    let walker = WalkDir::new(search_root).into_iter().filter_entry(|entry| {
        entry
            .file_name()
            .to_str()
            .map(|name| !SKIP_DIRS.contains(&name))
            .unwrap_or(true)
    });

    for entry in walker.flatten() {
        if !entry.file_type().is_file() {
            continue;
        }
        if matches.len() >= MAX_MATCHES {
            matches.push(format!("[stopped after {} matches]", MAX_MATCHES));
            break;
        }

        let display = entry
            .path()
            .strip_prefix(project_root)
            .unwrap_or(entry.path())
            .to_string_lossy()
            .replace('\\', "/");

        let _ = searcher.search_path(
            &matcher,
            entry.path(),
            UTF8(|line_number, line| {
                if matches.len() < MAX_MATCHES {
                    matches.push(format!("{}:{}: {}", display, line_number, line.trim_end()));
                }
                Ok(matches.len() < MAX_MATCHES)
            }),
        );
    }

    Ok(matches)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[tokio::test]
    async fn test_search_finds_matches_with_line_numbers() {
        let temp = tempdir().unwrap();
        std::fs::create_dir(temp.path().join("src")).unwrap();
        std::fs::write(temp.path().join("src/lib.rs"), "fn alpha() {}\nfn beta() {}\n").unwrap();
        let ctx = ToolContext::new(temp.path().to_path_buf(), "s1", 0);

        let result = SearchFilesTool
            .execute(serde_json::json!({"pattern": "fn beta"}), &ctx)
            .await;

        assert!(!result.is_error);
        assert!(result.content.contains("src/lib.rs:2"));
        assert!(result.content.contains("fn beta"));
    }

    #[tokio::test]
    async fn test_search_no_matches() {
        let temp = tempdir().unwrap();
        std::fs::write(temp.path().join("a.txt"), "nothing here").unwrap();
        let ctx = ToolContext::new(temp.path().to_path_buf(), "s1", 0);

        let result = SearchFilesTool
            .execute(serde_json::json!({"pattern": "zzz_missing"}), &ctx)
            .await;

        assert!(!result.is_error);
        assert!(result.content.contains("No matches"));
    }

    #[tokio::test]
    async fn test_search_skips_git_dir() {
        let temp = tempdir().unwrap();
        std::fs::create_dir(temp.path().join(".git")).unwrap();
        std::fs::write(temp.path().join(".git/config"), "secret_marker").unwrap();
        let ctx = ToolContext::new(temp.path().to_path_buf(), "s1", 0);

        let result = SearchFilesTool
            .execute(serde_json::json!({"pattern": "secret_marker"}), &ctx)
            .await;

        assert!(result.content.contains("No matches"));
    }

    #[tokio::test]
    async fn test_search_invalid_regex() {
        let temp = tempdir().unwrap();
        let ctx = ToolContext::new(temp.path().to_path_buf(), "s1", 0);

        let result = SearchFilesTool.execute(serde_json::json!({"pattern": "("}), &ctx).await;
        assert!(result.is_error);
    }
}
