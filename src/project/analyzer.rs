//! Project analyzer - pre-plan scan of what already exists on disk
//!
//! The orchestrator injects the resulting file tree and key-file excerpts
//! into the planning prompt so the model plans against reality instead of
//! an imagined empty directory.

use std::path::Path;

use tracing::debug;
use walkdir::WalkDir;

/// Directories never scanned
const SKIP_DIRS: &[&str] = &[".git", "target", "node_modules", ".swarm", "dist", "__pycache__", ".venv"];

/// Files whose contents are worth showing to the planner
const KEY_FILES: &[&str] = &[
    "README.md",
    "README",
    "Cargo.toml",
    "package.json",
    "pyproject.toml",
    "go.mod",
    "Makefile",
];

/// What a scan found
#[derive(Debug, Clone, Default)]
pub struct ProjectScan {
    /// Indented file tree rendering
    pub file_tree: String,
    /// (name, excerpt) pairs for recognized key files
    pub key_files: Vec<(String, String)>,
}

impl ProjectScan {
    pub fn is_empty(&self) -> bool {
        self.file_tree.is_empty() && self.key_files.is_empty()
    }
}

/// Scans a project directory ahead of planning
pub struct ProjectAnalyzer {
    max_depth: usize,
    max_entries: usize,
    key_file_cap: usize,
}

impl ProjectAnalyzer {
    pub fn new() -> Self {
        Self {
            max_depth: 4,
            max_entries: 200,
            key_file_cap: 4000,
        }
    }

    /// Scan the project root
    pub fn scan(&self, root: &Path) -> ProjectScan {
        let mut lines = Vec::new();
        let mut truncated = false;

        let walker = WalkDir::new(root)
            .min_depth(1)
            .max_depth(self.max_depth)
            .sort_by_file_name()
            .into_iter()
            .filter_entry(|entry| {
                entry
                    .file_name()
                    .to_str()
                    .map(|name| !name.starts_with('.') && !SKIP_DIRS.contains(&name))
                    .unwrap_or(false)
            });

        for entry in walker.flatten() {
            if lines.len() >= self.max_entries {
                truncated = true;
                break;
            }
            let depth = entry.depth().saturating_sub(1);
            let name = entry.file_name().to_string_lossy();
            let suffix = if entry.file_type().is_dir() { "/" } else { "" };
            lines.push(format!("{}{}{}", "  ".repeat(depth), name, suffix));
        }

        if truncated {
            lines.push("[... more entries not shown]".to_string());
        }

        let mut key_files = Vec::new();
        for name in KEY_FILES {
            let path = root.join(name);
            if let Ok(content) = std::fs::read_to_string(&path) {
                let excerpt = if content.chars().count() > self.key_file_cap {
                    content.chars().take(self.key_file_cap).collect()
                } else {
                    content
                };
                key_files.push((name.to_string(), excerpt));
            }
        }

        debug!(entries = lines.len(), key_files = key_files.len(), "ProjectAnalyzer::scan");
        ProjectScan {
            file_tree: lines.join("\n"),
            key_files,
        }
    }
}

impl Default for ProjectAnalyzer {
    fn default() -> Self {
        Self::new()
    }
}
