//! Project verifier - post-plan build/test runner
//!
//! Once every subtask is completed the orchestrator runs the verifier;
//! failures flow back into the LLM as a fix-plan prompt. The default
//! implementation detects the project type and runs its build and test
//! commands with a per-command timeout and output cap.

use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, info};

/// Per-command timeout
const COMMAND_TIMEOUT: Duration = Duration::from_secs(60);

/// Combined stdout/stderr cap per command
const MAX_OUTPUT_BYTES: usize = 2 * 1024 * 1024;

/// Structured verification outcome
#[derive(Debug, Clone)]
pub struct VerifyReport {
    pub passed: bool,
    pub report: String,
}

impl VerifyReport {
    pub fn passing(report: impl Into<String>) -> Self {
        Self {
            passed: true,
            report: report.into(),
        }
    }

    pub fn failing(report: impl Into<String>) -> Self {
        Self {
            passed: false,
            report: report.into(),
        }
    }
}

/// Runs build/lint/test commands against the project and reports results
#[async_trait]
pub trait Verifier: Send + Sync {
    async fn verify(&self, root: &Path) -> VerifyReport;
}

/// Detects the project type and runs its native check commands
pub struct DefaultVerifier;

impl DefaultVerifier {
    /// Commands for the detected project type
    fn commands_for(root: &Path) -> Vec<Vec<&'static str>> {
        if root.join("Cargo.toml").exists() {
            return vec![vec!["cargo", "check", "--quiet"], vec!["cargo", "test", "--quiet"]];
        }
        if root.join("package.json").exists() {
            let mut commands = Vec::new();
            if root.join("tsconfig.json").exists() {
                commands.push(vec!["npx", "tsc", "--noEmit"]);
            }
            commands.push(vec!["npm", "test", "--silent"]);
            return commands;
        }
        if root.join("go.mod").exists() {
            return vec![vec!["go", "build", "./..."], vec!["go", "test", "./..."]];
        }
        if root.join("pyproject.toml").exists() || root.join("setup.py").exists() {
            return vec![vec!["python3", "-m", "pytest", "-q"]];
        }
        Vec::new()
    }

    async fn run_command(root: &Path, argv: &[&str]) -> (bool, String) {
        let command_display = argv.join(" ");
        debug!(command = %command_display, "DefaultVerifier: running");

        let output = tokio::time::timeout(
            COMMAND_TIMEOUT,
            tokio::process::Command::new(argv[0])
                .args(&argv[1..])
                .current_dir(root)
                .kill_on_drop(true)
                .output(),
        )
        .await;

        match output {
            Ok(Ok(output)) => {
                let mut text = String::new();
                text.push_str(&String::from_utf8_lossy(&output.stdout));
                let stderr = String::from_utf8_lossy(&output.stderr);
                if !stderr.is_empty() {
                    if !text.is_empty() {
                        text.push('\n');
                    }
                    text.push_str(&stderr);
                }
                if text.len() > MAX_OUTPUT_BYTES {
                    let mut end = MAX_OUTPUT_BYTES;
                    while !text.is_char_boundary(end) {
                        end -= 1;
                    }
                    text.truncate(end);
                    text.push_str("\n[output truncated]");
                }
                (output.status.success(), text)
            }
            Ok(Err(e)) => (false, format!("failed to spawn: {}", e)),
            Err(_) => (false, format!("timed out after {}s", COMMAND_TIMEOUT.as_secs())),
        }
    }
}

#[async_trait]
impl Verifier for DefaultVerifier {
    async fn verify(&self, root: &Path) -> VerifyReport {
        let commands = Self::commands_for(root);
        if commands.is_empty() {
            info!("DefaultVerifier: no verification commands for this project type");
            return VerifyReport::passing("No verification commands for this project type");
        }

        let mut passed = true;
        let mut report = String::new();

        for argv in &commands {
            let display = argv.join(" ");
            let (ok, output) = Self::run_command(root, argv).await;
            report.push_str(&format!("$ {}\n{}\n{}\n", display, if ok { "OK" } else { "FAILED" }, output));
            if !ok {
                passed = false;
                // Later commands usually depend on earlier ones
                break;
            }
        }

        info!(passed, "DefaultVerifier: done");
        VerifyReport { passed, report }
    }
}
