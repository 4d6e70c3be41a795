//! execute_command tool - run an allow-listed command in the project root
//!
//! Commands run without a shell: the input is split into argv and spawned
//! directly, the base command must be on the allow-list, and arguments
//! containing shell metacharacters or path-traversal sequences are
//! rejected outright. This is mitigation, not isolation.

use async_trait::async_trait;
use serde_json::Value;
use std::time::Duration;
use tracing::debug;

use crate::tools::{Tool, ToolContext, ToolResult};

/// Base commands workers may run
const ALLOWED_COMMANDS: &[&str] = &[
    "cargo", "rustc", "rustfmt", "go", "python", "python3", "pip", "pip3", "node", "npm", "npx", "yarn", "pnpm",
    "tsc", "deno", "git", "make", "ls", "cat", "head", "tail", "wc", "grep", "find", "diff", "mkdir", "touch", "cp",
    "mv", "echo", "sed", "awk", "sort", "uniq", "test",
];

/// Shell metacharacters that have no business in a direct argv spawn
const FORBIDDEN_CHARS: &[char] = &[';', '&', '|', '`', '$', '>', '<', '\n', '(', ')'];

/// Default and maximum command timeout
const TIMEOUT: Duration = Duration::from_secs(30);

/// stdout/stderr cap
const MAX_OUTPUT_BYTES: usize = 1024 * 1024;

pub struct ExecuteCommandTool;

#[async_trait]
impl Tool for ExecuteCommandTool {
    fn name(&self) -> &'static str {
        "execute_command"
    }

    fn description(&self) -> &'static str {
        "Run a command in the project root. Only allow-listed base commands; no shell operators."
    }

    fn input_schema(&self) -> Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "command": {
                    "type": "string",
                    "description": "Command and arguments, whitespace separated (no pipes or redirects)"
                }
            },
            "required": ["command"]
        })
    }

    async fn execute(&self, input: Value, ctx: &ToolContext) -> ToolResult {
        let command = match input["command"].as_str() {
            Some(c) => c.trim(),
            None => return ToolResult::error("command is required"),
        };

        let argv: Vec<&str> = command.split_whitespace().collect();
        let Some((program, args)) = argv.split_first() else {
            return ToolResult::error("command is empty");
        };

        if let Err(message) = validate_argv(program, args) {
            debug!(command, %message, "ExecuteCommandTool: rejected");
            return ToolResult::error(message);
        }

        let output = match tokio::time::timeout(
            TIMEOUT,
            tokio::process::Command::new(program)
                .args(args)
                .current_dir(&ctx.root)
                .kill_on_drop(true)
                .output(),
        )
        .await
        {
            Ok(Ok(output)) => output,
            Ok(Err(e)) => return ToolResult::error(format!("Failed to execute command: {}", e)),
            Err(_) => return ToolResult::error(format!("Command timed out after {}ms", TIMEOUT.as_millis())),
        };

        let stdout = String::from_utf8_lossy(&output.stdout);
        let stderr = String::from_utf8_lossy(&output.stderr);

        let combined = if stdout.is_empty() && !stderr.is_empty() {
            stderr.to_string()
        } else if stderr.is_empty() {
            stdout.to_string()
        } else {
            format!("{}\n\nSTDERR:\n{}", stdout, stderr)
        };

        let truncated = if combined.len() > MAX_OUTPUT_BYTES {
            let mut end = MAX_OUTPUT_BYTES;
            while !combined.is_char_boundary(end) {
                end -= 1;
            }
            format!("{}...\n[truncated, {} bytes total]", &combined[..end], combined.len())
        } else {
            combined
        };

        if output.status.success() {
            ToolResult::success(if truncated.is_empty() { "(no output)".to_string() } else { truncated })
        } else {
            ToolResult::error(format!("Exit code: {}\n{}", output.status.code().unwrap_or(-1), truncated))
        }
    }
}

fn validate_argv(program: &str, args: &[&str]) -> Result<(), String> {
    if !ALLOWED_COMMANDS.contains(&program) {
        return Err(format!("Command '{}' is not on the allow-list", program));
    }

    for arg in std::iter::once(&program).chain(args.iter()) {
        if arg.contains(FORBIDDEN_CHARS) {
            return Err(format!("Argument '{}' contains forbidden shell characters", arg));
        }
        if arg.contains("../") || arg.contains("..\\") || *arg == ".." {
            return Err(format!("Argument '{}' contains a path traversal sequence", arg));
        }
    }

    Ok(())
}
