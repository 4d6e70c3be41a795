//! Tool trait definition

use async_trait::async_trait;
use serde_json::Value;

use super::context::ToolContext;

/// A tool that can be called by the LLM
///
/// The core invokes a tool by name with JSON arguments and consumes a
/// single string result; errors are results too, so the model can read
/// them and adapt.
#[async_trait]
pub trait Tool: Send + Sync {
    /// Tool name (matches the LLM tool-call name)
    fn name(&self) -> &'static str;

    /// Human-readable description
    fn description(&self) -> &'static str;

    /// JSON Schema for input parameters
    fn input_schema(&self) -> Value;

    /// Execute the tool
    async fn execute(&self, input: Value, ctx: &ToolContext) -> ToolResult;
}

/// Result of a tool execution
#[derive(Debug, Clone)]
pub struct ToolResult {
    pub content: String,
    pub is_error: bool,
}

impl ToolResult {
    /// Create a successful result
    pub fn success(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            is_error: false,
        }
    }

    /// Create an error result
    pub fn error(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            is_error: true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tool_result_success() {
        let result = ToolResult::success("File written");
        assert!(!result.is_error);
        assert_eq!(result.content, "File written");
    }

    #[test]
    fn test_tool_result_error() {
        let result = ToolResult::error("File not found");
        assert!(result.is_error);
        assert_eq!(result.content, "File not found");
    }
}
