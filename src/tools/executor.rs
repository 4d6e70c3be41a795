//! ToolExecutor - the worker tool catalog and dispatcher

use std::collections::HashMap;

use crate::llm::{ToolCallRequest, ToolDefinition};

use super::builtin::{
    ExecuteCommandTool, ExecuteSqlTool, GlobFilesTool, InitDatabaseTool, ListDirectoryTool, ListTablesTool,
    PatchFileTool, ReadFileTool, SearchFilesTool, WebReaderTool, WebSearchTool, WriteFileTool,
};
use super::{Tool, ToolContext, ToolResult};

/// Owns the tool catalog; invokes tools by name with JSON arguments
pub struct ToolExecutor {
    tools: HashMap<String, Box<dyn Tool>>,
}

impl ToolExecutor {
    /// Create an executor with the full worker tool catalog
    pub fn standard() -> Self {
        let mut tools: HashMap<String, Box<dyn Tool>> = HashMap::new();

        for tool in [
            Box::new(ReadFileTool) as Box<dyn Tool>,
            Box::new(WriteFileTool),
            Box::new(PatchFileTool),
            Box::new(ListDirectoryTool),
            Box::new(GlobFilesTool),
            Box::new(SearchFilesTool),
            Box::new(ExecuteCommandTool),
            Box::new(WebSearchTool),
            Box::new(WebReaderTool),
            Box::new(InitDatabaseTool),
            Box::new(ExecuteSqlTool),
            Box::new(ListTablesTool),
        ] {
            tools.insert(tool.name().to_string(), tool);
        }

        Self { tools }
    }

    /// Create an empty executor (for testing)
    pub fn empty() -> Self {
        Self { tools: HashMap::new() }
    }

    /// Add a tool to the executor
    pub fn add_tool(&mut self, tool: Box<dyn Tool>) {
        self.tools.insert(tool.name().to_string(), tool);
    }

    /// Tool definitions for the LLM
    pub fn definitions(&self) -> Vec<ToolDefinition> {
        let mut definitions: Vec<ToolDefinition> = self
            .tools
            .values()
            .map(|t| ToolDefinition::new(t.name(), t.description(), t.input_schema()))
            .collect();
        definitions.sort_by(|a, b| a.name.cmp(&b.name));
        definitions
    }

    /// Execute one tool call
    pub async fn execute(&self, call: &ToolCallRequest, ctx: &ToolContext) -> ToolResult {
        match self.tools.get(&call.function.name) {
            Some(tool) => tool.execute(call.parsed_arguments(), ctx).await,
            None => ToolResult::error(format!("Unknown tool: {}", call.function.name)),
        }
    }

    /// Check if a tool exists
    pub fn has_tool(&self, name: &str) -> bool {
        self.tools.contains_key(name)
    }

    /// Names of all registered tools
    pub fn tool_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.tools.keys().cloned().collect();
        names.sort();
        names
    }
}

impl Default for ToolExecutor {
    fn default() -> Self {
        Self::standard()
    }
}
