//! Tool system shared by the retrieve and store agent loops.
//!
//! Defines the `Tool` trait every retrieval/storage tool implements, plus
//! the conversion to the chat API's `ToolDefinition` wire shape.

pub mod retrieve_tools;
pub mod store_tools;
pub mod tool_loop;

use async_trait::async_trait;
use memcore_providers::ToolDefinition;
use serde::{Deserialize, Serialize};

/// Result of executing a tool.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolResult {
    pub content: String,
    pub is_error: bool,
}

impl ToolResult {
    pub fn success(content: impl Into<String>) -> Self {
        Self { content: content.into(), is_error: false }
    }

    /// Errors are surfaced to the model as plain text starting with
    /// `Error:` (spec §7) rather than a distinct wire-level error type.
    pub fn error(message: impl Into<String>) -> Self {
        Self { content: format!("Error: {}", message.into()), is_error: true }
    }
}

#[async_trait]
pub trait Tool: Send + Sync {
    fn name(&self) -> &str;
    fn description(&self) -> &str;
    fn input_schema(&self) -> serde_json::Value;
    async fn execute(&self, input: serde_json::Value) -> ToolResult;
}

pub fn to_definitions(tools: &[Box<dyn Tool>]) -> Vec<ToolDefinition> {
    tools
        .iter()
        .map(|t| ToolDefinition::new(t.name(), t.description(), t.input_schema()))
        .collect()
}
