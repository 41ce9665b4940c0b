//! Tool system exposing session operations to remote callers
//!
//! Every tool describes itself with a JSON Schema; arguments are validated
//! against that schema before execution. Session-level failures are part of a
//! tool's normal output (a status string), not errors - only unknown tools and
//! schema violations surface as [`ToolError`].

use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use thiserror::Error;

pub mod mqtt;

/// A remotely invokable tool
#[async_trait]
pub trait Tool: Send + Sync {
    /// Name, human description, and JSON Schema for the arguments
    fn describe(&self) -> ToolDescription;

    /// Execute with arguments already validated against the schema
    async fn execute(&self, parameters: &Value) -> Result<Value, ToolError>;
}

/// Tool metadata surfaced through the listing endpoint
#[derive(Debug, Clone)]
pub struct ToolDescription {
    pub name: String,
    pub description: String,
    pub parameters: Value,
}

/// Registry and dispatcher for the tool surface
#[derive(Default)]
pub struct ToolSystem {
    tools: HashMap<String, Box<dyn Tool>>,
}

impl ToolSystem {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a tool under its described name
    pub fn register(&mut self, tool: Box<dyn Tool>) {
        let name = tool.describe().name;
        self.tools.insert(name, tool);
    }

    /// Get tool description
    pub fn describe_tool(&self, tool_name: &str) -> Option<ToolDescription> {
        self.tools.get(tool_name).map(|tool| tool.describe())
    }

    /// Validate arguments against the tool's schema, then execute
    pub async fn execute_tool(
        &self,
        tool_name: &str,
        parameters: &Value,
    ) -> Result<Value, ToolError> {
        let tool = self
            .tools
            .get(tool_name)
            .ok_or_else(|| ToolError::UnknownTool(tool_name.to_string()))?;

        self.validate_parameters(tool_name, parameters)?;

        tool.execute(parameters).await
    }

    fn validate_parameters(&self, tool_name: &str, parameters: &Value) -> Result<(), ToolError> {
        let tool = self
            .tools
            .get(tool_name)
            .ok_or_else(|| ToolError::UnknownTool(tool_name.to_string()))?;

        let description = tool.describe();
        let validator = jsonschema::validator_for(&description.parameters)
            .map_err(|e| ToolError::SchemaError(format!("Schema compilation error: {e}")))?;

        let error_messages: Vec<String> = validator
            .iter_errors(parameters)
            .map(|e| format!("At '{}': {}", e.instance_path(), e))
            .collect();
        if !error_messages.is_empty() {
            return Err(ToolError::ValidationError(error_messages.join("; ")));
        }

        Ok(())
    }

    /// Names of all registered tools, sorted for stable listings
    pub fn list_tools(&self) -> Vec<String> {
        let mut names: Vec<String> = self.tools.keys().cloned().collect();
        names.sort();
        names
    }
}

/// Tool system errors
#[derive(Debug, Error)]
pub enum ToolError {
    #[error("Unknown tool: {0}")]
    UnknownTool(String),
    #[error("Parameter validation failed: {0}")]
    ValidationError(String),
    #[error("Schema error: {0}")]
    SchemaError(String),
    #[error("Invalid parameters: {0}")]
    InvalidParams(String),
    #[error("Tool execution failed: {0}")]
    ExecutionError(String),
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    struct EchoTool;

    #[async_trait]
    impl Tool for EchoTool {
        fn describe(&self) -> ToolDescription {
            ToolDescription {
                name: "echo".to_string(),
                description: "Echo the text argument".to_string(),
                parameters: json!({
                    "type": "object",
                    "properties": {
                        "text": {"type": "string"}
                    },
                    "required": ["text"]
                }),
            }
        }

        async fn execute(&self, parameters: &Value) -> Result<Value, ToolError> {
            Ok(parameters["text"].clone())
        }
    }

    #[tokio::test]
    async fn empty_system_lists_nothing() {
        let system = ToolSystem::new();
        assert!(system.list_tools().is_empty());
    }

    #[tokio::test]
    async fn registered_tool_is_listed_and_described() {
        let mut system = ToolSystem::new();
        system.register(Box::new(EchoTool));

        assert_eq!(system.list_tools(), vec!["echo".to_string()]);
        let description = system.describe_tool("echo").unwrap();
        assert_eq!(description.name, "echo");
    }

    #[tokio::test]
    async fn execute_unknown_tool_fails() {
        let system = ToolSystem::new();
        let result = system.execute_tool("missing", &json!({})).await;
        assert!(matches!(result, Err(ToolError::UnknownTool(_))));
    }

    #[tokio::test]
    async fn execute_validates_before_running() {
        let mut system = ToolSystem::new();
        system.register(Box::new(EchoTool));

        let result = system.execute_tool("echo", &json!({})).await;
        assert!(matches!(result, Err(ToolError::ValidationError(_))));

        let result = system
            .execute_tool("echo", &json!({"text": "hello"}))
            .await
            .unwrap();
        assert_eq!(result, json!("hello"));
    }

    #[tokio::test]
    async fn execute_rejects_wrong_argument_type() {
        let mut system = ToolSystem::new();
        system.register(Box::new(EchoTool));

        let result = system.execute_tool("echo", &json!({"text": 42})).await;
        assert!(matches!(result, Err(ToolError::ValidationError(_))));
    }
}
