//! ToolRegistry - the capability the orchestrator invokes tools through

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use tracing::debug;

use super::{Tool, ToolDescriptor, ToolError};

/// Source of tools: local, remote, or simulated
#[async_trait]
pub trait ToolRegistry: Send + Sync {
    /// Declared contracts of every available tool
    async fn list_tools(&self) -> Vec<ToolDescriptor>;

    /// Invoke a tool with resolved arguments
    async fn call(&self, name: &str, args: Value) -> Result<Value, ToolError>;
}

/// Registry of in-process [`Tool`] implementations
#[derive(Default)]
pub struct LocalToolRegistry {
    tools: HashMap<String, Arc<dyn Tool>>,
}

impl LocalToolRegistry {
    /// Create an empty registry
    pub fn empty() -> Self {
        debug!("LocalToolRegistry::empty: called");
        Self { tools: HashMap::new() }
    }

    /// Add a tool, replacing any tool with the same name
    pub fn add_tool(&mut self, tool: Arc<dyn Tool>) {
        let name = tool.descriptor().name;
        debug!(tool_name = %name, "LocalToolRegistry::add_tool: called");
        self.tools.insert(name, tool);
    }

    pub fn with_tool(mut self, tool: Arc<dyn Tool>) -> Self {
        self.add_tool(tool);
        self
    }

    pub fn has_tool(&self, name: &str) -> bool {
        self.tools.contains_key(name)
    }

    pub fn tool_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.tools.keys().cloned().collect();
        names.sort();
        names
    }
}

#[async_trait]
impl ToolRegistry for LocalToolRegistry {
    async fn list_tools(&self) -> Vec<ToolDescriptor> {
        debug!("LocalToolRegistry::list_tools: called");
        let mut descriptors: Vec<ToolDescriptor> = self.tools.values().map(|t| t.descriptor()).collect();
        descriptors.sort_by(|a, b| a.name.cmp(&b.name));
        descriptors
    }

    async fn call(&self, name: &str, args: Value) -> Result<Value, ToolError> {
        debug!(tool_name = %name, "LocalToolRegistry::call: called");
        match self.tools.get(name) {
            Some(tool) => tool.call(args).await,
            None => {
                debug!(tool_name = %name, "LocalToolRegistry::call: unknown tool");
                Err(ToolError::UnknownTool { name: name.to_string() })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    struct EchoTool;

    #[async_trait]
    impl Tool for EchoTool {
        fn descriptor(&self) -> ToolDescriptor {
            ToolDescriptor::new("echo", "Return the arguments")
        }

        async fn call(&self, args: Value) -> Result<Value, ToolError> {
            Ok(json!({ "echo": args }))
        }
    }

    #[tokio::test]
    async fn test_call_registered_tool() {
        let registry = LocalToolRegistry::empty().with_tool(Arc::new(EchoTool));
        assert!(registry.has_tool("echo"));

        let out = registry.call("echo", json!({"a": 1})).await.unwrap();
        assert_eq!(out, json!({"echo": {"a": 1}}));
    }

    #[tokio::test]
    async fn test_call_unknown_tool() {
        let registry = LocalToolRegistry::empty();
        let err = registry.call("missing", json!({})).await.unwrap_err();
        assert!(matches!(err, ToolError::UnknownTool { .. }));
    }

    #[tokio::test]
    async fn test_list_tools_sorted() {
        let registry = LocalToolRegistry::empty().with_tool(Arc::new(EchoTool));
        let tools = registry.list_tools().await;
        assert_eq!(tools.len(), 1);
        assert_eq!(registry.tool_names(), vec!["echo"]);
    }
}
