//! Registry of in-process tools, published to the router as the `local` backend.

use std::collections::HashMap;
use std::sync::Arc;

use proto::{BackendKind, CallToolResult, ToolDescriptor, ToolError};
use tracing::debug;

use crate::Tool;

/// Set of local tools keyed by name
pub struct LocalToolset {
    tools: HashMap<String, Arc<dyn Tool>>,
}

impl LocalToolset {
    /// Creates an empty toolset.
    pub fn new() -> Self {
        Self {
            tools: HashMap::new(),
        }
    }

    /// Register a tool
    pub fn register(&mut self, tool: impl Tool + 'static) {
        self.register_arc(Arc::new(tool));
    }

    /// Register an already shared tool
    pub fn register_arc(&mut self, tool: Arc<dyn Tool>) {
        let name = tool.name().to_string();
        debug!("Registering local tool: {name}");
        self.tools.insert(name, tool);
    }

    /// Catalog entries for every registered tool, sorted by name.
    pub fn descriptors(&self) -> Vec<ToolDescriptor> {
        let mut descriptors: Vec<ToolDescriptor> = self
            .tools
            .values()
            .map(|t| ToolDescriptor {
                output_schema: t.output_schema(),
                backend: Some(BackendKind::Local),
                ..ToolDescriptor::new(t.name(), t.description(), t.parameters_schema())
            })
            .collect();
        descriptors.sort_by(|a, b| a.name.cmp(&b.name));
        descriptors
    }

    /// Execute a tool call
    pub async fn execute(
        &self,
        call_id: &str,
        name: &str,
        args: serde_json::Value,
    ) -> Result<CallToolResult, ToolError> {
        let tool = self
            .tools
            .get(name)
            .ok_or_else(|| ToolError::NotFound(name.to_string()))?;
        debug!("Executing local tool: {name} (call_id: {call_id})");
        tool.execute(call_id, args).await
    }

    /// Returns the sorted list of registered tool names.
    pub fn tool_names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.tools.keys().map(|s| s.as_str()).collect();
        names.sort();
        names
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }
}

impl Default for LocalToolset {
    fn default() -> Self {
        Self::new()
    }
}
