//! In-process (local) tools and the toolset that publishes them.
//!
//! The router treats a `LocalToolset` as one backend; built-in content-store
//! tools expose the shared search engine to the assistant.

pub mod content;
pub mod registry;

pub use content::{AddContentTool, DeleteContentTool, KeywordSearchTool, content_tools};
pub use registry::LocalToolset;

use async_trait::async_trait;
use proto::{CallToolResult, ToolError};

/// Trait that all local tools must implement
#[async_trait]
pub trait Tool: Send + Sync {
    /// Unique tool name exposed to the assistant.
    fn name(&self) -> &str;
    /// Human-readable description for tool selection.
    fn description(&self) -> &str;
    /// JSON schema for accepted tool arguments.
    fn parameters_schema(&self) -> serde_json::Value;
    /// JSON schema for `structuredContent`, if the tool returns any.
    fn output_schema(&self) -> Option<serde_json::Value> {
        None
    }
    /// Executes the tool with the given call id and JSON args.
    ///
    /// `Err` is a protocol-level failure (bad arguments, internal error); a
    /// logical failure is `Ok` with `is_error: Some(true)`.
    async fn execute(&self, call_id: &str, args: serde_json::Value) -> Result<CallToolResult, ToolError>;
}
