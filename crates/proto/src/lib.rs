//! Shared protocol types for the tool router, worker proxy, host bridge and search.
//!
//! This crate defines serializable message/tool/wire structures and
//! strongly-typed error enums shared across the workspace.

pub mod error;
pub mod event;
pub mod message;
pub mod rpc;
pub mod tool;

/// Re-export of all protocol error types.
pub use error::*;
/// Re-export of progress event types.
pub use event::ProgressEvent;
/// Re-export of conversation/message identity types.
pub use message::{ChatMessage, MessageContent, Role, SessionId};
/// Re-export of worker wire messages.
pub use rpc::{WorkerErrorBody, WorkerFrame, WorkerReply, WorkerRequest};
/// Re-export of tool call, catalog and result envelope types.
pub use tool::{
    BackendKind, CallToolResult, ContentPart, EmbeddedResource, JSONRPC_VERSION, ToolCall,
    ToolDescriptor, ToolFailure, ToolResponse, ToolResult, UI_RESOURCE_SCHEME,
};
