use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::codes;

/// A tool invocation requested by the assistant
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolCall {
    /// Tool call id assigned by the assistant layer.
    pub id: String,
    /// Name of the tool to invoke.
    pub name: String,
    /// Raw JSON arguments; empty means `{}`.
    #[serde(default)]
    pub arguments: String,
}

impl ToolCall {
    /// Creates a tool call with raw JSON arguments.
    pub fn new(id: impl Into<String>, name: impl Into<String>, arguments: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            arguments: arguments.into(),
        }
    }
}

/// Where a tool executes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    /// Isolated worker sandbox reached over the RPC proxy.
    Worker,
    /// Native host process reached through the polling bridge.
    Host,
    /// In-process function.
    Local,
}

impl BackendKind {
    /// Collision precedence: a higher rank wins a shared tool name.
    pub fn precedence(self) -> u8 {
        match self {
            BackendKind::Worker => 0,
            BackendKind::Host => 1,
            BackendKind::Local => 2,
        }
    }
}

impl std::fmt::Display for BackendKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BackendKind::Worker => write!(f, "worker"),
            BackendKind::Host => write!(f, "host"),
            BackendKind::Local => write!(f, "local"),
        }
    }
}

/// Tool catalog entry as published by a backend
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolDescriptor {
    /// Tool name, unique within the merged namespace.
    pub name: String,
    /// Optional display title.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    /// Description for tool selection.
    #[serde(default)]
    pub description: String,
    /// JSON schema for accepted arguments.
    #[serde(default = "empty_object_schema")]
    pub input_schema: Value,
    /// JSON schema for `structuredContent`, when the tool declares one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_schema: Option<Value>,
    /// Free-form behavioural hints.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub annotations: Option<Value>,
    /// Owning backend, stamped by the router on merge.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub backend: Option<BackendKind>,
}

fn empty_object_schema() -> Value {
    serde_json::json!({ "type": "object", "properties": {} })
}

impl ToolDescriptor {
    /// Creates a catalog entry with name, description and input schema.
    pub fn new(name: impl Into<String>, description: impl Into<String>, input_schema: Value) -> Self {
        Self {
            name: name.into(),
            title: None,
            description: description.into(),
            input_schema,
            output_schema: None,
            annotations: None,
            backend: None,
        }
    }
}

/// Resource embedded in a content part.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EmbeddedResource {
    pub uri: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mime_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub blob: Option<String>,
}

/// URI scheme prefix identifying interactive UI resources.
pub const UI_RESOURCE_SCHEME: &str = "ui://";

/// One element of a tool result's ordered content.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentPart {
    Text {
        text: String,
    },
    Image {
        data: String,
        #[serde(rename = "mimeType")]
        mime_type: String,
    },
    Audio {
        data: String,
        #[serde(rename = "mimeType")]
        mime_type: String,
    },
    Resource {
        resource: EmbeddedResource,
    },
    ResourceLink {
        uri: String,
        name: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        description: Option<String>,
        #[serde(rename = "mimeType", default, skip_serializing_if = "Option::is_none")]
        mime_type: Option<String>,
    },
}

impl ContentPart {
    /// Creates a text part.
    pub fn text(text: impl Into<String>) -> Self {
        ContentPart::Text { text: text.into() }
    }

    /// Text of a text part, `None` for everything else.
    pub fn as_text(&self) -> Option<&str> {
        match self {
            ContentPart::Text { text } => Some(text),
            _ => None,
        }
    }

    /// Returns `true` for embedded resources addressed by a `ui://` URI.
    pub fn is_ui_resource(&self) -> bool {
        matches!(self, ContentPart::Resource { resource } if resource.uri.starts_with(UI_RESOURCE_SCHEME))
    }
}

/// MCP-style tool success payload.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CallToolResult {
    #[serde(default)]
    pub content: Vec<ContentPart>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub structured_content: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_error: Option<bool>,
}

impl CallToolResult {
    /// A single text part.
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            content: vec![ContentPart::text(text)],
            ..Self::default()
        }
    }

    /// A text summary alongside machine-readable structured content.
    pub fn with_structured(text: impl Into<String>, structured: Value) -> Self {
        Self {
            content: vec![ContentPart::text(text)],
            structured_content: Some(structured),
            is_error: None,
        }
    }

    /// A tool-level logical failure.
    pub fn error(text: impl Into<String>) -> Self {
        Self {
            content: vec![ContentPart::text(text)],
            structured_content: None,
            is_error: Some(true),
        }
    }
}

/// Error payload of a failed tool result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolFailure {
    pub code: i32,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

/// Normalized result of a tool execution, whatever backend produced it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolResult {
    /// The originating tool call id.
    pub id: String,
    /// Whether the call succeeded.
    pub success: bool,
    /// Ordered content parts.
    #[serde(default)]
    pub content: Vec<ContentPart>,
    /// Machine-readable payload, when the tool returned one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub structured_content: Option<Value>,
    /// Populated exactly when `success` is false.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ToolFailure>,
    /// Wall-clock execution time in milliseconds.
    pub execution_time_ms: u64,
    /// Completion timestamp in UTC.
    pub timestamp: DateTime<Utc>,
}

impl ToolResult {
    /// Creates a successful result.
    pub fn success(
        id: impl Into<String>,
        content: Vec<ContentPart>,
        structured_content: Option<Value>,
        execution_time_ms: u64,
    ) -> Self {
        Self {
            id: id.into(),
            success: true,
            content,
            structured_content,
            error: None,
            execution_time_ms,
            timestamp: Utc::now(),
        }
    }

    /// Creates a failed result with the given code and message.
    pub fn failure(
        id: impl Into<String>,
        code: i32,
        message: impl Into<String>,
        data: Option<Value>,
        execution_time_ms: u64,
    ) -> Self {
        Self {
            id: id.into(),
            success: false,
            content: Vec::new(),
            structured_content: None,
            error: Some(ToolFailure {
                code,
                message: message.into(),
                data,
            }),
            execution_time_ms,
            timestamp: Utc::now(),
        }
    }

    /// Concatenated text parts.
    pub fn text(&self) -> String {
        self.content
            .iter()
            .filter_map(ContentPart::as_text)
            .collect::<Vec<_>>()
            .join("\n")
    }

    /// Renders the JSON-RPC 2.0 response envelope.
    pub fn to_response(&self) -> ToolResponse {
        if self.success {
            ToolResponse {
                jsonrpc: JSONRPC_VERSION.to_string(),
                id: self.id.clone(),
                result: Some(CallToolResult {
                    content: self.content.clone(),
                    structured_content: self.structured_content.clone(),
                    is_error: None,
                }),
                error: None,
            }
        } else {
            let error = self.error.clone().unwrap_or(ToolFailure {
                code: codes::INTERNAL_ERROR,
                message: "unknown tool failure".to_string(),
                data: None,
            });
            ToolResponse {
                jsonrpc: JSONRPC_VERSION.to_string(),
                id: self.id.clone(),
                result: None,
                error: Some(error),
            }
        }
    }
}

pub const JSONRPC_VERSION: &str = "2.0";

/// JSON-RPC 2.0 shaped tool response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolResponse {
    pub jsonrpc: String,
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<CallToolResult>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ToolFailure>,
}
