//! Wire messages exchanged with the worker sandbox.
//!
//! Each request is one JSON object `{id, type, ...payload}`; each reply
//! carries the same `id` and either a `result` or an `error`.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::RpcError;

/// Request payload, tagged by `type`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum WorkerRequest {
    #[serde(rename = "listTools")]
    ListTools {
        #[serde(rename = "serverName", default, skip_serializing_if = "Option::is_none")]
        server_name: Option<String>,
    },
    #[serde(rename = "callTool")]
    CallTool {
        #[serde(rename = "serverName", default, skip_serializing_if = "Option::is_none")]
        server_name: Option<String>,
        #[serde(rename = "toolName")]
        tool_name: String,
        #[serde(default)]
        args: Value,
    },
    #[serde(rename = "ping")]
    Ping,
    #[serde(rename = "loadServer")]
    LoadServer {
        #[serde(rename = "serverName")]
        server_name: String,
    },
    #[serde(rename = "sampleText")]
    SampleText {
        #[serde(rename = "serverName", default, skip_serializing_if = "Option::is_none")]
        server_name: Option<String>,
        #[serde(default)]
        args: Value,
    },
    #[serde(rename = "getServiceContext")]
    GetServiceContext {
        #[serde(rename = "serverName", default, skip_serializing_if = "Option::is_none")]
        server_name: Option<String>,
    },
    #[serde(rename = "setContext")]
    SetContext {
        #[serde(rename = "serverName", default, skip_serializing_if = "Option::is_none")]
        server_name: Option<String>,
        #[serde(default)]
        args: Value,
    },
    #[serde(rename = "switchContext")]
    SwitchContext {
        #[serde(rename = "serverName", default, skip_serializing_if = "Option::is_none")]
        server_name: Option<String>,
        #[serde(default)]
        args: Value,
    },
}

impl WorkerRequest {
    /// Wire `type` string of this request.
    pub fn kind(&self) -> &'static str {
        match self {
            WorkerRequest::ListTools { .. } => "listTools",
            WorkerRequest::CallTool { .. } => "callTool",
            WorkerRequest::Ping => "ping",
            WorkerRequest::LoadServer { .. } => "loadServer",
            WorkerRequest::SampleText { .. } => "sampleText",
            WorkerRequest::GetServiceContext { .. } => "getServiceContext",
            WorkerRequest::SetContext { .. } => "setContext",
            WorkerRequest::SwitchContext { .. } => "switchContext",
        }
    }
}

/// One correlated request frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkerFrame {
    /// Correlation id, unique while outstanding.
    pub id: String,
    #[serde(flatten)]
    pub request: WorkerRequest,
}

/// Error body of a worker reply.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkerErrorBody {
    pub code: i32,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    /// Worker's hint that re-issuing the request may succeed.
    #[serde(default)]
    pub retryable: bool,
}

/// A reply from the worker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkerReply {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<WorkerErrorBody>,
}

impl WorkerReply {
    /// Successful reply.
    pub fn ok(id: impl Into<String>, result: Value) -> Self {
        Self {
            id: Some(id.into()),
            result: Some(result),
            error: None,
        }
    }

    /// Error reply.
    pub fn err(id: impl Into<String>, code: i32, message: impl Into<String>, retryable: bool) -> Self {
        Self {
            id: Some(id.into()),
            result: None,
            error: Some(WorkerErrorBody {
                code,
                message: message.into(),
                data: None,
                retryable,
            }),
        }
    }

    /// Converts the reply into the call outcome. A reply with neither field is `null`.
    pub fn into_outcome(self) -> Result<Value, RpcError> {
        match self.error {
            Some(err) => Err(RpcError::Remote {
                code: err.code,
                message: err.message,
                data: err.data,
                retryable: err.retryable,
            }),
            None => Ok(self.result.unwrap_or(Value::Null)),
        }
    }
}
