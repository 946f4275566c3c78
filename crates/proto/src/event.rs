use crate::message::SessionId;

/// Real-time progress events emitted while a tool-call batch runs.
///
/// Sent via `tokio::sync::mpsc` from the orchestrator so that consumers
/// can display live tool-call status. Sending never blocks the batch.
#[derive(Debug, Clone)]
pub enum ProgressEvent {
    /// A tool call has been dispatched but has not yet completed.
    ToolCallStarted {
        session_id: SessionId,
        call_id: String,
        tool_name: String,
        args: serde_json::Value,
    },
    /// A tool call has finished executing.
    ToolCallFinished {
        session_id: SessionId,
        call_id: String,
        tool_name: String,
        output: String,
        is_error: bool,
        execution_time_ms: u64,
    },
}

impl ProgressEvent {
    /// Tool call id the event refers to.
    pub fn call_id(&self) -> &str {
        match self {
            ProgressEvent::ToolCallStarted { call_id, .. }
            | ProgressEvent::ToolCallFinished { call_id, .. } => call_id,
        }
    }
}
