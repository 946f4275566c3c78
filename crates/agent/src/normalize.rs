//! Coerces every backend's result shape into one `ToolResult`.

use proto::{CallToolResult, ContentPart, ToolResult, codes};
use serde_json::Value;

/// What a backend handed back, before normalization.
#[derive(Debug, Clone)]
pub enum RawOutcome {
    /// Raw JSON from the worker.
    Json(Value),
    /// Raw result string from the host.
    Text(String),
    /// Typed result from a local tool.
    Call(CallToolResult),
    /// Protocol or transport failure.
    Failed {
        code: i32,
        message: String,
        data: Option<Value>,
    },
}

impl RawOutcome {
    pub fn failed(code: i32, message: impl Into<String>) -> Self {
        RawOutcome::Failed {
            code,
            message: message.into(),
            data: None,
        }
    }
}

/// Builds the normalized envelope for `call_id`.
pub fn normalize(call_id: &str, outcome: RawOutcome, execution_time_ms: u64) -> ToolResult {
    match outcome {
        RawOutcome::Failed {
            code,
            message,
            data,
        } => ToolResult::failure(call_id, code, message, data, execution_time_ms),
        RawOutcome::Call(result) => from_call_result(call_id, result, execution_time_ms),
        RawOutcome::Json(value) => from_json(call_id, value, execution_time_ms),
        RawOutcome::Text(text) => match serde_json::from_str::<Value>(&text) {
            Ok(value @ (Value::Object(_) | Value::Array(_))) => {
                from_json(call_id, value, execution_time_ms)
            }
            _ => ToolResult::success(call_id, vec![ContentPart::text(text)], None, execution_time_ms),
        },
    }
}

fn from_call_result(call_id: &str, result: CallToolResult, execution_time_ms: u64) -> ToolResult {
    if result.is_error == Some(true) {
        let message = result
            .content
            .iter()
            .find_map(ContentPart::as_text)
            .map(str::to_string)
            .unwrap_or_else(|| "Tool reported an error".to_string());
        return ToolResult::failure(
            call_id,
            codes::TOOL_EXECUTION_ERROR,
            message,
            result.structured_content,
            execution_time_ms,
        );
    }
    ToolResult::success(
        call_id,
        result.content,
        result.structured_content,
        execution_time_ms,
    )
}

fn from_json(call_id: &str, value: Value, execution_time_ms: u64) -> ToolResult {
    match value {
        Value::Null => ToolResult::success(call_id, Vec::new(), None, execution_time_ms),
        Value::String(text) => {
            ToolResult::success(call_id, vec![ContentPart::text(text)], None, execution_time_ms)
        }
        Value::Object(ref map) if is_rpc_envelope(map) => {
            from_rpc_envelope(call_id, value, execution_time_ms)
        }
        Value::Object(ref map) if is_call_tool_result(map) => {
            match serde_json::from_value::<CallToolResult>(value.clone()) {
                Ok(result) => from_call_result(call_id, result, execution_time_ms),
                Err(_) => as_serialized_text(call_id, &value, execution_time_ms),
            }
        }
        other => as_serialized_text(call_id, &other, execution_time_ms),
    }
}

fn is_rpc_envelope(map: &serde_json::Map<String, Value>) -> bool {
    map.contains_key("jsonrpc")
        || (map.contains_key("error") && !map.contains_key("content"))
        || (map.contains_key("result") && !map.contains_key("content"))
}

fn is_call_tool_result(map: &serde_json::Map<String, Value>) -> bool {
    map.get("content").is_some_and(Value::is_array)
        || map.contains_key("structuredContent")
        || map.contains_key("isError")
}

fn from_rpc_envelope(call_id: &str, value: Value, execution_time_ms: u64) -> ToolResult {
    let Value::Object(mut map) = value else {
        return ToolResult::failure(
            call_id,
            codes::INTERNAL_ERROR,
            "malformed response envelope",
            None,
            execution_time_ms,
        );
    };

    if let Some(error) = map.remove("error").filter(|e| !e.is_null()) {
        let code = error
            .get("code")
            .and_then(Value::as_i64)
            .and_then(|c| i32::try_from(c).ok())
            .unwrap_or(codes::INTERNAL_ERROR);
        let message = match error.get("message").and_then(Value::as_str) {
            Some(message) => message.to_string(),
            None => error.to_string(),
        };
        let data = error.get("data").cloned();
        return ToolResult::failure(call_id, code, message, data, execution_time_ms);
    }

    from_json(
        call_id,
        map.remove("result").unwrap_or(Value::Null),
        execution_time_ms,
    )
}

fn as_serialized_text(call_id: &str, value: &Value, execution_time_ms: u64) -> ToolResult {
    ToolResult::success(
        call_id,
        vec![ContentPart::text(value.to_string())],
        None,
        execution_time_ms,
    )
}
