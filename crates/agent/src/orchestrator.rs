//! Detects outstanding tool calls in a conversation and answers each one exactly once.

use std::collections::HashMap;
use std::sync::Arc;

use futures_util::future::join_all;
use parking_lot::Mutex;
use proto::{
    ChatMessage, ContentPart, DatabaseError, MessageContent, ProgressEvent, Role, SessionId,
    ToolCall, ToolResult, codes,
};
use serde_json::{Value, json};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::memory::ConversationStore;
use crate::router::ToolRouter;

/// Default cap on text carried by a single tool-result message.
pub const DEFAULT_MAX_TOOL_RESULT_CHARS: usize = 16_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OrchestratorOptions {
    pub max_tool_result_chars: usize,
}

impl Default for OrchestratorOptions {
    fn default() -> Self {
        Self {
            max_tool_result_chars: DEFAULT_MAX_TOOL_RESULT_CHARS,
        }
    }
}

/// Turns assistant tool calls into tool-role messages.
pub struct ToolCallOrchestrator {
    router: Arc<ToolRouter>,
    store: Arc<dyn ConversationStore>,
    /// Last assistant message id handled per session.
    last_processed: Mutex<HashMap<SessionId, String>>,
    options: OrchestratorOptions,
    progress_tx: Option<mpsc::Sender<ProgressEvent>>,
}

impl ToolCallOrchestrator {
    pub fn new(
        router: Arc<ToolRouter>,
        store: Arc<dyn ConversationStore>,
        options: OrchestratorOptions,
    ) -> Self {
        Self {
            router,
            store,
            last_processed: Mutex::new(HashMap::new()),
            options,
            progress_tx: None,
        }
    }

    /// Emits `ToolCallStarted`/`ToolCallFinished` events on `tx`.
    pub fn with_progress(mut self, tx: mpsc::Sender<ProgressEvent>) -> Self {
        self.progress_tx = Some(tx);
        self
    }

    /// Forgets the processed marker of a session (e.g. when it is deleted).
    pub fn reset(&self, session_id: &SessionId) {
        self.last_processed.lock().remove(session_id);
    }

    /// Checks the trigger and sets the marker in one step.
    fn claim(&self, session_id: &SessionId, messages: &[ChatMessage]) -> Option<Vec<ToolCall>> {
        let last = messages.last()?;
        if last.role != Role::Assistant || last.streaming {
            return None;
        }
        let calls = last.pending_tool_calls();
        if !calls.iter().any(|c| !c.name.trim().is_empty()) {
            return None;
        }

        let mut markers = self.last_processed.lock();
        if markers.get(session_id) == Some(&last.id) {
            debug!(session_id = %session_id, message_id = %last.id, "Tool calls already processed");
            return None;
        }
        markers.insert(session_id.clone(), last.id.clone());
        Some(calls.to_vec())
    }

    /// Runs the pending batch of the latest assistant message, if any.
    ///
    /// Returns one tool-result message per call, in call order, or `None`
    /// when nothing needs to run.
    pub async fn on_messages(
        &self,
        session_id: &SessionId,
        messages: &[ChatMessage],
    ) -> Option<Vec<ChatMessage>> {
        let calls = self.claim(session_id, messages)?;
        info!(session_id = %session_id, calls = calls.len(), "Executing tool call batch");

        let outcomes = join_all(calls.iter().map(|call| self.run_call(session_id, call))).await;

        let failed = outcomes.iter().filter(|(_, ok)| !ok).count();
        info!(session_id = %session_id, total = outcomes.len(), failed, "Tool call batch finished");
        Some(outcomes.into_iter().map(|(message, _)| message).collect())
    }

    /// Loads a session, resolves its pending batch and appends the results.
    pub async fn process_session(
        &self,
        session_id: &SessionId,
    ) -> Result<Vec<ChatMessage>, DatabaseError> {
        let messages = self.store.load_session(session_id).await?;
        let Some(batch) = self.on_messages(session_id, &messages).await else {
            return Ok(Vec::new());
        };
        self.store.append_messages(session_id, &batch).await?;
        Ok(batch)
    }

    async fn run_call(&self, session_id: &SessionId, call: &ToolCall) -> (ChatMessage, bool) {
        self.emit(ProgressEvent::ToolCallStarted {
            session_id: session_id.clone(),
            call_id: call.id.clone(),
            tool_name: call.name.clone(),
            args: serde_json::from_str(&call.arguments)
                .unwrap_or_else(|_| Value::String(call.arguments.clone())),
        });

        let result = self.router.dispatch(call).await;
        let content = if result.success {
            self.success_content(&call.name, &result)
        } else {
            warn!(
                call_id = %call.id,
                tool = %call.name,
                code = result.error.as_ref().map(|e| e.code),
                "Tool call failed"
            );
            MessageContent::Text(failure_text(&call.name, &result))
        };

        self.emit(ProgressEvent::ToolCallFinished {
            session_id: session_id.clone(),
            call_id: call.id.clone(),
            tool_name: call.name.clone(),
            output: content.text(),
            is_error: !result.success,
            execution_time_ms: result.execution_time_ms,
        });

        (
            ChatMessage::tool_result(session_id.clone(), &call.id, &call.name, content),
            result.success,
        )
    }

    fn success_content(&self, tool_name: &str, result: &ToolResult) -> MessageContent {
        let max = self.options.max_tool_result_chars;
        let (ui, rest): (Vec<ContentPart>, Vec<ContentPart>) = result
            .content
            .iter()
            .cloned()
            .partition(ContentPart::is_ui_resource);

        if !ui.is_empty() {
            let summary = format!(
                "Tool '{tool_name}' returned {} interactive resource(s).",
                ui.len()
            );
            let mut parts = ui;
            parts.push(ContentPart::text(summary));
            return MessageContent::Parts(parts);
        }

        if rest.is_empty() {
            return match &result.structured_content {
                Some(structured) => {
                    MessageContent::Text(truncate_tool_result(&structured.to_string(), max))
                }
                None => MessageContent::Text(format!("Tool '{tool_name}' completed with no output.")),
            };
        }

        if rest.iter().all(|p| p.as_text().is_some()) {
            return MessageContent::Text(truncate_tool_result(&result.text(), max));
        }

        MessageContent::Parts(
            rest.into_iter()
                .map(|part| match part {
                    ContentPart::Text { text } => ContentPart::text(truncate_tool_result(&text, max)),
                    other => other,
                })
                .collect(),
        )
    }

    fn emit(&self, event: ProgressEvent) {
        if let Some(tx) = &self.progress_tx
            && let Err(e) = tx.try_send(event)
        {
            debug!("Dropped progress event: {e}");
        }
    }
}

/// Human-readable header followed by a JSON block for machine parsing.
fn failure_text(tool_name: &str, result: &ToolResult) -> String {
    let (code, message) = match &result.error {
        Some(error) => (error.code, error.message.clone()),
        None => (codes::INTERNAL_ERROR, "unknown tool failure".to_string()),
    };
    let payload = json!({
        "toolName": tool_name,
        "toolCallId": result.id,
        "error": message,
        "code": code,
        "timestamp": result.timestamp.to_rfc3339(),
        "executionTimeMs": result.execution_time_ms,
    });
    let block = serde_json::to_string_pretty(&payload).unwrap_or_else(|_| payload.to_string());
    format!("Tool call failed: {tool_name}\nError: {message}\n\n```json\n{block}\n```")
}

/// Truncates a tool result to at most `max_chars` characters.
/// If the result is longer, it appends a note with how many characters were cut.
pub fn truncate_tool_result(output: &str, max_chars: usize) -> String {
    let total_chars = output.chars().count();
    if total_chars <= max_chars {
        return output.to_string();
    }

    let kept = output.chars().take(max_chars).collect::<String>();
    let cut = total_chars - max_chars;
    format!("{kept}\n...[output truncated: {cut} chars omitted]")
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use async_trait::async_trait;
    use proto::{CallToolResult, EmbeddedResource, ToolError};
    use tools::{LocalToolset, Tool};

    use super::*;

    /// Sleeps for `delayMs`, then echoes `value`.
    struct SlowEcho;

    #[async_trait]
    impl Tool for SlowEcho {
        fn name(&self) -> &str {
            "slowEcho"
        }

        fn description(&self) -> &str {
            "Echo after a delay"
        }

        fn parameters_schema(&self) -> Value {
            json!({"type": "object"})
        }

        async fn execute(&self, _call_id: &str, args: Value) -> Result<CallToolResult, ToolError> {
            let delay = args["delayMs"].as_u64().unwrap_or(0);
            tokio::time::sleep(Duration::from_millis(delay)).await;
            Ok(CallToolResult::text(args["value"].as_str().unwrap_or_default()))
        }
    }

    struct Chart;

    #[async_trait]
    impl Tool for Chart {
        fn name(&self) -> &str {
            "chart"
        }

        fn description(&self) -> &str {
            "Renders a chart"
        }

        fn parameters_schema(&self) -> Value {
            json!({"type": "object"})
        }

        async fn execute(&self, _call_id: &str, _args: Value) -> Result<CallToolResult, ToolError> {
            Ok(CallToolResult {
                content: vec![
                    ContentPart::Resource {
                        resource: EmbeddedResource {
                            uri: "ui://chart/42".to_string(),
                            mime_type: Some("text/html".to_string()),
                            text: Some("<svg>big</svg>".to_string()),
                            blob: None,
                        },
                    },
                    ContentPart::text("<svg>big</svg>"),
                ],
                ..CallToolResult::default()
            })
        }
    }

    #[derive(Default)]
    struct MemoryStore {
        messages: Mutex<Vec<ChatMessage>>,
        appends: Mutex<usize>,
    }

    #[async_trait]
    impl ConversationStore for MemoryStore {
        async fn load_session(&self, session_id: &SessionId) -> Result<Vec<ChatMessage>, DatabaseError> {
            Ok(self
                .messages
                .lock()
                .iter()
                .filter(|m| &m.session_id == session_id)
                .cloned()
                .collect())
        }

        async fn append_messages(
            &self,
            _session_id: &SessionId,
            messages: &[ChatMessage],
        ) -> Result<(), DatabaseError> {
            *self.appends.lock() += 1;
            self.messages.lock().extend_from_slice(messages);
            Ok(())
        }
    }

    fn orchestrator(store: Arc<MemoryStore>, options: OrchestratorOptions) -> ToolCallOrchestrator {
        let mut toolset = LocalToolset::new();
        toolset.register(SlowEcho);
        toolset.register(Chart);
        let router = Arc::new(ToolRouter::new());
        router.register_local(Arc::new(toolset));
        ToolCallOrchestrator::new(router, store, options)
    }

    fn session() -> SessionId {
        SessionId::from("session-1")
    }

    fn assistant(calls: Vec<ToolCall>) -> ChatMessage {
        ChatMessage::assistant_tool_calls(session(), calls)
    }

    fn echo(id: &str, value: &str, delay_ms: u64) -> ToolCall {
        ToolCall::new(
            id,
            "slowEcho",
            json!({"value": value, "delayMs": delay_ms}).to_string(),
        )
    }

    #[tokio::test(start_paused = true)]
    async fn results_keep_call_order_despite_completion_order() {
        let orch = orchestrator(Arc::default(), OrchestratorOptions::default());
        let msg = assistant(vec![
            echo("c1", "first", 300),
            echo("c2", "second", 10),
            echo("c3", "third", 100),
        ]);

        let out = orch.on_messages(&session(), &[msg]).await.expect("batch");
        let ids: Vec<_> = out.iter().map(|m| m.tool_call_id.as_deref()).collect();
        assert_eq!(ids, vec![Some("c1"), Some("c2"), Some("c3")]);
        assert_eq!(out[0].content.text(), "first");
        assert!(out.iter().all(|m| m.role == Role::Tool));
    }

    #[tokio::test]
    async fn same_message_is_processed_at_most_once() {
        let orch = orchestrator(Arc::default(), OrchestratorOptions::default());
        let msg = assistant(vec![echo("c1", "x", 0)]);

        assert!(orch.on_messages(&session(), &[msg.clone()]).await.is_some());
        assert!(orch.on_messages(&session(), &[msg.clone()]).await.is_none());

        orch.reset(&session());
        assert!(orch.on_messages(&session(), &[msg]).await.is_some());
    }

    #[tokio::test]
    async fn ignores_messages_that_do_not_trigger() {
        let orch = orchestrator(Arc::default(), OrchestratorOptions::default());
        let user = ChatMessage::new(session(), Role::User, "hi");
        assert!(orch.on_messages(&session(), &[user]).await.is_none());
        assert!(orch.on_messages(&session(), &[]).await.is_none());

        let mut streaming = assistant(vec![echo("c1", "x", 0)]);
        streaming.streaming = true;
        assert!(orch.on_messages(&session(), &[streaming]).await.is_none());

        let blank = assistant(vec![ToolCall::new("c1", "  ", "{}")]);
        assert!(orch.on_messages(&session(), &[blank]).await.is_none());

        let plain = ChatMessage::new(session(), Role::Assistant, "done");
        assert!(orch.on_messages(&session(), &[plain]).await.is_none());
    }

    #[tokio::test]
    async fn failures_do_not_abort_the_batch() {
        let orch = orchestrator(Arc::default(), OrchestratorOptions::default());
        let msg = assistant(vec![
            ToolCall::new("c1", "unknownTool", "{}"),
            echo("c2", "still runs", 0),
        ]);

        let out = orch.on_messages(&session(), &[msg]).await.expect("batch");
        assert_eq!(out.len(), 2);

        let failure = out[0].content.text();
        assert!(failure.starts_with("Tool call failed: unknownTool"));
        assert!(failure.contains("\"code\": -32601"));
        assert!(failure.contains("\"toolCallId\": \"c1\""));
        assert!(failure.contains("executionTimeMs"));
        assert_eq!(out[1].content.text(), "still runs");
    }

    #[tokio::test]
    async fn ui_resources_are_sent_once_with_a_summary() {
        let orch = orchestrator(Arc::default(), OrchestratorOptions::default());
        let msg = assistant(vec![ToolCall::new("c1", "chart", "{}")]);

        let out = orch.on_messages(&session(), &[msg]).await.expect("batch");
        let MessageContent::Parts(parts) = &out[0].content else {
            panic!("expected multipart content");
        };
        assert_eq!(parts.len(), 2);
        assert!(parts[0].is_ui_resource());
        assert_eq!(
            parts[1].as_text(),
            Some("Tool 'chart' returned 1 interactive resource(s).")
        );
    }

    #[tokio::test]
    async fn long_text_is_truncated() {
        let orch = orchestrator(
            Arc::default(),
            OrchestratorOptions {
                max_tool_result_chars: 4,
            },
        );
        let msg = assistant(vec![echo("c1", "abcdefgh", 0)]);
        let out = orch.on_messages(&session(), &[msg]).await.expect("batch");
        assert_eq!(
            out[0].content.text(),
            "abcd\n...[output truncated: 4 chars omitted]"
        );
    }

    #[tokio::test]
    async fn progress_events_bracket_each_call() {
        let (tx, mut rx) = mpsc::channel(8);
        let orch = orchestrator(Arc::default(), OrchestratorOptions::default()).with_progress(tx);
        let msg = assistant(vec![echo("c1", "x", 0)]);
        orch.on_messages(&session(), &[msg]).await.expect("batch");

        let started = rx.recv().await.expect("started");
        assert!(matches!(started, ProgressEvent::ToolCallStarted { ref args, .. } if args["value"] == "x"));
        let finished = rx.recv().await.expect("finished");
        assert!(matches!(
            finished,
            ProgressEvent::ToolCallFinished { is_error: false, ref output, .. } if output == "x"
        ));
        assert_eq!(finished.call_id(), "c1");
    }

    #[tokio::test]
    async fn process_session_appends_batch_once() {
        let store = Arc::new(MemoryStore::default());
        store.messages.lock().push(ChatMessage::new(session(), Role::User, "go"));
        store
            .messages
            .lock()
            .push(assistant(vec![echo("c1", "a", 0), echo("c2", "b", 0)]));
        let orch = orchestrator(store.clone(), OrchestratorOptions::default());

        let appended = orch.process_session(&session()).await.expect("process");
        assert_eq!(appended.len(), 2);
        assert_eq!(*store.appends.lock(), 1);
        assert_eq!(store.messages.lock().len(), 4);

        // The tool-result messages are now last, so nothing re-triggers.
        assert!(orch.process_session(&session()).await.expect("again").is_empty());
        assert_eq!(*store.appends.lock(), 1);
    }

    #[test]
    fn truncate_tool_result_multibyte_is_utf8_safe() {
        let input = "가나다라마";
        let result = truncate_tool_result(input, 3);
        assert!(result.starts_with("가나다"));
        assert!(result.contains("2 chars omitted"));
    }

    #[test]
    fn truncate_tool_result_empty_input() {
        assert_eq!(truncate_tool_result("", 100), "");
    }

    #[test]
    fn truncate_tool_result_zero_limit() {
        let result = truncate_tool_result("hello", 0);
        assert!(result.contains("output truncated"));
        assert!(result.contains("5 chars omitted"));
    }
}
