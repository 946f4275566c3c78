use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::tool::{ContentPart, ToolCall};

/// Unique identifier for a conversation session
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SessionId(pub String);

impl SessionId {
    /// Creates a new random session identifier.
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    /// Returns the raw session identifier string.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for SessionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for SessionId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for SessionId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Message role in a conversation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// Message authored by an end user.
    User,
    /// Message authored by the assistant.
    Assistant,
    /// System-level instruction message.
    System,
    /// Tool execution result message.
    Tool,
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Role::User => write!(f, "user"),
            Role::Assistant => write!(f, "assistant"),
            Role::System => write!(f, "system"),
            Role::Tool => write!(f, "tool"),
        }
    }
}

impl std::str::FromStr for Role {
    type Err = crate::error::ProtoError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "user" => Ok(Role::User),
            "assistant" => Ok(Role::Assistant),
            "system" => Ok(Role::System),
            "tool" => Ok(Role::Tool),
            other => Err(crate::error::ProtoError::InvalidRole(other.to_string())),
        }
    }
}

/// Message body: plain text or an ordered list of content parts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MessageContent {
    /// Plain text body.
    Text(String),
    /// Multi-part body (resources, images, text segments).
    Parts(Vec<ContentPart>),
}

impl MessageContent {
    /// Concatenated text of the body; non-text parts are skipped.
    pub fn text(&self) -> String {
        match self {
            MessageContent::Text(text) => text.clone(),
            MessageContent::Parts(parts) => parts
                .iter()
                .filter_map(ContentPart::as_text)
                .collect::<Vec<_>>()
                .join("\n"),
        }
    }

    /// Returns `true` for an empty text body or an empty part list.
    pub fn is_empty(&self) -> bool {
        match self {
            MessageContent::Text(text) => text.is_empty(),
            MessageContent::Parts(parts) => parts.is_empty(),
        }
    }
}

impl Default for MessageContent {
    fn default() -> Self {
        MessageContent::Text(String::new())
    }
}

impl From<String> for MessageContent {
    fn from(s: String) -> Self {
        MessageContent::Text(s)
    }
}

impl From<&str> for MessageContent {
    fn from(s: &str) -> Self {
        MessageContent::Text(s.to_string())
    }
}

/// A message in a conversation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    /// Unique message id.
    pub id: String,
    /// Session that owns this message.
    pub session_id: SessionId,
    /// Semantic role of this message.
    pub role: Role,
    /// Message content payload.
    #[serde(default)]
    pub content: MessageContent,
    /// Assistant tool calls when role is `Assistant`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_calls: Option<Vec<ToolCall>>,
    /// Tool call id when role is `Tool`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
    /// Tool name when role is `Tool`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_name: Option<String>,
    /// Still being generated by the assistant layer.
    #[serde(default)]
    pub streaming: bool,
    /// Message creation timestamp in UTC.
    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,
}

impl ChatMessage {
    /// Creates a regular conversation message for the given session/role.
    pub fn new(session_id: SessionId, role: Role, content: impl Into<MessageContent>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            session_id,
            role,
            content: content.into(),
            tool_calls: None,
            tool_call_id: None,
            tool_name: None,
            streaming: false,
            created_at: Utc::now(),
        }
    }

    /// Creates an assistant message containing tool calls.
    pub fn assistant_tool_calls(session_id: SessionId, tool_calls: Vec<ToolCall>) -> Self {
        Self {
            tool_calls: Some(tool_calls),
            ..Self::new(session_id, Role::Assistant, String::new())
        }
    }

    /// Creates a tool result message for the given tool call.
    pub fn tool_result(
        session_id: SessionId,
        tool_call_id: impl Into<String>,
        tool_name: impl Into<String>,
        content: impl Into<MessageContent>,
    ) -> Self {
        Self {
            tool_call_id: Some(tool_call_id.into()),
            tool_name: Some(tool_name.into()),
            ..Self::new(session_id, Role::Tool, content)
        }
    }

    /// Tool calls carried by this message, empty when none.
    pub fn pending_tool_calls(&self) -> &[ToolCall] {
        self.tool_calls.as_deref().unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use std::str::FromStr;

    use super::*;
    use crate::ProtoError;

    #[test]
    fn session_id_new_creates_non_empty_value() {
        let session = SessionId::new();
        assert!(!session.as_str().is_empty());
    }

    #[test]
    fn role_display_and_parse_agree() {
        let roles = [Role::User, Role::Assistant, Role::System, Role::Tool];
        for role in roles {
            let rendered = role.to_string();
            let parsed = Role::from_str(&rendered).expect("role should parse");
            assert_eq!(parsed, role);
        }
    }

    #[test]
    fn role_parse_invalid_value_returns_error() {
        let err = Role::from_str("owner").expect_err("invalid role should fail");
        match err {
            ProtoError::InvalidRole(value) => assert_eq!(value, "owner"),
            other => panic!("unexpected error variant: {other}"),
        }
    }

    #[test]
    fn chat_message_new_sets_common_fields() {
        let session = SessionId::from("session-1");
        let msg = ChatMessage::new(session.clone(), Role::User, "hello");

        assert!(!msg.id.is_empty());
        assert_eq!(msg.session_id, session);
        assert_eq!(msg.role, Role::User);
        assert_eq!(msg.content, MessageContent::Text("hello".to_string()));
        assert_eq!(msg.tool_call_id, None);
        assert_eq!(msg.tool_calls, None);
        assert!(!msg.streaming);
    }

    #[test]
    fn tool_result_sets_tool_metadata() {
        let session = SessionId::from("session-2");
        let msg = ChatMessage::tool_result(session.clone(), "call-1", "readFile", "ok");

        assert_eq!(msg.role, Role::Tool);
        assert_eq!(msg.content.text(), "ok");
        assert_eq!(msg.tool_call_id.as_deref(), Some("call-1"));
        assert_eq!(msg.tool_name.as_deref(), Some("readFile"));
    }

    #[test]
    fn assistant_tool_calls_exposes_pending_calls() {
        let session = SessionId::from("session-3");
        let calls = vec![ToolCall::new("c1", "readFile", r#"{"path":"a.txt"}"#)];
        let msg = ChatMessage::assistant_tool_calls(session, calls.clone());

        assert_eq!(msg.role, Role::Assistant);
        assert!(msg.content.is_empty());
        assert_eq!(msg.pending_tool_calls(), calls.as_slice());

        let plain = ChatMessage::new(SessionId::from("s"), Role::Assistant, "hi");
        assert!(plain.pending_tool_calls().is_empty());
    }

    #[test]
    fn parts_content_joins_text_segments() {
        let content = MessageContent::Parts(vec![
            ContentPart::text("first"),
            ContentPart::Image {
                data: "AAAA".to_string(),
                mime_type: "image/png".to_string(),
            },
            ContentPart::text("second"),
        ]);
        assert_eq!(content.text(), "first\nsecond");
    }

    #[test]
    fn deserializes_minimal_transcript_entry() {
        let raw = r#"{
            "id": "m1",
            "session_id": "s1",
            "role": "assistant",
            "tool_calls": [{"id": "c1", "name": "readFile", "arguments": "{}"}]
        }"#;
        let msg: ChatMessage = serde_json::from_str(raw).expect("message should parse");
        assert_eq!(msg.role, Role::Assistant);
        assert!(msg.content.is_empty());
        assert!(!msg.streaming);
        assert_eq!(msg.pending_tool_calls().len(), 1);
    }
}
