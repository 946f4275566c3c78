use async_trait::async_trait;
use proto::{ChatMessage, DatabaseError, MessageContent, Role, SessionId};
use sqlx::{
    Row,
    sqlite::{SqlitePool, SqliteRow},
};
use std::str::FromStr;
use tracing::{debug, info};

/// Conversation persistence consumed by the orchestrator.
#[async_trait]
pub trait ConversationStore: Send + Sync {
    /// All messages of a session, oldest first.
    async fn load_session(&self, session_id: &SessionId) -> Result<Vec<ChatMessage>, DatabaseError>;

    /// Appends a batch of messages to a session in one unit.
    async fn append_messages(
        &self,
        session_id: &SessionId,
        messages: &[ChatMessage],
    ) -> Result<(), DatabaseError>;
}

const FORMAT_TEXT: &str = "text";
const FORMAT_PARTS: &str = "parts";

/// SQLite-backed conversation store
pub struct SqliteConversationStore {
    pool: SqlitePool,
}

impl SqliteConversationStore {
    /// Open (or create) the SQLite database and run migrations
    pub async fn open(db_url: &str) -> Result<Self, DatabaseError> {
        // Expand ~ in path
        let url = if db_url.starts_with('~') {
            let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
            db_url.replacen('~', &home, 1)
        } else {
            db_url.to_string()
        };

        if let Some(parent) = std::path::Path::new(&url).parent()
            && !parent.as_os_str().is_empty()
        {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| DatabaseError::Sqlx(e.to_string()))?;
        }

        let pool = SqlitePool::connect(&format!("sqlite:{url}?mode=rwc"))
            .await
            .map_err(|e| DatabaseError::Sqlx(e.to_string()))?;

        let migrations_dir =
            std::path::Path::new(env!("CARGO_MANIFEST_DIR")).join("../../migrations");
        let migrator = sqlx::migrate::Migrator::new(migrations_dir.as_path())
            .await
            .map_err(|e| DatabaseError::Migration(e.to_string()))?;

        migrator
            .run(&pool)
            .await
            .map_err(|e| DatabaseError::Migration(e.to_string()))?;

        info!("Conversation store opened: {url}");
        Ok(Self { pool })
    }

    /// Ensure a session exists (create if not)
    pub async fn ensure_session(&self, session_id: &SessionId) -> Result<(), DatabaseError> {
        let now = chrono::Utc::now().to_rfc3339();
        sqlx::query("INSERT OR IGNORE INTO sessions (id, created_at, updated_at) VALUES (?, ?, ?)")
            .bind(session_id.as_str())
            .bind(&now)
            .bind(&now)
            .execute(&self.pool)
            .await
            .map_err(|e| DatabaseError::Sqlx(e.to_string()))?;
        Ok(())
    }

    /// Save a single message, replacing an earlier version with the same id
    pub async fn save_message(&self, msg: &ChatMessage) -> Result<(), DatabaseError> {
        self.append_messages(&msg.session_id, std::slice::from_ref(msg))
            .await
    }

    /// Session ids ordered by most recent activity
    pub async fn list_sessions(&self) -> Result<Vec<SessionId>, DatabaseError> {
        let rows = sqlx::query("SELECT id FROM sessions ORDER BY updated_at DESC, id ASC")
            .fetch_all(&self.pool)
            .await
            .map_err(|e| DatabaseError::Sqlx(e.to_string()))?;
        Ok(rows
            .into_iter()
            .map(|row| SessionId::from(row.get::<String, _>("id")))
            .collect())
    }

    /// Delete a session and all of its messages
    pub async fn delete_session(&self, session_id: &SessionId) -> Result<bool, DatabaseError> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| DatabaseError::Sqlx(e.to_string()))?;
        sqlx::query("DELETE FROM messages WHERE session_id = ?")
            .bind(session_id.as_str())
            .execute(&mut *tx)
            .await
            .map_err(|e| DatabaseError::Sqlx(e.to_string()))?;
        let deleted = sqlx::query("DELETE FROM sessions WHERE id = ?")
            .bind(session_id.as_str())
            .execute(&mut *tx)
            .await
            .map_err(|e| DatabaseError::Sqlx(e.to_string()))?
            .rows_affected();
        tx.commit()
            .await
            .map_err(|e| DatabaseError::Sqlx(e.to_string()))?;
        Ok(deleted > 0)
    }
}

#[async_trait]
impl ConversationStore for SqliteConversationStore {
    async fn load_session(&self, session_id: &SessionId) -> Result<Vec<ChatMessage>, DatabaseError> {
        let rows = sqlx::query(
            "SELECT id, session_id, role, content_format, content, tool_calls_json, tool_call_id, tool_name, streaming, created_at FROM messages WHERE session_id = ? ORDER BY seq ASC",
        )
        .bind(session_id.as_str())
        .fetch_all(&self.pool)
        .await
        .map_err(|e| DatabaseError::Sqlx(e.to_string()))?;

        let messages = rows
            .iter()
            .map(row_to_message)
            .collect::<Result<Vec<_>, _>>()?;

        Ok(messages)
    }

    async fn append_messages(
        &self,
        session_id: &SessionId,
        messages: &[ChatMessage],
    ) -> Result<(), DatabaseError> {
        self.ensure_session(session_id).await?;

        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| DatabaseError::Sqlx(e.to_string()))?;

        for msg in messages {
            let tool_calls_json = msg
                .tool_calls
                .as_ref()
                .map(serde_json::to_string)
                .transpose()
                .map_err(|e| DatabaseError::Sqlx(e.to_string()))?;
            let (format, content) = encode_content(&msg.content)?;

            sqlx::query(
                "INSERT INTO messages (id, session_id, role, content_format, content, tool_calls_json, tool_call_id, tool_name, streaming, created_at) \
                 VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?) \
                 ON CONFLICT(id) DO UPDATE SET content_format = excluded.content_format, content = excluded.content, \
                 tool_calls_json = excluded.tool_calls_json, streaming = excluded.streaming",
            )
            .bind(&msg.id)
            .bind(session_id.as_str())
            .bind(msg.role.to_string())
            .bind(format)
            .bind(content)
            .bind(tool_calls_json)
            .bind(&msg.tool_call_id)
            .bind(&msg.tool_name)
            .bind(i64::from(msg.streaming))
            .bind(msg.created_at.to_rfc3339())
            .execute(&mut *tx)
            .await
            .map_err(|e| DatabaseError::Sqlx(e.to_string()))?;
        }

        sqlx::query("UPDATE sessions SET updated_at = ? WHERE id = ?")
            .bind(chrono::Utc::now().to_rfc3339())
            .bind(session_id.as_str())
            .execute(&mut *tx)
            .await
            .map_err(|e| DatabaseError::Sqlx(e.to_string()))?;

        tx.commit()
            .await
            .map_err(|e| DatabaseError::Sqlx(e.to_string()))?;

        debug!(session_id = %session_id, count = messages.len(), "Appended messages");
        Ok(())
    }
}

fn encode_content(content: &MessageContent) -> Result<(&'static str, String), DatabaseError> {
    match content {
        MessageContent::Text(text) => Ok((FORMAT_TEXT, text.clone())),
        MessageContent::Parts(parts) => serde_json::to_string(parts)
            .map(|json| (FORMAT_PARTS, json))
            .map_err(|e| DatabaseError::Sqlx(e.to_string())),
    }
}

fn row_to_message(row: &SqliteRow) -> Result<ChatMessage, DatabaseError> {
    let id: String = row.get("id");
    let corrupt = |reason: String| DatabaseError::CorruptRow {
        id: id.clone(),
        reason,
    };

    let role_str: String = row.get("role");
    let role = Role::from_str(&role_str).map_err(|_| corrupt(format!("unknown role '{role_str}'")))?;
    let created_at_str: String = row.get("created_at");
    let created_at = chrono::DateTime::parse_from_rfc3339(&created_at_str)
        .map(|dt| dt.with_timezone(&chrono::Utc))
        .map_err(|e| corrupt(format!("bad created_at '{created_at_str}': {e}")))?;
    let tool_calls_json: Option<String> = row.get("tool_calls_json");
    let tool_calls = tool_calls_json
        .as_deref()
        .map(serde_json::from_str::<Vec<proto::ToolCall>>)
        .transpose()
        .map_err(|e| corrupt(format!("bad tool_calls_json: {e}")))?;
    let format: String = row.get("content_format");
    let raw_content: String = row.get("content");
    let streaming: i64 = row.get("streaming");

    Ok(ChatMessage {
        session_id: SessionId::from(row.get::<String, _>("session_id")),
        role,
        content: decode_content(&format, raw_content),
        tool_calls,
        tool_call_id: row.get("tool_call_id"),
        tool_name: row.get("tool_name"),
        streaming: streaming != 0,
        created_at,
        id,
    })
}

fn decode_content(format: &str, raw: String) -> MessageContent {
    if format == FORMAT_PARTS
        && let Ok(parts) = serde_json::from_str(&raw)
    {
        return MessageContent::Parts(parts);
    }
    MessageContent::Text(raw)
}
