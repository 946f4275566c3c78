//! Keyword search over the messages of one conversation session.
//!
//! Each session gets its own store in a dedicated [`SearchEngine`], keyed by
//! the session id. A session is re-indexed lazily when its transcript no
//! longer matches the snapshot that was last indexed.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use proto::{ChatMessage, SessionId};
use search::{Chunk, SearchEngine, SearchOptions};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::debug;

use crate::memory::ConversationStore;

/// One ranked message hit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageHit {
    pub message_id: String,
    pub session_id: String,
    pub score: f32,
    pub snippet: String,
}

/// Cheap summary of a transcript, enough to notice appends and in-place edits
/// of the newest message.
#[derive(Debug, Clone, PartialEq, Eq)]
struct Snapshot {
    count: usize,
    last_id: Option<String>,
    last_len: usize,
    last_streaming: bool,
}

impl Snapshot {
    fn of(messages: &[ChatMessage]) -> Self {
        let last = messages.last();
        Self {
            count: messages.len(),
            last_id: last.map(|m| m.id.clone()),
            last_len: last.map(|m| m.content.text().len()).unwrap_or(0),
            last_streaming: last.is_some_and(|m| m.streaming),
        }
    }
}

/// Per-session BM25 index over stored conversation messages.
pub struct MessageIndex {
    store: Arc<dyn ConversationStore>,
    engine: Arc<SearchEngine>,
    indexed: Mutex<HashMap<SessionId, Snapshot>>,
}

impl MessageIndex {
    /// `engine` should be reserved for messages; its per-store chunk cap
    /// bounds how many of the newest messages each session keeps indexed.
    pub fn new(store: Arc<dyn ConversationStore>, engine: Arc<SearchEngine>) -> Self {
        engine.initialize();
        Self {
            store,
            engine,
            indexed: Mutex::new(HashMap::new()),
        }
    }

    /// Rebuilds the index of `session_id` from the store. Returns the number
    /// of indexed messages.
    pub async fn index_session(&self, session_id: &SessionId) -> Result<usize, proto::Error> {
        let messages = self.store.load_session(session_id).await?;
        self.rebuild(session_id, &messages)
    }

    fn rebuild(&self, session_id: &SessionId, messages: &[ChatMessage]) -> Result<usize, proto::Error> {
        let chunks: Vec<Chunk> = messages.iter().filter_map(message_chunk).collect();
        let total = self.engine.index_store(session_id.as_str(), chunks)?;
        self.indexed
            .lock()
            .insert(session_id.clone(), Snapshot::of(messages));
        debug!(session_id = %session_id, messages = messages.len(), indexed = total, "Message index rebuilt");
        Ok(total)
    }

    /// Ranked messages of `session_id` matching `query`. The session is
    /// re-indexed first when its transcript changed since the last build.
    pub async fn search(
        &self,
        session_id: &SessionId,
        query: &str,
        options: SearchOptions,
    ) -> Result<Vec<MessageHit>, proto::Error> {
        let messages = self.store.load_session(session_id).await?;
        let current = Snapshot::of(&messages);
        let stale = self.indexed.lock().get(session_id) != Some(&current);
        if stale {
            self.rebuild(session_id, &messages)?;
        }

        let hits = self
            .engine
            .search(session_id.as_str(), query, options)?
            .into_iter()
            .map(|r| MessageHit {
                message_id: r.content_id,
                session_id: session_id.as_str().to_string(),
                score: r.score,
                snippet: r.context,
            })
            .collect();
        Ok(hits)
    }

    /// Drops the index of a session, e.g. after the session is deleted.
    pub fn forget(&self, session_id: &SessionId) -> bool {
        self.indexed.lock().remove(session_id);
        self.engine.dispose_store(session_id.as_str())
    }
}

/// Messages without text (pure tool-call requests, empty drafts) are skipped.
fn message_chunk(message: &ChatMessage) -> Option<Chunk> {
    let text = message.content.text();
    if text.trim().is_empty() {
        return None;
    }
    let lines = text.lines().count().max(1);
    let mut chunk = Chunk::new(message.id.clone(), message.id.clone(), text, (1, lines));
    chunk.metadata = json!({
        "role": message.role.to_string(),
        "createdAt": message.created_at.to_rfc3339(),
    });
    Some(chunk)
}
