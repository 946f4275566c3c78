use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Default number of lines per chunk.
pub const DEFAULT_LINES_PER_CHUNK: usize = 10;

/// One indexable slice of a content item.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Chunk {
    /// Owning store; stamped on indexing when empty.
    #[serde(default)]
    pub store_id: String,
    /// Unique within the store.
    pub chunk_id: String,
    /// Content item this chunk was cut from.
    pub content_id: String,
    pub text: String,
    /// 1-based inclusive line range within the content item.
    pub line_range: (usize, usize),
    #[serde(default)]
    pub metadata: Value,
}

impl Chunk {
    pub fn new(
        chunk_id: impl Into<String>,
        content_id: impl Into<String>,
        text: impl Into<String>,
        line_range: (usize, usize),
    ) -> Self {
        Self {
            store_id: String::new(),
            chunk_id: chunk_id.into(),
            content_id: content_id.into(),
            text: text.into(),
            line_range,
            metadata: Value::Null,
        }
    }
}

/// Splits `text` into windows of `lines_per_chunk` lines.
///
/// Chunk ids are `chunk_{content_id}_{n}` with `n` counting from 0. Empty
/// windows (all whitespace) are skipped but still advance the line counter.
pub fn chunk_text(content_id: &str, text: &str, lines_per_chunk: usize) -> Vec<Chunk> {
    let per_chunk = lines_per_chunk.max(1);
    let lines: Vec<&str> = text.lines().collect();

    lines
        .chunks(per_chunk)
        .enumerate()
        .filter_map(|(i, window)| {
            let body = window.join("\n");
            if body.trim().is_empty() {
                return None;
            }
            let start = i * per_chunk + 1;
            let end = start + window.len() - 1;
            Some(Chunk::new(
                format!("chunk_{content_id}_{i}"),
                content_id,
                body,
                (start, end),
            ))
        })
        .collect()
}
