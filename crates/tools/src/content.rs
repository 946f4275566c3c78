//! Built-in content-store tools backed by the shared search engine.

use std::sync::Arc;

use async_trait::async_trait;
use proto::{CallToolResult, SearchError, ToolError};
use search::{SearchEngine, SearchOptions, chunk_text};
use serde::Deserialize;
use serde_json::{Value, json};
use tracing::debug;
use uuid::Uuid;

use crate::Tool;

const MAX_TOP_N: usize = 100;

fn parse_args<T: for<'de> Deserialize<'de>>(tool: &str, args: Value) -> Result<T, ToolError> {
    serde_json::from_value(args)
        .map_err(|e| ToolError::InvalidArgs(format!("Invalid {tool} parameters: {e}")))
}

/// Store-level problems are reported to the assistant as logical failures;
/// an engine that is not ready is an internal error.
fn search_failure(err: SearchError) -> Result<CallToolResult, ToolError> {
    match err {
        SearchError::StoreNotFound(store) => {
            Ok(CallToolResult::error(format!("Store not found: {store}")))
        }
        SearchError::Index(msg) => Err(ToolError::InvalidArgs(msg)),
        SearchError::NotInitialized => Err(ToolError::ExecutionFailed(
            "Search engine not initialized".to_string(),
        )),
    }
}

/// Returns the three content tools sharing `engine`.
pub fn content_tools(
    engine: Arc<SearchEngine>,
    lines_per_chunk: usize,
    default_top_n: usize,
) -> Vec<Arc<dyn Tool>> {
    vec![
        Arc::new(AddContentTool::new(Arc::clone(&engine), lines_per_chunk)),
        Arc::new(KeywordSearchTool::new(Arc::clone(&engine), default_top_n)),
        Arc::new(DeleteContentTool::new(engine)),
    ]
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AddContentArgs {
    store_id: String,
    content: String,
    #[serde(default)]
    content_id: Option<String>,
}

/// Chunks text and indexes it into a store.
pub struct AddContentTool {
    engine: Arc<SearchEngine>,
    lines_per_chunk: usize,
}

impl AddContentTool {
    pub fn new(engine: Arc<SearchEngine>, lines_per_chunk: usize) -> Self {
        Self {
            engine,
            lines_per_chunk,
        }
    }
}

#[async_trait]
impl Tool for AddContentTool {
    fn name(&self) -> &str {
        "addContent"
    }

    fn description(&self) -> &str {
        "Add text content to a content store and index it for keyword search. \
         Re-adding an existing contentId replaces its previous chunks."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "storeId": {"type": "string", "description": "Content store to add to"},
                "content": {"type": "string", "description": "Text content to index"},
                "contentId": {"type": "string", "description": "Optional stable id for the content"}
            },
            "required": ["storeId", "content"]
        })
    }

    fn output_schema(&self) -> Option<Value> {
        Some(json!({
            "type": "object",
            "properties": {
                "contentId": {"type": "string"},
                "storeId": {"type": "string"},
                "chunks": {"type": "integer"}
            }
        }))
    }

    async fn execute(&self, call_id: &str, args: Value) -> Result<CallToolResult, ToolError> {
        let args: AddContentArgs = parse_args(self.name(), args)?;
        if args.content.trim().is_empty() {
            return Err(ToolError::InvalidArgs("content must not be empty".to_string()));
        }
        let content_id = args
            .content_id
            .filter(|id| !id.is_empty())
            .unwrap_or_else(|| Uuid::new_v4().to_string());

        let chunks = chunk_text(&content_id, &args.content, self.lines_per_chunk);
        let chunk_count = chunks.len();
        if let Err(e) = self
            .engine
            .replace_content(&args.store_id, &content_id, chunks)
        {
            return search_failure(e);
        }
        debug!(call_id, store_id = %args.store_id, content_id = %content_id, chunk_count, "Content indexed");

        Ok(CallToolResult::with_structured(
            format!(
                "Content added!\n\nContent ID: {content_id}\nStore ID: {}\nChunks indexed: {chunk_count}",
                args.store_id
            ),
            json!({
                "contentId": content_id,
                "storeId": args.store_id,
                "chunks": chunk_count,
            }),
        ))
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct KeywordSearchOptions {
    #[serde(default)]
    top_n: Option<usize>,
    #[serde(default)]
    threshold: Option<f32>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct KeywordSearchArgs {
    store_id: String,
    query: String,
    #[serde(default)]
    options: Option<KeywordSearchOptions>,
}

/// BM25 keyword search over one store.
pub struct KeywordSearchTool {
    engine: Arc<SearchEngine>,
    default_top_n: usize,
}

impl KeywordSearchTool {
    pub fn new(engine: Arc<SearchEngine>, default_top_n: usize) -> Self {
        Self {
            engine,
            default_top_n,
        }
    }
}

#[async_trait]
impl Tool for KeywordSearchTool {
    fn name(&self) -> &str {
        "keywordSimilaritySearch"
    }

    fn description(&self) -> &str {
        "Rank the chunks of a content store against a keyword query using BM25."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "storeId": {"type": "string", "description": "Content store to search"},
                "query": {"type": "string", "description": "Keyword query"},
                "options": {
                    "type": "object",
                    "properties": {
                        "topN": {"type": "integer", "minimum": 1, "maximum": MAX_TOP_N, "description": "Maximum results (default 10)"},
                        "threshold": {"type": "number", "description": "Minimum score"}
                    }
                }
            },
            "required": ["storeId", "query"]
        })
    }

    fn output_schema(&self) -> Option<Value> {
        Some(json!({
            "type": "object",
            "properties": {
                "query": {"type": "string"},
                "results": {"type": "array"}
            }
        }))
    }

    async fn execute(&self, _call_id: &str, args: Value) -> Result<CallToolResult, ToolError> {
        let args: KeywordSearchArgs = parse_args(self.name(), args)?;
        let options = args.options.unwrap_or_default();
        let search_options = SearchOptions {
            top_n: options.top_n.unwrap_or(self.default_top_n).clamp(1, MAX_TOP_N),
            threshold: options.threshold,
        };

        let results = match self.engine.search(&args.store_id, &args.query, search_options) {
            Ok(results) => results,
            Err(e) => return search_failure(e),
        };

        let listing = if results.is_empty() {
            "No results found for your search query.".to_string()
        } else {
            results
                .iter()
                .map(|r| {
                    format!(
                        "Content ID: {} (Score: {:.2})\n   Lines {}-{}: {}",
                        r.content_id,
                        r.score,
                        r.line_range.0,
                        r.line_range.1,
                        r.context.trim()
                    )
                })
                .collect::<Vec<_>>()
                .join("\n\n")
        };
        let text = format!(
            "Search completed!\n\nQuery: \"{}\"\nStore ID: {}\nResults found: {}\n\n{listing}",
            args.query,
            args.store_id,
            results.len()
        );

        let structured = json!({ "query": args.query, "results": results });
        Ok(CallToolResult::with_structured(text, structured))
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct DeleteContentArgs {
    store_id: String,
    content_id: String,
}

/// Removes one content item's chunks from a store.
pub struct DeleteContentTool {
    engine: Arc<SearchEngine>,
}

impl DeleteContentTool {
    pub fn new(engine: Arc<SearchEngine>) -> Self {
        Self { engine }
    }
}

#[async_trait]
impl Tool for DeleteContentTool {
    fn name(&self) -> &str {
        "deleteContent"
    }

    fn description(&self) -> &str {
        "Delete a content item and its indexed chunks from a content store."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "storeId": {"type": "string"},
                "contentId": {"type": "string"}
            },
            "required": ["storeId", "contentId"]
        })
    }

    async fn execute(&self, _call_id: &str, args: Value) -> Result<CallToolResult, ToolError> {
        let args: DeleteContentArgs = parse_args(self.name(), args)?;
        let removed = match self.engine.remove_content(&args.store_id, &args.content_id) {
            Ok(removed) => removed,
            Err(e) => return search_failure(e),
        };
        if removed == 0 {
            return Ok(CallToolResult::error(format!(
                "Content not found: {} in store {}",
                args.content_id, args.store_id
            )));
        }
        Ok(CallToolResult::with_structured(
            format!("Deleted content {} ({removed} chunks)", args.content_id),
            json!({ "contentId": args.content_id, "removedChunks": removed }),
        ))
    }
}
