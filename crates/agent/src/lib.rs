//! Tool routing, result normalization, conversation-level orchestration, the conversation store
//! and message search.

pub mod memory;
pub mod message_search;
pub mod normalize;
pub mod orchestrator;
pub mod router;

/// Conversation persistence trait and its SQLite implementation.
pub use memory::{ConversationStore, SqliteConversationStore};
/// Per-session keyword search over stored messages.
pub use message_search::{MessageHit, MessageIndex};
/// Backend result coercion into the shared envelope.
pub use normalize::{RawOutcome, normalize};
/// Batch execution of assistant tool calls.
pub use orchestrator::{OrchestratorOptions, ToolCallOrchestrator, truncate_tool_result};
/// Merged catalog and dispatch across worker, host and local backends.
pub use router::{Backend, Route, Shadowed, ToolRouter};
