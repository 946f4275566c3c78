//! BM25 keyword search over chunked content, one isolated index per store.

pub mod chunk;
pub mod engine;
mod index;
mod snippet;

/// Re-export of chunk type and line-window chunking.
pub use chunk::{Chunk, chunk_text};
/// Re-export of the engine and its option/result types.
pub use engine::{Bm25Params, SearchEngine, SearchOptions, SearchResult, StoreStats};
