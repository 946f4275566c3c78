use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::{Mutex, RwLock};
use proto::SearchError;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::chunk::Chunk;
pub use crate::index::Bm25Params;
use crate::index::{StoreIndex, dedup_batch};
use crate::snippet::context_snippet;

/// Relevance label attached to BM25 results.
pub const RELEVANCE_KEYWORD: &str = "keyword";

/// Query options.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SearchOptions {
    /// Maximum results returned.
    pub top_n: usize,
    /// Results scoring below this are dropped.
    pub threshold: Option<f32>,
}

impl Default for SearchOptions {
    fn default() -> Self {
        Self {
            top_n: 10,
            threshold: None,
        }
    }
}

/// One ranked search hit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchResult {
    pub content_id: String,
    pub chunk_id: String,
    /// Snippet of the chunk around the first matching term.
    pub context: String,
    pub line_range: (usize, usize),
    pub score: f32,
    pub relevance_type: String,
}

/// Size summary of one store index.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoreStats {
    pub chunks: usize,
    pub avg_doc_len: f32,
}

/// BM25 keyword search with one isolated index per store.
///
/// Writers build a complete replacement index and swap it in, so readers see
/// either the old or the new index, never a partial one.
pub struct SearchEngine {
    params: Bm25Params,
    /// Per-store chunk cap; `0` disables eviction.
    max_chunks_per_store: usize,
    initialized: AtomicBool,
    stores: RwLock<HashMap<String, Arc<StoreIndex>>>,
    /// Serializes read-modify-swap cycles across writers.
    write_lock: Mutex<()>,
}

impl SearchEngine {
    pub fn new(params: Bm25Params, max_chunks_per_store: usize) -> Self {
        Self {
            params,
            max_chunks_per_store,
            initialized: AtomicBool::new(false),
            stores: RwLock::new(HashMap::new()),
            write_lock: Mutex::new(()),
        }
    }

    /// One-time setup. Repeated calls are no-ops.
    pub fn initialize(&self) {
        if !self.initialized.swap(true, Ordering::SeqCst) {
            info!(
                k1 = self.params.k1,
                b = self.params.b,
                max_chunks_per_store = self.max_chunks_per_store,
                "Search engine initialized"
            );
        }
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized.load(Ordering::SeqCst)
    }

    fn ensure_initialized(&self) -> Result<(), SearchError> {
        if self.is_initialized() {
            Ok(())
        } else {
            Err(SearchError::NotInitialized)
        }
    }

    /// Replaces the entire index of `store_id` with `chunks`.
    pub fn index_store(&self, store_id: &str, chunks: Vec<Chunk>) -> Result<usize, SearchError> {
        self.ensure_initialized()?;
        let chunks = stamp_store(store_id, chunks)?;

        let _writer = self.write_lock.lock();
        let (chunks, evicted) = StoreIndex::empty(self.params).merged(chunks, self.max_chunks_per_store);
        self.swap_in(store_id, chunks, evicted)
    }

    /// Adds `chunks` to `store_id`, creating the store when needed.
    /// Chunks whose id already exists replace the earlier version.
    pub fn add_to_index(&self, store_id: &str, chunks: Vec<Chunk>) -> Result<usize, SearchError> {
        self.ensure_initialized()?;
        let chunks = stamp_store(store_id, chunks)?;

        let _writer = self.write_lock.lock();
        let current = self.stores.read().get(store_id).cloned();
        let (chunks, evicted) = match current {
            Some(index) => index.merged(chunks, self.max_chunks_per_store),
            None => StoreIndex::empty(self.params).merged(chunks, self.max_chunks_per_store),
        };
        self.swap_in(store_id, chunks, evicted)
    }

    /// Swaps every chunk of `content_id` for `chunks` in one step. Readers
    /// see either the old version of the content or the new one.
    pub fn replace_content(
        &self,
        store_id: &str,
        content_id: &str,
        chunks: Vec<Chunk>,
    ) -> Result<usize, SearchError> {
        self.ensure_initialized()?;
        let chunks = stamp_store(store_id, chunks)?;

        let _writer = self.write_lock.lock();
        let current = self.stores.read().get(store_id).cloned();
        let (chunks, evicted) = match current {
            Some(index) => index.merged_replacing(content_id, chunks, self.max_chunks_per_store),
            None => StoreIndex::empty(self.params).merged(chunks, self.max_chunks_per_store),
        };
        self.swap_in(store_id, chunks, evicted)
    }

    fn swap_in(&self, store_id: &str, chunks: Vec<Chunk>, evicted: usize) -> Result<usize, SearchError> {
        let index = Arc::new(StoreIndex::build(chunks, self.params));
        let total = index.len();
        self.stores.write().insert(store_id.to_string(), index);
        debug!(store_id, total, evicted, "Store index swapped in");
        Ok(total)
    }

    /// Drops every chunk of one content item. Returns the number removed.
    pub fn remove_content(&self, store_id: &str, content_id: &str) -> Result<usize, SearchError> {
        self.ensure_initialized()?;
        let _writer = self.write_lock.lock();
        let current = self
            .stores
            .read()
            .get(store_id)
            .cloned()
            .ok_or_else(|| SearchError::StoreNotFound(store_id.to_string()))?;

        let kept: Vec<Chunk> = current
            .chunks()
            .iter()
            .filter(|c| c.content_id != content_id)
            .cloned()
            .collect();
        let removed = current.len() - kept.len();
        if removed > 0 {
            self.swap_in(store_id, kept, 0)?;
        }
        Ok(removed)
    }

    /// Drops the index of a deleted store. Returns `true` if it existed.
    pub fn dispose_store(&self, store_id: &str) -> bool {
        let _writer = self.write_lock.lock();
        let existed = self.stores.write().remove(store_id).is_some();
        if existed {
            info!(store_id, "Store index disposed");
        }
        existed
    }

    /// Ranked query against one store.
    pub fn search(
        &self,
        store_id: &str,
        query: &str,
        options: SearchOptions,
    ) -> Result<Vec<SearchResult>, SearchError> {
        self.ensure_initialized()?;
        let index = self
            .stores
            .read()
            .get(store_id)
            .cloned()
            .ok_or_else(|| SearchError::StoreNotFound(store_id.to_string()))?;

        if query.trim().is_empty() || options.top_n == 0 {
            return Ok(Vec::new());
        }

        let results: Vec<SearchResult> = index
            .rank(query)
            .into_iter()
            .filter(|(_, score)| options.threshold.is_none_or(|t| *score >= t))
            .take(options.top_n)
            .map(|(chunk, score)| SearchResult {
                content_id: chunk.content_id.clone(),
                chunk_id: chunk.chunk_id.clone(),
                context: context_snippet(&chunk.text, query),
                line_range: chunk.line_range,
                score,
                relevance_type: RELEVANCE_KEYWORD.to_string(),
            })
            .collect();

        debug!(store_id, hits = results.len(), "Search completed");
        Ok(results)
    }

    /// Chunk count and average chunk length of a store.
    pub fn stats(&self, store_id: &str) -> Result<StoreStats, SearchError> {
        let stores = self.stores.read();
        let index = stores
            .get(store_id)
            .ok_or_else(|| SearchError::StoreNotFound(store_id.to_string()))?;
        Ok(StoreStats {
            chunks: index.len(),
            avg_doc_len: index.avg_doc_len(),
        })
    }

    /// Store ids with a live index, sorted.
    pub fn store_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.stores.read().keys().cloned().collect();
        ids.sort();
        ids
    }

    /// Releases every index and returns to the uninitialized state.
    pub fn cleanup(&self) {
        let _writer = self.write_lock.lock();
        let dropped = {
            let mut stores = self.stores.write();
            let n = stores.len();
            stores.clear();
            n
        };
        self.initialized.store(false, Ordering::SeqCst);
        info!(stores = dropped, "Search engine cleaned up");
    }
}

impl Default for SearchEngine {
    fn default() -> Self {
        Self::new(Bm25Params::default(), 10_000)
    }
}

fn stamp_store(store_id: &str, chunks: Vec<Chunk>) -> Result<Vec<Chunk>, SearchError> {
    let mut stamped = Vec::with_capacity(chunks.len());
    for mut chunk in chunks {
        if chunk.store_id.is_empty() {
            chunk.store_id = store_id.to_string();
        } else if chunk.store_id != store_id {
            return Err(SearchError::Index(format!(
                "chunk '{}' belongs to store '{}', not '{store_id}'",
                chunk.chunk_id, chunk.store_id
            )));
        }
        stamped.push(chunk);
    }
    Ok(dedup_batch(stamped))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chunk::chunk_text;

    fn chunk(id: &str, text: &str) -> Chunk {
        Chunk::new(id, format!("content-{id}"), text, (1, 1))
    }

    fn ready_engine() -> SearchEngine {
        let engine = SearchEngine::default();
        engine.initialize();
        engine
    }

    fn ids(results: &[SearchResult]) -> Vec<&str> {
        results.iter().map(|r| r.chunk_id.as_str()).collect()
    }

    #[test]
    fn keyword_query_ranks_matching_chunks() {
        let engine = ready_engine();
        engine
            .index_store("s1", vec![chunk("k1", "apple banana"), chunk("k2", "banana cherry")])
            .expect("index");

        let banana = engine.search("s1", "banana", SearchOptions::default()).expect("search");
        let mut found = ids(&banana);
        found.sort();
        assert_eq!(found, vec!["k1", "k2"]);
        assert!(banana[0].score >= banana[1].score);
        assert!(banana.iter().all(|r| r.relevance_type == "keyword"));

        let apple = engine.search("s1", "apple", SearchOptions::default()).expect("search");
        assert_eq!(ids(&apple), vec!["k1"]);
        assert_eq!(apple[0].content_id, "content-k1");
    }

    #[test]
    fn stores_are_isolated() {
        let engine = ready_engine();
        engine.index_store("a", vec![chunk("a1", "shared term alpha")]).expect("index a");
        engine.index_store("b", vec![chunk("b1", "shared term beta")]).expect("index b");

        let from_a = engine.search("a", "shared", SearchOptions::default()).expect("search a");
        assert_eq!(ids(&from_a), vec!["a1"]);
        let from_b = engine.search("b", "alpha", SearchOptions::default()).expect("search b");
        assert!(from_b.is_empty());
    }

    #[test]
    fn reindexing_a_chunk_replaces_it() {
        let engine = ready_engine();
        engine.add_to_index("s", vec![chunk("k1", "apple")]).expect("first");
        engine.add_to_index("s", vec![chunk("k1", "cherry")]).expect("replace");

        assert_eq!(engine.stats("s").expect("stats").chunks, 1);
        assert!(engine.search("s", "apple", SearchOptions::default()).expect("search").is_empty());
        assert_eq!(
            ids(&engine.search("s", "cherry", SearchOptions::default()).expect("search")),
            vec!["k1"]
        );
    }

    #[test]
    fn index_store_replaces_whole_store_while_add_appends() {
        let engine = ready_engine();
        engine.index_store("s", vec![chunk("k1", "apple")]).expect("index");
        engine.add_to_index("s", vec![chunk("k2", "apple pie")]).expect("add");
        assert_eq!(engine.stats("s").expect("stats").chunks, 2);

        engine.index_store("s", vec![chunk("k3", "banana")]).expect("reindex");
        assert_eq!(engine.stats("s").expect("stats").chunks, 1);
        assert!(engine.search("s", "apple", SearchOptions::default()).expect("search").is_empty());
    }

    #[test]
    fn repeated_queries_return_identical_order() {
        let engine = ready_engine();
        let chunks = (0..8).map(|i| chunk(&format!("k{i}"), "lorem ipsum dolor")).collect();
        engine.index_store("s", chunks).expect("index");

        let first = engine.search("s", "ipsum", SearchOptions::default()).expect("search");
        let second = engine.search("s", "ipsum", SearchOptions::default()).expect("search");
        assert_eq!(first, second);
        assert_eq!(ids(&first), vec!["k0", "k1", "k2", "k3", "k4", "k5", "k6", "k7"]);
    }

    #[test]
    fn threshold_and_top_n_limit_results() {
        let engine = ready_engine();
        engine
            .index_store(
                "s",
                vec![
                    chunk("k1", "rust rust rust compiler"),
                    chunk("k2", "rust"),
                    chunk("k3", "python interpreter"),
                ],
            )
            .expect("index");

        let top_one = engine
            .search("s", "rust", SearchOptions { top_n: 1, threshold: None })
            .expect("search");
        assert_eq!(top_one.len(), 1);

        let all = engine.search("s", "rust", SearchOptions::default()).expect("search");
        let cutoff = all[0].score;
        let strict = engine
            .search(
                "s",
                "rust",
                SearchOptions {
                    top_n: 10,
                    threshold: Some(cutoff + 1.0),
                },
            )
            .expect("search");
        assert!(strict.is_empty());
    }

    #[test]
    fn empty_query_returns_nothing() {
        let engine = ready_engine();
        engine.index_store("s", vec![chunk("k1", "apple")]).expect("index");
        assert!(engine.search("s", "   ", SearchOptions::default()).expect("search").is_empty());
    }

    #[test]
    fn reports_state_errors() {
        let engine = SearchEngine::default();
        assert!(matches!(
            engine.search("s", "q", SearchOptions::default()),
            Err(SearchError::NotInitialized)
        ));
        assert!(matches!(
            engine.index_store("s", vec![]),
            Err(SearchError::NotInitialized)
        ));

        engine.initialize();
        engine.initialize();
        assert!(matches!(
            engine.search("missing", "q", SearchOptions::default()),
            Err(SearchError::StoreNotFound(id)) if id == "missing"
        ));
    }

    #[test]
    fn rejects_chunks_from_another_store() {
        let engine = ready_engine();
        let mut foreign = chunk("k1", "apple");
        foreign.store_id = "other".to_string();
        assert!(matches!(
            engine.index_store("s", vec![foreign]),
            Err(SearchError::Index(_))
        ));
    }

    #[test]
    fn capacity_evicts_oldest_chunks() {
        let engine = SearchEngine::new(Bm25Params::default(), 2);
        engine.initialize();
        engine.add_to_index("s", vec![chunk("k1", "apple one")]).expect("add");
        engine.add_to_index("s", vec![chunk("k2", "apple two")]).expect("add");
        engine.add_to_index("s", vec![chunk("k3", "apple three")]).expect("add");

        let hits = engine.search("s", "apple", SearchOptions::default()).expect("search");
        let mut found = ids(&hits);
        found.sort();
        assert_eq!(found, vec!["k2", "k3"]);
    }

    #[test]
    fn remove_content_and_dispose_store() {
        let engine = ready_engine();
        let mut chunks = chunk_text("doc-a", "alpha line\nsecond alpha", 1);
        chunks.extend(chunk_text("doc-b", "alpha elsewhere", 1));
        engine.index_store("s", chunks).expect("index");
        assert_eq!(engine.stats("s").expect("stats").chunks, 3);

        assert_eq!(engine.remove_content("s", "doc-a").expect("remove"), 2);
        let hits = engine.search("s", "alpha", SearchOptions::default()).expect("search");
        assert!(hits.iter().all(|r| r.content_id == "doc-b"));

        assert!(engine.dispose_store("s"));
        assert!(!engine.dispose_store("s"));
        assert!(matches!(engine.stats("s"), Err(SearchError::StoreNotFound(_))));
    }

    #[test]
    fn replace_content_swaps_old_chunks_for_new() {
        let engine = ready_engine();
        let mut chunks = chunk_text("doc", "alpha\nbeta\ngamma", 1);
        chunks.extend(chunk_text("other", "alpha elsewhere", 1));
        engine.index_store("s", chunks).expect("index");

        let total = engine
            .replace_content("s", "doc", chunk_text("doc", "delta", 1))
            .expect("replace");
        assert_eq!(total, 2);
        assert!(engine.search("s", "gamma", SearchOptions::default()).expect("search").is_empty());
        let delta = engine.search("s", "delta", SearchOptions::default()).expect("search");
        assert_eq!(delta[0].content_id, "doc");

        let mut foreign = chunk("k9", "zeta");
        foreign.store_id = "elsewhere".to_string();
        assert!(engine.replace_content("s", "other", vec![foreign]).is_err());
        assert_eq!(engine.stats("s").expect("stats").chunks, 2);
        assert!(!engine.search("s", "elsewhere", SearchOptions::default()).expect("search").is_empty());
    }

    #[test]
    fn readers_never_see_a_half_applied_update() {
        let engine = ready_engine();
        engine
            .index_store("s", chunk_text("doc", "apple round 0", 10))
            .expect("seed");
        let stop = AtomicBool::new(false);

        std::thread::scope(|scope| {
            let readers: Vec<_> = (0..4)
                .map(|_| {
                    scope.spawn(|| {
                        let mut checked = 0usize;
                        while !stop.load(Ordering::SeqCst) {
                            let hits = engine
                                .search("s", "apple", SearchOptions::default())
                                .expect("store stays present");
                            assert_eq!(hits.len(), 1, "content vanished mid-update");
                            assert_eq!(hits[0].content_id, "doc");
                            checked += 1;
                        }
                        checked
                    })
                })
                .collect();

            for round in 1..300 {
                let chunks = chunk_text("doc", &format!("apple round {round}"), 10);
                if round % 3 == 0 {
                    engine.index_store("s", chunks).expect("reindex");
                } else if round % 3 == 1 {
                    engine.replace_content("s", "doc", chunks).expect("replace");
                } else {
                    engine.add_to_index("s", chunks).expect("add");
                }
            }
            stop.store(true, Ordering::SeqCst);

            for reader in readers {
                reader.join().expect("reader thread");
            }
        });
    }

    #[test]
    fn cleanup_resets_engine() {
        let engine = ready_engine();
        engine.index_store("s", vec![chunk("k1", "apple")]).expect("index");
        engine.cleanup();
        assert!(!engine.is_initialized());
        assert!(engine.store_ids().is_empty());
    }

    #[test]
    fn results_serialize_with_camel_case_fields() {
        let engine = ready_engine();
        engine
            .index_store("s", vec![Chunk::new("k1", "c1", "apple banana", (3, 4))])
            .expect("index");
        let hits = engine.search("s", "banana", SearchOptions::default()).expect("search");
        let value = serde_json::to_value(&hits[0]).expect("serialize");
        assert_eq!(value["contentId"], "c1");
        assert_eq!(value["lineRange"], serde_json::json!([3, 4]));
        assert_eq!(value["relevanceType"], "keyword");
        assert_eq!(value["context"], "apple banana");
    }
}
