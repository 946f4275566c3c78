//! Immutable per-store BM25 index. Updates build a new index and swap it in.

use std::cmp::Ordering;
use std::collections::HashMap;

use bm25::{Embedder, EmbedderBuilder, Language, Scorer};

use crate::chunk::Chunk;

const FALLBACK_AVGDL: f32 = 100.0;

/// BM25 tuning shared by every store.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Bm25Params {
    /// Term-frequency saturation.
    pub k1: f32,
    /// Length normalization strength.
    pub b: f32,
}

impl Default for Bm25Params {
    fn default() -> Self {
        Self { k1: 1.2, b: 0.75 }
    }
}

pub(crate) struct StoreIndex {
    /// Chunks in insertion order, oldest first.
    chunks: Vec<Chunk>,
    positions: HashMap<String, usize>,
    embedder: Embedder,
    scorer: Scorer<String>,
    avg_doc_len: f32,
}

impl std::fmt::Debug for StoreIndex {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StoreIndex")
            .field("chunks", &self.chunks.len())
            .field("avg_doc_len", &self.avg_doc_len)
            .finish()
    }
}

impl StoreIndex {
    /// Builds a fully consolidated index over `chunks` (insertion order preserved).
    pub(crate) fn build(chunks: Vec<Chunk>, params: Bm25Params) -> Self {
        let embedder: Embedder = if chunks.is_empty() {
            EmbedderBuilder::with_avgdl(FALLBACK_AVGDL)
                .language_mode(Language::English)
                .k1(params.k1)
                .b(params.b)
                .build()
        } else {
            let texts: Vec<&str> = chunks.iter().map(|c| c.text.as_str()).collect();
            EmbedderBuilder::with_fit_to_corpus(Language::English, &texts)
                .k1(params.k1)
                .b(params.b)
                .build()
        };

        let mut scorer = Scorer::<String>::new();
        let mut positions = HashMap::with_capacity(chunks.len());
        for (pos, chunk) in chunks.iter().enumerate() {
            scorer.upsert(&chunk.chunk_id, embedder.embed(&chunk.text));
            positions.insert(chunk.chunk_id.clone(), pos);
        }

        let avg_doc_len = average_words(&chunks);
        Self {
            chunks,
            positions,
            embedder,
            scorer,
            avg_doc_len,
        }
    }

    pub(crate) fn empty(params: Bm25Params) -> Self {
        Self::build(Vec::new(), params)
    }

    pub(crate) fn chunks(&self) -> &[Chunk] {
        &self.chunks
    }

    pub(crate) fn len(&self) -> usize {
        self.chunks.len()
    }

    pub(crate) fn avg_doc_len(&self) -> f32 {
        self.avg_doc_len
    }

    /// Chunk list after merging `incoming`: same-id chunks are replaced in
    /// place, new ones appended, then the oldest evicted beyond `capacity`
    /// (`0` = unlimited).
    pub(crate) fn merged(&self, incoming: Vec<Chunk>, capacity: usize) -> (Vec<Chunk>, usize) {
        merge_chunks(self.chunks.clone(), incoming, capacity)
    }

    /// Like `merged`, but first drops every chunk of `content_id`.
    pub(crate) fn merged_replacing(
        &self,
        content_id: &str,
        incoming: Vec<Chunk>,
        capacity: usize,
    ) -> (Vec<Chunk>, usize) {
        let kept = self
            .chunks
            .iter()
            .filter(|c| c.content_id != content_id)
            .cloned()
            .collect();
        merge_chunks(kept, incoming, capacity)
    }

    /// Scored matches sorted by score descending, ties by insertion order.
    pub(crate) fn rank(&self, query: &str) -> Vec<(&Chunk, f32)> {
        let query_embedding = self.embedder.embed(query);
        let mut ranked: Vec<(usize, f32)> = self
            .scorer
            .matches(&query_embedding)
            .into_iter()
            .filter_map(|doc| self.positions.get(&doc.id).map(|&pos| (pos, doc.score)))
            .collect();

        ranked.sort_by(|a, b| {
            b.1.partial_cmp(&a.1)
                .unwrap_or(Ordering::Equal)
                .then_with(|| a.0.cmp(&b.0))
        });
        ranked
            .into_iter()
            .map(|(pos, score)| (&self.chunks[pos], score))
            .collect()
    }
}

fn merge_chunks(mut chunks: Vec<Chunk>, incoming: Vec<Chunk>, capacity: usize) -> (Vec<Chunk>, usize) {
    let mut positions: HashMap<String, usize> = chunks
        .iter()
        .enumerate()
        .map(|(pos, c)| (c.chunk_id.clone(), pos))
        .collect();
    for chunk in incoming {
        match positions.get(&chunk.chunk_id) {
            Some(&pos) => chunks[pos] = chunk,
            None => {
                positions.insert(chunk.chunk_id.clone(), chunks.len());
                chunks.push(chunk);
            }
        }
    }
    let evicted = evict_oldest(&mut chunks, capacity);
    (chunks, evicted)
}

/// Deduplicates incoming chunks by id (last one wins), keeping first-seen order.
pub(crate) fn dedup_batch(chunks: Vec<Chunk>) -> Vec<Chunk> {
    let mut order: Vec<Chunk> = Vec::with_capacity(chunks.len());
    let mut seen: HashMap<String, usize> = HashMap::new();
    for chunk in chunks {
        match seen.get(&chunk.chunk_id) {
            Some(&pos) => order[pos] = chunk,
            None => {
                seen.insert(chunk.chunk_id.clone(), order.len());
                order.push(chunk);
            }
        }
    }
    order
}

fn average_words(chunks: &[Chunk]) -> f32 {
    if chunks.is_empty() {
        return 0.0;
    }
    let total: usize = chunks.iter().map(|c| c.text.split_whitespace().count()).sum();
    total as f32 / chunks.len() as f32
}

fn evict_oldest(chunks: &mut Vec<Chunk>, capacity: usize) -> usize {
    if capacity == 0 || chunks.len() <= capacity {
        return 0;
    }
    let excess = chunks.len() - capacity;
    chunks.drain(..excess);
    excess
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chunk(id: &str, text: &str) -> Chunk {
        Chunk::new(id, "content", text, (1, 1))
    }

    #[test]
    fn ranks_matching_chunks_only() {
        let index = StoreIndex::build(
            vec![chunk("k1", "apple banana"), chunk("k2", "banana cherry")],
            Bm25Params::default(),
        );
        let apple: Vec<&str> = index
            .rank("apple")
            .into_iter()
            .map(|(c, _)| c.chunk_id.as_str())
            .collect();
        assert_eq!(apple, vec!["k1"]);
        assert_eq!(index.rank("banana").len(), 2);
    }

    #[test]
    fn equal_scores_keep_insertion_order() {
        let index = StoreIndex::build(
            vec![chunk("b", "same words"), chunk("a", "same words"), chunk("c", "same words")],
            Bm25Params::default(),
        );
        let ids: Vec<&str> = index
            .rank("words")
            .into_iter()
            .map(|(c, _)| c.chunk_id.as_str())
            .collect();
        assert_eq!(ids, vec!["b", "a", "c"]);
    }

    #[test]
    fn merge_replaces_existing_ids_in_place() {
        let index = StoreIndex::build(
            vec![chunk("k1", "old text"), chunk("k2", "other")],
            Bm25Params::default(),
        );
        let (merged, evicted) = index.merged(vec![chunk("k1", "new text"), chunk("k3", "more")], 0);
        assert_eq!(evicted, 0);
        let ids: Vec<&str> = merged.iter().map(|c| c.chunk_id.as_str()).collect();
        assert_eq!(ids, vec!["k1", "k2", "k3"]);
        assert_eq!(merged[0].text, "new text");
    }

    #[test]
    fn merge_evicts_oldest_beyond_capacity() {
        let index = StoreIndex::build(
            vec![chunk("k1", "one"), chunk("k2", "two")],
            Bm25Params::default(),
        );
        let (merged, evicted) = index.merged(vec![chunk("k3", "three")], 2);
        assert_eq!(evicted, 1);
        let ids: Vec<&str> = merged.iter().map(|c| c.chunk_id.as_str()).collect();
        assert_eq!(ids, vec!["k2", "k3"]);
    }

    #[test]
    fn dedup_batch_keeps_last_version() {
        let batch = dedup_batch(vec![chunk("k1", "first"), chunk("k2", "x"), chunk("k1", "second")]);
        assert_eq!(batch.len(), 2);
        assert_eq!(batch[0].text, "second");
    }

    #[test]
    fn empty_index_ranks_nothing() {
        let index = StoreIndex::empty(Bm25Params::default());
        assert_eq!(index.len(), 0);
        assert!(index.rank("anything").is_empty());
    }
}
