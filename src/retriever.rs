//! Hybrid retrieval: BM25 keyword search plus vector search, merged by
//! weighted reciprocal rank fusion.
//!
//! # Fusion
//!
//! Each sub-retriever returns a ranked candidate list of up to
//! `k × candidate_multiplier` chunk ids. A chunk's fused score is
//!
//! ```text
//! score = Σ  weight_r / (60 + rank_r)      rank_r is 1-based
//! ```
//!
//! over the lists it appears in. A chunk found by both retrievers is
//! returned once with both contributions summed. The final list is sorted
//! by score descending (ties by chunk id ascending) and truncated to `k`.
//!
//! # Scope
//!
//! Retrieval may be restricted to a set of source filenames. An empty scope
//! means "all documents".

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use crate::config::RetrievalConfig;
use crate::embedding::{embed_query, EmbeddingProvider};
use crate::error::{Error, Result};
use crate::lexical::LexicalIndex;
use crate::models::{Chunk, RetrievedChunk};
use crate::vector::VectorIndex;

const RRF_K: f64 = 60.0;

/// One fused candidate.
#[derive(Debug, Clone, PartialEq)]
pub struct Fused {
    pub chunk_id: String,
    pub score: f64,
    pub keyword_rank: Option<usize>,
    pub vector_rank: Option<usize>,
}

/// Merge two ranked id lists by weighted reciprocal rank fusion.
pub fn fuse(
    keyword: &[(String, f64)],
    vector: &[(String, f64)],
    keyword_weight: f64,
    vector_weight: f64,
    k: usize,
) -> Vec<Fused> {
    let mut merged: HashMap<&str, Fused> = HashMap::new();

    for (rank0, (id, _)) in keyword.iter().enumerate() {
        let rank = rank0 + 1;
        let entry = merged.entry(id.as_str()).or_insert_with(|| Fused {
            chunk_id: id.clone(),
            score: 0.0,
            keyword_rank: None,
            vector_rank: None,
        });
        // A repeated id keeps its best rank.
        if entry.keyword_rank.is_none() {
            entry.keyword_rank = Some(rank);
            entry.score += keyword_weight / (RRF_K + rank as f64);
        }
    }

    for (rank0, (id, _)) in vector.iter().enumerate() {
        let rank = rank0 + 1;
        let entry = merged.entry(id.as_str()).or_insert_with(|| Fused {
            chunk_id: id.clone(),
            score: 0.0,
            keyword_rank: None,
            vector_rank: None,
        });
        if entry.vector_rank.is_none() {
            entry.vector_rank = Some(rank);
            entry.score += vector_weight / (RRF_K + rank as f64);
        }
    }

    let mut results: Vec<Fused> = merged.into_values().collect();
    results.sort_by(|a, b| {
        b.score
            .total_cmp(&a.score)
            .then_with(|| a.chunk_id.cmp(&b.chunk_id))
    });
    results.truncate(k);
    results
}

/// A retriever over one corpus state.
///
/// Built after every successful ingest; replaced wholesale, never mutated.
pub struct HybridRetriever {
    chunks: HashMap<String, Chunk>,
    by_source: HashMap<String, HashSet<String>>,
    lexical: LexicalIndex,
    vector: Arc<VectorIndex>,
    settings: RetrievalConfig,
}

impl HybridRetriever {
    pub fn new(chunks: Vec<Chunk>, vector: Arc<VectorIndex>, settings: RetrievalConfig) -> Self {
        let lexical = LexicalIndex::build(&chunks);
        let mut by_source: HashMap<String, HashSet<String>> = HashMap::new();
        for c in &chunks {
            by_source
                .entry(c.source.clone())
                .or_default()
                .insert(c.id.clone());
        }
        let chunks = chunks.into_iter().map(|c| (c.id.clone(), c)).collect();

        Self {
            chunks,
            by_source,
            lexical,
            vector,
            settings,
        }
    }

    /// An empty retriever, used before any document is ingested.
    pub fn empty(settings: RetrievalConfig) -> Self {
        Self {
            chunks: HashMap::new(),
            by_source: HashMap::new(),
            lexical: LexicalIndex::default(),
            vector: Arc::new(VectorIndex::empty()),
            settings,
        }
    }

    pub fn len(&self) -> usize {
        self.chunks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }

    pub fn vector_index(&self) -> &Arc<VectorIndex> {
        &self.vector
    }

    fn allowed(&self, scope: &[String]) -> Option<HashSet<String>> {
        if scope.is_empty() {
            return None;
        }
        let mut allowed = HashSet::new();
        for name in scope {
            if let Some(ids) = self.by_source.get(name) {
                allowed.extend(ids.iter().cloned());
            }
        }
        Some(allowed)
    }

    /// Retrieve at most `k` chunks for `query`, restricted to `scope`.
    ///
    /// An empty query or empty corpus returns no chunks without calling the
    /// embedder. A query embedding failure is a [`Error::GenerationFailure`].
    pub async fn retrieve(
        &self,
        query: &str,
        k: usize,
        scope: &[String],
        embedder: &dyn EmbeddingProvider,
    ) -> Result<Vec<RetrievedChunk>> {
        if query.trim().is_empty() || self.chunks.is_empty() || k == 0 {
            return Ok(Vec::new());
        }

        let allowed = self.allowed(scope);
        if allowed.as_ref().is_some_and(|a| a.is_empty()) {
            return Ok(Vec::new());
        }

        let pool = k.saturating_mul(self.settings.candidate_multiplier.max(1));
        let keyword = self.lexical.search(query, pool, allowed.as_ref());

        let query_vec = embed_query(embedder, query)
            .await
            .map_err(|e| Error::GenerationFailure(format!("query embedding failed: {:#}", e)))?;
        let vector = self.vector.search(&query_vec, pool, allowed.as_ref());

        tracing::debug!(
            keyword = keyword.len(),
            vector = vector.len(),
            pool,
            "hybrid candidates"
        );

        let fused = fuse(
            &keyword,
            &vector,
            self.settings.keyword_weight,
            self.settings.vector_weight,
            k,
        );

        Ok(fused
            .into_iter()
            .filter_map(|f| {
                self.chunks.get(&f.chunk_id).map(|chunk| RetrievedChunk {
                    chunk: chunk.clone(),
                    score: f.score,
                    keyword_rank: f.keyword_rank,
                    vector_rank: f.vector_rank,
                })
            })
            .collect())
    }
}
