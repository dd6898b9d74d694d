//! Dense vector index with a snapshot-keyed persistent cache.
//!
//! The index is a flat list of `(chunk_id, vector)` pairs searched by exact
//! cosine similarity. Building it is the expensive step (one embedding call
//! per batch of chunks), so [`VectorIndexManager`] caches the last build in
//! memory and on disk, keyed by:
//!
//! - the [`CorpusSnapshot`] (sorted document hashes),
//! - the embedding model name,
//! - a digest of every chunk id and text.
//!
//! When all three match, the cached index is returned and no embedding call
//! is made. This also holds across restarts via `cache/vector_index.json`.
//!
//! # File format
//!
//! ```json
//! {
//!   "version": 1,
//!   "snapshot": ["<hash>", ...],
//!   "model": "all-minilm-l6-v2",
//!   "dims": 384,
//!   "chunks_digest": "<sha256 hex>",
//!   "entries": [{ "chunk_id": "<hash>-000000", "vector": "<base64 f32 LE>" }]
//! }
//! ```
//!
//! The file is replaced only by an atomic rename after a full build, so a
//! failed or cancelled rebuild leaves the previous index on disk.

use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::Arc;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tokio::sync::Mutex;

use crate::embedding::{blob_to_vec, cosine_similarity, vec_to_blob, EmbeddingProvider};
use crate::error::{Error, Result};
use crate::models::{Chunk, CorpusSnapshot};
use crate::storage;

const FORMAT_VERSION: u32 = 1;

#[derive(Debug, Clone)]
pub struct VectorIndex {
    snapshot: CorpusSnapshot,
    model: String,
    dims: usize,
    chunks_digest: String,
    /// Sorted by chunk id.
    entries: Vec<(String, Vec<f32>)>,
}

/// SHA-256 over the ids and texts of `chunks`, which must be sorted by id.
fn chunks_digest(chunks: &[&Chunk]) -> String {
    let mut hasher = Sha256::new();
    for c in chunks {
        hasher.update(c.id.as_bytes());
        hasher.update([0u8]);
        hasher.update(c.text.as_bytes());
        hasher.update([0u8]);
    }
    format!("{:x}", hasher.finalize())
}

impl VectorIndex {
    pub fn empty() -> Self {
        Self {
            snapshot: CorpusSnapshot::default(),
            model: String::new(),
            dims: 0,
            chunks_digest: String::new(),
            entries: Vec::new(),
        }
    }

    pub fn snapshot(&self) -> &CorpusSnapshot {
        &self.snapshot
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    pub fn dims(&self) -> usize {
        self.dims
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn matches(&self, snapshot: &CorpusSnapshot, model: &str, digest: &str) -> bool {
        self.snapshot == *snapshot && self.model == model && self.chunks_digest == digest
    }

    /// Top `k` chunk ids by cosine similarity, nearest first.
    ///
    /// Equal similarities are ordered by chunk id.
    pub fn search(
        &self,
        query: &[f32],
        k: usize,
        allowed: Option<&HashSet<String>>,
    ) -> Vec<(String, f64)> {
        if k == 0 || query.is_empty() {
            return Vec::new();
        }

        let mut scored: Vec<(String, f64)> = self
            .entries
            .iter()
            .filter(|(id, _)| allowed.map_or(true, |set| set.contains(id)))
            .map(|(id, v)| (id.clone(), cosine_similarity(query, v) as f64))
            .collect();

        scored.sort_by(|a, b| b.1.total_cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
        scored.truncate(k);
        scored
    }
}

#[derive(Serialize, Deserialize)]
struct PersistedIndex {
    version: u32,
    snapshot: CorpusSnapshot,
    model: String,
    dims: usize,
    chunks_digest: String,
    entries: Vec<PersistedEntry>,
}

#[derive(Serialize, Deserialize)]
struct PersistedEntry {
    chunk_id: String,
    vector: String,
}

impl PersistedIndex {
    fn from_index(index: &VectorIndex) -> Self {
        Self {
            version: FORMAT_VERSION,
            snapshot: index.snapshot.clone(),
            model: index.model.clone(),
            dims: index.dims,
            chunks_digest: index.chunks_digest.clone(),
            entries: index
                .entries
                .iter()
                .map(|(id, v)| PersistedEntry {
                    chunk_id: id.clone(),
                    vector: BASE64.encode(vec_to_blob(v)),
                })
                .collect(),
        }
    }

    fn into_index(self) -> Option<VectorIndex> {
        if self.version != FORMAT_VERSION {
            return None;
        }
        let mut entries = Vec::with_capacity(self.entries.len());
        for e in self.entries {
            let blob = BASE64.decode(e.vector.as_bytes()).ok()?;
            let vector = blob_to_vec(&blob);
            if vector.len() != self.dims {
                return None;
            }
            entries.push((e.chunk_id, vector));
        }
        entries.sort_by(|a, b| a.0.cmp(&b.0));
        Some(VectorIndex {
            snapshot: self.snapshot,
            model: self.model,
            dims: self.dims,
            chunks_digest: self.chunks_digest,
            entries,
        })
    }
}

/// How [`VectorIndexManager::build_or_reuse`] obtained its index.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BuildOutcome {
    MemoryHit,
    DiskHit,
    Built,
}

/// Owns the current vector index and its on-disk cache.
pub struct VectorIndexManager {
    path: PathBuf,
    batch_size: usize,
    current: Mutex<Option<Arc<VectorIndex>>>,
}

impl VectorIndexManager {
    pub fn new(path: impl Into<PathBuf>, batch_size: usize) -> Self {
        Self {
            path: path.into(),
            batch_size: batch_size.max(1),
            current: Mutex::new(None),
        }
    }

    pub async fn current(&self) -> Option<Arc<VectorIndex>> {
        self.current.lock().await.clone()
    }

    /// Return an index for `chunks`, reusing a cached one when possible.
    ///
    /// Holds the rebuild lock for the whole call, so concurrent callers
    /// wait and then see the fresh index as a memory hit. On failure the
    /// previous in-memory and persisted index are left untouched.
    pub async fn build_or_reuse(
        &self,
        chunks: &[Chunk],
        snapshot: &CorpusSnapshot,
        embedder: &dyn EmbeddingProvider,
    ) -> Result<(Arc<VectorIndex>, BuildOutcome)> {
        let mut current = self.current.lock().await;

        let mut sorted: Vec<&Chunk> = chunks.iter().collect();
        sorted.sort_by(|a, b| a.id.cmp(&b.id));
        let digest = chunks_digest(&sorted);
        let model = embedder.model_name();

        if let Some(index) = current.as_ref() {
            if index.matches(snapshot, model, &digest) {
                tracing::debug!("vector index cache hit (memory)");
                return Ok((index.clone(), BuildOutcome::MemoryHit));
            }
        }

        if let Some(index) = self.load()? {
            if index.matches(snapshot, model, &digest) {
                tracing::info!(entries = index.len(), "vector index cache hit (disk)");
                let index = Arc::new(index);
                *current = Some(index.clone());
                return Ok((index, BuildOutcome::DiskHit));
            }
        }

        tracing::info!(
            chunks = sorted.len(),
            documents = snapshot.len(),
            model,
            "building vector index"
        );
        let index = Arc::new(self.embed_all(&sorted, snapshot, model, digest, embedder).await?);

        let json = serde_json::to_vec(&PersistedIndex::from_index(&index))
            .map_err(|e| Error::IndexRebuildFailure(format!("serialize index: {}", e)))?;
        storage::write_atomic(&self.path, &json)?;

        *current = Some(index.clone());
        Ok((index, BuildOutcome::Built))
    }

    async fn embed_all(
        &self,
        chunks: &[&Chunk],
        snapshot: &CorpusSnapshot,
        model: &str,
        chunks_digest: String,
        embedder: &dyn EmbeddingProvider,
    ) -> Result<VectorIndex> {
        let mut entries = Vec::with_capacity(chunks.len());
        let mut dims: Option<usize> = None;

        for batch in chunks.chunks(self.batch_size) {
            let texts: Vec<String> = batch.iter().map(|c| c.text.clone()).collect();
            let vectors = embedder
                .embed(&texts)
                .await
                .map_err(|e| Error::IndexRebuildFailure(format!("{:#}", e)))?;

            if vectors.len() != batch.len() {
                return Err(Error::IndexRebuildFailure(format!(
                    "embedder returned {} vectors for {} texts",
                    vectors.len(),
                    batch.len()
                )));
            }

            for (chunk, vector) in batch.iter().zip(vectors) {
                let expected = *dims.get_or_insert(vector.len());
                if vector.is_empty() || vector.len() != expected {
                    return Err(Error::IndexRebuildFailure(format!(
                        "inconsistent embedding dimension {} (expected {})",
                        vector.len(),
                        expected
                    )));
                }
                entries.push((chunk.id.clone(), vector));
            }
        }

        Ok(VectorIndex {
            snapshot: snapshot.clone(),
            model: model.to_string(),
            dims: dims.unwrap_or(0),
            chunks_digest,
            entries,
        })
    }

    fn load(&self) -> Result<Option<VectorIndex>> {
        let Some(bytes) = storage::read_optional(&self.path)? else {
            return Ok(None);
        };
        match serde_json::from_slice::<PersistedIndex>(&bytes) {
            Ok(persisted) => {
                let index = persisted.into_index();
                if index.is_none() {
                    tracing::warn!(path = %self.path.display(), "ignoring incompatible vector index cache");
                }
                Ok(index)
            }
            Err(e) => {
                tracing::warn!(path = %self.path.display(), error = %e, "ignoring unreadable vector index cache");
                Ok(None)
            }
        }
    }

    /// Drop the in-memory index and delete the persisted one.
    pub async fn invalidate(&self) -> Result<()> {
        let mut current = self.current.lock().await;
        *current = None;
        storage::remove_file_if_exists(&self.path)
    }
}
