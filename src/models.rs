//! Core data models used throughout docqa.
//!
//! These types represent the documents, chunks, and retrieval results that
//! flow through the ingestion and question-answering pipeline.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;
use std::sync::Arc;

/// Document type, as selected by the parser registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DocumentKind {
    Pdf,
    Text,
    Csv,
}

impl fmt::Display for DocumentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            DocumentKind::Pdf => "pdf",
            DocumentKind::Text => "text",
            DocumentKind::Csv => "csv",
        };
        f.write_str(s)
    }
}

/// An uploaded document, identified by the SHA-256 of its raw bytes.
///
/// Immutable once stored. Cloning is cheap: the bytes are shared.
#[derive(Clone)]
pub struct Document {
    pub hash: String,
    pub filename: String,
    pub kind: DocumentKind,
    pub bytes: Arc<[u8]>,
}

impl fmt::Debug for Document {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Document")
            .field("hash", &self.hash)
            .field("filename", &self.filename)
            .field("kind", &self.kind)
            .field("len", &self.bytes.len())
            .finish()
    }
}

/// Hex SHA-256 digest of raw document bytes.
pub fn content_hash(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    format!("{:x}", hasher.finalize())
}

/// A contiguous span of a document's normalized text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Chunk {
    /// `"{document_hash}-{chunk_index:06}"`; sorts in document order.
    pub id: String,
    pub document_hash: String,
    /// Filename of the owning document.
    pub source: String,
    pub chunk_index: usize,
    /// Offset of the first character within the normalized text.
    pub char_offset: usize,
    pub text: String,
}

impl Chunk {
    pub fn make_id(document_hash: &str, index: usize) -> String {
        format!("{}-{:06}", document_hash, index)
    }
}

/// The set of document hashes currently loaded.
///
/// Kept sorted so that equality does not depend on upload order and the key
/// is stable across restarts.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CorpusSnapshot(Vec<String>);

impl CorpusSnapshot {
    pub fn new<I, S>(hashes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut v: Vec<String> = hashes.into_iter().map(Into::into).collect();
        v.sort();
        v.dedup();
        Self(v)
    }

    pub fn hashes(&self) -> &[String] {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }
}

/// A chunk returned from retrieval together with its merged score.
#[derive(Debug, Clone)]
pub struct RetrievedChunk {
    pub chunk: Chunk,
    pub score: f64,
    /// 1-based rank in the keyword candidate list, if present there.
    pub keyword_rank: Option<usize>,
    /// 1-based rank in the vector candidate list, if present there.
    pub vector_rank: Option<usize>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_snapshot_order_independent() {
        let a = CorpusSnapshot::new(["b", "a", "c"]);
        let b = CorpusSnapshot::new(vec!["c".to_string(), "b".to_string(), "a".to_string()]);
        assert_eq!(a, b);
        assert_eq!(a.hashes(), &["a", "b", "c"]);
    }

    #[test]
    fn test_snapshot_dedups() {
        let s = CorpusSnapshot::new(["x", "x"]);
        assert_eq!(s.len(), 1);
    }

    #[test]
    fn test_chunk_ids_sort_by_index() {
        let mut ids = vec![Chunk::make_id("h", 10), Chunk::make_id("h", 2)];
        ids.sort();
        assert_eq!(ids, vec!["h-000002", "h-000010"]);
    }

    #[test]
    fn test_content_hash_stable() {
        assert_eq!(content_hash(b"abc"), content_hash(b"abc"));
        assert_ne!(content_hash(b"abc"), content_hash(b"abd"));
        assert_eq!(content_hash(b"").len(), 64);
    }
}
