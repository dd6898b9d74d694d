//! Content-addressed document store.
//!
//! Coordinates the ingestion flow for uploaded files: hash → parse →
//! normalize → chunk → persist. Documents are keyed by the SHA-256 of their
//! raw bytes, so uploading the same bytes again (under any filename) is a
//! cache hit that neither reparses nor stores a second copy.
//!
//! Raw bytes are persisted as `uploads/<hash>/<filename>` and reloaded by
//! [`DocumentStore::open`], so a restarted process sees the same corpus.
//! Upload order is kept in `uploads/order.json`. Parsed text and chunks live
//! only in memory and are recomputed on reload.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio::task::JoinSet;

use crate::chunk;
use crate::config::ChunkingConfig;
use crate::error::{Error, Result};
use crate::extract::ParserRegistry;
use crate::models::{content_hash, Chunk, CorpusSnapshot, Document};
use crate::normalize::clean_text;
use crate::storage;

const ORDER_FILE: &str = "order.json";

/// Result of ingesting one document.
#[derive(Debug, Clone)]
pub struct IngestedDocument {
    pub document: Document,
    pub chunks: Arc<[Chunk]>,
    /// True when the content was already stored and nothing was reparsed.
    pub cached: bool,
}

/// A document of a batch that could not be ingested.
#[derive(Debug)]
pub struct BatchFailure {
    pub filename: String,
    pub error: Error,
}

/// Per-document outcomes of [`DocumentStore::ingest_batch`], in input order.
#[derive(Debug, Default)]
pub struct BatchReport {
    pub ingested: Vec<IngestedDocument>,
    pub failures: Vec<BatchFailure>,
}

impl BatchReport {
    /// Hashes of documents that this batch added to the store.
    pub fn added_hashes(&self) -> Vec<String> {
        self.ingested
            .iter()
            .filter(|d| !d.cached)
            .map(|d| d.document.hash.clone())
            .collect()
    }
}

struct StoredDocument {
    document: Document,
    chunks: Arc<[Chunk]>,
}

struct Prepared {
    document: Document,
    chunks: Vec<Chunk>,
}

enum Slot {
    Known { filename: String, hash: String },
    Parsing { filename: String },
}

pub struct DocumentStore {
    uploads_dir: PathBuf,
    registry: ParserRegistry,
    chunking: ChunkingConfig,
    docs: BTreeMap<String, StoredDocument>,
    /// Hashes in the order documents were added.
    order: Vec<String>,
}

impl DocumentStore {
    /// Open the store rooted at `uploads_dir`, reloading persisted uploads.
    ///
    /// Persisted files that no longer parse are skipped with a warning.
    pub fn open(
        uploads_dir: impl Into<PathBuf>,
        registry: ParserRegistry,
        chunking: ChunkingConfig,
    ) -> Result<Self> {
        let uploads_dir = uploads_dir.into();
        storage::ensure_dir(&uploads_dir)?;

        let mut store = Self {
            uploads_dir,
            registry,
            chunking,
            docs: BTreeMap::new(),
            order: Vec::new(),
        };
        store.reload()?;
        Ok(store)
    }

    fn reload(&mut self) -> Result<()> {
        let entries = std::fs::read_dir(&self.uploads_dir)
            .map_err(|e| Error::storage(&self.uploads_dir, e))?;

        let mut dirs: Vec<PathBuf> = entries
            .filter_map(|e| e.ok())
            .map(|e| e.path())
            .filter(|p| p.is_dir())
            .collect();
        dirs.sort();

        // Known hashes first in upload order, then any the order file missed.
        let order = self.read_order()?;
        let position = |dir: &PathBuf| {
            dir.file_name()
                .and_then(|n| n.to_str())
                .and_then(|h| order.iter().position(|o| o == h))
                .unwrap_or(usize::MAX)
        };
        dirs.sort_by_key(position);

        for dir in dirs {
            let Some(expected) = dir.file_name().and_then(|n| n.to_str()).map(str::to_string)
            else {
                continue;
            };
            let Some(file) = first_file(&dir)? else {
                continue;
            };
            let filename = file
                .file_name()
                .and_then(|n| n.to_str())
                .unwrap_or_default()
                .to_string();
            let bytes = std::fs::read(&file).map_err(|e| Error::storage(&file, e))?;
            let hash = content_hash(&bytes);
            if hash != expected {
                tracing::warn!(path = %file.display(), "persisted upload does not match its hash, skipping");
                continue;
            }

            match prepare(&self.registry, &self.chunking, &filename, hash, bytes) {
                Ok(prepared) => {
                    self.insert(prepared);
                }
                Err(e) => tracing::warn!(%filename, error = %e, "could not reload persisted upload"),
            }
        }

        if !self.docs.is_empty() {
            tracing::info!(documents = self.docs.len(), "reloaded persisted uploads");
        }
        Ok(())
    }

    /// Ingest a single document.
    ///
    /// Returns the existing document and chunks without reparsing when the
    /// content hash is already known.
    pub fn ingest(&mut self, bytes: Vec<u8>, filename: &str) -> Result<IngestedDocument> {
        let filename = sanitize_filename(filename)?;
        let hash = content_hash(&bytes);
        if let Some(existing) = self.cached(&hash) {
            return Ok(existing);
        }

        let prepared = prepare(&self.registry, &self.chunking, &filename, hash, bytes)?;
        self.commit(prepared)
    }

    /// Ingest many documents, parsing and chunking them in parallel.
    ///
    /// A failing document is recorded in [`BatchReport::failures`] and does
    /// not affect the others. Successful documents are committed in input
    /// order.
    pub async fn ingest_batch(&mut self, files: Vec<(String, Vec<u8>)>) -> BatchReport {
        let mut report = BatchReport::default();
        let mut tasks = JoinSet::new();
        let mut slots = Vec::with_capacity(files.len());
        let mut scheduled: HashSet<String> = HashSet::new();

        for (i, (raw_name, bytes)) in files.into_iter().enumerate() {
            let filename = match sanitize_filename(&raw_name) {
                Ok(name) => name,
                Err(error) => {
                    report.failures.push(BatchFailure {
                        filename: raw_name,
                        error,
                    });
                    continue;
                }
            };

            let hash = content_hash(&bytes);
            if self.docs.contains_key(&hash) || !scheduled.insert(hash.clone()) {
                slots.push((i, Slot::Known { filename, hash }));
                continue;
            }

            let registry = self.registry.clone();
            let chunking = self.chunking.clone();
            let name = filename.clone();
            tasks.spawn_blocking(move || (i, prepare(&registry, &chunking, &name, hash, bytes)));
            slots.push((i, Slot::Parsing { filename }));
        }

        let mut prepared: HashMap<usize, Result<Prepared>> = HashMap::new();
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((i, result)) => {
                    prepared.insert(i, result);
                }
                Err(e) => tracing::error!(error = %e, "document parse task failed"),
            }
        }

        for (i, slot) in slots {
            let outcome = match slot {
                Slot::Known { filename, hash } => self.cached(&hash).ok_or_else(|| {
                    (
                        filename.clone(),
                        Error::ParseFailure {
                            filename,
                            reason: "identical content failed earlier in this batch".to_string(),
                        },
                    )
                }),
                Slot::Parsing { filename } => match prepared.remove(&i) {
                    Some(Ok(p)) => self.commit(p).map_err(|e| (filename, e)),
                    Some(Err(e)) => Err((filename, e)),
                    None => Err((
                        filename.clone(),
                        Error::ParseFailure {
                            filename,
                            reason: "parser task aborted".to_string(),
                        },
                    )),
                },
            };

            match outcome {
                Ok(doc) => report.ingested.push(doc),
                Err((filename, error)) => {
                    tracing::warn!(%filename, error = %error, "skipping document");
                    report.failures.push(BatchFailure { filename, error });
                }
            }
        }

        report
    }

    fn order_path(&self) -> PathBuf {
        self.uploads_dir.join(ORDER_FILE)
    }

    fn read_order(&self) -> Result<Vec<String>> {
        let path = self.order_path();
        let Some(bytes) = storage::read_optional(&path)? else {
            return Ok(Vec::new());
        };
        match serde_json::from_slice(&bytes) {
            Ok(order) => Ok(order),
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "ignoring unreadable upload order");
                Ok(Vec::new())
            }
        }
    }

    fn write_order(&self) -> Result<()> {
        let path = self.order_path();
        let json = serde_json::to_vec(&self.order).map_err(|e| {
            Error::storage(&path, std::io::Error::new(std::io::ErrorKind::InvalidData, e))
        })?;
        storage::write_atomic(&path, &json)
    }

    fn cached(&self, hash: &str) -> Option<IngestedDocument> {
        self.docs.get(hash).map(|stored| IngestedDocument {
            document: stored.document.clone(),
            chunks: stored.chunks.clone(),
            cached: true,
        })
    }

    fn commit(&mut self, prepared: Prepared) -> Result<IngestedDocument> {
        let path = self.upload_path(&prepared.document);
        storage::write_atomic(&path, &prepared.document.bytes)?;
        tracing::info!(
            filename = %prepared.document.filename,
            kind = %prepared.document.kind,
            chunks = prepared.chunks.len(),
            "ingested document"
        );
        let ingested = self.insert(prepared);
        self.write_order()?;
        Ok(ingested)
    }

    fn insert(&mut self, prepared: Prepared) -> IngestedDocument {
        let hash = prepared.document.hash.clone();
        let chunks: Arc<[Chunk]> = prepared.chunks.into();
        self.docs.insert(
            hash.clone(),
            StoredDocument {
                document: prepared.document.clone(),
                chunks: chunks.clone(),
            },
        );
        self.order.push(hash);
        IngestedDocument {
            document: prepared.document,
            chunks,
            cached: false,
        }
    }

    fn upload_path(&self, doc: &Document) -> PathBuf {
        self.uploads_dir.join(&doc.hash).join(&doc.filename)
    }

    /// Remove one document and its persisted bytes.
    pub fn remove(&mut self, hash: &str) -> Result<bool> {
        if self.docs.remove(hash).is_none() {
            return Ok(false);
        }
        self.order.retain(|h| h != hash);
        self.write_order()?;
        let dir = self.uploads_dir.join(hash);
        match std::fs::remove_dir_all(&dir) {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(true),
            Err(e) => Err(Error::storage(dir, e)),
        }
    }

    /// Discard every document and the uploads area.
    pub fn clear_all(&mut self) -> Result<()> {
        self.docs.clear();
        self.order.clear();
        storage::clear_dir(&self.uploads_dir)?;
        Ok(())
    }

    pub fn snapshot(&self) -> CorpusSnapshot {
        CorpusSnapshot::new(self.docs.keys().cloned())
    }

    /// All chunks, ordered by document hash then chunk index.
    pub fn chunks(&self) -> Vec<Chunk> {
        self.docs
            .values()
            .flat_map(|d| d.chunks.iter().cloned())
            .collect()
    }

    /// Documents in the order they were added, also across restarts.
    pub fn documents(&self) -> Vec<&Document> {
        self.order
            .iter()
            .filter_map(|h| self.docs.get(h))
            .map(|d| &d.document)
            .collect()
    }

    pub fn get(&self, hash: &str) -> Option<&Document> {
        self.docs.get(hash).map(|d| &d.document)
    }

    pub fn chunks_of(&self, hash: &str) -> Option<Arc<[Chunk]>> {
        self.docs.get(hash).map(|d| d.chunks.clone())
    }

    pub fn filenames(&self) -> Vec<String> {
        self.documents().iter().map(|d| d.filename.clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.docs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.docs.is_empty()
    }

    pub fn uploads_dir(&self) -> &Path {
        &self.uploads_dir
    }
}

/// Parse, normalize, and chunk one document. Pure apart from CPU.
fn prepare(
    registry: &ParserRegistry,
    chunking: &ChunkingConfig,
    filename: &str,
    hash: String,
    bytes: Vec<u8>,
) -> Result<Prepared> {
    let (kind, raw_text) = registry.extract(filename, &bytes)?;
    let text = clean_text(&raw_text);
    let chunks = chunk::split(
        &hash,
        filename,
        &text,
        chunking.max_chars,
        chunking.overlap_chars,
    );

    Ok(Prepared {
        document: Document {
            hash,
            filename: filename.to_string(),
            kind,
            bytes: bytes.into(),
        },
        chunks,
    })
}

/// Reduce an upload name to its final path component.
fn sanitize_filename(name: &str) -> Result<String> {
    Path::new(name)
        .file_name()
        .and_then(|n| n.to_str())
        .map(str::to_string)
        .filter(|n| !n.trim().is_empty())
        .ok_or_else(|| Error::InvalidInput(format!("invalid upload filename: '{}'", name)))
}

fn first_file(dir: &Path) -> Result<Option<PathBuf>> {
    let entries = std::fs::read_dir(dir).map_err(|e| Error::storage(dir, e))?;
    let mut files: Vec<PathBuf> = entries
        .filter_map(|e| e.ok())
        .map(|e| e.path())
        .filter(|p| p.is_file())
        .filter(|p| {
            !p.file_name()
                .and_then(|n| n.to_str())
                .is_some_and(|n| n.starts_with('.') && n.ends_with(".tmp"))
        })
        .collect();
    files.sort();
    Ok(files.into_iter().next())
}
