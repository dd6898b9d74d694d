//! The question-answering session.
//!
//! [`Session`] owns every piece of mutable state: the document store, the
//! vector index cache, the current retriever, conversation memory, and the
//! feedback log. It is created once with [`Session::open`] and mutated only
//! through its methods, one operation at a time (`&mut self`).
//!
//! # Ask pipeline
//!
//! ```text
//! question ──► refine (LLM) ──► hybrid retrieve ──► answer (LLM)
//!                                                      │
//!                                  not grounded ──► general knowledge (LLM)
//! ```
//!
//! The retriever is built lazily on the first `ask`/`search` after
//! [`Session::open`] and eagerly after each ingest, so listing documents or
//! history never calls the embedding provider. A retriever whose corpus
//! snapshot differs from the store's is stale and rebuilt before use, which
//! also covers an ingest that was cancelled mid-rebuild.
//!
//! [`Session::open_offline`] opens the same state without model providers
//! for housekeeping commands; `ingest_batch`, `ask` and `search` fail on it.

use std::path::PathBuf;
use std::sync::Arc;

use crate::answer::{self, Answer};
use crate::config::Config;
use crate::embedding::EmbeddingProvider;
use crate::error::{Error, Result};
use crate::extract::ParserRegistry;
use crate::feedback::{FeedbackLog, FeedbackRecord, Vote};
use crate::llm::LanguageModel;
use crate::memory::{ConversationMemory, Turn};
use crate::models::{Document, RetrievedChunk};
use crate::refine;
use crate::retriever::HybridRetriever;
use crate::store::{BatchReport, DocumentStore};
use crate::vector::VectorIndexManager;

/// Embedding and language model backends used by a session.
#[derive(Clone)]
pub struct Providers {
    pub embedder: Arc<dyn EmbeddingProvider>,
    pub model: Arc<dyn LanguageModel>,
}

/// An ingest whose vector index rebuild failed after the batch was parsed.
///
/// The batch's new documents have already been rolled back.
#[derive(Debug, thiserror::Error)]
#[error("{error}")]
pub struct IngestError {
    /// Per-document outcomes of the batch before rollback.
    pub report: BatchReport,
    #[source]
    pub error: Error,
}

pub struct Session {
    config: Config,
    store: DocumentStore,
    vectors: VectorIndexManager,
    retriever: Option<Arc<HybridRetriever>>,
    memory: ConversationMemory,
    feedback: FeedbackLog,
    providers: Option<Providers>,
}

impl Session {
    /// Open a session over `config.storage.base_dir` with the built-in parsers.
    pub fn open(
        config: Config,
        embedder: Arc<dyn EmbeddingProvider>,
        model: Arc<dyn LanguageModel>,
    ) -> Result<Self> {
        Self::open_with_registry(config, ParserRegistry::with_defaults(), embedder, model)
    }

    pub fn open_with_registry(
        config: Config,
        registry: ParserRegistry,
        embedder: Arc<dyn EmbeddingProvider>,
        model: Arc<dyn LanguageModel>,
    ) -> Result<Self> {
        Self::open_inner(config, registry, Some(Providers { embedder, model }))
    }

    /// Open a session that can list, clear, and manage history and feedback
    /// but never calls a model.
    pub fn open_offline(config: Config) -> Result<Self> {
        Self::open_inner(config, ParserRegistry::with_defaults(), None)
    }

    fn open_inner(
        config: Config,
        registry: ParserRegistry,
        providers: Option<Providers>,
    ) -> Result<Self> {
        let storage = &config.storage;
        let store = DocumentStore::open(storage.uploads_dir(), registry, config.chunking.clone())?;
        let vectors =
            VectorIndexManager::new(storage.vector_index_path(), config.embedding.batch_size);
        let memory =
            ConversationMemory::load(&storage.chat_history_path(), config.memory.window_turns)?;
        let feedback = FeedbackLog::new(storage.feedback_path());

        tracing::debug!(
            base_dir = %storage.base_dir.display(),
            documents = store.len(),
            turns = memory.len(),
            "session opened"
        );

        Ok(Self {
            config,
            store,
            vectors,
            retriever: None,
            memory,
            feedback,
            providers,
        })
    }

    fn providers(&self) -> Result<Providers> {
        self.providers.clone().ok_or_else(|| {
            Error::InvalidInput("session was opened without model providers".to_string())
        })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Ingest a batch of `(filename, bytes)` uploads and refresh the indexes.
    ///
    /// Per-document failures are reported in the returned [`BatchReport`].
    /// If the vector index rebuild fails, every document this batch added is
    /// removed again, the previous retriever stays in place, and the report
    /// is handed back inside the [`IngestError`].
    pub async fn ingest_batch(
        &mut self,
        files: Vec<(String, Vec<u8>)>,
    ) -> std::result::Result<BatchReport, IngestError> {
        let providers = match self.providers() {
            Ok(p) => p,
            Err(error) => {
                return Err(IngestError {
                    report: BatchReport::default(),
                    error,
                })
            }
        };

        let report = self.store.ingest_batch(files).await;
        if self.current_retriever().is_some() {
            return Ok(report);
        }

        let added = report.added_hashes();
        if let Err(error) = self.rebuild(providers.embedder.as_ref()).await {
            tracing::error!(error = %error, documents = added.len(), "index rebuild failed, rolling back batch");
            for failure in &report.failures {
                tracing::warn!(filename = %failure.filename, error = %failure.error, "document not ingested");
            }
            for hash in &added {
                if let Err(rm) = self.store.remove(hash) {
                    tracing::warn!(%hash, error = %rm, "rollback could not remove document");
                }
            }
            return Err(IngestError { report, error });
        }
        Ok(report)
    }

    /// The retriever, if it was built over the store's current snapshot.
    fn current_retriever(&self) -> Option<Arc<HybridRetriever>> {
        let retriever = self.retriever.as_ref()?;
        (retriever.vector_index().snapshot() == &self.store.snapshot()).then(|| retriever.clone())
    }

    async fn rebuild(&mut self, embedder: &dyn EmbeddingProvider) -> Result<Arc<HybridRetriever>> {
        let chunks = self.store.chunks();
        let snapshot = self.store.snapshot();
        let (index, outcome) = self
            .vectors
            .build_or_reuse(&chunks, &snapshot, embedder)
            .await?;
        tracing::debug!(?outcome, chunks = chunks.len(), "retriever ready");

        let retriever = Arc::new(HybridRetriever::new(
            chunks,
            index,
            self.config.retrieval.clone(),
        ));
        self.retriever = Some(retriever.clone());
        Ok(retriever)
    }

    async fn retriever(&mut self, embedder: &dyn EmbeddingProvider) -> Result<Arc<HybridRetriever>> {
        if let Some(r) = self.current_retriever() {
            return Ok(r);
        }
        if self.store.is_empty() {
            let empty = Arc::new(HybridRetriever::empty(self.config.retrieval.clone()));
            self.retriever = Some(empty.clone());
            return Ok(empty);
        }
        self.rebuild(embedder).await
    }

    /// Answer `question`, optionally restricted to the named documents.
    ///
    /// Both turns are recorded and history is persisted only when every
    /// step succeeds.
    pub async fn ask(&mut self, question: &str, scope: &[String]) -> Result<Answer> {
        let question = question.trim();
        if question.is_empty() {
            return Err(Error::InvalidInput("question is empty".to_string()));
        }

        let Providers { embedder, model } = self.providers()?;
        let retriever = self.retriever(embedder.as_ref()).await?;
        let all = self.store.filenames();

        let refined = refine::refine(model.as_ref(), question, scope, &all).await?;
        let passages = retriever
            .retrieve(&refined, self.config.retrieval.k, scope, embedder.as_ref())
            .await?;
        let answer = answer::answer(
            model.as_ref(),
            &refined,
            &passages,
            self.memory.recent(),
        )
        .await?;

        tracing::info!(
            passages = passages.len(),
            grounded = answer.grounded,
            "answered question"
        );

        let context = refine::file_context(scope, &all);
        let before = self.memory.len();
        self.memory
            .push(Turn::user(format!("Question about {}: {}", context, question)));
        self.memory.push(Turn::assistant(answer.text.clone()));
        if let Err(e) = self.memory.save(&self.config.storage.chat_history_path()) {
            self.memory.truncate(before);
            return Err(e);
        }

        Ok(answer)
    }

    /// Hybrid retrieval without answer generation.
    pub async fn search(
        &mut self,
        query: &str,
        k: usize,
        scope: &[String],
    ) -> Result<Vec<RetrievedChunk>> {
        let embedder = self.providers()?.embedder;
        let retriever = self.retriever(embedder.as_ref()).await?;
        retriever.retrieve(query, k, scope, embedder.as_ref()).await
    }

    /// Documents in upload order.
    pub fn documents(&self) -> Vec<&Document> {
        self.store.documents()
    }

    pub fn store(&self) -> &DocumentStore {
        &self.store
    }

    /// Remove every document and the vector index cache. Returns how many
    /// documents were removed.
    pub async fn clear_all(&mut self) -> Result<usize> {
        let removed = self.store.len();
        self.store.clear_all()?;
        self.vectors.invalidate().await?;
        self.retriever = None;
        tracing::info!(documents = removed, "cleared all documents and indexes");
        Ok(removed)
    }

    /// Delete the persisted vector index. It is rebuilt on next use.
    pub async fn clear_cache(&mut self) -> Result<()> {
        self.vectors.invalidate().await?;
        self.retriever = None;
        tracing::info!("cleared vector index cache");
        Ok(())
    }

    /// Record a vote on the most recent answer.
    pub fn record_feedback(&self, vote: Vote) -> Result<FeedbackRecord> {
        let (q, a) = self
            .memory
            .last_exchange()
            .ok_or_else(|| Error::InvalidInput("no answer to give feedback on".to_string()))?;
        self.feedback.record(&q.text, &a.text, vote)
    }

    pub fn feedback_log(&self) -> &FeedbackLog {
        &self.feedback
    }

    pub fn history(&self) -> &ConversationMemory {
        &self.memory
    }

    /// Delete the `index`-th question/answer exchange and persist.
    pub fn delete_exchange(&mut self, index: usize) -> Result<bool> {
        if !self.memory.delete_exchange(index) {
            return Ok(false);
        }
        self.memory.save(&self.config.storage.chat_history_path())?;
        Ok(true)
    }

    pub fn clear_history(&mut self) -> Result<()> {
        self.memory.clear();
        self.memory.save(&self.config.storage.chat_history_path())
    }

    /// Export chat history to a timestamped file under the base directory.
    pub fn export_history(&self) -> Result<PathBuf> {
        self.memory.export(&self.config.storage.base_dir)
    }
}
