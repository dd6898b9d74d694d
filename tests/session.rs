use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tempfile::TempDir;

use docqa::config::Config;
use docqa::embedding::EmbeddingProvider;
use docqa::feedback::Vote;
use docqa::llm::LanguageModel;
use docqa::models::DocumentKind;
use docqa::{Error, Session};

const DIMS: usize = 256;

/// Hashed bag-of-words embedder that records every text it embeds.
#[derive(Default)]
struct FakeEmbedder {
    texts: Mutex<Vec<String>>,
    fail: AtomicBool,
    hang: AtomicBool,
}

impl FakeEmbedder {
    fn embedded(&self) -> Vec<String> {
        self.texts.lock().unwrap().clone()
    }

    fn reset(&self) {
        self.texts.lock().unwrap().clear();
    }
}

fn bucket(token: &str) -> usize {
    token
        .bytes()
        .fold(17usize, |h, b| h.wrapping_mul(31).wrapping_add(b as usize))
        % DIMS
}

#[async_trait]
impl EmbeddingProvider for FakeEmbedder {
    fn model_name(&self) -> &str {
        "fake-bow"
    }

    async fn embed(&self, texts: &[String]) -> anyhow::Result<Vec<Vec<f32>>> {
        if self.fail.load(Ordering::SeqCst) {
            anyhow::bail!("embedding endpoint timed out");
        }
        if self.hang.load(Ordering::SeqCst) {
            std::future::pending::<()>().await;
        }
        self.texts.lock().unwrap().extend(texts.iter().cloned());
        Ok(texts
            .iter()
            .map(|t| {
                let mut v = vec![0.0f32; DIMS];
                for token in docqa::lexical::tokenize(t) {
                    v[bucket(&token)] += 1.0;
                }
                v
            })
            .collect())
    }
}

/// Scripted model: echoes the question on refinement, answers "sky"
/// questions from the passages, and otherwise declines.
#[derive(Default)]
struct FakeModel {
    prompts: Mutex<Vec<String>>,
    calls: AtomicUsize,
}

impl FakeModel {
    fn prompts(&self) -> Vec<String> {
        self.prompts.lock().unwrap().clone()
    }
}

#[async_trait]
impl LanguageModel for FakeModel {
    fn model_name(&self) -> &str {
        "fake-chat"
    }

    async fn generate(&self, prompt: &str) -> anyhow::Result<String> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.prompts.lock().unwrap().push(prompt.to_string());

        if prompt.starts_with("Refine this question") {
            let question = prompt
                .split("User's question: ")
                .nth(1)
                .and_then(|rest| rest.split("\n\n").next())
                .unwrap_or_default();
            return Ok(format!("  {}  ", question));
        }
        if prompt.contains("Passages:") {
            let question = prompt.rsplit("Question: ").next().unwrap_or_default();
            if question.contains("sky") && prompt.contains("The sky is blue") {
                return Ok(r#"Here you go: {"grounded": true, "answer": "The sky is blue."}"#.to_string());
            }
            return Ok(r#"{"grounded": false, "answer": "No relevant content in the documents."}"#
                .to_string());
        }
        Ok("From general knowledge: it depends.".to_string())
    }
}

struct Harness {
    _tmp: TempDir,
    config: Config,
    embedder: Arc<FakeEmbedder>,
    model: Arc<FakeModel>,
}

impl Harness {
    fn new() -> Self {
        let tmp = TempDir::new().unwrap();
        let mut config = Config::default();
        config.storage.base_dir = tmp.path().join("data");
        config.chunking.max_chars = 200;
        config.chunking.overlap_chars = 20;
        Self {
            _tmp: tmp,
            config,
            embedder: Arc::new(FakeEmbedder::default()),
            model: Arc::new(FakeModel::default()),
        }
    }

    fn open(&self) -> Session {
        Session::open(self.config.clone(), self.embedder.clone(), self.model.clone()).unwrap()
    }
}

fn file(name: &str, text: &str) -> (String, Vec<u8>) {
    (name.to_string(), text.as_bytes().to_vec())
}

fn sky_corpus() -> Vec<(String, Vec<u8>)> {
    vec![
        file("sky.txt", "The sky is blue. The grass is green."),
        file("flowers.txt", "Roses are red. Violets are purple."),
    ]
}

/// Single-page PDF whose content stream shows `text` in Helvetica.
fn minimal_pdf(text: &str) -> Vec<u8> {
    let stream = format!("BT /F1 12 Tf 100 700 Td ({}) Tj ET", text);
    let mut out = Vec::new();
    out.extend_from_slice(b"%PDF-1.4\n");
    let o1 = out.len();
    out.extend_from_slice(b"1 0 obj << /Type /Catalog /Pages 2 0 R >> endobj\n");
    let o2 = out.len();
    out.extend_from_slice(b"2 0 obj << /Type /Pages /Kids [3 0 R] /Count 1 >> endobj\n");
    let o3 = out.len();
    out.extend_from_slice(b"3 0 obj << /Type /Page /Parent 2 0 R /MediaBox [0 0 612 792] /Contents 4 0 R /Resources << /Font << /F1 5 0 R >> >> >> endobj\n");
    let o4 = out.len();
    out.extend_from_slice(
        format!(
            "4 0 obj << /Length {} >> stream\n{}\nendstream endobj\n",
            stream.len(),
            stream
        )
        .as_bytes(),
    );
    let o5 = out.len();
    out.extend_from_slice(
        b"5 0 obj << /Type /Font /Subtype /Type1 /BaseFont /Helvetica >> endobj\n",
    );
    let xref_start = out.len();
    out.extend_from_slice(b"xref\n0 6\n");
    out.extend_from_slice(format!("{:010} 65535 f \n", 0).as_bytes());
    for offset in [o1, o2, o3, o4, o5] {
        out.extend_from_slice(format!("{:010} 00000 n \n", offset).as_bytes());
    }
    out.extend_from_slice(b"trailer << /Size 6 /Root 1 0 R >>\nstartxref\n");
    out.extend_from_slice(format!("{}\n", xref_start).as_bytes());
    out.extend_from_slice(b"%%EOF\n");
    out
}

#[tokio::test]
async fn test_sky_question_ranks_matching_chunk_first() {
    let h = Harness::new();
    let mut session = h.open();
    session.ingest_batch(sky_corpus()).await.unwrap();

    let results = session.search("What color is the sky?", 3, &[]).await.unwrap();
    assert!(!results.is_empty());
    assert!(results[0].chunk.text.contains("The sky is blue"));
    assert_eq!(results[0].keyword_rank, Some(1));
}

#[tokio::test]
async fn test_ask_grounded_answer_records_history() {
    let h = Harness::new();
    let mut session = h.open();
    session.ingest_batch(sky_corpus()).await.unwrap();

    let answer = session.ask("What color is the sky?", &[]).await.unwrap();
    assert!(answer.grounded);
    assert_eq!(answer.text, "The sky is blue.");
    assert!(answer.fallback.is_none());
    assert_eq!(answer.sources[0].filename, "sky.txt");

    let turns = session.history().turns();
    assert_eq!(turns.len(), 2);
    assert_eq!(
        turns[0].text,
        "Question about all uploaded files: sky.txt, flowers.txt: What color is the sky?"
    );
    assert_eq!(turns[1].text, "The sky is blue.");

    let reopened = h.open();
    assert_eq!(reopened.history().len(), 2);
}

#[tokio::test]
async fn test_ungrounded_answer_appends_general_knowledge() {
    let h = Harness::new();
    let mut session = h.open();
    session.ingest_batch(sky_corpus()).await.unwrap();

    let answer = session.ask("Why are roses red?", &[]).await.unwrap();
    assert!(!answer.grounded);
    assert!(answer.text.starts_with("No relevant content in the documents."));
    assert!(answer
        .text
        .contains("**General Knowledge Result:** From general knowledge: it depends."));
    assert_eq!(h.model.calls.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn test_empty_corpus_takes_general_knowledge_path() {
    let h = Harness::new();
    let mut session = h.open();

    assert!(session.search("anything", 3, &[]).await.unwrap().is_empty());

    let answer = session.ask("What is the capital of France?", &[]).await.unwrap();
    assert!(!answer.grounded);
    assert!(answer.sources.is_empty());
    assert!(answer.text.starts_with("**General Knowledge Result:**"));

    // refine + fallback only; no grounded call and no embeddings
    assert_eq!(h.model.calls.load(Ordering::SeqCst), 2);
    assert!(h.model.prompts().iter().all(|p| !p.contains("Passages:")));
    assert!(h.embedder.embedded().is_empty());
}

#[tokio::test]
async fn test_empty_question_rejected() {
    let h = Harness::new();
    let mut session = h.open();
    let err = session.ask("   ", &[]).await.unwrap_err();
    assert!(matches!(err, Error::InvalidInput(_)));
    assert!(session.history().is_empty());
}

#[tokio::test]
async fn test_reingest_same_bytes_is_cache_hit() {
    let h = Harness::new();
    let mut session = h.open();
    session.ingest_batch(sky_corpus()).await.unwrap();
    let chunks_before = session.store().chunks();
    h.embedder.reset();

    let report = session
        .ingest_batch(vec![file("copy-of-sky.txt", "The sky is blue. The grass is green.")])
        .await
        .unwrap();
    assert!(report.ingested[0].cached);
    assert_eq!(session.documents().len(), 2);
    assert_eq!(session.store().chunks(), chunks_before);
    assert!(h.embedder.embedded().is_empty());
}

#[tokio::test]
async fn test_persisted_index_reused_after_restart() {
    let h = Harness::new();
    {
        let mut session = h.open();
        session.ingest_batch(sky_corpus()).await.unwrap();
    }
    assert!(h.config.storage.vector_index_path().exists());
    h.embedder.reset();

    let mut session = h.open();
    assert_eq!(session.documents().len(), 2);
    session.search("sky", 3, &[]).await.unwrap();

    // Only the query was embedded.
    assert_eq!(h.embedder.embedded(), vec!["sky".to_string()]);
}

#[tokio::test]
async fn test_rebuild_is_deterministic_across_sessions() {
    let a = Harness::new();
    let b = Harness::new();
    let mut sa = a.open();
    let mut sb = b.open();
    sa.ingest_batch(sky_corpus()).await.unwrap();
    sb.ingest_batch(sky_corpus()).await.unwrap();

    let ra = sa.search("red sky", 5, &[]).await.unwrap();
    let rb = sb.search("red sky", 5, &[]).await.unwrap();
    let ids_a: Vec<(&str, f64)> = ra.iter().map(|r| (r.chunk.id.as_str(), r.score)).collect();
    let ids_b: Vec<(&str, f64)> = rb.iter().map(|r| (r.chunk.id.as_str(), r.score)).collect();
    assert_eq!(ids_a, ids_b);
}

#[tokio::test]
async fn test_hybrid_results_have_unique_ids() {
    let h = Harness::new();
    let mut session = h.open();
    let long: String = (0..40)
        .map(|i| format!("Sentence {} mentions the sky and the sea. ", i))
        .collect();
    session
        .ingest_batch(vec![file("long.txt", &long), file("sky.txt", "The sky is blue.")])
        .await
        .unwrap();

    let results = session.search("sky sea", 50, &[]).await.unwrap();
    assert!(results.len() > 3);
    let unique: HashSet<&str> = results.iter().map(|r| r.chunk.id.as_str()).collect();
    assert_eq!(unique.len(), results.len());
    assert!(results.windows(2).all(|w| w[0].score >= w[1].score));
}

#[tokio::test]
async fn test_scope_restricts_documents() {
    let h = Harness::new();
    let mut session = h.open();
    session.ingest_batch(sky_corpus()).await.unwrap();

    let scope = vec!["flowers.txt".to_string()];
    let results = session.search("What color is the sky?", 3, &scope).await.unwrap();
    assert!(results.iter().all(|r| r.chunk.source == "flowers.txt"));

    let missing = vec!["nope.txt".to_string()];
    assert!(session.search("sky", 3, &missing).await.unwrap().is_empty());

    session.ask("What color is the sky?", &scope).await.unwrap();
    let refine_prompt = &h.model.prompts()[0];
    assert!(refine_prompt.contains("following files: flowers.txt."));
}

#[tokio::test]
async fn test_unsupported_empty_file_does_not_fail_batch() {
    let h = Harness::new();
    let mut session = h.open();

    let mut batch = sky_corpus();
    batch.insert(1, ("blank.docx".to_string(), Vec::new()));
    let report = session.ingest_batch(batch).await.unwrap();

    assert_eq!(report.ingested.len(), 2);
    assert_eq!(report.failures.len(), 1);
    assert_eq!(report.failures[0].filename, "blank.docx");
    assert!(matches!(report.failures[0].error, Error::UnsupportedFormat { .. }));
    assert_eq!(session.documents().len(), 2);
}

#[tokio::test]
async fn test_failed_rebuild_rolls_back_batch() {
    let h = Harness::new();
    let mut session = h.open();
    session
        .ingest_batch(vec![file("sky.txt", "The sky is blue.")])
        .await
        .unwrap();
    let index_path = h.config.storage.vector_index_path();
    let index_before = std::fs::read(&index_path).unwrap();

    h.embedder.fail.store(true, Ordering::SeqCst);
    let err = session
        .ingest_batch(vec![file("sea.txt", "The sea is deep.")])
        .await
        .unwrap_err();
    assert!(matches!(err.error, Error::IndexRebuildFailure(_)));
    assert_eq!(err.report.ingested.len(), 1);
    assert_eq!(err.report.added_hashes().len(), 1);

    assert_eq!(session.documents().len(), 1);
    assert_eq!(session.documents()[0].filename, "sky.txt");
    assert_eq!(std::fs::read(&index_path).unwrap(), index_before);
    let upload_dirs = std::fs::read_dir(h.config.storage.uploads_dir())
        .unwrap()
        .filter(|e| e.as_ref().unwrap().path().is_dir())
        .count();
    assert_eq!(upload_dirs, 1);

    h.embedder.fail.store(false, Ordering::SeqCst);
    h.embedder.reset();
    let results = session.search("sky", 3, &[]).await.unwrap();
    assert_eq!(results[0].chunk.source, "sky.txt");
    assert_eq!(h.embedder.embedded(), vec!["sky".to_string()]);
}

#[tokio::test]
async fn test_cancelled_ingest_is_indexed_on_next_ingest() {
    let h = Harness::new();
    let mut session = h.open();
    session
        .ingest_batch(vec![file("sky.txt", "The sky is blue.")])
        .await
        .unwrap();

    h.embedder.hang.store(true, Ordering::SeqCst);
    let cancelled = tokio::time::timeout(
        Duration::from_millis(200),
        session.ingest_batch(vec![file("sea.txt", "The ocean is deep.")]),
    )
    .await;
    assert!(cancelled.is_err());
    h.embedder.hang.store(false, Ordering::SeqCst);

    session
        .ingest_batch(vec![file("sea.txt", "The ocean is deep.")])
        .await
        .unwrap();
    assert_eq!(session.documents().len(), 2);

    let results = session.search("ocean deep", 3, &[]).await.unwrap();
    assert_eq!(results[0].chunk.source, "sea.txt");
}

#[tokio::test]
async fn test_cancelled_ingest_is_indexed_before_ask() {
    let h = Harness::new();
    let mut session = h.open();
    session
        .ingest_batch(vec![file("sky.txt", "The sky is blue.")])
        .await
        .unwrap();

    h.embedder.hang.store(true, Ordering::SeqCst);
    let cancelled = tokio::time::timeout(
        Duration::from_millis(200),
        session.ingest_batch(vec![file("sea.txt", "The ocean is deep.")]),
    )
    .await;
    assert!(cancelled.is_err());
    h.embedder.hang.store(false, Ordering::SeqCst);

    let answer = session.ask("How deep is the ocean?", &[]).await.unwrap();
    assert!(answer.sources.iter().any(|s| s.filename == "sea.txt"));
}

#[tokio::test]
async fn test_offline_session_manages_state_without_providers() {
    let h = Harness::new();
    {
        let mut session = h.open();
        session.ingest_batch(sky_corpus()).await.unwrap();
        session.ask("What color is the sky?", &[]).await.unwrap();
    }

    let mut offline = Session::open_offline(h.config.clone()).unwrap();
    assert_eq!(offline.documents().len(), 2);
    assert_eq!(offline.history().len(), 2);

    let err = offline.search("sky", 3, &[]).await.unwrap_err();
    assert!(matches!(err, Error::InvalidInput(_)));
    let err = offline.ingest_batch(sky_corpus()).await.unwrap_err();
    assert!(matches!(err.error, Error::InvalidInput(_)));

    offline.record_feedback(Vote::Positive).unwrap();
    assert_eq!(offline.feedback_log().read_all().unwrap().len(), 1);

    assert_eq!(offline.clear_all().await.unwrap(), 2);
    assert!(!h.config.storage.vector_index_path().exists());
    assert!(h.open().documents().is_empty());
}

#[tokio::test]
async fn test_query_embedding_failure_is_generation_failure() {
    let h = Harness::new();
    let mut session = h.open();
    session.ingest_batch(sky_corpus()).await.unwrap();

    h.embedder.fail.store(true, Ordering::SeqCst);
    let err = session.ask("What color is the sky?", &[]).await.unwrap_err();
    assert!(matches!(err, Error::GenerationFailure(_)));
    assert!(session.history().is_empty());
}

#[tokio::test]
async fn test_pdf_ingest() {
    let h = Harness::new();
    let mut session = h.open();
    let report = session
        .ingest_batch(vec![("report.pdf".to_string(), minimal_pdf("quarterly revenue grew"))])
        .await
        .unwrap();

    assert!(report.failures.is_empty());
    let doc = &report.ingested[0];
    assert_eq!(doc.document.kind, DocumentKind::Pdf);
    assert!(doc.chunks.iter().any(|c| c.text.contains("quarterly revenue grew")));
}

#[tokio::test]
async fn test_csv_rows_are_searchable() {
    let h = Harness::new();
    let mut session = h.open();
    session
        .ingest_batch(vec![file("planets.csv", "planet,color\nMars,red\nNeptune,blue\n")])
        .await
        .unwrap();

    let results = session.search("Neptune", 1, &[]).await.unwrap();
    assert!(results[0].chunk.text.contains("planet: Neptune"));
}

#[tokio::test]
async fn test_feedback_and_history_operations() {
    let h = Harness::new();
    let mut session = h.open();
    session.ingest_batch(sky_corpus()).await.unwrap();

    assert!(matches!(
        session.record_feedback(Vote::Positive),
        Err(Error::InvalidInput(_))
    ));

    session.ask("What color is the sky?", &[]).await.unwrap();
    session.ask("Why are roses red?", &[]).await.unwrap();

    let record = session.record_feedback(Vote::Negative).unwrap();
    assert!(record.question.ends_with("Why are roses red?"));
    assert_eq!(session.feedback_log().read_all().unwrap().len(), 1);

    let exported = session.export_history().unwrap();
    assert!(exported.exists());

    assert!(session.delete_exchange(0).unwrap());
    assert!(!session.delete_exchange(5).unwrap());
    assert_eq!(session.history().len(), 2);
    assert_eq!(h.open().history().len(), 2);

    session.clear_history().unwrap();
    assert!(h.open().history().is_empty());
}

#[tokio::test]
async fn test_clear_all_and_clear_cache() {
    let h = Harness::new();
    let mut session = h.open();
    session.ingest_batch(sky_corpus()).await.unwrap();
    let index_path = h.config.storage.vector_index_path();

    session.clear_cache().await.unwrap();
    assert!(!index_path.exists());
    h.embedder.reset();
    session.search("sky", 3, &[]).await.unwrap();
    assert!(index_path.exists());
    assert!(h.embedder.embedded().len() > 1);

    session.clear_all().await.unwrap();
    assert!(session.documents().is_empty());
    assert!(!index_path.exists());
    assert!(session.search("sky", 3, &[]).await.unwrap().is_empty());
    assert!(h.open().documents().is_empty());
}
