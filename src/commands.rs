//! Command handlers for the `docqa` binary.
//!
//! Each `run_*` function implements one subcommand: it opens whatever state
//! it needs, performs the operation, and prints a human-readable result to
//! stdout. Diagnostics go through `tracing` to stderr.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use walkdir::WalkDir;

use crate::config::Config;
use crate::embedding::create_provider;
use crate::extract::ParserRegistry;
use crate::feedback::Vote;
use crate::llm::create_model;
use crate::session::Session;
use crate::storage;
use crate::store::BatchFailure;

fn open_session(config: &Config) -> Result<Session> {
    let embedder = create_provider(&config.embedding)?;
    let model = create_model(&config.llm)?;
    Ok(Session::open(
        config.clone(),
        Arc::from(embedder),
        Arc::from(model),
    )?)
}

/// A session for commands that never embed or generate.
fn open_offline(config: &Config) -> Result<Session> {
    Ok(Session::open_offline(config.clone())?)
}

fn print_failures(failures: &[BatchFailure]) {
    println!("  failed: {}", failures.len());
    for f in failures {
        println!("    {}: {}", f.filename, f.error);
    }
}

/// Create the storage layout under `storage.base_dir`.
pub fn run_init(config: &Config) -> Result<()> {
    let storage = &config.storage;
    for dir in [
        storage.uploads_dir(),
        storage.cache_dir(),
        storage.base_dir.join("feedback"),
    ] {
        storage::ensure_dir(&dir)?;
    }
    println!("Initialized {}", storage.base_dir.display());
    Ok(())
}

/// Expand `paths` into files. Directories are walked recursively and only
/// files with a registered extension are kept; explicit files are kept as-is.
pub fn collect_files(paths: &[PathBuf], registry: &ParserRegistry) -> Result<Vec<PathBuf>> {
    let extensions = registry.extensions();
    let mut files = Vec::new();

    for path in paths {
        if path.is_dir() {
            let mut found: Vec<PathBuf> = WalkDir::new(path)
                .follow_links(true)
                .into_iter()
                .filter_map(|e| e.ok())
                .filter(|e| e.file_type().is_file())
                .map(|e| e.into_path())
                .filter(|p| {
                    p.extension()
                        .and_then(|e| e.to_str())
                        .is_some_and(|e| extensions.contains(&e.to_lowercase()))
                })
                .collect();
            found.sort();
            files.extend(found);
        } else if path.is_file() {
            files.push(path.clone());
        } else {
            bail!("No such file or directory: {}", path.display());
        }
    }
    Ok(files)
}

pub async fn run_ingest(config: &Config, paths: &[PathBuf]) -> Result<()> {
    let files = collect_files(paths, &ParserRegistry::with_defaults())?;
    if files.is_empty() {
        println!("No supported files found.");
        return Ok(());
    }

    let mut uploads = Vec::with_capacity(files.len());
    for path in &files {
        let bytes =
            std::fs::read(path).with_context(|| format!("Failed to read {}", path.display()))?;
        uploads.push((display_name(path), bytes));
    }

    let mut session = open_session(config)?;
    let report = match session.ingest_batch(uploads).await {
        Ok(report) => report,
        Err(e) => {
            println!("ingest");
            println!("  files: {}", files.len());
            if !e.report.failures.is_empty() {
                print_failures(&e.report.failures);
            }
            println!("  rolled back: {}", e.report.added_hashes().len());
            return Err(e.error.into());
        }
    };

    let cached = report.ingested.iter().filter(|d| d.cached).count();
    let chunks: usize = report
        .ingested
        .iter()
        .filter(|d| !d.cached)
        .map(|d| d.chunks.len())
        .sum();

    println!("ingest");
    println!("  files: {}", files.len());
    println!("  added documents: {}", report.ingested.len() - cached);
    println!("  already stored: {}", cached);
    println!("  chunks: {}", chunks);
    if !report.failures.is_empty() {
        print_failures(&report.failures);
    }
    println!("  total documents: {}", session.documents().len());
    println!("ok");
    Ok(())
}

fn display_name(path: &Path) -> String {
    path.file_name()
        .and_then(|n| n.to_str())
        .unwrap_or_default()
        .to_string()
}

pub fn run_docs(config: &Config) -> Result<()> {
    let session = open_offline(config)?;
    let store = session.store();
    if store.is_empty() {
        println!("No documents.");
        return Ok(());
    }

    println!("{:<40} {:<6} {:>10} {:>7}  HASH", "FILENAME", "TYPE", "BYTES", "CHUNKS");
    for doc in store.documents() {
        let chunks = store.chunks_of(&doc.hash).map(|c| c.len()).unwrap_or(0);
        println!(
            "{:<40} {:<6} {:>10} {:>7}  {}",
            doc.filename,
            doc.kind,
            doc.bytes.len(),
            chunks,
            &doc.hash[..12.min(doc.hash.len())]
        );
    }
    Ok(())
}

pub async fn run_search(
    config: &Config,
    query: &str,
    k: Option<usize>,
    scope: &[String],
) -> Result<()> {
    if query.trim().is_empty() {
        println!("No results.");
        return Ok(());
    }

    let mut session = open_session(config)?;
    let k = k.unwrap_or(config.retrieval.k);
    let results = session.search(query, k, scope).await?;

    if results.is_empty() {
        println!("No results.");
        return Ok(());
    }

    for (i, r) in results.iter().enumerate() {
        println!(
            "{}. [{:.4}] {} (part {}, keyword rank {}, vector rank {})",
            i + 1,
            r.score,
            r.chunk.source,
            r.chunk.chunk_index + 1,
            rank_label(r.keyword_rank),
            rank_label(r.vector_rank),
        );
        println!("    {}", snippet(&r.chunk.text, 200));
        println!();
    }
    Ok(())
}

fn rank_label(rank: Option<usize>) -> String {
    rank.map(|r| r.to_string()).unwrap_or_else(|| "-".to_string())
}

fn snippet(text: &str, max_chars: usize) -> String {
    let flat: String = text.split_whitespace().collect::<Vec<_>>().join(" ");
    if flat.chars().count() <= max_chars {
        flat
    } else {
        let cut: String = flat.chars().take(max_chars).collect();
        format!("{}...", cut)
    }
}

pub async fn run_ask(config: &Config, question: &str, scope: &[String]) -> Result<()> {
    let mut session = open_session(config)?;
    let answer = session.ask(question, scope).await?;

    println!("{}", answer.text);
    if !answer.sources.is_empty() {
        println!();
        println!("Sources:");
        for s in &answer.sources {
            println!("  - {} ({}) [{:.4}]", s.filename, s.chunk_id, s.score);
        }
    }
    Ok(())
}

pub async fn run_clear(config: &Config) -> Result<()> {
    let mut session = open_offline(config)?;
    let count = session.clear_all().await?;
    println!("Removed {} documents and the vector index.", count);
    Ok(())
}

pub async fn run_clear_cache(config: &Config) -> Result<()> {
    let mut session = open_offline(config)?;
    session.clear_cache().await?;
    println!("Vector index cache cleared.");
    Ok(())
}

pub fn run_history_show(config: &Config) -> Result<()> {
    let session = open_offline(config)?;
    let memory = session.history();
    if memory.is_empty() {
        println!("No chat history.");
        return Ok(());
    }
    for (i, (question, answer)) in memory.exchanges().into_iter().enumerate() {
        println!(
            "#{} {} ({}): {}",
            i,
            question.speaker.label(),
            question.timestamp.format("%Y-%m-%d %H:%M:%S"),
            question.text
        );
        if let Some(a) = answer {
            println!(
                "   {} ({}): {}",
                a.speaker.label(),
                a.timestamp.format("%Y-%m-%d %H:%M:%S"),
                a.text
            );
        }
        println!();
    }
    Ok(())
}

pub fn run_history_export(config: &Config) -> Result<()> {
    let session = open_offline(config)?;
    let path = session.export_history()?;
    println!(
        "Exported {} turns to {}",
        session.history().len(),
        path.display()
    );
    Ok(())
}

pub fn run_history_clear(config: &Config) -> Result<()> {
    let mut session = open_offline(config)?;
    session.clear_history()?;
    println!("Chat history cleared.");
    Ok(())
}

pub fn run_history_delete(config: &Config, index: usize) -> Result<()> {
    let mut session = open_offline(config)?;
    if !session.delete_exchange(index)? {
        bail!("No exchange #{} in chat history", index);
    }
    println!("Deleted exchange #{}.", index);
    Ok(())
}

pub fn run_feedback(config: &Config, vote: Vote) -> Result<()> {
    let session = open_offline(config)?;
    if session.history().last_exchange().is_none() {
        bail!("No answer in chat history to give feedback on");
    }
    session.record_feedback(vote)?;
    println!("Feedback recorded.");
    Ok(())
}
