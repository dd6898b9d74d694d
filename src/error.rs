//! Error kinds surfaced by the ingestion, indexing, and answering pipeline.
//!
//! Per-document errors ([`Error::UnsupportedFormat`], [`Error::ParseFailure`])
//! are collected into a batch report and never abort a batch. The remaining
//! kinds abort only the operation that raised them.

use std::path::PathBuf;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("unsupported format for '{filename}' (extension: {extension:?})")]
    UnsupportedFormat {
        filename: String,
        extension: Option<String>,
    },

    #[error("failed to parse '{filename}': {reason}")]
    ParseFailure { filename: String, reason: String },

    #[error("vector index rebuild failed: {0}")]
    IndexRebuildFailure(String),

    #[error("generation failed: {0}")]
    GenerationFailure(String),

    #[error("storage failure at {}: {source}", path.display())]
    StorageFailure {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid input: {0}")]
    InvalidInput(String),
}

impl Error {
    pub(crate) fn storage(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Error::StorageFailure {
            path: path.into(),
            source,
        }
    }

    /// True for errors that only affect one document of a batch.
    pub fn is_per_document(&self) -> bool {
        matches!(
            self,
            Error::UnsupportedFormat { .. } | Error::ParseFailure { .. }
        )
    }
}
