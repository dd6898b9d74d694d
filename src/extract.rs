//! Extension-keyed parser registry.
//!
//! Each uploaded file is routed by its extension to a [`Parser`] that turns
//! raw bytes into plain UTF-8 text. The built-in registry handles `pdf`,
//! `txt`, and `csv`; more formats can be added with
//! [`ParserRegistry::register`] without touching the dispatch code.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use crate::error::{Error, Result};
use crate::models::DocumentKind;

/// Turns raw document bytes into text.
///
/// Errors are plain strings; the registry wraps them into
/// [`Error::ParseFailure`] with the filename attached.
pub trait Parser: Send + Sync {
    fn kind(&self) -> DocumentKind;
    fn parse(&self, bytes: &[u8]) -> std::result::Result<String, String>;
}

pub struct PdfParser;

impl Parser for PdfParser {
    fn kind(&self) -> DocumentKind {
        DocumentKind::Pdf
    }

    fn parse(&self, bytes: &[u8]) -> std::result::Result<String, String> {
        pdf_extract::extract_text_from_mem(bytes).map_err(|e| e.to_string())
    }
}

/// Plain text. Input must be valid UTF-8.
pub struct TextParser;

impl Parser for TextParser {
    fn kind(&self) -> DocumentKind {
        DocumentKind::Text
    }

    fn parse(&self, bytes: &[u8]) -> std::result::Result<String, String> {
        std::str::from_utf8(bytes)
            .map(str::to_string)
            .map_err(|e| format!("invalid UTF-8: {}", e))
    }
}

/// CSV with a header row. Each record becomes a `header: value` block, and
/// records are separated by blank lines so the chunker treats them as
/// paragraphs.
pub struct CsvParser;

impl Parser for CsvParser {
    fn kind(&self) -> DocumentKind {
        DocumentKind::Csv
    }

    fn parse(&self, bytes: &[u8]) -> std::result::Result<String, String> {
        let mut reader = csv::ReaderBuilder::new()
            .flexible(true)
            .from_reader(bytes);
        let headers = reader
            .headers()
            .map_err(|e| format!("CSV header error: {}", e))?
            .clone();

        let mut rows = Vec::new();
        for (i, record) in reader.records().enumerate() {
            let record = record.map_err(|e| format!("CSV row {} error: {}", i, e))?;
            let lines: Vec<String> = record
                .iter()
                .enumerate()
                .map(|(col, value)| match headers.get(col) {
                    Some(h) if !h.is_empty() => format!("{}: {}", h, value),
                    _ => value.to_string(),
                })
                .collect();
            rows.push(lines.join("\n"));
        }
        Ok(rows.join("\n\n"))
    }
}

/// Maps lowercase file extensions to parsers.
#[derive(Clone)]
pub struct ParserRegistry {
    parsers: HashMap<String, Arc<dyn Parser>>,
}

impl ParserRegistry {
    pub fn empty() -> Self {
        Self {
            parsers: HashMap::new(),
        }
    }

    /// Registry with the built-in `pdf`, `txt`, and `csv` parsers.
    pub fn with_defaults() -> Self {
        let mut registry = Self::empty();
        registry.register("pdf", Arc::new(PdfParser));
        registry.register("txt", Arc::new(TextParser));
        registry.register("csv", Arc::new(CsvParser));
        registry
    }

    /// Register (or replace) the parser for an extension.
    pub fn register(&mut self, extension: &str, parser: Arc<dyn Parser>) {
        self.parsers
            .insert(extension.trim_start_matches('.').to_lowercase(), parser);
    }

    pub fn extensions(&self) -> Vec<String> {
        let mut exts: Vec<String> = self.parsers.keys().cloned().collect();
        exts.sort();
        exts
    }

    /// Select the parser for a filename.
    pub fn resolve(&self, filename: &str) -> Result<Arc<dyn Parser>> {
        let extension = Path::new(filename)
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_lowercase());

        extension
            .as_ref()
            .and_then(|ext| self.parsers.get(ext))
            .cloned()
            .ok_or_else(|| Error::UnsupportedFormat {
                filename: filename.to_string(),
                extension,
            })
    }

    /// Resolve and run the parser for `filename`.
    pub fn extract(&self, filename: &str, bytes: &[u8]) -> Result<(DocumentKind, String)> {
        let parser = self.resolve(filename)?;
        let text = parser.parse(bytes).map_err(|reason| Error::ParseFailure {
            filename: filename.to_string(),
            reason,
        })?;
        Ok((parser.kind(), text))
    }
}

impl Default for ParserRegistry {
    fn default() -> Self {
        Self::with_defaults()
    }
}
