//! Okapi BM25 keyword index over chunk text.
//!
//! Rebuilt from the current chunk set whenever the corpus changes; building
//! is cheap and purely in-memory, so it is never persisted.

use std::collections::{HashMap, HashSet};

use crate::models::Chunk;

const K1: f64 = 1.5;
const B: f64 = 0.75;

/// Lowercased alphanumeric terms of `text`.
pub fn tokenize(text: &str) -> Vec<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(|t| t.to_lowercase())
        .collect()
}

#[derive(Debug, Clone, Default)]
pub struct LexicalIndex {
    chunk_ids: Vec<String>,
    term_freqs: Vec<HashMap<String, usize>>,
    lengths: Vec<usize>,
    avg_length: f64,
    doc_freq: HashMap<String, usize>,
}

impl LexicalIndex {
    pub fn build(chunks: &[Chunk]) -> Self {
        let mut chunk_ids = Vec::with_capacity(chunks.len());
        let mut term_freqs = Vec::with_capacity(chunks.len());
        let mut lengths = Vec::with_capacity(chunks.len());
        let mut doc_freq: HashMap<String, usize> = HashMap::new();

        for chunk in chunks {
            let tokens = tokenize(&chunk.text);
            let mut tf: HashMap<String, usize> = HashMap::new();
            for token in &tokens {
                *tf.entry(token.clone()).or_insert(0) += 1;
            }
            for term in tf.keys() {
                *doc_freq.entry(term.clone()).or_insert(0) += 1;
            }
            chunk_ids.push(chunk.id.clone());
            term_freqs.push(tf);
            lengths.push(tokens.len());
        }

        let avg_length = if chunks.is_empty() {
            0.0
        } else {
            lengths.iter().sum::<usize>() as f64 / chunks.len() as f64
        };

        Self {
            chunk_ids,
            term_freqs,
            lengths,
            avg_length,
            doc_freq,
        }
    }

    pub fn len(&self) -> usize {
        self.chunk_ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.chunk_ids.is_empty()
    }

    fn score(&self, idx: usize, terms: &[String]) -> f64 {
        let n = self.chunk_ids.len() as f64;
        let len = self.lengths[idx] as f64;
        let tf_map = &self.term_freqs[idx];

        let mut score = 0.0;
        for term in terms {
            let tf = *tf_map.get(term).unwrap_or(&0) as f64;
            let df = *self.doc_freq.get(term).unwrap_or(&0) as f64;
            if tf == 0.0 || df == 0.0 {
                continue;
            }
            let idf = ((n - df + 0.5) / (df + 0.5) + 1.0).ln();
            let norm = if self.avg_length > 0.0 {
                len / self.avg_length
            } else {
                1.0
            };
            score += idf * (tf * (K1 + 1.0)) / (tf + K1 * (1.0 - B + B * norm));
        }
        score
    }

    /// Top `k` chunk ids with a positive score, best first.
    ///
    /// Equal scores are ordered by chunk id. When `allowed` is given, only
    /// those chunk ids are considered.
    pub fn search(
        &self,
        query: &str,
        k: usize,
        allowed: Option<&HashSet<String>>,
    ) -> Vec<(String, f64)> {
        let mut terms = tokenize(query);
        terms.sort();
        terms.dedup();
        if terms.is_empty() || k == 0 {
            return Vec::new();
        }

        let mut scored: Vec<(String, f64)> = self
            .chunk_ids
            .iter()
            .enumerate()
            .filter(|(_, id)| allowed.map_or(true, |set| set.contains(*id)))
            .map(|(i, id)| (id.clone(), self.score(i, &terms)))
            .filter(|(_, s)| *s > 0.0)
            .collect();

        scored.sort_by(|a, b| b.1.total_cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
        scored.truncate(k);
        scored
    }
}
