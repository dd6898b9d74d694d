//! Boundary-aware overlapping text chunker.
//!
//! Splits normalized document text into [`Chunk`]s of at most `max_chars`
//! characters. Each chunk after the first starts exactly `overlap` characters
//! before the previous chunk ended, so dropping the first `overlap`
//! characters of every chunk but the first and concatenating reconstructs the
//! input exactly.
//!
//! # Algorithm
//!
//! 1. If the remaining text fits in `max_chars`, emit it and stop.
//! 2. Otherwise look for a cut point inside the look-back window (the second
//!    half of the `max_chars` window), preferring in order: paragraph break
//!    (`\n\n`), sentence end (`.`, `!`, `?` followed by whitespace), line
//!    break, then a space.
//! 3. If no boundary is found, hard-cut at `max_chars`.
//! 4. The next chunk starts `overlap` characters before the cut.
//!
//! Lengths and offsets are counted in `char`s, so a cut never lands inside a
//! multi-byte code point.
//!
//! # Example
//!
//! ```rust
//! use docqa::chunk::split;
//!
//! let chunks = split("abc123", "notes.txt", "Hello world.\n\nSecond paragraph.", 1500, 100);
//! assert_eq!(chunks.len(), 1);
//! assert_eq!(chunks[0].chunk_index, 0);
//! assert_eq!(chunks[0].id, "abc123-000000");
//! ```

use crate::models::Chunk;

/// Split text into overlapping chunks.
///
/// `overlap` is clamped below `max_chars`; a `max_chars` of zero is treated
/// as one. Empty text yields no chunks. The same inputs always yield the same
/// chunks.
pub fn split(
    document_hash: &str,
    source: &str,
    text: &str,
    max_chars: usize,
    overlap: usize,
) -> Vec<Chunk> {
    if text.is_empty() {
        return Vec::new();
    }

    let max_chars = max_chars.max(1);
    let overlap = overlap.min(max_chars - 1);
    let chars: Vec<char> = text.chars().collect();
    let n = chars.len();

    let mut chunks = Vec::new();
    let mut start = 0usize;

    loop {
        if n - start <= max_chars {
            chunks.push(make_chunk(document_hash, source, chunks.len(), start, &chars[start..]));
            break;
        }

        let hard_end = start + max_chars;
        let end = find_boundary(&chars, start, hard_end, max_chars, overlap).unwrap_or(hard_end);
        chunks.push(make_chunk(
            document_hash,
            source,
            chunks.len(),
            start,
            &chars[start..end],
        ));
        start = end - overlap;
    }

    chunks
}

/// Find the largest cut point in the look-back window, by boundary priority.
///
/// The returned end is exclusive and always leaves the next chunk starting
/// after `start`, so the loop makes progress.
fn find_boundary(
    chars: &[char],
    start: usize,
    hard_end: usize,
    max_chars: usize,
    overlap: usize,
) -> Option<usize> {
    let min_end = (start + max_chars / 2).max(start + overlap + 1);
    if min_end > hard_end {
        return None;
    }

    let paragraph = |e: usize| e >= start + 2 && chars[e - 2] == '\n' && chars[e - 1] == '\n';
    let sentence = |e: usize| {
        e >= start + 2 && chars[e - 1].is_whitespace() && matches!(chars[e - 2], '.' | '!' | '?')
    };
    let line = |e: usize| chars[e - 1] == '\n';
    let word = |e: usize| chars[e - 1] == ' ' || chars[e - 1] == '\t';

    let rules: [&dyn Fn(usize) -> bool; 4] = [&paragraph, &sentence, &line, &word];
    rules
        .iter()
        .find_map(|rule| (min_end..=hard_end).rev().find(|&e| rule(e)))
}

fn make_chunk(document_hash: &str, source: &str, index: usize, offset: usize, span: &[char]) -> Chunk {
    Chunk {
        id: Chunk::make_id(document_hash, index),
        document_hash: document_hash.to_string(),
        source: source.to_string(),
        chunk_index: index,
        char_offset: offset,
        text: span.iter().collect(),
    }
}
