//! Text normalization applied to every extracted document body.

/// Strip control characters and decoding debris from extracted text.
///
/// Removes C0 (`U+0000..=U+001F`) and C1 (`U+007F..=U+009F`) control
/// characters except `\n` and `\t`, which carry paragraph and column
/// structure that the chunker relies on. Also removes `U+FFFD`, which is what
/// lossy decoding leaves behind for malformed input such as lone surrogates.
pub fn clean_text(text: &str) -> String {
    text.chars().filter(|&c| keep_char(c)).collect()
}

fn keep_char(c: char) -> bool {
    match c {
        '\n' | '\t' => true,
        '\u{0000}'..='\u{001F}' | '\u{007F}'..='\u{009F}' => false,
        '\u{FFFD}' => false,
        _ => true,
    }
}
