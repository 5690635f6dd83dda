//! Sentence splitting for chunked replies.
//!
//! Replies go out one sentence at a time. A boundary is a letter followed
//! by `.`, `!` or `?` and whitespace, so "2.5" or "..." do not split.

use regex::Regex;
use std::sync::OnceLock;

fn boundary() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"[A-Za-z][.!?]\s+").unwrap())
}

/// Split text into trimmed, non-empty sentence chunks.
pub fn split_sentences(text: &str) -> Vec<String> {
    let mut parts = Vec::new();
    let mut last = 0;
    for m in boundary().find_iter(text) {
        // Keep the letter and its punctuation; both are ASCII so +2 is a
        // valid boundary.
        let cut = m.start() + 2;
        let part = text[last..cut].trim();
        if !part.is_empty() {
            parts.push(part.to_string());
        }
        last = m.end();
    }

    let tail = text[last..].trim();
    if !tail.is_empty() {
        parts.push(tail.to_string());
    }
    parts
}
