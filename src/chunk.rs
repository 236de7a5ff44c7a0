//! Sliding-window text chunker.
//!
//! Splits each extractor section into overlapping windows of approximately
//! `tokens` words. Token counts use a word heuristic rather than a model
//! tokenizer; what matters is that window sizes are consistent across chunk
//! boundaries, not that they match the embedding model exactly.
//!
//! Sections never share a chunk, so every chunk maps back to exactly one
//! locator (`section-N` / `page-N`). Sections shorter than
//! [`MIN_SECTION_WORDS`] are dropped as boilerplate, but still count toward
//! locator numbering so locators stay aligned with the source document.

use serde::Deserialize;

use crate::models::Chunk;

/// Sections with fewer words than this are not indexed.
pub const MIN_SECTION_WORDS: usize = 6;

/// Window size and overlap, in approximate tokens (words).
#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq)]
pub struct ChunkingParams {
    pub tokens: usize,
    #[serde(default)]
    pub overlap: usize,
}

impl ChunkingParams {
    pub const fn new(tokens: usize, overlap: usize) -> Self {
        Self { tokens, overlap }
    }

    /// Window advance. Falls back to half a window when the overlap would
    /// stall or reverse the window.
    pub fn stride(&self) -> usize {
        let size = self.tokens.max(1);
        if self.overlap < size {
            size - self.overlap
        } else {
            (size / 2).max(1)
        }
    }
}

/// Approximate token count: runs of word characters plus each standalone
/// punctuation mark. Never returns 0.
pub fn approx_token_count(text: &str) -> usize {
    let mut count = 0;
    let mut in_word = false;
    for c in text.chars() {
        if c.is_alphanumeric() || c == '_' {
            if !in_word {
                count += 1;
                in_word = true;
            }
        } else {
            in_word = false;
            if !c.is_whitespace() {
                count += 1;
            }
        }
    }
    count.max(1)
}

/// Chunk ordered sections of one document.
///
/// `label` is the locator prefix (`"section"` or `"page"`); locators are
/// 1-based positions in `sections`.
pub fn chunk_sections(
    source_path: &str,
    sections: &[String],
    params: ChunkingParams,
    label: &str,
) -> Vec<Chunk> {
    let mut chunks = Vec::new();
    for (idx, section) in sections.iter().enumerate() {
        let words: Vec<&str> = section.split_whitespace().collect();
        if words.len() < MIN_SECTION_WORDS {
            continue;
        }
        let locator = format!("{}-{}", label, idx + 1);
        for (local_index, text) in split_windows(&words, params).into_iter().enumerate() {
            chunks.push(Chunk {
                text,
                source_path: source_path.to_string(),
                locator: locator.clone(),
                local_index,
            });
        }
    }
    chunks
}

fn split_windows(words: &[&str], params: ChunkingParams) -> Vec<String> {
    let size = params.tokens.max(1);
    let stride = params.stride();
    let mut windows = Vec::new();
    let mut start = 0;
    while start < words.len() {
        let end = (start + size).min(words.len());
        windows.push(words[start..end].join(" "));
        if end == words.len() {
            break;
        }
        start += stride;
    }
    windows
}
