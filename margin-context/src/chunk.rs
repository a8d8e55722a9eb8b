//! Boundary-aware splitting of long text into overlapping chunks.
//!
//! Embedding models accept a bounded amount of input, so long notes and
//! meeting transcripts are split into windows before they are embedded. Sizes
//! are expressed in tokens and approximated as four characters per token.
//!
//! Each window prefers to end on a natural boundary that lies in its second
//! half: first a paragraph break (`"\n\n"`), then a sentence break (`". "`),
//! and only then the raw window edge. Consecutive windows overlap so that text
//! sitting on a boundary is still seen whole by at least one chunk.
//!
//! ```
//! use margin_context::chunk::{ChunkOptions, chunk};
//!
//! let options = ChunkOptions::default();
//! assert_eq!(chunk("A short note.", &options), vec!["A short note.".to_string()]);
//! assert!(chunk("   ", &options).is_empty());
//!
//! let long_text = "Quarterly planning covered hiring and budget. ".repeat(60);
//! let chunks = chunk(&long_text, &options);
//! assert!(chunks.len() > 1);
//! assert!(chunks.iter().all(|c| c.chars().count() >= options.min_chunk_size));
//! ```

use serde::{Deserialize, Serialize};

/// Characters assumed per model token.
pub const CHARS_PER_TOKEN: usize = 4;

const PARAGRAPH_BREAK: [char; 2] = ['\n', '\n'];
const SENTENCE_BREAK: [char; 2] = ['.', ' '];

/// Sizing parameters for [`chunk`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChunkOptions {
    /// Maximum window size in tokens.
    pub max_tokens: usize,
    /// Tokens shared between consecutive windows.
    pub overlap_tokens: usize,
    /// Chunks shorter than this many characters (after trimming) are dropped.
    pub min_chunk_size: usize,
}

impl Default for ChunkOptions {
    fn default() -> Self {
        Self {
            max_tokens: 256,
            overlap_tokens: 32,
            min_chunk_size: 50,
        }
    }
}

impl ChunkOptions {
    pub fn new(max_tokens: usize, overlap_tokens: usize, min_chunk_size: usize) -> Self {
        Self {
            max_tokens,
            overlap_tokens,
            min_chunk_size,
        }
    }

    /// Window size in characters, never zero.
    pub fn max_chars(&self) -> usize {
        (self.max_tokens * CHARS_PER_TOKEN).max(1)
    }

    pub fn overlap_chars(&self) -> usize {
        self.overlap_tokens * CHARS_PER_TOKEN
    }
}

/// Splits `text` into overlapping, boundary-aware chunks.
///
/// Text that fits in a single window comes back unchanged as a one-element
/// vector. Empty or whitespace-only text yields no chunks. Otherwise every
/// returned chunk is trimmed and at least `min_chunk_size` characters long,
/// which may leave fewer chunks than windows walked.
pub fn chunk(text: &str, options: &ChunkOptions) -> Vec<String> {
    if text.trim().is_empty() {
        return Vec::new();
    }

    let chars: Vec<char> = text.chars().collect();
    let max_chars = options.max_chars();
    if chars.len() <= max_chars {
        return vec![text.to_string()];
    }

    let overlap = options.overlap_chars();
    let mut chunks = Vec::new();
    let mut start = 0;

    while start < chars.len() {
        let mut end = (start + max_chars).min(chars.len());
        if end < chars.len() {
            end = start + window_end(&chars[start..end]);
        }

        let piece: String = chars[start..end].iter().collect();
        let trimmed = piece.trim();
        if trimmed.chars().count() >= options.min_chunk_size {
            chunks.push(trimmed.to_string());
        }

        if end >= chars.len() {
            break;
        }

        // Step back by the overlap, but always make forward progress.
        let next = end.saturating_sub(overlap);
        start = if next > start { next } else { end };
    }

    chunks
}

/// Offset at which a full window should end.
fn window_end(window: &[char]) -> usize {
    let midpoint = window.len() / 2;

    if let Some(pos) = last_at_or_after(window, &PARAGRAPH_BREAK, midpoint) {
        return pos;
    }
    if let Some(pos) = last_at_or_after(window, &SENTENCE_BREAK, midpoint) {
        // Keep the period with its sentence.
        return pos + 1;
    }
    window.len()
}

fn last_at_or_after(window: &[char], pattern: &[char], min_pos: usize) -> Option<usize> {
    window
        .windows(pattern.len())
        .rposition(|candidate| candidate == pattern)
        .filter(|&pos| pos >= min_pos && pos > 0)
}
