//! Deterministic sliding-window text chunking
//!
//! Documents are split into overlapping windows measured in characters
//! (Unicode scalar values), sliced on char boundaries. The same text and
//! parameters always produce the same chunks.

use crate::config::ChunkConfig;
use crate::error::{Error, Result};

/// Validated chunking parameters.
///
/// Construction rejects parameter combinations that would make the window
/// recurrence loop forever or produce empty windows.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkParams {
    max_chars: usize,
    overlap: usize,
}

impl ChunkParams {
    /// Create parameters, rejecting `max_chars == 0` and `overlap >= max_chars`.
    pub fn new(max_chars: usize, overlap: usize) -> Result<Self> {
        if max_chars == 0 {
            return Err(Error::Validation("max_chars must be > 0".to_string()));
        }
        if overlap >= max_chars {
            return Err(Error::Validation(format!(
                "overlap ({overlap}) must be < max_chars ({max_chars})"
            )));
        }
        Ok(Self { max_chars, overlap })
    }

    pub fn max_chars(&self) -> usize {
        self.max_chars
    }

    pub fn overlap(&self) -> usize {
        self.overlap
    }
}

impl TryFrom<&ChunkConfig> for ChunkParams {
    type Error = Error;

    fn try_from(config: &ChunkConfig) -> Result<Self> {
        Self::new(config.max_chars, config.overlap_chars)
    }
}

/// Split `text` into overlapping windows.
///
/// The first window covers `[0, max_chars)`; each next window starts at
/// `previous_end - overlap` and ends at `min(start + max_chars, len)`. The
/// loop stops once a window reaches the end of the text. Empty text yields
/// zero chunks; text no longer than `max_chars` yields exactly one.
pub fn chunk(text: &str, params: &ChunkParams) -> Vec<String> {
    // Byte offset of every char boundary, with the text length as sentinel,
    // so windows counted in chars can be sliced without scanning.
    let mut boundaries: Vec<usize> = text.char_indices().map(|(i, _)| i).collect();
    boundaries.push(text.len());

    let char_count = boundaries.len() - 1;
    if char_count == 0 {
        return Vec::new();
    }

    let mut chunks = Vec::new();
    let mut start = 0usize;
    loop {
        let end = usize::min(start + params.max_chars, char_count);
        chunks.push(text[boundaries[start]..boundaries[end]].to_string());
        if end == char_count {
            break;
        }
        // overlap < max_chars guarantees this advances past `start`
        start = end - params.overlap;
    }

    chunks
}
