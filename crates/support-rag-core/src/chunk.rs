//! Sliding-window text chunker with a fixed overlap.
//!
//! Splits a source document into [`DocumentChunk`]s of at most
//! `chunk_chars` characters. Consecutive chunks share exactly
//! `overlap_chars` characters so that a sentence cut at one boundary is
//! still whole in the neighbouring chunk.
//!
//! Each chunk receives a deterministic UUID derived from its document name
//! and index, plus a SHA-256 hash of its text for staleness detection in
//! the ingestion pipeline.
//!
//! # Algorithm
//!
//! 1. Measure the document in Unicode scalar values.
//! 2. Take a window of `chunk_chars` characters starting at `start`.
//! 3. If the window does not reach the end of the document, pull its end
//!    back to just after the last whitespace in the window's second half
//!    (and beyond the overlap), so words are not cut.
//! 4. Emit the window, then start the next one `overlap_chars` characters
//!    before the end of the current one.
//! 5. Whitespace-only documents produce no chunks.
//!
//! # Example
//!
//! ```rust
//! use support_rag_core::chunk::{chunk_text, ChunkingParams};
//!
//! let params = ChunkingParams::new(300, 100);
//! let chunks = chunk_text("policies.txt", "Returns accepted within 30 days.", &params);
//! assert_eq!(chunks.len(), 1);
//! assert_eq!(chunks[0].chunk_index, 0);
//! ```

use sha2::{Digest, Sha256};
use uuid::Uuid;

use crate::models::{DocumentChunk, SourceDocument};

/// Window size and overlap, both in characters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkingParams {
    pub chunk_chars: usize,
    pub overlap_chars: usize,
}

impl ChunkingParams {
    pub fn new(chunk_chars: usize, overlap_chars: usize) -> Self {
        Self {
            chunk_chars,
            overlap_chars,
        }
    }
}

impl Default for ChunkingParams {
    fn default() -> Self {
        Self::new(300, 100)
    }
}

/// Chunk a whole [`SourceDocument`].
pub fn chunk_document(doc: &SourceDocument, params: &ChunkingParams) -> Vec<DocumentChunk> {
    chunk_text(&doc.name, &doc.text, params)
}

/// Split `text` into overlapping windows.
///
/// # Guarantees
///
/// - Chunk indices are contiguous: `0, 1, 2, …, N-1`.
/// - `text[chunk.char_span] == chunk.text` for every chunk.
/// - Consecutive chunks overlap by exactly `overlap_chars` characters.
/// - Identical input always yields identical chunks (ids included).
pub fn chunk_text(
    source_document: &str,
    text: &str,
    params: &ChunkingParams,
) -> Vec<DocumentChunk> {
    if text.trim().is_empty() {
        return Vec::new();
    }

    let size = params.chunk_chars.max(1);
    let overlap = params.overlap_chars.min(size - 1);

    // Byte offset of every char, plus the end of the string as a sentinel.
    let mut offsets: Vec<usize> = text.char_indices().map(|(i, _)| i).collect();
    let total = offsets.len();
    offsets.push(text.len());
    let chars: Vec<char> = text.chars().collect();

    let mut chunks = Vec::new();
    let mut start = 0usize;

    loop {
        let mut end = (start + size).min(total);

        if end < total {
            let floor = start + (size / 2).max(overlap + 1);
            if let Some(ws) = (floor..end).rev().find(|&i| chars[i].is_whitespace()) {
                end = ws + 1;
            }
        }

        let span = offsets[start]..offsets[end];
        let piece = &text[span.clone()];
        if !piece.trim().is_empty() {
            chunks.push(make_chunk(source_document, chunks.len(), piece, span));
        }

        if end >= total {
            break;
        }
        start = end.saturating_sub(overlap).max(start + 1);
    }

    chunks
}

/// Deterministic chunk id for `(source_document, chunk_index)`.
pub fn chunk_id(source_document: &str, chunk_index: usize) -> String {
    let name = format!("{}#{}", source_document, chunk_index);
    Uuid::new_v5(&Uuid::NAMESPACE_OID, name.as_bytes()).to_string()
}

/// SHA-256 of a chunk's text, hex encoded.
pub fn content_hash(text: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(text.as_bytes());
    format!("{:x}", hasher.finalize())
}

fn make_chunk(
    source_document: &str,
    index: usize,
    text: &str,
    span: std::ops::Range<usize>,
) -> DocumentChunk {
    DocumentChunk {
        id: chunk_id(source_document, index),
        source_document: source_document.to_string(),
        chunk_index: index,
        text: text.to_string(),
        char_span: span,
        content_hash: content_hash(text),
    }
}
