//! Core data models used throughout the support chatbot.
//!
//! These types represent the source documents, chunks, vector records,
//! retrieval results, and conversation turns that flow through the
//! ingestion and query pipelines.

use std::ops::Range;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A named raw-text document from the corpus.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceDocument {
    /// Stable document name (root-relative path for filesystem corpora).
    pub name: String,
    pub text: String,
}

impl SourceDocument {
    pub fn new(name: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            text: text.into(),
        }
    }
}

/// Identity of a chunk inside the vector store: `(source_document, chunk_index)`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ChunkKey {
    pub source_document: String,
    pub chunk_index: usize,
}

impl ChunkKey {
    pub fn new(source_document: impl Into<String>, chunk_index: usize) -> Self {
        Self {
            source_document: source_document.into(),
            chunk_index,
        }
    }
}

/// A contiguous slice of a source document, the unit of retrieval.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocumentChunk {
    /// Deterministic UUID derived from `(source_document, chunk_index)`.
    pub id: String,
    pub source_document: String,
    pub chunk_index: usize,
    pub text: String,
    /// Byte range of `text` inside the source document.
    pub char_span: Range<usize>,
    /// SHA-256 of `text`, used to skip re-embedding unchanged chunks.
    pub content_hash: String,
}

impl DocumentChunk {
    pub fn key(&self) -> ChunkKey {
        ChunkKey::new(self.source_document.clone(), self.chunk_index)
    }
}

/// Bookkeeping stored alongside every vector.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordMetadata {
    /// Embedding model that produced the vector.
    pub model: String,
    pub content_hash: String,
}

/// One embedded chunk as held by the vector store.
#[derive(Debug, Clone)]
pub struct VectorRecord {
    pub chunk: DocumentChunk,
    pub embedding: Vec<f32>,
    pub metadata: RecordMetadata,
}

impl VectorRecord {
    pub fn new(chunk: DocumentChunk, embedding: Vec<f32>, model: &str) -> Self {
        let metadata = RecordMetadata {
            model: model.to_string(),
            content_hash: chunk.content_hash.clone(),
        };
        Self {
            chunk,
            embedding,
            metadata,
        }
    }
}

/// A chunk paired with its cosine similarity to the query.
#[derive(Debug, Clone, Serialize)]
pub struct ScoredChunk {
    pub chunk: DocumentChunk,
    pub score: f32,
}

/// Ranked output of a single retrieval, descending by score.
#[derive(Debug, Clone, Default, Serialize)]
pub struct RetrievalResult {
    pub hits: Vec<ScoredChunk>,
}

impl RetrievalResult {
    pub fn new(hits: Vec<ScoredChunk>) -> Self {
        Self { hits }
    }

    pub fn is_empty(&self) -> bool {
        self.hits.is_empty()
    }

    pub fn len(&self) -> usize {
        self.hits.len()
    }

    /// Hits scoring at least `min_similarity`, in rank order.
    pub fn relevant(&self, min_similarity: f32) -> impl Iterator<Item = &ScoredChunk> {
        self.hits.iter().filter(move |h| h.score >= min_similarity)
    }

    pub fn top_score(&self) -> Option<f32> {
        self.hits.first().map(|h| h.score)
    }
}

/// Who produced a turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Agent,
}

impl Role {
    pub fn label(&self) -> &'static str {
        match self {
            Role::User => "User",
            Role::Agent => "Agent",
        }
    }
}

/// One utterance in a conversation. Immutable once appended.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Turn {
    pub role: Role,
    pub text: String,
    pub timestamp: DateTime<Utc>,
}

impl Turn {
    pub fn user(text: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            text: text.into(),
            timestamp: Utc::now(),
        }
    }

    pub fn agent(text: impl Into<String>) -> Self {
        Self {
            role: Role::Agent,
            text: text.into(),
            timestamp: Utc::now(),
        }
    }
}
