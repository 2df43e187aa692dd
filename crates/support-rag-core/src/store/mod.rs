//! Vector store abstraction.
//!
//! The [`VectorStore`] trait is the only way the pipeline touches indexed
//! state. Records are keyed by `(source_document, chunk_index)`; upserting
//! an existing key overwrites it in place and keeps its original insertion
//! position, so ranking stays deterministic across re-ingestion.
//!
//! Implementations must be `Send + Sync` and must isolate concurrent
//! `search` calls from a running ingestion themselves; callers never lock.

pub mod memory;

use anyhow::Result;
use async_trait::async_trait;
use serde::Serialize;

use crate::models::{ChunkKey, RecordMetadata, ScoredChunk, VectorRecord};

/// Record and document counts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StoreStats {
    pub records: usize,
    pub documents: usize,
}

/// Abstract vector index.
///
/// | Method | Purpose |
/// |--------|---------|
/// | [`upsert`](VectorStore::upsert) | Insert or overwrite one record |
/// | [`search`](VectorStore::search) | Cosine top-k, descending, ties by insertion order |
/// | [`stored_metadata`](VectorStore::stored_metadata) | Hash and model of a stored record |
/// | [`prune_document`](VectorStore::prune_document) | Drop superseded chunks of a document |
/// | [`stats`](VectorStore::stats) | Record and document counts |
#[async_trait]
pub trait VectorStore: Send + Sync {
    /// Insert a record, or overwrite the record with the same key.
    async fn upsert(&self, record: VectorRecord) -> Result<()>;

    /// Return at most `k` chunks ordered by cosine similarity, descending.
    async fn search(&self, query_vec: &[f32], k: usize) -> Result<Vec<ScoredChunk>>;

    /// Metadata of the record stored under `key`, if any.
    async fn stored_metadata(&self, key: &ChunkKey) -> Result<Option<RecordMetadata>>;

    /// Delete records of `source_document` whose index is `>= keep_below`.
    ///
    /// Returns the number of records removed.
    async fn prune_document(&self, source_document: &str, keep_below: usize) -> Result<usize>;

    async fn stats(&self) -> Result<StoreStats>;
}

/// Order candidates by score (descending), breaking ties by insertion
/// sequence (ascending), and keep the first `k`.
///
/// Shared by every store implementation so they rank identically.
pub fn rank_candidates(mut candidates: Vec<(u64, ScoredChunk)>, k: usize) -> Vec<ScoredChunk> {
    candidates.sort_by(|(seq_a, a), (seq_b, b)| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then(seq_a.cmp(seq_b))
    });
    candidates.truncate(k);
    candidates.into_iter().map(|(_, hit)| hit).collect()
}
