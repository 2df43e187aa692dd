//! In-memory [`VectorStore`] implementation for tests and ephemeral use.
//!
//! Records live in a `HashMap` behind a `std::sync::RwLock`, so searches
//! proceed in parallel and block only while an upsert holds the write
//! lock. Search is brute-force cosine similarity over all vectors.

use std::collections::{HashMap, HashSet};
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use anyhow::{anyhow, Result};
use async_trait::async_trait;

use crate::embedding::cosine_similarity;
use crate::models::{ChunkKey, RecordMetadata, ScoredChunk, VectorRecord};

use super::{rank_candidates, StoreStats, VectorStore};

struct StoredRecord {
    seq: u64,
    record: VectorRecord,
}

#[derive(Default)]
struct Inner {
    records: HashMap<ChunkKey, StoredRecord>,
    next_seq: u64,
}

/// In-memory vector store.
#[derive(Default)]
pub struct InMemoryVectorStore {
    inner: RwLock<Inner>,
}

impl InMemoryVectorStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, Inner>> {
        self.inner
            .read()
            .map_err(|_| anyhow!("vector store lock poisoned"))
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, Inner>> {
        self.inner
            .write()
            .map_err(|_| anyhow!("vector store lock poisoned"))
    }
}

#[async_trait]
impl VectorStore for InMemoryVectorStore {
    async fn upsert(&self, record: VectorRecord) -> Result<()> {
        let mut inner = self.write()?;
        let key = record.chunk.key();
        match inner.records.get_mut(&key) {
            Some(existing) => existing.record = record,
            None => {
                let seq = inner.next_seq;
                inner.next_seq += 1;
                inner.records.insert(key, StoredRecord { seq, record });
            }
        }
        Ok(())
    }

    async fn search(&self, query_vec: &[f32], k: usize) -> Result<Vec<ScoredChunk>> {
        let inner = self.read()?;
        let candidates = inner
            .records
            .values()
            .map(|stored| {
                let score = cosine_similarity(query_vec, &stored.record.embedding);
                (
                    stored.seq,
                    ScoredChunk {
                        chunk: stored.record.chunk.clone(),
                        score,
                    },
                )
            })
            .collect();
        Ok(rank_candidates(candidates, k))
    }

    async fn stored_metadata(&self, key: &ChunkKey) -> Result<Option<RecordMetadata>> {
        let inner = self.read()?;
        Ok(inner.records.get(key).map(|s| s.record.metadata.clone()))
    }

    async fn prune_document(&self, source_document: &str, keep_below: usize) -> Result<usize> {
        let mut inner = self.write()?;
        let before = inner.records.len();
        inner.records.retain(|key, _| {
            key.source_document != source_document || key.chunk_index < keep_below
        });
        Ok(before - inner.records.len())
    }

    async fn stats(&self) -> Result<StoreStats> {
        let inner = self.read()?;
        let documents: HashSet<&str> = inner
            .records
            .keys()
            .map(|k| k.source_document.as_str())
            .collect();
        Ok(StoreStats {
            records: inner.records.len(),
            documents: documents.len(),
        })
    }
}
