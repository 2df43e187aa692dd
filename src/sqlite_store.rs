//! SQLite-backed [`VectorStore`] implementation.
//!
//! Vectors are stored as little-endian f32 BLOBs in `vector_records` and
//! searched by brute-force cosine similarity. Concurrent readers and the
//! ingestion writer are isolated by SQLite itself (WAL journal).

use anyhow::Result;
use async_trait::async_trait;
use sqlx::{Row, SqlitePool};

use support_rag_core::embedding::{blob_to_vec, cosine_similarity, vec_to_blob};
use support_rag_core::models::{ChunkKey, DocumentChunk, RecordMetadata, ScoredChunk, VectorRecord};
use support_rag_core::store::{rank_candidates, StoreStats, VectorStore};

use crate::config::Config;
use crate::db;
use crate::migrate;

/// SQLite implementation of the [`VectorStore`] trait.
pub struct SqliteVectorStore {
    pool: SqlitePool,
}

impl SqliteVectorStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Connect to the configured database and make sure the schema exists.
    pub async fn open(config: &Config) -> Result<Self> {
        let pool = db::connect(config).await?;
        migrate::apply(&pool).await?;
        Ok(Self::new(pool))
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }
}

#[async_trait]
impl VectorStore for SqliteVectorStore {
    async fn upsert(&self, record: VectorRecord) -> Result<()> {
        let now = chrono::Utc::now().timestamp();
        let blob = vec_to_blob(&record.embedding);
        let chunk = &record.chunk;

        sqlx::query(
            r#"
            INSERT INTO vector_records (chunk_id, source_document, chunk_index, text,
                                        span_start, span_end, content_hash, model, dims,
                                        embedding, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(source_document, chunk_index) DO UPDATE SET
                chunk_id = excluded.chunk_id,
                text = excluded.text,
                span_start = excluded.span_start,
                span_end = excluded.span_end,
                content_hash = excluded.content_hash,
                model = excluded.model,
                dims = excluded.dims,
                embedding = excluded.embedding,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(&chunk.id)
        .bind(&chunk.source_document)
        .bind(chunk.chunk_index as i64)
        .bind(&chunk.text)
        .bind(chunk.char_span.start as i64)
        .bind(chunk.char_span.end as i64)
        .bind(&record.metadata.content_hash)
        .bind(&record.metadata.model)
        .bind(record.embedding.len() as i64)
        .bind(&blob)
        .bind(now)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn search(&self, query_vec: &[f32], k: usize) -> Result<Vec<ScoredChunk>> {
        let rows = sqlx::query(
            r#"
            SELECT seq, chunk_id, source_document, chunk_index, text,
                   span_start, span_end, content_hash, embedding
            FROM vector_records
            ORDER BY seq
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        let mut candidates = Vec::with_capacity(rows.len());
        for row in &rows {
            let seq: i64 = row.get("seq");
            let blob: Vec<u8> = row.get("embedding");
            let score = cosine_similarity(query_vec, &blob_to_vec(&blob));
            let span_start: i64 = row.get("span_start");
            let span_end: i64 = row.get("span_end");
            let chunk_index: i64 = row.get("chunk_index");

            let chunk = DocumentChunk {
                id: row.get("chunk_id"),
                source_document: row.get("source_document"),
                chunk_index: chunk_index as usize,
                text: row.get("text"),
                char_span: span_start as usize..span_end as usize,
                content_hash: row.get("content_hash"),
            };
            candidates.push((seq as u64, ScoredChunk { chunk, score }));
        }

        Ok(rank_candidates(candidates, k))
    }

    async fn stored_metadata(&self, key: &ChunkKey) -> Result<Option<RecordMetadata>> {
        let row = sqlx::query(
            "SELECT model, content_hash FROM vector_records WHERE source_document = ? AND chunk_index = ?",
        )
        .bind(&key.source_document)
        .bind(key.chunk_index as i64)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|r| RecordMetadata {
            model: r.get("model"),
            content_hash: r.get("content_hash"),
        }))
    }

    async fn prune_document(&self, source_document: &str, keep_below: usize) -> Result<usize> {
        let result =
            sqlx::query("DELETE FROM vector_records WHERE source_document = ? AND chunk_index >= ?")
                .bind(source_document)
                .bind(keep_below as i64)
                .execute(&self.pool)
                .await?;

        Ok(result.rows_affected() as usize)
    }

    async fn stats(&self) -> Result<StoreStats> {
        let row = sqlx::query(
            "SELECT COUNT(*) AS records, COUNT(DISTINCT source_document) AS documents FROM vector_records",
        )
        .fetch_one(&self.pool)
        .await?;

        let records: i64 = row.get("records");
        let documents: i64 = row.get("documents");
        Ok(StoreStats {
            records: records as usize,
            documents: documents as usize,
        })
    }
}
