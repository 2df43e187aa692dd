//! Ingestion pipeline orchestration.
//!
//! Coordinates the offline flow: corpus → chunking → embedding → vector
//! store. Records are upserted by `(source_document, chunk_index)`, so
//! re-running ingestion over the same corpus overwrites records instead of
//! duplicating them. Chunks whose text and embedding model are unchanged
//! are skipped unless the re-embed policy is `always`.
//!
//! A chunk that cannot be embedded or stored is logged, recorded in the
//! [`IngestReport`], and skipped; it never aborts the run.

use anyhow::{bail, Result};
use serde::Serialize;
use tracing::{debug, info, warn};

use support_rag_core::chunk::{chunk_document, ChunkingParams};
use support_rag_core::error::PipelineError;
use support_rag_core::models::{DocumentChunk, SourceDocument, VectorRecord};
use support_rag_core::store::VectorStore;

use crate::collaborator::{CallPolicy, EmbeddingClient};
use crate::config::{Config, ReembedPolicy};
use crate::corpus;
use crate::embedding::create_embedder;
use crate::rate_limit::TokenBucket;
use crate::sqlite_store::SqliteVectorStore;

/// Tunables for one ingestion run.
#[derive(Debug, Clone, Copy)]
pub struct IngestOptions {
    pub chunking: ChunkingParams,
    pub reembed: ReembedPolicy,
    pub batch_size: usize,
}

impl IngestOptions {
    pub fn from_config(config: &Config) -> Self {
        Self {
            chunking: config.chunking.params(),
            reembed: config.ingest.reembed,
            batch_size: config.embedding.batch_size.max(1),
        }
    }
}

/// A chunk that was skipped because embedding or storing it failed.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChunkFailure {
    pub source_document: String,
    pub chunk_index: usize,
    pub reason: String,
}

impl ChunkFailure {
    fn new(chunk: &DocumentChunk, reason: impl Into<String>) -> Self {
        Self {
            source_document: chunk.source_document.clone(),
            chunk_index: chunk.chunk_index,
            reason: reason.into(),
        }
    }

    pub fn to_error(&self) -> PipelineError {
        PipelineError::IngestionChunkFailed {
            source_document: self.source_document.clone(),
            chunk_index: self.chunk_index,
            reason: self.reason.clone(),
        }
    }
}

/// Outcome of an ingestion run.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct IngestReport {
    pub documents: usize,
    pub chunks: usize,
    pub embedded: usize,
    pub skipped_unchanged: usize,
    pub pruned: usize,
    pub failures: Vec<ChunkFailure>,
}

impl IngestReport {
    pub fn is_complete(&self) -> bool {
        self.failures.is_empty()
    }
}

/// Ingest `documents` into `store`.
pub async fn ingest_documents(
    documents: &[SourceDocument],
    embedder: &EmbeddingClient<'_>,
    store: &dyn VectorStore,
    options: &IngestOptions,
) -> IngestReport {
    let mut report = IngestReport::default();
    let model = embedder.model_name().to_string();

    for doc in documents {
        let chunks = chunk_document(doc, &options.chunking);
        report.documents += 1;
        report.chunks += chunks.len();

        let pending = select_pending(&chunks, store, &model, options.reembed, &mut report).await;
        for batch in pending.chunks(options.batch_size) {
            embed_and_store(batch, embedder, store, &model, &mut report).await;
        }

        match store.prune_document(&doc.name, chunks.len()).await {
            Ok(0) => {}
            Ok(n) => {
                debug!(document = %doc.name, pruned = n, "removed superseded chunks");
                report.pruned += n;
            }
            Err(e) => warn!(document = %doc.name, error = %e, "failed to prune superseded chunks"),
        }

        info!(document = %doc.name, chunks = chunks.len(), "ingested document");
    }

    report
}

async fn select_pending<'c>(
    chunks: &'c [DocumentChunk],
    store: &dyn VectorStore,
    model: &str,
    reembed: ReembedPolicy,
    report: &mut IngestReport,
) -> Vec<&'c DocumentChunk> {
    if reembed == ReembedPolicy::Always {
        return chunks.iter().collect();
    }

    let mut pending = Vec::new();
    for chunk in chunks {
        match store.stored_metadata(&chunk.key()).await {
            Ok(Some(meta)) if meta.content_hash == chunk.content_hash && meta.model == model => {
                report.skipped_unchanged += 1;
            }
            Ok(_) => pending.push(chunk),
            Err(e) => {
                debug!(
                    source = %chunk.source_document,
                    chunk_index = chunk.chunk_index,
                    error = %e,
                    "metadata lookup failed, re-embedding"
                );
                pending.push(chunk);
            }
        }
    }
    pending
}

async fn embed_and_store(
    batch: &[&DocumentChunk],
    embedder: &EmbeddingClient<'_>,
    store: &dyn VectorStore,
    model: &str,
    report: &mut IngestReport,
) {
    let texts: Vec<String> = batch.iter().map(|c| c.text.clone()).collect();
    match embedder.embed(&texts).await {
        Ok(vectors) => {
            for (chunk, vector) in batch.iter().zip(vectors) {
                store_one(chunk, vector, store, model, report).await;
            }
        }
        Err(e) if batch.len() > 1 => {
            warn!(
                size = batch.len(),
                error = %e,
                "embedding batch failed, retrying chunk by chunk"
            );
            for chunk in batch {
                match embedder.embed(std::slice::from_ref(&chunk.text)).await {
                    Ok(mut vectors) => match vectors.pop() {
                        Some(vector) => store_one(chunk, vector, store, model, report).await,
                        None => record_failure(report, chunk, "embedder returned no vector"),
                    },
                    Err(e) => record_failure(report, chunk, e.to_string()),
                }
            }
        }
        Err(e) => record_failure(report, batch[0], e.to_string()),
    }
}

async fn store_one(
    chunk: &DocumentChunk,
    vector: Vec<f32>,
    store: &dyn VectorStore,
    model: &str,
    report: &mut IngestReport,
) {
    let record = VectorRecord::new(chunk.clone(), vector, model);
    match store.upsert(record).await {
        Ok(()) => report.embedded += 1,
        Err(e) => record_failure(report, chunk, format!("store: {e}")),
    }
}

fn record_failure(report: &mut IngestReport, chunk: &DocumentChunk, reason: impl Into<String>) {
    let failure = ChunkFailure::new(chunk, reason);
    warn!(error = %failure.to_error(), "skipping chunk");
    report.failures.push(failure);
}

/// `supportbot ingest`: load the corpus and ingest it into the SQLite store.
///
/// `full` re-embeds every chunk regardless of `[ingest] reembed`.
pub async fn run_ingest(config: &Config, full: bool) -> Result<IngestReport> {
    if !config.embedding.is_enabled() {
        bail!("Embedding provider is disabled. Set [embedding] provider in config.");
    }

    let documents = corpus::load_corpus(&config.corpus)?;
    let embedder = create_embedder(&config.embedding)?;
    let store = SqliteVectorStore::open(config).await?;
    let quota = TokenBucket::per_minute("embedding", config.embedding.requests_per_minute);
    let client = EmbeddingClient::new(
        embedder.as_ref(),
        &quota,
        CallPolicy::for_embedding(&config.embedding),
    );

    let mut options = IngestOptions::from_config(config);
    if full {
        options.reembed = ReembedPolicy::Always;
    }

    info!(documents = documents.len(), root = %config.corpus.root.display(), "starting ingestion");
    let report = ingest_documents(&documents, &client, &store, &options).await;
    store.close().await;

    println!("ingest");
    println!("  documents: {}", report.documents);
    println!("  chunks: {}", report.chunks);
    println!("  embedded: {}", report.embedded);
    println!("  unchanged (skipped): {}", report.skipped_unchanged);
    println!("  pruned: {}", report.pruned);
    println!("  failed: {}", report.failures.len());
    for failure in &report.failures {
        println!(
            "    {}#{}: {}",
            failure.source_document, failure.chunk_index, failure.reason
        );
    }
    println!("{}", if report.is_complete() { "ok" } else { "completed with failures" });

    Ok(report)
}
