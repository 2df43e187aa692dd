//! Retrieval: embed the enhanced query, search the store, keep the store's
//! ranking.
//!
//! Any embedding or search failure becomes
//! [`PipelineError::RetrievalFailed`]. An empty store yields an empty
//! [`RetrievalResult`], which is not an error.

use support_rag_core::error::PipelineError;
use support_rag_core::models::RetrievalResult;
use support_rag_core::store::VectorStore;
use tracing::debug;

use crate::collaborator::EmbeddingClient;

pub async fn retrieve(
    embedder: &EmbeddingClient<'_>,
    store: &dyn VectorStore,
    query: &str,
    max_results: usize,
) -> Result<RetrievalResult, PipelineError> {
    let vector = embedder
        .embed_one(query)
        .await
        .map_err(|e| PipelineError::RetrievalFailed(format!("embedding: {e}")))?;

    let hits = store
        .search(&vector, max_results)
        .await
        .map_err(|e| PipelineError::RetrievalFailed(format!("vector store: {e}")))?;

    let result = RetrievalResult::new(hits);
    debug!(hits = result.len(), top_score = ?result.top_score(), "retrieved");
    Ok(result)
}
