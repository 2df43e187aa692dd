//! Error types for the chatbot pipeline.
//!
//! [`CollaboratorError`] describes why a call to an external model failed.
//! [`PipelineError`] is the pipeline's own taxonomy: which stage degraded
//! or failed, and whether the current turn survives it.

use thiserror::Error;

/// Failure of an embedding or generation collaborator call.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum CollaboratorError {
    #[error("collaborator is disabled: {0}")]
    Disabled(String),

    #[error("network error: {0}")]
    Network(String),

    #[error("API request failed: {message} (status: {status})")]
    Api { status: u16, message: String },

    #[error("rate limited by collaborator")]
    RateLimited,

    #[error("call timed out after {0}s")]
    Timeout(u64),

    #[error("collaborator returned an empty response")]
    EmptyResponse,

    #[error("malformed response: {0}")]
    Malformed(String),
}

impl CollaboratorError {
    /// Whether retrying the same request may succeed.
    pub fn is_transient(&self) -> bool {
        match self {
            CollaboratorError::Network(_)
            | CollaboratorError::RateLimited
            | CollaboratorError::Timeout(_) => true,
            CollaboratorError::Api { status, .. } => *status == 429 || *status >= 500,
            _ => false,
        }
    }
}

/// Degradations and failures raised by pipeline stages.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum PipelineError {
    /// Query rewriting failed; the raw query was used instead.
    #[error("query enhancement degraded: {0}")]
    EnhancementDegraded(String),

    /// The embedding collaborator or the vector store was unreachable.
    #[error("retrieval failed: {0}")]
    RetrievalFailed(String),

    /// The condensed context exceeded its budget and was truncated.
    #[error("context over budget: {produced} chars produced, budget {budget}")]
    ContextOverBudget { produced: usize, budget: usize },

    /// Answer generation failed on every allowed attempt.
    #[error("generation failed after {attempts} attempt(s): {reason}")]
    GenerationFailed { attempts: u32, reason: String },

    /// One chunk could not be embedded or stored during ingestion.
    #[error("ingestion of {source_document}#{chunk_index} failed: {reason}")]
    IngestionChunkFailed {
        source_document: String,
        chunk_index: usize,
        reason: String,
    },
}

impl PipelineError {
    /// Fatal errors abort the current turn; the rest only degrade quality.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            PipelineError::RetrievalFailed(_) | PipelineError::GenerationFailed { .. }
        )
    }
}
