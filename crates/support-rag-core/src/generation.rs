//! Generative collaborator trait.
//!
//! The pipeline only ever needs `prompt → text`. Implementations are
//! treated as non-deterministic, rate-limited, and fallible; retries,
//! timeouts, and quotas are applied by the caller.

use async_trait::async_trait;

use crate::error::CollaboratorError;

#[async_trait]
pub trait Generator: Send + Sync {
    /// Returns the model identifier (e.g. `"gemini-2.0-flash"`).
    fn model_name(&self) -> &str;

    /// Generate a completion for a single prompt.
    async fn generate(&self, prompt: &str) -> Result<String, CollaboratorError>;
}
