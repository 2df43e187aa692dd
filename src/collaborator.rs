//! Guarded calls to the embedding and generation collaborators.
//!
//! [`guarded`] is the single call path every pipeline stage and the
//! ingestor use: take a token from the collaborator's [`TokenBucket`],
//! run the call under a timeout, and retry transient failures with
//! exponential backoff.
//!
//! # Retry Strategy
//!
//! - HTTP 429 and 5xx, network errors, and timeouts → retry
//! - Other HTTP errors and malformed responses → fail immediately
//! - Backoff: 1s, 2s, 4s, 8s, 16s, 32s (capped at 2^5)
//!
//! Each retry takes a fresh token, so retries count against the quota.

use std::future::Future;
use std::time::Duration;

use serde::de::DeserializeOwned;
use support_rag_core::embedding::Embedder;
use support_rag_core::error::CollaboratorError;
use support_rag_core::generation::Generator;
use tracing::{debug, warn};

use crate::config::{EmbeddingConfig, GenerationConfig};
use crate::rate_limit::TokenBucket;

/// Timeout and retry settings for one collaborator.
#[derive(Debug, Clone, Copy)]
pub struct CallPolicy {
    pub timeout: Duration,
    pub max_retries: u32,
    pub backoff: Duration,
}

impl CallPolicy {
    pub fn new(timeout: Duration, max_retries: u32) -> Self {
        Self {
            timeout,
            max_retries,
            backoff: Duration::from_secs(1),
        }
    }

    pub fn with_backoff(mut self, backoff: Duration) -> Self {
        self.backoff = backoff;
        self
    }

    pub fn for_embedding(config: &EmbeddingConfig) -> Self {
        Self::new(config.timeout(), config.max_retries)
    }

    pub fn for_generation(config: &GenerationConfig) -> Self {
        Self::new(config.timeout(), config.max_retries)
    }

    fn delay(&self, attempt: u32) -> Duration {
        self.backoff * (1u32 << (attempt.saturating_sub(1)).min(5))
    }
}

/// Run `call` under the quota, timeout and retry policy.
///
/// `call` is invoked once per attempt and must build a fresh request each
/// time.
pub async fn guarded<T, F, Fut>(
    label: &str,
    quota: &TokenBucket,
    policy: &CallPolicy,
    mut call: F,
) -> Result<T, CollaboratorError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, CollaboratorError>>,
{
    let mut attempt = 0u32;
    loop {
        quota.acquire().await;
        let result = match tokio::time::timeout(policy.timeout, call()).await {
            Ok(result) => result,
            Err(_) => Err(CollaboratorError::Timeout(policy.timeout.as_secs())),
        };

        match result {
            Ok(value) => {
                if attempt > 0 {
                    debug!(call = label, attempt, "succeeded after retry");
                }
                return Ok(value);
            }
            Err(e) if e.is_transient() && attempt < policy.max_retries => {
                attempt += 1;
                let delay = policy.delay(attempt);
                warn!(
                    call = label,
                    attempt,
                    error = %e,
                    delay_ms = delay.as_millis() as u64,
                    "transient failure, retrying"
                );
                tokio::time::sleep(delay).await;
            }
            Err(e) => return Err(e),
        }
    }
}

/// An [`Embedder`] bound to its quota and call policy.
pub struct EmbeddingClient<'a> {
    embedder: &'a dyn Embedder,
    quota: &'a TokenBucket,
    policy: CallPolicy,
}

impl<'a> EmbeddingClient<'a> {
    pub fn new(embedder: &'a dyn Embedder, quota: &'a TokenBucket, policy: CallPolicy) -> Self {
        Self {
            embedder,
            quota,
            policy,
        }
    }

    pub fn model_name(&self) -> &str {
        self.embedder.model_name()
    }

    /// Embed `texts`, one vector per text in order.
    pub async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, CollaboratorError> {
        let vectors =
            guarded("embed", self.quota, &self.policy, || self.embedder.embed(texts)).await?;
        if vectors.len() != texts.len() {
            return Err(CollaboratorError::Malformed(format!(
                "{}: expected {} vectors, got {}",
                self.embedder.model_name(),
                texts.len(),
                vectors.len()
            )));
        }
        Ok(vectors)
    }

    pub async fn embed_one(&self, text: &str) -> Result<Vec<f32>, CollaboratorError> {
        self.embed(&[text.to_string()])
            .await?
            .into_iter()
            .next()
            .ok_or(CollaboratorError::EmptyResponse)
    }
}

/// A [`Generator`] bound to its quota and call policy.
pub struct GenerationClient<'a> {
    generator: &'a dyn Generator,
    quota: &'a TokenBucket,
    policy: CallPolicy,
}

impl<'a> GenerationClient<'a> {
    pub fn new(generator: &'a dyn Generator, quota: &'a TokenBucket, policy: CallPolicy) -> Self {
        Self {
            generator,
            quota,
            policy,
        }
    }

    pub fn model_name(&self) -> &str {
        self.generator.model_name()
    }

    /// Generate text for `prompt`; `stage` labels the call in logs.
    pub async fn generate(&self, stage: &str, prompt: &str) -> Result<String, CollaboratorError> {
        debug!(stage, model = self.model_name(), prompt_chars = prompt.len(), "generating");
        guarded(stage, self.quota, &self.policy, || self.generator.generate(prompt)).await
    }
}

/// Send a JSON request and decode a JSON response, mapping HTTP failures
/// onto [`CollaboratorError`].
pub(crate) async fn send_json<T: DeserializeOwned>(
    provider: &str,
    request: reqwest::RequestBuilder,
) -> Result<T, CollaboratorError> {
    let response = request
        .send()
        .await
        .map_err(|e| CollaboratorError::Network(format!("{provider}: {e}")))?;

    let status = response.status().as_u16();
    if status == 429 {
        return Err(CollaboratorError::RateLimited);
    }
    if status == 401 || status == 403 {
        return Err(CollaboratorError::Api {
            status,
            message: format!("{provider}: invalid API key or insufficient permissions"),
        });
    }
    if !response.status().is_success() {
        let body = response.text().await.unwrap_or_default();
        warn!(provider, status, body = %body, "collaborator returned error");
        return Err(CollaboratorError::Api {
            status,
            message: body,
        });
    }

    response
        .json::<T>()
        .await
        .map_err(|e| CollaboratorError::Malformed(format!("{provider}: {e}")))
}

/// Build the shared HTTP client for a collaborator.
pub(crate) fn http_client(timeout: Duration) -> anyhow::Result<reqwest::Client> {
    Ok(reqwest::Client::builder().timeout(timeout).build()?)
}
