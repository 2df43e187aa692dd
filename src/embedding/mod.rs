//! Embedding collaborators.
//!
//! Concrete implementations of [`Embedder`]:
//! - **[`DisabledEmbedder`]**: returns errors; used when embeddings are not configured.
//! - **[`OpenAiEmbedder`]**: `POST /v1/embeddings` on OpenAI or a compatible gateway.
//! - **[`OllamaEmbedder`]**: a local Ollama instance's `/api/embed` endpoint.
//! - **[`GeminiEmbedder`]**: Google's `batchEmbedContents` endpoint.
//! - **`LocalEmbedder`**: fastembed on the host (feature `local-embeddings`); no
//!   network calls after model download.
//!
//! Providers make exactly one HTTP request per [`Embedder::embed`] call.
//! Quota, timeout and retries are applied by [`crate::collaborator::guarded`].
//!
//! ```rust
//! # use support_rag::config::EmbeddingConfig;
//! # use support_rag::embedding::create_embedder;
//! let embedder = create_embedder(&EmbeddingConfig::default()).unwrap();
//! assert_eq!(embedder.model_name(), "disabled");
//! ```

use std::sync::Arc;

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use serde::Deserialize;
use support_rag_core::embedding::Embedder;
use support_rag_core::error::CollaboratorError;
use tracing::debug;

use crate::collaborator::{http_client, send_json};
use crate::config::EmbeddingConfig;

const OPENAI_BASE_URL: &str = "https://api.openai.com/v1";
const OLLAMA_BASE_URL: &str = "http://localhost:11434";
const GEMINI_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta";

// ============ Disabled ============

/// An embedder that always fails.
pub struct DisabledEmbedder;

#[async_trait]
impl Embedder for DisabledEmbedder {
    fn model_name(&self) -> &str {
        "disabled"
    }
    fn dims(&self) -> usize {
        0
    }
    async fn embed(&self, _texts: &[String]) -> Result<Vec<Vec<f32>>, CollaboratorError> {
        Err(CollaboratorError::Disabled(
            "embedding provider is disabled; set [embedding] provider in config".into(),
        ))
    }
}

// ============ OpenAI ============

/// OpenAI embeddings API. Requires `OPENAI_API_KEY`.
pub struct OpenAiEmbedder {
    model: String,
    dims: usize,
    base_url: String,
    api_key: String,
    client: reqwest::Client,
}

impl OpenAiEmbedder {
    pub fn new(config: &EmbeddingConfig) -> Result<Self> {
        let api_key = std::env::var("OPENAI_API_KEY")
            .context("OPENAI_API_KEY environment variable not set")?;
        let base_url = config.url.as_deref().unwrap_or(OPENAI_BASE_URL);
        Self::with_key(config, base_url, api_key)
    }

    fn with_key(config: &EmbeddingConfig, base_url: &str, api_key: String) -> Result<Self> {
        let (model, dims) = required_model(config)?;
        Ok(Self {
            model,
            dims,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key,
            client: http_client(config.timeout())?,
        })
    }
}

#[derive(Deserialize)]
struct OpenAiEmbeddingResponse {
    data: Vec<OpenAiEmbeddingItem>,
}

#[derive(Deserialize)]
struct OpenAiEmbeddingItem {
    #[serde(default)]
    index: usize,
    embedding: Vec<f32>,
}

#[async_trait]
impl Embedder for OpenAiEmbedder {
    fn model_name(&self) -> &str {
        &self.model
    }
    fn dims(&self) -> usize {
        self.dims
    }

    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, CollaboratorError> {
        debug!(provider = "openai", model = %self.model, count = texts.len(), "embedding batch");
        let request = self
            .client
            .post(format!("{}/embeddings", self.base_url))
            .bearer_auth(&self.api_key)
            .json(&serde_json::json!({
                "model": self.model,
                "input": texts,
                "encoding_format": "float",
            }));
        let mut response: OpenAiEmbeddingResponse = send_json("openai", request).await?;
        // Order by index so output matches input order.
        response.data.sort_by_key(|item| item.index);
        let vectors = response.data.into_iter().map(|item| item.embedding).collect();
        check_batch(vectors, texts.len(), self.dims)
    }
}

// ============ Ollama ============

/// Embeddings from a local Ollama instance (default `http://localhost:11434`).
pub struct OllamaEmbedder {
    model: String,
    dims: usize,
    url: String,
    client: reqwest::Client,
}

impl OllamaEmbedder {
    pub fn new(config: &EmbeddingConfig) -> Result<Self> {
        let (model, dims) = required_model(config)?;
        let url = config.url.as_deref().unwrap_or(OLLAMA_BASE_URL);
        Ok(Self {
            model,
            dims,
            url: url.trim_end_matches('/').to_string(),
            client: http_client(config.timeout())?,
        })
    }
}

#[derive(Deserialize)]
struct OllamaEmbeddingResponse {
    embeddings: Vec<Vec<f32>>,
}

#[async_trait]
impl Embedder for OllamaEmbedder {
    fn model_name(&self) -> &str {
        &self.model
    }
    fn dims(&self) -> usize {
        self.dims
    }

    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, CollaboratorError> {
        debug!(provider = "ollama", model = %self.model, count = texts.len(), "embedding batch");
        let request = self
            .client
            .post(format!("{}/api/embed", self.url))
            .json(&serde_json::json!({ "model": self.model, "input": texts }));
        let response: OllamaEmbeddingResponse = send_json("ollama", request).await?;
        check_batch(response.embeddings, texts.len(), self.dims)
    }
}

// ============ Gemini ============

/// Gemini embeddings (e.g. `text-embedding-004`). Requires `GEMINI_API_KEY`.
pub struct GeminiEmbedder {
    model: String,
    dims: usize,
    base_url: String,
    api_key: String,
    client: reqwest::Client,
}

impl GeminiEmbedder {
    pub fn new(config: &EmbeddingConfig) -> Result<Self> {
        let api_key = std::env::var("GEMINI_API_KEY")
            .context("GEMINI_API_KEY environment variable not set")?;
        let base_url = config.url.as_deref().unwrap_or(GEMINI_BASE_URL);
        Self::with_key(config, base_url, api_key)
    }

    fn with_key(config: &EmbeddingConfig, base_url: &str, api_key: String) -> Result<Self> {
        let (model, dims) = required_model(config)?;
        Ok(Self {
            model,
            dims,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key,
            client: http_client(config.timeout())?,
        })
    }
}

#[derive(Deserialize)]
struct GeminiBatchResponse {
    #[serde(default)]
    embeddings: Vec<GeminiEmbedding>,
}

#[derive(Deserialize)]
struct GeminiEmbedding {
    values: Vec<f32>,
}

#[async_trait]
impl Embedder for GeminiEmbedder {
    fn model_name(&self) -> &str {
        &self.model
    }
    fn dims(&self) -> usize {
        self.dims
    }

    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, CollaboratorError> {
        debug!(provider = "gemini", model = %self.model, count = texts.len(), "embedding batch");
        let model_path = format!("models/{}", self.model);
        let requests: Vec<_> = texts
            .iter()
            .map(|t| {
                serde_json::json!({
                    "model": model_path,
                    "content": { "parts": [{ "text": t }] },
                })
            })
            .collect();
        let request = self
            .client
            .post(format!("{}/{}:batchEmbedContents", self.base_url, model_path))
            .header("x-goog-api-key", &self.api_key)
            .json(&serde_json::json!({ "requests": requests }));
        let response: GeminiBatchResponse = send_json("gemini", request).await?;
        let vectors = response.embeddings.into_iter().map(|e| e.values).collect();
        check_batch(vectors, texts.len(), self.dims)
    }
}

// ============ Local (fastembed) ============

/// Local inference via fastembed. Models are downloaded from Hugging Face
/// on first use and cached.
#[cfg(feature = "local-embeddings")]
pub struct LocalEmbedder {
    model_name: String,
    dims: usize,
    batch_size: usize,
    model: Arc<std::sync::Mutex<fastembed::TextEmbedding>>,
}

#[cfg(feature = "local-embeddings")]
impl LocalEmbedder {
    pub fn new(config: &EmbeddingConfig) -> Result<Self> {
        let model_name = config
            .model
            .clone()
            .unwrap_or_else(|| "all-minilm-l6-v2".to_string());
        let (kind, default_dims) = local_model(&model_name)?;
        let model = fastembed::TextEmbedding::try_new(
            fastembed::InitOptions::new(kind).with_show_download_progress(true),
        )
        .map_err(|e| anyhow::anyhow!("Failed to initialize local embedding model: {}", e))?;

        Ok(Self {
            model_name,
            dims: config.dims.unwrap_or(default_dims),
            batch_size: config.batch_size,
            model: Arc::new(std::sync::Mutex::new(model)),
        })
    }
}

#[cfg(feature = "local-embeddings")]
fn local_model(name: &str) -> Result<(fastembed::EmbeddingModel, usize)> {
    use fastembed::EmbeddingModel as M;
    Ok(match name {
        "all-minilm-l6-v2" => (M::AllMiniLML6V2, 384),
        "bge-small-en-v1.5" => (M::BGESmallENV15, 384),
        "bge-base-en-v1.5" => (M::BGEBaseENV15, 768),
        "bge-large-en-v1.5" => (M::BGELargeENV15, 1024),
        "nomic-embed-text-v1.5" => (M::NomicEmbedTextV15, 768),
        "multilingual-e5-small" => (M::MultilingualE5Small, 384),
        "multilingual-e5-base" => (M::MultilingualE5Base, 768),
        other => bail!(
            "Unknown local embedding model: '{}'. Supported models: \
             all-minilm-l6-v2, bge-small-en-v1.5, bge-base-en-v1.5, bge-large-en-v1.5, \
             nomic-embed-text-v1.5, multilingual-e5-small, multilingual-e5-base",
            other
        ),
    })
}

#[cfg(feature = "local-embeddings")]
#[async_trait]
impl Embedder for LocalEmbedder {
    fn model_name(&self) -> &str {
        &self.model_name
    }
    fn dims(&self) -> usize {
        self.dims
    }

    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, CollaboratorError> {
        let model = Arc::clone(&self.model);
        let batch_size = self.batch_size;
        let owned = texts.to_vec();
        let vectors = tokio::task::spawn_blocking(move || {
            let mut model = model
                .lock()
                .map_err(|_| CollaboratorError::Malformed("local model lock poisoned".into()))?;
            model
                .embed(owned, Some(batch_size))
                .map_err(|e| CollaboratorError::Malformed(format!("local embedding failed: {e}")))
        })
        .await
        .map_err(|e| CollaboratorError::Malformed(format!("local embedding task: {e}")))??;
        check_batch(vectors, texts.len(), self.dims)
    }
}

// ============ Shared ============

fn required_model(config: &EmbeddingConfig) -> Result<(String, usize)> {
    let model = config.model.clone().with_context(|| {
        format!("embedding.model required for {} provider", config.provider)
    })?;
    let dims = config
        .dims
        .with_context(|| format!("embedding.dims required for {} provider", config.provider))?;
    Ok((model, dims))
}

/// One vector per input, all of the configured dimensionality.
fn check_batch(
    vectors: Vec<Vec<f32>>,
    expected: usize,
    dims: usize,
) -> Result<Vec<Vec<f32>>, CollaboratorError> {
    if vectors.is_empty() && expected > 0 {
        return Err(CollaboratorError::EmptyResponse);
    }
    if vectors.len() != expected {
        return Err(CollaboratorError::Malformed(format!(
            "expected {} embeddings, got {}",
            expected,
            vectors.len()
        )));
    }
    if let Some(bad) = vectors.iter().find(|v| v.len() != dims) {
        return Err(CollaboratorError::Malformed(format!(
            "expected {}-dimensional vectors, got {}",
            dims,
            bad.len()
        )));
    }
    Ok(vectors)
}

/// Create the configured [`Embedder`].
///
/// | Config Value | Embedder |
/// |-------------|----------|
/// | `"disabled"` | [`DisabledEmbedder`] |
/// | `"openai"` | [`OpenAiEmbedder`] |
/// | `"ollama"` | [`OllamaEmbedder`] |
/// | `"gemini"` | [`GeminiEmbedder`] |
/// | `"local"` | `LocalEmbedder` (feature `local-embeddings`) |
pub fn create_embedder(config: &EmbeddingConfig) -> Result<Arc<dyn Embedder>> {
    match config.provider.as_str() {
        "disabled" => Ok(Arc::new(DisabledEmbedder)),
        "openai" => Ok(Arc::new(OpenAiEmbedder::new(config)?)),
        "ollama" => Ok(Arc::new(OllamaEmbedder::new(config)?)),
        "gemini" => Ok(Arc::new(GeminiEmbedder::new(config)?)),
        #[cfg(feature = "local-embeddings")]
        "local" => Ok(Arc::new(LocalEmbedder::new(config)?)),
        #[cfg(not(feature = "local-embeddings"))]
        "local" => bail!("Local embedding provider requires --features local-embeddings"),
        other => bail!("Unknown embedding provider: {}", other),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collaborator::test_server::serve_once;

    fn config(provider: &str, dims: usize) -> EmbeddingConfig {
        EmbeddingConfig {
            provider: provider.to_string(),
            model: Some("test-embed".to_string()),
            dims: Some(dims),
            ..EmbeddingConfig::default()
        }
    }

    #[tokio::test]
    async fn disabled_embedder_refuses() {
        let embedder = create_embedder(&EmbeddingConfig::default()).unwrap();
        let err = embedder.embed(&["x".to_string()]).await.unwrap_err();
        assert!(matches!(err, CollaboratorError::Disabled(_)));
    }

    #[tokio::test]
    async fn openai_restores_input_order() {
        let (url, request) = serve_once(
            200,
            r#"{"data":[{"index":1,"embedding":[0.0,1.0]},{"index":0,"embedding":[1.0,0.0]}]}"#,
        )
        .await;
        let embedder = OpenAiEmbedder::with_key(&config("openai", 2), &url, "sk-test".into()).unwrap();
        let vectors = embedder
            .embed(&["first".to_string(), "second".to_string()])
            .await
            .unwrap();
        assert_eq!(vectors, vec![vec![1.0, 0.0], vec![0.0, 1.0]]);

        let raw = request.await.unwrap();
        assert!(raw.starts_with("POST /embeddings"));
        assert!(raw.to_lowercase().contains("authorization: bearer sk-test"));
    }

    #[tokio::test]
    async fn ollama_rejects_wrong_dimensionality() {
        let (url, _) = serve_once(200, r#"{"embeddings":[[1.0,2.0,3.0]]}"#).await;
        let mut cfg = config("ollama", 2);
        cfg.url = Some(url);
        let embedder = OllamaEmbedder::new(&cfg).unwrap();
        let err = embedder.embed(&["x".to_string()]).await.unwrap_err();
        assert!(matches!(err, CollaboratorError::Malformed(_)));
    }

    #[tokio::test]
    async fn gemini_batches_into_one_request() {
        let (url, request) = serve_once(
            200,
            r#"{"embeddings":[{"values":[0.5,0.5]},{"values":[0.1,0.9]}]}"#,
        )
        .await;
        let embedder = GeminiEmbedder::with_key(&config("gemini", 2), &url, "g-key".into()).unwrap();
        let vectors = embedder
            .embed(&["a".to_string(), "b".to_string()])
            .await
            .unwrap();
        assert_eq!(vectors.len(), 2);

        let raw = request.await.unwrap();
        assert!(raw.starts_with("POST /models/test-embed:batchEmbedContents"));
        assert!(raw.contains("x-goog-api-key: g-key"));
    }

    #[test]
    fn check_batch_flags_missing_vectors() {
        assert_eq!(
            check_batch(Vec::new(), 2, 3).unwrap_err(),
            CollaboratorError::EmptyResponse
        );
        assert!(check_batch(vec![vec![0.0; 3]], 2, 3).is_err());
        assert!(check_batch(vec![vec![0.0; 3]; 2], 2, 3).is_ok());
    }

    #[test]
    fn remote_providers_need_model_and_dims() {
        let cfg = EmbeddingConfig {
            provider: "ollama".into(),
            ..EmbeddingConfig::default()
        };
        let err = OllamaEmbedder::new(&cfg).err().unwrap();
        assert!(err.to_string().contains("embedding.model required"));
    }
}
