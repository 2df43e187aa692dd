//! Generative collaborators.
//!
//! Works with OpenAI, Ollama (via its OpenAI-compatible `/v1` endpoint),
//! any other OpenAI-compatible gateway, and Gemini's `generateContent`.
//! Every prompt is sent as a single user message; the pipeline's prompt
//! templates carry their own instructions.

use std::sync::Arc;

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use serde::Deserialize;
use support_rag_core::error::CollaboratorError;
use support_rag_core::generation::Generator;
use tracing::debug;

use crate::collaborator::{http_client, send_json};
use crate::config::GenerationConfig;

const OPENAI_BASE_URL: &str = "https://api.openai.com/v1";
const OLLAMA_BASE_URL: &str = "http://localhost:11434/v1";
const GEMINI_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta";

/// A generator that always fails.
pub struct DisabledGenerator;

#[async_trait]
impl Generator for DisabledGenerator {
    fn model_name(&self) -> &str {
        "disabled"
    }
    async fn generate(&self, _prompt: &str) -> Result<String, CollaboratorError> {
        Err(CollaboratorError::Disabled(
            "generation provider is disabled; set [generation] provider in config".into(),
        ))
    }
}

/// An OpenAI-compatible chat-completions generator.
pub struct OpenAiCompatGenerator {
    name: String,
    base_url: String,
    api_key: Option<String>,
    model: String,
    temperature: f32,
    client: reqwest::Client,
}

impl OpenAiCompatGenerator {
    pub fn new(
        name: impl Into<String>,
        base_url: &str,
        api_key: Option<String>,
        config: &GenerationConfig,
    ) -> Result<Self> {
        let model = config
            .model
            .clone()
            .context("generation.model required")?;
        Ok(Self {
            name: name.into(),
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key,
            model,
            temperature: config.temperature,
            client: http_client(config.timeout())?,
        })
    }

    /// OpenAI proper. Requires `OPENAI_API_KEY`.
    pub fn openai(config: &GenerationConfig) -> Result<Self> {
        let key = std::env::var("OPENAI_API_KEY")
            .context("OPENAI_API_KEY environment variable not set")?;
        let url = config.url.as_deref().unwrap_or(OPENAI_BASE_URL);
        Self::new("openai", url, Some(key), config)
    }

    /// Ollama needs no key.
    pub fn ollama(config: &GenerationConfig) -> Result<Self> {
        let url = config.url.as_deref().unwrap_or(OLLAMA_BASE_URL);
        Self::new("ollama", url, None, config)
    }
}

#[derive(Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

#[derive(Deserialize)]
struct ChatMessage {
    #[serde(default)]
    content: Option<String>,
}

#[async_trait]
impl Generator for OpenAiCompatGenerator {
    fn model_name(&self) -> &str {
        &self.model
    }

    async fn generate(&self, prompt: &str) -> Result<String, CollaboratorError> {
        debug!(
            provider = %self.name,
            model = %self.model,
            prompt_chars = prompt.len(),
            "sending completion request"
        );
        let mut request = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .json(&serde_json::json!({
                "model": self.model,
                "messages": [{ "role": "user", "content": prompt }],
                "temperature": self.temperature,
                "stream": false,
            }));
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }

        let response: ChatResponse = send_json(&self.name, request).await?;
        let text = response
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .unwrap_or_default();
        non_empty(text)
    }
}

/// Gemini `generateContent` (e.g. `gemini-2.0-flash`). Requires `GEMINI_API_KEY`.
pub struct GeminiGenerator {
    base_url: String,
    api_key: String,
    model: String,
    temperature: f32,
    client: reqwest::Client,
}

impl GeminiGenerator {
    pub fn new(config: &GenerationConfig) -> Result<Self> {
        let api_key = std::env::var("GEMINI_API_KEY")
            .context("GEMINI_API_KEY environment variable not set")?;
        let url = config.url.as_deref().unwrap_or(GEMINI_BASE_URL);
        Self::with_key(config, url, api_key)
    }

    fn with_key(config: &GenerationConfig, base_url: &str, api_key: String) -> Result<Self> {
        let model = config
            .model
            .clone()
            .context("generation.model required")?;
        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key,
            model,
            temperature: config.temperature,
            client: http_client(config.timeout())?,
        })
    }
}

#[derive(Deserialize)]
struct GeminiResponse {
    #[serde(default)]
    candidates: Vec<GeminiCandidate>,
}

#[derive(Deserialize)]
struct GeminiCandidate {
    #[serde(default)]
    content: Option<GeminiContent>,
}

#[derive(Deserialize)]
struct GeminiContent {
    #[serde(default)]
    parts: Vec<GeminiPart>,
}

#[derive(Deserialize)]
struct GeminiPart {
    #[serde(default)]
    text: String,
}

#[async_trait]
impl Generator for GeminiGenerator {
    fn model_name(&self) -> &str {
        &self.model
    }

    async fn generate(&self, prompt: &str) -> Result<String, CollaboratorError> {
        debug!(
            provider = "gemini",
            model = %self.model,
            prompt_chars = prompt.len(),
            "sending generateContent request"
        );
        let request = self
            .client
            .post(format!("{}/models/{}:generateContent", self.base_url, self.model))
            .header("x-goog-api-key", &self.api_key)
            .json(&serde_json::json!({
                "contents": [{ "role": "user", "parts": [{ "text": prompt }] }],
                "generationConfig": { "temperature": self.temperature },
            }));

        let response: GeminiResponse = send_json("gemini", request).await?;
        let text: String = response
            .candidates
            .into_iter()
            .next()
            .and_then(|c| c.content)
            .map(|content| content.parts.into_iter().map(|p| p.text).collect())
            .unwrap_or_default();
        non_empty(text)
    }
}

fn non_empty(text: String) -> Result<String, CollaboratorError> {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        Err(CollaboratorError::EmptyResponse)
    } else {
        Ok(trimmed.to_string())
    }
}

/// Create the configured [`Generator`].
pub fn create_generator(config: &GenerationConfig) -> Result<Arc<dyn Generator>> {
    match config.provider.as_str() {
        "disabled" => Ok(Arc::new(DisabledGenerator)),
        "openai" => Ok(Arc::new(OpenAiCompatGenerator::openai(config)?)),
        "ollama" => Ok(Arc::new(OpenAiCompatGenerator::ollama(config)?)),
        "gemini" => Ok(Arc::new(GeminiGenerator::new(config)?)),
        other => bail!("Unknown generation provider: {}", other),
    }
}
