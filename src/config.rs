//! TOML configuration parsing and validation.
//!
//! Every section has defaults except `[db]`; a minimal file only needs a
//! database path. API keys are never read from the file, only from the
//! environment (`OPENAI_API_KEY`, `GEMINI_API_KEY`).

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use support_rag_core::chunk::ChunkingParams;
use support_rag_core::prompt::DomainPolicy;

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub db: DbConfig,
    #[serde(default)]
    pub corpus: CorpusConfig,
    #[serde(default)]
    pub chunking: ChunkingConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub generation: GenerationConfig,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
    #[serde(default)]
    pub conversation: ConversationConfig,
    #[serde(default)]
    pub domain: DomainConfig,
    #[serde(default)]
    pub ingest: IngestConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DbConfig {
    pub path: PathBuf,
}

#[derive(Debug, Deserialize, Clone)]
pub struct CorpusConfig {
    #[serde(default = "default_corpus_root")]
    pub root: PathBuf,
    #[serde(default = "default_include_globs")]
    pub include_globs: Vec<String>,
    #[serde(default)]
    pub exclude_globs: Vec<String>,
    #[serde(default)]
    pub follow_symlinks: bool,
}

impl Default for CorpusConfig {
    fn default() -> Self {
        Self {
            root: default_corpus_root(),
            include_globs: default_include_globs(),
            exclude_globs: Vec::new(),
            follow_symlinks: false,
        }
    }
}

fn default_corpus_root() -> PathBuf {
    PathBuf::from("./data")
}
fn default_include_globs() -> Vec<String> {
    vec!["**/*.txt".to_string(), "**/*.md".to_string()]
}

#[derive(Debug, Deserialize, Clone)]
pub struct ChunkingConfig {
    #[serde(default = "default_chunk_chars")]
    pub chunk_chars: usize,
    #[serde(default = "default_overlap_chars")]
    pub overlap_chars: usize,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            chunk_chars: default_chunk_chars(),
            overlap_chars: default_overlap_chars(),
        }
    }
}

impl ChunkingConfig {
    pub fn params(&self) -> ChunkingParams {
        ChunkingParams::new(self.chunk_chars, self.overlap_chars)
    }
}

fn default_chunk_chars() -> usize {
    300
}
fn default_overlap_chars() -> usize {
    100
}

#[derive(Debug, Deserialize, Clone)]
pub struct EmbeddingConfig {
    #[serde(default = "default_disabled")]
    pub provider: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub dims: Option<usize>,
    /// Base URL override (Ollama, OpenAI-compatible gateways).
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_requests_per_minute")]
    pub requests_per_minute: u32,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: default_disabled(),
            model: None,
            dims: None,
            url: None,
            batch_size: default_batch_size(),
            max_retries: default_max_retries(),
            timeout_secs: default_timeout_secs(),
            requests_per_minute: default_requests_per_minute(),
        }
    }
}

impl EmbeddingConfig {
    pub fn is_enabled(&self) -> bool {
        self.provider != "disabled"
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct GenerationConfig {
    #[serde(default = "default_disabled")]
    pub provider: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_requests_per_minute")]
    pub requests_per_minute: u32,
    /// Answer-stage attempts before the turn fails.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            provider: default_disabled(),
            model: None,
            url: None,
            temperature: default_temperature(),
            max_retries: default_max_retries(),
            timeout_secs: default_timeout_secs(),
            requests_per_minute: default_requests_per_minute(),
            max_attempts: default_max_attempts(),
        }
    }
}

impl GenerationConfig {
    pub fn is_enabled(&self) -> bool {
        self.provider != "disabled"
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

fn default_disabled() -> String {
    "disabled".to_string()
}
fn default_batch_size() -> usize {
    32
}
fn default_max_retries() -> u32 {
    3
}
fn default_timeout_secs() -> u64 {
    30
}
fn default_requests_per_minute() -> u32 {
    60
}
fn default_temperature() -> f32 {
    0.2
}
fn default_max_attempts() -> u32 {
    2
}

#[derive(Debug, Deserialize, Clone)]
pub struct RetrievalConfig {
    #[serde(default = "default_max_results")]
    pub max_results: usize,
    /// Hits below this cosine similarity count as irrelevant.
    #[serde(default = "default_min_similarity")]
    pub min_similarity: f32,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            max_results: default_max_results(),
            min_similarity: default_min_similarity(),
        }
    }
}

fn default_max_results() -> usize {
    20
}
fn default_min_similarity() -> f32 {
    0.1
}

#[derive(Debug, Deserialize, Clone)]
pub struct ConversationConfig {
    #[serde(default = "default_history_exchanges")]
    pub history_exchanges: usize,
    #[serde(default = "default_context_budget_chars")]
    pub context_budget_chars: usize,
}

impl Default for ConversationConfig {
    fn default() -> Self {
        Self {
            history_exchanges: default_history_exchanges(),
            context_budget_chars: default_context_budget_chars(),
        }
    }
}

fn default_history_exchanges() -> usize {
    support_rag_core::session::DEFAULT_HISTORY_EXCHANGES
}
fn default_context_budget_chars() -> usize {
    4000
}

#[derive(Debug, Deserialize, Clone)]
pub struct DomainConfig {
    #[serde(default = "default_domain_name")]
    pub name: String,
    #[serde(default)]
    pub keywords: Vec<String>,
    #[serde(default = "default_decline_message")]
    pub decline_message: String,
    #[serde(default = "default_unavailable_message")]
    pub unavailable_message: String,
    #[serde(default = "default_failure_message")]
    pub failure_message: String,
    /// Reply when the vector store holds no records at all.
    #[serde(default = "default_empty_index_message")]
    pub empty_index_message: String,
    #[serde(default = "default_greeting_reply")]
    pub greeting_reply: String,
    #[serde(default = "default_thanks_reply")]
    pub thanks_reply: String,
    #[serde(default = "default_farewell_reply")]
    pub farewell_reply: String,
}

impl Default for DomainConfig {
    fn default() -> Self {
        Self {
            name: default_domain_name(),
            keywords: Vec::new(),
            decline_message: default_decline_message(),
            unavailable_message: default_unavailable_message(),
            failure_message: default_failure_message(),
            empty_index_message: default_empty_index_message(),
            greeting_reply: default_greeting_reply(),
            thanks_reply: default_thanks_reply(),
            farewell_reply: default_farewell_reply(),
        }
    }
}

impl DomainConfig {
    pub fn policy(&self) -> DomainPolicy {
        DomainPolicy::new(self.name.clone(), self.keywords.clone())
    }
}

fn default_domain_name() -> String {
    "our store".to_string()
}
fn default_decline_message() -> String {
    "I'm sorry, I can only answer questions about our products and policies.".to_string()
}
fn default_unavailable_message() -> String {
    "I'm sorry, I don't have the information needed to answer that question.".to_string()
}
fn default_failure_message() -> String {
    "I'm temporarily unable to answer. Please try again in a moment.".to_string()
}
fn default_empty_index_message() -> String {
    "My knowledge base has not been loaded yet. Please run `supportbot ingest` first.".to_string()
}
fn default_greeting_reply() -> String {
    "Hello! How may I assist you today?".to_string()
}
fn default_thanks_reply() -> String {
    "You're welcome! Is there anything else I can help you with?".to_string()
}
fn default_farewell_reply() -> String {
    "Thank you for reaching out. Have a wonderful day!".to_string()
}

/// What to do with chunks whose text did not change since the last run.
#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum ReembedPolicy {
    /// Skip the embedding call when hash and model match the stored record.
    #[default]
    Changed,
    /// Re-embed every chunk.
    Always,
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct IngestConfig {
    #[serde(default)]
    pub reembed: ReembedPolicy,
}

impl Config {
    /// A config with every section at its default, for tests and tooling.
    pub fn minimal(db_path: impl Into<PathBuf>) -> Self {
        Self {
            db: DbConfig {
                path: db_path.into(),
            },
            corpus: CorpusConfig::default(),
            chunking: ChunkingConfig::default(),
            embedding: EmbeddingConfig::default(),
            generation: GenerationConfig::default(),
            retrieval: RetrievalConfig::default(),
            conversation: ConversationConfig::default(),
            domain: DomainConfig::default(),
            ingest: IngestConfig::default(),
        }
    }
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;
    parse_config(&content)
}

pub fn parse_config(content: &str) -> Result<Config> {
    let config: Config = toml::from_str(content).with_context(|| "Failed to parse config file")?;
    validate(&config)?;
    Ok(config)
}

fn validate(config: &Config) -> Result<()> {
    // Validate chunking
    if config.chunking.chunk_chars == 0 {
        bail!("chunking.chunk_chars must be > 0");
    }
    if config.chunking.overlap_chars >= config.chunking.chunk_chars {
        bail!("chunking.overlap_chars must be < chunking.chunk_chars");
    }

    // Validate retrieval
    if config.retrieval.max_results == 0 {
        bail!("retrieval.max_results must be >= 1");
    }
    if !(-1.0..=1.0).contains(&config.retrieval.min_similarity) {
        bail!("retrieval.min_similarity must be in [-1.0, 1.0]");
    }

    // Validate conversation
    if config.conversation.history_exchanges == 0 {
        bail!("conversation.history_exchanges must be >= 1");
    }
    if config.conversation.context_budget_chars == 0 {
        bail!("conversation.context_budget_chars must be > 0");
    }

    // Validate embedding
    match config.embedding.provider.as_str() {
        "disabled" | "openai" | "ollama" | "gemini" | "local" => {}
        other => bail!(
            "Unknown embedding provider: '{}'. Must be disabled, openai, ollama, gemini, or local.",
            other
        ),
    }
    if config.embedding.is_enabled() && config.embedding.provider != "local" {
        if config.embedding.dims.is_none() || config.embedding.dims == Some(0) {
            bail!(
                "embedding.dims must be > 0 when provider is '{}'",
                config.embedding.provider
            );
        }
        if config.embedding.model.is_none() {
            bail!(
                "embedding.model must be specified when provider is '{}'",
                config.embedding.provider
            );
        }
    }
    if config.embedding.batch_size == 0 {
        bail!("embedding.batch_size must be > 0");
    }

    // Validate generation
    match config.generation.provider.as_str() {
        "disabled" | "openai" | "ollama" | "gemini" => {}
        other => bail!(
            "Unknown generation provider: '{}'. Must be disabled, openai, ollama, or gemini.",
            other
        ),
    }
    if config.generation.is_enabled() && config.generation.model.is_none() {
        bail!(
            "generation.model must be specified when provider is '{}'",
            config.generation.provider
        );
    }
    if config.generation.max_attempts == 0 {
        bail!("generation.max_attempts must be >= 1");
    }

    if config.embedding.requests_per_minute == 0 || config.generation.requests_per_minute == 0 {
        bail!("requests_per_minute must be >= 1");
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn minimal_file_uses_defaults() {
        let config = parse_config("[db]\npath = \"./data/bot.sqlite\"\n").unwrap();
        assert_eq!(config.chunking.chunk_chars, 300);
        assert_eq!(config.chunking.overlap_chars, 100);
        assert_eq!(config.retrieval.max_results, 20);
        assert_eq!(config.conversation.history_exchanges, 3);
        assert_eq!(config.ingest.reembed, ReembedPolicy::Changed);
        assert!(!config.embedding.is_enabled());
        assert!(!config.generation.is_enabled());
    }

    #[test]
    fn full_file_parses() {
        let config = parse_config(
            r#"
[db]
path = "bot.sqlite"

[corpus]
root = "./kb"

[embedding]
provider = "gemini"
model = "text-embedding-004"
dims = 768
requests_per_minute = 1500

[generation]
provider = "gemini"
model = "gemini-2.0-flash"
max_attempts = 3

[domain]
name = "Cartier UAE"
keywords = ["watch", "jewelry", "warranty", "return"]

[ingest]
reembed = "always"
"#,
        )
        .unwrap();
        assert_eq!(config.corpus.root, PathBuf::from("./kb"));
        assert_eq!(config.embedding.dims, Some(768));
        assert_eq!(config.generation.max_attempts, 3);
        assert_eq!(config.ingest.reembed, ReembedPolicy::Always);
        assert!(config.domain.policy().mentions("my watches"));
    }

    #[test]
    fn shipped_example_parses() {
        let config = parse_config(include_str!("../config/supportbot.example.toml")).unwrap();
        assert_eq!(config.embedding.provider, "gemini");
        assert_eq!(config.generation.max_attempts, 2);
        assert!(config.retrieval.min_similarity > default_min_similarity());
        assert!(config.domain.policy().mentions("is my bracelet covered?"));
    }

    #[test]
    fn rejects_overlap_not_below_chunk_size() {
        let err = parse_config(
            "[db]\npath = \"x\"\n[chunking]\nchunk_chars = 100\noverlap_chars = 100\n",
        )
        .unwrap_err();
        assert!(err.to_string().contains("overlap_chars"));
    }

    #[test]
    fn rejects_unknown_provider() {
        let err =
            parse_config("[db]\npath = \"x\"\n[generation]\nprovider = \"palm\"\n").unwrap_err();
        assert!(err.to_string().contains("Unknown generation provider"));
    }

    #[test]
    fn rejects_remote_embedding_without_dims() {
        let err = parse_config(
            "[db]\npath = \"x\"\n[embedding]\nprovider = \"openai\"\nmodel = \"text-embedding-3-small\"\n",
        )
        .unwrap_err();
        assert!(err.to_string().contains("embedding.dims"));
    }
}
