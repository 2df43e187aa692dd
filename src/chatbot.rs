//! Per-turn orchestration.
//!
//! [`Chatbot`] owns the collaborators, their quotas, and the vector store,
//! and drives each user utterance through the state machine
//!
//! ```text
//! RECEIVED ─▶ ENHANCED ─▶ RETRIEVED ─▶ SUMMARIZED ─▶ ANSWERED ─▶ APPENDED
//!    │                        │                          │
//!    └── filler ──────────────┼──────────▶ ANSWERED      └──▶ FAILED
//!                             └──▶ FAILED
//! ```
//!
//! Only `APPENDED` touches the session: a failed turn leaves history
//! exactly as it was, so the user can simply retry. A `Chatbot` is shared
//! (`&self`) across sessions; each session is owned by its caller.

use std::sync::Arc;

use anyhow::Result;
use thiserror::Error;
use tracing::{info, info_span, warn, Instrument};

use support_rag_core::embedding::Embedder;
use support_rag_core::error::PipelineError;
use support_rag_core::generation::Generator;
use support_rag_core::models::{RetrievalResult, SourceDocument, Turn};
use support_rag_core::prompt::{classify, detect_filler, DomainPolicy, FillerKind, TurnClass};
use support_rag_core::session::ConversationSession;
use support_rag_core::store::VectorStore;

use crate::collaborator::{CallPolicy, EmbeddingClient, GenerationClient};
use crate::config::{Config, DomainConfig};
use crate::embedding::create_embedder;
use crate::generation::create_generator;
use crate::ingest::{ingest_documents, IngestOptions, IngestReport};
use crate::pipeline::{enhance, filler_reply, respond, retrieve, summarize};
use crate::rate_limit::TokenBucket;
use crate::sqlite_store::SqliteVectorStore;

/// States a turn passes through.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TurnState {
    Received,
    Enhanced,
    Retrieved,
    Summarized,
    Answered,
    Appended,
    Failed,
}

impl TurnState {
    pub fn as_str(&self) -> &'static str {
        match self {
            TurnState::Received => "RECEIVED",
            TurnState::Enhanced => "ENHANCED",
            TurnState::Retrieved => "RETRIEVED",
            TurnState::Summarized => "SUMMARIZED",
            TurnState::Answered => "ANSWERED",
            TurnState::Appended => "APPENDED",
            TurnState::Failed => "FAILED",
        }
    }
}

/// A completed turn.
#[derive(Debug, Clone)]
pub struct TurnReply {
    pub text: String,
    pub class: TurnClass,
    /// The rewritten query; `None` for fillers.
    pub enhanced_query: Option<String>,
    /// Source documents of the knowledge the answer was grounded on.
    pub sources: Vec<String>,
    /// Non-fatal degradations hit along the way.
    pub degradations: Vec<PipelineError>,
    pub trace: Vec<TurnState>,
}

/// A failed turn. `message` is what the user should see.
#[derive(Debug, Clone, Error)]
#[error("{error}")]
pub struct TurnError {
    pub error: PipelineError,
    pub message: String,
    pub trace: Vec<TurnState>,
}

/// Per-turn settings, resolved once from [`Config`].
#[derive(Debug, Clone)]
pub struct ChatSettings {
    pub domain: DomainConfig,
    pub policy: DomainPolicy,
    pub history_exchanges: usize,
    pub max_results: usize,
    pub min_similarity: f32,
    pub context_budget_chars: usize,
    pub max_attempts: u32,
    pub ingest: IngestOptions,
}

impl ChatSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            domain: config.domain.clone(),
            policy: config.domain.policy(),
            history_exchanges: config.conversation.history_exchanges,
            max_results: config.retrieval.max_results,
            min_similarity: config.retrieval.min_similarity,
            context_budget_chars: config.conversation.context_budget_chars,
            max_attempts: config.generation.max_attempts,
            ingest: IngestOptions::from_config(config),
        }
    }
}

pub struct Chatbot {
    embedder: Arc<dyn Embedder>,
    generator: Arc<dyn Generator>,
    store: Arc<dyn VectorStore>,
    embed_quota: TokenBucket,
    generate_quota: TokenBucket,
    embed_policy: CallPolicy,
    generate_policy: CallPolicy,
    settings: ChatSettings,
}

impl Chatbot {
    pub fn new(
        config: &Config,
        embedder: Arc<dyn Embedder>,
        generator: Arc<dyn Generator>,
        store: Arc<dyn VectorStore>,
    ) -> Self {
        Self {
            embedder,
            generator,
            store,
            embed_quota: TokenBucket::per_minute("embedding", config.embedding.requests_per_minute),
            generate_quota: TokenBucket::per_minute(
                "generation",
                config.generation.requests_per_minute,
            ),
            embed_policy: CallPolicy::for_embedding(&config.embedding),
            generate_policy: CallPolicy::for_generation(&config.generation),
            settings: ChatSettings::from_config(config),
        }
    }

    /// Build a chatbot over the configured providers and SQLite store.
    pub async fn from_config(config: &Config) -> Result<Self> {
        let embedder = create_embedder(&config.embedding)?;
        let generator = create_generator(&config.generation)?;
        let store = SqliteVectorStore::open(config).await?;
        Ok(Self::new(config, embedder, generator, Arc::new(store)))
    }

    /// Override the retry policies (e.g. no backoff in tests).
    pub fn with_call_policies(mut self, embed: CallPolicy, generate: CallPolicy) -> Self {
        self.embed_policy = embed;
        self.generate_policy = generate;
        self
    }

    pub fn settings(&self) -> &ChatSettings {
        &self.settings
    }

    pub fn store(&self) -> &dyn VectorStore {
        self.store.as_ref()
    }

    fn embedding(&self) -> EmbeddingClient<'_> {
        EmbeddingClient::new(self.embedder.as_ref(), &self.embed_quota, self.embed_policy)
    }

    fn generation(&self) -> GenerationClient<'_> {
        GenerationClient::new(self.generator.as_ref(), &self.generate_quota, self.generate_policy)
    }

    pub fn start_session(&self) -> ConversationSession {
        ConversationSession::with_exchanges(self.settings.history_exchanges)
    }

    /// Ingest documents through the same embedding quota used for queries.
    pub async fn ingest(&self, documents: &[SourceDocument]) -> IngestReport {
        ingest_documents(documents, &self.embedding(), self.store.as_ref(), &self.settings.ingest)
            .await
    }

    /// Retrieval only, for inspecting what a query would be grounded on.
    pub async fn search(&self, query: &str) -> Result<RetrievalResult, PipelineError> {
        retrieve(&self.embedding(), self.store.as_ref(), query, self.settings.max_results).await
    }

    /// Run one user utterance through the pipeline.
    ///
    /// On success the user turn and the reply are appended to `session`.
    /// On failure `session` is untouched.
    pub async fn submit_turn(
        &self,
        session: &mut ConversationSession,
        text: &str,
    ) -> Result<TurnReply, TurnError> {
        let span = info_span!("turn", session = %session.id());
        self.run_turn(session, text).instrument(span).await
    }

    async fn run_turn(
        &self,
        session: &mut ConversationSession,
        text: &str,
    ) -> Result<TurnReply, TurnError> {
        let settings = &self.settings;
        let mut trace = vec![TurnState::Received];

        let filler = if text.trim().is_empty() {
            Some(FillerKind::Greeting)
        } else {
            detect_filler(text)
        };
        if let Some(kind) = filler {
            let reply = filler_reply(&settings.domain, kind).to_string();
            trace.push(TurnState::Answered);
            return Ok(self.append(
                session,
                text,
                reply,
                TurnClass::Filler(kind),
                None,
                Vec::new(),
                Vec::new(),
                trace,
            ));
        }

        let generation = self.generation();
        let mut degradations = Vec::new();

        let enhancement = enhance(&generation, &settings.domain.name, text, session).await;
        degradations.extend(enhancement.degraded);
        let query = enhancement.query;
        trace.push(TurnState::Enhanced);

        let embedding = self.embedding();
        let store = self.store.as_ref();
        let retrieval = match retrieve(&embedding, store, &query, settings.max_results).await {
            Ok(result) => result,
            Err(error) => return Err(self.fail(error, trace)),
        };
        trace.push(TurnState::Retrieved);

        let has_relevant = retrieval.relevant(settings.min_similarity).next().is_some();
        let class = match classify(&query, &settings.policy, has_relevant) {
            TurnClass::OffDomain if settings.policy.mentions(text) => TurnClass::Domain,
            class => class,
        };

        let summary = summarize(
            &generation,
            &settings.domain.name,
            &query,
            &retrieval,
            session,
            settings.min_similarity,
            settings.context_budget_chars,
        )
        .await;
        degradations.extend(summary.degradations);
        trace.push(TurnState::Summarized);

        let answer = if class == TurnClass::Domain && retrieval.is_empty() {
            warn!("vector store is empty");
            Ok(settings.domain.empty_index_message.clone())
        } else {
            respond(
                &generation,
                &settings.domain,
                class,
                &query,
                &summary.context,
                settings.max_attempts,
            )
            .await
        };
        let answer = match answer {
            Ok(answer) => answer,
            Err(error) => return Err(self.fail(error, trace)),
        };
        trace.push(TurnState::Answered);

        let sources = if summary.context.knowledge_chunks > 0 {
            let mut sources: Vec<String> = Vec::new();
            for hit in retrieval
                .relevant(settings.min_similarity)
                .take(summary.context.knowledge_chunks)
            {
                if !sources.contains(&hit.chunk.source_document) {
                    sources.push(hit.chunk.source_document.clone());
                }
            }
            sources
        } else {
            Vec::new()
        };

        Ok(self.append(session, text, answer, class, Some(query), sources, degradations, trace))
    }

    #[allow(clippy::too_many_arguments)]
    fn append(
        &self,
        session: &mut ConversationSession,
        user_text: &str,
        reply: String,
        class: TurnClass,
        enhanced_query: Option<String>,
        sources: Vec<String>,
        degradations: Vec<PipelineError>,
        mut trace: Vec<TurnState>,
    ) -> TurnReply {
        session.append_exchange(Turn::user(user_text), Turn::agent(reply.clone()));
        trace.push(TurnState::Appended);
        info!(
            class = ?class,
            degradations = degradations.len(),
            trace = %render_trace(&trace),
            "turn appended"
        );
        TurnReply {
            text: reply,
            class,
            enhanced_query,
            sources,
            degradations,
            trace,
        }
    }

    fn fail(&self, error: PipelineError, mut trace: Vec<TurnState>) -> TurnError {
        trace.push(TurnState::Failed);
        warn!(error = %error, trace = %render_trace(&trace), "turn failed");
        TurnError {
            error,
            message: self.settings.domain.failure_message.clone(),
            trace,
        }
    }
}

fn render_trace(trace: &[TurnState]) -> String {
    trace
        .iter()
        .map(TurnState::as_str)
        .collect::<Vec<_>>()
        .join(" -> ")
}
