//! End-to-end tests for the chatbot turn pipeline.
//!
//! The collaborators are deterministic fakes: a bag-of-words embedder with
//! a growing vocabulary, and a generator that answers each prompt template
//! by reading the prompt it was given. Everything else (quotas, retries,
//! stages, orchestration, the vector stores) is the real code.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tempfile::TempDir;

use support_rag::chatbot::{Chatbot, TurnState};
use support_rag::collaborator::CallPolicy;
use support_rag::config::Config;
use support_rag::sqlite_store::SqliteVectorStore;
use support_rag_core::embedding::Embedder;
use support_rag_core::error::{CollaboratorError, PipelineError};
use support_rag_core::generation::Generator;
use support_rag_core::models::SourceDocument;
use support_rag_core::prompt::{
    FillerKind, TurnClass, CONDENSED_CONTEXT_MARKER, ENHANCED_QUERY_MARKER, FINAL_ANSWER_MARKER,
};
use support_rag_core::store::memory::InMemoryVectorStore;
use support_rag_core::store::VectorStore;

// ─── Fake collaborators ─────────────────────────────────────────────

const DIMS: usize = 2048;
const STOPWORDS: &[&str] = &[
    "a", "an", "the", "is", "are", "of", "for", "to", "in", "on", "what", "your", "our", "my", "i",
    "do", "does", "how", "and", "from", "with", "within", "can", "it", "be", "there", "until",
    "all", "any",
];

/// Bag-of-words embedder. Each new word gets the next dimension.
struct VocabularyEmbedder {
    vocabulary: Mutex<HashMap<String, usize>>,
    calls: AtomicUsize,
    poison: Option<&'static str>,
    offline: AtomicBool,
}

impl VocabularyEmbedder {
    fn new() -> Self {
        Self {
            vocabulary: Mutex::new(HashMap::new()),
            calls: AtomicUsize::new(0),
            poison: None,
            offline: AtomicBool::new(false),
        }
    }

    fn poisoned(word: &'static str) -> Self {
        Self {
            poison: Some(word),
            ..Self::new()
        }
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    fn vector(&self, text: &str) -> Vec<f32> {
        let mut vocabulary = self.vocabulary.lock().unwrap();
        let mut v = vec![0.0f32; DIMS];
        for word in text.to_lowercase().split(|c: char| !c.is_alphanumeric()) {
            let mut word = word.to_string();
            if word.len() > 3 && word.ends_with('s') {
                word.pop();
            }
            if word.is_empty() || STOPWORDS.contains(&word.as_str()) {
                continue;
            }
            let next = vocabulary.len();
            let idx = *vocabulary.entry(word).or_insert(next);
            assert!(idx < DIMS, "vocabulary exhausted");
            v[idx] += 1.0;
        }
        v
    }
}

#[async_trait]
impl Embedder for VocabularyEmbedder {
    fn model_name(&self) -> &str {
        "vocabulary-v1"
    }

    fn dims(&self) -> usize {
        DIMS
    }

    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, CollaboratorError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.offline.load(Ordering::SeqCst) {
            return Err(CollaboratorError::Network("connection refused".into()));
        }
        if let Some(poison) = self.poison {
            if texts.iter().any(|t| t.contains(poison)) {
                return Err(CollaboratorError::Api {
                    status: 400,
                    message: "input rejected".into(),
                });
            }
        }
        Ok(texts.iter().map(|t| self.vector(t)).collect())
    }
}

/// Which prompt templates should fail.
#[derive(Default, Clone, Copy)]
struct Failures {
    enhance: bool,
    answer: bool,
}

/// Answers each prompt template from the prompt text.
///
/// - enhance: resolves "and for jewelry?" against warranty history,
///   otherwise echoes the original query;
/// - summarize: returns the knowledge passages, or `oversized` if set;
/// - answer: quotes the fact the context carries for the query topic.
struct ReadingGenerator {
    failures: Failures,
    oversized: Option<usize>,
    prompts: Mutex<Vec<String>>,
}

impl ReadingGenerator {
    fn new() -> Self {
        Self {
            failures: Failures::default(),
            oversized: None,
            prompts: Mutex::new(Vec::new()),
        }
    }

    fn failing(failures: Failures) -> Self {
        Self {
            failures,
            ..Self::new()
        }
    }

    fn prompts_ending_with(&self, marker: &str) -> Vec<String> {
        self.prompts
            .lock()
            .unwrap()
            .iter()
            .filter(|p| p.ends_with(marker))
            .cloned()
            .collect()
    }

    fn calls(&self) -> usize {
        self.prompts.lock().unwrap().len()
    }
}

fn rejected() -> CollaboratorError {
    CollaboratorError::Api {
        status: 400,
        message: "rejected".into(),
    }
}

fn line_after<'a>(prompt: &'a str, label: &str) -> &'a str {
    prompt
        .lines()
        .find_map(|l| l.strip_prefix(label))
        .unwrap_or("")
        .trim()
}

fn between<'a>(prompt: &'a str, start: &str, end: &str) -> &'a str {
    let from = prompt.find(start).map(|i| i + start.len()).unwrap_or(0);
    let to = prompt[from..].find(end).map(|i| from + i).unwrap_or(prompt.len());
    &prompt[from..to]
}

#[async_trait]
impl Generator for ReadingGenerator {
    fn model_name(&self) -> &str {
        "reading-v1"
    }

    async fn generate(&self, prompt: &str) -> Result<String, CollaboratorError> {
        self.prompts.lock().unwrap().push(prompt.to_string());

        if prompt.ends_with(ENHANCED_QUERY_MARKER) {
            if self.failures.enhance {
                return Err(rejected());
            }
            let query = line_after(prompt, "Original Query:");
            let history = between(prompt, "Previous Conversation:\n", "Original Query:");
            if query.contains("jewelry") && history.contains("warranty") {
                return Ok("What is the warranty on jewelry?".into());
            }
            return Ok(query.to_string());
        }

        if prompt.ends_with(CONDENSED_CONTEXT_MARKER) {
            if let Some(len) = self.oversized {
                return Ok("z".repeat(len));
            }
            let passages = between(prompt, "Knowledge Passages:\n", CONDENSED_CONTEXT_MARKER);
            return Ok(format!("{CONDENSED_CONTEXT_MARKER} {}", passages.trim()));
        }

        if prompt.ends_with(FINAL_ANSWER_MARKER) {
            if self.failures.answer {
                return Err(rejected());
            }
            let query = line_after(prompt, "Customer Query:");
            let context = between(prompt, "Context:\n", "Customer Query:");
            let answer = if query.contains("jewelry") && context.contains("2 years") {
                "Cartier jewelry is covered by a warranty of 2 years."
            } else if query.contains("watch") && context.contains("24 months") {
                "Cartier watches carry a warranty of 24 months."
            } else if query.contains("return") && context.contains("30 days") {
                "Returns are accepted within 30 days."
            } else {
                "I do not have that information."
            };
            return Ok(format!("{FINAL_ANSWER_MARKER} {answer}"));
        }

        Err(rejected())
    }
}

// ─── Fixtures ───────────────────────────────────────────────────────

fn corpus() -> Vec<SourceDocument> {
    vec![
        SourceDocument::new("returns.txt", "Returns accepted within 30 days."),
        SourceDocument::new(
            "watch-warranty.txt",
            "Cartier watches carry a warranty of 24 months from the date of purchase.",
        ),
        SourceDocument::new(
            "jewelry-warranty.txt",
            "Cartier jewelry carries a warranty of 2 years against manufacturing defects.",
        ),
        SourceDocument::new(
            "boutique.txt",
            "Our Dubai Mall boutique opens daily from 10am until midnight for visits.",
        ),
        SourceDocument::new(
            "delivery.txt",
            "Complimentary delivery is offered across all seven emirates of the UAE.",
        ),
    ]
}

fn test_config(db_path: std::path::PathBuf) -> Config {
    let mut config = Config::minimal(db_path);
    config.domain.name = "Cartier UAE".into();
    config.domain.keywords = vec![
        "return".into(),
        "warranty".into(),
        "jewelry".into(),
        "watch".into(),
    ];
    config.retrieval.min_similarity = 0.05;
    config.embedding.requests_per_minute = 60_000;
    config.generation.requests_per_minute = 60_000;
    config
}

fn no_retries() -> CallPolicy {
    CallPolicy::new(Duration::from_secs(5), 0).with_backoff(Duration::ZERO)
}

fn chatbot(
    config: &Config,
    embedder: &Arc<VocabularyEmbedder>,
    generator: &Arc<ReadingGenerator>,
    store: Arc<dyn VectorStore>,
) -> Chatbot {
    let embedder: Arc<dyn Embedder> = embedder.clone();
    let generator: Arc<dyn Generator> = generator.clone();
    Chatbot::new(config, embedder, generator, store).with_call_policies(no_retries(), no_retries())
}

struct Harness {
    bot: Chatbot,
    embedder: Arc<VocabularyEmbedder>,
    generator: Arc<ReadingGenerator>,
}

async fn ingested(generator: ReadingGenerator) -> Harness {
    let config = test_config("unused.sqlite".into());
    harness_with(&config, generator).await
}

async fn harness_with(config: &Config, generator: ReadingGenerator) -> Harness {
    let embedder = Arc::new(VocabularyEmbedder::new());
    let generator = Arc::new(generator);
    let bot = chatbot(config, &embedder, &generator, Arc::new(InMemoryVectorStore::new()));
    let report = bot.ingest(&corpus()).await;
    assert!(report.is_complete());
    Harness {
        bot,
        embedder,
        generator,
    }
}

// ─── Answers ────────────────────────────────────────────────────────

#[tokio::test]
async fn answers_from_the_retrieved_policy() {
    let h = ingested(ReadingGenerator::new()).await;
    let mut session = h.bot.start_session();

    let reply = h
        .bot
        .submit_turn(&mut session, "What is your return policy for purchases?")
        .await
        .unwrap();

    assert_eq!(reply.class, TurnClass::Domain);
    assert!(reply.text.contains("30 days"), "got: {}", reply.text);
    assert_eq!(reply.sources[0], "returns.txt");
    assert!(reply.degradations.is_empty());
    assert_eq!(
        reply.trace,
        vec![
            TurnState::Received,
            TurnState::Enhanced,
            TurnState::Retrieved,
            TurnState::Summarized,
            TurnState::Answered,
            TurnState::Appended,
        ]
    );
    assert_eq!(session.len(), 2);
}

#[tokio::test]
async fn answers_how_long_to_return_an_item() {
    let h = ingested(ReadingGenerator::new()).await;
    let mut session = h.bot.start_session();

    let reply = h
        .bot
        .submit_turn(&mut session, "how long do I have to return an item?")
        .await
        .unwrap();

    assert_eq!(reply.class, TurnClass::Domain);
    assert_eq!(reply.text, "Returns are accepted within 30 days.");
    assert_eq!(reply.sources, vec!["returns.txt".to_string()]);
    assert_eq!(session.len(), 2);
}

#[tokio::test]
async fn follow_up_is_resolved_against_history() {
    let h = ingested(ReadingGenerator::new()).await;
    let mut session = h.bot.start_session();

    let first = h
        .bot
        .submit_turn(&mut session, "What is the warranty on watches?")
        .await
        .unwrap();
    assert!(first.text.contains("24 months"), "got: {}", first.text);

    let second = h.bot.submit_turn(&mut session, "and for jewelry?").await.unwrap();
    let enhanced = second.enhanced_query.clone().unwrap();
    assert!(enhanced.contains("warranty") && enhanced.contains("jewelry"));
    assert!(second.text.contains("2 years"), "got: {}", second.text);

    let enhance_prompts = h.generator.prompts_ending_with(ENHANCED_QUERY_MARKER);
    assert_eq!(enhance_prompts.len(), 2);
    assert!(enhance_prompts[1].contains("User: What is the warranty on watches?"));
    assert_eq!(session.len(), 4);
}

#[tokio::test]
async fn off_domain_questions_are_declined_without_answering() {
    let h = ingested(ReadingGenerator::new()).await;
    let mut session = h.bot.start_session();

    let reply = h
        .bot
        .submit_turn(&mut session, "What is the capital of France?")
        .await
        .unwrap();

    assert_eq!(reply.class, TurnClass::OffDomain);
    assert_eq!(reply.text, h.bot.settings().domain.decline_message);
    assert!(h.generator.prompts_ending_with(FINAL_ANSWER_MARKER).is_empty());
    assert!(h.generator.prompts_ending_with(CONDENSED_CONTEXT_MARKER).is_empty());
}

#[tokio::test]
async fn in_domain_question_without_knowledge_is_unavailable() {
    let h = ingested(ReadingGenerator::new()).await;
    let mut session = h.bot.start_session();

    // Names the domain, but no stored passage is relevant.
    let reply = h
        .bot
        .submit_turn(&mut session, "Do you engrave watch straps?")
        .await
        .unwrap();

    assert_eq!(reply.class, TurnClass::Domain);
    assert_eq!(reply.text, h.bot.settings().domain.unavailable_message);
    assert!(reply.sources.is_empty());
    assert!(h.generator.prompts_ending_with(FINAL_ANSWER_MARKER).is_empty());
}

#[tokio::test]
async fn empty_knowledge_base_asks_for_ingestion() {
    let config = test_config("unused.sqlite".into());
    let embedder = Arc::new(VocabularyEmbedder::new());
    let generator = Arc::new(ReadingGenerator::new());
    let bot = chatbot(&config, &embedder, &generator, Arc::new(InMemoryVectorStore::new()));
    let mut session = bot.start_session();

    let reply = bot
        .submit_turn(&mut session, "What is your return policy?")
        .await
        .unwrap();
    assert_eq!(reply.text, bot.settings().domain.empty_index_message);
    assert!(generator.prompts_ending_with(FINAL_ANSWER_MARKER).is_empty());
}

// ─── Fillers ────────────────────────────────────────────────────────

#[tokio::test]
async fn fillers_short_circuit_the_pipeline() {
    let h = ingested(ReadingGenerator::new()).await;
    let mut session = h.bot.start_session();
    let embed_calls = h.embedder.calls();

    let hello = h.bot.submit_turn(&mut session, "Hello there!").await.unwrap();
    assert_eq!(hello.class, TurnClass::Filler(FillerKind::Greeting));
    assert_eq!(hello.text, h.bot.settings().domain.greeting_reply);
    assert_eq!(hello.trace, vec![TurnState::Received, TurnState::Answered, TurnState::Appended]);

    let thanks = h.bot.submit_turn(&mut session, "thanks so much").await.unwrap();
    assert_eq!(thanks.text, h.bot.settings().domain.thanks_reply);

    assert_eq!(h.embedder.calls(), embed_calls);
    assert_eq!(h.generator.calls(), 0);
    assert_eq!(session.len(), 4);
}

// ─── Degradation and failure ────────────────────────────────────────

#[tokio::test]
async fn enhancement_failure_uses_the_raw_query() {
    let h = ingested(ReadingGenerator::failing(Failures {
        enhance: true,
        answer: false,
    }))
    .await;
    let mut session = h.bot.start_session();

    let raw = "What is your return policy for purchases?";
    let reply = h.bot.submit_turn(&mut session, raw).await.unwrap();

    assert_eq!(reply.enhanced_query.as_deref(), Some(raw));
    assert!(reply.text.contains("30 days"));
    assert!(matches!(
        reply.degradations.as_slice(),
        [PipelineError::EnhancementDegraded(_)]
    ));
}

#[tokio::test]
async fn oversized_summary_keeps_the_context_within_budget() {
    let mut config = test_config("unused.sqlite".into());
    config.conversation.context_budget_chars = 120;
    let mut generator = ReadingGenerator::new();
    generator.oversized = Some(10_000);
    let h = harness_with(&config, generator).await;
    let mut session = h.bot.start_session();

    let reply = h
        .bot
        .submit_turn(&mut session, "What is your return policy for purchases?")
        .await
        .unwrap();

    assert!(reply.degradations.contains(&PipelineError::ContextOverBudget {
        produced: 10_000,
        budget: 120,
    }));
    let answer_prompt = h.generator.prompts_ending_with(FINAL_ANSWER_MARKER).remove(0);
    let context = between(&answer_prompt, "Context:\n", "\n\nCustomer Query:");
    assert!(context.chars().count() <= 120, "context was {} chars", context.chars().count());
    assert!(reply.text.contains("30 days"));
}

#[tokio::test]
async fn failed_generation_leaves_the_session_untouched() {
    let h = ingested(ReadingGenerator::failing(Failures {
        enhance: false,
        answer: true,
    }))
    .await;
    let mut session = h.bot.start_session();
    h.bot.submit_turn(&mut session, "hello").await.unwrap();
    let before = session.transcript();

    let err = h
        .bot
        .submit_turn(&mut session, "What is the warranty on watches?")
        .await
        .unwrap_err();

    assert_eq!(err.message, h.bot.settings().domain.failure_message);
    assert!(matches!(err.error, PipelineError::GenerationFailed { attempts: 2, .. }));
    assert_eq!(err.trace.last(), Some(&TurnState::Failed));
    assert_eq!(h.generator.prompts_ending_with(FINAL_ANSWER_MARKER).len(), 2);
    assert_eq!(session.len(), 2);
    assert_eq!(session.transcript(), before);
}

#[tokio::test]
async fn failed_retrieval_leaves_the_session_usable() {
    let h = ingested(ReadingGenerator::new()).await;
    let mut session = h.bot.start_session();
    h.bot
        .submit_turn(&mut session, "What is the warranty on watches?")
        .await
        .unwrap();
    let before = session.transcript();

    h.embedder.set_offline(true);
    let err = h
        .bot
        .submit_turn(&mut session, "What is your return policy for purchases?")
        .await
        .unwrap_err();

    assert!(matches!(err.error, PipelineError::RetrievalFailed(_)));
    assert_eq!(err.message, h.bot.settings().domain.failure_message);
    assert_eq!(
        err.trace,
        vec![TurnState::Received, TurnState::Enhanced, TurnState::Failed]
    );
    assert_eq!(h.generator.prompts_ending_with(FINAL_ANSWER_MARKER).len(), 1);
    assert_eq!(session.len(), 2);
    assert_eq!(session.transcript(), before);

    h.embedder.set_offline(false);
    let reply = h
        .bot
        .submit_turn(&mut session, "What is your return policy for purchases?")
        .await
        .unwrap();
    assert!(reply.text.contains("30 days"), "got: {}", reply.text);
    assert_eq!(session.len(), 4);
}

#[tokio::test]
async fn history_is_bounded() {
    let mut config = test_config("unused.sqlite".into());
    config.conversation.history_exchanges = 2;
    let h = harness_with(&config, ReadingGenerator::new()).await;
    let mut session = h.bot.start_session();

    for question in [
        "What is your return policy for purchases?",
        "What is the warranty on watches?",
        "When does the Dubai Mall boutique open?",
    ] {
        h.bot.submit_turn(&mut session, question).await.unwrap();
    }

    assert_eq!(session.len(), 4);
    let transcript = session.transcript();
    assert!(!transcript.contains("return policy"));
    assert!(transcript.contains("boutique"));
}

// ─── Sessions ───────────────────────────────────────────────────────

#[tokio::test]
async fn parallel_sessions_do_not_share_history() {
    let h = ingested(ReadingGenerator::new()).await;
    let bot = Arc::new(h.bot);

    let questions = [
        "What is your return policy for purchases?",
        "What is the warranty on watches?",
        "When does the Dubai Mall boutique open?",
        "Is delivery offered across the emirates?",
    ];

    let mut handles = Vec::new();
    for question in questions {
        let bot = Arc::clone(&bot);
        handles.push(tokio::spawn(async move {
            let mut session = bot.start_session();
            bot.submit_turn(&mut session, question).await.unwrap();
            bot.submit_turn(&mut session, "thanks").await.unwrap();
            (question, session)
        }));
    }

    for handle in handles {
        let (question, session) = handle.await.unwrap();
        assert_eq!(session.len(), 4);
        let transcript = session.transcript();
        assert!(transcript.contains(question));
        for other in questions.iter().filter(|q| **q != question) {
            assert!(!transcript.contains(other));
        }
    }
}

// ─── Ingestion ──────────────────────────────────────────────────────

#[tokio::test]
async fn reingesting_an_unchanged_corpus_embeds_nothing() {
    let h = ingested(ReadingGenerator::new()).await;
    let calls = h.embedder.calls();
    let before = h.bot.store().stats().await.unwrap();

    let report = h.bot.ingest(&corpus()).await;
    assert_eq!(report.embedded, 0);
    assert_eq!(report.skipped_unchanged, report.chunks);
    assert_eq!(h.embedder.calls(), calls);
    assert_eq!(h.bot.store().stats().await.unwrap(), before);
}

#[tokio::test]
async fn a_failing_chunk_is_reported_and_skipped() {
    let config = test_config("unused.sqlite".into());
    let embedder = Arc::new(VocabularyEmbedder::poisoned("midnight"));
    let generator = Arc::new(ReadingGenerator::new());
    let bot = chatbot(&config, &embedder, &generator, Arc::new(InMemoryVectorStore::new()));

    let report = bot.ingest(&corpus()).await;

    assert!(!report.is_complete());
    assert_eq!(report.failures.len(), 1);
    assert_eq!(report.failures[0].source_document, "boutique.txt");
    assert!(matches!(
        report.failures[0].to_error(),
        PipelineError::IngestionChunkFailed { .. }
    ));
    assert_eq!(report.embedded, report.chunks - 1);
    assert_eq!(bot.store().stats().await.unwrap().documents, 4);
}

// ─── SQLite ─────────────────────────────────────────────────────────

#[tokio::test]
async fn sqlite_store_serves_searches_while_ingesting() {
    let tmp = TempDir::new().unwrap();
    let config = test_config(tmp.path().join("kb.sqlite"));
    let store = Arc::new(SqliteVectorStore::open(&config).await.unwrap());
    let embedder = Arc::new(VocabularyEmbedder::new());
    let generator = Arc::new(ReadingGenerator::new());
    let bot = Arc::new(chatbot(&config, &embedder, &generator, store.clone()));

    assert!(bot.ingest(&corpus()).await.is_complete());

    let extra: Vec<SourceDocument> = (0..40)
        .map(|i| {
            SourceDocument::new(
                format!("faq-{i:02}.txt"),
                format!("Boutique appointment number {i} can be booked online in advance."),
            )
        })
        .collect();

    let writer = {
        let bot = Arc::clone(&bot);
        tokio::spawn(async move { bot.ingest(&extra).await })
    };
    let reader = {
        let bot = Arc::clone(&bot);
        tokio::spawn(async move {
            let mut tops = Vec::new();
            for _ in 0..20 {
                let result = bot.search("return policy days").await.unwrap();
                tops.push(result.hits[0].chunk.source_document.clone());
                tokio::task::yield_now().await;
            }
            tops
        })
    };

    let report = writer.await.unwrap();
    let tops = reader.await.unwrap();
    assert!(report.is_complete());
    assert!(tops.iter().all(|doc| doc == "returns.txt"));
    assert_eq!(store.stats().await.unwrap().documents, 45);

    let mut session = bot.start_session();
    let reply = bot
        .submit_turn(&mut session, "What is your return policy for purchases?")
        .await
        .unwrap();
    assert!(reply.text.contains("30 days"));
    store.close().await;
}
