//! Context condensation.
//!
//! Relevant hits (score ≥ `min_similarity`) and the recent history are
//! compressed by one generation call into a single passage no longer than
//! the character budget. The budget is hard:
//!
//! - summary within budget → used as-is;
//! - summary over budget → [`PipelineError::ContextOverBudget`] is recorded
//!   and the context is assembled deterministically from the ranked
//!   passages instead, dropping the lowest-ranked passage until it fits
//!   and cutting the text at the budget as a last resort;
//! - summarization call failed → same deterministic assembly.
//!
//! With no relevant hits no call is made at all.

use std::fmt::Write as _;

use support_rag_core::error::PipelineError;
use support_rag_core::models::{RetrievalResult, ScoredChunk};
use support_rag_core::prompt::{PromptTemplate, CONDENSED_CONTEXT_MARKER};
use support_rag_core::session::ConversationSession;
use tracing::{debug, warn};

use crate::collaborator::GenerationClient;

use super::clean_reply;

/// Context handed to the answer stage.
#[derive(Debug, Clone, PartialEq)]
pub struct BoundedContext {
    pub text: String,
    /// Knowledge passages the context was built from.
    pub knowledge_chunks: usize,
    /// Whether passages were dropped or the text was cut.
    pub truncated: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Summary {
    pub context: BoundedContext,
    pub degradations: Vec<PipelineError>,
}

pub async fn summarize(
    generator: &GenerationClient<'_>,
    domain: &str,
    query: &str,
    retrieval: &RetrievalResult,
    session: &ConversationSession,
    min_similarity: f32,
    budget_chars: usize,
) -> Summary {
    let relevant: Vec<ScoredChunk> = retrieval.relevant(min_similarity).cloned().collect();
    let history = session.transcript();

    if relevant.is_empty() {
        debug!(hits = retrieval.len(), "no relevant knowledge, skipping summarization");
        return Summary {
            context: assemble(&[], &history, budget_chars),
            degradations: Vec::new(),
        };
    }

    let template = PromptTemplate::Summarize {
        domain,
        history: &history,
        query,
        knowledge: &relevant,
        budget_chars,
    };
    let prompt = template.render();

    let mut degradations = Vec::new();
    match generator.generate(template.kind(), &prompt).await {
        Ok(text) => {
            let text = clean_reply(&text, CONDENSED_CONTEXT_MARKER);
            let produced = text.chars().count();
            if produced > 0 && produced <= budget_chars {
                return Summary {
                    context: BoundedContext {
                        text,
                        knowledge_chunks: relevant.len(),
                        truncated: false,
                    },
                    degradations,
                };
            }
            if produced > budget_chars {
                let error = PipelineError::ContextOverBudget {
                    produced,
                    budget: budget_chars,
                };
                warn!(error = %error, "falling back to ranked passages");
                degradations.push(error);
            } else {
                warn!("empty summary, falling back to ranked passages");
            }
        }
        Err(e) => warn!(error = %e, "summarization failed, falling back to ranked passages"),
    }

    Summary {
        context: assemble(&relevant, &history, budget_chars),
        degradations,
    }
}

/// Build a context from ranked passages and history within `budget_chars`.
///
/// Knowledge comes first so a final cut loses history before facts. At
/// least the top passage is kept whenever there is one.
pub fn assemble(passages: &[ScoredChunk], history: &str, budget_chars: usize) -> BoundedContext {
    let mut kept = passages.len();
    let mut text = render(&passages[..kept], history);
    while kept > 1 && text.chars().count() > budget_chars {
        kept -= 1;
        text = render(&passages[..kept], history);
    }

    let mut truncated = kept < passages.len();
    if text.chars().count() > budget_chars {
        text = text.chars().take(budget_chars).collect();
        truncated = true;
    }

    BoundedContext {
        text,
        knowledge_chunks: kept,
        truncated,
    }
}

fn render(passages: &[ScoredChunk], history: &str) -> String {
    let mut out = String::new();
    if !passages.is_empty() {
        out.push_str("Knowledge:\n");
        for (i, hit) in passages.iter().enumerate() {
            let _ = writeln!(out, "[{}] {}", i + 1, hit.chunk.text.trim());
        }
    }
    if !history.trim().is_empty() {
        if !out.is_empty() {
            out.push('\n');
        }
        out.push_str("Conversation:\n");
        out.push_str(history);
    }
    out
}
