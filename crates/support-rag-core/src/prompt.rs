//! Turn classification and prompt templates.
//!
//! Every prompt the pipeline sends to the generative collaborator is one
//! of the [`PromptTemplate`] variants. Which path a turn takes (filler
//! reply, grounded answer, scoped decline) is decided by [`classify`].

use std::fmt::Write as _;

use crate::models::ScoredChunk;

/// Line that ends the enhancement prompt; the model continues after it.
pub const ENHANCED_QUERY_MARKER: &str = "Enhanced Query:";
/// Line that ends the summarization prompt.
pub const CONDENSED_CONTEXT_MARKER: &str = "Condensed Context:";
/// Line that ends the answer prompt.
pub const FINAL_ANSWER_MARKER: &str = "Final Answer:";

const GREETING_SIGNALS: &[&str] = &[
    "hi", "hello", "hey", "hiya", "greetings", "morning", "afternoon", "evening", "salam",
    "marhaba", "yo",
];
const THANKS_SIGNALS: &[&str] = &["thanks", "thank", "thx", "cheers", "appreciated", "appreciate"];
const FAREWELL_SIGNALS: &[&str] = &[
    "bye", "goodbye", "farewell", "later", "cya", "night", "exit", "quit",
];
const FILLER_GLUE: &[&str] = &[
    "good", "there", "you", "so", "much", "a", "lot", "very", "see", "take", "care", "have",
    "nice", "great", "day", "ok", "okay", "i", "it", "all", "and", "again", "for", "your", "help",
];

/// The domain the chatbot is restricted to.
#[derive(Debug, Clone, Default)]
pub struct DomainPolicy {
    /// Display name, e.g. `"Cartier UAE"`.
    pub name: String,
    /// Lowercase keywords or phrases that mark a query as in-domain.
    pub keywords: Vec<String>,
}

impl DomainPolicy {
    pub fn new(name: impl Into<String>, keywords: Vec<String>) -> Self {
        Self {
            name: name.into(),
            keywords: keywords.into_iter().map(|k| k.to_lowercase()).collect(),
        }
    }

    /// Whether `text` mentions any domain keyword.
    ///
    /// Single-word keywords match the start of a word (`"return"` matches
    /// `"returns"`); multi-word keywords match as phrases.
    pub fn mentions(&self, text: &str) -> bool {
        let words = words(text);
        let joined = words.join(" ");
        self.keywords.iter().any(|kw| {
            if kw.contains(char::is_whitespace) {
                joined.contains(kw.as_str())
            } else {
                words.iter().any(|w| w.starts_with(kw.as_str()))
            }
        })
    }
}

/// Conversational filler that needs no retrieval.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FillerKind {
    Greeting,
    Thanks,
    Farewell,
}

/// How a turn is routed through the pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TurnClass {
    Filler(FillerKind),
    Domain,
    OffDomain,
}

/// Detect greetings, thanks, and farewells.
///
/// An utterance is filler only when every word is a filler word and at
/// least one of them is a greeting, thanks, or farewell signal.
pub fn detect_filler(utterance: &str) -> Option<FillerKind> {
    let words = words(utterance);
    if words.is_empty() {
        return None;
    }

    let is_in = |set: &[&str], w: &str| set.contains(&w);
    let all_filler = words.iter().all(|w| {
        is_in(GREETING_SIGNALS, w)
            || is_in(THANKS_SIGNALS, w)
            || is_in(FAREWELL_SIGNALS, w)
            || is_in(FILLER_GLUE, w)
    });
    if !all_filler {
        return None;
    }

    if words.iter().any(|w| is_in(FAREWELL_SIGNALS, w)) {
        Some(FillerKind::Farewell)
    } else if words.iter().any(|w| is_in(THANKS_SIGNALS, w)) {
        Some(FillerKind::Thanks)
    } else if words.iter().any(|w| is_in(GREETING_SIGNALS, w)) {
        Some(FillerKind::Greeting)
    } else {
        None
    }
}

/// Classify a query once retrieval has run.
///
/// A query is off-domain only when it names no domain keyword and nothing
/// relevant was retrieved for it. With no keywords configured, every
/// non-filler query counts as in-domain.
pub fn classify(query: &str, policy: &DomainPolicy, has_relevant_knowledge: bool) -> TurnClass {
    if let Some(kind) = detect_filler(query) {
        return TurnClass::Filler(kind);
    }
    if has_relevant_knowledge || policy.keywords.is_empty() || policy.mentions(query) {
        TurnClass::Domain
    } else {
        TurnClass::OffDomain
    }
}

/// Prompts sent to the generative collaborator.
#[derive(Debug, Clone)]
pub enum PromptTemplate<'a> {
    /// Rewrite the raw query using recent history.
    Enhance {
        domain: &'a str,
        history: &'a str,
        query: &'a str,
    },
    /// Condense retrieved knowledge and history into a bounded passage.
    Summarize {
        domain: &'a str,
        history: &'a str,
        query: &'a str,
        knowledge: &'a [ScoredChunk],
        budget_chars: usize,
    },
    /// Answer strictly from the condensed context.
    Answer {
        domain: &'a str,
        context: &'a str,
        query: &'a str,
    },
}

impl PromptTemplate<'_> {
    pub fn kind(&self) -> &'static str {
        match self {
            PromptTemplate::Enhance { .. } => "enhance",
            PromptTemplate::Summarize { .. } => "summarize",
            PromptTemplate::Answer { .. } => "answer",
        }
    }

    pub fn render(&self) -> String {
        match self {
            PromptTemplate::Enhance {
                domain,
                history,
                query,
            } => format!(
                "You rewrite customer questions for the {domain} customer service knowledge base.\n\
                 Rewrite the original query so that it:\n\
                 1. has correct spelling and grammar;\n\
                 2. is a complete sentence;\n\
                 3. resolves pronouns and follow-up fragments using the conversation below;\n\
                 4. carries the keywords from the conversation that the knowledge base is likely to contain.\n\
                 Change the query as little as possible. Keep its subject and intent, and do not add claims.\n\
                 Reply with the rewritten query only.\n\n\
                 Previous Conversation:\n{history}\n\
                 Original Query: {query}\n\n\
                 {ENHANCED_QUERY_MARKER}",
                history = or_none(history),
            ),
            PromptTemplate::Summarize {
                domain,
                history,
                query,
                knowledge,
                budget_chars,
            } => {
                let mut passages = String::new();
                for (i, hit) in knowledge.iter().enumerate() {
                    let _ = writeln!(
                        passages,
                        "[{}] ({}) {}",
                        i + 1,
                        hit.chunk.source_document,
                        hit.chunk.text.trim()
                    );
                }
                format!(
                    "You condense material for the {domain} customer service assistant.\n\
                     Do not answer the query. Compress the knowledge passages and the conversation into one passage that:\n\
                     - keeps every fact from the passages that bears on the query, with exact figures, durations and names;\n\
                     - keeps enough of the conversation to resolve references in the next reply;\n\
                     - is at most {budget_chars} characters long.\n\n\
                     Conversation:\n{history}\n\
                     Query: {query}\n\n\
                     Knowledge Passages:\n{passages}\n\
                     {CONDENSED_CONTEXT_MARKER}",
                    history = or_none(history),
                    passages = if passages.is_empty() { "(none)\n".to_string() } else { passages },
                )
            }
            PromptTemplate::Answer {
                domain,
                context,
                query,
            } => format!(
                "You are the customer support assistant for {domain}. Answer using only the context below; \
                 do not rely on outside knowledge.\n\
                 If the query is unrelated to {domain}, say that you can only help with questions about {domain}.\n\
                 If the context does not contain the answer, say that you do not have that information. Never invent details.\n\n\
                 Context:\n{context}\n\n\
                 Customer Query: {query}\n\n\
                 {FINAL_ANSWER_MARKER}",
            ),
        }
    }
}

fn or_none(s: &str) -> &str {
    if s.trim().is_empty() {
        "(none)\n"
    } else {
        s
    }
}

fn words(text: &str) -> Vec<String> {
    text.to_lowercase()
        .split(|c: char| !c.is_alphanumeric() && c != '\'')
        .map(|w| w.trim_matches('\''))
        .filter(|w| !w.is_empty())
        .map(str::to_string)
        .collect()
}
