//! Per-turn query pipeline stages.
//!
//! ```text
//! session history ─▶ enhance ─▶ retrieve ─▶ summarize ─▶ respond
//! ```
//!
//! Each stage is a free function over borrowed collaborators, so stages
//! can be tested in isolation. None of them mutates the
//! [`ConversationSession`](support_rag_core::session::ConversationSession);
//! appending the finished exchange is the orchestrator's job
//! (see [`crate::chatbot`]).

pub mod enhance;
pub mod respond;
pub mod retrieve;
pub mod summarize;

pub use enhance::{enhance, Enhancement};
pub use respond::{filler_reply, respond};
pub use retrieve::retrieve;
pub use summarize::{summarize, BoundedContext, Summary};

/// Strip a leading echo of the template's output marker and surrounding
/// quotes from a model reply.
pub(crate) fn clean_reply(text: &str, marker: &str) -> String {
    let trimmed = text.trim();
    let trimmed = trimmed.strip_prefix(marker).unwrap_or(trimmed).trim();
    trimmed
        .strip_prefix('"')
        .and_then(|t| t.strip_suffix('"'))
        .unwrap_or(trimmed)
        .trim()
        .to_string()
}
