//! Query enhancement.
//!
//! One generation call rewrites the raw utterance into a self-contained
//! query: spelling fixed, fragments completed, and references like "and
//! for jewelry?" resolved against the recent history. If the call fails or
//! comes back empty, the raw query is used as-is and the turn carries an
//! [`PipelineError::EnhancementDegraded`].

use support_rag_core::error::PipelineError;
use support_rag_core::prompt::{PromptTemplate, ENHANCED_QUERY_MARKER};
use support_rag_core::session::ConversationSession;
use tracing::{debug, warn};

use crate::collaborator::GenerationClient;

use super::clean_reply;

#[derive(Debug, Clone, PartialEq)]
pub struct Enhancement {
    pub query: String,
    pub degraded: Option<PipelineError>,
}

impl Enhancement {
    fn fallback(raw_query: &str, reason: String) -> Self {
        let error = PipelineError::EnhancementDegraded(reason);
        warn!(error = %error, "using raw query");
        Self {
            query: raw_query.to_string(),
            degraded: Some(error),
        }
    }
}

pub async fn enhance(
    generator: &GenerationClient<'_>,
    domain: &str,
    raw_query: &str,
    session: &ConversationSession,
) -> Enhancement {
    let history = session.transcript();
    let template = PromptTemplate::Enhance {
        domain,
        history: &history,
        query: raw_query,
    };
    let prompt = template.render();

    match generator.generate(template.kind(), &prompt).await {
        Ok(text) => {
            let query = clean_reply(&text, ENHANCED_QUERY_MARKER);
            if query.is_empty() {
                return Enhancement::fallback(raw_query, "empty rewrite".into());
            }
            debug!(raw = raw_query, enhanced = %query, "query enhanced");
            Enhancement {
                query,
                degraded: None,
            }
        }
        Err(e) => Enhancement::fallback(raw_query, e.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collaborator::CallPolicy;
    use crate::pipeline::fakes::ScriptedGenerator;
    use crate::rate_limit::TokenBucket;
    use std::time::Duration;
    use support_rag_core::models::Turn;

    fn policy() -> CallPolicy {
        CallPolicy::new(Duration::from_secs(5), 0)
    }

    #[tokio::test]
    async fn failure_falls_back_to_raw_query() {
        let generator = ScriptedGenerator::failing();
        let quota = TokenBucket::new("gen", 10, 10.0);
        let client = GenerationClient::new(&generator, &quota, policy());

        let session = ConversationSession::default();
        let result = enhance(&client, "Cartier UAE", "wat is teh warrenty", &session).await;
        assert_eq!(result.query, "wat is teh warrenty");
        assert!(matches!(result.degraded, Some(PipelineError::EnhancementDegraded(_))));
    }

    #[tokio::test]
    async fn empty_rewrite_falls_back_to_raw_query() {
        let generator = ScriptedGenerator::new(|_| Ok("Enhanced Query:   ".into()));
        let quota = TokenBucket::new("gen", 10, 10.0);
        let client = GenerationClient::new(&generator, &quota, policy());

        let session = ConversationSession::default();
        let result = enhance(&client, "Cartier UAE", "and for rings?", &session).await;
        assert_eq!(result.query, "and for rings?");
        assert!(result.degraded.is_some());
    }

    #[tokio::test]
    async fn rewrite_sees_history() {
        let generator = ScriptedGenerator::new(|prompt| {
            if prompt.contains("warranty on watches") {
                Ok("What is the warranty on jewelry?".into())
            } else {
                Ok("and for jewelry?".into())
            }
        });
        let quota = TokenBucket::new("gen", 10, 10.0);
        let client = GenerationClient::new(&generator, &quota, policy());

        let mut session = ConversationSession::default();
        session.append_exchange(
            Turn::user("What is the warranty on watches?"),
            Turn::agent("Watches carry a 24 month warranty."),
        );

        let result = enhance(&client, "Cartier UAE", "and for jewelry?", &session).await;
        assert_eq!(result.query, "What is the warranty on jewelry?");
        assert_eq!(result.degraded, None);
        assert_eq!(generator.calls(), 1);
    }
}
