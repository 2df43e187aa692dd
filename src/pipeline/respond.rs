//! Guardrailed answer generation.
//!
//! Guardrails are applied before any generation call:
//!
//! | Turn class | Context | Reply |
//! |------------|---------|-------|
//! | filler | any | canned courteous reply, no call |
//! | off-domain | any | `decline_message`, no call |
//! | domain | no knowledge | `unavailable_message`, no call |
//! | domain | knowledge | answer prompt, at most `max_attempts` calls |
//!
//! The answer prompt itself restates both refusals so the model declines
//! rather than fabricates when the context does not cover the query.

use support_rag_core::error::PipelineError;
use support_rag_core::prompt::{FillerKind, PromptTemplate, TurnClass, FINAL_ANSWER_MARKER};
use tracing::{debug, warn};

use crate::collaborator::GenerationClient;
use crate::config::DomainConfig;

use super::{clean_reply, BoundedContext};

/// The configured reply for a conversational filler.
pub fn filler_reply(domain: &DomainConfig, kind: FillerKind) -> &str {
    match kind {
        FillerKind::Greeting => &domain.greeting_reply,
        FillerKind::Thanks => &domain.thanks_reply,
        FillerKind::Farewell => &domain.farewell_reply,
    }
}

pub async fn respond(
    generator: &GenerationClient<'_>,
    domain: &DomainConfig,
    class: TurnClass,
    query: &str,
    context: &BoundedContext,
    max_attempts: u32,
) -> Result<String, PipelineError> {
    match class {
        TurnClass::Filler(kind) => return Ok(filler_reply(domain, kind).to_string()),
        TurnClass::OffDomain => {
            debug!(query, "declining off-domain query");
            return Ok(domain.decline_message.clone());
        }
        TurnClass::Domain if context.knowledge_chunks == 0 => {
            debug!(query, "no knowledge for query");
            return Ok(domain.unavailable_message.clone());
        }
        TurnClass::Domain => {}
    }

    let template = PromptTemplate::Answer {
        domain: &domain.name,
        context: &context.text,
        query,
    };
    let prompt = template.render();

    let attempts = max_attempts.max(1);
    let mut last_error = String::new();
    for attempt in 1..=attempts {
        match generator.generate(template.kind(), &prompt).await {
            Ok(text) => {
                let answer = clean_reply(&text, FINAL_ANSWER_MARKER);
                if !answer.is_empty() {
                    return Ok(answer);
                }
                last_error = "empty answer".to_string();
            }
            Err(e) => last_error = e.to_string(),
        }
        warn!(attempt, attempts, error = %last_error, "answer attempt failed");
    }

    Err(PipelineError::GenerationFailed {
        attempts,
        reason: last_error,
    })
}
