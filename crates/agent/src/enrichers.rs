//! Context enrichers that populate the request envelope's metadata.

use crate::hooks::QUESTION_KEY;
use crate::turn::USER_MESSAGE_KEY;
use async_trait::async_trait;
use cairn_core::context::RequestEnvelope;
use cairn_core::error::HookError;
use cairn_core::extension::ContextEnricher;
use serde_json::Value;

/// Copies the caller's identity into the envelope metadata.
#[derive(Debug, Default, Clone, Copy)]
pub struct UserContextEnricher;

#[async_trait]
impl ContextEnricher for UserContextEnricher {
    fn name(&self) -> &str {
        "user_context"
    }

    async fn enrich_context(&self, envelope: &RequestEnvelope) -> Result<(), HookError> {
        let user = &envelope.user;
        envelope.metadata.insert("user_id", user.id.clone());
        if let Some(email) = &user.email {
            envelope.metadata.insert("user_email", email.clone());
        }
        let groups: Vec<Value> = user.groups.iter().cloned().map(Value::String).collect();
        envelope.metadata.insert("user_groups", groups);
        Ok(())
    }
}

/// Derives `question` from the turn's user message, collapsing whitespace.
///
/// A `question` already present (set by an earlier enricher) is kept.
#[derive(Debug, Default, Clone, Copy)]
pub struct QuestionEnricher;

#[async_trait]
impl ContextEnricher for QuestionEnricher {
    fn name(&self) -> &str {
        "question"
    }

    async fn enrich_context(&self, envelope: &RequestEnvelope) -> Result<(), HookError> {
        if envelope.metadata.contains_key(QUESTION_KEY) {
            return Ok(());
        }
        if let Some(message) = envelope.metadata.get_str(USER_MESSAGE_KEY) {
            let question = message.split_whitespace().collect::<Vec<_>>().join(" ");
            envelope.metadata.insert(QUESTION_KEY, question);
        }
        Ok(())
    }
}
