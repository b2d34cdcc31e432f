//! Conversation filters.

use async_trait::async_trait;
use cairn_core::error::HookError;
use cairn_core::extension::ConversationFilter;
use cairn_core::message::{Conversation, Message, Role};

/// Keeps roughly the latest `max_messages` messages of the view.
///
/// The cut never separates tool results from the assistant message that
/// requested them: a cut landing inside such a group moves back to include
/// the whole group, even if that exceeds the limit. The latest user message
/// is always kept, so the view is never empty.
#[derive(Debug, Clone, Copy)]
pub struct MaxMessagesFilter {
    max_messages: usize,
}

impl MaxMessagesFilter {
    pub fn new(max_messages: usize) -> Self {
        Self { max_messages }
    }
}

#[async_trait]
impl ConversationFilter for MaxMessagesFilter {
    fn name(&self) -> &str {
        "max_messages"
    }

    async fn filter_messages(
        &self,
        messages: Vec<Message>,
        _conversation: &Conversation,
    ) -> Result<Vec<Message>, HookError> {
        if messages.len() <= self.max_messages {
            return Ok(messages);
        }
        let mut start = messages.len() - self.max_messages.max(1);
        while start > 0 && messages[start].role == Role::Tool {
            start -= 1;
        }
        let latest_user = messages.iter().rposition(|m| m.role == Role::User);

        let mut view = Vec::with_capacity(messages.len() - start + 1);
        let mut rest = messages.into_iter().enumerate();
        if let Some(index) = latest_user.filter(|&i| i < start) {
            view.extend(rest.by_ref().nth(index).map(|(_, m)| m));
        }
        view.extend(rest.filter(|(i, _)| *i >= start).map(|(_, m)| m));
        Ok(view)
    }
}
