//! Conversation store — persistence for conversation history.
//!
//! The agent loads a conversation at the start of a turn and saves the whole
//! conversation in one `save` call at the end, so a store only has to make a
//! single write atomic for a turn to be persisted all-or-nothing.

use async_trait::async_trait;
use crate::error::StoreError;
use crate::message::{Conversation, ConversationId};
use crate::user::User;

#[async_trait]
pub trait ConversationStore: Send + Sync {
    /// The backend name (e.g., "memory", "file", "sqlite").
    fn name(&self) -> &str;

    /// Load a conversation owned by `user`.
    ///
    /// Returns `Ok(None)` when no conversation exists under `id`, and
    /// [`StoreError::OwnerMismatch`] when it exists but belongs to someone else.
    async fn load(&self, id: &ConversationId, user: &User) -> std::result::Result<Option<Conversation>, StoreError>;

    /// Persist the whole conversation, replacing any previous version.
    async fn save(&self, conversation: &Conversation) -> std::result::Result<(), StoreError>;

    /// Delete a conversation. Returns whether it existed.
    async fn delete(&self, id: &ConversationId, user: &User) -> std::result::Result<bool, StoreError>;

    /// List the IDs of a user's conversations, most recently updated first.
    async fn list(&self, user: &User, limit: usize) -> std::result::Result<Vec<ConversationId>, StoreError>;
}

/// Ownership check shared by store implementations.
pub fn ensure_owner(conversation: &Conversation, user: &User) -> std::result::Result<(), StoreError> {
    if conversation.user_id == user.id {
        Ok(())
    } else {
        Err(StoreError::OwnerMismatch {
            conversation_id: conversation.id.to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn owner_check() {
        let conv = Conversation::new(ConversationId::from("c1"), "alice");
        assert!(ensure_owner(&conv, &User::new("alice")).is_ok());
        let err = ensure_owner(&conv, &User::new("mallory")).unwrap_err();
        assert!(matches!(err, StoreError::OwnerMismatch { .. }));
    }
}
