//! SQLite conversation store.
//!
//! One row per conversation; the message list is stored as a JSON document
//! so a save is a single `INSERT … ON CONFLICT DO UPDATE` statement and
//! therefore atomic.

use async_trait::async_trait;
use cairn_core::error::StoreError;
use cairn_core::message::{Conversation, ConversationId};
use cairn_core::store::{ensure_owner, ConversationStore};
use cairn_core::user::User;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous};
use sqlx::{Row, SqlitePool};
use std::str::FromStr;
use tracing::{debug, info};

pub struct SqliteConversationStore {
    pool: SqlitePool,
}

impl SqliteConversationStore {
    /// Open (or create) the database at `path`.
    ///
    /// Pass `"sqlite::memory:"` for an ephemeral database (useful for tests).
    pub async fn new(path: &str) -> Result<Self, StoreError> {
        let options = SqliteConnectOptions::from_str(path)
            .map_err(|e| StoreError::Storage(format!("Invalid SQLite path: {e}")))?
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Normal);

        // An in-memory database lives as long as its connection.
        let max_connections = if path.contains(":memory:") { 1 } else { 4 };
        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .connect_with(options)
            .await
            .map_err(|e| StoreError::Storage(format!("Failed to open SQLite: {e}")))?;

        let store = Self { pool };
        store.run_migrations().await?;
        info!("SQLite conversation store initialized at {path}");
        Ok(store)
    }

    /// Create from an existing pool.
    pub async fn from_pool(pool: SqlitePool) -> Result<Self, StoreError> {
        let store = Self { pool };
        store.run_migrations().await?;
        Ok(store)
    }

    async fn run_migrations(&self) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS conversations (
                id          TEXT PRIMARY KEY NOT NULL,
                user_id     TEXT NOT NULL,
                document    TEXT NOT NULL,
                created_at  TEXT NOT NULL,
                updated_at  TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(|e| StoreError::Storage(format!("conversations table: {e}")))?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_conversations_user ON conversations(user_id, updated_at DESC)",
        )
        .execute(&self.pool)
        .await
        .map_err(|e| StoreError::Storage(format!("user index: {e}")))?;

        debug!("SQLite conversation migrations complete");
        Ok(())
    }

    fn row_to_conversation(row: &sqlx::sqlite::SqliteRow) -> Result<Conversation, StoreError> {
        let id: String = row
            .try_get("id")
            .map_err(|e| StoreError::Storage(format!("id column: {e}")))?;
        let document: String = row
            .try_get("document")
            .map_err(|e| StoreError::Storage(format!("document column: {e}")))?;
        serde_json::from_str(&document).map_err(|e| StoreError::Corrupt {
            conversation_id: id,
            reason: e.to_string(),
        })
    }

    async fn fetch(&self, id: &ConversationId) -> Result<Option<Conversation>, StoreError> {
        let row = sqlx::query("SELECT id, document FROM conversations WHERE id = ?")
            .bind(id.as_str())
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| StoreError::Storage(format!("load: {e}")))?;
        row.as_ref().map(Self::row_to_conversation).transpose()
    }
}

#[async_trait]
impl ConversationStore for SqliteConversationStore {
    fn name(&self) -> &str {
        "sqlite"
    }

    async fn load(&self, id: &ConversationId, user: &User) -> Result<Option<Conversation>, StoreError> {
        match self.fetch(id).await? {
            Some(conv) => {
                ensure_owner(&conv, user)?;
                Ok(Some(conv))
            }
            None => Ok(None),
        }
    }

    async fn save(&self, conversation: &Conversation) -> Result<(), StoreError> {
        let document = serde_json::to_string(conversation)
            .map_err(|e| StoreError::Storage(format!("Failed to serialize conversation: {e}")))?;
        sqlx::query(
            r#"
            INSERT INTO conversations (id, user_id, document, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?)
            ON CONFLICT(id) DO UPDATE SET
                document = excluded.document,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(conversation.id.as_str())
        .bind(&conversation.user_id)
        .bind(&document)
        .bind(conversation.created_at.to_rfc3339())
        .bind(conversation.updated_at.to_rfc3339())
        .execute(&self.pool)
        .await
        .map_err(|e| StoreError::Storage(format!("save: {e}")))?;
        Ok(())
    }

    async fn delete(&self, id: &ConversationId, user: &User) -> Result<bool, StoreError> {
        let Some(conv) = self.fetch(id).await? else {
            return Ok(false);
        };
        ensure_owner(&conv, user)?;
        let result = sqlx::query("DELETE FROM conversations WHERE id = ?")
            .bind(id.as_str())
            .execute(&self.pool)
            .await
            .map_err(|e| StoreError::Storage(format!("delete: {e}")))?;
        Ok(result.rows_affected() > 0)
    }

    async fn list(&self, user: &User, limit: usize) -> Result<Vec<ConversationId>, StoreError> {
        let rows = sqlx::query(
            "SELECT id FROM conversations WHERE user_id = ? ORDER BY updated_at DESC LIMIT ?",
        )
        .bind(&user.id)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| StoreError::Storage(format!("list: {e}")))?;

        rows.iter()
            .map(|row| {
                row.try_get::<String, _>("id")
                    .map(ConversationId)
                    .map_err(|e| StoreError::Storage(format!("id column: {e}")))
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cairn_core::message::Message;

    #[tokio::test]
    async fn save_load_roundtrip() {
        let store = SqliteConversationStore::new("sqlite::memory:").await.unwrap();
        let alice = User::new("alice");
        let mut conv = Conversation::new(ConversationId::from("c1"), "alice");
        conv.push(Message::user("revenue by month"));
        conv.push(Message::assistant("Here it is."));
        store.save(&conv).await.unwrap();

        let loaded = store.load(&conv.id, &alice).await.unwrap().unwrap();
        assert_eq!(loaded, conv);

        conv.push(Message::user("and by week?"));
        store.save(&conv).await.unwrap();
        let reloaded = store.load(&conv.id, &alice).await.unwrap().unwrap();
        assert_eq!(reloaded.messages().len(), 3);
    }

    #[tokio::test]
    async fn owner_is_enforced() {
        let store = SqliteConversationStore::new("sqlite::memory:").await.unwrap();
        let conv = Conversation::new(ConversationId::from("c1"), "alice");
        store.save(&conv).await.unwrap();

        let bob = User::new("bob");
        assert!(matches!(
            store.load(&conv.id, &bob).await,
            Err(StoreError::OwnerMismatch { .. })
        ));
        assert!(store.delete(&conv.id, &bob).await.is_err());
        assert!(store.list(&bob, 10).await.unwrap().is_empty());
        assert!(store.delete(&conv.id, &User::new("alice")).await.unwrap());
    }
}
