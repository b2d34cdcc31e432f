//! In-memory and file-backed conversation stores.

use async_trait::async_trait;
use cairn_core::error::StoreError;
use cairn_core::message::{Conversation, ConversationId};
use cairn_core::store::{ensure_owner, ConversationStore};
use cairn_core::user::User;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tokio::sync::RwLock;
use tracing::debug;

// ── In-memory ─────────────────────────────────────────────────────────────

/// Conversations kept in a map. Lost on restart.
#[derive(Default)]
pub struct InMemoryConversationStore {
    conversations: RwLock<HashMap<String, Conversation>>,
}

impl InMemoryConversationStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.conversations.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.conversations.read().await.is_empty()
    }
}

#[async_trait]
impl ConversationStore for InMemoryConversationStore {
    fn name(&self) -> &str {
        "memory"
    }

    async fn load(&self, id: &ConversationId, user: &User) -> Result<Option<Conversation>, StoreError> {
        let conversations = self.conversations.read().await;
        match conversations.get(id.as_str()) {
            Some(conv) => {
                ensure_owner(conv, user)?;
                Ok(Some(conv.clone()))
            }
            None => Ok(None),
        }
    }

    async fn save(&self, conversation: &Conversation) -> Result<(), StoreError> {
        self.conversations
            .write()
            .await
            .insert(conversation.id.to_string(), conversation.clone());
        Ok(())
    }

    async fn delete(&self, id: &ConversationId, user: &User) -> Result<bool, StoreError> {
        let mut conversations = self.conversations.write().await;
        match conversations.get(id.as_str()) {
            Some(conv) => {
                ensure_owner(conv, user)?;
                conversations.remove(id.as_str());
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn list(&self, user: &User, limit: usize) -> Result<Vec<ConversationId>, StoreError> {
        let conversations = self.conversations.read().await;
        let mut owned: Vec<&Conversation> = conversations.values().filter(|c| c.user_id == user.id).collect();
        owned.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        Ok(owned.into_iter().take(limit).map(|c| c.id.clone()).collect())
    }
}

// ── File ──────────────────────────────────────────────────────────────────

/// One pretty-printed JSON file per conversation.
///
/// Saves write a temporary file and rename it over the old one, so a reader
/// sees either the previous or the new version of a conversation, never a
/// torn write.
pub struct FileConversationStore {
    dir: PathBuf,
    /// Serializes writers so two saves of one conversation cannot interleave.
    write_lock: tokio::sync::Mutex<()>,
}

impl FileConversationStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            write_lock: tokio::sync::Mutex::new(()),
        }
    }

    /// Default directory: `~/.cairn/conversations`
    pub fn default_dir() -> PathBuf {
        let home = std::env::var("HOME")
            .or_else(|_| std::env::var("USERPROFILE"))
            .unwrap_or_else(|_| ".".to_string());
        PathBuf::from(home).join(".cairn").join("conversations")
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Conversation ids become file names. Bytes outside `[A-Za-z0-9-]`
    /// are escaped as `_XX` (hex), so distinct ids never share a file.
    fn path_for(&self, id: &ConversationId) -> PathBuf {
        self.dir.join(format!("{}.json", encode_file_stem(id.as_str())))
    }

    async fn read(&self, id: &ConversationId) -> Result<Option<Conversation>, StoreError> {
        let path = self.path_for(id);
        let bytes = match tokio::fs::read(&path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(StoreError::Storage(format!("Failed to read {}: {e}", path.display()))),
        };
        let conv: Conversation = serde_json::from_slice(&bytes).map_err(|e| StoreError::Corrupt {
            conversation_id: id.to_string(),
            reason: e.to_string(),
        })?;
        if conv.id != *id {
            return Err(StoreError::Corrupt {
                conversation_id: id.to_string(),
                reason: format!("{} holds conversation '{}'", path.display(), conv.id),
            });
        }
        Ok(Some(conv))
    }
}

fn encode_file_stem(id: &str) -> String {
    let mut stem = String::with_capacity(id.len());
    for byte in id.bytes() {
        if byte.is_ascii_alphanumeric() || byte == b'-' {
            stem.push(char::from(byte));
        } else {
            stem.push_str(&format!("_{byte:02X}"));
        }
    }
    stem
}

#[async_trait]
impl ConversationStore for FileConversationStore {
    fn name(&self) -> &str {
        "file"
    }

    async fn load(&self, id: &ConversationId, user: &User) -> Result<Option<Conversation>, StoreError> {
        match self.read(id).await? {
            Some(conv) => {
                ensure_owner(&conv, user)?;
                Ok(Some(conv))
            }
            None => Ok(None),
        }
    }

    async fn save(&self, conversation: &Conversation) -> Result<(), StoreError> {
        let _guard = self.write_lock.lock().await;
        tokio::fs::create_dir_all(&self.dir)
            .await
            .map_err(|e| StoreError::Storage(format!("Failed to create {}: {e}", self.dir.display())))?;

        let json = serde_json::to_vec_pretty(conversation)
            .map_err(|e| StoreError::Storage(format!("Failed to serialize conversation: {e}")))?;
        let path = self.path_for(&conversation.id);
        let tmp = path.with_extension("json.tmp");
        tokio::fs::write(&tmp, &json)
            .await
            .map_err(|e| StoreError::Storage(format!("Failed to write {}: {e}", tmp.display())))?;
        tokio::fs::rename(&tmp, &path)
            .await
            .map_err(|e| StoreError::Storage(format!("Failed to replace {}: {e}", path.display())))?;

        debug!(conversation_id = %conversation.id, messages = conversation.messages().len(), "Conversation saved");
        Ok(())
    }

    async fn delete(&self, id: &ConversationId, user: &User) -> Result<bool, StoreError> {
        let _guard = self.write_lock.lock().await;
        let Some(conv) = self.read(id).await? else {
            return Ok(false);
        };
        ensure_owner(&conv, user)?;
        tokio::fs::remove_file(self.path_for(id))
            .await
            .map_err(|e| StoreError::Storage(format!("Failed to delete conversation: {e}")))?;
        Ok(true)
    }

    async fn list(&self, user: &User, limit: usize) -> Result<Vec<ConversationId>, StoreError> {
        let mut entries = match tokio::fs::read_dir(&self.dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(StoreError::Storage(format!("Failed to list conversations: {e}"))),
        };

        let mut owned = Vec::new();
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| StoreError::Storage(format!("Failed to list conversations: {e}")))?
        {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            let Ok(bytes) = tokio::fs::read(&path).await else { continue };
            match serde_json::from_slice::<Conversation>(&bytes) {
                Ok(conv) if conv.user_id == user.id => owned.push(conv),
                Ok(_) => {}
                Err(e) => tracing::warn!(path = %path.display(), error = %e, "Skipping unreadable conversation"),
            }
        }
        owned.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        Ok(owned.into_iter().take(limit).map(|c| c.id).collect())
    }
}
