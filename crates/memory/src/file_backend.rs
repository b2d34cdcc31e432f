//! File-based agent memory — persistent JSON-lines storage.
//!
//! Each line is one record tagged with its kind:
//!
//! ```text
//! {"kind":"tool","memory_id":"…","question":"…","tool_name":"run_sql","args":{…},"timestamp":"…"}
//! {"kind":"text","memory_id":"…","content":"…","timestamp":"…"}
//! ```
//!
//! Storage location: `~/.cairn/memory/agent_memory.jsonl`

use crate::in_memory::MemoryState;
use crate::similarity::{rank_text_memories, rank_tool_memories};
use async_trait::async_trait;
use cairn_core::error::MemoryError;
use cairn_core::memory::{
    AgentMemory, TextMemory, TextMemorySearchResult, ToolMemory, ToolMemorySearchResult,
};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, warn};

#[derive(Debug, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
enum MemoryRecord {
    Tool(ToolMemory),
    Text(TextMemory),
}

/// A file-backed agent memory using JSONL.
///
/// Records are loaded into memory on creation and the file is rewritten on
/// every mutation. This gives fast reads with durable writes.
pub struct FileAgentMemory {
    path: PathBuf,
    state: Arc<RwLock<MemoryState>>,
}

impl FileAgentMemory {
    /// Open the memory file at `path`, starting empty if it does not exist.
    pub fn new(path: PathBuf) -> Self {
        let state = Self::load_from_disk(&path);
        debug!(
            path = %path.display(),
            tools = state.tools.len(),
            texts = state.texts.len(),
            "File agent memory loaded"
        );
        Self {
            path,
            state: Arc::new(RwLock::new(state)),
        }
    }

    /// Default path: `~/.cairn/memory/agent_memory.jsonl`
    pub fn default_path() -> PathBuf {
        let home = std::env::var("HOME")
            .or_else(|_| std::env::var("USERPROFILE"))
            .unwrap_or_else(|_| ".".to_string());
        PathBuf::from(home)
            .join(".cairn")
            .join("memory")
            .join("agent_memory.jsonl")
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn load_from_disk(path: &Path) -> MemoryState {
        let mut state = MemoryState::default();
        let Ok(content) = std::fs::read_to_string(path) else {
            return state;
        };

        for line in content.lines().filter(|l| !l.trim().is_empty()) {
            match serde_json::from_str::<MemoryRecord>(line) {
                Ok(MemoryRecord::Tool(m)) => state.tools.push(m),
                Ok(MemoryRecord::Text(m)) => state.texts.push(m),
                Err(e) => warn!(error = %e, "Skipping corrupted memory record"),
            }
        }
        state
    }

    /// Rewrite the whole file from `state`.
    fn flush(&self, state: &MemoryState) -> Result<(), MemoryError> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                MemoryError::Storage(format!("Failed to create memory directory: {e}"))
            })?;
        }

        let mut content = String::new();
        let records = state
            .tools
            .iter()
            .cloned()
            .map(MemoryRecord::Tool)
            .chain(state.texts.iter().cloned().map(MemoryRecord::Text));
        for record in records {
            let line = serde_json::to_string(&record)
                .map_err(|e| MemoryError::Serialization(format!("Failed to serialize memory: {e}")))?;
            content.push_str(&line);
            content.push('\n');
        }

        let tmp = self.path.with_extension("jsonl.tmp");
        std::fs::write(&tmp, &content)
            .map_err(|e| MemoryError::Storage(format!("Failed to write memory file: {e}")))?;
        std::fs::rename(&tmp, &self.path)
            .map_err(|e| MemoryError::Storage(format!("Failed to replace memory file: {e}")))?;
        Ok(())
    }
}

#[async_trait]
impl AgentMemory for FileAgentMemory {
    fn name(&self) -> &str {
        "file"
    }

    async fn save_tool_usage(&self, memory: ToolMemory) -> Result<(), MemoryError> {
        let mut state = self.state.write().await;
        state.tools.push(memory);
        self.flush(&state)
    }

    async fn search_similar_usage(
        &self,
        question: &str,
        limit: usize,
        similarity_threshold: f32,
        tool_name_filter: Option<&str>,
    ) -> Result<Vec<ToolMemorySearchResult>, MemoryError> {
        let state = self.state.read().await;
        Ok(rank_tool_memories(&state.tools, question, limit, similarity_threshold, tool_name_filter))
    }

    async fn save_text_memory(&self, content: &str) -> Result<TextMemory, MemoryError> {
        let memory = TextMemory::new(content);
        let mut state = self.state.write().await;
        state.texts.push(memory.clone());
        self.flush(&state)?;
        Ok(memory)
    }

    async fn search_text_memories(
        &self,
        query: &str,
        limit: usize,
        similarity_threshold: f32,
    ) -> Result<Vec<TextMemorySearchResult>, MemoryError> {
        let state = self.state.read().await;
        Ok(rank_text_memories(&state.texts, query, limit, similarity_threshold))
    }

    async fn recent_memories(&self, limit: usize) -> Result<Vec<ToolMemory>, MemoryError> {
        Ok(self.state.read().await.recent(limit))
    }

    async fn delete_by_id(&self, memory_id: &str) -> Result<bool, MemoryError> {
        let mut state = self.state.write().await;
        let deleted = state.delete(memory_id);
        if deleted {
            self.flush(&state)?;
        }
        Ok(deleted)
    }

    async fn count(&self) -> Result<usize, MemoryError> {
        let state = self.state.read().await;
        Ok(state.tools.len() + state.texts.len())
    }

    async fn clear(&self) -> Result<(), MemoryError> {
        let mut state = self.state.write().await;
        state.tools.clear();
        state.texts.clear();
        self.flush(&state)
    }
}
