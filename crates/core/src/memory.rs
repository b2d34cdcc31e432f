//! Agent memory — long-term similarity search over past tool usage.
//!
//! The memory system lets the agent learn from earlier turns:
//! - Tool memories pair a question with the tool call that answered it
//!   (e.g. the SQL that produced a correct answer)
//! - Text memories hold free-form facts about the domain
//!
//! Both are retrieved by similarity to a new question.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use crate::error::MemoryError;

/// A saved question → tool call pair.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolMemory {
    /// Unique ID for this memory
    pub memory_id: String,

    /// The question the tool call answered
    pub question: String,

    /// Name of the tool that was used
    pub tool_name: String,

    /// Arguments the tool was called with
    pub args: serde_json::Value,

    /// When this memory was created
    pub timestamp: DateTime<Utc>,

    /// Whether the usage was successful
    #[serde(default = "default_success")]
    pub success: bool,

    #[serde(default, skip_serializing_if = "serde_json::Map::is_empty")]
    pub metadata: serde_json::Map<String, serde_json::Value>,
}

fn default_success() -> bool {
    true
}

impl ToolMemory {
    pub fn new(question: impl Into<String>, tool_name: impl Into<String>, args: serde_json::Value) -> Self {
        Self {
            memory_id: Uuid::new_v4().to_string(),
            question: question.into(),
            tool_name: tool_name.into(),
            args,
            timestamp: Utc::now(),
            success: true,
            metadata: serde_json::Map::new(),
        }
    }
}

/// A free-form domain note.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TextMemory {
    pub memory_id: String,
    pub content: String,
    pub timestamp: DateTime<Utc>,
}

impl TextMemory {
    pub fn new(content: impl Into<String>) -> Self {
        Self {
            memory_id: Uuid::new_v4().to_string(),
            content: content.into(),
            timestamp: Utc::now(),
        }
    }
}

/// A tool memory returned by a similarity search.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolMemorySearchResult {
    pub memory: ToolMemory,
    /// Similarity in `[0, 1]`
    pub similarity_score: f32,
    /// 1-based rank within the result set
    pub rank: usize,
}

/// A text memory returned by a similarity search.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TextMemorySearchResult {
    pub memory: TextMemory,
    pub similarity_score: f32,
    pub rank: usize,
}

/// The long-term memory collaborator handed to tools and enhancers.
///
/// Implementations: in-memory, JSONL file, none (no-op).
#[async_trait]
pub trait AgentMemory: Send + Sync {
    /// The backend name (e.g., "in_memory", "file", "none").
    fn name(&self) -> &str;

    /// Save a successful question → tool usage pair.
    async fn save_tool_usage(&self, memory: ToolMemory) -> std::result::Result<(), MemoryError>;

    /// Find tool usages whose question resembles `question`.
    ///
    /// Results are sorted by descending similarity, truncated to `limit`,
    /// and exclude anything below `similarity_threshold`.
    async fn search_similar_usage(
        &self,
        question: &str,
        limit: usize,
        similarity_threshold: f32,
        tool_name_filter: Option<&str>,
    ) -> std::result::Result<Vec<ToolMemorySearchResult>, MemoryError>;

    /// Save a free-form text memory.
    async fn save_text_memory(&self, content: &str) -> std::result::Result<TextMemory, MemoryError>;

    /// Find text memories resembling `query`.
    async fn search_text_memories(
        &self,
        query: &str,
        limit: usize,
        similarity_threshold: f32,
    ) -> std::result::Result<Vec<TextMemorySearchResult>, MemoryError>;

    /// The most recently saved tool memories, newest first.
    async fn recent_memories(&self, limit: usize) -> std::result::Result<Vec<ToolMemory>, MemoryError>;

    /// Delete a memory (tool or text) by ID.
    async fn delete_by_id(&self, memory_id: &str) -> std::result::Result<bool, MemoryError>;

    /// Total number of stored memories (tool + text).
    async fn count(&self) -> std::result::Result<usize, MemoryError>;

    /// Clear all memories.
    async fn clear(&self) -> std::result::Result<(), MemoryError>;
}
