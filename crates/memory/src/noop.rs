//! No-op agent memory — remembers nothing.

use async_trait::async_trait;
use cairn_core::error::MemoryError;
use cairn_core::memory::{
    AgentMemory, TextMemory, TextMemorySearchResult, ToolMemory, ToolMemorySearchResult,
};

/// A memory backend that stores nothing and finds nothing.
pub struct NoopAgentMemory;

#[async_trait]
impl AgentMemory for NoopAgentMemory {
    fn name(&self) -> &str {
        "none"
    }

    async fn save_tool_usage(&self, _memory: ToolMemory) -> Result<(), MemoryError> {
        Ok(())
    }

    async fn search_similar_usage(
        &self,
        _question: &str,
        _limit: usize,
        _similarity_threshold: f32,
        _tool_name_filter: Option<&str>,
    ) -> Result<Vec<ToolMemorySearchResult>, MemoryError> {
        Ok(Vec::new())
    }

    async fn save_text_memory(&self, content: &str) -> Result<TextMemory, MemoryError> {
        Ok(TextMemory::new(content))
    }

    async fn search_text_memories(
        &self,
        _query: &str,
        _limit: usize,
        _similarity_threshold: f32,
    ) -> Result<Vec<TextMemorySearchResult>, MemoryError> {
        Ok(Vec::new())
    }

    async fn recent_memories(&self, _limit: usize) -> Result<Vec<ToolMemory>, MemoryError> {
        Ok(Vec::new())
    }

    async fn delete_by_id(&self, _memory_id: &str) -> Result<bool, MemoryError> {
        Ok(false)
    }

    async fn count(&self) -> Result<usize, MemoryError> {
        Ok(0)
    }

    async fn clear(&self) -> Result<(), MemoryError> {
        Ok(())
    }
}
