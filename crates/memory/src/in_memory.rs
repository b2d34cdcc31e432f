//! In-memory agent memory — useful for testing and ephemeral sessions.

use crate::similarity::{rank_text_memories, rank_tool_memories};
use async_trait::async_trait;
use cairn_core::error::MemoryError;
use cairn_core::memory::{
    AgentMemory, TextMemory, TextMemorySearchResult, ToolMemory, ToolMemorySearchResult,
};
use std::sync::Arc;
use tokio::sync::RwLock;

/// Tool and text memories held by a backend.
#[derive(Debug, Default, Clone)]
pub(crate) struct MemoryState {
    pub(crate) tools: Vec<ToolMemory>,
    pub(crate) texts: Vec<TextMemory>,
}

impl MemoryState {
    /// Apply the size cap, evicting the oldest entries of each kind.
    pub(crate) fn enforce_cap(&mut self, max_items: usize) {
        if self.tools.len() > max_items {
            let excess = self.tools.len() - max_items;
            self.tools.drain(..excess);
        }
        if self.texts.len() > max_items {
            let excess = self.texts.len() - max_items;
            self.texts.drain(..excess);
        }
    }

    pub(crate) fn recent(&self, limit: usize) -> Vec<ToolMemory> {
        let mut recent = self.tools.clone();
        recent.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
        recent.truncate(limit);
        recent
    }

    pub(crate) fn delete(&mut self, memory_id: &str) -> bool {
        let before = self.tools.len() + self.texts.len();
        self.tools.retain(|m| m.memory_id != memory_id);
        self.texts.retain(|m| m.memory_id != memory_id);
        self.tools.len() + self.texts.len() < before
    }
}

/// A simple in-memory agent memory backed by vectors.
pub struct InMemoryAgentMemory {
    state: Arc<RwLock<MemoryState>>,
    max_items: usize,
}

impl InMemoryAgentMemory {
    pub fn new() -> Self {
        Self::with_max_items(10_000)
    }

    /// Keep at most `max_items` tool memories and `max_items` text memories.
    pub fn with_max_items(max_items: usize) -> Self {
        Self {
            state: Arc::new(RwLock::new(MemoryState::default())),
            max_items: max_items.max(1),
        }
    }
}

impl Default for InMemoryAgentMemory {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl AgentMemory for InMemoryAgentMemory {
    fn name(&self) -> &str {
        "in_memory"
    }

    async fn save_tool_usage(&self, memory: ToolMemory) -> Result<(), MemoryError> {
        let mut state = self.state.write().await;
        state.tools.push(memory);
        state.enforce_cap(self.max_items);
        Ok(())
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
        state.enforce_cap(self.max_items);
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
        Ok(self.state.write().await.delete(memory_id))
    }

    async fn count(&self) -> Result<usize, MemoryError> {
        let state = self.state.read().await;
        Ok(state.tools.len() + state.texts.len())
    }

    async fn clear(&self) -> Result<(), MemoryError> {
        let mut state = self.state.write().await;
        state.tools.clear();
        state.texts.clear();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn save_and_search_tool_usage() {
        let memory = InMemoryAgentMemory::new();
        memory
            .save_tool_usage(ToolMemory::new(
                "total revenue per region",
                "run_sql",
                json!({"sql": "SELECT region, SUM(amount) FROM sales GROUP BY region"}),
            ))
            .await
            .unwrap();

        let results = memory
            .search_similar_usage("revenue per region last year", 5, 0.3, Some("run_sql"))
            .await
            .unwrap();
        assert_eq!(results.len(), 1);
        assert!(results[0].similarity_score > 0.3);

        let none = memory
            .search_similar_usage("revenue per region", 5, 0.3, Some("plot_chart"))
            .await
            .unwrap();
        assert!(none.is_empty());
    }

    #[tokio::test]
    async fn text_memories_and_count() {
        let memory = InMemoryAgentMemory::new();
        let saved = memory.save_text_memory("Fiscal year starts in April").await.unwrap();
        memory.save_tool_usage(ToolMemory::new("q", "run_sql", json!({}))).await.unwrap();
        assert_eq!(memory.count().await.unwrap(), 2);

        let found = memory.search_text_memories("when does the fiscal year start", 3, 0.1).await.unwrap();
        assert_eq!(found[0].memory.memory_id, saved.memory_id);

        assert!(memory.delete_by_id(&saved.memory_id).await.unwrap());
        assert!(!memory.delete_by_id(&saved.memory_id).await.unwrap());
        assert_eq!(memory.count().await.unwrap(), 1);

        memory.clear().await.unwrap();
        assert_eq!(memory.count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn cap_evicts_oldest() {
        let memory = InMemoryAgentMemory::with_max_items(2);
        for q in ["first", "second", "third"] {
            memory.save_tool_usage(ToolMemory::new(q, "run_sql", json!({}))).await.unwrap();
        }
        let recent = memory.recent_memories(10).await.unwrap();
        let questions: Vec<_> = recent.iter().map(|m| m.question.as_str()).collect();
        assert_eq!(questions.len(), 2);
        assert!(!questions.contains(&"first"));
    }
}
