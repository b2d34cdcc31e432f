//! `cairn memory` — Agent memory management commands.

use cairn_agent::TrainingPair;
use cairn_config::AppConfig;
use cairn_core::error::MemoryError;
use cairn_core::memory::{AgentMemory, ToolMemory};
use cairn_tools::sql::RUN_SQL;
use serde::Deserialize;
use serde_json::json;

use crate::bootstrap::{self, BoxError};

/// Accepted seed file shapes: the array `cairn log export` writes, or an
/// object with question/SQL pairs and free-text notes.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub enum SeedFile {
    Pairs(Vec<TrainingPair>),
    Full {
        #[serde(default)]
        pairs: Vec<TrainingPair>,
        #[serde(default)]
        texts: Vec<String>,
    },
}

impl SeedFile {
    fn into_parts(self) -> (Vec<TrainingPair>, Vec<String>) {
        match self {
            Self::Pairs(pairs) => (pairs, Vec::new()),
            Self::Full { pairs, texts } => (pairs, texts),
        }
    }
}

/// Save every pair as a successful `run_sql` usage and every note as a text
/// memory. Returns `(pairs, texts)` saved.
pub async fn seed_memory(memory: &dyn AgentMemory, seed: SeedFile) -> Result<(usize, usize), MemoryError> {
    let (pairs, texts) = seed.into_parts();
    for pair in &pairs {
        let mut usage = ToolMemory::new(pair.question.clone(), RUN_SQL, json!({ "sql": pair.sql }));
        if let Some(user_id) = &pair.user_id {
            usage.metadata.insert("user_id".into(), json!(user_id));
        }
        memory.save_tool_usage(usage).await?;
    }
    for text in &texts {
        memory.save_text_memory(text).await?;
    }
    Ok((pairs.len(), texts.len()))
}

pub async fn seed(file: &str) -> Result<(), BoxError> {
    let config = AppConfig::load().map_err(|e| format!("Failed to load config: {e}"))?;
    let raw = std::fs::read_to_string(file).map_err(|e| format!("Failed to read {file}: {e}"))?;
    let seed: SeedFile = serde_json::from_str(&raw).map_err(|e| format!("Invalid seed file {file}: {e}"))?;

    let memory = bootstrap::build_memory(&config);
    let (pairs, texts) = seed_memory(memory.as_ref(), seed).await?;
    println!("Seeded {pairs} query examples and {texts} notes into the {} memory", memory.name());
    Ok(())
}

pub async fn stats() -> Result<(), BoxError> {
    let config = AppConfig::load().map_err(|e| format!("Failed to load config: {e}"))?;
    let memory = bootstrap::build_memory(&config);

    println!("Agent Memory");
    println!("============");
    println!("  Backend:  {}", config.memory.backend);
    if config.memory.backend == "file" {
        println!("  File:     {}", config.memory_path().display());
    }
    println!("  Entries:  {}", memory.count().await?);
    for usage in memory.recent_memories(5).await? {
        println!("  - {}", usage.question);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use cairn_memory::InMemoryAgentMemory;

    #[test]
    fn exported_pairs_parse_as_seed() {
        let raw = r#"[{"question": "How many users?", "sql": "SELECT COUNT(*) FROM users"}]"#;
        let (pairs, texts) = serde_json::from_str::<SeedFile>(raw).unwrap().into_parts();
        assert_eq!(pairs.len(), 1);
        assert!(texts.is_empty());
    }

    #[tokio::test]
    async fn seed_saves_usages_and_notes() {
        let raw = r#"{
            "pairs": [{"question": "Top artists", "sql": "SELECT name FROM artists LIMIT 5", "user_id": "ann"}],
            "texts": ["Revenue is stored in cents"]
        }"#;
        let memory = InMemoryAgentMemory::new();
        let seed: SeedFile = serde_json::from_str(raw).unwrap();
        assert_eq!(seed_memory(&memory, seed).await.unwrap(), (1, 1));

        let recent = memory.recent_memories(10).await.unwrap();
        assert_eq!(recent.len(), 1);
        assert_eq!(recent[0].tool_name, RUN_SQL);
        assert_eq!(recent[0].args["sql"], "SELECT name FROM artists LIMIT 5");
        assert_eq!(recent[0].metadata["user_id"], "ann");

        let notes = memory.search_text_memories("revenue cents", 5, 0.1).await.unwrap();
        assert_eq!(notes.len(), 1);
    }
}
