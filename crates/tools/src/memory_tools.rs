//! Memory tools — let the model search and grow the agent's long-term memory.
//!
//! All three tools operate on the memory handle carried by the
//! [`RequestEnvelope`], so they share whatever backend the agent was built
//! with.

use async_trait::async_trait;
use cairn_core::context::RequestEnvelope;
use cairn_core::error::ToolError;
use cairn_core::memory::ToolMemory;
use cairn_core::tool::{Tool, ToolResult};
use serde_json::{json, Value};
use std::fmt::Write as _;
use tracing::debug;

pub const SEARCH_TOOL_USES: &str = "search_saved_correct_tool_uses";
pub const SAVE_TOOL_USE: &str = "save_question_tool_args";
pub const SAVE_TEXT_MEMORY: &str = "save_text_memory";

fn memory_failure(tool: &str, e: impl std::fmt::Display) -> ToolError {
    ToolError::ExecutionFailed {
        tool_name: tool.to_string(),
        reason: e.to_string(),
    }
}

// ── Search ────────────────────────────────────────────────────────────────

/// Finds previously saved question → tool usages similar to a question.
pub struct SearchSavedToolUsesTool;

#[async_trait]
impl Tool for SearchSavedToolUsesTool {
    fn name(&self) -> &str {
        SEARCH_TOOL_USES
    }

    fn description(&self) -> &str {
        "Search for previously saved tool usages whose question is similar to the current one. \
         Call this before running other tools to reuse patterns that worked."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "question": {
                    "type": "string",
                    "description": "The user's question"
                },
                "limit": {
                    "type": "integer",
                    "description": "Maximum number of results (default 10)",
                    "default": 10
                },
                "similarity_threshold": {
                    "type": "number",
                    "description": "Minimum similarity between 0 and 1 (default 0.7)",
                    "default": 0.7
                },
                "tool_name_filter": {
                    "type": "string",
                    "description": "Only return usages of this tool"
                }
            },
            "required": ["question"],
            "additionalProperties": false
        })
    }

    async fn execute(&self, arguments: Value, envelope: &RequestEnvelope) -> Result<ToolResult, ToolError> {
        let question = arguments["question"]
            .as_str()
            .ok_or_else(|| ToolError::InvalidArguments("Missing 'question' parameter".into()))?;
        let limit = arguments["limit"].as_u64().unwrap_or(10) as usize;
        let threshold = arguments["similarity_threshold"].as_f64().unwrap_or(0.7) as f32;
        let filter = arguments["tool_name_filter"].as_str();

        let results = envelope
            .memory
            .search_similar_usage(question, limit, threshold, filter)
            .await
            .map_err(|e| memory_failure(SEARCH_TOOL_USES, e))?;
        debug!(question, hits = results.len(), "Searched saved tool usages");

        if results.is_empty() {
            return Ok(ToolResult::success("", "No similar tool usage patterns found for this question."));
        }

        let mut output = format!("Found {} similar tool usage pattern(s):\n", results.len());
        for hit in &results {
            let _ = write!(
                output,
                "\n{}. {} (similarity: {:.2})\n   Question: {}\n   Args: {}\n",
                hit.rank, hit.memory.tool_name, hit.similarity_score, hit.memory.question, hit.memory.args
            );
        }
        let ui = json!({
            "type": "memory_matches",
            "matches": results.iter().map(|hit| json!({
                "question": hit.memory.question,
                "tool_name": hit.memory.tool_name,
                "args": hit.memory.args,
                "similarity": hit.similarity_score,
            })).collect::<Vec<_>>(),
        });
        Ok(ToolResult::success("", output).with_ui(ui))
    }
}

// ── Save tool usage ───────────────────────────────────────────────────────

/// Saves a question together with the tool call that answered it.
pub struct SaveQuestionToolArgsTool;

#[async_trait]
impl Tool for SaveQuestionToolArgsTool {
    fn name(&self) -> &str {
        SAVE_TOOL_USE
    }

    fn description(&self) -> &str {
        "Save a question together with the tool name and arguments that answered it correctly, \
         so similar questions can reuse the pattern."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "question": { "type": "string", "description": "The original question" },
                "tool_name": { "type": "string", "description": "The tool that answered it" },
                "args": { "type": "object", "description": "The arguments that were used" }
            },
            "required": ["question", "tool_name", "args"],
            "additionalProperties": false
        })
    }

    async fn execute(&self, arguments: Value, envelope: &RequestEnvelope) -> Result<ToolResult, ToolError> {
        let question = arguments["question"].as_str().unwrap_or_default();
        let tool_name = arguments["tool_name"].as_str().unwrap_or_default();
        if question.trim().is_empty() || tool_name.trim().is_empty() {
            return Err(ToolError::InvalidArguments("'question' and 'tool_name' must not be empty".into()));
        }

        let mut memory = ToolMemory::new(question, tool_name, arguments["args"].clone());
        memory
            .metadata
            .insert("user_id".into(), Value::String(envelope.user.id.clone()));
        memory
            .metadata
            .insert("conversation_id".into(), Value::String(envelope.conversation_id.to_string()));

        envelope
            .memory
            .save_tool_usage(memory)
            .await
            .map_err(|e| memory_failure(SAVE_TOOL_USE, e))?;
        Ok(ToolResult::success("", format!("Successfully saved usage pattern for '{tool_name}' tool")))
    }
}

// ── Save text ─────────────────────────────────────────────────────────────

/// Saves a free-form note about the schema or domain.
pub struct SaveTextMemoryTool;

#[async_trait]
impl Tool for SaveTextMemoryTool {
    fn name(&self) -> &str {
        SAVE_TEXT_MEMORY
    }

    fn description(&self) -> &str {
        "Save important context about the database, schema, or business domain for later turns."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "content": { "type": "string", "description": "The note to remember" }
            },
            "required": ["content"],
            "additionalProperties": false
        })
    }

    async fn execute(&self, arguments: Value, envelope: &RequestEnvelope) -> Result<ToolResult, ToolError> {
        let content = arguments["content"].as_str().unwrap_or_default().trim();
        if content.is_empty() {
            return Err(ToolError::InvalidArguments("'content' must not be empty".into()));
        }
        let saved = envelope
            .memory
            .save_text_memory(content)
            .await
            .map_err(|e| memory_failure(SAVE_TEXT_MEMORY, e))?;
        Ok(ToolResult::success("", format!("Saved text memory {}", saved.memory_id)))
    }
}
