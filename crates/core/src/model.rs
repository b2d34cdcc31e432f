//! Model gateway — the call boundary to the model backend.
//!
//! A gateway knows how to send the filtered conversation view, the system
//! prompt, and the permitted tool schemas to a model and get a response back,
//! either as a complete message or as a stream of chunks.
//!
//! Whichever transport is used, the agent always works on a fully assembled
//! [`ModelResponse`]; see [`ModelResponse::assemble`].

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use crate::error::ProviderError;
use crate::message::{Message, MessageToolCall};
use crate::tool::{ToolCall, ToolSchema};

/// A single request to the model backend.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ModelRequest {
    /// The model to use (e.g., "gpt-4o-mini")
    pub model: String,

    /// The conversation view (already filtered and enhanced)
    pub messages: Vec<Message>,

    /// The system prompt, fixed for the whole turn
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub system_prompt: Option<String>,

    /// Tools the calling user may invoke
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tools: Vec<ToolSchema>,

    /// Temperature (0.0 = deterministic, 1.0 = creative)
    #[serde(default = "default_temperature")]
    pub temperature: f32,

    /// Maximum tokens to generate
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,

    /// Whether to stream the response
    #[serde(default)]
    pub stream: bool,

    /// Identity of the caller, for backends that bill or rate-limit per user
    pub user_id: String,

    /// Conversation this request belongs to
    pub conversation_id: String,

    /// Per-turn request id
    pub request_id: String,

    /// Free-form request metadata (middleware may add to it)
    #[serde(default, skip_serializing_if = "serde_json::Map::is_empty")]
    pub metadata: serde_json::Map<String, serde_json::Value>,
}

fn default_temperature() -> f32 {
    0.7
}

/// A complete (non-streaming) response from the model backend.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ModelResponse {
    /// Generated text, possibly empty when the model only requests tools
    #[serde(default)]
    pub content: String,

    /// Tool calls in the order the model issued them
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<ToolCall>,

    /// Token usage statistics
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub usage: Option<Usage>,

    /// Which model actually responded (may differ from requested)
    #[serde(default)]
    pub model: String,

    /// Provider-specific metadata
    #[serde(default, skip_serializing_if = "serde_json::Map::is_empty")]
    pub metadata: serde_json::Map<String, serde_json::Value>,
}

impl ModelResponse {
    /// A text-only response.
    pub fn text(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            ..Default::default()
        }
    }

    /// A response that requests the given tool calls.
    pub fn with_tool_calls(content: impl Into<String>, tool_calls: Vec<ToolCall>) -> Self {
        Self {
            content: content.into(),
            tool_calls,
            ..Default::default()
        }
    }

    pub fn has_tool_calls(&self) -> bool {
        !self.tool_calls.is_empty()
    }

    /// Drain a chunk stream into one materialized response.
    ///
    /// Content deltas are concatenated in arrival order; tool calls arrive
    /// complete (providers accumulate argument deltas themselves) and are
    /// kept in arrival order. Stops at the first chunk flagged `done`.
    pub async fn assemble(
        mut rx: mpsc::Receiver<std::result::Result<StreamChunk, ProviderError>>,
        model: &str,
    ) -> std::result::Result<Self, ProviderError> {
        let mut response = ModelResponse {
            model: model.to_string(),
            ..Default::default()
        };
        while let Some(chunk) = rx.recv().await {
            let chunk = chunk?;
            if let Some(content) = chunk.content {
                response.content.push_str(&content);
            }
            response
                .tool_calls
                .extend(chunk.tool_calls.iter().map(ToolCall::from_message_call));
            if chunk.usage.is_some() {
                response.usage = chunk.usage;
            }
            if chunk.done {
                break;
            }
        }
        Ok(response)
    }
}

/// Token usage information.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Usage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub total_tokens: u32,
}

/// A single chunk in a streaming response.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StreamChunk {
    /// Partial content delta
    #[serde(default)]
    pub content: Option<String>,

    /// Completed tool calls (typically only in the final chunk)
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<MessageToolCall>,

    /// Whether this is the final chunk
    #[serde(default)]
    pub done: bool,

    /// Usage info (typically only in the final chunk)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub usage: Option<Usage>,
}

/// The model backend boundary.
///
/// The agent calls `complete()` or `stream()` without knowing which backend
/// is being used.
#[async_trait]
pub trait ModelGateway: Send + Sync {
    /// A human-readable name for this backend (e.g., "openai", "ollama").
    fn name(&self) -> &str;

    /// Send a request and get a complete response.
    async fn complete(&self, request: ModelRequest) -> std::result::Result<ModelResponse, ProviderError>;

    /// Send a request and get a stream of response chunks.
    ///
    /// Default implementation calls `complete()` and wraps the result as a single chunk.
    async fn stream(
        &self,
        request: ModelRequest,
    ) -> std::result::Result<
        mpsc::Receiver<std::result::Result<StreamChunk, ProviderError>>,
        ProviderError,
    > {
        let response = self.complete(request).await?;
        let (tx, rx) = mpsc::channel(1);
        let _ = tx.send(Ok(StreamChunk {
            content: Some(response.content),
            tool_calls: response.tool_calls.iter().map(ToolCall::to_message_call).collect(),
            done: true,
            usage: response.usage,
        })).await;
        Ok(rx)
    }

    /// Health check — can we reach the backend?
    async fn health_check(&self) -> std::result::Result<bool, ProviderError> {
        Ok(true)
    }
}
