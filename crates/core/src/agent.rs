//! Turn-scoped agent configuration.

use serde::{Deserialize, Serialize};

/// Tunables read by the agent for the duration of a turn.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentConfig {
    /// Model to request from the gateway
    #[serde(default = "default_model")]
    pub model: String,

    /// Maximum model calls per turn (safety limit)
    #[serde(default = "default_max_iterations")]
    pub max_tool_iterations: u32,

    /// Use the gateway's streaming transport
    #[serde(default)]
    pub stream_responses: bool,

    /// Save the conversation at the end of every turn
    #[serde(default = "default_true")]
    pub auto_save_conversations: bool,

    #[serde(default = "default_temp")]
    pub temperature: f32,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,

    /// Capacity of the output unit channel
    #[serde(default = "default_output_buffer")]
    pub output_buffer: usize,
}

fn default_model() -> String {
    "gpt-4o-mini".into()
}
fn default_max_iterations() -> u32 {
    10
}
fn default_true() -> bool {
    true
}
fn default_temp() -> f32 {
    0.7
}
fn default_output_buffer() -> usize {
    128
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            model: default_model(),
            max_tool_iterations: default_max_iterations(),
            stream_responses: false,
            auto_save_conversations: true,
            temperature: default_temp(),
            max_tokens: None,
            output_buffer: default_output_buffer(),
        }
    }
}
