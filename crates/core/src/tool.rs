//! Tool trait and the types that cross the tool registry boundary.
//!
//! Tools are what give the agent the ability to act: run a read-only query,
//! search saved memories, save a training example.
//!
//! A tool body returns `Result<ToolResult, ToolError>`; the registry turns
//! every failure into a [`ToolResult`] carrying a [`ToolFailure`] so that
//! nothing past the registry has to deal with `Err`.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use crate::context::RequestEnvelope;
use crate::error::ToolError;
use crate::message::MessageToolCall;

/// Metadata key the registry stamps with the executed tool's name.
pub const META_TOOL_NAME: &str = "tool_name";
/// Metadata key the registry stamps with the validated arguments.
pub const META_ARGUMENTS: &str = "arguments";
/// Metadata key the registry stamps with the body's wall-clock time.
pub const META_EXECUTION_TIME_MS: &str = "execution_time_ms";

/// Keys the registry owns in [`ToolResult::metadata`]. Tool-set values under
/// these keys are overwritten.
pub const RESERVED_METADATA_KEYS: [&str; 3] = [META_TOOL_NAME, META_ARGUMENTS, META_EXECUTION_TIME_MS];

/// A request to execute a tool.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    /// Unique call ID (matches the model's tool_call.id)
    pub id: String,

    /// Name of the tool to execute
    pub name: String,

    /// Raw arguments as produced by the model
    pub arguments: serde_json::Value,
}

impl ToolCall {
    pub fn new(id: impl Into<String>, name: impl Into<String>, arguments: serde_json::Value) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            arguments,
        }
    }

    /// Parse a call recorded in an assistant message.
    ///
    /// Arguments that are not valid JSON are kept as a raw string so that
    /// schema validation reports them instead of silently dropping them.
    pub fn from_message_call(call: &MessageToolCall) -> Self {
        let arguments = if call.arguments.trim().is_empty() {
            serde_json::Value::Object(serde_json::Map::new())
        } else {
            serde_json::from_str(&call.arguments)
                .unwrap_or_else(|_| serde_json::Value::String(call.arguments.clone()))
        };
        Self {
            id: call.id.clone(),
            name: call.name.clone(),
            arguments,
        }
    }

    pub fn to_message_call(&self) -> MessageToolCall {
        MessageToolCall {
            id: self.id.clone(),
            name: self.name.clone(),
            arguments: self.arguments.to_string(),
        }
    }
}

/// Why a tool call did not produce a successful result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ToolErrorKind {
    /// No tool registered under the requested name
    NotFound,
    /// The caller's groups do not grant access
    PermissionDenied,
    /// Arguments failed schema validation
    InvalidArguments,
    /// The registry's argument transformer refused the call
    Rejected,
    /// The tool body returned an error
    ExecutionFailed,
    /// A before-tool hook blocked the call
    Vetoed,
    /// The recovery strategy chose to skip the call
    Skipped,
}

impl ToolErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::NotFound => "NOT_FOUND",
            Self::PermissionDenied => "PERMISSION_DENIED",
            Self::InvalidArguments => "INVALID_ARGUMENTS",
            Self::Rejected => "REJECTED",
            Self::ExecutionFailed => "EXECUTION_FAILED",
            Self::Vetoed => "VETOED",
            Self::Skipped => "SKIPPED",
        }
    }
}

impl std::fmt::Display for ToolErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Structured error attached to a failed [`ToolResult`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolFailure {
    pub kind: ToolErrorKind,
    pub message: String,
}

/// The result of a tool execution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolResult {
    /// The call ID this result is for
    pub call_id: String,

    /// Whether the tool executed successfully
    pub success: bool,

    /// The text fed back to the model
    pub output: String,

    /// Structured error, present when `success` is false
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ToolFailure>,

    /// Optional payload for UI rendering (tables, charts)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ui: Option<serde_json::Value>,

    /// Metadata; see [`RESERVED_METADATA_KEYS`]
    #[serde(default, skip_serializing_if = "serde_json::Map::is_empty")]
    pub metadata: serde_json::Map<String, serde_json::Value>,
}

impl ToolResult {
    pub fn success(call_id: impl Into<String>, output: impl Into<String>) -> Self {
        Self {
            call_id: call_id.into(),
            success: true,
            output: output.into(),
            error: None,
            ui: None,
            metadata: serde_json::Map::new(),
        }
    }

    /// A failed result. The failure message doubles as the model-facing output.
    pub fn failure(call_id: impl Into<String>, kind: ToolErrorKind, message: impl Into<String>) -> Self {
        let message = message.into();
        Self {
            call_id: call_id.into(),
            success: false,
            output: format!("Error: {message}"),
            error: Some(ToolFailure { kind, message }),
            ui: None,
            metadata: serde_json::Map::new(),
        }
    }

    pub fn with_ui(mut self, ui: serde_json::Value) -> Self {
        self.ui = Some(ui);
        self
    }

    pub fn error_kind(&self) -> Option<ToolErrorKind> {
        self.error.as_ref().map(|e| e.kind)
    }
}

/// What the model is told about a tool.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolSchema {
    /// The tool name
    pub name: String,

    /// Description of what the tool does
    pub description: String,

    /// JSON Schema describing the tool's parameters
    pub parameters: serde_json::Value,

    /// Groups allowed to call the tool; empty means everyone
    #[serde(default)]
    pub access_groups: Vec<String>,
}

/// The core Tool trait.
///
/// Each tool implements this trait and is registered in the tool registry
/// together with the groups that may call it.
#[async_trait]
pub trait Tool: Send + Sync {
    /// The unique name of this tool (e.g., "run_sql").
    fn name(&self) -> &str;

    /// A description of what this tool does (sent to the model).
    fn description(&self) -> &str;

    /// JSON Schema describing this tool's parameters.
    fn parameters_schema(&self) -> serde_json::Value;

    /// Execute the tool with validated arguments.
    ///
    /// `call_id` on the returned result is overwritten by the registry.
    async fn execute(
        &self,
        arguments: serde_json::Value,
        envelope: &RequestEnvelope,
    ) -> std::result::Result<ToolResult, ToolError>;

    /// Build the schema sent to the model.
    fn to_schema(&self, access_groups: &[String]) -> ToolSchema {
        ToolSchema {
            name: self.name().to_string(),
            description: self.description().to_string(),
            parameters: self.parameters_schema(),
            access_groups: access_groups.to_vec(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_kind_serializes_screaming_snake() {
        let json = serde_json::to_string(&ToolErrorKind::PermissionDenied).unwrap();
        assert_eq!(json, "\"PERMISSION_DENIED\"");
        assert_eq!(ToolErrorKind::ExecutionFailed.to_string(), "EXECUTION_FAILED");
    }

    #[test]
    fn failure_result_carries_kind_and_message() {
        let result = ToolResult::failure("c1", ToolErrorKind::NotFound, "Tool not found: nope");
        assert!(!result.success);
        assert_eq!(result.error_kind(), Some(ToolErrorKind::NotFound));
        assert!(result.output.contains("nope"));
        assert!(result.metadata.is_empty());
    }

    #[test]
    fn malformed_message_arguments_are_kept_raw() {
        let call = ToolCall::from_message_call(&MessageToolCall {
            id: "c1".into(),
            name: "run_sql".into(),
            arguments: "{not json".into(),
        });
        assert_eq!(call.arguments, serde_json::Value::String("{not json".into()));
    }

    #[test]
    fn empty_message_arguments_become_empty_object() {
        let call = ToolCall::from_message_call(&MessageToolCall {
            id: "c1".into(),
            name: "list_tables".into(),
            arguments: "".into(),
        });
        assert!(call.arguments.as_object().unwrap().is_empty());
    }

    #[test]
    fn reserved_keys_are_stable() {
        assert_eq!(RESERVED_METADATA_KEYS, ["tool_name", "arguments", "execution_time_ms"]);
    }
}
