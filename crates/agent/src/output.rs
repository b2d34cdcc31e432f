//! Output units streamed to the caller during a turn.
//!
//! A turn produces an ordered, append-only sequence of [`OutputUnit`]s. The
//! gateway forwards each one as an SSE event named after
//! [`UnitBody::event_type`]; the CLI renders them to the terminal.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One element of a turn's output stream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutputUnit {
    /// Position in the turn's stream, starting at 0
    pub seq: u64,

    /// When the unit was emitted
    pub timestamp: DateTime<Utc>,

    #[serde(flatten)]
    pub body: UnitBody,
}

impl OutputUnit {
    pub fn event_type(&self) -> &'static str {
        self.body.event_type()
    }
}

/// Severity of a [`UnitBody::Status`] unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StatusLevel {
    Info,
    Warning,
}

/// Lifecycle of a tool call as shown in a progress indicator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskState {
    Running,
    Completed,
    Failed,
}

/// What an output unit carries.
///
/// - `status`       — informational or warning notice (e.g. iteration limit)
/// - `task_progress`— a tool call started or finished
/// - `input_control`— enable/disable the caller's input box
/// - `text`         — assistant text
/// - `tool_result`  — a tool call's output and optional UI payload
/// - `rejection`    — a before-tool hook vetoed a call
/// - `failure`      — the turn failed; always the last content unit
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum UnitBody {
    Status { level: StatusLevel, message: String },

    TaskProgress {
        task_id: String,
        title: String,
        state: TaskState,
    },

    InputControl { enabled: bool },

    Text { content: String },

    ToolResult {
        call_id: String,
        tool_name: String,
        success: bool,
        output: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        ui: Option<serde_json::Value>,
    },

    Rejection { tool_name: String, reason: String },

    Failure { message: String },
}

impl UnitBody {
    /// SSE event name for this unit.
    pub fn event_type(&self) -> &'static str {
        match self {
            Self::Status { .. } => "status",
            Self::TaskProgress { .. } => "task_progress",
            Self::InputControl { .. } => "input_control",
            Self::Text { .. } => "text",
            Self::ToolResult { .. } => "tool_result",
            Self::Rejection { .. } => "rejection",
            Self::Failure { .. } => "failure",
        }
    }

    pub fn warning(message: impl Into<String>) -> Self {
        Self::Status {
            level: StatusLevel::Warning,
            message: message.into(),
        }
    }
}
