//! Scripted test doubles for driving the agent without a real model.
//!
//! Used by this crate's tests and by the workspace's scenario tests.

use crate::output::OutputUnit;
use async_trait::async_trait;
use cairn_core::context::RequestEnvelope;
use cairn_core::error::{HookError, ProviderError, ToolError};
use cairn_core::extension::LifecycleHook;
use cairn_core::message::Conversation;
use cairn_core::model::{ModelGateway, ModelRequest, ModelResponse, Usage};
use cairn_core::tool::{Tool, ToolCall, ToolResult};
use cairn_core::user::User;
use futures::{Stream, StreamExt};
use serde_json::{json, Value};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

// ── Model ─────────────────────────────────────────────────────────────────

/// A model gateway that returns a sequence of scripted responses.
///
/// Each call returns the next entry. When the script runs out it either
/// repeats the last entry (see [`SequentialMockModel::repeating`]) or fails
/// with [`ProviderError::NotConfigured`].
pub struct SequentialMockModel {
    responses: Mutex<Vec<Result<ModelResponse, ProviderError>>>,
    requests: Mutex<Vec<ModelRequest>>,
    repeat_last: bool,
    delay: Option<Duration>,
}

impl SequentialMockModel {
    pub fn new(responses: Vec<ModelResponse>) -> Self {
        Self::scripted(responses.into_iter().map(Ok).collect())
    }

    /// Script that may include provider failures.
    pub fn scripted(responses: Vec<Result<ModelResponse, ProviderError>>) -> Self {
        Self {
            responses: Mutex::new(responses),
            requests: Mutex::new(Vec::new()),
            repeat_last: false,
            delay: None,
        }
    }

    /// Always answer with `response`.
    pub fn repeating(response: ModelResponse) -> Self {
        let mut model = Self::new(vec![response]);
        model.repeat_last = true;
        model
    }

    pub fn single_text(text: &str) -> Self {
        Self::new(vec![make_text_response(text)])
    }

    /// First request the given tool calls, then answer.
    pub fn tool_then_answer(calls: Vec<ToolCall>, answer: &str) -> Self {
        Self::new(vec![make_tool_call_response(calls, ""), make_text_response(answer)])
    }

    /// Sleep before every response.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn call_count(&self) -> usize {
        self.requests.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    /// Every request received so far, in order.
    pub fn requests(&self) -> Vec<ModelRequest> {
        self.requests.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    fn next_response(&self, index: usize) -> Result<ModelResponse, ProviderError> {
        let responses = self.responses.lock().unwrap_or_else(PoisonError::into_inner);
        let entry = match responses.get(index) {
            Some(entry) => entry,
            None if self.repeat_last => match responses.last() {
                Some(entry) => entry,
                None => return Err(ProviderError::NotConfigured("empty script".into())),
            },
            None => {
                return Err(ProviderError::NotConfigured(format!(
                    "no more responses (call #{index}, have {})",
                    responses.len()
                )));
            }
        };
        entry.clone()
    }
}

#[async_trait]
impl ModelGateway for SequentialMockModel {
    fn name(&self) -> &str {
        "sequential_mock"
    }

    async fn complete(&self, request: ModelRequest) -> Result<ModelResponse, ProviderError> {
        let index = {
            let mut requests = self.requests.lock().unwrap_or_else(PoisonError::into_inner);
            requests.push(request);
            requests.len() - 1
        };
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        self.next_response(index)
    }
}

/// A plain text answer with token usage.
pub fn make_text_response(text: &str) -> ModelResponse {
    ModelResponse {
        usage: Some(Usage {
            prompt_tokens: 10,
            completion_tokens: 5,
            total_tokens: 15,
        }),
        ..ModelResponse::text(text)
    }
}

/// A response requesting tool calls, with optional accompanying text.
pub fn make_tool_call_response(calls: Vec<ToolCall>, thought: &str) -> ModelResponse {
    ModelResponse {
        usage: Some(Usage {
            prompt_tokens: 20,
            completion_tokens: 10,
            total_tokens: 30,
        }),
        ..ModelResponse::with_tool_calls(thought, calls)
    }
}

pub fn make_tool_call(id: &str, name: &str, arguments: Value) -> ToolCall {
    ToolCall::new(id, name, arguments)
}

// ── Tools ─────────────────────────────────────────────────────────────────

/// A tool that records every invocation and can be told to fail.
pub struct RecordingTool {
    name: String,
    output: String,
    failures_remaining: Mutex<u32>,
    calls: Mutex<Vec<Value>>,
}

impl RecordingTool {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            output: format!("{name} ok"),
            failures_remaining: Mutex::new(0),
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn with_output(mut self, output: &str) -> Self {
        self.output = output.to_string();
        self
    }

    /// Fail the first `n` invocations with an execution error.
    pub fn failing_times(self, n: u32) -> Self {
        *self.failures_remaining.lock().unwrap_or_else(PoisonError::into_inner) = n;
        self
    }

    pub fn invocations(&self) -> usize {
        self.calls.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    /// Arguments of every invocation, in order.
    pub fn arguments(&self) -> Vec<Value> {
        self.calls.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }
}

#[async_trait]
impl Tool for RecordingTool {
    fn name(&self) -> &str {
        &self.name
    }

    fn description(&self) -> &str {
        "Records its invocations"
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "query": { "type": "string" },
                "sql": { "type": "string" }
            }
        })
    }

    async fn execute(&self, arguments: Value, _envelope: &RequestEnvelope) -> Result<ToolResult, ToolError> {
        self.calls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(arguments);
        let mut failures = self.failures_remaining.lock().unwrap_or_else(PoisonError::into_inner);
        if *failures > 0 {
            *failures -= 1;
            return Err(ToolError::ExecutionFailed {
                tool_name: self.name.clone(),
                reason: "simulated failure".into(),
            });
        }
        Ok(ToolResult::success("", self.output.clone()))
    }
}

// ── Hooks ─────────────────────────────────────────────────────────────────

/// Shared, ordered event log written by recording extensions.
#[derive(Debug, Clone, Default)]
pub struct EventLog(Arc<Mutex<Vec<String>>>);

impl EventLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, event: impl Into<String>) {
        self.0.lock().unwrap_or_else(PoisonError::into_inner).push(event.into());
    }

    pub fn events(&self) -> Vec<String> {
        self.0.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }
}

/// A lifecycle hook that logs every callback as `"{label}:{event}"` and can
/// veto tools or messages.
pub struct RecordingHook {
    label: String,
    log: EventLog,
    veto_tool: Option<String>,
    reject_message: bool,
    suffix: Option<String>,
}

impl RecordingHook {
    pub fn new(label: &str, log: EventLog) -> Self {
        Self {
            label: label.to_string(),
            log,
            veto_tool: None,
            reject_message: false,
            suffix: None,
        }
    }

    /// Veto every call of `tool`.
    pub fn vetoing(mut self, tool: &str) -> Self {
        self.veto_tool = Some(tool.to_string());
        self
    }

    /// Reject every inbound message.
    pub fn rejecting_messages(mut self) -> Self {
        self.reject_message = true;
        self
    }

    /// Append `suffix` to the inbound message.
    pub fn appending(mut self, suffix: &str) -> Self {
        self.suffix = Some(suffix.to_string());
        self
    }
}

#[async_trait]
impl LifecycleHook for RecordingHook {
    fn name(&self) -> &str {
        &self.label
    }

    async fn before_message(&self, _user: &User, message: &str) -> Result<Option<String>, HookError> {
        self.log.push(format!("{}:before_message:{message}", self.label));
        if self.reject_message {
            return Err(HookError::rejected(format!("{} rejected the message", self.label)));
        }
        Ok(self.suffix.as_ref().map(|s| format!("{message}{s}")))
    }

    async fn after_message(&self, _user: &User, conversation: &Conversation) -> Result<(), HookError> {
        self.log
            .push(format!("{}:after_message:{}", self.label, conversation.messages().len()));
        Ok(())
    }

    async fn before_tool(&self, call: &ToolCall, _envelope: &RequestEnvelope) -> Result<(), HookError> {
        self.log.push(format!("{}:before_tool:{}", self.label, call.name));
        if self.veto_tool.as_deref() == Some(call.name.as_str()) {
            return Err(HookError::rejected(format!("{} is not allowed here", call.name)));
        }
        Ok(())
    }

    async fn after_tool(
        &self,
        call: &ToolCall,
        _result: &ToolResult,
        _envelope: &RequestEnvelope,
    ) -> Result<Option<ToolResult>, HookError> {
        self.log.push(format!("{}:after_tool:{}", self.label, call.name));
        Ok(None)
    }
}

/// Drain a turn's output stream.
pub async fn collect_units(stream: impl Stream<Item = OutputUnit>) -> Vec<OutputUnit> {
    stream.collect().await
}
