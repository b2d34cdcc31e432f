//! The seven extension contracts of the agent.
//!
//! Every contract is a trait whose default methods are the identity
//! transform, so implementing a trait with no overrides is
//! indistinguishable from not registering it at all. The agent invokes each
//! list strictly in registration order.
//!
//! | Contract                  | Runs                                   | May veto |
//! |---------------------------|----------------------------------------|----------|
//! | [`LifecycleHook`]         | before/after message, before/after tool | before_* |
//! | [`LlmMiddleware`]         | around every model call                | no       |
//! | [`ContextEnricher`]       | once per turn, before prompt building  | no       |
//! | [`LlmContextEnhancer`]    | system prompt once, messages per call  | no       |
//! | [`ConversationFilter`]    | once per model call                    | no       |
//! | [`ErrorRecoveryStrategy`] | on tool / model failures               | n/a      |
//! | [`SystemPromptBuilder`]   | once per turn                          | no       |
//!
//! Vetoing hooks veto by returning [`HookError::Rejected`]. Any other `Err`
//! from a non-vetoing extension is treated as a fatal turn error.

use async_trait::async_trait;
use std::time::Duration;
use crate::context::RequestEnvelope;
use crate::error::{HookError, ProviderError};
use crate::message::{Conversation, Message};
use crate::model::{ModelRequest, ModelResponse};
use crate::tool::{ToolCall, ToolFailure, ToolResult, ToolSchema};
use crate::user::User;

type HookResult<T> = std::result::Result<T, HookError>;

/// Observes or vetoes message and tool steps.
#[async_trait]
pub trait LifecycleHook: Send + Sync {
    fn name(&self) -> &str {
        "lifecycle_hook"
    }

    /// Runs before anything else in a turn. `Ok(Some(text))` replaces the
    /// message seen by later hooks and the model; `Err` aborts the turn.
    async fn before_message(&self, _user: &User, _message: &str) -> HookResult<Option<String>> {
        Ok(None)
    }

    /// Runs after the conversation is saved. Observation only.
    async fn after_message(&self, _user: &User, _conversation: &Conversation) -> HookResult<()> {
        Ok(())
    }

    /// Runs before each tool call. `Err` blocks the call.
    async fn before_tool(&self, _call: &ToolCall, _envelope: &RequestEnvelope) -> HookResult<()> {
        Ok(())
    }

    /// Runs after each tool call. `Ok(Some(result))` replaces the result for
    /// later hooks and for history.
    async fn after_tool(
        &self,
        _call: &ToolCall,
        _result: &ToolResult,
        _envelope: &RequestEnvelope,
    ) -> HookResult<Option<ToolResult>> {
        Ok(None)
    }
}

/// Transforms model requests and responses.
#[async_trait]
pub trait LlmMiddleware: Send + Sync {
    fn name(&self) -> &str {
        "llm_middleware"
    }

    async fn before_llm_request(&self, request: ModelRequest) -> HookResult<ModelRequest> {
        Ok(request)
    }

    /// Always receives a fully assembled response, streamed or not.
    async fn after_llm_response(
        &self,
        _request: &ModelRequest,
        response: ModelResponse,
    ) -> HookResult<ModelResponse> {
        Ok(response)
    }
}

/// Populates the envelope metadata before the prompt is built.
#[async_trait]
pub trait ContextEnricher: Send + Sync {
    fn name(&self) -> &str {
        "context_enricher"
    }

    async fn enrich_context(&self, _envelope: &RequestEnvelope) -> HookResult<()> {
        Ok(())
    }
}

/// Augments prompt content with retrieved context.
#[async_trait]
pub trait LlmContextEnhancer: Send + Sync {
    fn name(&self) -> &str {
        "context_enhancer"
    }

    /// Called once per turn.
    async fn enhance_system_prompt(
        &self,
        system_prompt: String,
        _user_message: &str,
        _envelope: &RequestEnvelope,
    ) -> HookResult<String> {
        Ok(system_prompt)
    }

    /// Called before every model call; guard against re-injection yourself.
    async fn enhance_user_messages(
        &self,
        messages: Vec<Message>,
        _envelope: &RequestEnvelope,
    ) -> HookResult<Vec<Message>> {
        Ok(messages)
    }
}

/// Narrows the history view sent to the model.
#[async_trait]
pub trait ConversationFilter: Send + Sync {
    fn name(&self) -> &str {
        "conversation_filter"
    }

    /// `messages` is the view produced by the previous filter; `conversation`
    /// is the live, unfiltered conversation.
    async fn filter_messages(
        &self,
        messages: Vec<Message>,
        _conversation: &Conversation,
    ) -> HookResult<Vec<Message>> {
        Ok(messages)
    }
}

/// What to do about a failed tool call or model call.
#[derive(Debug, Clone, PartialEq)]
pub enum RecoveryAction<T> {
    /// Wait, then run the failed operation again.
    Retry { delay: Duration },
    /// Give up on the operation with this message.
    Fail { message: String },
    /// Use this value in place of the failed operation's output.
    Fallback(T),
    /// Drop the operation and carry on.
    Skip,
}

/// Policy consulted on transient failures.
///
/// `attempt` is 1 on the first failure of an operation and increases by one
/// on each further failure of the same operation.
#[async_trait]
pub trait ErrorRecoveryStrategy: Send + Sync {
    fn name(&self) -> &str {
        "error_recovery"
    }

    async fn handle_tool_error(
        &self,
        failure: &ToolFailure,
        _call: &ToolCall,
        _envelope: &RequestEnvelope,
        _attempt: u32,
    ) -> RecoveryAction<ToolResult> {
        RecoveryAction::Fail { message: failure.message.clone() }
    }

    async fn handle_llm_error(
        &self,
        error: &ProviderError,
        _request: &ModelRequest,
        _attempt: u32,
    ) -> RecoveryAction<ModelResponse> {
        RecoveryAction::Fail { message: error.to_string() }
    }
}

/// Produces the system prompt for a turn.
#[async_trait]
pub trait SystemPromptBuilder: Send + Sync {
    /// `tools` is already filtered to what `user` may call.
    async fn build_system_prompt(&self, user: &User, tools: &[ToolSchema]) -> HookResult<Option<String>>;
}
