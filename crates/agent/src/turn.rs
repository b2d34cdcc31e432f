//! One turn of the agent state machine.
//!
//! ```text
//! ResolveUser → BeforeMessage hooks → LoadConversation → EnrichContext
//!   → FetchToolSchemas → BuildSystemPrompt → EnhanceSystemPrompt
//!   → ToolLoop { filter → enhance messages → middleware → model → middleware
//!                → [before_tool → registry (+ recovery) → after_tool]* }
//!   → SaveConversation → AfterMessage hooks
//! ```
//!
//! Every error escaping the state machine is caught once in
//! [`Agent::run_turn`] and surfaced as a single `failure` unit.

use crate::agent::Agent;
use crate::emitter::Emitter;
use crate::output::{TaskState, UnitBody};
use cairn_core::context::RequestEnvelope;
use cairn_core::error::{Error, HookError, ProviderError, Result};
use cairn_core::extension::RecoveryAction;
use cairn_core::message::{Conversation, ConversationId, Message};
use cairn_core::model::{ModelRequest, ModelResponse};
use cairn_core::observability::{Metric, Span};
use cairn_core::tool::{ToolCall, ToolErrorKind, ToolFailure, ToolResult, ToolSchema, RESERVED_METADATA_KEYS};
use cairn_core::user::{RequestContext, User};
use futures::FutureExt;
use std::any::Any;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Envelope metadata key holding the (possibly rewritten) user message.
pub const USER_MESSAGE_KEY: &str = "user_message";

pub const SPAN_TURN: &str = "agent.turn";
pub const SPAN_USER_RESOLVE: &str = "agent.user.resolve";
pub const SPAN_BEFORE_MESSAGE: &str = "agent.hooks.before_message";
pub const SPAN_CONVERSATION_LOAD: &str = "agent.conversation.load";
pub const SPAN_CONTEXT_ENRICH: &str = "agent.context.enrich";
pub const SPAN_SYSTEM_PROMPT: &str = "agent.system_prompt";
pub const SPAN_LLM_CALL: &str = "agent.llm.call";
pub const SPAN_TOOL_EXECUTE: &str = "agent.tool.execute";
pub const SPAN_CONVERSATION_SAVE: &str = "agent.conversation.save";
pub const SPAN_AFTER_MESSAGE: &str = "agent.hooks.after_message";

pub const METRIC_TURN_DURATION: &str = "agent.turn.duration_ms";
pub const METRIC_LLM_DURATION: &str = "agent.llm.duration_ms";
pub const METRIC_TOOL_DURATION: &str = "agent.tool.duration_ms";
pub const METRIC_TURN_ITERATIONS: &str = "agent.turn.iterations";
pub const METRIC_TURN_ERRORS: &str = "agent.turn.errors";
pub const METRIC_TURN_CANCELLED: &str = "agent.turn.cancelled";

const REQUEST_ID: &str = "request_id";

/// Per-turn bookkeeping shared by every stage.
struct TurnState {
    request_id: String,
    span_id: String,
    conversation_id: Option<ConversationId>,
    /// Model calls made so far
    iterations: u32,
}

/// How the tool loop ended.
enum LoopEnd {
    Answered,
    IterationLimit,
    Skipped,
}

fn elapsed_ms(started: Instant) -> f64 {
    started.elapsed().as_secs_f64() * 1000.0
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "panic with a non-string payload".to_string()
    }
}

/// The text shown to the user for a fatal error.
fn failure_message(error: &Error) -> String {
    match error {
        Error::Hook(HookError::Rejected { reason }) => reason.clone(),
        other => other.to_string(),
    }
}

impl Agent {
    pub(crate) async fn run_turn(
        &self,
        context: RequestContext,
        message: String,
        conversation_id: Option<ConversationId>,
        mut emitter: Emitter,
    ) {
        let started = Instant::now();
        let request_id = Uuid::new_v4().to_string();
        let mut root = Span::start(SPAN_TURN, None).with_attribute(REQUEST_ID, request_id.clone());
        let mut turn = TurnState {
            request_id,
            span_id: root.id.clone(),
            conversation_id: None,
            iterations: 0,
        };

        let outcome = AssertUnwindSafe(self.drive(&context, message, conversation_id, &mut emitter, &mut turn))
            .catch_unwind()
            .await
            .unwrap_or_else(|payload| Err(Error::Panicked(panic_message(payload.as_ref()))));

        if let Some(id) = &turn.conversation_id {
            root.set_attribute("conversation_id", id.to_string());
        }
        root.set_attribute("iterations", turn.iterations);

        let mut cancelled = false;
        let root = match outcome {
            Ok(()) => root.finish(),
            Err(Error::Cancelled) => {
                info!(request_id = %turn.request_id, "Turn cancelled by consumer");
                self.record_metric(&turn, Metric::new(METRIC_TURN_CANCELLED, 1.0, "count"));
                cancelled = true;
                root.with_attribute("cancelled", true).finish()
            }
            Err(e) => {
                error!(
                    request_id = %turn.request_id,
                    conversation_id = ?turn.conversation_id.as_ref().map(ConversationId::as_str),
                    "Turn failed: {e}"
                );
                self.record_metric(&turn, Metric::new(METRIC_TURN_ERRORS, 1.0, "count"));
                let failure = UnitBody::Failure {
                    message: failure_message(&e),
                };
                cancelled = emitter.emit(failure).await.is_err();
                root.fail(e.to_string())
            }
        };

        self.record_metric(&turn, Metric::new(METRIC_TURN_DURATION, elapsed_ms(started), "ms"));
        self.record_metric(&turn, Metric::new(METRIC_TURN_ITERATIONS, f64::from(turn.iterations), "count"));
        self.record_span(root.with_attribute("units", emitter.emitted()));

        if !cancelled {
            // Nothing left to do if the consumer went away in the meantime.
            let _ = emitter.emit(UnitBody::InputControl { enabled: true }).await;
        }
    }

    async fn drive(
        &self,
        context: &RequestContext,
        message: String,
        conversation_id: Option<ConversationId>,
        emitter: &mut Emitter,
        turn: &mut TurnState,
    ) -> Result<()> {
        emitter.emit(UnitBody::InputControl { enabled: false }).await?;

        let user = self
            .staged(turn, SPAN_USER_RESOLVE, self.user_resolver.resolve(context))
            .await?;
        debug!(user = %user.id, groups = user.groups.len(), "Resolved user");

        let message = self
            .staged(turn, SPAN_BEFORE_MESSAGE, self.run_before_message(&user, message))
            .await?;

        let conversation_id = conversation_id.unwrap_or_default();
        turn.conversation_id = Some(conversation_id.clone());
        let mut conversation = self
            .staged(turn, SPAN_CONVERSATION_LOAD, async {
                let existing = self.store.load(&conversation_id, &user).await?;
                Ok(existing.unwrap_or_else(|| Conversation::new(conversation_id.clone(), user.id.clone())))
            })
            .await?;
        info!(
            conversation_id = %conversation.id,
            request_id = %turn.request_id,
            history = conversation.messages().len(),
            "Processing conversation"
        );
        conversation.push(Message::user(message.clone()));

        let mut envelope = RequestEnvelope::new(user.clone(), conversation.id.clone(), Arc::clone(&self.memory))
            .with_parent_span(turn.span_id.clone());
        envelope.request_id = turn.request_id.clone();
        if let Some(sink) = &self.observability {
            envelope = envelope.with_observability(Arc::clone(sink));
        }
        envelope.metadata.insert(USER_MESSAGE_KEY, message.clone());

        self.staged(turn, SPAN_CONTEXT_ENRICH, async {
            for enricher in &self.context_enrichers {
                enricher.enrich_context(&envelope).await?;
            }
            Ok(())
        })
        .await?;

        let schemas = self.tools.get_schemas(&user);
        debug!(tools = schemas.len(), "Fetched tool schemas");

        let system_prompt = self
            .staged(
                turn,
                SPAN_SYSTEM_PROMPT,
                self.build_system_prompt(&user, &schemas, &message, &envelope),
            )
            .await?;

        let end = self
            .tool_loop(&mut conversation, system_prompt, schemas, &envelope, emitter, turn)
            .await?;
        match end {
            LoopEnd::Answered => {}
            LoopEnd::IterationLimit => {
                let max = self.config.max_tool_iterations;
                warn!(max_iterations = max, "Max tool iterations reached");
                emitter
                    .emit(UnitBody::warning(format!(
                        "Agent hit iteration limit ({max} model calls) before producing a final answer"
                    )))
                    .await?;
            }
            LoopEnd::Skipped => {
                emitter
                    .emit(UnitBody::warning("The model call failed and was skipped; ending the turn early"))
                    .await?;
            }
        }

        if self.config.auto_save_conversations {
            emitter.ensure_open()?;
            self.staged(turn, SPAN_CONVERSATION_SAVE, async {
                self.store.save(&conversation).await?;
                Ok(())
            })
            .await?;
            debug!(conversation_id = %conversation.id, messages = conversation.messages().len(), "Saved conversation");
        }

        self.staged(turn, SPAN_AFTER_MESSAGE, async {
            for hook in &self.lifecycle_hooks {
                hook.after_message(&user, &conversation).await?;
            }
            Ok(())
        })
        .await
    }

    // ── Stages ───────────────────────────────────────────────────────────

    async fn run_before_message(&self, user: &User, mut message: String) -> Result<String> {
        for hook in &self.lifecycle_hooks {
            match hook.before_message(user, &message).await {
                Ok(Some(rewritten)) => message = rewritten,
                Ok(None) => {}
                Err(e) => {
                    warn!(hook = hook.name(), "Message rejected: {e}");
                    return Err(e.into());
                }
            }
        }
        Ok(message)
    }

    async fn build_system_prompt(
        &self,
        user: &User,
        schemas: &[ToolSchema],
        message: &str,
        envelope: &RequestEnvelope,
    ) -> Result<Option<String>> {
        let mut text = self
            .prompt_builder
            .build_system_prompt(user, schemas)
            .await?
            .unwrap_or_default();
        for enhancer in &self.context_enhancers {
            text = enhancer.enhance_system_prompt(text, message, envelope).await?;
        }
        Ok((!text.is_empty()).then_some(text))
    }

    async fn tool_loop(
        &self,
        conversation: &mut Conversation,
        system_prompt: Option<String>,
        schemas: Vec<ToolSchema>,
        envelope: &RequestEnvelope,
        emitter: &mut Emitter,
        turn: &mut TurnState,
    ) -> Result<LoopEnd> {
        loop {
            if turn.iterations >= self.config.max_tool_iterations {
                return Ok(LoopEnd::IterationLimit);
            }
            turn.iterations += 1;
            let iteration = turn.iterations;
            debug!(iteration, "Tool loop iteration");

            let mut view = conversation.messages().to_vec();
            for filter in &self.conversation_filters {
                view = filter.filter_messages(view, conversation).await?;
            }
            for enhancer in &self.context_enhancers {
                view = enhancer.enhance_user_messages(view, envelope).await?;
            }

            let mut request = ModelRequest {
                model: self.config.model.clone(),
                messages: view,
                system_prompt: system_prompt.clone(),
                tools: schemas.clone(),
                temperature: self.config.temperature,
                max_tokens: self.config.max_tokens,
                stream: self.config.stream_responses,
                user_id: envelope.user.id.clone(),
                conversation_id: conversation.id.to_string(),
                request_id: envelope.request_id.clone(),
                metadata: Default::default(),
            };
            for middleware in &self.llm_middlewares {
                request = middleware.before_llm_request(request).await?;
            }

            let Some(mut response) = self.call_model(&request, iteration, emitter, turn).await? else {
                warn!(iteration, "Model call skipped; ending tool loop");
                return Ok(LoopEnd::Skipped);
            };
            for middleware in &self.llm_middlewares {
                response = middleware.after_llm_response(&request, response).await?;
            }

            let ModelResponse { content, tool_calls, .. } = response;
            if tool_calls.is_empty() {
                if !content.is_empty() {
                    emitter.emit(UnitBody::Text { content: content.clone() }).await?;
                }
                conversation.push(Message::assistant(content));
                return Ok(LoopEnd::Answered);
            }

            debug!(iteration, tool_calls = tool_calls.len(), "Model requested tools");
            conversation.push(Message::assistant_with_tool_calls(
                content.clone(),
                tool_calls.iter().map(ToolCall::to_message_call).collect(),
            ));
            if !content.is_empty() {
                emitter.emit(UnitBody::Text { content }).await?;
            }

            let mut results = Vec::with_capacity(tool_calls.len());
            for call in &tool_calls {
                emitter.ensure_open()?;
                let result = self.run_tool_call(call, envelope, emitter, turn).await?;
                results.push(Message::tool_result(call.id.clone(), result.output));
            }
            for message in results {
                conversation.push(message);
            }
        }
    }

    async fn invoke_model(&self, request: &ModelRequest) -> std::result::Result<ModelResponse, ProviderError> {
        if request.stream {
            let rx = self.model.stream(request.clone()).await?;
            ModelResponse::assemble(rx, &request.model).await
        } else {
            self.model.complete(request.clone()).await
        }
    }

    /// Call the model, consulting the recovery strategy on failure.
    ///
    /// `Ok(None)` means the strategy chose to skip the call.
    async fn call_model(
        &self,
        request: &ModelRequest,
        iteration: u32,
        emitter: &Emitter,
        turn: &TurnState,
    ) -> Result<Option<ModelResponse>> {
        let mut attempt = 0u32;
        loop {
            let mut span = self
                .span(SPAN_LLM_CALL, turn)
                .with_attribute("model", request.model.clone())
                .with_attribute("iteration", iteration)
                .with_attribute("attempt", attempt + 1);
            let started = Instant::now();
            let outcome = emitter.guard(self.invoke_model(request)).await?;
            self.record_metric(turn, Metric::new(METRIC_LLM_DURATION, elapsed_ms(started), "ms"));

            let error = match outcome {
                Ok(response) => {
                    if let Some(usage) = &response.usage {
                        span.set_attribute("prompt_tokens", usage.prompt_tokens);
                        span.set_attribute("completion_tokens", usage.completion_tokens);
                    }
                    span.set_attribute("tool_calls", response.tool_calls.len());
                    self.record_span(span.finish());
                    return Ok(Some(response));
                }
                Err(e) => e,
            };
            self.record_span(span.fail(error.to_string()));

            attempt += 1;
            warn!(iteration, attempt, "Model call failed: {error}");
            match self.error_recovery.handle_llm_error(&error, request, attempt).await {
                RecoveryAction::Retry { delay } => {
                    debug!(?delay, attempt, "Retrying model call");
                    emitter.guard(tokio::time::sleep(delay)).await?;
                }
                RecoveryAction::Fail { message } => return Err(Error::ModelCall(message)),
                RecoveryAction::Fallback(response) => return Ok(Some(response)),
                RecoveryAction::Skip => return Ok(None),
            }
        }
    }

    /// Before-tool hooks in order. `Some(reason)` if one of them vetoed.
    async fn run_before_tool(&self, call: &ToolCall, envelope: &RequestEnvelope) -> Result<Option<String>> {
        for hook in &self.lifecycle_hooks {
            match hook.before_tool(call, envelope).await {
                Ok(()) => {}
                Err(HookError::Rejected { reason }) => return Ok(Some(reason)),
                Err(e) => return Err(e.into()),
            }
        }
        Ok(None)
    }

    async fn run_tool_call(
        &self,
        call: &ToolCall,
        envelope: &RequestEnvelope,
        emitter: &mut Emitter,
        turn: &TurnState,
    ) -> Result<ToolResult> {
        emitter
            .emit(UnitBody::TaskProgress {
                task_id: call.id.clone(),
                title: format!("Running {}", call.name),
                state: TaskState::Running,
            })
            .await?;

        if let Some(reason) = self.run_before_tool(call, envelope).await? {
            warn!(tool = %call.name, call_id = %call.id, "Tool call vetoed: {reason}");
            emitter
                .emit(UnitBody::Rejection {
                    tool_name: call.name.clone(),
                    reason: reason.clone(),
                })
                .await?;
            emitter
                .emit(UnitBody::TaskProgress {
                    task_id: call.id.clone(),
                    title: format!("{} was blocked", call.name),
                    state: TaskState::Failed,
                })
                .await?;
            return Ok(ToolResult::failure(call.id.clone(), ToolErrorKind::Vetoed, reason));
        }

        let span = self
            .span(SPAN_TOOL_EXECUTE, turn)
            .with_attribute("tool", call.name.clone())
            .with_attribute("call_id", call.id.clone());
        let started = Instant::now();

        let mut result = self.execute_with_recovery(call, envelope, emitter).await?;
        for hook in &self.lifecycle_hooks {
            if let Some(replacement) = hook.after_tool(call, &result, envelope).await? {
                result = replacement;
            }
        }

        self.record_metric(
            turn,
            Metric::new(METRIC_TOOL_DURATION, elapsed_ms(started), "ms").with_tag("tool", call.name.clone()),
        );
        let span = span.with_attribute("success", result.success);
        self.record_span(match &result.error {
            Some(failure) if !result.success => span.fail(failure.message.clone()),
            _ => span.finish(),
        });
        debug!(tool = %call.name, success = result.success, "Tool call finished");

        emitter
            .emit(UnitBody::ToolResult {
                call_id: call.id.clone(),
                tool_name: call.name.clone(),
                success: result.success,
                output: result.output.clone(),
                ui: result.ui.clone(),
            })
            .await?;
        let (title, state) = if result.success {
            (format!("{} finished", call.name), TaskState::Completed)
        } else {
            (format!("{} failed", call.name), TaskState::Failed)
        };
        emitter
            .emit(UnitBody::TaskProgress {
                task_id: call.id.clone(),
                title,
                state,
            })
            .await?;
        Ok(result)
    }

    /// Run the registry pipeline, retrying `EXECUTION_FAILED` results as the
    /// recovery strategy directs. Every retry re-runs the whole pipeline.
    async fn execute_with_recovery(
        &self,
        call: &ToolCall,
        envelope: &RequestEnvelope,
        emitter: &Emitter,
    ) -> Result<ToolResult> {
        let mut attempt = 0u32;
        loop {
            let result = self.tools.execute(call, envelope).await;
            let failure = match result.error.clone() {
                Some(failure) if failure.kind == ToolErrorKind::ExecutionFailed => failure,
                _ => return Ok(result),
            };

            attempt += 1;
            warn!(tool = %call.name, attempt, "Tool execution failed: {}", failure.message);
            match self
                .error_recovery
                .handle_tool_error(&failure, call, envelope, attempt)
                .await
            {
                RecoveryAction::Retry { delay } => {
                    debug!(?delay, attempt, tool = %call.name, "Retrying tool call");
                    emitter.guard(tokio::time::sleep(delay)).await?;
                }
                RecoveryAction::Fail { message } => {
                    let mut failed = result;
                    failed.output = format!("Error: {message}");
                    failed.error = Some(ToolFailure {
                        kind: ToolErrorKind::ExecutionFailed,
                        message,
                    });
                    return Ok(failed);
                }
                RecoveryAction::Fallback(mut fallback) => {
                    fallback.call_id = call.id.clone();
                    for key in RESERVED_METADATA_KEYS {
                        if let Some(value) = result.metadata.get(key) {
                            fallback.metadata.insert(key.to_string(), value.clone());
                        }
                    }
                    return Ok(fallback);
                }
                RecoveryAction::Skip => {
                    let mut skipped = ToolResult::failure(
                        call.id.clone(),
                        ToolErrorKind::Skipped,
                        format!("Skipped '{}' after failure: {}", call.name, failure.message),
                    );
                    skipped.metadata = result.metadata;
                    return Ok(skipped);
                }
            }
        }
    }

    // ── Observability ────────────────────────────────────────────────────

    fn span(&self, name: &str, turn: &TurnState) -> Span {
        Span::start(name, Some(&turn.span_id)).with_attribute(REQUEST_ID, turn.request_id.clone())
    }

    fn record_span(&self, span: Span) {
        if let Some(sink) = &self.observability {
            sink.record_span(span);
        }
    }

    fn record_metric(&self, turn: &TurnState, metric: Metric) {
        if let Some(sink) = &self.observability {
            sink.record_metric(metric.with_tag(REQUEST_ID, turn.request_id.clone()));
        }
    }

    /// Run one stage inside its own span.
    async fn staged<T, F>(&self, turn: &TurnState, name: &str, stage: F) -> Result<T>
    where
        F: Future<Output = Result<T>>,
    {
        let span = self.span(name, turn);
        let outcome = stage.await;
        self.record_span(match &outcome {
            Ok(_) => span.finish(),
            Err(e) => span.fail(e.to_string()),
        });
        outcome
    }
}
