//! The agent: collaborators, extension lists, and the `process` entry point.

use crate::emitter::Emitter;
use crate::output::OutputUnit;
use crate::prompt::DefaultSystemPromptBuilder;
use crate::recovery::FailFast;
use cairn_core::agent::AgentConfig;
use cairn_core::extension::{
    ContextEnricher, ConversationFilter, ErrorRecoveryStrategy, LifecycleHook, LlmContextEnhancer,
    LlmMiddleware, SystemPromptBuilder,
};
use cairn_core::memory::AgentMemory;
use cairn_core::message::ConversationId;
use cairn_core::model::ModelGateway;
use cairn_core::observability::ObservabilitySink;
use cairn_core::store::ConversationStore;
use cairn_core::user::{RequestContext, UserResolver};
use cairn_tools::ToolRegistry;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tracing::Instrument;

/// The stream of output units for one turn.
///
/// Dropping it cancels the turn.
pub type TurnStream = ReceiverStream<OutputUnit>;

/// Orchestrates turns: one inbound message in, a stream of output units out.
///
/// Build one with [`AgentBuilder`], wrap it in an `Arc`, and share it across
/// requests. Each call to [`Agent::process`] runs its turn on its own task.
pub struct Agent {
    /// The model backend
    pub(crate) model: Arc<dyn ModelGateway>,

    /// Permission-checked, audited tool registry
    pub(crate) tools: Arc<ToolRegistry>,

    pub(crate) user_resolver: Arc<dyn UserResolver>,
    pub(crate) store: Arc<dyn ConversationStore>,
    pub(crate) memory: Arc<dyn AgentMemory>,

    pub(crate) lifecycle_hooks: Vec<Arc<dyn LifecycleHook>>,
    pub(crate) llm_middlewares: Vec<Arc<dyn LlmMiddleware>>,
    pub(crate) context_enrichers: Vec<Arc<dyn ContextEnricher>>,
    pub(crate) context_enhancers: Vec<Arc<dyn LlmContextEnhancer>>,
    pub(crate) conversation_filters: Vec<Arc<dyn ConversationFilter>>,

    pub(crate) error_recovery: Arc<dyn ErrorRecoveryStrategy>,
    pub(crate) prompt_builder: Arc<dyn SystemPromptBuilder>,

    /// Receives spans and metrics; `None` discards them
    pub(crate) observability: Option<Arc<dyn ObservabilitySink>>,

    pub(crate) config: AgentConfig,
}

impl Agent {
    /// Process one inbound message.
    ///
    /// Returns immediately; the turn runs on a spawned task and streams its
    /// output units into the returned stream. Must be called from within a
    /// tokio runtime.
    pub fn process(
        self: &Arc<Self>,
        context: RequestContext,
        message: impl Into<String>,
        conversation_id: Option<ConversationId>,
    ) -> TurnStream {
        let (tx, rx) = mpsc::channel(self.config.output_buffer.max(1));
        let agent = Arc::clone(self);
        let message = message.into();
        let span = tracing::info_span!("turn");
        tokio::spawn(
            async move {
                agent.run_turn(context, message, conversation_id, Emitter::new(tx)).await;
            }
            .instrument(span),
        );
        ReceiverStream::new(rx)
    }

    pub fn config(&self) -> &AgentConfig {
        &self.config
    }

    pub fn tools(&self) -> &Arc<ToolRegistry> {
        &self.tools
    }

    pub fn user_resolver(&self) -> &Arc<dyn UserResolver> {
        &self.user_resolver
    }

    pub fn conversation_store(&self) -> &Arc<dyn ConversationStore> {
        &self.store
    }
}

/// Assembles an [`Agent`] from its five required collaborators plus any
/// extensions.
///
/// Extension lists run in the order they were added.
pub struct AgentBuilder {
    agent: Agent,
}

impl AgentBuilder {
    pub fn new(
        model: Arc<dyn ModelGateway>,
        tools: Arc<ToolRegistry>,
        user_resolver: Arc<dyn UserResolver>,
        store: Arc<dyn ConversationStore>,
        memory: Arc<dyn AgentMemory>,
    ) -> Self {
        Self {
            agent: Agent {
                model,
                tools,
                user_resolver,
                store,
                memory,
                lifecycle_hooks: Vec::new(),
                llm_middlewares: Vec::new(),
                context_enrichers: Vec::new(),
                context_enhancers: Vec::new(),
                conversation_filters: Vec::new(),
                error_recovery: Arc::new(FailFast),
                prompt_builder: Arc::new(DefaultSystemPromptBuilder::new()),
                observability: None,
                config: AgentConfig::default(),
            },
        }
    }

    pub fn lifecycle_hook(mut self, hook: Arc<dyn LifecycleHook>) -> Self {
        self.agent.lifecycle_hooks.push(hook);
        self
    }

    pub fn llm_middleware(mut self, middleware: Arc<dyn LlmMiddleware>) -> Self {
        self.agent.llm_middlewares.push(middleware);
        self
    }

    pub fn context_enricher(mut self, enricher: Arc<dyn ContextEnricher>) -> Self {
        self.agent.context_enrichers.push(enricher);
        self
    }

    pub fn context_enhancer(mut self, enhancer: Arc<dyn LlmContextEnhancer>) -> Self {
        self.agent.context_enhancers.push(enhancer);
        self
    }

    pub fn conversation_filter(mut self, filter: Arc<dyn ConversationFilter>) -> Self {
        self.agent.conversation_filters.push(filter);
        self
    }

    pub fn error_recovery(mut self, strategy: Arc<dyn ErrorRecoveryStrategy>) -> Self {
        self.agent.error_recovery = strategy;
        self
    }

    pub fn system_prompt_builder(mut self, builder: Arc<dyn SystemPromptBuilder>) -> Self {
        self.agent.prompt_builder = builder;
        self
    }

    pub fn observability(mut self, sink: Arc<dyn ObservabilitySink>) -> Self {
        self.agent.observability = Some(sink);
        self
    }

    pub fn config(mut self, config: AgentConfig) -> Self {
        self.agent.config = config;
        self
    }

    pub fn build(self) -> Agent {
        self.agent
    }
}
