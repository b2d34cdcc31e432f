//! Wiring an [`Agent`] from an [`AppConfig`].
//!
//! Every command that runs turns goes through [`build_agent`], so the CLI
//! REPL and the HTTP gateway see the same extensions in the same order.

use std::sync::Arc;
use std::time::Duration;

use cairn_agent::{
    AdaptiveMemoryEnhancer, Agent, AgentBuilder, DefaultSystemPromptBuilder, DomainPromptBuilder,
    MaxMessagesFilter, MemoryBasedEnhancer, MessageLengthHook, QueryLoggingHook, QuestionEnricher,
    ReadOnlySqlHook, RequestLoggingMiddleware, RetryStrategy, UserContextEnricher,
};
use cairn_config::AppConfig;
use cairn_core::extension::SystemPromptBuilder;
use cairn_core::memory::AgentMemory;
use cairn_core::store::ConversationStore;
use cairn_gateway::CookieUserResolver;
use cairn_memory::{
    FileAgentMemory, FileConversationStore, InMemoryAgentMemory, InMemoryConversationStore,
    NoopAgentMemory,
};
use cairn_providers::OpenAiCompatGateway;
use cairn_security::{AuditLogger, JsonlAuditSink, RedactingSanitizer};
use cairn_telemetry::{FanoutSink, TelemetryEngine, TracingSink};
use cairn_tools::ToolRegistry;
use tracing::{debug, info};

pub type BoxError = Box<dyn std::error::Error>;

/// A wired agent plus the trace store it records into.
pub struct Runtime {
    pub agent: Arc<Agent>,
    pub telemetry: Arc<TelemetryEngine>,
}

/// Build the full agent described by `config`.
pub async fn build_agent(config: &AppConfig) -> Result<Runtime, BoxError> {
    let model = Arc::new(build_model(config)?);
    let memory = build_memory(config);
    let store = build_store(config).await?;
    let tools = Arc::new(build_registry(config).await?);
    let resolver = Arc::new(CookieUserResolver::from_config(&config.gateway));
    let telemetry = Arc::new(TelemetryEngine::new());
    let sink = FanoutSink::new()
        .with(telemetry.clone())
        .with(Arc::new(TracingSink));

    let mut builder = AgentBuilder::new(model, tools, resolver, store, memory)
        .config(config.to_agent_config())
        .observability(Arc::new(sink))
        .system_prompt_builder(build_prompt_builder(config))
        .lifecycle_hook(Arc::new(MessageLengthHook::new(config.agent.max_message_chars)))
        .llm_middleware(Arc::new(RequestLoggingMiddleware))
        .context_enricher(Arc::new(UserContextEnricher))
        .context_enricher(Arc::new(QuestionEnricher));

    if config.sql_guard.enabled {
        builder = builder.lifecycle_hook(Arc::new(ReadOnlySqlHook::for_tool(
            config.sql_guard.tool_name.clone(),
        )));
    }
    if config.query_log.enabled {
        let hook = QueryLoggingHook::new(config.query_log_path())
            .with_all_tools(config.query_log.all_tools)
            .with_result_preview(config.query_log.result_preview);
        builder = builder.lifecycle_hook(Arc::new(hook));
    }
    if config.memory.enhance_prompt && config.memory.backend != "none" {
        let enhancer = MemoryBasedEnhancer::new()
            .with_max_examples(config.memory.max_examples)
            .with_similarity_threshold(config.memory.similarity_threshold);
        builder = if config.memory.adaptive {
            builder.context_enhancer(Arc::new(AdaptiveMemoryEnhancer::new(enhancer).with_thresholds(
                config.memory.similarity_threshold,
                config.memory.min_threshold,
                0.1,
            )))
        } else {
            builder.context_enhancer(Arc::new(enhancer))
        };
    }
    if config.agent.max_history_messages > 0 {
        builder = builder.conversation_filter(Arc::new(MaxMessagesFilter::new(
            config.agent.max_history_messages,
        )));
    }
    if config.agent.max_retries > 0 {
        builder = builder.error_recovery(Arc::new(RetryStrategy::new(config.agent.max_retries)));
    }

    info!(
        provider = %config.provider,
        model = %config.default_model,
        memory = %config.memory.backend,
        store = %config.store.backend,
        "Agent ready"
    );
    Ok(Runtime {
        agent: Arc::new(builder.build()),
        telemetry,
    })
}

/// The OpenAI-compatible endpoint named by `provider`, unless `api_url`
/// overrides it.
pub fn build_model(config: &AppConfig) -> Result<OpenAiCompatGateway, BoxError> {
    let (name, default_url) = match config.provider.as_str() {
        "openrouter" => ("openrouter", "https://openrouter.ai/api/v1"),
        "ollama" => ("ollama", "http://localhost:11434/v1"),
        "custom" => ("custom", ""),
        _ => ("openai", "https://api.openai.com/v1"),
    };
    let base_url = config.api_url.as_deref().unwrap_or(default_url);
    let api_key = match (&config.api_key, name) {
        (Some(key), _) => key.clone(),
        (None, "ollama") => "ollama".to_string(),
        (None, _) => String::new(),
    };
    let gateway = OpenAiCompatGateway::with_timeout(
        name,
        base_url,
        api_key,
        Duration::from_secs(config.request_timeout_secs),
    )?;
    Ok(gateway)
}

pub fn build_memory(config: &AppConfig) -> Arc<dyn AgentMemory> {
    match config.memory.backend.as_str() {
        "memory" => Arc::new(InMemoryAgentMemory::new()),
        "none" => Arc::new(NoopAgentMemory),
        _ => Arc::new(FileAgentMemory::new(config.memory_path())),
    }
}

pub async fn build_store(config: &AppConfig) -> Result<Arc<dyn ConversationStore>, BoxError> {
    let store: Arc<dyn ConversationStore> = match config.store.backend.as_str() {
        "memory" => Arc::new(InMemoryConversationStore::new()),
        #[cfg(feature = "sqlite")]
        "sqlite" => {
            let path = config.store_path();
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)?;
            }
            let url = format!("sqlite://{}", path.display());
            Arc::new(cairn_memory::SqliteConversationStore::new(&url).await?)
        }
        #[cfg(not(feature = "sqlite"))]
        "sqlite" => return Err("store backend \"sqlite\" needs the `sqlite` feature".into()),
        _ => Arc::new(FileConversationStore::new(config.store_path())),
    };
    Ok(store)
}

/// Audit logger with redaction of configured keys, plus the JSONL sink when
/// a path is set.
pub fn build_audit(config: &AppConfig) -> Result<AuditLogger, BoxError> {
    let mut audit = AuditLogger::new()
        .with_sanitizer(Box::new(RedactingSanitizer::new(config.audit.redact_keys.iter().cloned())));
    if config.audit.enabled {
        audit = audit.with_sink(Box::new(cairn_security::TracingSink));
        if let Some(path) = &config.audit.jsonl_path {
            audit = audit.with_sink(Box::new(JsonlAuditSink::open(path)?));
        }
    }
    Ok(audit)
}

pub async fn build_registry(config: &AppConfig) -> Result<ToolRegistry, BoxError> {
    let mut registry = ToolRegistry::new().with_audit_logger(Arc::new(build_audit(config)?));
    if config.memory.backend != "none" {
        cairn_tools::register_memory_tools(&mut registry, &config.memory.save_groups);
    }
    if let Some(url) = &config.database.url {
        register_sql_tool(&mut registry, config, url).await?;
    }
    debug!(tools = ?registry.names(), "Tool registry built");
    Ok(registry)
}

#[cfg(feature = "sqlite")]
async fn register_sql_tool(registry: &mut ToolRegistry, config: &AppConfig, url: &str) -> Result<(), BoxError> {
    use cairn_tools::{ReadOnlySqlRunner, RunSqlTool, SqliteRunner};

    let runner = Arc::new(SqliteRunner::connect(url).await?);
    let tool = RunSqlTool::new(Arc::new(ReadOnlySqlRunner::new(runner)))
        .with_max_rows_in_output(config.database.max_rows_in_output);
    registry.register_local_tool(Arc::new(tool), config.database.access_groups.clone());
    Ok(())
}

#[cfg(not(feature = "sqlite"))]
async fn register_sql_tool(_registry: &mut ToolRegistry, _config: &AppConfig, _url: &str) -> Result<(), BoxError> {
    Err("database.url needs the `sqlite` feature".into())
}

pub fn build_prompt_builder(config: &AppConfig) -> Arc<dyn SystemPromptBuilder> {
    let prompt = &config.prompt;
    if prompt.has_domain_sections() {
        let mut builder = DomainPromptBuilder::new(prompt.base_prompt.clone().unwrap_or_default())
            .with_sql_patterns(prompt.sql_patterns.iter().cloned())
            .with_performance_hints(prompt.performance_hints.iter().cloned())
            .with_data_quality_notes(prompt.data_quality_notes.iter().cloned());
        if let Some(database_type) = &prompt.database_type {
            builder = builder.with_database_type(database_type.clone());
        }
        if let Some(purpose) = &prompt.database_purpose {
            builder = builder.with_database_purpose(purpose.clone());
        }
        for (term, definition) in &prompt.business_definitions {
            builder = builder.with_business_definition(term.clone(), definition.clone());
        }
        if let Some(context) = &prompt.additional_context {
            builder = builder.with_additional_context(context.clone());
        }
        return Arc::new(builder);
    }
    match &prompt.base_prompt {
        Some(base) => Arc::new(DefaultSystemPromptBuilder::with_base_prompt(base.clone())),
        None => Arc::new(DefaultSystemPromptBuilder::new()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cairn_core::user::User;

    fn local_config() -> AppConfig {
        let mut config = AppConfig::default();
        config.memory.backend = "memory".into();
        config.store.backend = "memory".into();
        config
    }

    #[test]
    fn provider_picks_endpoint() {
        let mut config = local_config();
        config.provider = "openrouter".into();
        assert_eq!(build_model(&config).unwrap().base_url(), "https://openrouter.ai/api/v1");

        config.provider = "custom".into();
        config.api_url = Some("http://llm.internal:8000/v1/".into());
        assert_eq!(build_model(&config).unwrap().base_url(), "http://llm.internal:8000/v1");
    }

    #[tokio::test]
    async fn memory_tools_follow_backend() {
        let config = local_config();
        let registry = build_registry(&config).await.unwrap();
        assert_eq!(registry.len(), 3);
        let visitor = registry.get_schemas(&User::new("v").with_group("user"));
        assert_eq!(visitor.len(), 1);

        let mut config = local_config();
        config.memory.backend = "none".into();
        assert!(build_registry(&config).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn agent_uses_configured_limits() {
        let mut config = local_config();
        config.agent.max_tool_iterations = 3;
        let runtime = build_agent(&config).await.unwrap();
        assert_eq!(runtime.agent.config().max_tool_iterations, 3);
        assert_eq!(runtime.agent.config().model, config.default_model);
    }
}
