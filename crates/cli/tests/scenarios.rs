//! End-to-end scenarios across the workspace crates.
//!
//! Each test wires a real registry, audit log, store, and extension set
//! around a scripted model, then drives full turns through the agent.

use std::sync::Arc;
use std::time::Duration;

use cairn_agent::testing::{
    collect_units, make_tool_call, make_tool_call_response, RecordingTool, SequentialMockModel,
};
use cairn_agent::{AgentBuilder, ReadOnlySqlHook, RetryStrategy, UnitBody};
use cairn_core::agent::AgentConfig;
use cairn_core::context::RequestEnvelope;
use cairn_core::message::{Conversation, ConversationId, Message, Role};
use cairn_core::store::ConversationStore;
use cairn_core::tool::{ToolErrorKind, RESERVED_METADATA_KEYS};
use cairn_core::user::{RequestContext, StaticUserResolver, User, UserResolver};
use cairn_gateway::CookieUserResolver;
use cairn_memory::{FileConversationStore, InMemoryConversationStore, NoopAgentMemory};
use cairn_security::AuditLogger;
use cairn_telemetry::TelemetryEngine;
use cairn_tools::ToolRegistry;
use serde_json::json;

// ── Harness ──────────────────────────────────────────────────────────────

struct World {
    audit: Arc<AuditLogger>,
    registry: ToolRegistry,
}

impl World {
    fn new() -> Self {
        let audit = Arc::new(AuditLogger::new());
        let registry = ToolRegistry::new().with_audit_logger(audit.clone());
        Self { audit, registry }
    }

    fn tool(mut self, tool: Arc<RecordingTool>, groups: &[&str]) -> Self {
        self.registry
            .register_local_tool(tool, groups.iter().map(|g| g.to_string()).collect());
        self
    }

    fn agent(
        self,
        model: Arc<SequentialMockModel>,
        user: User,
        store: Arc<dyn ConversationStore>,
    ) -> (AgentBuilder, Arc<AuditLogger>) {
        let builder = AgentBuilder::new(
            model,
            Arc::new(self.registry),
            Arc::new(StaticUserResolver::new(user)),
            store,
            Arc::new(NoopAgentMemory),
        );
        (builder, self.audit)
    }
}

fn analyst() -> User {
    User::new("ann@example.com").with_group("analyst")
}

async fn turn(builder: AgentBuilder, message: &str, conversation: &str) -> Vec<UnitBody> {
    let agent = Arc::new(builder.build());
    let stream = agent.process(RequestContext::new(), message, Some(ConversationId::from(conversation)));
    collect_units(stream).await.into_iter().map(|u| u.body).collect()
}

fn tool_results(units: &[UnitBody]) -> Vec<(String, bool, String)> {
    units
        .iter()
        .filter_map(|u| match u {
            UnitBody::ToolResult {
                tool_name,
                success,
                output,
                ..
            } => Some((tool_name.clone(), *success, output.clone())),
            _ => None,
        })
        .collect()
}

// ── Public tool ──────────────────────────────────────────────────────────

#[tokio::test]
async fn public_tool_is_listed_and_executes_for_anyone() {
    let search = Arc::new(RecordingTool::new("search").with_output("3 rows"));
    let world = World::new().tool(search.clone(), &[]);
    let nobody = User::new("nobody");
    assert_eq!(
        world.registry.get_schemas(&nobody).iter().map(|s| s.name.as_str()).collect::<Vec<_>>(),
        vec!["search"]
    );

    let model = Arc::new(SequentialMockModel::tool_then_answer(
        vec![make_tool_call("c1", "search", json!({"query": "tracks"}))],
        "Found 3 rows",
    ));
    let (builder, audit) = world.agent(model, nobody, Arc::new(InMemoryConversationStore::new()));
    let units = turn(builder, "find tracks", "a").await;

    assert_eq!(search.invocations(), 1);
    assert_eq!(tool_results(&units), vec![("search".into(), true, "3 rows".into())]);
    assert_eq!(audit.entries_by_type("tool_invocation").len(), 1);
}

// ── Restricted tool ──────────────────────────────────────────────────────

#[tokio::test]
async fn restricted_tool_is_hidden_and_denied() {
    let save = Arc::new(RecordingTool::new("save"));
    let world = World::new().tool(save.clone(), &["admin"]);
    assert!(world.registry.get_schemas(&analyst()).is_empty());

    let envelope = RequestEnvelope::new(analyst(), ConversationId::from("b"), Arc::new(NoopAgentMemory));
    let call = cairn_core::tool::ToolCall::new("c1", "save", json!({"query": "x"}));
    let result = world.registry.execute(&call, &envelope).await;

    assert!(!result.success);
    assert_eq!(result.error_kind(), Some(ToolErrorKind::PermissionDenied));
    assert_eq!(save.invocations(), 0);
    assert_eq!(world.audit.count(), 1);
    assert!(world.audit.entries_by_type("tool_invocation").is_empty());
}

// ── Veto ─────────────────────────────────────────────────────────────────

#[tokio::test]
async fn vetoed_sql_never_runs() {
    let run_sql = Arc::new(RecordingTool::new("run_sql"));
    let world = World::new().tool(run_sql.clone(), &[]);
    let model = Arc::new(SequentialMockModel::tool_then_answer(
        vec![make_tool_call("c1", "run_sql", json!({"sql": "DELETE FROM tracks"}))],
        "I could not do that",
    ));
    let (builder, audit) = world.agent(model.clone(), analyst(), Arc::new(InMemoryConversationStore::new()));
    let builder = builder.lifecycle_hook(Arc::new(ReadOnlySqlHook::new()));
    let units = turn(builder, "delete everything", "c").await;

    assert_eq!(run_sql.invocations(), 0);
    assert!(tool_results(&units).is_empty());
    let rejections: Vec<_> = units
        .iter()
        .filter(|u| matches!(u, UnitBody::Rejection { tool_name, .. } if tool_name == "run_sql"))
        .collect();
    assert_eq!(rejections.len(), 1);
    assert_eq!(audit.count(), 0);

    // The model still learns why the call went nowhere.
    let second = &model.requests()[1];
    let tool_message = second.messages.iter().find(|m| m.role == Role::Tool).unwrap();
    assert!(tool_message.content.starts_with("Error: "));
}

// ── Retry then fail ──────────────────────────────────────────────────────

#[tokio::test]
async fn tool_retried_twice_then_fails() {
    let flaky = Arc::new(RecordingTool::new("flaky").failing_times(3));
    let world = World::new().tool(flaky.clone(), &[]);
    let model = Arc::new(SequentialMockModel::tool_then_answer(
        vec![make_tool_call("c1", "flaky", json!({}))],
        "It kept failing",
    ));
    let (builder, audit) = world.agent(model, analyst(), Arc::new(InMemoryConversationStore::new()));
    let builder = builder.error_recovery(Arc::new(RetryStrategy::new(2).with_base_delay(Duration::ZERO)));
    let units = turn(builder, "try it", "d").await;

    assert_eq!(flaky.invocations(), 3);
    assert_eq!(audit.entries_by_type("tool_invocation").len(), 3);
    let results = tool_results(&units);
    assert_eq!(results.len(), 1);
    assert!(!results[0].1);
    assert!(results[0].2.starts_with("Error: "));
}

// ── Iteration limit ──────────────────────────────────────────────────────

#[tokio::test]
async fn iteration_limit_ends_loop_and_saves() {
    let dir = tempfile::tempdir().unwrap();
    let store = Arc::new(FileConversationStore::new(dir.path()));
    let world = World::new().tool(Arc::new(RecordingTool::new("search")), &[]);
    let model = Arc::new(SequentialMockModel::repeating(make_tool_call_response(
        vec![make_tool_call("again", "search", json!({}))],
        "one more",
    )));
    let (builder, _) = world.agent(model.clone(), analyst(), store.clone());
    let builder = builder.config(AgentConfig {
        max_tool_iterations: 2,
        ..AgentConfig::default()
    });
    let units = turn(builder, "loop forever", "e").await;

    assert_eq!(model.call_count(), 2);
    assert!(units.iter().any(
        |u| matches!(u, UnitBody::Status { message, .. } if message.contains("iteration limit"))
    ));
    let saved = store
        .load(&ConversationId::from("e"), &analyst())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(saved.messages().first().map(|m| m.content.as_str()), Some("loop forever"));
}

// ── Ordering ─────────────────────────────────────────────────────────────

#[tokio::test]
async fn units_arrive_numbered_and_bracketed() {
    let world = World::new().tool(Arc::new(RecordingTool::new("search")), &[]);
    let model = Arc::new(SequentialMockModel::tool_then_answer(
        vec![
            make_tool_call("c1", "search", json!({"query": "one"})),
            make_tool_call("c2", "search", json!({"query": "two"})),
        ],
        "both done",
    ));
    let (builder, _) = world.agent(model, analyst(), Arc::new(InMemoryConversationStore::new()));
    let agent = Arc::new(builder.build());
    let units = collect_units(agent.process(RequestContext::new(), "go", None)).await;

    let seqs: Vec<u64> = units.iter().map(|u| u.seq).collect();
    assert_eq!(seqs, (0..units.len() as u64).collect::<Vec<_>>());
    assert_eq!(units.first().map(|u| &u.body), Some(&UnitBody::InputControl { enabled: false }));
    assert_eq!(units.last().map(|u| &u.body), Some(&UnitBody::InputControl { enabled: true }));

    let call_ids: Vec<&str> = units
        .iter()
        .filter_map(|u| match &u.body {
            UnitBody::ToolResult { call_id, .. } => Some(call_id.as_str()),
            _ => None,
        })
        .collect();
    assert_eq!(call_ids, vec!["c1", "c2"]);
}

// ── Identity ─────────────────────────────────────────────────────────────

#[tokio::test]
async fn cookie_identity_controls_tool_access() {
    let resolver = CookieUserResolver::new("cairn_email", "dev@local").with_admins(["boss@example.com"]);
    let world = World::new()
        .tool(Arc::new(RecordingTool::new("search")), &[])
        .tool(Arc::new(RecordingTool::new("save")), &["admin"]);

    let boss = resolver
        .resolve(&RequestContext::new().with_cookie("cairn_email", "boss@example.com"))
        .await
        .unwrap();
    let visitor = resolver.resolve(&RequestContext::new()).await.unwrap();

    assert_eq!(world.registry.get_schemas(&boss).len(), 2);
    assert_eq!(
        world.registry.get_schemas(&visitor).iter().map(|s| s.name.as_str()).collect::<Vec<_>>(),
        vec!["search"]
    );
    assert_eq!(visitor.id, "dev@local");
}

// ── Cancellation ─────────────────────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn dropped_stream_stops_the_turn_unsaved() {
    let store = Arc::new(InMemoryConversationStore::new());
    let model = Arc::new(SequentialMockModel::single_text("too late").with_delay(Duration::from_secs(5)));
    let telemetry = Arc::new(TelemetryEngine::new());
    let (builder, _) = World::new().agent(model, analyst(), store.clone());
    let agent = Arc::new(builder.observability(telemetry.clone()).build());

    let mut stream = agent.process(RequestContext::new(), "hi", Some(ConversationId::from("x")));
    let first = futures::StreamExt::next(&mut stream).await.unwrap();
    assert_eq!(first.body, UnitBody::InputControl { enabled: false });
    drop(stream);

    tokio::time::sleep(Duration::from_secs(30)).await;
    assert!(store.is_empty().await);
    let trace = &telemetry.recent_traces(1)[0];
    assert!(trace.metrics.iter().any(|m| m.name == "agent.turn.cancelled"));
}

// ── Store round-trip ─────────────────────────────────────────────────────

#[tokio::test]
async fn file_store_round_trips_messages_in_order() {
    let dir = tempfile::tempdir().unwrap();
    let store = FileConversationStore::new(dir.path());
    let mut conversation = Conversation::new(ConversationId::from("rt"), "ann@example.com");
    conversation.push(Message::user("How many albums?"));
    conversation.push(Message::assistant_with_tool_calls(
        "",
        vec![make_tool_call("c1", "run_sql", json!({"sql": "SELECT COUNT(*) FROM albums"})).to_message_call()],
    ));
    conversation.push(Message::tool_result("c1", "347"));
    conversation.push(Message::assistant("There are 347 albums."));
    store.save(&conversation).await.unwrap();

    let loaded = store.load(&conversation.id, &analyst()).await.unwrap().unwrap();
    assert_eq!(loaded.messages(), conversation.messages());
}

#[test]
fn reserved_metadata_keys_are_stable() {
    assert_eq!(RESERVED_METADATA_KEYS, ["tool_name", "arguments", "execution_time_ms"]);
}
