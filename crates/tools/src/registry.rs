//! The tool registry — permission checks, validation, audit, execution.
//!
//! The registry is the only way a tool body gets run. Every call goes
//! through the same pipeline, and every failure along it comes back as a
//! [`ToolResult`] with a [`ToolErrorKind`] instead of an `Err`:
//!
//! ```text
//! lookup ─▶ permission ─▶ schema ─▶ transform ─▶ audit ─▶ body ─▶ stamp ─▶ audit
//! NOT_FOUND  PERMISSION_   INVALID_   REJECTED                 EXECUTION_
//!            DENIED        ARGUMENTS                           FAILED
//! ```
//!
//! Tools are registered with `&mut self` during setup. Once the registry is
//! wrapped in an `Arc` and handed to the agent, the tool table is read-only.

use async_trait::async_trait;
use cairn_core::context::RequestEnvelope;
use cairn_core::error::ToolError;
use cairn_core::tool::{
    Tool, ToolCall, ToolErrorKind, ToolResult, ToolSchema, META_ARGUMENTS, META_EXECUTION_TIME_MS,
    META_TOOL_NAME,
};
use cairn_core::user::User;
use cairn_security::AuditLogger;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, warn};
use crate::schema::validate_arguments;

/// What an [`ArgumentTransformer`] decided about a call.
#[derive(Debug, Clone, PartialEq)]
pub enum TransformOutcome {
    /// Run the tool with these arguments.
    Proceed(Value),
    /// Refuse the call.
    Reject(String),
}

/// Last look at validated arguments before the tool body runs.
///
/// Typical uses: injecting a tenant id, clamping a row limit, refusing
/// arguments that pass the schema but break a policy.
#[async_trait]
pub trait ArgumentTransformer: Send + Sync {
    async fn transform(
        &self,
        tool_name: &str,
        arguments: Value,
        envelope: &RequestEnvelope,
    ) -> TransformOutcome;
}

/// Leaves arguments unchanged.
pub struct PassthroughTransformer;

#[async_trait]
impl ArgumentTransformer for PassthroughTransformer {
    async fn transform(&self, _tool_name: &str, arguments: Value, _envelope: &RequestEnvelope) -> TransformOutcome {
        TransformOutcome::Proceed(arguments)
    }
}

struct RegisteredTool {
    tool: Arc<dyn Tool>,
    access_groups: Vec<String>,
}

/// A registry of callable tools.
pub struct ToolRegistry {
    tools: HashMap<String, RegisteredTool>,
    audit: Arc<AuditLogger>,
    transformer: Arc<dyn ArgumentTransformer>,
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl ToolRegistry {
    /// An empty registry with an in-memory audit log.
    pub fn new() -> Self {
        Self {
            tools: HashMap::new(),
            audit: Arc::new(AuditLogger::new()),
            transformer: Arc::new(PassthroughTransformer),
        }
    }

    pub fn with_audit_logger(mut self, audit: Arc<AuditLogger>) -> Self {
        self.audit = audit;
        self
    }

    pub fn with_transformer(mut self, transformer: Arc<dyn ArgumentTransformer>) -> Self {
        self.transformer = transformer;
        self
    }

    /// Register a tool callable by members of `access_groups`, or by everyone
    /// when `access_groups` is empty. Replaces any tool with the same name.
    pub fn register_local_tool(&mut self, tool: Arc<dyn Tool>, access_groups: Vec<String>) {
        let name = tool.name().to_string();
        debug!(tool = %name, groups = ?access_groups, "Registering tool");
        if self
            .tools
            .insert(name.clone(), RegisteredTool { tool, access_groups })
            .is_some()
        {
            warn!(tool = %name, "Tool registered twice; keeping the latest");
        }
    }

    pub fn audit_logger(&self) -> &Arc<AuditLogger> {
        &self.audit
    }

    /// List all registered tool names, sorted.
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.tools.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    /// Schemas of the tools `user` may call, sorted by name.
    pub fn get_schemas(&self, user: &User) -> Vec<ToolSchema> {
        let mut schemas: Vec<ToolSchema> = self
            .tools
            .values()
            .filter(|entry| can_access(user, &entry.access_groups))
            .map(|entry| entry.tool.to_schema(&entry.access_groups))
            .collect();
        schemas.sort_by(|a, b| a.name.cmp(&b.name));
        schemas
    }

    /// Run one tool call through the full pipeline.
    pub async fn execute(&self, call: &ToolCall, envelope: &RequestEnvelope) -> ToolResult {
        let actor = envelope.user.id.as_str();
        let request_id = Some(envelope.request_id.as_str());

        let Some(entry) = self.tools.get(&call.name) else {
            debug!(tool = %call.name, "Unknown tool requested");
            return ToolResult::failure(&call.id, ToolErrorKind::NotFound, format!("Tool not found: {}", call.name));
        };

        let user_groups: Vec<String> = envelope.user.groups.iter().cloned().collect();
        if !can_access(&envelope.user, &entry.access_groups) {
            self.audit.log_access_check(
                &call.name,
                actor,
                user_groups,
                entry.access_groups.clone(),
                false,
                request_id,
            );
            warn!(tool = %call.name, user = %actor, "Tool access denied");
            return ToolResult::failure(
                &call.id,
                ToolErrorKind::PermissionDenied,
                format!("User '{actor}' is not allowed to call '{}'", call.name),
            );
        }

        let arguments = match validate_arguments(&entry.tool.parameters_schema(), call.arguments.clone()) {
            Ok(args) => args,
            Err(reason) => {
                debug!(tool = %call.name, %reason, "Invalid tool arguments");
                return ToolResult::failure(
                    &call.id,
                    ToolErrorKind::InvalidArguments,
                    format!("Invalid arguments for '{}': {reason}", call.name),
                );
            }
        };

        let arguments = match self.transformer.transform(&call.name, arguments, envelope).await {
            TransformOutcome::Proceed(args) => args,
            TransformOutcome::Reject(reason) => {
                self.audit.log_access_check(
                    &call.name,
                    actor,
                    user_groups,
                    entry.access_groups.clone(),
                    true,
                    request_id,
                );
                self.audit
                    .log_result(&call.name, actor, false, 0, Some(format!("rejected: {reason}")), request_id);
                return ToolResult::failure(&call.id, ToolErrorKind::Rejected, reason);
            }
        };

        self.audit.log_access_check(
            &call.name,
            actor,
            user_groups,
            entry.access_groups.clone(),
            true,
            request_id,
        );
        self.audit.log_invocation(&call.name, actor, &arguments, request_id);

        let started = Instant::now();
        let outcome = entry.tool.execute(arguments.clone(), envelope).await;
        let elapsed_ms = started.elapsed().as_millis() as u64;

        let mut result = match outcome {
            Ok(result) => result,
            Err(ToolError::InvalidArguments(reason)) => {
                debug!(tool = %call.name, %reason, "Tool refused its arguments");
                ToolResult::failure(&call.id, ToolErrorKind::InvalidArguments, reason)
            }
            Err(e) => {
                warn!(tool = %call.name, error = %e, "Tool execution failed");
                ToolResult::failure(&call.id, ToolErrorKind::ExecutionFailed, e.to_string())
            }
        };
        result.call_id = call.id.clone();
        result.metadata.insert(META_TOOL_NAME.into(), Value::String(call.name.clone()));
        result.metadata.insert(META_ARGUMENTS.into(), arguments);
        result.metadata.insert(META_EXECUTION_TIME_MS.into(), Value::from(elapsed_ms));

        let error = result.error.as_ref().map(|e| e.message.clone());
        self.audit
            .log_result(&call.name, actor, result.success, elapsed_ms, error, request_id);

        debug!(tool = %call.name, success = result.success, elapsed_ms, "Tool executed");
        result
    }
}

/// The single permission rule used for listing and for execution.
pub fn can_access(user: &User, access_groups: &[String]) -> bool {
    access_groups.is_empty() || access_groups.iter().any(|g| user.in_group(g))
}

#[cfg(test)]
mod tests {
    use super::*;
    use cairn_core::message::ConversationId;
    use cairn_memory::InMemoryAgentMemory;
    use cairn_security::{AuditEvent, AuditOutcome, RedactingSanitizer};
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingTool {
        name: &'static str,
        calls: AtomicUsize,
        fail: bool,
    }

    impl CountingTool {
        fn new(name: &'static str) -> Arc<Self> {
            Arc::new(Self { name, calls: AtomicUsize::new(0), fail: false })
        }

        fn failing(name: &'static str) -> Arc<Self> {
            Arc::new(Self { name, calls: AtomicUsize::new(0), fail: true })
        }
    }

    #[async_trait]
    impl Tool for CountingTool {
        fn name(&self) -> &str {
            self.name
        }
        fn description(&self) -> &str {
            "Counts its calls"
        }
        fn parameters_schema(&self) -> Value {
            json!({
                "type": "object",
                "properties": { "query": { "type": "string" }, "password": { "type": "string" } },
                "required": ["query"]
            })
        }
        async fn execute(&self, arguments: Value, _envelope: &RequestEnvelope) -> Result<ToolResult, ToolError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                return Err(ToolError::ExecutionFailed {
                    tool_name: self.name.into(),
                    reason: "database unavailable".into(),
                });
            }
            let mut result = ToolResult::success("ignored", format!("ran {}", arguments["query"]));
            result.metadata.insert(META_TOOL_NAME.into(), json!("spoofed"));
            result.metadata.insert("rows".into(), json!(3));
            Ok(result)
        }
    }

    fn envelope(user: User) -> RequestEnvelope {
        RequestEnvelope::new(user, ConversationId::from("c1"), Arc::new(InMemoryAgentMemory::new()))
    }

    fn call(name: &str) -> ToolCall {
        ToolCall::new("call_1", name, json!({"query": "revenue"}))
    }

    #[tokio::test]
    async fn public_tool_is_listed_and_callable_without_groups() {
        let mut registry = ToolRegistry::new();
        registry.register_local_tool(CountingTool::new("search"), vec![]);
        let user = User::new("anon");

        let names: Vec<String> = registry.get_schemas(&user).into_iter().map(|s| s.name).collect();
        assert_eq!(names, vec!["search"]);
        let result = registry.execute(&call("search"), &envelope(user)).await;
        assert!(result.success);
    }

    #[tokio::test]
    async fn restricted_tool_is_hidden_and_denied_with_one_audit_record() {
        let tool = CountingTool::new("save");
        let mut registry = ToolRegistry::new();
        registry.register_local_tool(tool.clone(), vec!["admin".into()]);
        let analyst = User::new("ana").with_group("analyst");

        assert!(registry.get_schemas(&analyst).is_empty());
        let result = registry.execute(&call("save"), &envelope(analyst)).await;
        assert_eq!(result.error_kind(), Some(ToolErrorKind::PermissionDenied));
        assert_eq!(tool.calls.load(Ordering::SeqCst), 0);
        assert!(result.metadata.is_empty());

        let entries = registry.audit_logger().entries();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].outcome, AuditOutcome::Denied);
        assert_eq!(entries[0].event.event_type(), "tool_access_check");
    }

    #[tokio::test]
    async fn listing_and_execution_agree_for_every_user() {
        let mut registry = ToolRegistry::new();
        registry.register_local_tool(CountingTool::new("public"), vec![]);
        registry.register_local_tool(CountingTool::new("admin_only"), vec!["admin".into()]);
        registry.register_local_tool(CountingTool::new("shared"), vec!["admin".into(), "analyst".into()]);

        let users = [
            User::new("a"),
            User::new("b").with_group("analyst"),
            User::new("c").with_group("admin"),
            User::new("d").with_groups(["viewer", "analyst"]),
        ];
        for user in users {
            let listed: Vec<String> = registry.get_schemas(&user).into_iter().map(|s| s.name).collect();
            for name in registry.names() {
                let result = registry.execute(&call(name), &envelope(user.clone())).await;
                let denied = result.error_kind() == Some(ToolErrorKind::PermissionDenied);
                assert_eq!(listed.iter().any(|n| n == name), !denied, "user {} tool {name}", user.id);
            }
        }
    }

    #[tokio::test]
    async fn reserved_metadata_is_stamped_over_tool_values() {
        let mut registry = ToolRegistry::new();
        registry.register_local_tool(CountingTool::new("search"), vec![]);
        let result = registry.execute(&call("search"), &envelope(User::new("u"))).await;

        assert_eq!(result.call_id, "call_1");
        assert_eq!(result.metadata[META_TOOL_NAME], "search");
        assert_eq!(result.metadata[META_ARGUMENTS], json!({"query": "revenue"}));
        assert!(result.metadata[META_EXECUTION_TIME_MS].is_u64());
        assert_eq!(result.metadata["rows"], 3);
    }

    #[tokio::test]
    async fn audit_records_follow_check_invoke_result_order() {
        let audit = Arc::new(AuditLogger::new().with_sanitizer(Box::new(RedactingSanitizer::default())));
        let mut registry = ToolRegistry::new().with_audit_logger(audit.clone());
        registry.register_local_tool(CountingTool::new("search"), vec![]);
        let call = ToolCall::new("c9", "search", json!({"query": "q", "password": "hunter2"}));
        registry.execute(&call, &envelope(User::new("u"))).await;

        let types: Vec<&str> = audit.entries().iter().map(|e| e.event.event_type()).collect();
        assert_eq!(types, vec!["tool_access_check", "tool_invocation", "tool_result"]);
        match &audit.entries()[1].event {
            AuditEvent::ToolInvocation { parameters, .. } => assert_eq!(parameters["password"], "[REDACTED]"),
            other => panic!("unexpected event {other:?}"),
        }
        assert_eq!(audit.entries()[2].request_id.as_deref().map(str::len), Some(36));
    }

    #[tokio::test]
    async fn unknown_tool_is_not_found() {
        let registry = ToolRegistry::new();
        let result = registry.execute(&call("ghost"), &envelope(User::new("u"))).await;
        assert_eq!(result.error_kind(), Some(ToolErrorKind::NotFound));
        assert!(registry.audit_logger().entries().is_empty());
    }

    #[tokio::test]
    async fn schema_violation_is_invalid_arguments() {
        let tool = CountingTool::new("search");
        let mut registry = ToolRegistry::new();
        registry.register_local_tool(tool.clone(), vec![]);
        let bad = ToolCall::new("c1", "search", json!({"query": ["not", "a", "string"]}));
        let result = registry.execute(&bad, &envelope(User::new("u"))).await;
        assert_eq!(result.error_kind(), Some(ToolErrorKind::InvalidArguments));
        assert_eq!(tool.calls.load(Ordering::SeqCst), 0);
    }

    struct RejectAll;

    #[async_trait]
    impl ArgumentTransformer for RejectAll {
        async fn transform(&self, _tool: &str, _args: Value, _envelope: &RequestEnvelope) -> TransformOutcome {
            TransformOutcome::Reject("tenant quota exceeded".into())
        }
    }

    #[tokio::test]
    async fn transformer_can_reject() {
        let tool = CountingTool::new("search");
        let mut registry = ToolRegistry::new().with_transformer(Arc::new(RejectAll));
        registry.register_local_tool(tool.clone(), vec![]);
        let result = registry.execute(&call("search"), &envelope(User::new("u"))).await;
        assert_eq!(result.error_kind(), Some(ToolErrorKind::Rejected));
        assert_eq!(result.error.unwrap().message, "tenant quota exceeded");
        assert_eq!(tool.calls.load(Ordering::SeqCst), 0);
        let outcomes: Vec<AuditOutcome> = registry.audit_logger().entries().into_iter().map(|e| e.outcome).collect();
        assert_eq!(outcomes, vec![AuditOutcome::Success, AuditOutcome::Failure]);
    }

    #[tokio::test]
    async fn tool_error_becomes_execution_failed_result() {
        let mut registry = ToolRegistry::new();
        registry.register_local_tool(CountingTool::failing("run_sql"), vec![]);
        let result = registry.execute(&call("run_sql"), &envelope(User::new("u"))).await;
        assert_eq!(result.error_kind(), Some(ToolErrorKind::ExecutionFailed));
        assert!(result.output.contains("database unavailable"));
        assert_eq!(result.metadata[META_TOOL_NAME], "run_sql");
        let last = registry.audit_logger().entries().pop().unwrap();
        assert_eq!(last.outcome, AuditOutcome::Failure);
    }
}
