//! Lifecycle hooks: query logging, the read-only SQL veto, and message
//! hygiene.

use async_trait::async_trait;
use cairn_core::context::RequestEnvelope;
use cairn_core::error::HookError;
use cairn_core::extension::LifecycleHook;
use cairn_core::tool::{ToolCall, ToolResult, META_ARGUMENTS, META_TOOL_NAME};
use cairn_core::user::User;
use cairn_tools::sql::{validate_read_only, RUN_SQL};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::fmt;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;
use tracing::{debug, error};

/// Envelope metadata key holding the user's question for this turn.
pub const QUESTION_KEY: &str = "question";

const PREVIEW_CHARS: usize = 100;

// ── Query logging ─────────────────────────────────────────────────────────

/// Appends one JSON line per executed tool call.
///
/// Only `run_sql` is logged unless `log_all_tools` is set. Write failures are
/// logged and swallowed so a full disk never breaks a turn.
#[derive(Debug, Clone)]
pub struct QueryLoggingHook {
    path: PathBuf,
    log_all_tools: bool,
    include_result_preview: bool,
}

impl QueryLoggingHook {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            log_all_tools: false,
            include_result_preview: false,
        }
    }

    pub fn with_all_tools(mut self, enabled: bool) -> Self {
        self.log_all_tools = enabled;
        self
    }

    pub fn with_result_preview(mut self, enabled: bool) -> Self {
        self.include_result_preview = enabled;
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn entry(&self, call: &ToolCall, result: &ToolResult, envelope: &RequestEnvelope) -> Option<Value> {
        let tool_name = result
            .metadata
            .get(META_TOOL_NAME)
            .and_then(Value::as_str)
            .unwrap_or(&call.name);
        if !self.log_all_tools && tool_name != RUN_SQL {
            return None;
        }

        let mut entry = Map::new();
        entry.insert("timestamp".into(), json!(Utc::now().to_rfc3339()));
        entry.insert("tool_name".into(), json!(tool_name));
        entry.insert("success".into(), json!(result.success));
        entry.insert("user_id".into(), json!(envelope.user.id));
        if let Some(question) = envelope.metadata.get_str(QUESTION_KEY) {
            entry.insert("question".into(), json!(question));
        }
        if let Some(arguments) = result.metadata.get(META_ARGUMENTS) {
            entry.insert("arguments".into(), arguments.clone());
        }
        if let Some(failure) = &result.error {
            entry.insert("error".into(), json!(failure.message));
        }
        if self.include_result_preview && !result.output.is_empty() {
            let preview: String = result.output.chars().take(PREVIEW_CHARS).collect();
            entry.insert("result_preview".into(), json!(preview));
        }
        Some(Value::Object(entry))
    }

    async fn append(&self, line: String) -> std::io::Result<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }
        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await?;
        file.write_all(line.as_bytes()).await?;
        file.flush().await
    }
}

#[async_trait]
impl LifecycleHook for QueryLoggingHook {
    fn name(&self) -> &str {
        "query_logging"
    }

    async fn after_tool(
        &self,
        call: &ToolCall,
        result: &ToolResult,
        envelope: &RequestEnvelope,
    ) -> Result<Option<ToolResult>, HookError> {
        let Some(entry) = self.entry(call, result, envelope) else {
            return Ok(None);
        };
        let line = format!("{entry}\n");
        if let Err(e) = self.append(line).await {
            error!(path = %self.path.display(), "Failed to write query log: {e}");
        } else {
            debug!(tool = %call.name, "Logged tool execution");
        }
        Ok(None)
    }
}

/// Summary of a query log.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct QueryLogStats {
    pub total: usize,
    pub successful: usize,
    pub failed: usize,
    pub unique_users: usize,
    pub tool_usage: BTreeMap<String, usize>,
    /// Most frequent errors, most common first (at most five)
    pub top_errors: Vec<(String, usize)>,
    /// The first few questions asked (at most five)
    pub sample_questions: Vec<String>,
}

impl QueryLogStats {
    pub fn success_rate(&self) -> Option<f64> {
        (self.total > 0).then(|| self.successful as f64 / self.total as f64 * 100.0)
    }
}

impl fmt::Display for QueryLogStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let rule = "=".repeat(70);
        writeln!(f, "{rule}\nCairn Query Log Analysis\n{rule}")?;
        writeln!(f, "\nTotal queries: {}", self.total)?;
        match self.success_rate() {
            Some(rate) => {
                writeln!(f, "Successful: {} ({rate:.1}%)", self.successful)?;
                writeln!(f, "Failed: {} ({:.1}%)", self.failed, 100.0 - rate)?;
            }
            None => writeln!(f, "No queries found in log file")?,
        }
        writeln!(f, "\nUnique users: {}", self.unique_users)?;
        writeln!(f, "\nTool usage:")?;
        let mut tools: Vec<_> = self.tool_usage.iter().collect();
        tools.sort_by(|a, b| b.1.cmp(a.1).then(a.0.cmp(b.0)));
        for (tool, count) in tools {
            writeln!(f, "  {tool}: {count}")?;
        }
        if !self.top_errors.is_empty() {
            writeln!(f, "\nTop errors:")?;
            for (message, count) in &self.top_errors {
                let short: String = message.chars().take(60).collect();
                writeln!(f, "  {short}... : {count}")?;
            }
        }
        if !self.sample_questions.is_empty() {
            writeln!(f, "\nSample questions:")?;
            for question in &self.sample_questions {
                let short: String = question.chars().take(60).collect();
                writeln!(f, "  - {short}...")?;
            }
        }
        write!(f, "\n{rule}")
    }
}

fn log_entries(path: &Path) -> std::io::Result<impl Iterator<Item = Value>> {
    let file = std::fs::File::open(path)?;
    Ok(BufReader::new(file)
        .lines()
        .map_while(Result::ok)
        .filter_map(|line| serde_json::from_str::<Value>(line.trim()).ok()))
}

/// Read a query log and summarize it. Unparseable lines are skipped.
pub fn analyze_query_log(path: impl AsRef<Path>) -> std::io::Result<QueryLogStats> {
    let mut stats = QueryLogStats::default();
    let mut users = HashSet::new();
    let mut errors: HashMap<String, usize> = HashMap::new();

    for entry in log_entries(path.as_ref())? {
        stats.total += 1;
        if entry["success"].as_bool().unwrap_or(false) {
            stats.successful += 1;
        } else {
            stats.failed += 1;
            let message = entry["error"].as_str().unwrap_or("Unknown error").to_string();
            *errors.entry(message).or_default() += 1;
        }
        if let Some(user) = entry["user_id"].as_str() {
            users.insert(user.to_string());
        }
        if let Some(question) = entry["question"].as_str() {
            if stats.sample_questions.len() < 5 {
                stats.sample_questions.push(question.to_string());
            }
        }
        if let Some(tool) = entry["tool_name"].as_str() {
            *stats.tool_usage.entry(tool.to_string()).or_default() += 1;
        }
    }

    stats.unique_users = users.len();
    let mut errors: Vec<(String, usize)> = errors.into_iter().collect();
    errors.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
    errors.truncate(5);
    stats.top_errors = errors;
    Ok(stats)
}

/// A question and the SQL that answered it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrainingPair {
    pub question: String,
    pub sql: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
}

/// Successful `run_sql` entries that carry both a question and SQL.
pub fn export_successful_queries(path: impl AsRef<Path>) -> std::io::Result<Vec<TrainingPair>> {
    Ok(log_entries(path.as_ref())?
        .filter(|entry| entry["success"].as_bool().unwrap_or(false) && entry["tool_name"] == RUN_SQL)
        .filter_map(|entry| {
            let question = entry["question"].as_str().filter(|q| !q.is_empty())?;
            let sql = entry["arguments"]["sql"].as_str().filter(|s| !s.is_empty())?;
            Some(TrainingPair {
                question: question.to_string(),
                sql: sql.to_string(),
                timestamp: entry["timestamp"].as_str().map(str::to_string),
                user_id: entry["user_id"].as_str().map(str::to_string),
            })
        })
        .collect())
}

// ── Read-only SQL veto ────────────────────────────────────────────────────

/// Vetoes SQL tool calls whose `sql` argument would modify data.
#[derive(Debug, Clone)]
pub struct ReadOnlySqlHook {
    tool_name: String,
}

impl ReadOnlySqlHook {
    pub fn new() -> Self {
        Self::for_tool(RUN_SQL)
    }

    pub fn for_tool(tool_name: impl Into<String>) -> Self {
        Self {
            tool_name: tool_name.into(),
        }
    }
}

impl Default for ReadOnlySqlHook {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl LifecycleHook for ReadOnlySqlHook {
    fn name(&self) -> &str {
        "read_only_sql"
    }

    async fn before_tool(&self, call: &ToolCall, _envelope: &RequestEnvelope) -> Result<(), HookError> {
        if call.name != self.tool_name {
            return Ok(());
        }
        // Missing or mistyped `sql` is left to argument validation.
        let Some(sql) = call.arguments.get("sql").and_then(Value::as_str) else {
            return Ok(());
        };
        validate_read_only(sql).map_err(HookError::rejected)
    }
}

// ── Message hygiene ───────────────────────────────────────────────────────

/// Trims the inbound message and rejects empty or oversized ones.
#[derive(Debug, Clone)]
pub struct MessageLengthHook {
    max_chars: usize,
}

impl MessageLengthHook {
    pub fn new(max_chars: usize) -> Self {
        Self { max_chars }
    }
}

impl Default for MessageLengthHook {
    fn default() -> Self {
        Self::new(8_000)
    }
}

#[async_trait]
impl LifecycleHook for MessageLengthHook {
    fn name(&self) -> &str {
        "message_length"
    }

    async fn before_message(&self, _user: &User, message: &str) -> Result<Option<String>, HookError> {
        let trimmed = message.trim();
        if trimmed.is_empty() {
            return Err(HookError::rejected("Message must not be empty"));
        }
        let length = trimmed.chars().count();
        if length > self.max_chars {
            return Err(HookError::rejected(format!(
                "Message is too long ({length} characters, limit {})",
                self.max_chars
            )));
        }
        Ok((trimmed.len() != message.len()).then(|| trimmed.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cairn_core::message::ConversationId;
    use cairn_core::tool::{ToolErrorKind, META_EXECUTION_TIME_MS};
    use cairn_memory::NoopAgentMemory;
    use std::sync::Arc;

    fn envelope() -> RequestEnvelope {
        RequestEnvelope::new(User::new("ana"), ConversationId::from("c1"), Arc::new(NoopAgentMemory))
    }

    fn stamped(result: ToolResult, tool: &str, args: Value) -> ToolResult {
        let mut result = result;
        result.metadata.insert(META_TOOL_NAME.into(), json!(tool));
        result.metadata.insert(META_ARGUMENTS.into(), args);
        result.metadata.insert(META_EXECUTION_TIME_MS.into(), json!(3));
        result
    }

    #[tokio::test]
    async fn logs_sql_and_exports_pairs() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("logs").join("queries.jsonl");
        let hook = QueryLoggingHook::new(&path).with_result_preview(true);
        let env = envelope();
        env.metadata.insert(QUESTION_KEY, "how many orders?");

        let call = ToolCall::new("c1", RUN_SQL, json!({"sql": "SELECT COUNT(*) FROM orders"}));
        let ok = stamped(
            ToolResult::success("c1", "x".repeat(300)),
            RUN_SQL,
            json!({"sql": "SELECT COUNT(*) FROM orders"}),
        );
        assert!(hook.after_tool(&call, &ok, &env).await.unwrap().is_none());

        let failed = stamped(
            ToolResult::failure("c2", ToolErrorKind::ExecutionFailed, "no such table: ordrs"),
            RUN_SQL,
            json!({"sql": "SELECT * FROM ordrs"}),
        );
        hook.after_tool(&call, &failed, &env).await.unwrap();

        let other = ToolCall::new("c3", "save_text_memory", json!({}));
        let other_result = stamped(ToolResult::success("c3", "saved"), "save_text_memory", json!({}));
        hook.after_tool(&other, &other_result, &env).await.unwrap();

        let raw = std::fs::read_to_string(&path).unwrap();
        assert_eq!(raw.lines().count(), 2);
        let first: Value = serde_json::from_str(raw.lines().next().unwrap()).unwrap();
        assert_eq!(first["user_id"], "ana");
        assert_eq!(first["result_preview"].as_str().unwrap().len(), 100);

        let stats = analyze_query_log(&path).unwrap();
        assert_eq!(stats.total, 2);
        assert_eq!(stats.successful, 1);
        assert_eq!(stats.unique_users, 1);
        assert_eq!(stats.top_errors, vec![("no such table: ordrs".to_string(), 1)]);
        assert!(stats.to_string().contains("Successful: 1 (50.0%)"));

        let pairs = export_successful_queries(&path).unwrap();
        assert_eq!(pairs.len(), 1);
        assert_eq!(pairs[0].question, "how many orders?");
        assert_eq!(pairs[0].sql, "SELECT COUNT(*) FROM orders");
    }

    #[tokio::test]
    async fn all_tools_mode_logs_everything() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("all.jsonl");
        let hook = QueryLoggingHook::new(&path).with_all_tools(true);
        let call = ToolCall::new("c1", "save_text_memory", json!({}));
        let result = stamped(ToolResult::success("c1", "saved"), "save_text_memory", json!({}));
        hook.after_tool(&call, &result, &envelope()).await.unwrap();
        let stats = analyze_query_log(&path).unwrap();
        assert_eq!(stats.tool_usage.get("save_text_memory"), Some(&1));
    }

    #[test]
    fn analyzing_missing_log_is_an_error() {
        assert!(analyze_query_log("/nonexistent/cairn/queries.jsonl").is_err());
    }

    #[tokio::test]
    async fn read_only_hook_vetoes_writes() {
        let hook = ReadOnlySqlHook::new();
        let env = envelope();
        let select = ToolCall::new("c1", RUN_SQL, json!({"sql": "SELECT 1"}));
        assert!(hook.before_tool(&select, &env).await.is_ok());

        let delete = ToolCall::new("c2", RUN_SQL, json!({"sql": "DELETE FROM users"}));
        let err = hook.before_tool(&delete, &env).await.unwrap_err();
        assert!(matches!(err, HookError::Rejected { .. }));

        let other = ToolCall::new("c3", "save_text_memory", json!({"sql": "DROP TABLE x"}));
        assert!(hook.before_tool(&other, &env).await.is_ok());
    }

    #[tokio::test]
    async fn message_hook_trims_and_limits() {
        let hook = MessageLengthHook::new(10);
        let user = User::new("u");
        assert_eq!(hook.before_message(&user, "  hi  ").await.unwrap().as_deref(), Some("hi"));
        assert_eq!(hook.before_message(&user, "hi").await.unwrap(), None);
        assert!(hook.before_message(&user, "   ").await.is_err());
        assert!(hook.before_message(&user, "this is far too long").await.is_err());
    }
}
