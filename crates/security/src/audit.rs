//! Audit logging — structured records of tool access.
//!
//! Every tool call that reaches the permission check produces records in a
//! fixed order: access check, then invocation, then result. A denied call
//! produces exactly one access-check record.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};
use thiserror::Error;
use crate::sanitize::{NoopSanitizer, ParameterSanitizer};

#[derive(Debug, Error)]
pub enum AuditError {
    #[error("Failed to open audit log {path}: {source}")]
    Open {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// A single audit log entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEntry {
    pub timestamp: DateTime<Utc>,
    pub event: AuditEvent,
    /// User id of the caller
    pub actor: String,
    /// Tool name
    pub target: String,
    pub outcome: AuditOutcome,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}

/// Types of auditable tool events.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AuditEvent {
    /// The caller's groups were checked against the tool's access groups
    ToolAccessCheck {
        tool_name: String,
        user_groups: Vec<String>,
        required_groups: Vec<String>,
    },
    /// The tool body is about to run with these (sanitized) parameters
    ToolInvocation {
        tool_name: String,
        parameters: serde_json::Value,
    },
    /// The tool body finished
    ToolResult {
        tool_name: String,
        execution_time_ms: u64,
    },
}

impl AuditEvent {
    pub fn event_type(&self) -> &'static str {
        match self {
            Self::ToolAccessCheck { .. } => "tool_access_check",
            Self::ToolInvocation { .. } => "tool_invocation",
            Self::ToolResult { .. } => "tool_result",
        }
    }
}

/// Outcome of an audited operation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum AuditOutcome {
    Success,
    Failure,
    Denied,
}

/// Trait for audit log sinks (where events are written).
pub trait AuditSink: Send + Sync {
    fn record(&self, entry: &AuditEntry);
}

/// Audit logger that keeps entries in memory and forwards them to sinks.
pub struct AuditLogger {
    entries: Mutex<Vec<AuditEntry>>,
    sinks: Vec<Box<dyn AuditSink>>,
    sanitizer: Box<dyn ParameterSanitizer>,
    /// Cap on retained in-memory entries; oldest are dropped first
    max_entries: usize,
}

impl std::fmt::Debug for AuditLogger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuditLogger")
            .field("entry_count", &self.count())
            .field("sink_count", &self.sinks.len())
            .finish()
    }
}

impl Default for AuditLogger {
    fn default() -> Self {
        Self::new()
    }
}

impl AuditLogger {
    /// Create a new audit logger with no sinks and no sanitization.
    pub fn new() -> Self {
        Self {
            entries: Mutex::new(Vec::new()),
            sinks: Vec::new(),
            sanitizer: Box::new(NoopSanitizer),
            max_entries: 10_000,
        }
    }

    /// Create a new audit logger with the given sinks.
    pub fn with_sinks(sinks: Vec<Box<dyn AuditSink>>) -> Self {
        Self { sinks, ..Self::new() }
    }

    pub fn with_sink(mut self, sink: Box<dyn AuditSink>) -> Self {
        self.sinks.push(sink);
        self
    }

    pub fn with_sanitizer(mut self, sanitizer: Box<dyn ParameterSanitizer>) -> Self {
        self.sanitizer = sanitizer;
        self
    }

    pub fn with_max_entries(mut self, max_entries: usize) -> Self {
        self.max_entries = max_entries.max(1);
        self
    }

    /// Record an audit event.
    pub fn log(
        &self,
        event: AuditEvent,
        actor: &str,
        target: &str,
        outcome: AuditOutcome,
        request_id: Option<&str>,
        details: Option<String>,
    ) {
        let entry = AuditEntry {
            timestamp: Utc::now(),
            event,
            actor: actor.into(),
            target: target.into(),
            outcome,
            request_id: request_id.map(str::to_string),
            details,
        };

        {
            let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
            if entries.len() >= self.max_entries {
                entries.remove(0);
            }
            entries.push(entry.clone());
        }

        for sink in &self.sinks {
            sink.record(&entry);
        }
    }

    /// Record the result of a permission check.
    pub fn log_access_check(
        &self,
        tool_name: &str,
        actor: &str,
        user_groups: Vec<String>,
        required_groups: Vec<String>,
        granted: bool,
        request_id: Option<&str>,
    ) {
        let (outcome, details) = if granted {
            (AuditOutcome::Success, None)
        } else {
            (AuditOutcome::Denied, Some(format!("requires one of: {}", required_groups.join(", "))))
        };
        self.log(
            AuditEvent::ToolAccessCheck {
                tool_name: tool_name.into(),
                user_groups,
                required_groups,
            },
            actor,
            tool_name,
            outcome,
            request_id,
            details,
        );
    }

    /// Record a tool invocation. Parameters pass through the sanitizer first.
    pub fn log_invocation(
        &self,
        tool_name: &str,
        actor: &str,
        parameters: &serde_json::Value,
        request_id: Option<&str>,
    ) {
        let parameters = self.sanitizer.sanitize(tool_name, parameters);
        self.log(
            AuditEvent::ToolInvocation {
                tool_name: tool_name.into(),
                parameters,
            },
            actor,
            tool_name,
            AuditOutcome::Success,
            request_id,
            None,
        );
    }

    /// Record a finished tool body.
    pub fn log_result(
        &self,
        tool_name: &str,
        actor: &str,
        success: bool,
        execution_time_ms: u64,
        error: Option<String>,
        request_id: Option<&str>,
    ) {
        let outcome = if success { AuditOutcome::Success } else { AuditOutcome::Failure };
        self.log(
            AuditEvent::ToolResult {
                tool_name: tool_name.into(),
                execution_time_ms,
            },
            actor,
            tool_name,
            outcome,
            request_id,
            error,
        );
    }

    /// Get all recorded entries.
    pub fn entries(&self) -> Vec<AuditEntry> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    /// Get entries filtered by outcome.
    pub fn entries_by_outcome(&self, outcome: &AuditOutcome) -> Vec<AuditEntry> {
        self.filtered(|e| &e.outcome == outcome)
    }

    /// Get entries of one event type (see [`AuditEvent::event_type`]).
    pub fn entries_by_type(&self, event_type: &str) -> Vec<AuditEntry> {
        self.filtered(|e| e.event.event_type() == event_type)
    }

    /// Get entries for one tool.
    pub fn entries_for_tool(&self, tool_name: &str) -> Vec<AuditEntry> {
        self.filtered(|e| e.target == tool_name)
    }

    fn filtered(&self, pred: impl Fn(&AuditEntry) -> bool) -> Vec<AuditEntry> {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .filter(|e| pred(e))
            .cloned()
            .collect()
    }

    /// Clear all stored entries.
    pub fn clear(&self) {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner).clear();
    }

    /// Count of stored entries.
    pub fn count(&self) -> usize {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner).len()
    }
}

/// A tracing-based audit sink that logs entries via `tracing::info!`.
pub struct TracingSink;

impl AuditSink for TracingSink {
    fn record(&self, entry: &AuditEntry) {
        tracing::info!(
            event = entry.event.event_type(),
            actor = %entry.actor,
            target = %entry.target,
            outcome = ?entry.outcome,
            request_id = ?entry.request_id,
            details = ?entry.details,
            "AUDIT"
        );
    }
}

/// Appends one JSON line per entry to a file.
///
/// Write failures are logged and otherwise ignored so that a full disk
/// cannot block tool execution.
pub struct JsonlAuditSink {
    path: PathBuf,
    file: Mutex<std::fs::File>,
}

impl JsonlAuditSink {
    pub fn open(path: impl AsRef<Path>) -> Result<Self, AuditError> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).map_err(|source| AuditError::Open {
                    path: path.clone(),
                    source,
                })?;
            }
        }
        let file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .map_err(|source| AuditError::Open {
                path: path.clone(),
                source,
            })?;
        Ok(Self {
            path,
            file: Mutex::new(file),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl AuditSink for JsonlAuditSink {
    fn record(&self, entry: &AuditEntry) {
        let line = match serde_json::to_string(entry) {
            Ok(line) => line,
            Err(e) => {
                tracing::warn!(error = %e, "Failed to serialize audit entry");
                return;
            }
        };
        let mut file = self.file.lock().unwrap_or_else(PoisonError::into_inner);
        if let Err(e) = writeln!(file, "{line}") {
            tracing::warn!(error = %e, path = %self.path.display(), "Failed to write audit entry");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sanitize::{RedactingSanitizer, REDACTED};
    use std::sync::Arc;

    #[test]
    fn access_check_then_invocation_then_result() {
        let logger = AuditLogger::new();
        logger.log_access_check("run_sql", "alice", vec!["analyst".into()], vec![], true, Some("r1"));
        logger.log_invocation("run_sql", "alice", &serde_json::json!({"sql": "SELECT 1"}), Some("r1"));
        logger.log_result("run_sql", "alice", true, 12, None, Some("r1"));

        let types: Vec<_> = logger.entries().iter().map(|e| e.event.event_type()).collect();
        assert_eq!(types, vec!["tool_access_check", "tool_invocation", "tool_result"]);
        assert!(logger.entries().iter().all(|e| e.request_id.as_deref() == Some("r1")));
    }

    #[test]
    fn denied_access_is_recorded_with_required_groups() {
        let logger = AuditLogger::new();
        logger.log_access_check("save", "bob", vec!["analyst".into()], vec!["admin".into()], false, None);

        let denied = logger.entries_by_outcome(&AuditOutcome::Denied);
        assert_eq!(denied.len(), 1);
        assert_eq!(denied[0].actor, "bob");
        assert!(denied[0].details.as_deref().unwrap().contains("admin"));
    }

    #[test]
    fn failed_result_outcome() {
        let logger = AuditLogger::new();
        logger.log_result("run_sql", "alice", false, 3, Some("timeout".into()), None);
        let entries = logger.entries_for_tool("run_sql");
        assert_eq!(entries[0].outcome, AuditOutcome::Failure);
        assert_eq!(entries[0].details.as_deref(), Some("timeout"));
    }

    #[test]
    fn invocation_parameters_are_sanitized() {
        let logger = AuditLogger::new().with_sanitizer(Box::new(RedactingSanitizer::default()));
        logger.log_invocation("connect", "alice", &serde_json::json!({"password": "p", "db": "x"}), None);

        let entry = &logger.entries_by_type("tool_invocation")[0];
        match &entry.event {
            AuditEvent::ToolInvocation { parameters, .. } => {
                assert_eq!(parameters["password"], REDACTED);
                assert_eq!(parameters["db"], "x");
            }
            other => panic!("unexpected event {other:?}"),
        }
    }

    #[test]
    fn retention_drops_oldest() {
        let logger = AuditLogger::new().with_max_entries(2);
        for i in 0..3 {
            logger.log_result(&format!("t{i}"), "u", true, 0, None, None);
        }
        let targets: Vec<_> = logger.entries().into_iter().map(|e| e.target).collect();
        assert_eq!(targets, vec!["t1", "t2"]);
    }

    #[test]
    fn custom_sink_receives_events() {
        struct TestSink {
            received: Arc<Mutex<Vec<String>>>,
        }

        impl AuditSink for TestSink {
            fn record(&self, entry: &AuditEntry) {
                self.received.lock().unwrap().push(entry.actor.clone());
            }
        }

        let received = Arc::new(Mutex::new(Vec::new()));
        let logger = AuditLogger::with_sinks(vec![Box::new(TestSink { received: received.clone() })]);
        logger.log_result("search", "user@test", true, 1, None, None);

        let sink_entries = received.lock().unwrap();
        assert_eq!(sink_entries.len(), 1);
        assert_eq!(sink_entries[0], "user@test");
    }

    #[test]
    fn jsonl_sink_appends_lines() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("audit").join("tools.jsonl");
        let logger = AuditLogger::new().with_sink(Box::new(JsonlAuditSink::open(&path).unwrap()));
        logger.log_access_check("search", "u", vec![], vec![], true, None);
        logger.log_result("search", "u", true, 5, None, None);

        let contents = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<AuditEntry> = contents
            .lines()
            .map(|l| serde_json::from_str(l).unwrap())
            .collect();
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[1].event.event_type(), "tool_result");
    }

    #[test]
    fn debug_format() {
        let logger = AuditLogger::new();
        let debug_str = format!("{logger:?}");
        assert!(debug_str.contains("AuditLogger"));
        assert!(debug_str.contains("entry_count"));
    }
}
