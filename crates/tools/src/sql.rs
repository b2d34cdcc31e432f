//! The `run_sql` tool and its read-only guard.
//!
//! The tool itself knows nothing about databases: it hands the query to a
//! [`SqlRunner`] and renders whatever rows come back, as a Markdown table
//! for the model and as a `dataframe` payload for the UI.

use async_trait::async_trait;
use cairn_core::context::RequestEnvelope;
use cairn_core::error::ToolError;
use cairn_core::tool::{Tool, ToolResult};
use regex_lite::Regex;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::{Arc, LazyLock};
use tracing::{debug, warn};

pub const RUN_SQL: &str = "run_sql";

/// Rows returned by a query.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct QueryRows {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<Value>>,
}

/// Executes SQL against some database.
#[async_trait]
pub trait SqlRunner: Send + Sync {
    async fn run_sql(&self, sql: &str, envelope: &RequestEnvelope) -> Result<QueryRows, ToolError>;
}

// ── Read-only guard ───────────────────────────────────────────────────────

const ALLOWED_STATEMENTS: [&str; 6] = ["SELECT", "SHOW", "DESCRIBE", "DESC", "EXPLAIN", "WITH"];

static BLOCKED_KEYWORDS: LazyLock<Option<Regex>> = LazyLock::new(|| {
    Regex::new(
        r"\b(INSERT|UPDATE|DELETE|REPLACE|MERGE|UPSERT|DROP|ALTER|CREATE|TRUNCATE|RENAME|GRANT|REVOKE|LOCK|UNLOCK|CALL|LOAD|IMPORT|SET|KILL|FLUSH|RESET|PURGE|HANDLER|DO|PREPARE|EXECUTE|DEALLOCATE)\b",
    )
    .ok()
});

/// Check that `sql` is a single read-only statement.
///
/// The error string is meant to be shown to the model so it can correct
/// the query.
pub fn validate_read_only(sql: &str) -> Result<(), String> {
    if sql.trim().is_empty() {
        return Err("Empty SQL query".into());
    }

    let cleaned = strip_comments(sql);
    let statements = split_statements(&cleaned);
    let Some(statement) = statements.first() else {
        return Err("SQL query is empty after removing comments".into());
    };
    if statements.len() > 1 {
        return Err("Multi-statement queries are not allowed. Send one query at a time.".into());
    }

    let first = statement
        .trim_start_matches(|c: char| c == '(' || c.is_whitespace())
        .split(|c: char| !c.is_ascii_alphanumeric() && c != '_')
        .next()
        .unwrap_or_default()
        .to_ascii_uppercase();
    if !ALLOWED_STATEMENTS.contains(&first.as_str()) {
        return Err(format!(
            "Statement type '{first}' is not allowed. Only {} queries are permitted.",
            ALLOWED_STATEMENTS.join(", ")
        ));
    }

    let normalized = statement.split_whitespace().collect::<Vec<_>>().join(" ").to_ascii_uppercase();
    let Some(blocked) = BLOCKED_KEYWORDS.as_ref() else {
        return Err("SQL keyword guard is unavailable".into());
    };
    if let Some(hit) = blocked.captures(&normalized).and_then(|c| c.get(1)) {
        return Err(format!(
            "Query contains blocked keyword '{}'. Only read-only operations are permitted.",
            hit.as_str()
        ));
    }
    Ok(())
}

/// Remove `-- line` and `/* block */` comments outside string literals.
fn strip_comments(sql: &str) -> String {
    let mut out = String::with_capacity(sql.len());
    let mut chars = sql.chars().peekable();
    let mut quote: Option<char> = None;

    while let Some(c) = chars.next() {
        if let Some(q) = quote {
            out.push(c);
            if c == q {
                quote = None;
            }
            continue;
        }
        match c {
            '\'' | '"' | '`' => {
                quote = Some(c);
                out.push(c);
            }
            '-' if chars.peek() == Some(&'-') => {
                for next in chars.by_ref() {
                    if next == '\n' {
                        out.push('\n');
                        break;
                    }
                }
            }
            '/' if chars.peek() == Some(&'*') => {
                chars.next();
                let mut prev = '\0';
                for next in chars.by_ref() {
                    if prev == '*' && next == '/' {
                        break;
                    }
                    prev = next;
                }
                out.push(' ');
            }
            _ => out.push(c),
        }
    }
    out
}

/// Split on `;` outside string literals, dropping empty statements.
fn split_statements(sql: &str) -> Vec<String> {
    let mut statements = Vec::new();
    let mut current = String::new();
    let mut quote: Option<char> = None;

    for c in sql.chars() {
        match quote {
            Some(q) => {
                if c == q {
                    quote = None;
                }
                current.push(c);
            }
            None if c == ';' => statements.push(std::mem::take(&mut current)),
            None => {
                if matches!(c, '\'' | '"' | '`') {
                    quote = Some(c);
                }
                current.push(c);
            }
        }
    }
    statements.push(current);
    statements
        .into_iter()
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}

/// Refuses anything that is not a single read-only statement before it
/// reaches the wrapped runner.
pub struct ReadOnlySqlRunner {
    inner: Arc<dyn SqlRunner>,
}

impl ReadOnlySqlRunner {
    pub fn new(inner: Arc<dyn SqlRunner>) -> Self {
        Self { inner }
    }
}

#[async_trait]
impl SqlRunner for ReadOnlySqlRunner {
    async fn run_sql(&self, sql: &str, envelope: &RequestEnvelope) -> Result<QueryRows, ToolError> {
        if let Err(reason) = validate_read_only(sql) {
            warn!(user = %envelope.user.id, %reason, "Blocked non read-only SQL");
            return Err(ToolError::InvalidArguments(reason));
        }
        self.inner.run_sql(sql, envelope).await
    }
}

// ── Tool ──────────────────────────────────────────────────────────────────

/// Runs a SQL query and renders the result.
pub struct RunSqlTool {
    runner: Arc<dyn SqlRunner>,
    /// Rows shown to the model; the UI payload always carries every row
    max_rows_in_output: usize,
}

impl RunSqlTool {
    pub fn new(runner: Arc<dyn SqlRunner>) -> Self {
        Self {
            runner,
            max_rows_in_output: 50,
        }
    }

    pub fn with_max_rows_in_output(mut self, max_rows: usize) -> Self {
        self.max_rows_in_output = max_rows.max(1);
        self
    }
}

#[async_trait]
impl Tool for RunSqlTool {
    fn name(&self) -> &str {
        RUN_SQL
    }

    fn description(&self) -> &str {
        "Execute a SQL query against the database and return the resulting rows."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "sql": {
                    "type": "string",
                    "description": "The SQL query to execute"
                }
            },
            "required": ["sql"],
            "additionalProperties": false
        })
    }

    async fn execute(&self, arguments: Value, envelope: &RequestEnvelope) -> Result<ToolResult, ToolError> {
        let sql = arguments["sql"]
            .as_str()
            .ok_or_else(|| ToolError::InvalidArguments("Missing 'sql' parameter".into()))?;

        let result = self.runner.run_sql(sql, envelope).await?;
        debug!(rows = result.rows.len(), columns = result.columns.len(), "SQL query returned");

        let output = if result.rows.is_empty() {
            "Query executed successfully. No rows returned.".to_string()
        } else {
            let mut text = format!("Returned {} row(s).\n\n", result.rows.len());
            text.push_str(&markdown_table(&result, self.max_rows_in_output));
            if result.rows.len() > self.max_rows_in_output {
                text.push_str(&format!("\n(showing first {} rows)", self.max_rows_in_output));
            }
            text
        };

        let ui = json!({
            "type": "dataframe",
            "columns": result.columns,
            "rows": result.rows,
            "row_count": result.rows.len(),
        });
        Ok(ToolResult::success("", output).with_ui(ui))
    }
}

fn markdown_table(result: &QueryRows, max_rows: usize) -> String {
    let mut table = format!("| {} |\n", result.columns.join(" | "));
    table.push_str(&format!("|{}\n", "---|".repeat(result.columns.len().max(1))));
    for row in result.rows.iter().take(max_rows) {
        let cells: Vec<String> = row.iter().map(render_cell).collect();
        table.push_str(&format!("| {} |\n", cells.join(" | ")));
    }
    table
}

fn render_cell(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => s.replace('|', "\\|").replace('\n', " "),
        other => other.to_string(),
    }
}

// ── SQLite ────────────────────────────────────────────────────────────────

#[cfg(feature = "sqlite")]
pub use sqlite_runner::SqliteRunner;

#[cfg(feature = "sqlite")]
mod sqlite_runner {
    use super::*;
    use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions, SqliteRow};
    use sqlx::{Column, Row, SqlitePool, TypeInfo, ValueRef};
    use std::str::FromStr;

    /// Runs queries against a SQLite database through `sqlx`.
    ///
    /// [`SqliteRunner::connect`] opens the database read-only, so writes fail
    /// in SQLite itself even if a statement slips past [`validate_read_only`].
    pub struct SqliteRunner {
        pool: SqlitePool,
    }

    impl SqliteRunner {
        /// Open the existing database at `url` (e.g. `sqlite://chinook.db`)
        /// in read-only mode.
        pub async fn connect(url: &str) -> Result<Self, ToolError> {
            let options = SqliteConnectOptions::from_str(url)
                .map_err(|e| failure(format!("Invalid SQLite URL: {e}")))?
                .read_only(true);
            let max_connections = if url.contains(":memory:") { 1 } else { 4 };
            let pool = SqlitePoolOptions::new()
                .max_connections(max_connections)
                .connect_with(options)
                .await
                .map_err(|e| failure(format!("Failed to open SQLite: {e}")))?;
            Ok(Self { pool })
        }

        /// Wrap a pool opened elsewhere. Its access mode is the caller's choice.
        pub fn from_pool(pool: SqlitePool) -> Self {
            Self { pool }
        }

        pub fn pool(&self) -> &SqlitePool {
            &self.pool
        }
    }

    fn failure(reason: String) -> ToolError {
        ToolError::ExecutionFailed {
            tool_name: RUN_SQL.into(),
            reason,
        }
    }

    fn decode(row: &SqliteRow, index: usize) -> Value {
        let (is_null, type_name) = match row.try_get_raw(index) {
            Ok(raw) => (raw.is_null(), raw.type_info().name().to_string()),
            Err(_) => return Value::Null,
        };
        if is_null {
            return Value::Null;
        }
        match type_name.as_str() {
            "INTEGER" => row.try_get::<i64, _>(index).map(Value::from).unwrap_or(Value::Null),
            "REAL" => row.try_get::<f64, _>(index).map(Value::from).unwrap_or(Value::Null),
            "BLOB" => row
                .try_get::<Vec<u8>, _>(index)
                .map(|bytes| Value::String(format!("<{} bytes>", bytes.len())))
                .unwrap_or(Value::Null),
            _ => row.try_get::<String, _>(index).map(Value::String).unwrap_or(Value::Null),
        }
    }

    #[async_trait]
    impl SqlRunner for SqliteRunner {
        async fn run_sql(&self, sql: &str, _envelope: &RequestEnvelope) -> Result<QueryRows, ToolError> {
            let rows = sqlx::query(sql)
                .fetch_all(&self.pool)
                .await
                .map_err(|e| failure(e.to_string()))?;

            let columns = rows
                .first()
                .map(|row| row.columns().iter().map(|c| c.name().to_string()).collect())
                .unwrap_or_default();
            let rows = rows
                .iter()
                .map(|row| (0..row.len()).map(|i| decode(row, i)).collect())
                .collect();
            Ok(QueryRows { columns, rows })
        }
    }
}
