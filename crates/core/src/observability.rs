//! Observability sink — where spans and metrics go.
//!
//! The core only writes; it never reads a span or metric back. Collection,
//! aggregation, and export live in `cairn-telemetry`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use uuid::Uuid;

/// A timed unit of work, optionally nested under a parent span.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Span {
    pub id: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_id: Option<String>,

    /// Dotted name, e.g. `agent.tool.execute`
    pub name: String,

    pub started_at: DateTime<Utc>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ended_at: Option<DateTime<Utc>>,

    /// Error message when the work failed
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,

    #[serde(default, skip_serializing_if = "serde_json::Map::is_empty")]
    pub attributes: serde_json::Map<String, serde_json::Value>,
}

impl Span {
    /// Open a span now.
    pub fn start(name: impl Into<String>, parent_id: Option<&str>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            parent_id: parent_id.map(str::to_string),
            name: name.into(),
            started_at: Utc::now(),
            ended_at: None,
            error: None,
            attributes: serde_json::Map::new(),
        }
    }

    pub fn with_attribute(mut self, key: &str, value: impl Into<serde_json::Value>) -> Self {
        self.attributes.insert(key.to_string(), value.into());
        self
    }

    pub fn set_attribute(&mut self, key: &str, value: impl Into<serde_json::Value>) {
        self.attributes.insert(key.to_string(), value.into());
    }

    /// Close the span successfully.
    pub fn finish(mut self) -> Self {
        self.ended_at = Some(Utc::now());
        self
    }

    /// Close the span with an error.
    pub fn fail(mut self, error: impl Into<String>) -> Self {
        self.ended_at = Some(Utc::now());
        self.error = Some(error.into());
        self
    }

    pub fn duration_ms(&self) -> Option<i64> {
        self.ended_at.map(|end| (end - self.started_at).num_milliseconds())
    }

    pub fn is_error(&self) -> bool {
        self.error.is_some()
    }
}

/// A single measurement.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Metric {
    pub name: String,
    pub value: f64,
    /// Unit label, e.g. `ms` or `count`
    pub unit: String,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub tags: BTreeMap<String, String>,
    pub timestamp: DateTime<Utc>,
}

impl Metric {
    pub fn new(name: impl Into<String>, value: f64, unit: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value,
            unit: unit.into(),
            tags: BTreeMap::new(),
            timestamp: Utc::now(),
        }
    }

    pub fn with_tag(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.tags.insert(key.into(), value.into());
        self
    }
}

/// Receives finished spans and metrics.
///
/// Calls happen inline on the turn task, so implementations must not block.
pub trait ObservabilitySink: Send + Sync {
    fn record_span(&self, span: Span);
    fn record_metric(&self, metric: Metric);
}

/// Discards everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopSink;

impl ObservabilitySink for NoopSink {
    fn record_span(&self, _span: Span) {}
    fn record_metric(&self, _metric: Metric) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn span_lifecycle() {
        let root = Span::start("agent.turn", None);
        let child = Span::start("agent.llm.call", Some(&root.id))
            .with_attribute("iteration", 1)
            .finish();
        assert_eq!(child.parent_id.as_deref(), Some(root.id.as_str()));
        assert!(child.duration_ms().unwrap() >= 0);
        assert!(!child.is_error());
        assert_eq!(child.attributes["iteration"], 1);
    }

    #[test]
    fn failed_span_records_error() {
        let span = Span::start("agent.turn", None).fail("boom");
        assert!(span.is_error());
        assert!(span.ended_at.is_some());
    }

    #[test]
    fn metric_tags() {
        let m = Metric::new("agent.tool.duration_ms", 12.0, "ms").with_tag("tool", "run_sql");
        assert_eq!(m.tags["tool"], "run_sql");
    }
}
