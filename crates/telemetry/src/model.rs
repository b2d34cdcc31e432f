//! Data model for per-request traces and metric summaries.

use cairn_core::observability::{Metric, Span};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Span attribute / metric tag the agent uses to tie records to a turn.
pub const REQUEST_ID_KEY: &str = "request_id";
/// Span attribute the agent sets on the turn span.
pub const CONVERSATION_ID_KEY: &str = "conversation_id";

/// Name of the root span of a turn.
pub const TURN_SPAN: &str = "agent.turn";

// ── Trace ─────────────────────────────────────────────────────────────────

/// Every span and metric recorded for one agent turn.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Trace {
    /// The turn's request id.
    pub request_id: String,
    /// Conversation id, once the turn span has been seen.
    pub conversation_id: Option<String>,
    /// Spans in the order they finished.
    pub spans: Vec<Span>,
    /// Metrics in the order they were recorded.
    pub metrics: Vec<Metric>,
    /// When the first record arrived.
    pub started_at: DateTime<Utc>,
    /// When the turn span arrived.
    pub ended_at: Option<DateTime<Utc>>,
}

impl Trace {
    pub fn new(request_id: impl Into<String>) -> Self {
        Self {
            request_id: request_id.into(),
            conversation_id: None,
            spans: Vec::new(),
            metrics: Vec::new(),
            started_at: Utc::now(),
            ended_at: None,
        }
    }

    /// Add a finished span. The turn span closes the trace.
    pub fn add_span(&mut self, span: Span) {
        if span.name == TURN_SPAN {
            self.ended_at = Some(span.ended_at.unwrap_or_else(Utc::now));
            if let Some(conv) = span.attributes.get(CONVERSATION_ID_KEY).and_then(|v| v.as_str()) {
                self.conversation_id = Some(conv.to_string());
            }
        }
        self.spans.push(span);
    }

    pub fn add_metric(&mut self, metric: Metric) {
        self.metrics.push(metric);
    }

    pub fn is_complete(&self) -> bool {
        self.ended_at.is_some()
    }

    /// The turn span, if it has been recorded.
    pub fn root_span(&self) -> Option<&Span> {
        self.spans.iter().find(|s| s.name == TURN_SPAN)
    }

    /// All spans with the given name, in finish order.
    pub fn spans_named<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a Span> + 'a {
        self.spans.iter().filter(move |s| s.name == name)
    }

    /// Direct children of a span.
    pub fn children_of<'a>(&'a self, span_id: &'a str) -> impl Iterator<Item = &'a Span> + 'a {
        self.spans
            .iter()
            .filter(move |s| s.parent_id.as_deref() == Some(span_id))
    }

    pub fn error_count(&self) -> usize {
        self.spans.iter().filter(|s| s.is_error()).count()
    }

    /// Duration of the turn span, or 0 when the turn is still running.
    pub fn total_duration_ms(&self) -> i64 {
        self.root_span().and_then(Span::duration_ms).unwrap_or(0)
    }

    pub fn llm_call_count(&self) -> usize {
        self.spans_named("agent.llm.call").count()
    }

    pub fn tool_execution_count(&self) -> usize {
        self.spans_named("agent.tool.execute").count()
    }
}

// ── Metrics ───────────────────────────────────────────────────────────────

/// Running aggregate of one metric name.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MetricSummary {
    pub name: String,
    pub unit: String,
    pub count: u64,
    pub sum: f64,
    pub min: f64,
    pub max: f64,
    pub last: f64,
}

impl MetricSummary {
    pub fn new(metric: &Metric) -> Self {
        Self {
            name: metric.name.clone(),
            unit: metric.unit.clone(),
            count: 1,
            sum: metric.value,
            min: metric.value,
            max: metric.value,
            last: metric.value,
        }
    }

    pub fn observe(&mut self, value: f64) {
        self.count += 1;
        self.sum += value;
        self.min = self.min.min(value);
        self.max = self.max.max(value);
        self.last = value;
    }

    pub fn mean(&self) -> f64 {
        if self.count == 0 {
            0.0
        } else {
            self.sum / self.count as f64
        }
    }
}

// ── Snapshot ──────────────────────────────────────────────────────────────

/// Totals since the engine was created.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UsageSnapshot {
    pub trace_count: u64,
    pub turns_completed: u64,
    pub llm_calls: u64,
    pub tool_executions: u64,
    pub error_spans: u64,
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn turn_span_closes_trace() {
        let mut trace = Trace::new("r1");
        let root = Span::start(TURN_SPAN, None).with_attribute(CONVERSATION_ID_KEY, "c1");
        let llm = Span::start("agent.llm.call", Some(&root.id)).finish();
        let tool = Span::start("agent.tool.execute", Some(&root.id)).fail("boom");
        let root_id = root.id.clone();

        trace.add_span(llm);
        trace.add_span(tool);
        assert!(!trace.is_complete());
        trace.add_span(root.finish());

        assert!(trace.is_complete());
        assert_eq!(trace.conversation_id.as_deref(), Some("c1"));
        assert_eq!(trace.llm_call_count(), 1);
        assert_eq!(trace.tool_execution_count(), 1);
        assert_eq!(trace.error_count(), 1);
        assert_eq!(trace.children_of(&root_id).count(), 2);
        assert!(trace.total_duration_ms() >= 0);
    }

    #[test]
    fn metric_summary_aggregates() {
        let mut summary = MetricSummary::new(&Metric::new("agent.tool.duration_ms", 10.0, "ms"));
        summary.observe(30.0);
        summary.observe(20.0);
        assert_eq!(summary.count, 3);
        assert_eq!(summary.min, 10.0);
        assert_eq!(summary.max, 30.0);
        assert_eq!(summary.last, 20.0);
        assert!((summary.mean() - 20.0).abs() < f64::EPSILON);
    }

    #[test]
    fn trace_serialization_roundtrip() {
        let mut trace = Trace::new("r1");
        trace.add_metric(Metric::new("agent.turn.iterations", 2.0, "count"));
        trace.add_span(Span::start(TURN_SPAN, None).finish());
        let json = serde_json::to_string(&trace).unwrap();
        let restored: Trace = serde_json::from_str(&json).unwrap();
        assert_eq!(restored.request_id, "r1");
        assert_eq!(restored.metrics.len(), 1);
        assert!(restored.is_complete());
    }
}
