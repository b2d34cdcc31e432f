//! Thread-safe telemetry engine — collects spans and metrics per request
//! and serves trace and usage queries.

use crate::TelemetryError;
use crate::model::*;
use cairn_core::observability::{Metric, ObservabilitySink, Span};
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::{PoisonError, RwLock};

/// Bucket for records that carry no request id.
const UNSCOPED: &str = "unscoped";

/// The core telemetry engine.
///
/// Thread-safe via `RwLock`. Spans and metrics are grouped into one
/// [`Trace`] per request id; metric values are also folded into per-name
/// [`MetricSummary`] aggregates.
pub struct TelemetryEngine {
    /// All traces (oldest first).
    traces: RwLock<Vec<Trace>>,
    /// Aggregates keyed by metric name.
    summaries: RwLock<HashMap<String, MetricSummary>>,
    /// Running totals.
    totals: RwLock<UsageSnapshot>,
    /// Retention cap on traces.
    max_traces: usize,
}

impl TelemetryEngine {
    pub fn new() -> Self {
        Self::with_capacity(5_000)
    }

    /// Create an engine that keeps at most `max_traces` traces.
    pub fn with_capacity(max_traces: usize) -> Self {
        Self {
            traces: RwLock::new(Vec::new()),
            summaries: RwLock::new(HashMap::new()),
            totals: RwLock::new(UsageSnapshot::default()),
            max_traces: max_traces.max(1),
        }
    }

    fn request_id_of_span(span: &Span) -> String {
        span.attributes
            .get(REQUEST_ID_KEY)
            .and_then(|v| v.as_str())
            .unwrap_or(UNSCOPED)
            .to_string()
    }

    fn request_id_of_metric(metric: &Metric) -> String {
        metric
            .tags
            .get(REQUEST_ID_KEY)
            .cloned()
            .unwrap_or_else(|| UNSCOPED.to_string())
    }

    /// Run `f` against the trace for `request_id`, creating it if needed.
    fn with_trace(&self, request_id: &str, f: impl FnOnce(&mut Trace)) {
        let mut traces = self.traces.write().unwrap_or_else(PoisonError::into_inner);
        if let Some(trace) = traces.iter_mut().rev().find(|t| t.request_id == request_id) {
            f(trace);
            return;
        }

        if traces.len() >= self.max_traces {
            // Drop the oldest completed traces first, then the oldest of all.
            let drain = (self.max_traces / 10).max(1);
            let mut removed = 0;
            traces.retain(|t| {
                if removed < drain && t.is_complete() {
                    removed += 1;
                    return false;
                }
                true
            });
            while traces.len() >= self.max_traces {
                traces.remove(0);
            }
        }

        let mut trace = Trace::new(request_id);
        f(&mut trace);
        traces.push(trace);

        self.totals
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .trace_count += 1;
    }

    // ── Queries ───────────────────────────────────────────────────────

    /// Get the trace for a request.
    pub fn get_trace(&self, request_id: &str) -> Option<Trace> {
        let traces = self.traces.read().unwrap_or_else(PoisonError::into_inner);
        traces.iter().find(|t| t.request_id == request_id).cloned()
    }

    /// List recent traces (most recent first).
    pub fn recent_traces(&self, limit: usize) -> Vec<Trace> {
        let traces = self.traces.read().unwrap_or_else(PoisonError::into_inner);
        traces.iter().rev().take(limit).cloned().collect()
    }

    /// Get completed traces for a specific conversation.
    pub fn traces_for_conversation(&self, conversation_id: &str) -> Vec<Trace> {
        let traces = self.traces.read().unwrap_or_else(PoisonError::into_inner);
        traces
            .iter()
            .filter(|t| t.conversation_id.as_deref() == Some(conversation_id))
            .cloned()
            .collect()
    }

    /// Total number of traces currently retained.
    pub fn trace_count(&self) -> usize {
        self.traces.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    /// Aggregate for one metric name.
    pub fn metric_summary(&self, name: &str) -> Option<MetricSummary> {
        self.summaries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(name)
            .cloned()
    }

    /// All metric aggregates, sorted by name.
    pub fn metric_summaries(&self) -> Vec<MetricSummary> {
        let mut all: Vec<_> = self
            .summaries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .cloned()
            .collect();
        all.sort_by(|a, b| a.name.cmp(&b.name));
        all
    }

    /// Spans that recorded an error, most recent first.
    pub fn error_spans(&self, limit: usize) -> Vec<Span> {
        let traces = self.traces.read().unwrap_or_else(PoisonError::into_inner);
        traces
            .iter()
            .rev()
            .flat_map(|t| t.spans.iter().rev())
            .filter(|s| s.is_error())
            .take(limit)
            .cloned()
            .collect()
    }

    /// Totals since the engine was created.
    pub fn usage_snapshot(&self) -> UsageSnapshot {
        self.totals.read().unwrap_or_else(PoisonError::into_inner).clone()
    }

    /// Serialize one trace as pretty JSON.
    pub fn export_trace(&self, request_id: &str) -> Result<String, TelemetryError> {
        let trace = self
            .get_trace(request_id)
            .ok_or_else(|| TelemetryError::UnknownTrace(request_id.to_string()))?;
        Ok(serde_json::to_string_pretty(&trace)?)
    }

    /// Prune traces that started before `cutoff`.
    pub fn prune_before(&self, cutoff: DateTime<Utc>) -> usize {
        let mut traces = self.traces.write().unwrap_or_else(PoisonError::into_inner);
        let before = traces.len();
        traces.retain(|t| t.started_at >= cutoff);
        before - traces.len()
    }
}

impl Default for TelemetryEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl ObservabilitySink for TelemetryEngine {
    fn record_span(&self, span: Span) {
        {
            let mut totals = self.totals.write().unwrap_or_else(PoisonError::into_inner);
            match span.name.as_str() {
                "agent.llm.call" => {
                    totals.llm_calls += 1;
                    let tokens = |key: &str| span.attributes.get(key).and_then(|v| v.as_u64()).unwrap_or(0);
                    totals.prompt_tokens += tokens("prompt_tokens");
                    totals.completion_tokens += tokens("completion_tokens");
                }
                "agent.tool.execute" => totals.tool_executions += 1,
                TURN_SPAN => totals.turns_completed += 1,
                _ => {}
            }
            if span.is_error() {
                totals.error_spans += 1;
            }
        }

        let request_id = Self::request_id_of_span(&span);
        self.with_trace(&request_id, |trace| trace.add_span(span));
    }

    fn record_metric(&self, metric: Metric) {
        {
            let mut summaries = self.summaries.write().unwrap_or_else(PoisonError::into_inner);
            summaries
                .entry(metric.name.clone())
                .and_modify(|s| s.observe(metric.value))
                .or_insert_with(|| MetricSummary::new(&metric));
        }

        let request_id = Self::request_id_of_metric(&metric);
        self.with_trace(&request_id, |trace| trace.add_metric(metric));
    }
}
