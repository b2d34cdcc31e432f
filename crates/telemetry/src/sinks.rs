//! Observability sinks that forward records elsewhere.

use cairn_core::observability::{Metric, ObservabilitySink, Span};
use std::sync::Arc;

/// Forwards spans and metrics to `tracing` at debug level.
pub struct TracingSink;

impl ObservabilitySink for TracingSink {
    fn record_span(&self, span: Span) {
        let duration_ms = span.duration_ms().unwrap_or(-1);
        match &span.error {
            Some(error) => tracing::warn!(
                span = %span.name,
                span_id = %span.id,
                parent = ?span.parent_id,
                duration_ms,
                error = %error,
                "span failed"
            ),
            None => tracing::debug!(
                span = %span.name,
                span_id = %span.id,
                parent = ?span.parent_id,
                duration_ms,
                "span finished"
            ),
        }
    }

    fn record_metric(&self, metric: Metric) {
        tracing::debug!(
            metric = %metric.name,
            value = metric.value,
            unit = %metric.unit,
            tags = ?metric.tags,
            "metric"
        );
    }
}

/// Sends every record to each inner sink, in order.
#[derive(Default)]
pub struct FanoutSink {
    sinks: Vec<Arc<dyn ObservabilitySink>>,
}

impl FanoutSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, sink: Arc<dyn ObservabilitySink>) -> Self {
        self.sinks.push(sink);
        self
    }

    pub fn len(&self) -> usize {
        self.sinks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sinks.is_empty()
    }
}

impl ObservabilitySink for FanoutSink {
    fn record_span(&self, span: Span) {
        for sink in &self.sinks {
            sink.record_span(span.clone());
        }
    }

    fn record_metric(&self, metric: Metric) {
        for sink in &self.sinks {
            sink.record_metric(metric.clone());
        }
    }
}
