//! Span and metric collection for Cairn.
//!
//! The agent writes spans and metrics through the
//! [`cairn_core::ObservabilitySink`] trait. This crate provides the sinks:
//! an in-memory [`TelemetryEngine`] that groups everything per request and
//! serves queries, a [`TracingSink`] that forwards to `tracing`, and a
//! [`FanoutSink`] that feeds several sinks at once.

pub mod engine;
pub mod model;
pub mod sinks;

pub use engine::TelemetryEngine;
pub use model::{MetricSummary, Trace, UsageSnapshot};
pub use sinks::{FanoutSink, TracingSink};

/// Errors from the telemetry subsystem.
#[derive(Debug, thiserror::Error)]
pub enum TelemetryError {
    #[error("unknown trace id: {0}")]
    UnknownTrace(String),

    #[error("serialization error: {0}")]
    SerdeError(#[from] serde_json::Error),
}
