//! Security module for Cairn — audit logging for tool access.
//!
//! Provides:
//! - **Audit logging**: one structured record per tool access check,
//!   invocation, and result, fanned out to pluggable sinks
//! - **Sanitization**: a configurable policy that scrubs parameter values
//!   (passwords, tokens, keys) before a record leaves the process

pub mod audit;
pub mod sanitize;

pub use audit::{
    AuditEntry, AuditError, AuditEvent, AuditLogger, AuditOutcome, AuditSink, JsonlAuditSink,
    TracingSink,
};
pub use sanitize::{NoopSanitizer, ParameterSanitizer, RedactingSanitizer, REDACTED};
