//! The per-turn request envelope shared with enrichers, hooks, and tools.

use serde_json::{Map, Value};
use std::sync::{Arc, PoisonError, RwLock};
use uuid::Uuid;
use crate::memory::AgentMemory;
use crate::message::ConversationId;
use crate::observability::{Metric, ObservabilitySink, Span};
use crate::user::User;

/// Shared, append-mostly metadata map.
///
/// Writers may insert or overwrite keys; there is deliberately no removal.
/// Cloning yields a handle to the same map.
#[derive(Debug, Clone, Default)]
pub struct Metadata {
    inner: Arc<RwLock<Map<String, Value>>>,
}

impl Metadata {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a value, returning the one it replaced.
    pub fn insert(&self, key: impl Into<String>, value: impl Into<Value>) -> Option<Value> {
        self.inner
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(key.into(), value.into())
    }

    pub fn get(&self, key: &str) -> Option<Value> {
        self.inner
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(key)
            .cloned()
    }

    pub fn get_str(&self, key: &str) -> Option<String> {
        self.get(key).and_then(|v| v.as_str().map(str::to_string))
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.inner
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.inner.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// A point-in-time copy of the map.
    pub fn snapshot(&self) -> Map<String, Value> {
        self.inner.read().unwrap_or_else(PoisonError::into_inner).clone()
    }
}

/// Everything a tool or hook may know about the current turn.
///
/// Constructed once per turn by the agent and shared by reference with every
/// enricher, hook, and tool execution in that turn.
#[derive(Clone)]
pub struct RequestEnvelope {
    pub user: User,
    pub conversation_id: ConversationId,
    /// Unique per turn
    pub request_id: String,
    pub memory: Arc<dyn AgentMemory>,
    pub metadata: Metadata,
    pub observability: Option<Arc<dyn ObservabilitySink>>,
    /// Span that tool and hook spans should nest under
    pub parent_span_id: Option<String>,
}

impl RequestEnvelope {
    pub fn new(user: User, conversation_id: ConversationId, memory: Arc<dyn AgentMemory>) -> Self {
        Self {
            user,
            conversation_id,
            request_id: Uuid::new_v4().to_string(),
            memory,
            metadata: Metadata::new(),
            observability: None,
            parent_span_id: None,
        }
    }

    pub fn with_observability(mut self, sink: Arc<dyn ObservabilitySink>) -> Self {
        self.observability = Some(sink);
        self
    }

    pub fn with_parent_span(mut self, span_id: impl Into<String>) -> Self {
        self.parent_span_id = Some(span_id.into());
        self
    }

    /// Open a span nested under the turn span.
    pub fn child_span(&self, name: &str) -> Span {
        Span::start(name, self.parent_span_id.as_deref())
            .with_attribute("request_id", self.request_id.clone())
    }

    pub fn record_span(&self, span: Span) {
        if let Some(sink) = &self.observability {
            sink.record_span(span);
        }
    }

    pub fn record_metric(&self, metric: Metric) {
        if let Some(sink) = &self.observability {
            sink.record_metric(metric);
        }
    }
}

impl std::fmt::Debug for RequestEnvelope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RequestEnvelope")
            .field("user", &self.user.id)
            .field("conversation_id", &self.conversation_id)
            .field("request_id", &self.request_id)
            .field("memory", &self.memory.name())
            .field("metadata", &self.metadata)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn metadata_is_shared_between_clones() {
        let a = Metadata::new();
        let b = a.clone();
        a.insert("region", "emea");
        assert_eq!(b.get_str("region").as_deref(), Some("emea"));
        assert_eq!(b.len(), 1);
    }

    #[test]
    fn metadata_last_writer_wins() {
        let meta = Metadata::new();
        assert!(meta.insert("k", 1).is_none());
        assert_eq!(meta.insert("k", 2), Some(Value::from(1)));
        assert_eq!(meta.get("k"), Some(Value::from(2)));
    }

    #[test]
    fn snapshot_is_detached() {
        let meta = Metadata::new();
        meta.insert("a", true);
        let snap = meta.snapshot();
        meta.insert("b", false);
        assert_eq!(snap.len(), 1);
        assert!(meta.contains_key("b"));
    }
}
