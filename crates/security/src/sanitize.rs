//! Parameter sanitization for audit records.

use serde_json::Value;

/// Replacement text for redacted values.
pub const REDACTED: &str = "[REDACTED]";

/// Scrubs tool parameters before they are written to an audit record.
pub trait ParameterSanitizer: Send + Sync {
    fn sanitize(&self, tool_name: &str, parameters: &Value) -> Value;
}

/// Leaves parameters untouched.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopSanitizer;

impl ParameterSanitizer for NoopSanitizer {
    fn sanitize(&self, _tool_name: &str, parameters: &Value) -> Value {
        parameters.clone()
    }
}

/// Redacts values whose key contains any of the configured fragments
/// (case-insensitive), at any nesting depth.
#[derive(Debug, Clone)]
pub struct RedactingSanitizer {
    fragments: Vec<String>,
}

impl Default for RedactingSanitizer {
    fn default() -> Self {
        Self::new(["password", "passwd", "secret", "token", "api_key", "apikey", "authorization"])
    }
}

impl RedactingSanitizer {
    pub fn new<I, S>(fragments: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self {
            fragments: fragments
                .into_iter()
                .map(|f| f.as_ref().to_ascii_lowercase())
                .filter(|f| !f.is_empty())
                .collect(),
        }
    }

    fn is_sensitive(&self, key: &str) -> bool {
        let key = key.to_ascii_lowercase();
        self.fragments.iter().any(|f| key.contains(f.as_str()))
    }

    fn scrub(&self, value: &Value) -> Value {
        match value {
            Value::Object(map) => Value::Object(
                map.iter()
                    .map(|(k, v)| {
                        let v = if self.is_sensitive(k) {
                            Value::String(REDACTED.into())
                        } else {
                            self.scrub(v)
                        };
                        (k.clone(), v)
                    })
                    .collect(),
            ),
            Value::Array(items) => Value::Array(items.iter().map(|v| self.scrub(v)).collect()),
            other => other.clone(),
        }
    }
}

impl ParameterSanitizer for RedactingSanitizer {
    fn sanitize(&self, _tool_name: &str, parameters: &Value) -> Value {
        self.scrub(parameters)
    }
}
