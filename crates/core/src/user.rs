//! Caller identity.
//!
//! A [`UserResolver`] turns the raw transport facts of a request into a
//! [`User`]. The user's groups drive every tool permission decision.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};
use crate::error::Result;

/// An authenticated caller. Immutable for the duration of a turn.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    /// Stable identifier (used as the audit actor and conversation owner)
    pub id: String,

    /// Contact address, when known
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,

    /// Permission groups
    #[serde(default)]
    pub groups: BTreeSet<String>,

    /// Free-form profile data
    #[serde(default, skip_serializing_if = "serde_json::Map::is_empty")]
    pub metadata: serde_json::Map<String, serde_json::Value>,
}

impl User {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            email: None,
            groups: BTreeSet::new(),
            metadata: serde_json::Map::new(),
        }
    }

    pub fn with_email(mut self, email: impl Into<String>) -> Self {
        self.email = Some(email.into());
        self
    }

    pub fn with_group(mut self, group: impl Into<String>) -> Self {
        self.groups.insert(group.into());
        self
    }

    pub fn with_groups<I, S>(mut self, groups: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.groups.extend(groups.into_iter().map(Into::into));
        self
    }

    pub fn in_group(&self, group: &str) -> bool {
        self.groups.contains(group)
    }
}

/// Transport facts about an inbound request.
///
/// Header names are stored lower-cased.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RequestContext {
    #[serde(default)]
    pub headers: HashMap<String, String>,

    #[serde(default)]
    pub cookies: HashMap<String, String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub remote_addr: Option<String>,

    #[serde(default, skip_serializing_if = "serde_json::Map::is_empty")]
    pub metadata: serde_json::Map<String, serde_json::Value>,
}

impl RequestContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_header(mut self, name: &str, value: impl Into<String>) -> Self {
        self.headers.insert(name.to_ascii_lowercase(), value.into());
        self
    }

    pub fn with_cookie(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.cookies.insert(name.into(), value.into());
        self
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(&name.to_ascii_lowercase()).map(String::as_str)
    }

    pub fn cookie(&self, name: &str) -> Option<&str> {
        self.cookies.get(name).map(String::as_str)
    }
}

/// Resolves the caller of a request.
#[async_trait]
pub trait UserResolver: Send + Sync {
    async fn resolve(&self, context: &RequestContext) -> Result<User>;
}

/// Resolves every request to the same user. Used by the CLI and tests.
pub struct StaticUserResolver {
    user: User,
}

impl StaticUserResolver {
    pub fn new(user: User) -> Self {
        Self { user }
    }
}

#[async_trait]
impl UserResolver for StaticUserResolver {
    async fn resolve(&self, _context: &RequestContext) -> Result<User> {
        Ok(self.user.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn user_builder_collects_groups() {
        let user = User::new("u1").with_group("analyst").with_groups(["admin", "analyst"]);
        assert_eq!(user.groups.len(), 2);
        assert!(user.in_group("admin"));
        assert!(!user.in_group("user"));
    }

    #[test]
    fn header_lookup_is_case_insensitive() {
        let ctx = RequestContext::new().with_header("X-User-Id", "abc");
        assert_eq!(ctx.header("x-user-id"), Some("abc"));
        assert_eq!(ctx.header("X-USER-ID"), Some("abc"));
    }

    #[tokio::test]
    async fn static_resolver_ignores_context() {
        let resolver = StaticUserResolver::new(User::new("cli"));
        let user = resolver
            .resolve(&RequestContext::new().with_cookie("session", "x"))
            .await
            .unwrap();
        assert_eq!(user.id, "cli");
    }
}
