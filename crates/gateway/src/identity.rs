//! Resolving the caller of an HTTP request.

use async_trait::async_trait;
use axum::http::HeaderMap;
use cairn_config::GatewayConfig;
use cairn_core::error::Result;
use cairn_core::user::{RequestContext, User, UserResolver};
use std::collections::HashSet;

pub const ADMIN_GROUP: &str = "admin";
pub const USER_GROUP: &str = "user";

/// Reads the caller's e-mail from a cookie.
///
/// Listed admin e-mails get the `admin` group, everyone else `user`. Without
/// the cookie the configured fallback identity is used.
#[derive(Debug, Clone)]
pub struct CookieUserResolver {
    cookie_name: String,
    admin_emails: HashSet<String>,
    fallback_email: String,
}

impl CookieUserResolver {
    pub fn new(cookie_name: impl Into<String>, fallback_email: impl Into<String>) -> Self {
        Self {
            cookie_name: cookie_name.into(),
            admin_emails: HashSet::new(),
            fallback_email: fallback_email.into(),
        }
    }

    pub fn from_config(config: &GatewayConfig) -> Self {
        Self::new(config.identity_cookie.clone(), config.fallback_email.clone())
            .with_admins(config.admin_emails.iter().cloned())
    }

    pub fn with_admins<I, S>(mut self, emails: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.admin_emails
            .extend(emails.into_iter().map(|e| e.into().to_ascii_lowercase()));
        self
    }
}

#[async_trait]
impl UserResolver for CookieUserResolver {
    async fn resolve(&self, context: &RequestContext) -> Result<User> {
        let email = context
            .cookie(&self.cookie_name)
            .map(str::trim)
            .filter(|e| !e.is_empty())
            .unwrap_or(&self.fallback_email)
            .to_string();
        let group = if self.admin_emails.contains(&email.to_ascii_lowercase()) {
            ADMIN_GROUP
        } else {
            USER_GROUP
        };
        Ok(User::new(email.clone()).with_email(email).with_group(group))
    }
}

/// Build the transport-neutral request context from HTTP headers.
///
/// Header names are lowercased; the `Cookie` header is split into pairs.
pub fn request_context(headers: &HeaderMap) -> RequestContext {
    let mut context = RequestContext::new();
    for (name, value) in headers {
        let Ok(value) = value.to_str() else {
            continue;
        };
        if name == axum::http::header::COOKIE {
            for pair in value.split(';') {
                if let Some((key, val)) = pair.trim().split_once('=') {
                    context = context.with_cookie(key.trim(), val.trim());
                }
            }
        } else {
            context = context.with_header(name.as_str(), value);
        }
    }
    context
}
