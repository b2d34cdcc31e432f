//! Error recovery strategies.

use async_trait::async_trait;
use cairn_core::context::RequestEnvelope;
use cairn_core::error::ProviderError;
use cairn_core::extension::{ErrorRecoveryStrategy, RecoveryAction};
use cairn_core::model::{ModelRequest, ModelResponse};
use cairn_core::tool::{ToolCall, ToolFailure, ToolResult};
use std::time::Duration;

/// Never retries: every failure is final. The agent's default.
#[derive(Debug, Default, Clone, Copy)]
pub struct FailFast;

impl ErrorRecoveryStrategy for FailFast {
    fn name(&self) -> &str {
        "fail_fast"
    }
}

/// What [`RetryStrategy`] does once its retries are used up.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OnExhausted {
    #[default]
    Fail,
    Skip,
}

/// Retries with exponential backoff, then fails or skips.
#[derive(Debug, Clone)]
pub struct RetryStrategy {
    max_retries: u32,
    base_delay: Duration,
    backoff: f64,
    max_delay: Duration,
    on_exhausted: OnExhausted,
}

impl RetryStrategy {
    pub fn new(max_retries: u32) -> Self {
        Self {
            max_retries,
            base_delay: Duration::from_millis(500),
            backoff: 2.0,
            max_delay: Duration::from_secs(30),
            on_exhausted: OnExhausted::Fail,
        }
    }

    pub fn with_base_delay(mut self, delay: Duration) -> Self {
        self.base_delay = delay;
        self
    }

    /// Multiplier applied to the delay after each attempt (1.0 = constant).
    pub fn with_backoff(mut self, factor: f64) -> Self {
        self.backoff = factor.max(1.0);
        self
    }

    pub fn with_max_delay(mut self, delay: Duration) -> Self {
        self.max_delay = delay;
        self
    }

    pub fn on_exhausted(mut self, action: OnExhausted) -> Self {
        self.on_exhausted = action;
        self
    }

    /// Delay before retry number `attempt` (1-indexed).
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(32) as i32;
        let secs = self.base_delay.as_secs_f64() * self.backoff.powi(exponent);
        Duration::from_secs_f64(secs.min(self.max_delay.as_secs_f64()))
    }

    fn decide<T>(&self, attempt: u32, message: String) -> RecoveryAction<T> {
        if attempt <= self.max_retries {
            return RecoveryAction::Retry {
                delay: self.delay_for(attempt),
            };
        }
        match self.on_exhausted {
            OnExhausted::Fail => RecoveryAction::Fail { message },
            OnExhausted::Skip => RecoveryAction::Skip,
        }
    }
}

impl Default for RetryStrategy {
    fn default() -> Self {
        Self::new(2)
    }
}

#[async_trait]
impl ErrorRecoveryStrategy for RetryStrategy {
    fn name(&self) -> &str {
        "retry"
    }

    async fn handle_tool_error(
        &self,
        failure: &ToolFailure,
        _call: &ToolCall,
        _envelope: &RequestEnvelope,
        attempt: u32,
    ) -> RecoveryAction<ToolResult> {
        self.decide(attempt, failure.message.clone())
    }

    async fn handle_llm_error(
        &self,
        error: &ProviderError,
        _request: &ModelRequest,
        attempt: u32,
    ) -> RecoveryAction<ModelResponse> {
        // Honour the provider's own back-off hint.
        if let ProviderError::RateLimited { retry_after_secs } = error {
            if attempt <= self.max_retries {
                return RecoveryAction::Retry {
                    delay: Duration::from_secs(*retry_after_secs).min(self.max_delay),
                };
            }
        }
        if matches!(error, ProviderError::AuthenticationFailed(_) | ProviderError::ModelNotFound(_)) {
            return RecoveryAction::Fail {
                message: error.to_string(),
            };
        }
        self.decide(attempt, error.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cairn_core::message::ConversationId;
    use cairn_core::tool::ToolErrorKind;
    use cairn_core::user::User;
    use cairn_memory::NoopAgentMemory;
    use std::sync::Arc;

    fn failure() -> ToolFailure {
        ToolFailure {
            kind: ToolErrorKind::ExecutionFailed,
            message: "connection reset".into(),
        }
    }

    fn envelope() -> RequestEnvelope {
        RequestEnvelope::new(User::new("u"), ConversationId::from("c"), Arc::new(NoopAgentMemory))
    }

    #[test]
    fn delays_grow_and_cap() {
        let strategy = RetryStrategy::new(5)
            .with_base_delay(Duration::from_millis(100))
            .with_max_delay(Duration::from_millis(350));
        assert_eq!(strategy.delay_for(1), Duration::from_millis(100));
        assert_eq!(strategy.delay_for(2), Duration::from_millis(200));
        assert_eq!(strategy.delay_for(3), Duration::from_millis(350));
    }

    #[tokio::test]
    async fn retries_then_fails() {
        let strategy = RetryStrategy::new(2).with_base_delay(Duration::ZERO);
        let call = ToolCall::new("c1", "run_sql", serde_json::json!({}));
        let env = envelope();
        for attempt in 1..=2 {
            assert!(matches!(
                strategy.handle_tool_error(&failure(), &call, &env, attempt).await,
                RecoveryAction::Retry { .. }
            ));
        }
        assert_eq!(
            strategy.handle_tool_error(&failure(), &call, &env, 3).await,
            RecoveryAction::Fail {
                message: "connection reset".into()
            }
        );
    }

    #[tokio::test]
    async fn exhausted_skip() {
        let strategy = RetryStrategy::new(0).on_exhausted(OnExhausted::Skip);
        let call = ToolCall::new("c1", "run_sql", serde_json::json!({}));
        assert_eq!(
            strategy.handle_tool_error(&failure(), &call, &envelope(), 1).await,
            RecoveryAction::Skip
        );
    }

    #[tokio::test]
    async fn auth_failures_are_not_retried() {
        let strategy = RetryStrategy::new(3);
        let action = strategy
            .handle_llm_error(
                &ProviderError::AuthenticationFailed("bad key".into()),
                &ModelRequest::default(),
                1,
            )
            .await;
        assert!(matches!(action, RecoveryAction::Fail { .. }));
    }

    #[tokio::test]
    async fn rate_limit_uses_retry_after() {
        let strategy = RetryStrategy::new(1);
        let action = strategy
            .handle_llm_error(&ProviderError::RateLimited { retry_after_secs: 3 }, &ModelRequest::default(), 1)
            .await;
        assert_eq!(
            action,
            RecoveryAction::Retry {
                delay: Duration::from_secs(3)
            }
        );
    }

    #[tokio::test]
    async fn fail_fast_never_retries() {
        let action = FailFast
            .handle_llm_error(&ProviderError::Timeout("slow".into()), &ModelRequest::default(), 1)
            .await;
        assert!(matches!(action, RecoveryAction::Fail { .. }));
    }
}
