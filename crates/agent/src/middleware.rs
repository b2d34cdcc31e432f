//! LLM middleware.

use async_trait::async_trait;
use cairn_core::error::HookError;
use cairn_core::extension::LlmMiddleware;
use cairn_core::model::{ModelRequest, ModelResponse};
use tracing::info;

/// Logs the shape of every model request and response.
#[derive(Debug, Default, Clone, Copy)]
pub struct RequestLoggingMiddleware;

#[async_trait]
impl LlmMiddleware for RequestLoggingMiddleware {
    fn name(&self) -> &str {
        "request_logging"
    }

    async fn before_llm_request(&self, request: ModelRequest) -> Result<ModelRequest, HookError> {
        info!(
            request_id = %request.request_id,
            model = %request.model,
            messages = request.messages.len(),
            tools = request.tools.len(),
            stream = request.stream,
            "Model request"
        );
        Ok(request)
    }

    async fn after_llm_response(
        &self,
        request: &ModelRequest,
        response: ModelResponse,
    ) -> Result<ModelResponse, HookError> {
        info!(
            request_id = %request.request_id,
            tool_calls = response.tool_calls.len(),
            content_chars = response.content.len(),
            total_tokens = response.usage.as_ref().map(|u| u.total_tokens),
            "Model response"
        );
        Ok(response)
    }
}

/// Clamps `max_tokens` on outgoing requests to a ceiling.
#[derive(Debug, Clone, Copy)]
pub struct MaxTokensCapMiddleware {
    cap: u32,
}

impl MaxTokensCapMiddleware {
    pub fn new(cap: u32) -> Self {
        Self { cap }
    }
}

#[async_trait]
impl LlmMiddleware for MaxTokensCapMiddleware {
    fn name(&self) -> &str {
        "max_tokens_cap"
    }

    async fn before_llm_request(&self, mut request: ModelRequest) -> Result<ModelRequest, HookError> {
        request.max_tokens = Some(request.max_tokens.map_or(self.cap, |m| m.min(self.cap)));
        Ok(request)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn cap_applies_when_unset_or_higher() {
        let cap = MaxTokensCapMiddleware::new(512);
        let unset = cap.before_llm_request(ModelRequest::default()).await.unwrap();
        assert_eq!(unset.max_tokens, Some(512));

        let higher = ModelRequest {
            max_tokens: Some(4096),
            ..Default::default()
        };
        assert_eq!(cap.before_llm_request(higher).await.unwrap().max_tokens, Some(512));

        let lower = ModelRequest {
            max_tokens: Some(100),
            ..Default::default()
        };
        assert_eq!(cap.before_llm_request(lower).await.unwrap().max_tokens, Some(100));
    }

    #[tokio::test]
    async fn logging_is_identity() {
        let request = ModelRequest {
            model: "m".into(),
            ..Default::default()
        };
        let out = RequestLoggingMiddleware.before_llm_request(request.clone()).await.unwrap();
        assert_eq!(out.model, "m");
        let response = RequestLoggingMiddleware
            .after_llm_response(&request, ModelResponse::text("hi"))
            .await
            .unwrap();
        assert_eq!(response, ModelResponse::text("hi"));
    }
}
