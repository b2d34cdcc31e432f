//! OpenAI-compatible model gateway.
//!
//! Works with: OpenAI, OpenRouter, Ollama, vLLM, Together AI, and any
//! endpoint that speaks `/v1/chat/completions`.
//!
//! Supports:
//! - Chat completions (non-streaming and streaming SSE)
//! - Tool use / function calling, with streamed argument deltas
//!   accumulated into complete calls
//! - Health checks

use async_trait::async_trait;
use cairn_core::error::ProviderError;
use cairn_core::message::{Message, MessageToolCall, Role};
use cairn_core::model::{ModelGateway, ModelRequest, ModelResponse, StreamChunk, Usage};
use cairn_core::tool::{ToolCall, ToolSchema};
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, trace, warn};

/// A gateway to any OpenAI-compatible chat completions endpoint.
pub struct OpenAiCompatGateway {
    name: String,
    base_url: String,
    api_key: String,
    client: reqwest::Client,
}

impl OpenAiCompatGateway {
    /// Create a gateway with a 120 s request timeout.
    pub fn new(
        name: impl Into<String>,
        base_url: impl Into<String>,
        api_key: impl Into<String>,
    ) -> Result<Self, ProviderError> {
        Self::with_timeout(name, base_url, api_key, Duration::from_secs(120))
    }

    pub fn with_timeout(
        name: impl Into<String>,
        base_url: impl Into<String>,
        api_key: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, ProviderError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ProviderError::NotConfigured(format!("Failed to create HTTP client: {e}")))?;

        Ok(Self {
            name: name.into(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key: api_key.into(),
            client,
        })
    }

    /// OpenAI (convenience constructor).
    pub fn openai(api_key: impl Into<String>) -> Result<Self, ProviderError> {
        Self::new("openai", "https://api.openai.com/v1", api_key)
    }

    /// OpenRouter (convenience constructor).
    pub fn openrouter(api_key: impl Into<String>) -> Result<Self, ProviderError> {
        Self::new("openrouter", "https://openrouter.ai/api/v1", api_key)
    }

    /// Ollama (convenience constructor). No key needed.
    pub fn ollama(base_url: Option<&str>) -> Result<Self, ProviderError> {
        Self::new("ollama", base_url.unwrap_or("http://localhost:11434/v1"), "ollama")
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Convert the system prompt and the message view to OpenAI format.
    fn to_api_messages(system_prompt: Option<&str>, messages: &[Message]) -> Vec<ApiMessage> {
        let system = system_prompt.map(|prompt| ApiMessage {
            role: "system".into(),
            content: Some(prompt.to_string()),
            tool_calls: None,
            tool_call_id: None,
        });

        system
            .into_iter()
            .chain(messages.iter().map(|m| ApiMessage {
                role: match m.role {
                    Role::User => "user".into(),
                    Role::Assistant => "assistant".into(),
                    Role::System => "system".into(),
                    Role::Tool => "tool".into(),
                },
                content: Some(m.content.clone()),
                tool_calls: (!m.tool_calls.is_empty()).then(|| {
                    m.tool_calls
                        .iter()
                        .map(|tc| ApiToolCall {
                            id: tc.id.clone(),
                            r#type: "function".into(),
                            function: ApiFunction {
                                name: tc.name.clone(),
                                arguments: tc.arguments.clone(),
                            },
                        })
                        .collect()
                }),
                tool_call_id: m.tool_call_id.clone(),
            }))
            .collect()
    }

    /// Convert tool schemas to OpenAI format. Access groups stay behind.
    fn to_api_tools(tools: &[ToolSchema]) -> Vec<ApiToolDefinition> {
        tools
            .iter()
            .map(|t| ApiToolDefinition {
                r#type: "function".into(),
                function: ApiToolFunction {
                    name: t.name.clone(),
                    description: t.description.clone(),
                    parameters: t.parameters.clone(),
                },
            })
            .collect()
    }

    fn request_body(request: &ModelRequest, stream: bool) -> serde_json::Value {
        let mut body = serde_json::json!({
            "model": request.model,
            "messages": Self::to_api_messages(request.system_prompt.as_deref(), &request.messages),
            "temperature": request.temperature,
            "stream": stream,
            "user": request.user_id,
        });
        if stream {
            body["stream_options"] = serde_json::json!({ "include_usage": true });
        }
        if let Some(max_tokens) = request.max_tokens {
            body["max_tokens"] = serde_json::json!(max_tokens);
        }
        if !request.tools.is_empty() {
            body["tools"] = serde_json::json!(Self::to_api_tools(&request.tools));
        }
        body
    }

    async fn post(&self, body: &serde_json::Value, sse: bool) -> Result<reqwest::Response, ProviderError> {
        let url = format!("{}/chat/completions", self.base_url);
        let mut builder = self
            .client
            .post(&url)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Content-Type", "application/json");
        if sse {
            builder = builder.header("Accept", "text/event-stream");
        }

        let response = builder.json(body).send().await.map_err(|e| {
            if e.is_timeout() {
                ProviderError::Timeout(e.to_string())
            } else {
                ProviderError::Network(e.to_string())
            }
        })?;
        check_status(response).await
    }
}

/// Map non-success HTTP statuses onto provider errors.
async fn check_status(response: reqwest::Response) -> Result<reqwest::Response, ProviderError> {
    let status = response.status().as_u16();
    match status {
        200..=299 => Ok(response),
        429 => {
            let retry_after_secs = response
                .headers()
                .get("retry-after")
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.parse().ok())
                .unwrap_or(5);
            Err(ProviderError::RateLimited { retry_after_secs })
        }
        401 | 403 => Err(ProviderError::AuthenticationFailed(
            "Invalid API key or insufficient permissions".into(),
        )),
        404 => Err(ProviderError::ModelNotFound(response.text().await.unwrap_or_default())),
        _ => {
            let error_body = response.text().await.unwrap_or_default();
            warn!(status, body = %error_body, "Model backend returned error");
            Err(ProviderError::ApiError {
                status_code: status,
                message: error_body,
            })
        }
    }
}

fn to_usage(usage: ApiUsage) -> Usage {
    Usage {
        prompt_tokens: usage.prompt_tokens,
        completion_tokens: usage.completion_tokens,
        total_tokens: usage.total_tokens,
    }
}

#[async_trait]
impl ModelGateway for OpenAiCompatGateway {
    fn name(&self) -> &str {
        &self.name
    }

    async fn complete(&self, request: ModelRequest) -> Result<ModelResponse, ProviderError> {
        debug!(gateway = %self.name, model = %request.model, tools = request.tools.len(), "Sending completion request");
        let response = self.post(&Self::request_body(&request, false), false).await?;

        let api_response: ApiResponse = response.json().await.map_err(|e| ProviderError::ApiError {
            status_code: 200,
            message: format!("Failed to parse response: {e}"),
        })?;

        let choice = api_response
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| ProviderError::ApiError {
                status_code: 200,
                message: "No choices in response".into(),
            })?;

        let tool_calls = choice
            .message
            .tool_calls
            .unwrap_or_default()
            .into_iter()
            .map(|tc| {
                ToolCall::from_message_call(&MessageToolCall {
                    id: tc.id,
                    name: tc.function.name,
                    arguments: tc.function.arguments,
                })
            })
            .collect();

        Ok(ModelResponse {
            content: choice.message.content.unwrap_or_default(),
            tool_calls,
            usage: api_response.usage.map(to_usage),
            model: api_response.model,
            metadata: serde_json::Map::new(),
        })
    }

    async fn stream(
        &self,
        request: ModelRequest,
    ) -> Result<mpsc::Receiver<Result<StreamChunk, ProviderError>>, ProviderError> {
        debug!(gateway = %self.name, model = %request.model, "Sending streaming request");
        let response = self.post(&Self::request_body(&request, true), true).await?;

        let (tx, rx) = mpsc::channel(64);
        let gateway = self.name.clone();

        tokio::spawn(async move {
            let mut bytes = response.bytes_stream();
            let mut parser = SseParser::default();

            while let Some(next) = bytes.next().await {
                let chunk = match next {
                    Ok(chunk) => chunk,
                    Err(e) => {
                        let _ = tx.send(Err(ProviderError::StreamInterrupted(e.to_string()))).await;
                        return;
                    }
                };
                for out in parser.feed(&String::from_utf8_lossy(&chunk)) {
                    let done = out.done;
                    if tx.send(Ok(out)).await.is_err() {
                        trace!(gateway = %gateway, "Stream receiver dropped");
                        return;
                    }
                    if done {
                        return;
                    }
                }
            }

            // Stream ended without [DONE]
            let _ = tx.send(Ok(parser.finish(None))).await;
        });

        Ok(rx)
    }

    async fn health_check(&self) -> Result<bool, ProviderError> {
        let url = format!("{}/models", self.base_url);
        let response = self
            .client
            .get(&url)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .send()
            .await
            .map_err(|e| ProviderError::Network(e.to_string()))?;
        Ok(response.status().is_success())
    }
}

// --- SSE parsing ---

/// Turns raw SSE text into stream chunks.
///
/// Content deltas are forwarded as they arrive. Tool-call deltas are
/// accumulated by index and released, in index order, with the final chunk.
#[derive(Default)]
struct SseParser {
    buffer: String,
    tool_calls: BTreeMap<u32, ToolCallAccumulator>,
    finished: bool,
}

impl SseParser {
    fn feed(&mut self, text: &str) -> Vec<StreamChunk> {
        let mut out = Vec::new();
        if self.finished {
            return out;
        }
        self.buffer.push_str(text);

        while let Some(line_end) = self.buffer.find('\n') {
            let line: String = self.buffer.drain(..=line_end).collect();
            let line = line.trim_end_matches(['\r', '\n']);

            let Some(data) = line.strip_prefix("data:") else { continue };
            let data = data.trim();

            if data == "[DONE]" {
                out.push(self.finish(None));
                return out;
            }

            match serde_json::from_str::<StreamResponse>(data) {
                Ok(resp) => {
                    if let Some(choice) = resp.choices.first() {
                        for delta in choice.delta.tool_calls.iter().flatten() {
                            let acc = self.tool_calls.entry(delta.index).or_default();
                            if let Some(id) = &delta.id {
                                acc.id = id.clone();
                            }
                            if let Some(function) = &delta.function {
                                if let Some(name) = &function.name {
                                    acc.name = name.clone();
                                }
                                if let Some(arguments) = &function.arguments {
                                    acc.arguments.push_str(arguments);
                                }
                            }
                        }
                        if let Some(content) = choice.delta.content.as_ref().filter(|c| !c.is_empty()) {
                            out.push(StreamChunk {
                                content: Some(content.clone()),
                                ..Default::default()
                            });
                        }
                    }
                    // With include_usage the usage chunk is the last one before [DONE].
                    if let Some(usage) = resp.usage {
                        out.push(self.finish(Some(to_usage(usage))));
                        return out;
                    }
                }
                Err(e) => trace!(data = %data, error = %e, "Ignoring unparseable SSE chunk"),
            }
        }
        out
    }

    fn finish(&mut self, usage: Option<Usage>) -> StreamChunk {
        self.finished = true;
        StreamChunk {
            content: None,
            tool_calls: std::mem::take(&mut self.tool_calls)
                .into_values()
                .map(ToolCallAccumulator::into_tool_call)
                .collect(),
            done: true,
            usage,
        }
    }
}

/// Accumulates incremental tool call deltas into a complete tool call.
#[derive(Default)]
struct ToolCallAccumulator {
    id: String,
    name: String,
    arguments: String,
}

impl ToolCallAccumulator {
    fn into_tool_call(self) -> MessageToolCall {
        MessageToolCall {
            id: self.id,
            name: self.name,
            arguments: self.arguments,
        }
    }
}

// --- OpenAI API types (internal) ---

#[derive(Debug, Serialize, Deserialize)]
struct ApiMessage {
    role: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    content: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_calls: Option<Vec<ApiToolCall>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_call_id: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
struct ApiToolCall {
    id: String,
    r#type: String,
    function: ApiFunction,
}

#[derive(Debug, Serialize, Deserialize)]
struct ApiFunction {
    name: String,
    arguments: String,
}

#[derive(Debug, Serialize)]
struct ApiToolDefinition {
    r#type: String,
    function: ApiToolFunction,
}

#[derive(Debug, Serialize)]
struct ApiToolFunction {
    name: String,
    description: String,
    parameters: serde_json::Value,
}

#[derive(Debug, Deserialize)]
struct ApiResponse {
    #[serde(default)]
    model: String,
    choices: Vec<ApiChoice>,
    usage: Option<ApiUsage>,
}

#[derive(Debug, Deserialize)]
struct ApiChoice {
    message: ApiMessage,
}

#[derive(Debug, Deserialize)]
struct ApiUsage {
    prompt_tokens: u32,
    completion_tokens: u32,
    total_tokens: u32,
}

/// A single SSE `data: {...}` chunk from a streaming response.
#[derive(Debug, Deserialize)]
struct StreamResponse {
    #[serde(default)]
    choices: Vec<StreamChoice>,
    #[serde(default)]
    usage: Option<ApiUsage>,
}

#[derive(Debug, Deserialize)]
struct StreamChoice {
    delta: StreamDelta,
}

#[derive(Debug, Deserialize)]
struct StreamDelta {
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    tool_calls: Option<Vec<StreamToolCallDelta>>,
}

/// A tool call delta — arrives incrementally across chunks.
#[derive(Debug, Deserialize)]
struct StreamToolCallDelta {
    index: u32,
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    function: Option<StreamFunctionDelta>,
}

#[derive(Debug, Deserialize)]
struct StreamFunctionDelta {
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    arguments: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::routing::post;
    use axum::Router;

    fn request() -> ModelRequest {
        ModelRequest {
            model: "gpt-4o-mini".into(),
            messages: vec![Message::user("top 5 customers by revenue")],
            system_prompt: Some("You are a data analyst.".into()),
            tools: vec![ToolSchema {
                name: "run_sql".into(),
                description: "Run SQL".into(),
                parameters: serde_json::json!({"type": "object"}),
                access_groups: vec!["analyst".into()],
            }],
            temperature: 0.2,
            max_tokens: Some(256),
            stream: false,
            user_id: "ana".into(),
            conversation_id: "c1".into(),
            request_id: "r1".into(),
            metadata: Default::default(),
        }
    }

    #[test]
    fn constructors_set_base_urls() {
        assert!(OpenAiCompatGateway::openrouter("k").unwrap().base_url().contains("openrouter.ai"));
        let ollama = OpenAiCompatGateway::ollama(None).unwrap();
        assert_eq!(ollama.name(), "ollama");
        assert!(ollama.base_url().contains("localhost:11434"));
        let trimmed = OpenAiCompatGateway::new("x", "http://h/v1/", "k").unwrap();
        assert_eq!(trimmed.base_url(), "http://h/v1");
    }

    #[test]
    fn system_prompt_leads_the_message_list() {
        let mut assistant = Message::assistant("");
        assistant.tool_calls = vec![MessageToolCall {
            id: "call_1".into(),
            name: "run_sql".into(),
            arguments: r#"{"sql":"SELECT 1"}"#.into(),
        }];
        let msgs = OpenAiCompatGateway::to_api_messages(
            Some("be brief"),
            &[Message::user("hi"), assistant, Message::tool_result("call_1", "1")],
        );
        let roles: Vec<&str> = msgs.iter().map(|m| m.role.as_str()).collect();
        assert_eq!(roles, vec!["system", "user", "assistant", "tool"]);
        assert_eq!(msgs[2].tool_calls.as_ref().unwrap()[0].function.name, "run_sql");
        assert_eq!(msgs[3].tool_call_id.as_deref(), Some("call_1"));
    }

    #[test]
    fn request_body_hides_access_groups() {
        let body = OpenAiCompatGateway::request_body(&request(), true);
        assert_eq!(body["stream"], true);
        assert_eq!(body["max_tokens"], 256);
        assert_eq!(body["user"], "ana");
        assert_eq!(body["tools"][0]["function"]["name"], "run_sql");
        assert!(body["tools"][0].get("access_groups").is_none());
        assert!(!body.to_string().contains("analyst"));
    }

    #[test]
    fn parser_accumulates_split_lines_and_tool_deltas() {
        let mut parser = SseParser::default();
        let mut chunks = parser.feed("data: {\"choices\":[{\"delta\":{\"content\":\"Hel\"}}]}\n\ndata: {\"choi");
        chunks.extend(parser.feed("ces\":[{\"delta\":{\"content\":\"lo\"}}]}\n\n"));
        chunks.extend(parser.feed(
            "data: {\"choices\":[{\"delta\":{\"tool_calls\":[{\"index\":1,\"id\":\"b\",\"function\":{\"name\":\"search\",\"arguments\":\"{}\"}}]}}]}\n",
        ));
        chunks.extend(parser.feed(
            "data: {\"choices\":[{\"delta\":{\"tool_calls\":[{\"index\":0,\"id\":\"a\",\"function\":{\"name\":\"run_sql\",\"arguments\":\"{\\\"sql\\\"\"}}]}}]}\n",
        ));
        chunks.extend(parser.feed(
            "data: {\"choices\":[{\"delta\":{\"tool_calls\":[{\"index\":0,\"function\":{\"arguments\":\":\\\"SELECT 1\\\"}\"}}]}}]}\n",
        ));
        chunks.extend(parser.feed(": keep-alive\ndata: [DONE]\n"));

        let text: String = chunks.iter().filter_map(|c| c.content.clone()).collect();
        assert_eq!(text, "Hello");
        let last = chunks.last().unwrap();
        assert!(last.done);
        assert_eq!(last.tool_calls.len(), 2);
        assert_eq!(last.tool_calls[0].id, "a");
        assert_eq!(last.tool_calls[0].arguments, "{\"sql\":\"SELECT 1\"}");
        assert_eq!(last.tool_calls[1].name, "search");
        assert!(parser.feed("data: {\"choices\":[{\"delta\":{\"content\":\"late\"}}]}\n").is_empty());
    }

    #[test]
    fn parser_finishes_on_usage_chunk() {
        let mut parser = SseParser::default();
        let chunks = parser.feed(
            "data: {\"choices\":[],\"usage\":{\"prompt_tokens\":10,\"completion_tokens\":5,\"total_tokens\":15}}\n",
        );
        assert_eq!(chunks.len(), 1);
        assert!(chunks[0].done);
        assert_eq!(chunks[0].usage.as_ref().unwrap().total_tokens, 15);
    }

    async fn fake_backend(router: Router) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let _ = axum::serve(listener, router).await;
        });
        format!("http://{addr}/v1")
    }

    #[tokio::test]
    async fn complete_parses_tool_calls() {
        let router = Router::new().route(
            "/v1/chat/completions",
            post(|axum::Json(body): axum::Json<serde_json::Value>| async move {
                assert_eq!(body["messages"][0]["role"], "system");
                axum::Json(serde_json::json!({
                    "model": "gpt-4o-mini-2024",
                    "choices": [{ "message": {
                        "role": "assistant",
                        "content": null,
                        "tool_calls": [{ "id": "call_1", "type": "function",
                            "function": { "name": "run_sql", "arguments": "{\"sql\":\"SELECT 1\"}" } }]
                    }}],
                    "usage": { "prompt_tokens": 12, "completion_tokens": 3, "total_tokens": 15 }
                }))
            }),
        );
        let gateway = OpenAiCompatGateway::new("test", fake_backend(router).await, "k").unwrap();
        let response = gateway.complete(request()).await.unwrap();
        assert_eq!(response.content, "");
        assert_eq!(response.tool_calls[0].arguments["sql"], "SELECT 1");
        assert_eq!(response.model, "gpt-4o-mini-2024");
        assert_eq!(response.usage.unwrap().total_tokens, 15);
    }

    #[tokio::test]
    async fn stream_assembles_to_the_same_response() {
        let sse = concat!(
            "data: {\"choices\":[{\"delta\":{\"content\":\"42 \"}}]}\n\n",
            "data: {\"choices\":[{\"delta\":{\"content\":\"orders\"}}]}\n\n",
            "data: [DONE]\n\n",
        );
        let router = Router::new().route(
            "/v1/chat/completions",
            post(move || async move { ([("content-type", "text/event-stream")], sse) }),
        );
        let gateway = OpenAiCompatGateway::new("test", fake_backend(router).await, "k").unwrap();
        let rx = gateway.stream(request()).await.unwrap();
        let response = ModelResponse::assemble(rx, "gpt-4o-mini").await.unwrap();
        assert_eq!(response.content, "42 orders");
        assert!(response.tool_calls.is_empty());
    }

    #[tokio::test]
    async fn status_codes_map_to_errors() {
        let router = Router::new()
            .route(
                "/v1/chat/completions",
                post(|| async { (axum::http::StatusCode::TOO_MANY_REQUESTS, [("retry-after", "7")], "slow down") }),
            );
        let gateway = OpenAiCompatGateway::new("test", fake_backend(router).await, "k").unwrap();
        let err = gateway.complete(request()).await.unwrap_err();
        assert!(matches!(err, ProviderError::RateLimited { retry_after_secs: 7 }));

        let router = Router::new().route(
            "/v1/chat/completions",
            post(|| async { (axum::http::StatusCode::UNAUTHORIZED, "nope") }),
        );
        let gateway = OpenAiCompatGateway::new("test", fake_backend(router).await, "k").unwrap();
        assert!(matches!(
            gateway.complete(request()).await.unwrap_err(),
            ProviderError::AuthenticationFailed(_)
        ));
    }
}
