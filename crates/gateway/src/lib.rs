//! HTTP API gateway for Cairn.
//!
//! Turns HTTP requests into agent turns. Each request's headers and cookies
//! become the transport-neutral `RequestContext` the user resolver sees;
//! output units go back either collected as JSON or as Server-Sent Events.
//!
//! Built on Axum for high performance async HTTP.

pub mod api_v1;
pub mod identity;

use axum::extract::DefaultBodyLimit;
use axum::{Router, response::Json, routing::get};
use serde::Serialize;
use tower_http::cors::CorsLayer;
use tracing::info;

pub use api_v1::{ApiV1State, SharedApiState};
pub use identity::{request_context, CookieUserResolver};

/// Build the full router: `/health` plus the v1 API under `/v1`.
///
/// Layers applied:
/// - Request body size limit (1 MB)
/// - Permissive CORS for local front-ends
/// - HTTP trace logging
pub fn build_router(state: SharedApiState) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .nest("/v1", api_v1::v1_router(state))
        .layer(DefaultBodyLimit::max(1024 * 1024))
        .layer(CorsLayer::permissive())
        .layer(tower_http::trace::TraceLayer::new_for_http())
}

/// Serve the gateway until the process is stopped.
pub async fn start(state: SharedApiState, host: &str, port: u16) -> Result<(), Box<dyn std::error::Error>> {
    let addr = format!("{host}:{port}");
    let app = build_router(state);

    info!(addr = %addr, "Gateway starting");
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

// --- Handlers ---

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
}

async fn health_handler() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use api_v1::ChatResponse;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use cairn_agent::testing::{make_tool_call, RecordingTool, SequentialMockModel};
    use cairn_agent::{AgentBuilder, UnitBody};
    use cairn_core::message::ConversationId;
    use cairn_memory::{InMemoryConversationStore, NoopAgentMemory};
    use cairn_telemetry::TelemetryEngine;
    use cairn_tools::ToolRegistry;
    use http_body_util::BodyExt;
    use serde_json::{json, Value};
    use std::sync::Arc;
    use tower::ServiceExt;

    fn test_state(model: SequentialMockModel) -> SharedApiState {
        let mut registry = ToolRegistry::new();
        registry.register_local_tool(Arc::new(RecordingTool::new("search")), vec![]);
        registry.register_local_tool(Arc::new(RecordingTool::new("save")), vec!["admin".into()]);
        let resolver = CookieUserResolver::new("cairn_email", "dev@local").with_admins(["admin@example.com"]);
        let telemetry = Arc::new(TelemetryEngine::new());
        let agent = AgentBuilder::new(
            Arc::new(model),
            Arc::new(registry),
            Arc::new(resolver),
            Arc::new(InMemoryConversationStore::new()),
            Arc::new(NoopAgentMemory),
        )
        .observability(telemetry.clone())
        .build();
        Arc::new(ApiV1State {
            agent: Arc::new(agent),
            telemetry: Some(telemetry),
        })
    }

    fn chat_request(uri: &str, body: Value, email: Option<&str>) -> Request<Body> {
        let mut builder = Request::builder()
            .method("POST")
            .uri(uri)
            .header("content-type", "application/json");
        if let Some(email) = email {
            builder = builder.header("cookie", format!("cairn_email={email}"));
        }
        builder.body(Body::from(body.to_string())).unwrap()
    }

    async fn body_json(response: axum::response::Response) -> Value {
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn health_endpoint() {
        let app = build_router(test_state(SequentialMockModel::single_text("unused")));
        let req = Request::builder().uri("/health").body(Body::empty()).unwrap();
        let response = app.oneshot(req).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_json(response).await["status"], "ok");
    }

    #[tokio::test]
    async fn chat_collects_units() {
        let app = build_router(test_state(SequentialMockModel::tool_then_answer(
            vec![make_tool_call("c1", "search", json!({"query": "q"}))],
            "Here you go",
        )));
        let req = chat_request(
            "/v1/chat",
            json!({"message": "find it", "conversation_id": "conv-1"}),
            Some("ann@example.com"),
        );
        let response = app.oneshot(req).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let chat: ChatResponse = serde_json::from_value(body_json(response).await).unwrap();
        assert_eq!(chat.conversation_id, "conv-1");
        assert_eq!(chat.response, "Here you go");
        assert_eq!(chat.units.first().map(|u| &u.body), Some(&UnitBody::InputControl { enabled: false }));
        assert!(chat.units.iter().any(|u| u.event_type() == "tool_result"));
    }

    #[tokio::test]
    async fn chat_rejects_empty_message() {
        let app = build_router(test_state(SequentialMockModel::single_text("unused")));
        let response = app
            .oneshot(chat_request("/v1/chat", json!({"message": "   "}), None))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn stream_emits_one_event_per_unit() {
        let app = build_router(test_state(SequentialMockModel::single_text("streamed")));
        let response = app
            .oneshot(chat_request(
                "/v1/chat/stream",
                json!({"message": "hi", "conversation_id": "conv-7"}),
                None,
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response.headers().get(api_v1::CONVERSATION_ID_HEADER).unwrap(),
            "conv-7"
        );
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        let body = String::from_utf8(bytes.to_vec()).unwrap();
        let events: Vec<&str> = body
            .lines()
            .filter_map(|l| l.strip_prefix("event: "))
            .collect();
        assert_eq!(events, vec!["input_control", "text", "input_control"]);
        assert!(body.contains("\"content\":\"streamed\""));
    }

    #[tokio::test]
    async fn tools_are_filtered_by_caller() {
        let state = test_state(SequentialMockModel::single_text("unused"));

        let req = Request::builder()
            .uri("/v1/tools")
            .header("cookie", "cairn_email=ann@example.com")
            .body(Body::empty())
            .unwrap();
        let user_tools = body_json(build_router(state.clone()).oneshot(req).await.unwrap()).await;
        let names: Vec<&str> = user_tools
            .as_array()
            .unwrap()
            .iter()
            .map(|t| t["name"].as_str().unwrap())
            .collect();
        assert_eq!(names, vec!["search"]);

        let req = Request::builder()
            .uri("/v1/tools")
            .header("cookie", "cairn_email=admin@example.com")
            .body(Body::empty())
            .unwrap();
        let admin_tools = body_json(build_router(state).oneshot(req).await.unwrap()).await;
        assert_eq!(admin_tools.as_array().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn conversations_are_private() {
        let state = test_state(SequentialMockModel::single_text("hello"));
        let req = chat_request(
            "/v1/chat",
            json!({"message": "hi", "conversation_id": "conv-9"}),
            Some("ann@example.com"),
        );
        build_router(state.clone()).oneshot(req).await.unwrap();

        let get = |email: &str| {
            Request::builder()
                .uri("/v1/conversations/conv-9")
                .header("cookie", format!("cairn_email={email}"))
                .body(Body::empty())
                .unwrap()
        };
        let own = build_router(state.clone()).oneshot(get("ann@example.com")).await.unwrap();
        assert_eq!(own.status(), StatusCode::OK);
        assert_eq!(body_json(own).await["messages"].as_array().unwrap().len(), 2);

        let other = build_router(state.clone()).oneshot(get("bob@example.com")).await.unwrap();
        assert_eq!(other.status(), StatusCode::FORBIDDEN);

        let list = Request::builder()
            .uri("/v1/conversations")
            .header("cookie", "cairn_email=ann@example.com")
            .body(Body::empty())
            .unwrap();
        let ids = body_json(build_router(state).oneshot(list).await.unwrap()).await;
        assert_eq!(ids, json!([ConversationId::from("conv-9")]));
    }

    #[tokio::test]
    async fn unknown_trace_is_not_found() {
        let app = build_router(test_state(SequentialMockModel::single_text("unused")));
        let req = Request::builder().uri("/v1/traces/nope").body(Body::empty()).unwrap();
        assert_eq!(app.oneshot(req).await.unwrap().status(), StatusCode::NOT_FOUND);
    }
}
