//! HTTP API v1.
//!
//! Endpoints:
//!
//! - `POST /v1/chat`                — Run a turn, get every output unit at once
//! - `POST /v1/chat/stream`         — Run a turn, get an SSE stream of units
//! - `GET  /v1/tools`               — Tools the caller may use
//! - `GET  /v1/conversations`       — The caller's conversations
//! - `GET  /v1/conversations/{id}`  — One conversation, if the caller owns it
//! - `GET  /v1/traces/{request_id}` — Spans and metrics of one turn

use axum::{
    Router,
    extract::{Path, Query, State},
    http::{HeaderMap, HeaderValue, StatusCode},
    response::sse::{Event as SseEvent, KeepAlive, Sse},
    response::{IntoResponse, Json, Response},
    routing::{get, post},
};
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use std::convert::Infallible;
use std::sync::Arc;
use tracing::{info, warn};

use crate::identity::request_context;
use cairn_agent::{Agent, OutputUnit, UnitBody};
use cairn_core::error::StoreError;
use cairn_core::message::{Conversation, ConversationId};
use cairn_core::tool::ToolSchema;
use cairn_core::user::User;
use cairn_telemetry::{TelemetryEngine, Trace};

/// Response header carrying the conversation id of a streamed turn.
pub const CONVERSATION_ID_HEADER: &str = "x-conversation-id";

// ── State ─────────────────────────────────────────────────────────────────

/// Shared state for the v1 API.
pub struct ApiV1State {
    pub agent: Arc<Agent>,
    /// Trace store, when the agent records into one
    pub telemetry: Option<Arc<TelemetryEngine>>,
}

pub type SharedApiState = Arc<ApiV1State>;

// ── Router ────────────────────────────────────────────────────────────────

/// Build the v1 API router. Nest this under "/v1" in the main router.
pub fn v1_router(state: SharedApiState) -> Router {
    Router::new()
        .route("/chat", post(chat_handler))
        .route("/chat/stream", post(chat_stream_handler))
        .route("/tools", get(list_tools_handler))
        .route("/conversations", get(list_conversations_handler))
        .route("/conversations/{id}", get(get_conversation_handler))
        .route("/traces/{request_id}", get(get_trace_handler))
        .with_state(state)
}

// ── DTOs ──────────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct ChatRequest {
    pub message: String,
    #[serde(default)]
    pub conversation_id: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ChatResponse {
    pub conversation_id: String,
    /// Concatenated text units
    pub response: String,
    pub units: Vec<OutputUnit>,
}

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
}

type ApiError = (StatusCode, Json<ErrorResponse>);

fn api_error(status: StatusCode, error: impl Into<String>) -> ApiError {
    (status, Json(ErrorResponse { error: error.into() }))
}

#[derive(Debug, Deserialize)]
pub struct ListParams {
    #[serde(default = "default_limit")]
    pub limit: usize,
}

fn default_limit() -> usize {
    50
}

// ── Helpers ───────────────────────────────────────────────────────────────

async fn resolve_user(state: &ApiV1State, headers: &HeaderMap) -> Result<User, ApiError> {
    state
        .agent
        .user_resolver()
        .resolve(&request_context(headers))
        .await
        .map_err(|e| {
            warn!(error = %e, "Could not resolve caller");
            api_error(StatusCode::UNAUTHORIZED, e.to_string())
        })
}

fn validate_chat(payload: &ChatRequest) -> Result<ConversationId, ApiError> {
    if payload.message.trim().is_empty() {
        return Err(api_error(StatusCode::BAD_REQUEST, "message must not be empty"));
    }
    Ok(payload
        .conversation_id
        .as_deref()
        .map(ConversationId::from)
        .unwrap_or_default())
}

fn store_error(e: StoreError) -> ApiError {
    match e {
        StoreError::OwnerMismatch { .. } => api_error(StatusCode::FORBIDDEN, e.to_string()),
        other => api_error(StatusCode::INTERNAL_SERVER_ERROR, other.to_string()),
    }
}

// ── Chat ──────────────────────────────────────────────────────────────────

/// `POST /v1/chat` — Run a turn and collect every unit.
async fn chat_handler(
    State(state): State<SharedApiState>,
    headers: HeaderMap,
    Json(payload): Json<ChatRequest>,
) -> Result<Json<ChatResponse>, ApiError> {
    let conversation_id = validate_chat(&payload)?;
    info!(conversation_id = %conversation_id, "v1/chat request");

    let stream = state
        .agent
        .process(request_context(&headers), payload.message, Some(conversation_id.clone()));
    let units: Vec<OutputUnit> = stream.collect().await;
    let response = units
        .iter()
        .filter_map(|u| match &u.body {
            UnitBody::Text { content } => Some(content.as_str()),
            _ => None,
        })
        .collect::<Vec<_>>()
        .join("\n\n");

    Ok(Json(ChatResponse {
        conversation_id: conversation_id.to_string(),
        response,
        units,
    }))
}

/// `POST /v1/chat/stream` — Run a turn, one SSE event per unit.
///
/// Event names are the unit types. Closing the connection cancels the turn.
async fn chat_stream_handler(
    State(state): State<SharedApiState>,
    headers: HeaderMap,
    Json(payload): Json<ChatRequest>,
) -> Result<Response, ApiError> {
    let conversation_id = validate_chat(&payload)?;
    info!(conversation_id = %conversation_id, "v1/chat/stream SSE request");

    let stream = state
        .agent
        .process(request_context(&headers), payload.message, Some(conversation_id.clone()))
        .map(|unit| {
            let data = serde_json::to_string(&unit).unwrap_or_default();
            Ok::<_, Infallible>(SseEvent::default().event(unit.event_type()).data(data))
        });

    let mut response = Sse::new(stream).keep_alive(KeepAlive::default()).into_response();
    if let Ok(value) = HeaderValue::from_str(conversation_id.as_str()) {
        response.headers_mut().insert(CONVERSATION_ID_HEADER, value);
    }
    Ok(response)
}

// ── Tools ─────────────────────────────────────────────────────────────────

/// `GET /v1/tools` — Schemas of the tools the caller may use.
async fn list_tools_handler(
    State(state): State<SharedApiState>,
    headers: HeaderMap,
) -> Result<Json<Vec<ToolSchema>>, ApiError> {
    let user = resolve_user(&state, &headers).await?;
    Ok(Json(state.agent.tools().get_schemas(&user)))
}

// ── Conversations ─────────────────────────────────────────────────────────

/// `GET /v1/conversations` — Ids of the caller's conversations, newest first.
async fn list_conversations_handler(
    State(state): State<SharedApiState>,
    headers: HeaderMap,
    Query(params): Query<ListParams>,
) -> Result<Json<Vec<ConversationId>>, ApiError> {
    let user = resolve_user(&state, &headers).await?;
    let ids = state
        .agent
        .conversation_store()
        .list(&user, params.limit)
        .await
        .map_err(store_error)?;
    Ok(Json(ids))
}

/// `GET /v1/conversations/{id}`
async fn get_conversation_handler(
    State(state): State<SharedApiState>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Result<Json<Conversation>, ApiError> {
    let user = resolve_user(&state, &headers).await?;
    match state
        .agent
        .conversation_store()
        .load(&ConversationId(id.clone()), &user)
        .await
        .map_err(store_error)?
    {
        Some(conversation) => Ok(Json(conversation)),
        None => Err(api_error(StatusCode::NOT_FOUND, format!("Conversation '{id}' not found"))),
    }
}

// ── Traces ────────────────────────────────────────────────────────────────

/// `GET /v1/traces/{request_id}`
async fn get_trace_handler(
    State(state): State<SharedApiState>,
    Path(request_id): Path<String>,
) -> Result<Json<Trace>, ApiError> {
    let Some(telemetry) = &state.telemetry else {
        return Err(api_error(StatusCode::NOT_FOUND, "Tracing is not enabled"));
    };
    telemetry
        .get_trace(&request_id)
        .map(Json)
        .ok_or_else(|| api_error(StatusCode::NOT_FOUND, format!("No trace for request '{request_id}'")))
}
