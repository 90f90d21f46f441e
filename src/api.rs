//! HTTP API for Claude Code hooks.
//!
//! Every endpoint is a thin translation onto [`AudioPipeline`]; queuing
//! endpoints return as soon as the item is admitted.

use std::sync::Arc;

use axum::extract::rejection::JsonRejection;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};
use uuid::Uuid;

use crate::error::Result;
use crate::pipeline::{short_id, AudioPipeline, QueueStatus, RequestKind, RequestMetadata, SummaryKind};
use crate::transcript::{parse_transcript, DEFAULT_MAX_CONTENT_LENGTH};

/// Content at least this long is summarized with the large model.
const LONG_RESPONSE_CHARS: usize = 300;

#[derive(Clone)]
pub struct ApiState {
    pub pipeline: Arc<AudioPipeline>,
    pub tts_ready: bool,
}

// --- Request/Response types ---

#[derive(Deserialize)]
struct SummarizeRequest {
    #[serde(default)]
    transcript_content: String,
}

#[derive(Deserialize)]
struct PermissionRequest {
    tool_name: String,
    #[serde(default)]
    tool_input: serde_json::Map<String, Value>,
}

#[derive(Deserialize)]
struct SpeakRequest {
    text: String,
}

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    tts_ready: bool,
    summarizer_ready: bool,
    queue_depth: usize,
}

#[derive(Serialize)]
struct MessageResponse {
    message_id: String,
    status: &'static str,
}

impl MessageResponse {
    fn queued(id: Uuid) -> Json<Self> {
        Json(Self {
            message_id: id.to_string(),
            status: "queued",
        })
    }
}

/// Error reply with a `{"detail": ...}` body.
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    detail: String,
}

impl ApiError {
    fn bad_request(detail: impl Into<String>) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            detail: detail.into(),
        }
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        Self {
            status: rejection.status(),
            detail: rejection.body_text(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(json!({ "detail": self.detail }))).into_response()
    }
}

type ApiResult<T> = std::result::Result<Json<T>, ApiError>;

/// Build the axum router.
pub fn router(state: ApiState) -> Router {
    Router::new()
        .route("/health", get(handle_health))
        .route("/summarize", post(handle_summarize))
        .route("/permission", post(handle_permission))
        .route("/speak", post(handle_speak))
        .route("/queue", get(handle_queue))
        .route("/queue/clear", post(handle_clear))
        .route("/queue/skip", post(handle_skip))
        .with_state(state)
}

/// Serve the API on `addr` until `shutdown` is cancelled.
pub async fn serve(state: ApiState, addr: &str, shutdown: CancellationToken) -> Result<()> {
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!("API server listening on {addr}");

    axum::serve(listener, router(state))
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await?;

    info!("API server stopped");
    Ok(())
}

/// Build the `/permission` content handed to the summarizer.
pub fn permission_content(tool_name: &str, tool_input: &serde_json::Map<String, Value>) -> String {
    let input = Value::Object(tool_input.clone()).to_string();
    match tool_input.get("description").and_then(Value::as_str) {
        Some(desc) if !desc.is_empty() => {
            format!("Tool: {tool_name}. Description: {desc}. Input: {input}")
        }
        _ => format!("Tool: {tool_name}. Input: {input}"),
    }
}

fn correlation_id() -> String {
    short_id(Uuid::new_v4())
}

// --- Handlers ---

async fn handle_health(State(state): State<ApiState>) -> Json<HealthResponse> {
    let status = state.pipeline.get_status();
    Json(HealthResponse {
        status: "ok",
        tts_ready: state.tts_ready,
        summarizer_ready: state.pipeline.summarizer_ready().await,
        queue_depth: status.queue_depth(),
    })
}

async fn handle_summarize(
    State(state): State<ApiState>,
    body: std::result::Result<Json<SummarizeRequest>, JsonRejection>,
) -> ApiResult<MessageResponse> {
    let Json(req) = body?;
    if req.transcript_content.trim().is_empty() {
        return Err(ApiError::bad_request("transcript_content is required"));
    }

    let parsed = parse_transcript(&req.transcript_content, DEFAULT_MAX_CONTENT_LENGTH)
        .ok_or_else(|| ApiError::bad_request("No content in transcript"))?;
    if parsed.truncated {
        debug!("Content truncated to {} chars", parsed.length);
    }

    let id = correlation_id();
    info!(id = %id, "POST /summarize ({} chars)", parsed.length);

    let kind = if parsed.has_tool_calls || parsed.length >= LONG_RESPONSE_CHARS {
        SummaryKind::LongResponse
    } else {
        SummaryKind::ShortResponse
    };
    let message_id = state.pipeline.add_request(
        RequestKind::Summarize,
        parsed.content,
        Some(kind),
        None,
        Some(id),
    );
    Ok(MessageResponse::queued(message_id))
}

async fn handle_permission(
    State(state): State<ApiState>,
    body: std::result::Result<Json<PermissionRequest>, JsonRejection>,
) -> ApiResult<MessageResponse> {
    let Json(req) = body?;
    let id = correlation_id();
    info!(id = %id, "POST /permission tool={}", req.tool_name);

    let content = permission_content(&req.tool_name, &req.tool_input);
    let message_id = state.pipeline.add_request(
        RequestKind::Permission,
        content,
        Some(SummaryKind::PermissionRequest),
        Some(RequestMetadata::Permission {
            tool_name: req.tool_name,
        }),
        Some(id),
    );
    Ok(MessageResponse::queued(message_id))
}

async fn handle_speak(
    State(state): State<ApiState>,
    body: std::result::Result<Json<SpeakRequest>, JsonRejection>,
) -> ApiResult<MessageResponse> {
    let Json(req) = body?;
    let id = correlation_id();
    info!(id = %id, "POST /speak ({} chars)", req.text.chars().count());

    if req.text.trim().is_empty() {
        return Err(ApiError::bad_request("Text cannot be empty"));
    }
    Ok(MessageResponse::queued(state.pipeline.add_message(req.text, Some(id))))
}

async fn handle_queue(State(state): State<ApiState>) -> Json<QueueStatus> {
    Json(state.pipeline.get_status())
}

async fn handle_clear(State(state): State<ApiState>) -> Json<Value> {
    let cleared = state.pipeline.clear_queue();
    Json(json!({ "cleared": cleared, "status": "ok" }))
}

async fn handle_skip(State(state): State<ApiState>) -> Json<Value> {
    let skipped = state.pipeline.skip_current();
    Json(json!({ "skipped": skipped, "status": "ok" }))
}
