//! REST API Server for the construction finance assistant
//!
//! Exposes the orchestrator via HTTP endpoints
//! Integrates with the chat UI

use axum::{
    body::Body,
    extract::State,
    http::{header, HeaderName, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use std::convert::Infallible;
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};

use crate::agent::{Orchestrator, GENERIC_ERROR_MESSAGE};
use crate::models::{last_user_question, ChatMessage};
use crate::stream::{DATA_STREAM_HEADER, DATA_STREAM_VERSION};

/// Prompts the chat UI offers on an empty conversation.
pub const SAMPLE_QUESTIONS: [&str; 5] = [
    "How much money do I have remaining across all masonry packages?",
    "Which packages are overspent?",
    "Show me committed vs spent vs remaining for the Downtown Office Tower",
    "Give me a budget breakdown by trade for the Medical Center",
    "Drill down into the Electrical trade packages",
];

/// =============================
/// Request Models
/// =============================

#[derive(Debug, Deserialize)]
pub struct ChatRequest {
    #[serde(default)]
    pub messages: Vec<ChatMessage>,
}

/// =============================
/// Response Wrapper
/// =============================

#[derive(Debug, Serialize, Deserialize)]
pub struct ApiResponse {
    pub success: bool,
    pub data: Option<serde_json::Value>,
    pub error: Option<String>,
    pub timestamp: String,
}

impl ApiResponse {
    pub fn success<T: Serialize>(data: T) -> Self {
        Self {
            success: true,
            data: serde_json::to_value(data).ok(),
            error: None,
            timestamp: chrono::Utc::now().to_rfc3339(),
        }
    }

    pub fn error(message: String) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(message),
            timestamp: chrono::Utc::now().to_rfc3339(),
        }
    }
}

/// =============================
/// API State
/// =============================

#[derive(Clone)]
pub struct ApiState {
    pub orchestrator: Arc<Orchestrator>,
}

/// =============================
/// Health Endpoint
/// =============================

async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "healthy",
        "timestamp": chrono::Utc::now().to_rfc3339()
    }))
}

/// =============================
/// Chat Endpoint
/// =============================

async fn chat_handler(State(state): State<ApiState>, Json(req): Json<ChatRequest>) -> Response {
    if req.messages.is_empty() {
        return (
            StatusCode::BAD_REQUEST,
            Json(ApiResponse::error("No messages provided".into())),
        )
            .into_response();
    }

    if last_user_question(&req.messages).is_none() {
        return (
            StatusCode::BAD_REQUEST,
            Json(ApiResponse::error("No user message found".into())),
        )
            .into_response();
    }

    info!(messages = req.messages.len(), "Received chat request");

    let stream = match state.orchestrator.stream_chat(req.messages).await {
        Ok(stream) => stream,
        Err(e) => {
            error!(error = %e, "Chat request failed before streaming");
            return (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(ApiResponse::error(GENERIC_ERROR_MESSAGE.into())),
            )
                .into_response();
        }
    };

    let body = Body::from_stream(
        stream.map(|chunk| Ok::<_, Infallible>(chunk.to_data_stream_line())),
    );

    (
        [
            (header::CONTENT_TYPE, "text/plain; charset=utf-8"),
            (HeaderName::from_static(DATA_STREAM_HEADER), DATA_STREAM_VERSION),
        ],
        body,
    )
        .into_response()
}

/// =============================
/// Discovery Endpoints
/// =============================

async fn list_tools(State(state): State<ApiState>) -> Json<ApiResponse> {
    Json(ApiResponse::success(state.orchestrator.tool_definitions()))
}

async fn sample_questions() -> Json<ApiResponse> {
    Json(ApiResponse::success(SAMPLE_QUESTIONS))
}

/// =============================
/// Router
/// =============================

pub fn create_router(orchestrator: Arc<Orchestrator>) -> Router {
    let state = ApiState { orchestrator };

    Router::new()
        .route("/health", get(health))
        .route("/api/chat", post(chat_handler))
        .route("/api/tools", get(list_tools))
        .route("/api/sample-questions", get(sample_questions))
        .with_state(state)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
}

/// =============================
/// Server Startup
/// =============================

pub async fn start_server(orchestrator: Arc<Orchestrator>, port: u16) -> crate::Result<()> {
    let router = create_router(orchestrator);

    let listener = tokio::net::TcpListener::bind(format!("0.0.0.0:{}", port)).await?;

    info!("API Server listening on http://0.0.0.0:{}", port);
    info!("Local: http://127.0.0.1:{}", port);

    axum::serve(listener, router).await.map_err(|e| {
        warn!(error = %e, "API server stopped");
        e
    })?;

    Ok(())
}
