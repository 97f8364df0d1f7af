//! REST API Server for the Financial Search Orchestrator
//!
//! Exposes the search pipeline over HTTP: a blocking JSON endpoint and
//! an NDJSON streaming endpoint that narrates progress as it runs.

use axum::{
    body::Body,
    extract::State,
    http::{header, StatusCode},
    response::{IntoResponse, Json, Response},
    routing::{get, post},
    Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tokio_stream::StreamExt;
use tower_http::cors::CorsLayer;
use tracing::{error, info};

use crate::engine::SearchEngine;
use crate::models::{Query, QueryMode, StreamEvent};

/// =============================
/// Request Models
/// =============================

#[derive(Debug, Deserialize)]
pub struct SearchRequest {
    pub query: String,
    #[serde(default)]
    pub mode: Option<String>,
    pub session_id: Option<String>,
}

impl SearchRequest {
    fn into_query(self) -> Query {
        let mode = match self.mode.as_deref() {
            Some("deep_research") | Some("deep-research") => QueryMode::DeepResearch,
            _ => QueryMode::Sonar,
        };
        Query {
            text: self.query,
            mode,
            session_id: self.session_id,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
}

/// =============================
/// API State
/// =============================

#[derive(Clone)]
pub struct ApiState {
    pub engine: Arc<SearchEngine>,
}

/// =============================
/// Handlers
/// =============================

async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "ok",
        "timestamp": chrono::Utc::now().to_rfc3339(),
    }))
}

/// Blocking search: runs the full pipeline and returns the answer,
/// sources, and session id as one JSON document.
async fn run_search(
    State(state): State<ApiState>,
    Json(request): Json<SearchRequest>,
) -> Response {
    let session_id = request.session_id.clone();
    let query = request.into_query();
    info!(query = %query.text, mode = %query.mode, "Search request");

    match state.engine.run(query).await {
        Ok(outcome) => (StatusCode::OK, Json(outcome)).into_response(),
        Err(e) => {
            error!(error = %e, "Search failed");
            (
                StatusCode::BAD_GATEWAY,
                Json(ErrorResponse {
                    error: e.to_string(),
                    session_id,
                }),
            )
                .into_response()
        }
    }
}

/// Streaming search: newline-delimited JSON events, ending with exactly
/// one `result` or `error` event. Falls back to the blocking handler
/// when streaming is disabled by configuration.
async fn run_search_stream(
    State(state): State<ApiState>,
    Json(request): Json<SearchRequest>,
) -> Response {
    if !state.engine.config().enable_streaming {
        return run_search(State(state), Json(request)).await;
    }

    let query = request.into_query();
    info!(query = %query.text, mode = %query.mode, "Streaming search request");

    let (tx, rx) = mpsc::channel::<StreamEvent>(64);
    let engine = Arc::clone(&state.engine);
    tokio::spawn(async move {
        // Terminal error events are emitted on the channel by the engine;
        // the returned error here is for the log only.
        if let Err(e) = engine.run_streaming(query, tx).await {
            error!(error = %e, "Streaming search ended with error");
        }
    });

    let body = Body::from_stream(ReceiverStream::new(rx).map(|event| {
        serde_json::to_string(&event).map(|mut line| {
            line.push('\n');
            line
        })
    }));

    Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, "application/x-ndjson")
        .header(header::CACHE_CONTROL, "no-cache")
        .body(body)
        .unwrap_or_else(|_| StatusCode::INTERNAL_SERVER_ERROR.into_response())
}

/// =============================
/// Router
/// =============================

pub fn create_router(engine: Arc<SearchEngine>) -> Router {
    let state = ApiState { engine };

    Router::new()
        .route("/health", get(health))
        .route("/api/search", post(run_search))
        .route("/api/search/stream", post(run_search_stream))
        .with_state(state)
        .layer(CorsLayer::permissive())
}

/// =============================
/// Server Startup
/// =============================

pub async fn start_server(
    engine: Arc<SearchEngine>,
    port: u16,
) -> std::result::Result<(), Box<dyn std::error::Error>> {
    let router = create_router(engine);

    let listener = tokio::net::TcpListener::bind(format!("0.0.0.0:{}", port)).await?;

    info!("API Server listening on http://0.0.0.0:{}", port);
    info!("Local: http://127.0.0.1:{}", port);

    axum::serve(listener, router).await?;

    Ok(())
}
