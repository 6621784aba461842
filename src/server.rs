use crate::engine::SearchEngine;
use crate::error::SearchError;
use crate::search::{MatchedFile, SearchFile};
use axum::extract::rejection::JsonRejection;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

/// Shared state for the server.
#[derive(Clone)]
pub struct AppState {
    pub engine: Arc<SearchEngine>,
}

#[derive(Debug, Deserialize)]
pub struct AnalyzeRequest {
    pub url: Option<String>,
    pub query: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct AnalyzeResponse {
    pub success: bool,
    pub matches: bool,
    pub similarity: f32,
}

#[derive(Debug, Deserialize)]
pub struct SearchRequest {
    #[serde(default)]
    pub files: Vec<SearchFile>,
    #[serde(default)]
    pub query: String,
}

#[derive(Debug, Serialize)]
pub struct SearchResponse {
    pub success: bool,
    pub files: Vec<MatchedFile>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub count: Option<usize>,
    /// Seconds. An integer `0` when nothing was scored.
    pub processing_time: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub threshold_used: Option<f32>,
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub model_loaded: bool,
    pub device: String,
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    success: bool,
    error: String,
}

/// Errors a handler can answer with.
#[derive(Debug)]
pub enum ApiError {
    BadRequest(String),
    Internal(String),
}

impl From<SearchError> for ApiError {
    fn from(e: SearchError) -> Self {
        Self::Internal(e.to_string())
    }
}

impl From<JsonRejection> for ApiError {
    fn from(e: JsonRejection) -> Self {
        Self::BadRequest(e.body_text())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, error) = match self {
            Self::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            Self::Internal(msg) => {
                tracing::error!("Request failed: {msg}");
                (StatusCode::INTERNAL_SERVER_ERROR, msg)
            }
        };
        (
            status,
            Json(ErrorBody {
                success: false,
                error,
            }),
        )
            .into_response()
    }
}

/// Run blocking pipeline work off the async executor.
async fn blocking<T, F>(f: F) -> Result<T, ApiError>
where
    F: FnOnce() -> crate::Result<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| ApiError::Internal(e.to_string()))?
        .map_err(ApiError::from)
}

pub fn router(engine: Arc<SearchEngine>) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/analyze", post(analyze))
        .route("/search", post(search))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(AppState { engine })
}

/// Handler for GET /health
async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy",
        model_loaded: state.engine.model_loaded(),
        device: state.engine.device().to_owned(),
    })
}

/// Handler for POST /analyze
async fn analyze(
    State(state): State<AppState>,
    payload: Result<Json<AnalyzeRequest>, JsonRejection>,
) -> Result<Json<AnalyzeResponse>, ApiError> {
    let Json(request) = payload?;
    let (Some(url), Some(query)) = (
        request.url.filter(|u| !u.is_empty()),
        request.query.filter(|q| !q.is_empty()),
    ) else {
        return Err(ApiError::BadRequest("Missing url or query parameter".into()));
    };

    let engine = state.engine;
    let result = blocking(move || engine.analyze(&url, &query)).await?;
    Ok(Json(AnalyzeResponse {
        success: true,
        matches: result.matches,
        similarity: result.similarity,
    }))
}

/// Handler for POST /search
async fn search(
    State(state): State<AppState>,
    payload: Result<Json<SearchRequest>, JsonRejection>,
) -> Result<Json<SearchResponse>, ApiError> {
    let Json(request) = payload?;
    if request.query.trim().is_empty() {
        return Err(ApiError::BadRequest("Missing query parameter".into()));
    }

    let engine = state.engine;
    let outcome = blocking(move || engine.search(&request.files, &request.query)).await?;
    let (count, processing_time) = match outcome.threshold_used {
        Some(_) => (Some(outcome.files.len()), json!(outcome.processing_time)),
        None => (None, json!(0)),
    };
    Ok(Json(SearchResponse {
        success: true,
        files: outcome.files,
        count,
        processing_time,
        threshold_used: outcome.threshold_used,
    }))
}

/// Bind `addr` and serve until the process is stopped.
pub async fn serve(engine: Arc<SearchEngine>, addr: &str) -> std::io::Result<()> {
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!("Starting server on {}", listener.local_addr()?);
    axum::serve(listener, router(engine)).await
}
