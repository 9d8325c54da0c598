//! OpenAI-compatible HTTP API.
//!
//! Implements the subset of the OpenAI API needed for text completions:
//! - GET|POST /v1/completions
//! - GET /v1/models
//! - GET /v1/models/{name}
//! - GET /health

use std::sync::Arc;
use std::time::Instant;

use axum::body::Bytes;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{error, info};

use crate::backend::{BackendError, GenerationBackend, GenerationRequest};
use crate::completion::options::{
    first_values, parse_options, parse_payload, CompletionParams, COMPLETION_SCHEMA,
};
use crate::completion::response::ResponseTemplate;
use crate::completion::{handle_json, handle_stream, CompletionError};
use crate::config::Config;
use crate::server::streaming::completion_sse;

/// Application state shared across handlers.
pub struct AppState {
    pub backend: Arc<dyn GenerationBackend>,
    pub config: Arc<Config>,
    pub start_time: Instant,
}

impl AppState {
    pub fn new(backend: Arc<dyn GenerationBackend>, config: Arc<Config>) -> Self {
        Self {
            backend,
            config,
            start_time: Instant::now(),
        }
    }
}

/// Build the axum router with all API routes.
pub fn build_router(state: Arc<AppState>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/v1/completions", get(completions).post(completions))
        .route("/v1/models", get(list_models))
        .route("/v1/models/{*name}", get(retrieve_model))
        .route("/health", get(health))
        .fallback(not_found)
        .method_not_allowed_fallback(method_not_allowed)
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

// ─── Errors ────────────────────────────────────────────────────────────────

#[derive(Error, Debug)]
pub enum ApiError {
    #[error("{0}")]
    NotFound(String),

    #[error("method not allowed")]
    MethodNotAllowed,

    #[error(transparent)]
    Completion(#[from] CompletionError),
}

impl From<BackendError> for ApiError {
    fn from(e: BackendError) -> Self {
        ApiError::Completion(CompletionError::Backend(e))
    }
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::MethodNotAllowed => StatusCode::METHOD_NOT_ALLOWED,
            ApiError::Completion(CompletionError::MissingModel)
            | ApiError::Completion(CompletionError::Backend(BackendError::InvalidModel(_))) => {
                StatusCode::BAD_REQUEST
            }
            ApiError::Completion(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

/// Error body: `{"error": {"message": "..."}}`.
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: ErrorDetail,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorDetail {
    pub message: String,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            error!(status = status.as_u16(), "Request failed: {self}");
        }
        let body = ErrorResponse {
            error: ErrorDetail {
                message: self.to_string(),
            },
        };
        (status, Json(body)).into_response()
    }
}

// ─── Response Types ────────────────────────────────────────────────────────

/// Model listing response.
#[derive(Debug, Serialize, Deserialize)]
pub struct ModelList {
    pub object: String,
    pub data: Vec<ModelInfo>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ModelInfo {
    pub id: String,
    pub object: String,
}

impl ModelInfo {
    fn new(id: &str) -> Self {
        Self {
            id: id.to_string(),
            object: "model".to_string(),
        }
    }
}

/// Health check response.
#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub uptime_secs: u64,
}

// ─── Route Handlers ────────────────────────────────────────────────────────

async fn completions(
    State(state): State<Arc<AppState>>,
    Query(pairs): Query<Vec<(String, String)>>,
    body: Bytes,
) -> Result<Response, ApiError> {
    let query = first_values(pairs);
    let payload = parse_payload(&body);
    let options = parse_options(COMPLETION_SCHEMA, &query, payload.as_ref());
    let params = CompletionParams::from_options(
        &options,
        state.config.backend.default_model.as_deref(),
    )?;

    let template = ResponseTemplate::new(&state.config.server.model_name);
    info!(
        id = template.id,
        model = params.model,
        stream = params.stream,
        max_tokens = ?params.max_tokens,
        "Completion request"
    );

    let fragments = state
        .backend
        .generate(GenerationRequest::from(&params))
        .await?;

    if params.stream {
        let events = handle_stream(fragments, template, state.config.streaming.max_interval());
        Ok(completion_sse(events).into_response())
    } else {
        let body = handle_json(fragments, template).await?;
        Ok(Json(body).into_response())
    }
}

async fn list_models(State(state): State<Arc<AppState>>) -> Json<ModelList> {
    Json(ModelList {
        object: "list".to_string(),
        data: vec![ModelInfo::new(&state.config.server.model_name)],
    })
}

async fn retrieve_model(
    State(state): State<Arc<AppState>>,
    Path(name): Path<String>,
) -> Result<Json<ModelInfo>, ApiError> {
    if name != state.config.server.model_name {
        return Err(ApiError::NotFound("model does not exist".to_string()));
    }
    Ok(Json(ModelInfo::new(&name)))
}

async fn health(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        uptime_secs: state.start_time.elapsed().as_secs(),
    })
}

async fn not_found() -> ApiError {
    ApiError::NotFound("not found".to_string())
}

async fn method_not_allowed() -> ApiError {
    ApiError::MethodNotAllowed
}
