//! JSON HTTP API over a shared [`ResearchEngine`].
//!
//! # Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `POST` | `/query` | Answer a research question |
//! | `POST` | `/ingest` | Ingest documents (`{"documents": [...]}`) |
//! | `POST` | `/evaluate` | Score a (query, answer, context) triple |
//! | `GET`  | `/evaluate/{record_id}` | Fetch a stored evaluation record |
//! | `GET`  | `/health` | Health check (returns version and chunk count) |
//!
//! # Error Contract
//!
//! Every error response has the same shape:
//!
//! ```json
//! { "detail": "top_k must be between 1 and 20, got 0" }
//! ```
//!
//! Status codes follow [`EngineError::status`]: 400 bad input or guardrail
//! rejection, 404 unknown record, 503 backend unavailable, 500 internal.
//! Guardrail rejections name each violated rule in `detail`.
//!
//! # CORS
//!
//! All origins, methods, and headers are permitted.

use axum::{
    extract::{rejection::JsonRejection, Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};

use research_core::models::{Document, EvaluationRecord};
use research_core::EngineError;

use crate::config::Config;
use crate::engine::{EvaluateRequest, QueryRequest, QueryResponse, ResearchEngine};
use crate::ingest::IngestReport;

#[derive(Clone)]
struct AppState {
    engine: Arc<ResearchEngine>,
}

/// Open the engine from `config` and serve on `[server].bind` until the
/// process is terminated.
pub async fn run_server(config: &Config) -> anyhow::Result<()> {
    let bind_addr = config.server.bind.clone();
    let engine = Arc::new(ResearchEngine::open(config.clone()).await?);

    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    tracing::info!(addr = %listener.local_addr()?, "research engine listening");
    serve(listener, engine).await
}

/// Serve `engine` on an already-bound listener.
pub async fn serve(
    listener: tokio::net::TcpListener,
    engine: Arc<ResearchEngine>,
) -> anyhow::Result<()> {
    axum::serve(listener, router(engine)).await?;
    Ok(())
}

pub fn router(engine: Arc<ResearchEngine>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/query", post(handle_query))
        .route("/ingest", post(handle_ingest))
        .route("/evaluate", post(handle_evaluate))
        .route("/evaluate/{record_id}", get(handle_get_evaluation))
        .route("/health", get(handle_health))
        .layer(cors)
        .with_state(AppState { engine })
}

// ============ Error response ============

#[derive(Serialize)]
struct ErrorBody {
    detail: String,
}

struct AppError {
    status: StatusCode,
    detail: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        (self.status, Json(ErrorBody { detail: self.detail })).into_response()
    }
}

impl From<EngineError> for AppError {
    fn from(err: EngineError) -> Self {
        let status =
            StatusCode::from_u16(err.status()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        if status.is_server_error() {
            tracing::error!(error = %err, "request failed");
        }
        AppError {
            status,
            detail: err.to_string(),
        }
    }
}

impl From<JsonRejection> for AppError {
    fn from(rejection: JsonRejection) -> Self {
        AppError {
            status: StatusCode::BAD_REQUEST,
            detail: rejection.body_text(),
        }
    }
}

// ============ POST /query ============

async fn handle_query(
    State(state): State<AppState>,
    payload: Result<Json<QueryRequest>, JsonRejection>,
) -> Result<Json<QueryResponse>, AppError> {
    let Json(request) = payload?;
    Ok(Json(state.engine.query(&request).await?))
}

// ============ POST /ingest ============

#[derive(Deserialize)]
struct IngestRequest {
    documents: Vec<Document>,
}

async fn handle_ingest(
    State(state): State<AppState>,
    payload: Result<Json<IngestRequest>, JsonRejection>,
) -> Result<Json<IngestReport>, AppError> {
    let Json(request) = payload?;
    Ok(Json(state.engine.ingest(&request.documents).await))
}

// ============ /evaluate ============

async fn handle_evaluate(
    State(state): State<AppState>,
    payload: Result<Json<EvaluateRequest>, JsonRejection>,
) -> Result<Json<EvaluationRecord>, AppError> {
    let Json(request) = payload?;
    Ok(Json(state.engine.evaluate(&request).await?))
}

async fn handle_get_evaluation(
    State(state): State<AppState>,
    Path(record_id): Path<String>,
) -> Result<Json<EvaluationRecord>, AppError> {
    Ok(Json(state.engine.get_evaluation(&record_id).await?))
}

// ============ GET /health ============

#[derive(Serialize)]
struct HealthResponse {
    status: String,
    version: String,
    chunks: u64,
}

async fn handle_health(State(state): State<AppState>) -> Result<Json<HealthResponse>, AppError> {
    Ok(Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        chunks: state.engine.chunk_count().await?,
    }))
}
