//! JSON HTTP server.
//!
//! Exposes the retrieval service over HTTP for tools and agents that
//! prefer a network call over the CLI.
//!
//! # Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `POST` | `/query` | Answer a query (see [`QueryRequest`]) |
//! | `GET`  | `/corpus` | Configured documents and whether each is indexed |
//! | `GET`  | `/health` | Health check (version, model, indexed document count) |
//!
//! # Error Contract
//!
//! ```json
//! { "error": { "code": "bad_request", "message": "query must not be empty" } }
//! ```
//!
//! Error codes: `bad_request` (400), `embedding_failed` (502), `internal` (500).
//!
//! # CORS
//!
//! All origins, methods, and headers are permitted to support browser-based
//! clients.

use axum::{
    extract::{rejection::JsonRejection, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::Serialize;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};

use crate::error::RetrievalError;
use crate::service::{QueryRequest, QueryResponse, RetrievalService};

/// Shared application state passed to all route handlers via Axum's `State` extractor.
#[derive(Clone)]
struct AppState {
    service: Arc<RetrievalService>,
}

/// Build the axum router for `service`. Separate from [`run_server`] so it
/// can be mounted or served on a pre-bound listener.
pub fn build_router(service: Arc<RetrievalService>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/query", post(handle_query))
        .route("/corpus", get(handle_corpus))
        .route("/health", get(handle_health))
        .layer(cors)
        .with_state(AppState { service })
}

/// Bind to `[server].bind` and serve until the process is terminated.
pub async fn run_server(service: Arc<RetrievalService>) -> anyhow::Result<()> {
    let bind_addr = service.config().server.bind.clone();
    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    tracing::info!(
        addr = %bind_addr,
        documents = service.corpus().len(),
        model = service.model_name(),
        "server listening"
    );
    serve(listener, service).await
}

/// Serve on an already bound listener.
pub async fn serve(
    listener: tokio::net::TcpListener,
    service: Arc<RetrievalService>,
) -> anyhow::Result<()> {
    axum::serve(listener, build_router(service)).await?;
    Ok(())
}

// ============ Error response ============

#[derive(Serialize)]
struct ErrorBody {
    error: ErrorDetail,
}

#[derive(Serialize)]
struct ErrorDetail {
    code: String,
    message: String,
}

struct AppError {
    status: StatusCode,
    code: &'static str,
    message: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = ErrorBody {
            error: ErrorDetail {
                code: self.code.to_string(),
                message: self.message,
            },
        };
        (self.status, Json(body)).into_response()
    }
}

fn bad_request(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::BAD_REQUEST,
        code: "bad_request",
        message: message.into(),
    }
}

impl From<RetrievalError> for AppError {
    fn from(err: RetrievalError) -> Self {
        if err.is_validation() {
            return bad_request(err.to_string());
        }
        match err {
            RetrievalError::Embedding(_) => AppError {
                status: StatusCode::BAD_GATEWAY,
                code: "embedding_failed",
                message: err.to_string(),
            },
            other => AppError {
                status: StatusCode::INTERNAL_SERVER_ERROR,
                code: "internal",
                message: other.to_string(),
            },
        }
    }
}

// ============ GET /health ============

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
    model: String,
    indexed_documents: usize,
}

async fn handle_health(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
        model: state.service.model_name().to_string(),
        indexed_documents: state.service.store().len(),
    })
}

// ============ GET /corpus ============

#[derive(Serialize)]
struct CorpusEntry {
    path: String,
    kind: &'static str,
    indexed: bool,
}

#[derive(Serialize)]
struct CorpusResponse {
    documents: Vec<CorpusEntry>,
}

async fn handle_corpus(State(state): State<AppState>) -> Json<CorpusResponse> {
    let store = state.service.store();
    let documents = state
        .service
        .corpus()
        .iter()
        .map(|doc| CorpusEntry {
            path: doc.path.display().to_string(),
            kind: doc.kind.as_str(),
            indexed: store.contains(&doc.path),
        })
        .collect();
    Json(CorpusResponse { documents })
}

// ============ POST /query ============

async fn handle_query(
    State(state): State<AppState>,
    body: Result<Json<QueryRequest>, JsonRejection>,
) -> Result<Json<QueryResponse>, AppError> {
    let Json(request) = body.map_err(|rejection| bad_request(rejection.body_text()))?;
    let response = state.service.run(request).await.map_err(|e| {
        tracing::warn!(error = %e, "query failed");
        AppError::from(e)
    })?;
    Ok(Json(response))
}
