//! HTTP server.
//!
//! Exposes the chat session and the result store as a JSON API, plus the
//! MCP Streamable HTTP endpoint from [`crate::mcp`].
//!
//! # Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `GET`  | `/health` | Health check (returns version) |
//! | `GET`  | `/results?limit=N` | Stored results, most recent `N` if given |
//! | `POST` | `/chat` | `{ "message": ... }` → answer with sources |
//! | `POST` | `/search` | `{ "query": ..., "enrich": bool }` → search and store |
//! | `*`    | `/mcp` | MCP JSON-RPC (tools `web_search`, `list_results`, `save_results`) |
//!
//! # Error Contract
//!
//! ```json
//! { "error": { "code": "bad_request", "message": "message must not be empty" } }
//! ```
//!
//! Error codes: `bad_request` (400), `internal` (500).
//!
//! # CORS
//!
//! All origins, methods, and headers are permitted to support browser-based
//! chat frontends.

use axum::{
    extract::{Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use rmcp::transport::streamable_http_server::{
    session::local::LocalSessionManager, StreamableHttpServerConfig, StreamableHttpService,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::Mutex;
use tower_http::cors::{Any, CorsLayer};
use tracing::{info, warn};

use crate::chat::{Answer, ChatSession, SearchOutcome};
use crate::config::{Config, EnrichMode};
use crate::mcp::McpBridge;
use crate::models::SearchResult;
use crate::store::ResultStore;

/// Shared application state passed to all route handlers via Axum's `State` extractor.
#[derive(Clone)]
struct AppState {
    config: Arc<Config>,
    /// One session for every client; questions are answered one at a time.
    session: Arc<Mutex<ChatSession>>,
    /// Same file as the session's store, readable while a question is in flight.
    store: ResultStore,
}

/// Starts the HTTP server on `[server].bind` and runs until the process is
/// terminated.
pub async fn run_server(config: Arc<Config>) -> anyhow::Result<()> {
    let bind_addr = config.server.bind.clone();
    // Without a model, /chat answers with sources and the search tools still work.
    let session = match ChatSession::from_config(config.clone()) {
        Ok(session) => session,
        Err(e) => {
            warn!(error = %e, "LLM unavailable; serving search only");
            ChatSession::search_only(config.clone())?
        }
    };
    let app = router(config, session);

    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    info!(addr = %bind_addr, "server listening");
    eprintln!("Listening on http://{} (MCP endpoint: /mcp)", bind_addr);
    axum::serve(listener, app).await?;

    Ok(())
}

/// Build the router around an existing session.
pub fn router(config: Arc<Config>, session: ChatSession) -> Router {
    let store = session.store().clone();
    let session = Arc::new(Mutex::new(session));
    let bridge = McpBridge::new(session.clone(), store.clone());
    let mcp = StreamableHttpService::new(
        move || Ok(bridge.clone()),
        LocalSessionManager::default().into(),
        StreamableHttpServerConfig::default(),
    );

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/health", get(handle_health))
        .route("/results", get(handle_results))
        .route("/chat", post(handle_chat))
        .route("/search", post(handle_search))
        .nest_service("/mcp", mcp)
        .layer(cors)
        .with_state(AppState {
            config,
            session,
            store,
        })
}

// ============ Error response ============

#[derive(Serialize)]
struct ErrorBody {
    error: ErrorDetail,
}

#[derive(Serialize)]
struct ErrorDetail {
    /// Machine-readable error code (e.g., `"bad_request"`).
    code: String,
    message: String,
}

/// Internal error type that converts into an Axum HTTP response.
struct AppError {
    status: StatusCode,
    code: String,
    message: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = ErrorBody {
            error: ErrorDetail {
                code: self.code,
                message: self.message,
            },
        };
        (self.status, Json(body)).into_response()
    }
}

fn bad_request(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::BAD_REQUEST,
        code: "bad_request".to_string(),
        message: message.into(),
    }
}

fn internal(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::INTERNAL_SERVER_ERROR,
        code: "internal".to_string(),
        message: message.into(),
    }
}

// ============ GET /health ============

#[derive(Serialize)]
struct HealthResponse {
    status: String,
    version: String,
}

async fn handle_health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

// ============ GET /results ============

#[derive(Deserialize)]
struct ResultsQuery {
    limit: Option<usize>,
}

#[derive(Serialize)]
struct ResultsResponse {
    total: usize,
    results: Vec<SearchResult>,
}

async fn handle_results(
    State(state): State<AppState>,
    Query(query): Query<ResultsQuery>,
) -> Result<Json<ResultsResponse>, AppError> {
    let store = state.store.clone();
    let mut results = tokio::task::spawn_blocking(move || store.list_all())
        .await
        .map_err(|e| internal(e.to_string()))?;

    let total = results.len();
    if let Some(limit) = query.limit {
        results.drain(..total.saturating_sub(limit));
    }
    Ok(Json(ResultsResponse { total, results }))
}

// ============ POST /chat ============

#[derive(Deserialize)]
struct ChatRequest {
    message: String,
}

async fn handle_chat(
    State(state): State<AppState>,
    Json(req): Json<ChatRequest>,
) -> Result<Json<Answer>, AppError> {
    if req.message.trim().is_empty() {
        return Err(bad_request("message must not be empty"));
    }
    let mut session = state.session.lock().await;
    let answer = session
        .ask(&req.message)
        .await
        .map_err(|e| internal(e.to_string()))?;
    Ok(Json(answer))
}

// ============ POST /search ============

#[derive(Deserialize)]
struct SearchRequest {
    query: String,
    /// Overrides `[enrich].mode` with `disabled` when false.
    #[serde(default = "default_true")]
    enrich: bool,
}

fn default_true() -> bool {
    true
}

async fn handle_search(
    State(state): State<AppState>,
    Json(req): Json<SearchRequest>,
) -> Result<Json<SearchOutcome>, AppError> {
    let query = req.query.trim();
    if query.is_empty() {
        return Err(bad_request("query must not be empty"));
    }
    let mode = if req.enrich {
        state.config.enrich.mode
    } else {
        EnrichMode::Disabled
    };
    let session = state.session.lock().await;
    Ok(Json(session.search_and_store(query, mode).await))
}
