//! HTTP server.
//!
//! Serves the static site, the chat API and the contact relay.
//!
//! # Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `GET`  | `/`, `/projects`, ... | Static pages from `[server.pages]` |
//! | `GET`  | `/favicon.ico` | Site icon |
//! | `GET`  | `/frontend/*` | Static assets |
//! | `GET`  | `/health` | Readiness report |
//! | `GET`  | `/sessions` | Session sidebar listing |
//! | `GET`  | `/sessions/{id}` | Full session |
//! | `DELETE` | `/sessions/{id}` | Delete a session |
//! | `POST` | `/query` | Run one chat turn |
//! | `POST` | `/contact/submit` | Relay the contact form |
//!
//! # Error Contract
//!
//! ```json
//! { "error": { "code": "not_found", "message": "Session not found" },
//!   "detail": "Session not found" }
//! ```
//!
//! Error codes: `bad_request` (400), `not_found` (404), `internal` (500),
//! `mail_error` (500).
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
use serde::Serialize;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::services::{ServeDir, ServeFile};

use crate::app::AppContext;
use crate::chat::ChatService;
use crate::contact::ContactForm;
use crate::error::is_session_not_found;
use crate::index::VectorIndex;
use crate::models::{ChatSession, QueryRequest, QueryResponse, SessionSummary};

#[derive(Clone)]
struct AppState {
    chat: ChatService,
}

impl AppState {
    fn ctx(&self) -> &AppContext {
        self.chat.context()
    }
}

/// Start the server on `[server].bind`. Runs until the process is terminated.
pub async fn run_server(ctx: Arc<AppContext>) -> anyhow::Result<()> {
    let bind_addr = ctx.config.server.bind.clone();
    let sealed = ctx.config.server.sealed;
    let app = router(ctx);

    println!("sqlchat listening on http://{}", bind_addr);
    if sealed {
        println!("  sealed: /query answers ACCESS DENIED");
    }

    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    axum::serve(listener, app).await?;
    Ok(())
}

/// Build the application router.
pub fn router(ctx: Arc<AppContext>) -> Router {
    let frontend = ctx.config.server.frontend_dir.clone();
    let pages = ctx.config.server.pages.clone();
    let favicon = frontend.join(&ctx.config.server.favicon);
    let state = AppState {
        chat: ChatService::new(ctx),
    };

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let mut app = Router::new()
        .route("/health", get(handle_health))
        .route("/sessions", get(handle_list_sessions))
        .route(
            "/sessions/{id}",
            get(handle_get_session).delete(handle_delete_session),
        )
        .route("/query", post(handle_query))
        .route("/contact/submit", post(handle_contact));

    for (route, file) in pages {
        app = app.route_service(&route, ServeFile::new(frontend.join(file)));
    }

    app.route_service("/favicon.ico", ServeFile::new(favicon))
        .nest_service("/frontend", ServeDir::new(frontend))
        .layer(cors)
        .with_state(state)
}

// ============ Error response ============

#[derive(Serialize)]
struct ErrorBody {
    error: ErrorDetail,
    /// Same text as `error.message`, for clients that read `detail`.
    detail: String,
}

#[derive(Serialize)]
struct ErrorDetail {
    code: String,
    message: String,
}

struct AppError {
    status: StatusCode,
    code: String,
    message: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = ErrorBody {
            detail: self.message.clone(),
            error: ErrorDetail {
                code: self.code,
                message: self.message,
            },
        };
        (self.status, Json(body)).into_response()
    }
}

fn not_found(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::NOT_FOUND,
        code: "not_found".to_string(),
        message: message.into(),
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

fn mail_error(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::INTERNAL_SERVER_ERROR,
        code: "mail_error".to_string(),
        message: message.into(),
    }
}

/// Session lookups: not-found → 404, anything else → 500.
fn session_error(err: anyhow::Error) -> AppError {
    if is_session_not_found(&err) {
        not_found("Session not found")
    } else {
        internal(format!("{:#}", err))
    }
}

// ============ GET /health ============

#[derive(Serialize)]
struct HealthResponse {
    status: String,
    service: String,
    version: String,
    sealed: bool,
    retrieval_available: bool,
    embedding_provider: String,
    api_key_present: bool,
    query_engine_initialized: bool,
    index_path: String,
    index_files_exist: bool,
    chat_data_exists: bool,
    frontend_dir: String,
    deployment_ready: bool,
}

async fn handle_health(State(state): State<AppState>) -> Json<HealthResponse> {
    let ctx = state.ctx();
    let index_dir = &ctx.config.corpus.index_dir;
    let api_key_present = ctx.config.llm.api_key().is_some();
    let index_files_exist = VectorIndex::files_exist(index_dir);
    let initialized = ctx.init.query_engine_initialized;

    Json(HealthResponse {
        status: "healthy".to_string(),
        service: "sqlchat".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        sealed: ctx.config.server.sealed,
        retrieval_available: ctx.retriever.is_some(),
        embedding_provider: ctx.config.embedding.provider.clone(),
        api_key_present,
        query_engine_initialized: initialized,
        index_path: index_dir.display().to_string(),
        index_files_exist,
        chat_data_exists: ctx.config.storage.chat_dir.exists(),
        frontend_dir: ctx.config.server.frontend_dir.display().to_string(),
        deployment_ready: initialized && api_key_present && index_files_exist,
    })
}

// ============ Sessions ============

#[derive(Serialize)]
struct SessionListResponse {
    sessions: Vec<SessionSummary>,
}

async fn handle_list_sessions(
    State(state): State<AppState>,
) -> Result<Json<SessionListResponse>, AppError> {
    let sessions = state
        .ctx()
        .sessions
        .list()
        .await
        .map_err(|e| internal(format!("{:#}", e)))?;
    Ok(Json(SessionListResponse { sessions }))
}

async fn handle_get_session(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<ChatSession>, AppError> {
    let session = state.ctx().sessions.load(&id).await.map_err(session_error)?;
    Ok(Json(session))
}

#[derive(Serialize)]
struct MessageResponse {
    message: String,
}

async fn handle_delete_session(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<MessageResponse>, AppError> {
    state.ctx().sessions.delete(&id).await.map_err(session_error)?;
    Ok(Json(MessageResponse {
        message: "Session deleted successfully".to_string(),
    }))
}

// ============ POST /query ============

async fn handle_query(
    State(state): State<AppState>,
    payload: Result<Json<QueryRequest>, JsonRejection>,
) -> Result<Json<QueryResponse>, AppError> {
    let sealed = state.ctx().config.server.sealed;
    // a sealed server denies every body, well-formed or not
    let request = match payload {
        Ok(Json(request)) => request,
        Err(_) if sealed => QueryRequest::default(),
        Err(rejection) => return Err(bad_request(rejection.body_text())),
    };
    if request.message.trim().is_empty() && !sealed {
        return Err(bad_request("message must not be empty"));
    }
    match state.chat.handle_query(request).await {
        Ok(response) => Ok(Json(response)),
        Err(e) if is_session_not_found(&e) => Err(not_found("Session not found")),
        Err(e) => {
            tracing::error!("Error processing query: {:#}", e);
            Err(internal(format!("Error processing query: {:#}", e)))
        }
    }
}

// ============ POST /contact/submit ============

#[derive(Serialize)]
struct ContactResponse {
    status: String,
    message: String,
}

async fn handle_contact(
    State(state): State<AppState>,
    Json(form): Json<ContactForm>,
) -> Result<Json<ContactResponse>, AppError> {
    match state.ctx().mailer.send(&form).await {
        Ok(()) => Ok(Json(ContactResponse {
            status: "ok".to_string(),
            message: "Your message was sent. Thanks!".to_string(),
        })),
        Err(e) => {
            tracing::warn!("Contact relay failed: {:#}", e);
            Err(mail_error(format!("Failed to send message: {:#}", e)))
        }
    }
}
