//! # Goose Relay
//!
//! HTTP bridge to a Goose agent running in a shared tmux pane.
//!
//! This server provides:
//! - Keystroke dispatch into the tmux pane hosting Goose
//! - Listing and reading of Goose session logs (`~/.local/share/goose/sessions/*.jsonl`)
//! - A per-request SSE feed that sends a command, finds the session log it
//!   lands in, and streams new log entries until the assistant has replied
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────┐  POST   ┌──────────────┐ send-keys ┌─────────────────┐
//! │   Client    │────────▶│  Axum HTTP   │──────────▶│  tmux pane      │
//! │             │         │  Server      │           │  (goose)        │
//! └─────────────┘         └──────────────┘           └─────────────────┘
//!       ▲                        │                           │ appends
//!       │ SSE                    ▼                           ▼
//!       │                 ┌──────────────┐  polls    ┌─────────────────┐
//!       └─────────────────│   Stream     │──────────▶│  sessions/      │
//!                         │  Controller  │           │  (JSONL files)  │
//!                         └──────────────┘           └─────────────────┘
//! ```
//!
//! ## API Endpoints
//!
//! - `GET /health` - Server health check
//! - `POST /api/terminal/send` - Type a command into the tmux pane
//! - `GET /api/terminal/sessions` - List tmux sessions
//! - `GET /api/sessions` - List session logs, newest first
//! - `GET /api/sessions/{id}` - Read one session log (`?format=raw`, `?cursor=`)
//! - `GET /api/sessions/latest/id` - Id of the most recently modified log
//! - `POST /api/stream` - Send a command and stream the conversation (SSE)

mod completion;
mod config;
mod correlator;
mod entry;
mod error;
mod sessions;
mod stream;
mod tailer;
mod tmux;

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{
        sse::{Event, KeepAlive, Sse},
        IntoResponse, Json, Response,
    },
    routing::{get, post},
    Router,
};
use futures::stream::Stream;
use serde::{Deserialize, Serialize};
use std::{convert::Infallible, fs, io, net::SocketAddr, sync::Arc, time::Instant};
use tokio_stream::{wrappers::ReceiverStream, StreamExt};
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::config::Config;
use crate::entry::LogEntry;
use crate::sessions::SessionInfo;
use crate::stream::{spawn_stream, StreamContext, StreamRequest};
use crate::tailer::{Cursor, LogTailer};
use crate::tmux::{Dispatcher, TmuxDispatcher, TmuxSession};

// ============================================================================
// App State - Shared state across all request handlers
// ============================================================================

/// Global application state shared across all HTTP handlers.
/// Streams get their own controller; nothing here is mutated after startup.
struct AppState {
    start_time: Instant,
    config: Arc<Config>,
    dispatcher: Arc<dyn Dispatcher>, // Sends keystrokes (tmux in production)
    tmux: TmuxDispatcher,            // Session listing
}

impl AppState {
    fn stream_context(&self) -> StreamContext {
        StreamContext {
            config: self.config.clone(),
            dispatcher: self.dispatcher.clone(),
        }
    }
}

/// Error body mirroring `{"detail": "..."}`
struct ApiError {
    status: StatusCode,
    detail: String,
}

impl ApiError {
    fn not_found(detail: String) -> Self {
        Self { status: StatusCode::NOT_FOUND, detail }
    }

    fn internal(detail: impl ToString) -> Self {
        Self {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            detail: detail.to_string(),
        }
    }
}

impl From<io::Error> for ApiError {
    fn from(e: io::Error) -> Self {
        tracing::warn!("Session log I/O error: {}", e);
        ApiError::internal(e)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(serde_json::json!({ "detail": self.detail }))).into_response()
    }
}

// ============================================================================
// Health Endpoint
// ============================================================================

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    uptime_secs: u64,
    version: &'static str,
    log_dir: String,
}

async fn health(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        uptime_secs: state.start_time.elapsed().as_secs(),
        version: env!("CARGO_PKG_VERSION"),
        log_dir: state.config.log_dir.display().to_string(),
    })
}

// ============================================================================
// Terminal Endpoints
// ============================================================================

#[derive(Deserialize)]
struct TerminalCommand {
    command: String,
    session: Option<String>,
    window: Option<String>,
}

#[derive(Serialize)]
struct TerminalSendResponse {
    success: bool,
    session: String,
    window: String,
    command: String,
}

async fn send_terminal_input(
    State(state): State<Arc<AppState>>,
    Json(req): Json<TerminalCommand>,
) -> Result<Json<TerminalSendResponse>, ApiError> {
    let session = req.session.unwrap_or_else(|| state.config.tmux_session.clone());
    let window = req.window.unwrap_or_else(|| state.config.tmux_window.clone());

    let dispatcher = state.dispatcher.clone();
    let (s, w, text) = (session.clone(), window.clone(), req.command.clone());
    tokio::task::spawn_blocking(move || dispatcher.send(&s, &w, &text))
        .await
        .map_err(ApiError::internal)?
        .map_err(|e| ApiError::internal(format!("Failed to send command: {}", e)))?;

    tracing::info!("Sent command to {}:{}", session, window);
    Ok(Json(TerminalSendResponse {
        success: true,
        session,
        window,
        command: req.command,
    }))
}

#[derive(Serialize)]
struct TmuxSessionsResponse {
    sessions: Vec<TmuxSession>,
}

async fn list_tmux_sessions(
    State(state): State<Arc<AppState>>,
) -> Result<Json<TmuxSessionsResponse>, ApiError> {
    let tmux = state.tmux.clone();
    let sessions = tokio::task::spawn_blocking(move || tmux.list_sessions())
        .await
        .map_err(ApiError::internal)?;
    Ok(Json(TmuxSessionsResponse { sessions }))
}

// ============================================================================
// Session Log Endpoints
// ============================================================================

async fn list_sessions(State(state): State<Arc<AppState>>) -> Result<Json<Vec<SessionInfo>>, ApiError> {
    let sessions = sessions::list_sessions(&state.config.log_dir)?;
    Ok(Json(sessions.iter().map(|s| s.info()).collect()))
}

#[derive(Deserialize, Default)]
struct SessionLogQuery {
    /// "json" (default) or "raw"
    #[serde(default)]
    format: Option<String>,
    /// Only return entries after this opaque cursor (from a previous response)
    #[serde(default)]
    cursor: Option<String>,
}

/// Complete (or incremental) decoded log for a session
#[derive(Serialize)]
struct SessionLog {
    session_id: String,
    entries: Vec<LogEntry>,
    /// Opaque cursor for the next incremental read
    cursor: String,
}

#[derive(Serialize)]
struct RawSessionLog {
    raw_content: String,
}

async fn get_session_log(
    State(state): State<Arc<AppState>>,
    Path(session_id): Path<String>,
    Query(query): Query<SessionLogQuery>,
) -> Result<Response, ApiError> {
    let handle = sessions::find_session(&state.config.log_dir, &session_id)
        .ok_or_else(|| ApiError::not_found(format!("Session log {} not found", session_id)))?;

    if query.format.as_deref() == Some("raw") {
        let raw_content = fs::read_to_string(&handle.path)?;
        return Ok(Json(RawSessionLog { raw_content }).into_response());
    }

    let tailer = LogTailer::open_at(&handle);
    let (entries, cursor) = match query.cursor.as_deref() {
        Some(token) => {
            let since = Cursor::from_token(&handle.id, token).ok_or_else(|| ApiError {
                status: StatusCode::BAD_REQUEST,
                detail: "Invalid cursor".to_string(),
            })?;
            tailer.poll_since(&since)?
        }
        None => tailer.snapshot()?,
    };

    Ok(Json(SessionLog {
        session_id: handle.id,
        entries,
        cursor: cursor.token(),
    })
    .into_response())
}

#[derive(Serialize)]
struct LatestSessionResponse {
    session_id: String,
}

async fn latest_session_id(
    State(state): State<Arc<AppState>>,
) -> Result<Json<LatestSessionResponse>, ApiError> {
    let latest = sessions::latest_session(&state.config.log_dir)?
        .ok_or_else(|| ApiError::not_found("No session logs found".to_string()))?;
    Ok(Json(LatestSessionResponse { session_id: latest.id }))
}

// ============================================================================
// Conversation Stream Endpoint
// ============================================================================

async fn stream_conversation(
    State(state): State<Arc<AppState>>,
    Json(req): Json<StreamRequest>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let rx = spawn_stream(state.stream_context(), req);

    // Dropping this stream (client disconnect) closes the channel and stops the controller
    let stream = ReceiverStream::new(rx).map(|event| {
        let data = serde_json::to_string(&event).unwrap_or_else(|_| "{}".to_string());
        Ok(Event::default().event(event.name()).data(data))
    });

    Sse::new(stream).keep_alive(KeepAlive::default())
}

// ============================================================================
// Main
// ============================================================================

fn router(state: Arc<AppState>) -> Router {
    Router::new()
        // Health
        .route("/health", get(health))
        // Terminal
        .route("/api/terminal/send", post(send_terminal_input))
        .route("/api/terminal/sessions", get(list_tmux_sessions))
        // Session logs
        .route("/api/sessions", get(list_sessions))
        .route("/api/sessions/latest/id", get(latest_session_id))
        .route("/api/sessions/{session_id}", get(get_session_log))
        // Streaming conversation
        .route("/api/stream", post(stream_conversation))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

#[tokio::main]
async fn main() -> io::Result<()> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("goose_relay=info,tower_http=info")),
        )
        .init();

    let config = Config::from_env();
    tracing::info!(
        "Watching session logs in {} (tmux target {}:{})",
        config.log_dir.display(),
        config.tmux_session,
        config.tmux_window
    );

    let port = config.port;
    let state = Arc::new(AppState {
        start_time: Instant::now(),
        config: Arc::new(config),
        dispatcher: Arc::new(TmuxDispatcher::new()),
        tmux: TmuxDispatcher::new(),
    });

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    tracing::info!("Goose relay v{} listening on {}", env!("CARGO_PKG_VERSION"), addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, router(state)).await
}
