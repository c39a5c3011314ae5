//! # Stream Controller
//!
//! One controller runs per `POST /api/stream` request, as its own task, and
//! drives this state machine:
//!
//! ```text
//! AwaitingDispatch ──▶ AwaitingCorrelation ──▶ Tailing ──▶ Completed
//!        │                     │                  │
//!        └──────────▶ Failed ◀─┘                  └──▶ TimedOut
//! ```
//!
//! Events go out over an mpsc channel in the order `command_sent`,
//! `session_identified`, `initial_state`, `update`*/`ping`*, then exactly one
//! of `conversation_complete` or `error`. When the receiver is dropped (the
//! HTTP client went away) every wait is abandoned and the task ends.

use serde::{Deserialize, Serialize};
use std::future::Future;
use std::io;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use crate::completion::is_terminal;
use crate::config::Config;
use crate::correlator::{self, Baseline, Correlation, SessionCorrelator};
use crate::entry::LogEntry;
use crate::error::StreamError;
use crate::sessions::{find_session, SessionHandle};
use crate::tailer::LogTailer;
use crate::tmux::Dispatcher;

/// Body of `POST /api/stream`
#[derive(Debug, Clone, Default, Deserialize)]
pub struct StreamRequest {
    #[serde(default)]
    pub command: Option<String>,
    #[serde(default)]
    pub session_id: Option<String>,
    #[serde(default)]
    pub tmux_session: Option<String>,
    #[serde(default)]
    pub tmux_window: Option<String>,
}

/// Events delivered to the client. The SSE event name comes from [`StreamEvent::name`];
/// the payload is the variant's fields as a JSON object.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum StreamEvent {
    CommandSent { command: String },
    SessionIdentified { session_id: String },
    InitialState { entries: Vec<LogEntry> },
    Update { entry: LogEntry },
    Ping { timestamp: f64 },
    ConversationComplete { session_id: String, message: String },
    Error { error: String, kind: &'static str },
}

impl StreamEvent {
    pub fn name(&self) -> &'static str {
        match self {
            StreamEvent::CommandSent { .. } => "command_sent",
            StreamEvent::SessionIdentified { .. } => "session_identified",
            StreamEvent::InitialState { .. } => "initial_state",
            StreamEvent::Update { .. } => "update",
            StreamEvent::Ping { .. } => "ping",
            StreamEvent::ConversationComplete { .. } => "conversation_complete",
            StreamEvent::Error { .. } => "error",
        }
    }

    fn from_error(e: &StreamError) -> Self {
        StreamEvent::Error {
            error: e.to_string(),
            kind: e.kind(),
        }
    }

    fn ping() -> Self {
        StreamEvent::Ping {
            timestamp: chrono::Utc::now().timestamp_millis() as f64 / 1000.0,
        }
    }
}

#[derive(Debug)]
pub enum StreamState {
    AwaitingDispatch,
    /// `baseline` holds each log's size before dispatch; only bytes past it can match
    AwaitingCorrelation { command: String, baseline: Baseline },
    /// `anchor` bounds the initial snapshot when a command was just sent to the session
    Tailing { handle: SessionHandle, anchor: Option<u64> },
    Completed { session_id: String },
    Failed(StreamError),
    TimedOut { session_id: String },
}

/// The client stopped listening
#[derive(Debug)]
struct Disconnected;

/// Shared collaborators handed to every controller
#[derive(Clone)]
pub struct StreamContext {
    pub config: Arc<Config>,
    pub dispatcher: Arc<dyn Dispatcher>,
}

pub struct StreamController {
    ctx: StreamContext,
    request: StreamRequest,
    tx: mpsc::Sender<StreamEvent>,
}

/// Start a controller task and return the receiving end of its event feed.
///
/// A panic inside the controller is reported to the client as an `internal` error.
pub fn spawn_stream(ctx: StreamContext, request: StreamRequest) -> mpsc::Receiver<StreamEvent> {
    let (tx, rx) = mpsc::channel(64);
    let controller = StreamController::new(ctx, request, tx.clone());

    tokio::spawn(async move {
        if let Err(e) = tokio::spawn(controller.run()).await {
            if e.is_panic() {
                error!("Stream task panicked: {}", e);
                let fault = StreamError::Internal("stream task panicked".to_string());
                let _ = tx.send(StreamEvent::from_error(&fault)).await;
            }
        }
    });

    rx
}

impl StreamController {
    pub fn new(ctx: StreamContext, request: StreamRequest, tx: mpsc::Sender<StreamEvent>) -> Self {
        Self { ctx, request, tx }
    }

    /// Drive the state machine until a terminal event has been emitted
    pub async fn run(self) {
        info!(
            "Stream started (command: {}, session: {:?})",
            self.request.command.is_some(),
            self.request.session_id
        );

        let mut state = StreamState::AwaitingDispatch;
        loop {
            let next = match state {
                StreamState::AwaitingDispatch => self.dispatch().await,
                StreamState::AwaitingCorrelation { command, baseline } => {
                    self.correlate(&command, &baseline).await
                }
                StreamState::Tailing { handle, anchor } => self.tail(handle, anchor).await,
                StreamState::Completed { session_id } => {
                    info!("Conversation complete in session {}", session_id);
                    let _ = self
                        .emit(StreamEvent::ConversationComplete {
                            session_id,
                            message: "Assistant has completed its response".to_string(),
                        })
                        .await;
                    return;
                }
                StreamState::Failed(e) => {
                    warn!("Stream failed: {}", e);
                    let _ = self.emit(StreamEvent::from_error(&e)).await;
                    return;
                }
                StreamState::TimedOut { session_id } => {
                    let idle = self.ctx.config.idle_timeout;
                    info!("Stream for session {} idle for {:?}, closing", session_id, idle);
                    let _ = self
                        .emit(StreamEvent::from_error(&StreamError::IdleTimeout(idle)))
                        .await;
                    return;
                }
            };

            match next {
                Ok(s) => state = s,
                Err(Disconnected) => {
                    info!("Client disconnected, stream stopped");
                    return;
                }
            }
        }
    }

    async fn dispatch(&self) -> Result<StreamState, Disconnected> {
        let command = self.request.command.clone().filter(|c| !c.is_empty());

        // Resolve an explicit session before typing anything into the terminal
        let known = match self.request.session_id.as_deref().filter(|s| !s.is_empty()) {
            Some(id) => match find_session(&self.ctx.config.log_dir, id) {
                Some(handle) => Some(handle),
                None => return Ok(StreamState::Failed(StreamError::SessionNotFound(id.to_string()))),
            },
            None => None,
        };

        let next = match (known, &command) {
            // Everything logged after this point belongs to the new command
            (Some(handle), Some(_)) => StreamState::Tailing {
                anchor: Some(handle.size_bytes),
                handle,
            },
            (Some(handle), None) => StreamState::Tailing { handle, anchor: None },
            (None, Some(command)) => StreamState::AwaitingCorrelation {
                command: command.clone(),
                baseline: correlator::baseline(&self.ctx.config.log_dir),
            },
            (None, None) => {
                return Ok(StreamState::Failed(StreamError::BadRequest(
                    "Either command or session_id is required",
                )))
            }
        };

        if let Some(command) = command {
            let session = self
                .request
                .tmux_session
                .clone()
                .unwrap_or_else(|| self.ctx.config.tmux_session.clone());
            let window = self
                .request
                .tmux_window
                .clone()
                .unwrap_or_else(|| self.ctx.config.tmux_window.clone());
            let dispatcher = self.ctx.dispatcher.clone();
            let text = command.clone();

            // tmux send-keys is a short blocking subprocess call
            let sent = self
                .until_closed(tokio::task::spawn_blocking(move || {
                    dispatcher.send(&session, &window, &text)
                }))
                .await?;

            match sent {
                Ok(Ok(())) => {}
                Ok(Err(e)) => return Ok(StreamState::Failed(StreamError::DispatchFailed(e))),
                // Surface at the task boundary like any other controller panic
                Err(e) if e.is_panic() => std::panic::resume_unwind(e.into_panic()),
                Err(e) => return Ok(StreamState::Failed(StreamError::Internal(e.to_string()))),
            }

            self.emit(StreamEvent::CommandSent { command }).await?;
        }

        Ok(next)
    }

    async fn correlate(&self, command: &str, baseline: &Baseline) -> Result<StreamState, Disconnected> {
        let config = &self.ctx.config;
        let correlator = SessionCorrelator::new(
            config.log_dir.clone(),
            config.candidate_files,
            config.discovery_interval,
        );

        let found = self
            .until_closed(correlator.correlate(command, baseline, config.correlation_timeout))
            .await?;

        Ok(match found {
            Some(Correlation { handle, anchor }) => StreamState::Tailing {
                handle,
                anchor: Some(anchor),
            },
            None => StreamState::Failed(StreamError::CorrelationTimeout(
                config.correlation_timeout,
            )),
        })
    }

    async fn tail(&self, handle: SessionHandle, anchor: Option<u64>) -> Result<StreamState, Disconnected> {
        let config = &self.ctx.config;
        info!("Tailing session {} ({})", handle.id, handle.path.display());

        self.emit(StreamEvent::SessionIdentified {
            session_id: handle.id.clone(),
        })
        .await?;

        let tailer = LogTailer::open_at(&handle);
        let snapshot = match anchor {
            Some(limit) => tailer.snapshot_until(limit),
            None => tailer.snapshot(),
        };
        let (entries, mut cursor) = match snapshot {
            Ok(read) => read,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                return Ok(StreamState::Failed(StreamError::SessionNotFound(handle.id)))
            }
            Err(e) => return Ok(StreamState::Failed(e.into())),
        };

        let entries: Vec<LogEntry> = entries.into_iter().filter(|e| !e.is_metadata()).collect();
        debug!("Initial state for {}: {} entries", handle.id, entries.len());
        self.emit(StreamEvent::InitialState { entries }).await?;

        let mut last_growth = Instant::now();
        loop {
            let (batch, next) = match tailer.poll_since(&cursor) {
                Ok(read) => read,
                Err(e) => {
                    warn!("Tail read error for {}: {}", handle.id, e);
                    (Vec::new(), cursor.clone())
                }
            };

            if next.offset > cursor.offset {
                debug!("{} advanced to byte {} ({} lines)", next.session_id, next.offset, batch.len());
                last_growth = Instant::now();
                cursor = next;

                for entry in batch.into_iter().filter(|e| !e.is_metadata()) {
                    let done = is_terminal(&entry);
                    self.emit(StreamEvent::Update { entry }).await?;
                    if done {
                        return Ok(StreamState::Completed {
                            session_id: tailer.session_id().to_string(),
                        });
                    }
                }
                continue;
            }

            if last_growth.elapsed() >= config.idle_timeout {
                return Ok(StreamState::TimedOut { session_id: handle.id });
            }

            self.emit(StreamEvent::ping()).await?;
            self.until_closed(tokio::time::sleep(config.poll_interval)).await?;
        }
    }

    async fn emit(&self, event: StreamEvent) -> Result<(), Disconnected> {
        self.tx.send(event).await.map_err(|_| Disconnected)
    }

    /// Await `fut` unless the client goes away first
    async fn until_closed<F: Future>(&self, fut: F) -> Result<F::Output, Disconnected> {
        tokio::select! {
            out = fut => Ok(out),
            _ = self.tx.closed() => Err(Disconnected),
        }
    }
}
