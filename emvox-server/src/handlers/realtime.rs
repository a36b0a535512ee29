//! Per-task realtime watch over WebSocket.
//!
//! One connection watches one task. Frames are rebuilt from storage on a
//! fixed cadence and pushed only when the rendered text changes; the
//! terminal frame is always followed by a normal close.

use std::collections::HashMap;
use std::time::Duration;

use axum::{
    extract::{
        Query, State,
        ws::{CloseFrame, Message, WebSocket, WebSocketUpgrade, close_code},
    },
    http::HeaderMap,
    response::Response,
};
use futures_util::{SinkExt, StreamExt, stream::SplitSink};
use tokio::time::Instant;
use tracing::{debug, warn};

use emvox_core::types::TaskId;

use crate::auth;
use crate::infra::app_state::AppState;

/// Close code for a missing, invalid, or expired access token.
pub const CLOSE_UNAUTHENTICATED: u16 = 4401;
/// Close code when the caller is neither the recording's owner nor admin.
pub const CLOSE_FORBIDDEN: u16 = 4403;
/// Close code for a missing or malformed `taskId`, or an unknown task.
pub const CLOSE_BAD_REQUEST: u16 = 4400;
/// Close code for storage failures during authorization or streaming.
pub const CLOSE_INTERNAL: u16 = 4500;

/// Longest close reason we send; close frame payloads cap at 125 bytes.
const MAX_CLOSE_REASON_CHARS: usize = 80;

/// `GET /ws/tasks` upgrade endpoint.
///
/// Authorization runs after the upgrade completes, so refusals arrive as
/// close frames: 4401 unauthenticated, 4403 not the owner, 4400 bad or
/// unknown task, 4500 internal. A watch that ends because the task
/// reached a terminal status closes with 1000.
pub async fn task_snapshots(
    ws: WebSocketUpgrade,
    Query(params): Query<HashMap<String, String>>,
    headers: HeaderMap,
    State(state): State<AppState>,
) -> Response {
    ws.on_upgrade(move |socket| watch_task(socket, state, params, headers))
}

/// How an authorization refusal is delivered to the client.
#[derive(Debug, PartialEq, Eq)]
pub(crate) struct ClosePolicy {
    pub code: u16,
    pub reason: String,
}

impl ClosePolicy {
    fn deny(code: u16, reason: impl Into<String>) -> Self {
        Self {
            code,
            reason: reason.into(),
        }
    }
}

/// Token first, then the task: a caller who cannot authenticate learns
/// nothing about which task ids exist.
pub(crate) async fn authorize(
    state: &AppState,
    params: &HashMap<String, String>,
    headers: &HeaderMap,
) -> Result<TaskId, ClosePolicy> {
    let Some(token) = auth::websocket_token(params, headers) else {
        return Err(ClosePolicy::deny(
            CLOSE_UNAUTHENTICATED,
            "missing access token",
        ));
    };
    let identity = match state.sessions.lookup(&token).await {
        Ok(Some(identity)) => identity,
        Ok(None) => {
            return Err(ClosePolicy::deny(
                CLOSE_UNAUTHENTICATED,
                "invalid or expired token",
            ));
        }
        Err(err) => {
            warn!(error = %err, "websocket session lookup failed");
            return Err(ClosePolicy::deny(CLOSE_INTERNAL, "authorization failed"));
        }
    };

    let Some(task) = auth::websocket_task_id(params) else {
        return Err(ClosePolicy::deny(
            CLOSE_BAD_REQUEST,
            "missing or malformed taskId",
        ));
    };
    let audio = match state.store.audio_ref(task).await {
        Ok(Some(audio)) => audio,
        Ok(None) => {
            return Err(ClosePolicy::deny(
                CLOSE_BAD_REQUEST,
                format!("task {task} not found"),
            ));
        }
        Err(err) => {
            warn!(task_id = %task, error = %err, "websocket task lookup failed");
            return Err(ClosePolicy::deny(CLOSE_INTERNAL, "task lookup failed"));
        }
    };
    if !identity.can_access(audio.owner_id) {
        return Err(ClosePolicy::deny(
            CLOSE_FORBIDDEN,
            "not the owner of this recording",
        ));
    }
    Ok(task)
}

async fn watch_task(
    socket: WebSocket,
    state: AppState,
    params: HashMap<String, String>,
    headers: HeaderMap,
) {
    match authorize(&state, &params, &headers).await {
        Ok(task) => stream_snapshots(socket, state, task).await,
        Err(close) => reject(socket, close).await,
    }
}

async fn reject(mut socket: WebSocket, close: ClosePolicy) {
    debug!(
        code = close.code,
        reason = %close.reason,
        "refusing realtime watch"
    );
    let _ = socket.send(close_message(close.code, &close.reason)).await;
}

/// Outcome of one push tick.
enum Push {
    /// Non-terminal snapshot handled; keep ticking.
    Kept,
    /// Terminal snapshot pushed (or already current); wind down.
    Terminal,
    /// Task or audio row disappeared mid-watch.
    Gone,
    /// Snapshot rebuild errored.
    BuildFailed,
}

async fn stream_snapshots(socket: WebSocket, state: AppState, task: TaskId) {
    let (mut sender, mut receiver) = socket.split();
    let mut last_sent: Option<String> = None;

    // The first frame goes out immediately so a watcher sees current
    // state on connect instead of waiting out a full interval.
    if !handle_push(&state, task, &mut sender, &mut last_sent).await {
        return;
    }

    let period = Duration::from_millis(state.push_interval_ms);
    let mut ticker = tokio::time::interval_at(Instant::now() + period, period);

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                if !handle_push(&state, task, &mut sender, &mut last_sent).await {
                    return;
                }
            }
            incoming = receiver.next() => {
                match incoming {
                    Some(Ok(Message::Close(_))) | None => return,
                    Some(Err(err)) => {
                        debug!(task_id = %task, error = %err, "watcher socket error");
                        return;
                    }
                    // Watchers have nothing to say; ignore other frames.
                    Some(Ok(_)) => {}
                }
            }
        }
    }
}

/// Runs one push tick and reacts to its outcome. Returns `false` once the
/// watch is over and the socket has been closed.
async fn handle_push(
    state: &AppState,
    task: TaskId,
    sender: &mut SplitSink<WebSocket, Message>,
    last_sent: &mut Option<String>,
) -> bool {
    match push_tick(state, task, sender, last_sent).await {
        Ok(Push::Kept) => true,
        Ok(Push::Terminal) => {
            // The terminal frame is already out; drop the progress entry
            // for this task and end the stream cleanly.
            state.progress.clear(task);
            let _ = sender
                .send(close_message(close_code::NORMAL, "analysis complete"))
                .await;
            false
        }
        Ok(Push::Gone) => {
            let _ = sender
                .send(close_message(CLOSE_BAD_REQUEST, "task no longer exists"))
                .await;
            false
        }
        Ok(Push::BuildFailed) => {
            let _ = sender
                .send(close_message(CLOSE_INTERNAL, "snapshot rebuild failed"))
                .await;
            false
        }
        Err(err) => {
            debug!(task_id = %task, error = %err, "watcher send failed");
            false
        }
    }
}

/// Rebuild the snapshot and push it when its rendered text differs from
/// the previous frame. Identical rebuilds are suppressed byte-for-byte.
async fn push_tick(
    state: &AppState,
    task: TaskId,
    sender: &mut SplitSink<WebSocket, Message>,
    last_sent: &mut Option<String>,
) -> Result<Push, axum::Error> {
    let snapshot = match state.snapshots.build(task).await {
        Ok(Some(snapshot)) => snapshot,
        Ok(None) => return Ok(Push::Gone),
        Err(err) => {
            warn!(task_id = %task, error = %err, "snapshot rebuild failed");
            return Ok(Push::BuildFailed);
        }
    };

    if last_sent.as_deref() != Some(snapshot.text.as_str()) {
        sender
            .send(Message::Text(snapshot.text.clone().into()))
            .await?;
        *last_sent = Some(snapshot.text);
    }

    Ok(if snapshot.terminal {
        Push::Terminal
    } else {
        Push::Kept
    })
}

fn close_message(code: u16, reason: &str) -> Message {
    Message::Close(Some(CloseFrame {
        code,
        reason: sanitize_reason(reason).into(),
    }))
}

fn sanitize_reason(reason: &str) -> String {
    reason
        .chars()
        .filter(|c| !matches!(c, '\r' | '\n' | '\t'))
        .take(MAX_CLOSE_REASON_CHARS)
        .collect()
}
