//! Transport layer: websocket endpoint plus admin REST API.
//!
//! One axum router serves both surfaces. The websocket handler owns a
//! connection's lifecycle: snapshot on connect, fan-out of log events,
//! admission of enqueue requests through the connection's buckets, and idle
//! eviction. The REST endpoints share the same log but bypass the
//! per-connection rate limiter (they have no connection).

use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{
        State, WebSocketUpgrade,
        ws::{Message, WebSocket},
    },
    http::StatusCode,
    response::IntoResponse,
    routing::get,
};
use futures::stream::SplitSink;
use futures::{SinkExt, StreamExt};
use serde::Deserialize;
use serde_json::json;
use tokio::sync::broadcast;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::connection::{ConnectionHandle, ConnectionRegistry};
use crate::protocol::{ClientMessage, ServerMessage, UpdateKind};
use crate::queue::{QueueItem, SequencedLog};

/// Capacity of the fan-out channel. A receiver that falls further behind
/// than this sees a lag error and relies on client-side gap-fill.
const EVENT_CHANNEL_CAPACITY: usize = 256;

#[derive(Clone)]
pub struct AppState {
    pub log: Arc<SequencedLog>,
    pub registry: Arc<ConnectionRegistry>,
    pub events: broadcast::Sender<ServerMessage>,
}

impl AppState {
    /// Wire the log's observers into a broadcast channel for fan-out.
    /// Observers run synchronously on the mutation path, so they do nothing
    /// but hand the event off.
    pub fn new(log: Arc<SequencedLog>, registry: Arc<ConnectionRegistry>) -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);

        let tx = events.clone();
        log.subscribe_added(move |item| {
            let _ = tx.send(ServerMessage::ItemUpdated {
                kind: UpdateKind::Created,
                item: item.clone(),
            });
        });

        let tx = events.clone();
        log.subscribe_updated(move |item| {
            let _ = tx.send(ServerMessage::ItemUpdated {
                kind: UpdateKind::from_status(item.status),
                item: item.clone(),
            });
        });

        Self {
            log,
            registry,
            events,
        }
    }
}

pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/api/socketio", get(ws_handler))
        .route("/api/queue", get(list_items_handler).post(enqueue_handler))
        .route("/healthz", get(healthz_handler))
        .with_state(state)
}

async fn healthz_handler() -> impl IntoResponse {
    StatusCode::OK
}

async fn list_items_handler(State(state): State<AppState>) -> Json<Vec<QueueItem>> {
    Json(state.log.all())
}

#[derive(Deserialize)]
struct EnqueueBody {
    prompt: Option<String>,
}

async fn enqueue_handler(
    State(state): State<AppState>,
    Json(body): Json<EnqueueBody>,
) -> impl IntoResponse {
    match body.prompt {
        Some(prompt) if !prompt.trim().is_empty() => {
            let item = state.log.append(&prompt);
            (StatusCode::CREATED, Json(item)).into_response()
        }
        _ => (
            StatusCode::BAD_REQUEST,
            Json(json!({ "error": "prompt is required and must be a non-empty string" })),
        )
            .into_response(),
    }
}

async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

type WsSender = SplitSink<WebSocket, Message>;

async fn send_message(sender: &mut WsSender, message: &ServerMessage) -> Result<(), axum::Error> {
    let json = serde_json::to_string(message).map_err(axum::Error::new)?;
    sender.send(Message::Text(json)).await
}

/// One connection's lifecycle, from upgrade to cleanup. A fault here ends
/// this connection only; the worker and other connections are unaffected.
async fn handle_socket(socket: WebSocket, state: AppState) {
    let mut handle = state.registry.register();
    let mut events = state.events.subscribe();
    info!(connection = %handle.id, "client connected");

    let (mut sender, mut receiver) = socket.split();

    // Full history snapshot before any incremental events.
    let snapshot = ServerMessage::ItemsSync {
        items: state.log.all(),
    };
    if send_message(&mut sender, &snapshot).await.is_err() {
        state.registry.remove(handle.id);
        return;
    }

    let mut deadline = Instant::now() + handle.idle_timeout;

    loop {
        let idle = tokio::time::sleep_until(deadline);
        tokio::pin!(idle);

        tokio::select! {
            _ = &mut idle => {
                info!(connection = %handle.id, "idle timeout, disconnecting");
                let _ = sender.send(Message::Close(None)).await;
                break;
            }

            event = events.recv() => match event {
                Ok(message) => {
                    if send_message(&mut sender, &message).await.is_err() {
                        break;
                    }
                }
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    // The client heals this itself via requestItemsAfter.
                    warn!(connection = %handle.id, skipped, "event stream lagged");
                }
                Err(broadcast::error::RecvError::Closed) => break,
            },

            inbound = receiver.next() => match inbound {
                Some(Ok(Message::Text(text))) => {
                    match serde_json::from_str::<ClientMessage>(&text) {
                        Ok(message) => {
                            match handle_client_message(&state, &mut handle, &mut sender, message).await {
                                // Only admitted activity re-arms the idle deadline.
                                Ok(true) => deadline = Instant::now() + handle.idle_timeout,
                                Ok(false) => {}
                                Err(_) => break,
                            }
                        }
                        Err(e) => {
                            debug!(connection = %handle.id, error = %e, "ignoring unparseable message");
                        }
                    }
                }
                Some(Ok(Message::Close(_))) | None => break,
                Some(Ok(_)) => {} // ping/pong and binary frames carry no protocol traffic
                Some(Err(e)) => {
                    debug!(connection = %handle.id, error = %e, "socket error");
                    break;
                }
            }
        }
    }

    state.registry.remove(handle.id);
    info!(connection = %handle.id, "client disconnected");
}

/// Dispatch one inbound message. Returns whether it counted as admitted
/// activity; `Err` means the reply could not be delivered.
async fn handle_client_message(
    state: &AppState,
    handle: &mut ConnectionHandle,
    sender: &mut WsSender,
    message: ClientMessage,
) -> Result<bool, axum::Error> {
    match message {
        ClientMessage::EnqueueItem { prompt, request_id } => {
            let decision = handle.bucket.try_consume();
            if !decision.allowed {
                debug!(connection = %handle.id, "enqueue rejected by rate limit");
                let reply = ServerMessage::enqueue_rejected(
                    "rate limit exceeded".to_string(),
                    decision.next_reset_ms,
                    request_id,
                );
                send_message(sender, &reply).await?;
                return Ok(false);
            }

            state.registry.touch(handle.id);
            let item = state.log.append(&prompt);
            debug!(connection = %handle.id, sequence = item.sequence, "enqueued item");

            // The `created` broadcast fans out through the log observer; this
            // is only the direct, request-correlated response.
            send_message(sender, &ServerMessage::enqueue_ok(request_id)).await?;
            Ok(true)
        }

        ClientMessage::RequestItemsAfter { sequence } => {
            let reply = ServerMessage::ItemsSync {
                items: state.log.items_after(sequence),
            };
            send_message(sender, &reply).await?;
            Ok(false)
        }

        ClientMessage::GetCurrentSequence => {
            let reply = ServerMessage::CurrentSequence {
                sequence: state.log.current_sequence(),
            };
            send_message(sender, &reply).await?;
            Ok(false)
        }
    }
}

/// Run the server until the shutdown channel fires. Failure to bind is the
/// one fatal startup error and is propagated to the caller.
pub async fn run_server(
    addr: SocketAddr,
    state: AppState,
    mut shutdown: broadcast::Receiver<()>,
) -> anyhow::Result<()> {
    let app = create_router(state);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(%addr, "listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            let _ = shutdown.recv().await;
            info!("server shutting down");
        })
        .await?;

    Ok(())
}
