#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use uuid::Uuid;

use relayq::connection::ConnectionRegistry;
use relayq::protocol::ServerMessage;
use relayq::queue::{ItemStatus, QueueItem, SequencedLog, now_epoch_ms};
use relayq::server::{AppState, create_router};
use relayq::settings::RateLimitSettings;
use relayq::worker::{WorkError, WorkExecutor};

// Helper: enforce a tight timeout for async tests likely to hang
#[macro_export]
macro_rules! with_timeout {
    ($ms:expr, $body:block) => {{
        tokio::time::timeout(std::time::Duration::from_millis($ms), async { $body })
            .await
            .expect("test timed out")
    }};
}

/// Limits generous enough to never reject during a test.
pub fn relaxed_rate_limits() -> RateLimitSettings {
    RateLimitSettings {
        minute_capacity: 10_000,
        minute_leak_rate: 10_000.0,
        second_capacity: 10_000,
        second_leak_rate: 10_000.0,
    }
}

/// A fine tier of exactly one admission per second, minute tier generous.
pub fn strict_second_rate_limits() -> RateLimitSettings {
    RateLimitSettings {
        minute_capacity: 10_000,
        minute_leak_rate: 10_000.0,
        second_capacity: 1,
        second_leak_rate: 1.0,
    }
}

pub fn test_state(
    rate_limit: RateLimitSettings,
    idle_timeout: Duration,
) -> (Arc<SequencedLog>, Arc<ConnectionRegistry>, AppState) {
    let log = Arc::new(SequencedLog::new());
    let registry = Arc::new(ConnectionRegistry::new(rate_limit, idle_timeout));
    let state = AppState::new(Arc::clone(&log), Arc::clone(&registry));
    (log, registry, state)
}

/// Executor returning a fixed response for every prompt.
pub struct StaticExecutor(pub String);

#[async_trait]
impl WorkExecutor for StaticExecutor {
    async fn execute(&self, _prompt: &str) -> Result<String, WorkError> {
        Ok(self.0.clone())
    }
}

/// Executor failing every prompt with a fixed message.
pub struct FailingExecutor(pub String);

#[async_trait]
impl WorkExecutor for FailingExecutor {
    async fn execute(&self, _prompt: &str) -> Result<String, WorkError> {
        Err(WorkError::Failed(self.0.clone()))
    }
}

/// Executor recording the prompts it saw, in order.
#[derive(Default)]
pub struct RecordingExecutor {
    pub seen: Mutex<Vec<String>>,
}

#[async_trait]
impl WorkExecutor for RecordingExecutor {
    async fn execute(&self, prompt: &str) -> Result<String, WorkError> {
        self.seen.lock().unwrap().push(prompt.to_string());
        Ok(format!("done: {prompt}"))
    }
}

/// Build a synthetic item for replica tests.
pub fn make_item(sequence: u64, status: ItemStatus, updated_at_ms: i64) -> QueueItem {
    QueueItem {
        id: Uuid::new_v4(),
        sequence,
        prompt: format!("prompt-{sequence}"),
        status,
        result: None,
        created_at_ms: updated_at_ms,
        updated_at_ms,
    }
}

/// Poll the log until the item reaches the wanted status.
pub async fn wait_for_status(log: &SequencedLog, id: Uuid, status: ItemStatus) -> QueueItem {
    loop {
        if let Some(item) = log.get(id) {
            if item.status == status {
                return item;
            }
        }
        tokio::time::sleep(Duration::from_millis(2)).await;
    }
}

/// Serve the router on an ephemeral local port.
pub async fn spawn_server(state: AppState) -> SocketAddr {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let app = create_router(state);
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    addr
}

pub type WsClient = WebSocketStream<MaybeTlsStream<TcpStream>>;

pub async fn connect_ws(addr: SocketAddr) -> WsClient {
    let (ws, _) = connect_async(format!("ws://{addr}/api/socketio"))
        .await
        .expect("websocket connect");
    ws
}

/// Next protocol message from the socket; None once the server closed it.
pub async fn recv_server_message(ws: &mut WsClient) -> Option<ServerMessage> {
    loop {
        match ws.next().await? {
            Ok(WsMessage::Text(text)) => {
                return Some(serde_json::from_str(&text).expect("valid server message"));
            }
            Ok(WsMessage::Close(_)) => return None,
            Ok(_) => continue,
            Err(_) => return None,
        }
    }
}

/// Drain messages until `pred` matches, returning the match.
pub async fn recv_until(
    ws: &mut WsClient,
    mut pred: impl FnMut(&ServerMessage) -> bool,
) -> ServerMessage {
    loop {
        let msg = recv_server_message(ws)
            .await
            .expect("connection closed while waiting for message");
        if pred(&msg) {
            return msg;
        }
    }
}

pub fn assert_recent_ms(ts_ms: i64) {
    let now = now_epoch_ms();
    assert!(
        (now - ts_ms).abs() < 60_000,
        "timestamp {ts_ms} not near now {now}"
    );
}
