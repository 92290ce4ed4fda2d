//! Wire contract between server and clients.
//!
//! JSON messages tagged by an `event` field, mirroring the original
//! socket.io event names. The enqueue response is correlated to its request
//! via a client-supplied opaque `requestId`, because the direct response and
//! the broadcast ride independent channels and may arrive out of order.

use serde::{Deserialize, Serialize};

use crate::queue::{ItemStatus, QueueItem};

/// Transition tag carried on `itemUpdated` events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UpdateKind {
    Created,
    Pending,
    Processing,
    Completed,
    Failed,
}

impl UpdateKind {
    pub fn from_status(status: ItemStatus) -> Self {
        match status {
            ItemStatus::Pending => UpdateKind::Pending,
            ItemStatus::Processing => UpdateKind::Processing,
            ItemStatus::Completed => UpdateKind::Completed,
            ItemStatus::Failed => UpdateKind::Failed,
        }
    }
}

/// Messages a client sends to the server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "camelCase")]
pub enum ClientMessage {
    #[serde(rename_all = "camelCase")]
    EnqueueItem { prompt: String, request_id: String },
    #[serde(rename_all = "camelCase")]
    RequestItemsAfter { sequence: u64 },
    GetCurrentSequence,
}

/// Messages the server sends to a client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "camelCase")]
pub enum ServerMessage {
    /// Snapshot or gap-fill batch, ascending by sequence.
    ItemsSync { items: Vec<QueueItem> },
    /// One item was created or changed status.
    #[serde(rename_all = "camelCase")]
    ItemUpdated {
        #[serde(rename = "type")]
        kind: UpdateKind,
        item: QueueItem,
    },
    /// Direct admission response for an `enqueueItem` request.
    #[serde(rename_all = "camelCase")]
    EnqueueResult {
        success: bool,
        #[serde(skip_serializing_if = "Option::is_none")]
        error: Option<String>,
        /// Epoch millis of the earliest retry instant, present on rejection.
        #[serde(skip_serializing_if = "Option::is_none")]
        next_reset_time: Option<i64>,
        request_id: String,
    },
    #[serde(rename_all = "camelCase")]
    CurrentSequence { sequence: u64 },
}

impl ServerMessage {
    pub fn enqueue_ok(request_id: String) -> Self {
        ServerMessage::EnqueueResult {
            success: true,
            error: None,
            next_reset_time: None,
            request_id,
        }
    }

    pub fn enqueue_rejected(error: String, next_reset_ms: i64, request_id: String) -> Self {
        ServerMessage::EnqueueResult {
            success: false,
            error: Some(error),
            next_reset_time: Some(next_reset_ms),
            request_id,
        }
    }
}
