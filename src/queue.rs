//! Sequenced log of prompt queue items.
//!
//! The `SequencedLog` is the single source of truth for what was admitted and
//! in what order. Every item carries a globally unique, strictly increasing
//! sequence number assigned under the log's lock; clients reconcile their own
//! copies against it by asking for "everything after N".

use std::sync::Mutex;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Current wall-clock time in epoch milliseconds.
pub fn now_epoch_ms() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}

/// Lifecycle status of a queue item.
///
/// `Pending` is initial; `Completed` and `Failed` are terminal. The only
/// writer of the `Pending -> Processing` transition is the worker loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ItemStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

impl ItemStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, ItemStatus::Completed | ItemStatus::Failed)
    }
}

/// A single admitted prompt and its processing outcome.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueueItem {
    pub id: Uuid,
    pub sequence: u64,
    pub prompt: String,
    pub status: ItemStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<String>,
    pub created_at_ms: i64,
    pub updated_at_ms: i64,
}

type ItemObserver = Box<dyn Fn(&QueueItem) + Send + Sync>;

#[derive(Default)]
struct LogState {
    items: Vec<QueueItem>,
    counter: u64,
}

/// Ordered, append-mostly store of every item ever admitted.
///
/// Constructed once at startup and shared via `Arc`; all mutation is
/// serialized through the inner mutex. Observers are invoked synchronously
/// after each committed mutation, in subscription order, with the state lock
/// released — handlers must not block for long.
#[derive(Default)]
pub struct SequencedLog {
    state: Mutex<LogState>,
    on_added: Mutex<Vec<ItemObserver>>,
    on_updated: Mutex<Vec<ItemObserver>>,
}

impl SequencedLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Subscribe to item creation events.
    pub fn subscribe_added(&self, handler: impl Fn(&QueueItem) + Send + Sync + 'static) {
        self.on_added.lock().unwrap().push(Box::new(handler));
    }

    /// Subscribe to item status transitions.
    pub fn subscribe_updated(&self, handler: impl Fn(&QueueItem) + Send + Sync + 'static) {
        self.on_updated.lock().unwrap().push(Box::new(handler));
    }

    fn notify_added(&self, item: &QueueItem) {
        for handler in self.on_added.lock().unwrap().iter() {
            handler(item);
        }
    }

    fn notify_updated(&self, item: &QueueItem) {
        for handler in self.on_updated.lock().unwrap().iter() {
            handler(item);
        }
    }

    /// Append a new pending item, assigning the next sequence number.
    pub fn append(&self, prompt: &str) -> QueueItem {
        let now_ms = now_epoch_ms();
        let item = {
            let mut state = self.state.lock().unwrap();
            state.counter += 1;
            let item = QueueItem {
                id: Uuid::new_v4(),
                sequence: state.counter,
                prompt: prompt.to_string(),
                status: ItemStatus::Pending,
                result: None,
                created_at_ms: now_ms,
                updated_at_ms: now_ms,
            };
            state.items.push(item.clone());
            item
        };
        self.notify_added(&item);
        item
    }

    /// Claim the oldest pending item, transitioning it to `Processing`.
    ///
    /// Single-writer discipline: only the worker loop calls this, which is
    /// what makes "at most one claim per item" hold.
    pub fn claim_next(&self) -> Option<QueueItem> {
        let claimed = {
            let mut state = self.state.lock().unwrap();
            let item = state
                .items
                .iter_mut()
                .find(|item| item.status == ItemStatus::Pending)?;
            item.status = ItemStatus::Processing;
            item.updated_at_ms = now_epoch_ms();
            item.clone()
        };
        self.notify_updated(&claimed);
        Some(claimed)
    }

    /// Apply a status transition (and optional result) to an existing item.
    ///
    /// Returns `None` for an unknown id — a logic error upstream, reported to
    /// the caller rather than panicking.
    pub fn update(
        &self,
        id: Uuid,
        status: ItemStatus,
        result: Option<String>,
    ) -> Option<QueueItem> {
        let updated = {
            let mut state = self.state.lock().unwrap();
            let item = state.items.iter_mut().find(|item| item.id == id)?;
            item.status = status;
            if result.is_some() {
                item.result = result;
            }
            item.updated_at_ms = now_epoch_ms();
            item.clone()
        };
        self.notify_updated(&updated);
        Some(updated)
    }

    /// Look up a single item by id.
    pub fn get(&self, id: Uuid) -> Option<QueueItem> {
        let state = self.state.lock().unwrap();
        state.items.iter().find(|item| item.id == id).cloned()
    }

    /// Point-in-time snapshot of the full history, ascending by sequence.
    pub fn all(&self) -> Vec<QueueItem> {
        self.state.lock().unwrap().items.clone()
    }

    /// All items with a sequence strictly greater than `sequence`, ascending.
    /// This is the gap-fill primitive clients use after missing events.
    pub fn items_after(&self, sequence: u64) -> Vec<QueueItem> {
        let state = self.state.lock().unwrap();
        state
            .items
            .iter()
            .filter(|item| item.sequence > sequence)
            .cloned()
            .collect()
    }

    /// Latest assigned sequence number, 0 if nothing was ever admitted.
    pub fn current_sequence(&self) -> u64 {
        self.state.lock().unwrap().counter
    }
}
