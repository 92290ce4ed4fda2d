//! Client-side reconciliation of queue history.
//!
//! The fan-out channel is at-least-once: a client may miss events across a
//! reconnect or a lagged stream. `ClientReplica` keeps a local copy
//! consistent by deduplicating on id, keeping items sorted by sequence, and
//! flagging sequence discontinuities so the caller can request a gap-fill
//! with `requestItemsAfter`.

use uuid::Uuid;

use crate::protocol::{ServerMessage, UpdateKind};
use crate::queue::QueueItem;

/// What the caller should do after applying an incoming message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplicaAction {
    None,
    /// A gap was detected; request all items after this sequence.
    RequestAfter(u64),
}

/// A client's local, eventually consistent copy of the server log.
#[derive(Debug, Default)]
pub struct ClientReplica {
    items: Vec<QueueItem>,
}

impl ClientReplica {
    pub fn new() -> Self {
        Self::default()
    }

    /// Highest sequence this replica has seen, 0 when empty.
    pub fn last_sequence(&self) -> u64 {
        self.items.last().map(|item| item.sequence).unwrap_or(0)
    }

    pub fn items(&self) -> &[QueueItem] {
        &self.items
    }

    pub fn get(&self, id: Uuid) -> Option<&QueueItem> {
        self.items.iter().find(|item| item.id == id)
    }

    /// Insert or replace by id, then restore sequence order.
    ///
    /// An existing entry is only replaced by a strictly-or-equally newer
    /// mutation, which makes reconciliation order-independent when updates
    /// arrive shuffled.
    fn upsert(&mut self, incoming: QueueItem) {
        match self.items.iter_mut().find(|item| item.id == incoming.id) {
            Some(existing) => {
                if incoming.updated_at_ms >= existing.updated_at_ms {
                    *existing = incoming;
                }
            }
            None => {
                self.items.push(incoming);
                self.items.sort_by_key(|item| item.sequence);
            }
        }
    }

    /// Merge a snapshot or gap-fill batch.
    pub fn apply_sync(&mut self, items: Vec<QueueItem>) {
        for item in items {
            self.upsert(item);
        }
    }

    /// Apply one incremental update, detecting sequence gaps. Any incoming
    /// item whose sequence is more than one past the last known sequence
    /// means events were missed in between.
    pub fn apply_update(&mut self, _kind: UpdateKind, item: QueueItem) -> ReplicaAction {
        let last_known = self.last_sequence();
        let gap = item.sequence > last_known + 1;
        self.upsert(item);
        if gap {
            ReplicaAction::RequestAfter(last_known)
        } else {
            ReplicaAction::None
        }
    }

    /// Feed any server message through the replica.
    pub fn apply_message(&mut self, message: ServerMessage) -> ReplicaAction {
        match message {
            ServerMessage::ItemsSync { items } => {
                self.apply_sync(items);
                ReplicaAction::None
            }
            ServerMessage::ItemUpdated { kind, item } => self.apply_update(kind, item),
            ServerMessage::EnqueueResult { .. } | ServerMessage::CurrentSequence { .. } => {
                ReplicaAction::None
            }
        }
    }
}
