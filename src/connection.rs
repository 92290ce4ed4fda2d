//! Live connection tracking.
//!
//! The registry hands each new connection an id, a fresh pair of rate limit
//! buckets, and the idle timeout to enforce. Buckets travel with the handle
//! into the connection's handler task — they are never shared across
//! connections — so the registry itself only keeps bookkeeping metadata.
//! Eviction is resource cleanup only; the sequenced log is unaffected.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use uuid::Uuid;

use crate::queue::now_epoch_ms;
use crate::rate_limit::DualLeakyBucket;
use crate::settings::RateLimitSettings;

pub type ConnectionId = Uuid;

/// Registry-side metadata for one live connection.
#[derive(Debug, Clone)]
pub struct ConnectionInfo {
    pub connected_at_ms: i64,
    pub last_activity_ms: i64,
}

/// Per-connection state moved into the handler task.
pub struct ConnectionHandle {
    pub id: ConnectionId,
    pub bucket: DualLeakyBucket,
    pub idle_timeout: Duration,
}

/// Tracks live connections and mints their per-connection limiter state.
pub struct ConnectionRegistry {
    rate_limit: RateLimitSettings,
    idle_timeout: Duration,
    connections: Mutex<HashMap<ConnectionId, ConnectionInfo>>,
}

impl ConnectionRegistry {
    pub fn new(rate_limit: RateLimitSettings, idle_timeout: Duration) -> Self {
        Self {
            rate_limit,
            idle_timeout,
            connections: Mutex::new(HashMap::new()),
        }
    }

    /// Register a new connection: fresh id, fresh buckets at full headroom.
    /// A reconnecting client deliberately starts over with an empty bucket.
    pub fn register(&self) -> ConnectionHandle {
        let id = Uuid::new_v4();
        let now_ms = now_epoch_ms();
        self.connections.lock().unwrap().insert(
            id,
            ConnectionInfo {
                connected_at_ms: now_ms,
                last_activity_ms: now_ms,
            },
        );
        ConnectionHandle {
            id,
            bucket: DualLeakyBucket::new(&self.rate_limit),
            idle_timeout: self.idle_timeout,
        }
    }

    /// Record admitted activity on a connection. Called only for activity
    /// that passed admission, which is also what re-arms the idle deadline.
    pub fn touch(&self, id: ConnectionId) {
        if let Some(info) = self.connections.lock().unwrap().get_mut(&id) {
            info.last_activity_ms = now_epoch_ms();
        }
    }

    /// Drop a connection's entry. Returns false if it was already gone.
    pub fn remove(&self, id: ConnectionId) -> bool {
        self.connections.lock().unwrap().remove(&id).is_some()
    }

    pub fn get(&self, id: ConnectionId) -> Option<ConnectionInfo> {
        self.connections.lock().unwrap().get(&id).cloned()
    }

    pub fn len(&self) -> usize {
        self.connections.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn idle_timeout(&self) -> Duration {
        self.idle_timeout
    }
}
