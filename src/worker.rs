//! Sequential queue worker.
//!
//! A single consumer loop claims the oldest pending item, runs the external
//! work, and writes the terminal status back into the log. Because there is
//! exactly one claim path, completion order equals admission order, and a
//! slow item blocks everything behind it.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::Notify;
use tracing::{debug, error, info};

use crate::queue::{ItemStatus, SequencedLog};

#[derive(Debug, Error)]
pub enum WorkError {
    #[error("execution failed: {0}")]
    Failed(String),
}

/// External work interface. Production would delegate to an inference or
/// compute service; tests substitute scripted implementations.
#[async_trait]
pub trait WorkExecutor: Send + Sync {
    async fn execute(&self, prompt: &str) -> Result<String, WorkError>;
}

/// Stub executor: waits a configurable delay, then echoes the prompt.
pub struct EchoExecutor {
    delay: Duration,
}

impl EchoExecutor {
    pub fn new(delay: Duration) -> Arc<Self> {
        Arc::new(Self { delay })
    }
}

#[async_trait]
impl WorkExecutor for EchoExecutor {
    async fn execute(&self, prompt: &str) -> Result<String, WorkError> {
        tokio::time::sleep(self.delay).await;
        Ok(format!("echo: {prompt}"))
    }
}

/// The single sequential processor over the log.
pub struct Worker {
    log: Arc<SequencedLog>,
    executor: Arc<dyn WorkExecutor>,
    running: Arc<AtomicBool>,
    notify: Arc<Notify>,
    idle_sleep: Duration,
}

impl Worker {
    pub fn new(
        log: Arc<SequencedLog>,
        executor: Arc<dyn WorkExecutor>,
        idle_sleep: Duration,
    ) -> Arc<Self> {
        let worker = Arc::new(Self {
            log,
            executor,
            running: Arc::new(AtomicBool::new(false)),
            notify: Arc::new(Notify::new()),
            idle_sleep,
        });

        // Wake the loop as soon as something is appended instead of waiting
        // out the full idle sleep.
        let notify = Arc::clone(&worker.notify);
        worker.log.subscribe_added(move |_| {
            notify.notify_one();
        });

        worker
    }

    /// Start the processing loop. Idempotent.
    pub fn start(self: &Arc<Self>) {
        if self.running.swap(true, Ordering::SeqCst) {
            return;
        }

        let worker = Arc::clone(self);
        tokio::spawn(async move {
            worker.run().await;
            if worker.running.load(Ordering::SeqCst) {
                error!("worker loop exited unexpectedly");
            } else {
                info!("worker stopped");
            }
        });
    }

    async fn run(&self) {
        while self.running.load(Ordering::SeqCst) {
            if let Some(item) = self.log.claim_next() {
                debug!(sequence = item.sequence, id = %item.id, "processing item");

                // Executor failures are data: they become a terminal Failed
                // item and the loop keeps going.
                let (status, result) = match self.executor.execute(&item.prompt).await {
                    Ok(result) => (ItemStatus::Completed, result),
                    Err(e) => (ItemStatus::Failed, e.to_string()),
                };

                if self.log.update(item.id, status, Some(result)).is_none() {
                    error!(id = %item.id, "claimed item vanished from the log");
                }

                tokio::task::yield_now().await;
                continue;
            }

            // Idle: sleep with early wakeup on append.
            let delay = tokio::time::sleep(self.idle_sleep);
            tokio::pin!(delay);
            tokio::select! {
                _ = &mut delay => {},
                _ = self.notify.notified() => {}
            }
        }
    }

    /// Stop the loop after the in-flight item (if any) reaches a terminal
    /// state. Claimed work is never abandoned mid-flight.
    pub fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
        self.notify.notify_one();
    }
}

impl Drop for Worker {
    fn drop(&mut self) {
        self.stop();
    }
}
