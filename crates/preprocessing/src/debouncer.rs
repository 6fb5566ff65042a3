//! Connection debouncer
//!
//! Coalesces bursts of canvas wiring changes. Each `(source, target)` pair
//! owns at most one pending operation; a new request for the same pair
//! replaces it and restarts its timer, so only the latest request fires.
//! Once `max_pending_operations` distinct pairs are pending, requests for
//! new pairs are dropped.
//!
//! `flush` fires everything pending immediately in batches, reporting
//! aggregate counts through `on_batch_start` / `on_batch_complete` instead
//! of stopping at the first failing operation.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde::Serialize;
use tokio::task::JoinHandle;
use tokio::time::Instant;

use crate::config::DebounceConfig;
use crate::error::{PreprocessingError, Result};

/// Kind of a pending wiring change
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationKind {
    Connect,
    Disconnect,
}

/// A change waiting for its debounce window to elapse
#[derive(Debug, Clone, PartialEq)]
pub struct PendingOperation {
    pub id: String,
    pub kind: OperationKind,
    pub source_id: String,
    pub target_id: String,
    pub scheduled_at: Instant,
}

/// Receiver of debounced operations
#[async_trait]
pub trait ConnectionHandler: Send + Sync {
    async fn on_connect(&self, source_id: &str, target_id: &str) -> Result<()>;

    async fn on_disconnect(&self, source_id: &str, target_id: &str) -> Result<()>;

    /// Called before each flushed batch
    async fn on_batch_start(&self, _count: usize) {}

    /// Called after each flushed batch with the failures it collected
    async fn on_batch_complete(&self, _count: usize, _errors: &[PreprocessingError]) {}
}

/// Aggregate outcome of a flush
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FlushReport {
    pub batches: usize,
    pub executed: usize,
    pub errors: Vec<PreprocessingError>,
}

type PairKey = (String, String);

struct PendingSlot {
    operation: PendingOperation,
    timer: Option<JoinHandle<()>>,
}

struct DebouncerInner {
    config: DebounceConfig,
    handler: Arc<dyn ConnectionHandler>,
    pending: Mutex<HashMap<PairKey, PendingSlot>>,
}

impl DebouncerInner {
    async fn execute(&self, operation: &PendingOperation) -> Result<()> {
        log::debug!(
            "Executing debounced {:?} {} -> {}",
            operation.kind,
            operation.source_id,
            operation.target_id
        );
        match operation.kind {
            OperationKind::Connect => {
                self.handler
                    .on_connect(&operation.source_id, &operation.target_id)
                    .await
            }
            OperationKind::Disconnect => {
                self.handler
                    .on_disconnect(&operation.source_id, &operation.target_id)
                    .await
            }
        }
    }

    /// Timer expiry: run the operation if it is still the pending one
    async fn fire(&self, key: PairKey, operation_id: String) {
        let operation = {
            let mut pending = self.pending.lock();
            let current = pending
                .get(&key)
                .is_some_and(|slot| slot.operation.id == operation_id);
            if current {
                pending.remove(&key).map(|slot| slot.operation)
            } else {
                None
            }
        };

        if let Some(operation) = operation {
            if let Err(e) = self.execute(&operation).await {
                log::warn!(
                    "Debounced {:?} {} -> {} failed: {}",
                    operation.kind,
                    operation.source_id,
                    operation.target_id,
                    e
                );
            }
        }
    }
}

/// Per-pair debouncer of connect / disconnect operations
pub struct ConnectionDebouncer {
    inner: Arc<DebouncerInner>,
}

impl ConnectionDebouncer {
    pub fn new(config: DebounceConfig, handler: Arc<dyn ConnectionHandler>) -> Self {
        Self {
            inner: Arc::new(DebouncerInner {
                config,
                handler,
                pending: Mutex::new(HashMap::new()),
            }),
        }
    }

    /// Schedule an operation for a pair, restarting its window
    ///
    /// Returns `false` when the request was dropped because the pending
    /// ceiling is reached. Must be called within a tokio runtime.
    pub fn debounce(&self, source_id: &str, target_id: &str, kind: OperationKind) -> bool {
        let key: PairKey = (source_id.to_string(), target_id.to_string());
        let operation = PendingOperation {
            id: uuid::Uuid::new_v4().to_string(),
            kind,
            source_id: source_id.to_string(),
            target_id: target_id.to_string(),
            scheduled_at: Instant::now(),
        };

        let mut pending = self.inner.pending.lock();
        match pending.get_mut(&key) {
            Some(slot) => {
                if let Some(timer) = slot.timer.take() {
                    timer.abort();
                }
                slot.operation = operation.clone();
            }
            None => {
                if pending.len() >= self.inner.config.max_pending_operations {
                    log::warn!(
                        "Dropping {:?} {} -> {}: {} operations already pending",
                        kind,
                        source_id,
                        target_id,
                        pending.len()
                    );
                    return false;
                }
                pending.insert(
                    key.clone(),
                    PendingSlot {
                        operation: operation.clone(),
                        timer: None,
                    },
                );
            }
        }

        let inner = self.inner.clone();
        let window = self.inner.config.window();
        let timer_key = key.clone();
        let operation_id = operation.id;
        let timer = tokio::spawn(async move {
            tokio::time::sleep(window).await;
            inner.fire(timer_key, operation_id).await;
        });
        if let Some(slot) = pending.get_mut(&key) {
            slot.timer = Some(timer);
        }
        true
    }

    /// Drop the pending operation of a pair without running it
    pub fn cancel_operation(&self, source_id: &str, target_id: &str) -> bool {
        let key = (source_id.to_string(), target_id.to_string());
        match self.inner.pending.lock().remove(&key) {
            Some(slot) => {
                if let Some(timer) = slot.timer {
                    timer.abort();
                }
                true
            }
            None => false,
        }
    }

    /// Drop every pending operation without running any
    pub fn cancel_all(&self) -> usize {
        let drained: Vec<PendingSlot> = self.inner.pending.lock().drain().map(|(_, s)| s).collect();
        for slot in &drained {
            if let Some(timer) = &slot.timer {
                timer.abort();
            }
        }
        drained.len()
    }

    pub fn pending_count(&self) -> usize {
        self.inner.pending.lock().len()
    }

    pub fn pending_operation(&self, source_id: &str, target_id: &str) -> Option<PendingOperation> {
        let key = (source_id.to_string(), target_id.to_string());
        self.inner
            .pending
            .lock()
            .get(&key)
            .map(|slot| slot.operation.clone())
    }

    /// Run every pending operation now, oldest first, in batches
    pub async fn flush(&self) -> FlushReport {
        let mut operations: Vec<PendingOperation> = {
            let mut pending = self.inner.pending.lock();
            pending
                .drain()
                .map(|(_, slot)| {
                    if let Some(timer) = slot.timer {
                        timer.abort();
                    }
                    slot.operation
                })
                .collect()
        };
        operations.sort_by_key(|op| op.scheduled_at);

        let mut report = FlushReport::default();
        let batch_size = self.inner.config.batch_size.max(1);
        for batch in operations.chunks(batch_size) {
            self.inner.handler.on_batch_start(batch.len()).await;

            let mut errors = Vec::new();
            for operation in batch {
                if let Err(e) = self.inner.execute(operation).await {
                    errors.push(e);
                }
            }

            self.inner.handler.on_batch_complete(batch.len(), &errors).await;
            report.batches += 1;
            report.executed += batch.len();
            report.errors.extend(errors);
        }

        if report.executed > 0 {
            log::info!(
                "Flushed {} connection operation(s) in {} batch(es), {} failed",
                report.executed,
                report.batches,
                report.errors.len()
            );
        }
        report
    }
}

impl Drop for ConnectionDebouncer {
    fn drop(&mut self) {
        self.cancel_all();
    }
}
