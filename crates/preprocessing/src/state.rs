//! Per-node preprocessing state machine
//!
//! ```text
//! idle -> processing -> completed
//!                    -> error
//! completed | error -> idle      (explicit clear)
//! ```
//!
//! States are created lazily as `idle`. Every transition is broadcast as a
//! `StateChange` so observers never hold a stale view, including after
//! `clear_all`, which reports a forced `idle` for every tracked node.
//!
//! `set_processing` hands out an operation id. The outcome of that operation
//! is only recorded through [`complete_operation`] and [`fail_operation`]
//! while the id still owns the node: clearing the node or starting a newer
//! operation turns late results into no-ops.
//!
//! [`complete_operation`]: PreprocessingStateManager::complete_operation
//! [`fail_operation`]: PreprocessingStateManager::fail_operation

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::broadcast;
use tokio::time::Instant;

use crate::config::StateManagerConfig;
use crate::error::{PreprocessingError, Result};
use crate::types::PreprocessedImageData;

const CHANGE_CHANNEL_CAPACITY: usize = 256;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PreprocessingStatus {
    #[default]
    Idle,
    Processing,
    Completed,
    Error,
}

/// State of one node
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PreprocessingState {
    pub status: PreprocessingStatus,
    pub start_time: Option<DateTime<Utc>>,
    pub end_time: Option<DateTime<Utc>>,
    pub result: Option<PreprocessedImageData>,
    pub error: Option<String>,
    #[serde(skip)]
    started: Option<Instant>,
    /// Operation allowed to record the outcome
    #[serde(skip)]
    operation: Option<u64>,
}

impl PreprocessingState {
    /// Wall-clock duration of the last completed or failed operation
    pub fn duration_ms(&self) -> Option<i64> {
        match (self.start_time, self.end_time) {
            (Some(start), Some(end)) => Some((end - start).num_milliseconds()),
            _ => None,
        }
    }

    fn finish(&mut self, status: PreprocessingStatus) {
        let now = Utc::now();
        self.status = status;
        self.start_time.get_or_insert(now);
        self.end_time = Some(now);
        self.started = None;
    }
}

/// Broadcast notification of a transition
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StateChange {
    pub node_id: String,
    pub status: PreprocessingStatus,
}

/// Tracks the preprocessing state of every conditioning node
pub struct PreprocessingStateManager {
    config: StateManagerConfig,
    states: Mutex<HashMap<String, PreprocessingState>>,
    next_operation: AtomicU64,
    changes: broadcast::Sender<StateChange>,
}

impl PreprocessingStateManager {
    pub fn new(config: StateManagerConfig) -> Self {
        let (changes, _) = broadcast::channel(CHANGE_CHANNEL_CAPACITY);
        Self {
            config,
            states: Mutex::new(HashMap::new()),
            next_operation: AtomicU64::new(1),
            changes,
        }
    }

    /// Receive every state change from now on
    pub fn subscribe(&self) -> broadcast::Receiver<StateChange> {
        self.changes.subscribe()
    }

    fn notify(&self, node_id: &str, status: PreprocessingStatus) {
        // No receivers is fine
        let _ = self.changes.send(StateChange {
            node_id: node_id.to_string(),
            status,
        });
    }

    /// Current state of a node, `idle` if it was never touched
    pub fn get_state(&self, node_id: &str) -> PreprocessingState {
        self.states
            .lock()
            .entry(node_id.to_string())
            .or_default()
            .clone()
    }

    pub fn status(&self, node_id: &str) -> PreprocessingStatus {
        self.states
            .lock()
            .get(node_id)
            .map(|s| s.status)
            .unwrap_or_default()
    }

    pub fn is_processing(&self, node_id: &str) -> bool {
        self.status(node_id) == PreprocessingStatus::Processing
    }

    pub fn processing_count(&self) -> usize {
        self.states
            .lock()
            .values()
            .filter(|s| s.status == PreprocessingStatus::Processing)
            .count()
    }

    /// Whether another node may start processing
    pub fn can_handle_concurrent_operation(&self) -> bool {
        self.processing_count() < self.config.max_concurrent_operations
    }

    /// Enter `processing`, stamping the start time
    ///
    /// Refused when the node is already processing or the system-wide
    /// ceiling is reached. Returns the id of the new operation.
    pub fn set_processing(&self, node_id: &str) -> Result<u64> {
        let operation = {
            let mut states = self.states.lock();
            let processing = states
                .values()
                .filter(|s| s.status == PreprocessingStatus::Processing)
                .count();

            let state = states.entry(node_id.to_string()).or_default();
            if state.status == PreprocessingStatus::Processing {
                return Err(PreprocessingError::AlreadyProcessing(node_id.to_string()));
            }
            if processing >= self.config.max_concurrent_operations {
                return Err(PreprocessingError::ConcurrencyLimit {
                    limit: self.config.max_concurrent_operations,
                });
            }

            let operation = self.next_operation.fetch_add(1, Ordering::Relaxed);
            *state = PreprocessingState {
                status: PreprocessingStatus::Processing,
                start_time: Some(Utc::now()),
                started: Some(Instant::now()),
                operation: Some(operation),
                ..Default::default()
            };
            operation
        };
        self.notify(node_id, PreprocessingStatus::Processing);
        Ok(operation)
    }

    /// Whether `operation` may still record an outcome for the node
    pub fn owns(&self, node_id: &str, operation: u64) -> bool {
        self.states
            .lock()
            .get(node_id)
            .is_some_and(|s| s.operation == Some(operation))
    }

    /// Enter `completed`, keeping the original start time
    ///
    /// Supersedes any operation still in flight for the node.
    pub fn set_completed(&self, node_id: &str, result: PreprocessedImageData) {
        {
            let mut states = self.states.lock();
            let state = states.entry(node_id.to_string()).or_default();
            Self::complete(state, result);
        }
        self.notify(node_id, PreprocessingStatus::Completed);
    }

    /// Enter `error`, keeping the original start time
    ///
    /// Supersedes any operation still in flight for the node.
    pub fn set_error(&self, node_id: &str, message: impl Into<String>) {
        {
            let mut states = self.states.lock();
            let state = states.entry(node_id.to_string()).or_default();
            Self::fail(state, message.into());
        }
        self.notify(node_id, PreprocessingStatus::Error);
    }

    /// Record the result of `operation`
    ///
    /// Returns `false`, changing nothing, when the node was cleared or a
    /// newer operation took over since `set_processing` handed out the id.
    pub fn complete_operation(
        &self,
        node_id: &str,
        operation: u64,
        result: PreprocessedImageData,
    ) -> bool {
        {
            let mut states = self.states.lock();
            match states.get_mut(node_id) {
                Some(state) if state.operation == Some(operation) => Self::complete(state, result),
                _ => return false,
            }
        }
        self.notify(node_id, PreprocessingStatus::Completed);
        true
    }

    /// Record the failure of `operation`; same ownership rule as
    /// [`complete_operation`](Self::complete_operation)
    pub fn fail_operation(&self, node_id: &str, operation: u64, message: impl Into<String>) -> bool {
        {
            let mut states = self.states.lock();
            match states.get_mut(node_id) {
                Some(state) if state.operation == Some(operation) => {
                    Self::fail(state, message.into())
                }
                _ => return false,
            }
        }
        self.notify(node_id, PreprocessingStatus::Error);
        true
    }

    fn complete(state: &mut PreprocessingState, result: PreprocessedImageData) {
        state.finish(PreprocessingStatus::Completed);
        state.operation = None;
        state.result = Some(result);
        state.error = None;
    }

    fn fail(state: &mut PreprocessingState, message: String) {
        state.finish(PreprocessingStatus::Error);
        state.operation = None;
        state.error = Some(message);
    }

    /// Reset one node to `idle`
    pub fn clear_state(&self, node_id: &str) {
        let removed = self.states.lock().remove(node_id);
        if removed.is_some() {
            self.notify(node_id, PreprocessingStatus::Idle);
        }
    }

    /// Reset every node to `idle`, notifying observers for each
    pub fn clear_all(&self) -> usize {
        let cleared: Vec<String> = self.states.lock().drain().map(|(id, _)| id).collect();
        for node_id in &cleared {
            self.notify(node_id, PreprocessingStatus::Idle);
        }
        if !cleared.is_empty() {
            log::info!("Cleared preprocessing state of {} node(s)", cleared.len());
        }
        cleared.len()
    }

    /// Force nodes processing longer than the stuck timeout into `error`
    ///
    /// Returns the ids of the nodes that were swept. In-flight remote calls
    /// are not interrupted and keep their operation id, so a late result is
    /// still recorded over the timeout error.
    pub fn sweep_stuck(&self) -> Vec<String> {
        let timeout = self.config.stuck_timeout();
        let now = Instant::now();
        let message = format!(
            "Preprocessing timed out after {}s",
            timeout.as_secs()
        );

        let stuck: Vec<String> = {
            let mut states = self.states.lock();
            let mut stuck = Vec::new();
            for (node_id, state) in states.iter_mut() {
                let expired = state.status == PreprocessingStatus::Processing
                    && state.started.is_some_and(|s| now.duration_since(s) >= timeout);
                if expired {
                    state.finish(PreprocessingStatus::Error);
                    state.error = Some(message.clone());
                    stuck.push(node_id.clone());
                }
            }
            stuck
        };

        for node_id in &stuck {
            log::warn!("Preprocessing of node '{}' is stuck, marking as failed", node_id);
            self.notify(node_id, PreprocessingStatus::Error);
        }
        stuck
    }
}

impl Default for PreprocessingStateManager {
    fn default() -> Self {
        Self::new(StateManagerConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    #[test]
    fn test_lifecycle_preserves_start_time() {
        let manager = PreprocessingStateManager::default();
        assert_eq!(manager.status("pose"), PreprocessingStatus::Idle);

        manager.set_processing("pose").unwrap();
        let start = manager.get_state("pose").start_time;
        assert!(start.is_some());

        manager.set_completed("pose", PreprocessedImageData::new("https://img/p.png", "pose"));
        let state = manager.get_state("pose");
        assert_eq!(state.status, PreprocessingStatus::Completed);
        assert_eq!(state.start_time, start);
        assert!(state.end_time.is_some());
        assert!(state.duration_ms().is_some_and(|d| d >= 0));

        manager.clear_state("pose");
        assert_eq!(manager.status("pose"), PreprocessingStatus::Idle);
    }

    #[test]
    fn test_no_double_processing() {
        let manager = PreprocessingStateManager::default();
        manager.set_processing("pose").unwrap();

        let err = manager.set_processing("pose").unwrap_err();
        assert_eq!(err, PreprocessingError::AlreadyProcessing("pose".into()));
        assert_eq!(manager.processing_count(), 1);
    }

    #[test]
    fn test_concurrency_ceiling() {
        let manager = PreprocessingStateManager::default();
        for i in 0..5 {
            manager.set_processing(&format!("node-{i}")).unwrap();
        }
        assert!(!manager.can_handle_concurrent_operation());
        assert!(matches!(
            manager.set_processing("node-5"),
            Err(PreprocessingError::ConcurrencyLimit { limit: 5 })
        ));

        manager.set_error("node-0", "boom");
        assert!(manager.can_handle_concurrent_operation());
        manager.set_processing("node-5").unwrap();
    }

    #[test]
    fn test_cleared_operation_cannot_record() {
        let manager = PreprocessingStateManager::default();
        let operation = manager.set_processing("pose").unwrap();
        assert!(manager.owns("pose", operation));

        manager.clear_state("pose");
        let late = PreprocessedImageData::new("https://img/late.png", "pose");
        assert!(!manager.complete_operation("pose", operation, late));
        assert!(!manager.fail_operation("pose", operation, "boom"));
        assert_eq!(manager.status("pose"), PreprocessingStatus::Idle);
        assert!(manager.get_state("pose").result.is_none());
    }

    #[test]
    fn test_newer_operation_wins() {
        let manager = PreprocessingStateManager::default();
        let first = manager.set_processing("pose").unwrap();
        manager.clear_state("pose");
        let second = manager.set_processing("pose").unwrap();
        assert_ne!(first, second);

        let stale = PreprocessedImageData::new("https://img/old.png", "pose");
        assert!(!manager.complete_operation("pose", first, stale));
        assert!(manager.is_processing("pose"));

        let fresh = PreprocessedImageData::new("https://img/new.png", "pose");
        assert!(manager.complete_operation("pose", second, fresh));
        assert_eq!(
            manager.get_state("pose").result.map(|d| d.artifact_url),
            Some("https://img/new.png".to_string())
        );
        // Recording is one-shot
        assert!(!manager.fail_operation("pose", second, "boom"));
    }

    #[tokio::test]
    async fn test_clear_all_notifies_every_node() {
        let manager = PreprocessingStateManager::default();
        manager.set_processing("a").unwrap();
        manager.set_error("b", "boom");

        let mut rx = manager.subscribe();
        assert_eq!(manager.clear_all(), 2);

        let mut cleared = vec![rx.recv().await.unwrap(), rx.recv().await.unwrap()];
        cleared.sort_by(|x, y| x.node_id.cmp(&y.node_id));
        assert_eq!(
            cleared,
            vec![
                StateChange {
                    node_id: "a".into(),
                    status: PreprocessingStatus::Idle
                },
                StateChange {
                    node_id: "b".into(),
                    status: PreprocessingStatus::Idle
                },
            ]
        );
        assert_eq!(manager.status("a"), PreprocessingStatus::Idle);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stuck_sweep() {
        let manager = PreprocessingStateManager::new(StateManagerConfig {
            stuck_timeout_ms: 1_000,
            ..Default::default()
        });
        let slow = manager.set_processing("slow").unwrap();
        tokio::time::advance(Duration::from_millis(500)).await;
        manager.set_processing("fresh").unwrap();

        assert!(manager.sweep_stuck().is_empty());

        tokio::time::advance(Duration::from_millis(500)).await;
        assert_eq!(manager.sweep_stuck(), vec!["slow".to_string()]);

        let state = manager.get_state("slow");
        assert_eq!(state.status, PreprocessingStatus::Error);
        assert!(state.error.unwrap().contains("timed out"));
        assert!(manager.is_processing("fresh"));

        // Timeouts are advisory: the late result still lands
        let late = PreprocessedImageData::new("https://img/slow.png", "slow");
        assert!(manager.complete_operation("slow", slow, late));
        assert_eq!(manager.status("slow"), PreprocessingStatus::Completed);
    }
}
