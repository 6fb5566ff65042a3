//! Conditioning pipeline
//!
//! Turns a source artifact into a conditioning guide image:
//!
//! 1. a warm `PreprocessingCache` entry answers immediately ("from cache")
//! 2. otherwise the node enters `processing` (subject to the concurrency
//!    ceiling) and the remote `Preprocessor` is called
//! 3. failures are classified by `ErrorRecoveryService`: `retry` is repeated
//!    with exponential backoff up to the retry policy, `manual` ends with a
//!    message for the user, `fallback` hands back the unprocessed input
//!
//! Outcomes are reported to a `PipelineObserver` after the authoritative
//! result is known. A result whose node was cleared while the remote call
//! was in flight is dropped: nothing is recorded and nothing is reported.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::broadcast::{self, error::RecvError};
use tokio::task::JoinHandle;

use crate::cache::{cache_key, PreprocessingCache};
use crate::config::{PreprocessingConfig, RetryPolicy};
use crate::error::{PreprocessingError, Result};
use crate::recovery::{ErrorRecoveryService, RecoveryAction, RecoveryDecision};
use crate::state::{PreprocessingStateManager, StateChange};
use crate::types::{NodeDataPatch, PreprocessedImageData};

/// Remote preprocessing operation
#[async_trait]
pub trait Preprocessor: Send + Sync {
    /// Apply `operator` to the image at `source_artifact`, returning the
    /// locator of the derived image
    async fn preprocess(&self, source_artifact: &str, operator: &str) -> Result<String>;
}

/// Upstream notifications about preprocessing outcomes
///
/// All methods default to no-ops.
pub trait PipelineObserver: Send + Sync {
    fn on_preprocessing_started(&self, _node_id: &str) {}

    fn on_preprocessing_completed(
        &self,
        _node_id: &str,
        _data: &PreprocessedImageData,
        _from_cache: bool,
    ) {
    }

    fn on_preprocessing_failed(&self, _node_id: &str, _message: &str, _action: RecoveryAction) {}

    fn update_node_data(&self, _node_id: &str, _patch: NodeDataPatch) {}
}

/// Observer that ignores everything
pub struct NullObserver;

impl PipelineObserver for NullObserver {}

/// One preprocessing request
#[derive(Debug, Clone, PartialEq)]
pub struct PreprocessRequest {
    /// Conditioning node the result belongs to
    pub node_id: String,
    pub source_artifact: String,
    pub operator: String,
    /// Source node the artifact came from, when known
    pub source_id: Option<String>,
}

impl PreprocessRequest {
    pub fn new(
        node_id: impl Into<String>,
        source_artifact: impl Into<String>,
        operator: impl Into<String>,
    ) -> Self {
        Self {
            node_id: node_id.into(),
            source_artifact: source_artifact.into(),
            operator: operator.into(),
            source_id: None,
        }
    }

    pub fn from_source(mut self, source_id: impl Into<String>) -> Self {
        self.source_id = Some(source_id.into());
        self
    }
}

/// Successful end of a preprocessing request
#[derive(Debug, Clone, PartialEq)]
pub enum PreprocessOutcome {
    /// The guide image is available
    Processed {
        data: PreprocessedImageData,
        from_cache: bool,
    },
    /// Recovery escalated; use the unprocessed input instead
    Fallback { raw: String, reason: String },
}

impl PreprocessOutcome {
    /// Artifact to hand downstream
    pub fn artifact(&self) -> &str {
        match self {
            PreprocessOutcome::Processed { data, .. } => &data.artifact_url,
            PreprocessOutcome::Fallback { raw, .. } => raw,
        }
    }

    pub fn is_from_cache(&self) -> bool {
        matches!(self, PreprocessOutcome::Processed { from_cache: true, .. })
    }
}

/// Cache, state tracking and recovery around a remote preprocessor
pub struct ConditioningPipeline {
    config: PreprocessingConfig,
    cache: Arc<PreprocessingCache>,
    states: Arc<PreprocessingStateManager>,
    recovery: Arc<ErrorRecoveryService>,
    preprocessor: Arc<dyn Preprocessor>,
    observer: Arc<dyn PipelineObserver>,
}

impl ConditioningPipeline {
    pub fn new(
        config: PreprocessingConfig,
        preprocessor: Arc<dyn Preprocessor>,
        observer: Arc<dyn PipelineObserver>,
    ) -> Self {
        Self {
            cache: Arc::new(PreprocessingCache::new(config.cache.clone())),
            states: Arc::new(PreprocessingStateManager::new(config.state.clone())),
            recovery: Arc::new(ErrorRecoveryService::new()),
            config,
            preprocessor,
            observer,
        }
    }

    pub fn cache(&self) -> &Arc<PreprocessingCache> {
        &self.cache
    }

    pub fn states(&self) -> &Arc<PreprocessingStateManager> {
        &self.states
    }

    pub fn recovery(&self) -> &Arc<ErrorRecoveryService> {
        &self.recovery
    }

    pub fn observer(&self) -> &Arc<dyn PipelineObserver> {
        &self.observer
    }

    pub fn retry_policy(&self) -> &RetryPolicy {
        &self.config.retry
    }

    /// Produce the guide image for a request
    ///
    /// A request for a node that is already processing waits for that
    /// operation to settle and then re-checks the cache. `Err` means the
    /// request ended without a usable artifact: a manual action is required,
    /// retries were exhausted, the node could not start processing, or it
    /// was cleared while the request was in flight (`Superseded`).
    pub async fn process(&self, request: PreprocessRequest) -> Result<PreprocessOutcome> {
        let node_id = request.node_id.as_str();

        if request.source_artifact.trim().is_empty() {
            let error = PreprocessingError::Validation("no source image to preprocess".into());
            let decision = self.recovery.classify(node_id, &error);
            self.states.set_error(node_id, decision.message.clone());
            self.report_failure(node_id, &decision.message, decision.action);
            return Err(error);
        }

        let key = cache_key(&request.source_artifact, &request.operator);
        let operation = loop {
            if let Some(data) = self.cache.get(&key) {
                self.states.set_completed(node_id, data.clone());
                self.recovery.reset(node_id);
                self.report_success(node_id, &data, true);
                return Ok(PreprocessOutcome::Processed {
                    data,
                    from_cache: true,
                });
            }

            // Subscribe before trying so the settling transition cannot be missed
            let mut changes = self.states.subscribe();
            match self.states.set_processing(node_id) {
                Ok(operation) => break operation,
                Err(PreprocessingError::AlreadyProcessing(_)) => {
                    self.wait_for_in_flight(node_id, &mut changes).await?;
                }
                Err(e) => return Err(e),
            }
        };

        self.observer.on_preprocessing_started(node_id);
        log::debug!(
            "Preprocessing node '{}' with operator '{}'",
            node_id,
            request.operator
        );

        let mut retries = 0;
        loop {
            if !self.states.owns(node_id, operation) {
                return Err(self.superseded(node_id));
            }

            let error = match self
                .preprocessor
                .preprocess(&request.source_artifact, &request.operator)
                .await
            {
                Ok(url) => {
                    let mut data = PreprocessedImageData::new(url, request.operator.clone());
                    if let Some(source_id) = &request.source_id {
                        data = data.with_source(source_id.clone());
                    }
                    // Keyed by content, so still valid if the node moved on
                    self.cache.set(key, data.clone());
                    if !self.states.complete_operation(node_id, operation, data.clone()) {
                        return Err(self.superseded(node_id));
                    }
                    self.recovery.reset(node_id);
                    self.report_success(node_id, &data, false);
                    return Ok(PreprocessOutcome::Processed {
                        data,
                        from_cache: false,
                    });
                }
                Err(e) => e,
            };

            if !self.states.owns(node_id, operation) {
                return Err(self.superseded(node_id));
            }
            let decision = self.recovery.classify(node_id, &error);
            match decision.action {
                RecoveryAction::Retry if retries < self.config.retry.max_retries => {
                    let delay = self.config.retry.delay_for(retries);
                    retries += 1;
                    self.recovery.record_retry(node_id);
                    log::warn!(
                        "Preprocessing node '{}' failed ({}), retry {} in {}ms",
                        node_id,
                        error,
                        retries,
                        delay.as_millis()
                    );
                    tokio::time::sleep(delay).await;
                }
                RecoveryAction::Retry => {
                    self.record_failure(node_id, operation, &decision)?;
                    return Err(error);
                }
                RecoveryAction::Manual => {
                    self.record_failure(node_id, operation, &decision)?;
                    return Err(PreprocessingError::Manual(decision.message));
                }
                RecoveryAction::Fallback => {
                    self.record_failure(node_id, operation, &decision)?;
                    return Ok(PreprocessOutcome::Fallback {
                        raw: request.source_artifact,
                        reason: decision.message,
                    });
                }
            }
        }
    }

    /// Wait until the node leaves `processing`, bounded by the stuck timeout
    async fn wait_for_in_flight(
        &self,
        node_id: &str,
        changes: &mut broadcast::Receiver<StateChange>,
    ) -> Result<()> {
        log::debug!("Node '{}' is already preprocessing, waiting for it", node_id);
        let settled = async {
            while self.states.is_processing(node_id) {
                // Lagging only means the status has to be re-read
                if let Err(RecvError::Closed) = changes.recv().await {
                    break;
                }
            }
        };
        tokio::time::timeout(self.config.state.stuck_timeout(), settled)
            .await
            .map_err(|_| PreprocessingError::AlreadyProcessing(node_id.to_string()))
    }

    fn record_failure(
        &self,
        node_id: &str,
        operation: u64,
        decision: &RecoveryDecision,
    ) -> Result<()> {
        if !self
            .states
            .fail_operation(node_id, operation, decision.message.clone())
        {
            return Err(self.superseded(node_id));
        }
        self.report_failure(node_id, &decision.message, decision.action);
        Ok(())
    }

    fn superseded(&self, node_id: &str) -> PreprocessingError {
        log::debug!(
            "Dropping preprocessing result of node '{}': node was cleared or reprocessed",
            node_id
        );
        PreprocessingError::Superseded(node_id.to_string())
    }

    /// Forget a node's preprocessing result, e.g. after it was disconnected
    pub fn clear_node(&self, node_id: &str) {
        self.states.clear_state(node_id);
        self.recovery.reset(node_id);
        self.observer.update_node_data(node_id, NodeDataPatch::cleared());
    }

    /// Reset every node and drop every cached result
    pub fn clear_all(&self) {
        self.states.clear_all();
        self.recovery.reset_all();
        self.cache.clear();
    }

    /// One maintenance pass: expire cache entries, fail stuck nodes
    pub fn run_maintenance(&self) -> (usize, Vec<String>) {
        let expired = self.cache.perform_maintenance();
        let stuck = self.states.sweep_stuck();
        for node_id in &stuck {
            let message = self.states.get_state(node_id).error.unwrap_or_default();
            self.report_failure(node_id, &message, RecoveryAction::Retry);
        }
        (expired, stuck)
    }

    /// Run `run_maintenance` periodically in the background
    ///
    /// The period is the shorter of the cache cleanup interval and the
    /// stuck-operation timeout. Must be called within a tokio runtime.
    pub fn start_maintenance(self: &Arc<Self>) -> MaintenanceTask {
        let period = self
            .config
            .cache
            .cleanup_interval()
            .min(self.config.state.stuck_timeout());
        let running = Arc::new(AtomicBool::new(true));
        let pipeline = Arc::downgrade(self);
        let flag = running.clone();

        log::info!("Starting preprocessing maintenance every {}ms", period.as_millis());
        let handle = tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            // First tick completes immediately
            interval.tick().await;
            while flag.load(Ordering::SeqCst) {
                interval.tick().await;
                let Some(pipeline) = pipeline.upgrade() else {
                    break;
                };
                let (expired, stuck) = pipeline.run_maintenance();
                if expired > 0 || !stuck.is_empty() {
                    log::debug!(
                        "Maintenance expired {} cache entries, swept {} stuck node(s)",
                        expired,
                        stuck.len()
                    );
                }
            }
        });

        MaintenanceTask { running, handle }
    }

    fn report_success(&self, node_id: &str, data: &PreprocessedImageData, from_cache: bool) {
        self.observer
            .update_node_data(node_id, NodeDataPatch::preprocessed(data.artifact_url.clone()));
        self.observer
            .on_preprocessing_completed(node_id, data, from_cache);
    }

    fn report_failure(&self, node_id: &str, message: &str, action: RecoveryAction) {
        log::warn!("Preprocessing node '{}' failed: {}", node_id, message);
        self.observer
            .update_node_data(node_id, NodeDataPatch::failed(message));
        self.observer.on_preprocessing_failed(node_id, message, action);
    }
}

/// Handle of the background maintenance loop; stops it when dropped
pub struct MaintenanceTask {
    running: Arc<AtomicBool>,
    handle: JoinHandle<()>,
}

impl MaintenanceTask {
    pub fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
        self.handle.abort();
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst) && !self.handle.is_finished()
    }
}

impl Drop for MaintenanceTask {
    fn drop(&mut self) {
        self.stop();
    }
}
