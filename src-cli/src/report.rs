//! Terminal reporting of engine and preprocessing progress

use node_engine::{EventError, EventSink, WorkflowEvent};
use preprocessing::{PipelineObserver, PreprocessedImageData, RecoveryAction};

/// Writes workflow events to the log
pub struct LogEventSink;

impl EventSink for LogEventSink {
    fn send(&self, event: WorkflowEvent) -> Result<(), EventError> {
        match &event {
            WorkflowEvent::RunStarted { target, order, .. } => {
                log::info!("Running {} node(s) towards '{}'", order.len(), target);
            }
            WorkflowEvent::NodeResult {
                node_id,
                artifact,
                from_cache,
                ..
            } => {
                let source = if *from_cache { " (cached)" } else { "" };
                log::info!("{} -> {}{}", node_id, artifact, source);
            }
            WorkflowEvent::NodeWarning { message, .. } => log::warn!("{}", message),
            WorkflowEvent::NodeError { node_id, error, .. } => {
                log::error!("{} failed: {}", node_id, error.message);
            }
            WorkflowEvent::NodeProcessingChanged { .. }
            | WorkflowEvent::RunCompleted { .. }
            | WorkflowEvent::RunFailed { .. } => {
                log::debug!("{:?}", event);
            }
        }
        Ok(())
    }
}

/// Writes preprocessing outcomes to the log
pub struct LogObserver;

impl PipelineObserver for LogObserver {
    fn on_preprocessing_completed(
        &self,
        node_id: &str,
        data: &PreprocessedImageData,
        from_cache: bool,
    ) {
        log::debug!(
            "Preprocessed '{}' with {}{}",
            node_id,
            data.operator,
            if from_cache { " (cached)" } else { "" }
        );
    }

    fn on_preprocessing_failed(&self, node_id: &str, message: &str, action: RecoveryAction) {
        log::warn!("Preprocessing '{}' failed ({:?}): {}", node_id, action, message);
    }
}
