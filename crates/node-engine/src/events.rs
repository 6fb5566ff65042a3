//! Event types for streaming workflow progress
//!
//! Events are sent from the engine to the canvas (or any consumer) after the
//! authoritative result for a step is known. They report results, processing
//! state changes, warnings and errors; they never drive control flow.

use serde::{Deserialize, Serialize};

use crate::types::{Artifact, NodeKindTag};

/// Trait for sending workflow events
///
/// This abstracts over the transport mechanism (UI channel, mpsc, etc.)
/// allowing the engine to be used in different contexts.
pub trait EventSink: Send + Sync {
    /// Send an event
    ///
    /// Returns an error if the event could not be sent (e.g., channel closed)
    fn send(&self, event: WorkflowEvent) -> Result<(), EventError>;
}

/// Error when sending events fails
#[derive(Debug, Clone)]
pub struct EventError {
    pub message: String,
}

impl std::fmt::Display for EventError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Event error: {}", self.message)
    }
}

impl std::error::Error for EventError {}

impl EventError {
    pub fn channel_closed() -> Self {
        Self {
            message: "Channel closed".to_string(),
        }
    }
}

/// A node failure after classification
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClassifiedError {
    pub kind: NodeKindTag,
    pub critical: bool,
    pub message: String,
}

/// Events emitted during workflow execution
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum WorkflowEvent {
    /// A run started
    #[serde(rename_all = "camelCase")]
    RunStarted {
        workflow_id: String,
        execution_id: String,
        target: String,
        order: Vec<String>,
    },

    /// A node entered or left processing
    #[serde(rename_all = "camelCase")]
    NodeProcessingChanged {
        node_id: String,
        execution_id: String,
        processing: bool,
    },

    /// A node produced (or reused) its artifact
    #[serde(rename_all = "camelCase")]
    NodeResult {
        node_id: String,
        execution_id: String,
        artifact: Artifact,
        from_cache: bool,
    },

    /// A non-critical node degraded
    #[serde(rename_all = "camelCase")]
    NodeWarning {
        node_id: String,
        execution_id: String,
        message: String,
    },

    /// A node failed
    #[serde(rename_all = "camelCase")]
    NodeError {
        node_id: String,
        execution_id: String,
        error: ClassifiedError,
    },

    /// The run finished, possibly with warnings
    #[serde(rename_all = "camelCase")]
    RunCompleted {
        workflow_id: String,
        execution_id: String,
        result: Option<Artifact>,
        warnings: usize,
    },

    /// The run was aborted
    #[serde(rename_all = "camelCase")]
    RunFailed {
        workflow_id: String,
        execution_id: String,
        error: String,
    },
}

impl WorkflowEvent {
    pub fn node_processing(node_id: &str, execution_id: &str, processing: bool) -> Self {
        Self::NodeProcessingChanged {
            node_id: node_id.to_string(),
            execution_id: execution_id.to_string(),
            processing,
        }
    }

    pub fn node_result(node_id: &str, execution_id: &str, artifact: &str, from_cache: bool) -> Self {
        Self::NodeResult {
            node_id: node_id.to_string(),
            execution_id: execution_id.to_string(),
            artifact: artifact.to_string(),
            from_cache,
        }
    }
}

/// A no-op event sink that discards all events
///
/// Useful for testing or when events aren't needed.
pub struct NullEventSink;

impl EventSink for NullEventSink {
    fn send(&self, _event: WorkflowEvent) -> Result<(), EventError> {
        Ok(())
    }
}

/// A vector-based event sink that collects events
///
/// Useful for testing to verify events were emitted correctly.
pub struct VecEventSink {
    events: std::sync::Mutex<Vec<WorkflowEvent>>,
}

impl VecEventSink {
    pub fn new() -> Self {
        Self {
            events: std::sync::Mutex::new(Vec::new()),
        }
    }

    /// Get all collected events
    pub fn events(&self) -> Vec<WorkflowEvent> {
        self.events.lock().map(|e| e.clone()).unwrap_or_default()
    }

    /// Clear all collected events
    pub fn clear(&self) {
        if let Ok(mut events) = self.events.lock() {
            events.clear();
        }
    }
}

impl Default for VecEventSink {
    fn default() -> Self {
        Self::new()
    }
}

impl EventSink for VecEventSink {
    fn send(&self, event: WorkflowEvent) -> Result<(), EventError> {
        self.events
            .lock()
            .map_err(|_| EventError {
                message: "Event buffer poisoned".to_string(),
            })?
            .push(event);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_vec_event_sink() {
        let sink = VecEventSink::new();

        sink.send(WorkflowEvent::node_result("n1", "exec1", "https://img/a.png", true))
            .unwrap();

        let events = sink.events();
        assert_eq!(events.len(), 1);

        match &events[0] {
            WorkflowEvent::NodeResult { node_id, from_cache, .. } => {
                assert_eq!(node_id, "n1");
                assert!(*from_cache);
            }
            _ => panic!("Expected NodeResult event"),
        }

        sink.clear();
        assert!(sink.events().is_empty());
    }

    #[test]
    fn test_event_wire_shape() {
        let event = WorkflowEvent::node_processing("n1", "exec1", true);
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "nodeProcessingChanged");
        assert_eq!(json["nodeId"], "n1");
        assert_eq!(json["processing"], true);
    }

    #[test]
    fn test_null_event_sink() {
        let sink = NullEventSink;
        sink.send(WorkflowEvent::node_processing("n1", "exec1", false))
            .unwrap();
    }
}
