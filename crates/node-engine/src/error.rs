//! Error types for the node engine

use thiserror::Error;

use crate::types::{NodeId, NodeKindTag};
use crate::validation::ValidationError;

/// Result type alias using NodeEngineError
pub type Result<T> = std::result::Result<T, NodeEngineError>;

/// Errors that can occur in the node engine
#[derive(Debug, Error)]
pub enum NodeEngineError {
    /// Malformed graph, missing required input, unknown node kind
    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    /// One or more dependency cycles were found
    #[error("Dependency cycle detected: {}", format_cycles(.cycles))]
    Dependency { cycles: Vec<Vec<NodeId>> },

    /// A node's operation failed and the failure was classified
    #[error("Node '{node_id}' ({kind}) failed{}: {message}", critical_suffix(.critical))]
    NodeProcessing {
        node_id: NodeId,
        kind: NodeKindTag,
        critical: bool,
        message: String,
    },

    /// Raised by node operations; wrapped into `NodeProcessing` by the executor
    #[error("Task execution failed: {0}")]
    ExecutionFailed(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Run was cancelled
    #[error("Workflow cancelled")]
    Cancelled,

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl NodeEngineError {
    /// Create an execution failed error with a message
    pub fn failed(msg: impl Into<String>) -> Self {
        Self::ExecutionFailed(msg.into())
    }

    /// Whether this error can never be downgraded to a warning
    pub fn is_fatal(&self) -> bool {
        match self {
            Self::Validation(_) | Self::Dependency { .. } | Self::Cancelled => true,
            Self::NodeProcessing { critical, .. } => *critical,
            _ => false,
        }
    }
}

fn critical_suffix(critical: &bool) -> &'static str {
    if *critical {
        " [critical]"
    } else {
        ""
    }
}

fn format_cycles(cycles: &[Vec<NodeId>]) -> String {
    cycles
        .iter()
        .map(|c| c.join(" -> "))
        .collect::<Vec<_>>()
        .join("; ")
}
