//! Error types for the preprocessing pipeline

use thiserror::Error;

/// Result type alias using PreprocessingError
pub type Result<T> = std::result::Result<T, PreprocessingError>;

/// Errors raised while preprocessing a conditioning input
#[derive(Debug, Clone, PartialEq, Error)]
pub enum PreprocessingError {
    /// The preprocessing service could not be reached
    #[error("Network error: {0}")]
    Network(String),

    /// The preprocessing service did not answer in time
    #[error("Request timed out: {0}")]
    Timeout(String),

    /// Credentials were missing or rejected
    #[error("Authentication failed: {0}")]
    Authentication(String),

    /// The service asked us to slow down
    #[error("Rate limit exceeded: {0}")]
    RateLimit(String),

    /// The request itself was rejected as invalid
    #[error("Invalid input: {0}")]
    Validation(String),

    /// The source image format is not supported by the operator
    #[error("Unsupported image type: {0}")]
    UnsupportedType(String),

    /// Any other failure reported by the service, as raw text
    #[error("Preprocessing service error: {0}")]
    Service(String),

    /// Too many nodes are processing at once
    #[error("Too many concurrent preprocessing operations (limit {limit})")]
    ConcurrencyLimit { limit: usize },

    /// A second request arrived for a node that is still processing
    #[error("Node '{0}' is already processing")]
    AlreadyProcessing(String),

    /// The node was cleared or reprocessed while this request was in flight
    #[error("Preprocessing of node '{0}' was superseded")]
    Superseded(String),

    /// Recovery gave up; the user has to act
    #[error("{0}")]
    Manual(String),

    /// The workflow engine reported an error
    #[error("Engine error: {0}")]
    Engine(String),
}

impl From<node_engine::NodeEngineError> for PreprocessingError {
    fn from(e: node_engine::NodeEngineError) -> Self {
        Self::Engine(e.to_string())
    }
}
