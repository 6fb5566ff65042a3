//! Conditioning preprocessing pipeline
//!
//! Turns source images into guide images (pose, depth, edges...) for
//! conditioning nodes, outside of workflow runs:
//!
//! - [`PreprocessingCache`]: results keyed by source artifact and operator,
//!   bounded by entry count, memory and age
//! - [`ConnectionDebouncer`]: coalesces bursts of wiring changes per
//!   (source, target) pair
//! - [`PreprocessingStateManager`]: per-node `idle → processing →
//!   completed | error` tracking with a concurrency ceiling
//! - [`ErrorRecoveryService`]: failure classification and escalation to
//!   fallback
//!
//! [`ConditioningPipeline`] composes the four around a remote
//! [`Preprocessor`]; [`ConnectionTrigger`] feeds it from graph updates.

pub mod cache;
pub mod config;
pub mod debouncer;
pub mod error;
pub mod pipeline;
pub mod recovery;
pub mod state;
pub mod trigger;
pub mod types;

pub use cache::{cache_key, CacheStats, PreprocessingCache};
pub use config::{
    CacheConfig, DebounceConfig, PreprocessingConfig, RetryPolicy, StateManagerConfig,
};
pub use debouncer::{
    ConnectionDebouncer, ConnectionHandler, FlushReport, OperationKind, PendingOperation,
};
pub use error::{PreprocessingError, Result};
pub use pipeline::{
    ConditioningPipeline, MaintenanceTask, NullObserver, PipelineObserver, PreprocessOutcome,
    PreprocessRequest, Preprocessor,
};
pub use recovery::{
    ErrorCategory, ErrorRecoveryService, ErrorSummary, RecoveryAction, RecoveryDecision,
};
pub use state::{PreprocessingState, PreprocessingStateManager, PreprocessingStatus, StateChange};
pub use trigger::{ConnectionTrigger, PipelineConnectionHandler, WiringChanges};
pub use types::{NodeDataPatch, PreprocessedImageData};
