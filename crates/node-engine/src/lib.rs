//! Node Engine - Demand-driven workflow execution for image canvases
//!
//! This crate turns a canvas graph of nodes and edges into a run that
//! computes exactly what one target node needs. It supports:
//!
//! - Boundary pruning at sinks that already hold a persisted artifact
//! - Cycle detection reporting every cycle as a closed node path
//! - Topological scheduling ending at the requested target
//! - Per-run result caching with explicitly primed artifacts
//! - Critical / non-critical failure classification with fallbacks
//!
//! # Architecture
//!
//! - `DependencyMap`: index arena of `node -> direct inputs`
//! - `WorkflowEngine`: plans and runs, owns the `EngineContext`
//! - `NodeRegistry`: maps each `NodeKindTag` to its operation
//! - `EventSink`: generic event streaming (not tied to any UI)
//!
//! # Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use node_engine::{NodeRegistry, NullEventSink, WorkflowBuilder, WorkflowEngine};
//!
//! let graph = WorkflowBuilder::new("wf", "Pose transfer")
//!     .add_source("src", "https://img/a.png")
//!     .add_conditioning("pose", "pose")
//!     .add_sink("out")
//!     .connect("src", "pose")
//!     .connect("pose", "out")
//!     .build();
//!
//! let engine = WorkflowEngine::new(Arc::new(registry), Arc::new(NullEventSink));
//! let report = engine.run(&graph, "out").await?;
//! ```

pub mod builder;
pub mod criticality;
pub mod cycle;
pub mod engine;
pub mod error;
pub mod events;
pub mod executor;
pub mod graph;
pub mod prune;
pub mod registry;
pub mod scheduler;
pub mod types;
pub mod validation;

// Re-export key types
pub use builder::WorkflowBuilder;
pub use criticality::{CriticalReason, Criticality};
pub use cycle::{ensure_acyclic, find_cycles};
pub use engine::{EngineContext, ExecutionPlan, ResultCache, WorkflowEngine};
pub use error::{NodeEngineError, Result};
pub use events::{ClassifiedError, EventError, EventSink, NullEventSink, VecEventSink, WorkflowEvent};
pub use executor::{FallbackStrategy, RunReport};
pub use graph::{Dependency, DependencyMap};
pub use prune::prune_at_boundaries;
pub use registry::{CallbackNodeExecutor, NodeExecutor, NodeRegistry, SyncCallbackNodeExecutor};
pub use scheduler::execution_order;
pub use types::*;
pub use validation::{check_input_contract, validate_run_request, validate_workflow, ValidationError};
