//! Processing nodes
//!
//! Nodes that derive or generate images through remote services.

mod conditioning;
mod engine;
mod tool;

pub use conditioning::ConditioningOperation;
pub use engine::EngineOperation;
pub use tool::ToolOperationExecutor;
