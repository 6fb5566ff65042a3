//! Input nodes
//!
//! Nodes that bring images into the workflow.

mod source;

pub use source::SourceOperation;
