//! Output nodes
//!
//! Nodes that display or export results.

mod sink;

pub use sink::SinkOperation;
