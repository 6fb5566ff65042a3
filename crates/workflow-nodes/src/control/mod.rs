//! Control nodes
//!
//! Nodes that steer artifacts between branches.

mod router;

pub use router::RouterOperation;
