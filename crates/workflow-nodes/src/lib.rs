//! Workflow Nodes
//!
//! Operations for every executable node kind of the canvas workflow engine.
//! Each one is a leaf: it receives a node and the artifacts of its direct
//! dependencies and returns a single artifact, calling out to the remote
//! generation service where needed.
//!
//! # Categories
//!
//! - **Input**: image sources
//! - **Processing**: conditioning, generation engines and post-processing tools
//! - **Control**: routers
//! - **Output**: sinks and previews

pub mod control;
pub mod input;
pub mod output;
pub mod processing;
pub mod remote;
pub mod setup;

pub use control::*;
pub use input::*;
pub use output::*;
pub use processing::*;
pub use remote::{
    GenerateRequest, GenerationClient, HttpGenerationClient, RemoteError, RemotePreprocessor,
    ServiceConfig,
};
pub use setup::{builtin_registry, conditioning_pipeline};

use node_engine::{Artifact, NodeInputs, DEFAULT_INPUT};

/// Pick an input: the first present preferred handle, then the `default`
/// input, then whichever comes first in handle order
pub(crate) fn first_input(inputs: &NodeInputs, preferred: &[&str]) -> Option<Artifact> {
    preferred
        .iter()
        .find_map(|handle| inputs.get(*handle))
        .or_else(|| inputs.get(DEFAULT_INPUT))
        .or_else(|| inputs.values().next())
        .cloned()
}
