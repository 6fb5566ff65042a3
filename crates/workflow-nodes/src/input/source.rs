//! Image source operation
//!
//! A source node yields its configured image locator. Sources fed by
//! another node (e.g. a canvas capture routed in) forward that input when
//! they have no locator of their own.

use async_trait::async_trait;
use node_engine::{Artifact, GraphNode, NodeEngineError, NodeExecutor, NodeInputs, NodeKind};

use crate::first_input;

/// Operation for `source` nodes
#[derive(Debug, Clone, Copy, Default)]
pub struct SourceOperation;

#[async_trait]
impl NodeExecutor for SourceOperation {
    async fn execute(&self, node: &GraphNode, inputs: NodeInputs) -> node_engine::Result<Artifact> {
        let NodeKind::Source(data) = &node.kind else {
            return Err(NodeEngineError::failed(format!(
                "Source operation cannot run {} node '{}'",
                node.tag(),
                node.id
            )));
        };

        if let Some(url) = data.url.as_deref().filter(|u| !u.trim().is_empty()) {
            return Ok(url.to_string());
        }
        first_input(&inputs, &[]).ok_or_else(|| {
            NodeEngineError::failed(format!("Source '{}' has no image", node.id))
        })
    }
}
