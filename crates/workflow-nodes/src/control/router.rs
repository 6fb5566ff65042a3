//! Router operation
//!
//! Forwards one of its inputs: the configured route when that handle has a
//! value, the `default` input otherwise, else the first available one.

use async_trait::async_trait;
use node_engine::{Artifact, GraphNode, NodeEngineError, NodeExecutor, NodeInputs, NodeKind};

use crate::first_input;

/// Operation for `router` nodes
#[derive(Debug, Clone, Copy, Default)]
pub struct RouterOperation;

#[async_trait]
impl NodeExecutor for RouterOperation {
    async fn execute(&self, node: &GraphNode, inputs: NodeInputs) -> node_engine::Result<Artifact> {
        let route = match &node.kind {
            NodeKind::Router(data) => data.route.as_deref(),
            _ => None,
        };
        let preferred: Vec<&str> = route.into_iter().collect();

        if let Some(route) = route {
            if !inputs.contains_key(route) {
                log::debug!(
                    "Router '{}' has no input on route '{}', using fallback input",
                    node.id,
                    route
                );
            }
        }
        first_input(&inputs, &preferred)
            .ok_or_else(|| NodeEngineError::failed(format!("Router '{}' has no input", node.id)))
    }
}
