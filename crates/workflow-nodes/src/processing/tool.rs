//! Post-processing tool operation

use std::sync::Arc;

use async_trait::async_trait;
use node_engine::{Artifact, GraphNode, NodeEngineError, NodeExecutor, NodeInputs, NodeKind};

use crate::remote::GenerationClient;

/// Operation for `tool` nodes
///
/// Inputs are passed to the service in handle order.
pub struct ToolOperationExecutor {
    client: Arc<dyn GenerationClient>,
}

impl ToolOperationExecutor {
    pub fn new(client: Arc<dyn GenerationClient>) -> Self {
        Self { client }
    }
}

#[async_trait]
impl NodeExecutor for ToolOperationExecutor {
    async fn execute(&self, node: &GraphNode, inputs: NodeInputs) -> node_engine::Result<Artifact> {
        let NodeKind::Tool(data) = &node.kind else {
            return Err(NodeEngineError::failed(format!(
                "Tool operation cannot run {} node '{}'",
                node.tag(),
                node.id
            )));
        };

        let images: Vec<Artifact> = inputs.into_values().collect();
        if images.len() < data.operation.min_inputs() {
            return Err(NodeEngineError::failed(format!(
                "{} needs {} image(s), got {}",
                data.operation.as_str(),
                data.operation.min_inputs(),
                images.len()
            )));
        }
        Ok(self.client.run_tool(data.operation, images).await?)
    }
}
