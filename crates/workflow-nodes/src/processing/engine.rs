//! Generation engine operation

use std::sync::Arc;

use async_trait::async_trait;
use node_engine::{Artifact, GraphNode, NodeEngineError, NodeExecutor, NodeInputs, NodeKind};

use crate::remote::{GenerateRequest, GenerationClient};

/// Operation for `engine` nodes
///
/// Sends the prompt and every available input image (keyed by handle) to
/// the generation service.
pub struct EngineOperation {
    client: Arc<dyn GenerationClient>,
}

impl EngineOperation {
    pub fn new(client: Arc<dyn GenerationClient>) -> Self {
        Self { client }
    }
}

#[async_trait]
impl NodeExecutor for EngineOperation {
    async fn execute(&self, node: &GraphNode, inputs: NodeInputs) -> node_engine::Result<Artifact> {
        let NodeKind::Engine(data) = &node.kind else {
            return Err(NodeEngineError::failed(format!(
                "Engine operation cannot run {} node '{}'",
                node.tag(),
                node.id
            )));
        };

        log::debug!(
            "Engine '{}' generating with {} input image(s)",
            node.id,
            inputs.len()
        );
        let request = GenerateRequest {
            prompt: data.prompt.clone(),
            model: data.model.clone(),
            images: inputs,
        };
        Ok(self.client.generate(request).await?)
    }
}
