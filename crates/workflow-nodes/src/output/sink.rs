//! Output sink / preview operation

use async_trait::async_trait;
use node_engine::{Artifact, GraphNode, NodeEngineError, NodeExecutor, NodeInputs};

use crate::first_input;

/// Operation for `sink` nodes
///
/// Publishes its input unchanged. A sink whose input produced nothing falls
/// back to the artifact it already holds.
#[derive(Debug, Clone, Copy, Default)]
pub struct SinkOperation;

impl SinkOperation {
    /// Preferred input handle
    pub const PORT_IMAGE: &'static str = "image";
}

#[async_trait]
impl NodeExecutor for SinkOperation {
    async fn execute(&self, node: &GraphNode, inputs: NodeInputs) -> node_engine::Result<Artifact> {
        first_input(&inputs, &[Self::PORT_IMAGE])
            .or_else(|| node.kind.known_artifact().map(str::to_string))
            .ok_or_else(|| NodeEngineError::failed(format!("Sink '{}' has nothing to show", node.id)))
    }
}

#[cfg(test)]
mod tests {
    use node_engine::{NodeKind, SinkData};

    use super::*;

    #[tokio::test]
    async fn test_prefers_input_over_held_artifact() {
        let node = GraphNode::new(
            "out",
            NodeKind::Sink(SinkData {
                artifact_url: Some("https://img/old.png".into()),
            }),
        );
        let mut inputs = NodeInputs::new();
        inputs.insert("default".into(), "https://img/new.png".into());

        let artifact = SinkOperation.execute(&node, inputs).await.unwrap();
        assert_eq!(artifact, "https://img/new.png");

        let artifact = SinkOperation.execute(&node, NodeInputs::new()).await.unwrap();
        assert_eq!(artifact, "https://img/old.png");
    }
}
