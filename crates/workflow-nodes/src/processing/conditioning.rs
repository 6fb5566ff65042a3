//! Conditioning operation
//!
//! Runs the node's operator over its image input through the shared
//! [`ConditioningPipeline`], so runs and canvas wiring changes share one
//! preprocessing cache. A warm cache entry answers without a remote call.

use std::sync::Arc;

use async_trait::async_trait;
use node_engine::{Artifact, GraphNode, NodeEngineError, NodeExecutor, NodeInputs, NodeKind};
use preprocessing::{ConditioningPipeline, PreprocessOutcome, PreprocessRequest};

use crate::first_input;

/// Operation for `conditioning` nodes
pub struct ConditioningOperation {
    pipeline: Arc<ConditioningPipeline>,
}

impl ConditioningOperation {
    /// Preferred input handle
    pub const PORT_IMAGE: &'static str = "image";

    pub fn new(pipeline: Arc<ConditioningPipeline>) -> Self {
        Self { pipeline }
    }
}

#[async_trait]
impl NodeExecutor for ConditioningOperation {
    async fn execute(&self, node: &GraphNode, inputs: NodeInputs) -> node_engine::Result<Artifact> {
        let NodeKind::Conditioning(data) = &node.kind else {
            return Err(NodeEngineError::failed(format!(
                "Conditioning operation cannot run {} node '{}'",
                node.tag(),
                node.id
            )));
        };

        let Some(image) = first_input(&inputs, &[Self::PORT_IMAGE]) else {
            // Nothing new to process; reuse the earlier guide image
            return node
                .kind
                .known_artifact()
                .map(str::to_string)
                .ok_or_else(|| {
                    NodeEngineError::failed(format!("Conditioning '{}' has no input", node.id))
                });
        };

        let request = PreprocessRequest::new(node.id.clone(), image, data.operator.clone());
        match self.pipeline.process(request).await {
            Ok(PreprocessOutcome::Processed { data, from_cache }) => {
                if from_cache {
                    log::debug!("Conditioning '{}' answered from preprocessing cache", node.id);
                }
                Ok(data.artifact_url)
            }
            // Surface as a failure so the run records the degradation
            Ok(PreprocessOutcome::Fallback { reason, .. }) => Err(NodeEngineError::failed(reason)),
            Err(e) => Err(NodeEngineError::failed(e.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use node_engine::ConditioningData;
    use preprocessing::{NullObserver, PreprocessingConfig, PreprocessingError, Preprocessor};

    use super::*;

    #[derive(Default)]
    struct FailingPreprocessor {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl Preprocessor for FailingPreprocessor {
        async fn preprocess(&self, _source: &str, _operator: &str) -> preprocessing::Result<String> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Err(PreprocessingError::Authentication("bad key".into()))
        }
    }

    fn conditioning(preprocessed: Option<&str>) -> GraphNode {
        GraphNode::new(
            "pose",
            NodeKind::Conditioning(ConditioningData {
                operator: "pose".into(),
                preprocessed_url: preprocessed.map(str::to_string),
            }),
        )
    }

    fn operation() -> (ConditioningOperation, Arc<FailingPreprocessor>) {
        let preprocessor = Arc::new(FailingPreprocessor::default());
        let pipeline = Arc::new(ConditioningPipeline::new(
            PreprocessingConfig::default(),
            preprocessor.clone(),
            Arc::new(NullObserver),
        ));
        (ConditioningOperation::new(pipeline), preprocessor)
    }

    #[tokio::test]
    async fn test_reuses_earlier_guide_without_input() {
        let (operation, preprocessor) = operation();
        let artifact = operation
            .execute(&conditioning(Some("https://img/pose.png")), NodeInputs::new())
            .await
            .unwrap();
        assert_eq!(artifact, "https://img/pose.png");
        assert_eq!(preprocessor.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_pipeline_failure_is_recoverable() {
        let (operation, _) = operation();
        let mut inputs = NodeInputs::new();
        inputs.insert("default".into(), "https://img/a.png".into());

        let err = operation
            .execute(&conditioning(None), inputs)
            .await
            .unwrap_err();
        assert!(!err.is_fatal());
        assert!(err.to_string().contains("API credentials"));
    }
}
