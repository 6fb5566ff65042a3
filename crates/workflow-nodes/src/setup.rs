//! Registry setup for host applications
//!
//! Hosts call [`builtin_registry`] at startup to get every node kind wired to
//! its operation. Conditioning shares one [`ConditioningPipeline`] with the
//! canvas wiring trigger, so preprocessing done while the user connects
//! nodes is reused by runs.
//!
//! # Example
//!
//! ```ignore
//! let client: Arc<dyn GenerationClient> = Arc::new(HttpGenerationClient::new(&service)?);
//! let pipeline = workflow_nodes::conditioning_pipeline(config, client.clone(), observer);
//! let registry = workflow_nodes::builtin_registry(client, pipeline.clone());
//! let engine = WorkflowEngine::new(Arc::new(registry), event_sink);
//! ```

use std::sync::Arc;

use node_engine::{NodeKindTag, NodeRegistry};
use preprocessing::{ConditioningPipeline, PipelineObserver, PreprocessingConfig};

use crate::control::RouterOperation;
use crate::input::SourceOperation;
use crate::output::SinkOperation;
use crate::processing::{ConditioningOperation, EngineOperation, ToolOperationExecutor};
use crate::remote::{GenerationClient, RemotePreprocessor};

/// Conditioning pipeline that preprocesses through `client`
pub fn conditioning_pipeline(
    config: PreprocessingConfig,
    client: Arc<dyn GenerationClient>,
    observer: Arc<dyn PipelineObserver>,
) -> Arc<ConditioningPipeline> {
    let preprocessor = Arc::new(RemotePreprocessor::new(client));
    Arc::new(ConditioningPipeline::new(config, preprocessor, observer))
}

/// Registry with an operation for every executable node kind
///
/// Annotations have no operation; the engine never dispatches them.
pub fn builtin_registry(
    client: Arc<dyn GenerationClient>,
    pipeline: Arc<ConditioningPipeline>,
) -> NodeRegistry {
    let mut registry = NodeRegistry::new();
    registry.register(NodeKindTag::Source, Arc::new(SourceOperation));
    registry.register(
        NodeKindTag::Conditioning,
        Arc::new(ConditioningOperation::new(pipeline)),
    );
    registry.register(
        NodeKindTag::Engine,
        Arc::new(EngineOperation::new(client.clone())),
    );
    registry.register(NodeKindTag::Tool, Arc::new(ToolOperationExecutor::new(client)));
    registry.register(NodeKindTag::Router, Arc::new(RouterOperation));
    registry.register(NodeKindTag::Sink, Arc::new(SinkOperation));

    log::debug!("Registered operations for {:?}", registry.kinds());
    registry
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use async_trait::async_trait;
    use node_engine::{
        Artifact, NodeEngineError, ToolOperation, VecEventSink, ValidationError, WorkflowBuilder,
        WorkflowEngine, WorkflowEvent,
    };
    use parking_lot::Mutex;
    use preprocessing::{PreprocessRequest, PreprocessedImageData, PreprocessingStatus};

    use super::*;
    use crate::remote::{GenerateRequest, RemoteError};

    /// Generation service double that derives artifacts from its inputs
    #[derive(Default)]
    struct FakeService {
        preprocess_calls: AtomicUsize,
        generate_calls: AtomicUsize,
        fail_generate: bool,
        preprocess_delay: Option<Duration>,
    }

    #[async_trait]
    impl GenerationClient for FakeService {
        async fn generate(&self, request: GenerateRequest) -> Result<Artifact, RemoteError> {
            self.generate_calls.fetch_add(1, Ordering::SeqCst);
            if self.fail_generate {
                return Err(RemoteError::Service {
                    status: 500,
                    message: "Service returned 500".into(),
                });
            }
            let images: Vec<&str> = request.images.values().map(String::as_str).collect();
            Ok(format!("gen({};{})", request.prompt, images.join(",")))
        }

        async fn run_tool(
            &self,
            operation: ToolOperation,
            images: Vec<Artifact>,
        ) -> Result<Artifact, RemoteError> {
            Ok(format!("{}({})", operation.as_str(), images.join(",")))
        }

        async fn preprocess(&self, image: &str, operator: &str) -> Result<Artifact, RemoteError> {
            self.preprocess_calls.fetch_add(1, Ordering::SeqCst);
            if let Some(delay) = self.preprocess_delay {
                tokio::time::sleep(delay).await;
            }
            Ok(format!("{}({})", operator, image))
        }
    }

    #[derive(Default)]
    struct CompletionLog {
        completed: Mutex<Vec<(String, bool)>>,
    }

    impl PipelineObserver for CompletionLog {
        fn on_preprocessing_completed(
            &self,
            node_id: &str,
            _data: &PreprocessedImageData,
            from_cache: bool,
        ) {
            self.completed.lock().push((node_id.to_string(), from_cache));
        }
    }

    struct Harness {
        engine: WorkflowEngine,
        pipeline: Arc<ConditioningPipeline>,
        service: Arc<FakeService>,
        observer: Arc<CompletionLog>,
        events: Arc<VecEventSink>,
    }

    fn harness(service: FakeService) -> Harness {
        let service = Arc::new(service);
        let observer = Arc::new(CompletionLog::default());
        let pipeline =
            conditioning_pipeline(PreprocessingConfig::default(), service.clone(), observer.clone());
        let registry = builtin_registry(service.clone(), pipeline.clone());
        let events = Arc::new(VecEventSink::new());
        Harness {
            engine: WorkflowEngine::new(Arc::new(registry), events.clone()),
            pipeline,
            service,
            observer,
            events,
        }
    }

    #[tokio::test]
    async fn test_rerun_reuses_warm_preprocessing_cache() {
        let h = harness(FakeService::default());
        let graph = WorkflowBuilder::new("wf", "Pose")
            .add_source("src", "https://img/x.png")
            .add_conditioning("pose", "pose")
            .add_sink("out")
            .connect("src", "pose")
            .connect("pose", "out")
            .build();

        let first = h.engine.run(&graph, "out").await.unwrap();
        assert_eq!(first.result.as_deref(), Some("pose(https://img/x.png)"));
        assert_eq!(h.service.preprocess_calls.load(Ordering::SeqCst), 1);

        let second = h.engine.run(&graph, "out").await.unwrap();
        assert_eq!(second.result, first.result);
        assert_eq!(second.order, vec!["src", "pose", "out"]);
        assert!(second.from_cache.is_empty());
        assert_eq!(h.service.preprocess_calls.load(Ordering::SeqCst), 1);
        assert_eq!(
            *h.observer.completed.lock(),
            vec![("pose".to_string(), false), ("pose".to_string(), true)]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_joins_preprocessing_started_by_wiring() {
        let h = harness(FakeService {
            preprocess_delay: Some(Duration::from_secs(1)),
            ..Default::default()
        });
        let graph = WorkflowBuilder::new("wf", "Pose")
            .add_source("src", "https://img/x.png")
            .add_conditioning("pose", "pose")
            .add_sink("out")
            .connect("src", "pose")
            .connect("pose", "out")
            .build();

        // The canvas connected src -> pose just before the run started
        let wiring = tokio::spawn({
            let pipeline = h.pipeline.clone();
            async move {
                let request = PreprocessRequest::new("pose", "https://img/x.png", "pose")
                    .from_source("src");
                pipeline.process(request).await
            }
        });
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(h.pipeline.states().is_processing("pose"));

        let report = h.engine.run(&graph, "out").await.unwrap();
        wiring.await.unwrap().unwrap();

        assert_eq!(report.result.as_deref(), Some("pose(https://img/x.png)"));
        assert!(!report.is_degraded());
        assert!(report.recovered.is_empty());
        assert_eq!(h.service.preprocess_calls.load(Ordering::SeqCst), 1);
        assert_eq!(
            h.pipeline.states().status("pose"),
            PreprocessingStatus::Completed
        );
    }

    #[tokio::test]
    async fn test_full_chain_threads_artifacts() {
        let h = harness(FakeService::default());
        let graph = WorkflowBuilder::new("wf", "Chain")
            .add_source("photo", "https://img/p.png")
            .add_conditioning("depth", "depth")
            .add_engine("gen", "a castle")
            .add_tool("up", ToolOperation::Upscale)
            .add_sink("out")
            .connect("photo", "depth")
            .connect("depth", "gen")
            .connect("gen", "up")
            .connect("up", "out")
            .build();

        let report = h.engine.run(&graph, "out").await.unwrap();
        assert_eq!(
            report.result.as_deref(),
            Some("upscale(gen(a castle;depth(https://img/p.png)))")
        );
        assert!(!report.is_degraded());
        assert_eq!(h.service.generate_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_engine_failure_aborts_the_run() {
        let h = harness(FakeService {
            fail_generate: true,
            ..Default::default()
        });
        let graph = WorkflowBuilder::new("wf", "Fail")
            .add_source("src", "https://img/x.png")
            .add_engine("gen", "a cat")
            .add_sink("out")
            .connect("src", "gen")
            .connect("gen", "out")
            .build();

        let err = h.engine.run(&graph, "out").await.unwrap_err();
        match err {
            NodeEngineError::NodeProcessing {
                node_id, critical, message, ..
            } => {
                assert_eq!(node_id, "gen");
                assert!(critical);
                assert!(message.contains("Service returned 500"));
            }
            other => panic!("Expected NodeProcessing, got {other:?}"),
        }
        assert!(h
            .events
            .events()
            .iter()
            .any(|e| matches!(e, WorkflowEvent::RunFailed { .. })));
    }

    #[tokio::test]
    async fn test_empty_source_aborts_at_the_sink_contract() {
        let h = harness(FakeService::default());
        let graph = WorkflowBuilder::new("wf", "Empty")
            .add_source("src", "")
            .add_conditioning("pose", "pose")
            .add_sink("out")
            .connect("src", "pose")
            .connect("pose", "out")
            .build();

        let err = h.engine.run(&graph, "out").await.unwrap_err();
        assert!(matches!(
            err,
            NodeEngineError::Validation(ValidationError::MissingInput { ref node_id, .. }) if node_id == "out"
        ));
        assert_eq!(h.service.preprocess_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_merge_tool_receives_inputs_in_handle_order() {
        let h = harness(FakeService::default());
        let graph = WorkflowBuilder::new("wf", "Merge")
            .add_source("a", "https://img/a.png")
            .add_source("b", "https://img/b.png")
            .add_tool("merge", ToolOperation::Merge)
            .connect_to("b", "merge", "second")
            .connect_to("a", "merge", "first")
            .build();

        let report = h.engine.run(&graph, "merge").await.unwrap();
        assert_eq!(
            report.result.as_deref(),
            Some("merge(https://img/a.png,https://img/b.png)")
        );
    }

    #[test]
    fn test_registry_covers_executable_kinds() {
        let service = Arc::new(FakeService::default());
        let pipeline = conditioning_pipeline(
            PreprocessingConfig::default(),
            service.clone(),
            Arc::new(preprocessing::NullObserver),
        );
        let registry = builtin_registry(service, pipeline);
        assert_eq!(registry.kinds().len(), 6);
        assert!(!registry.has_kind(NodeKindTag::Annotation));
    }
}
