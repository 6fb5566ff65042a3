//! Run loop
//!
//! Walks a prepared execution order one node at a time. Each node is either
//! served from the result cache or validated against its input contract and
//! dispatched to the operation registered for its kind. Failures are
//! classified with the run's `Criticality`: critical ones abort the run,
//! everything else degrades to a warning plus a kind-specific fallback.

use std::collections::BTreeMap;
use std::time::Instant;

use serde::Serialize;

use crate::engine::{prepare_run, PreparedRun, WorkflowEngine};
use crate::error::{NodeEngineError, Result};
use crate::events::{ClassifiedError, WorkflowEvent};
use crate::types::{
    Artifact, GraphNode, NodeId, NodeInputs, NodeKind, NodeKindTag, WorkflowGraph, DEFAULT_INPUT,
};
use crate::validation::{check_input_contract, ValidationError};

/// What a non-critical node contributes after it failed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FallbackStrategy {
    /// The node's persisted artifact, or its last successful output
    UseLastKnownArtifact,
    /// Forward an input unchanged
    PassThroughInput,
    /// Contribute nothing
    SkipSilently,
}

impl FallbackStrategy {
    pub fn for_kind(kind: NodeKindTag) -> Self {
        match kind {
            NodeKindTag::Conditioning | NodeKindTag::Tool | NodeKindTag::Router => {
                FallbackStrategy::PassThroughInput
            }
            NodeKindTag::Source | NodeKindTag::Engine | NodeKindTag::Sink => {
                FallbackStrategy::UseLastKnownArtifact
            }
            NodeKindTag::Annotation => FallbackStrategy::SkipSilently,
        }
    }

    /// Produce the fallback value, if the strategy has one to offer
    pub fn apply(
        &self,
        node: &GraphNode,
        inputs: &NodeInputs,
        last_known: Option<&str>,
    ) -> Option<Artifact> {
        match self {
            FallbackStrategy::UseLastKnownArtifact => node
                .kind
                .known_artifact()
                .or(last_known)
                .map(str::to_string),
            FallbackStrategy::PassThroughInput => {
                let routed = match &node.kind {
                    NodeKind::Router(data) => data.route.as_deref().and_then(|r| inputs.get(r)),
                    _ => None,
                };
                routed
                    .or_else(|| inputs.get(DEFAULT_INPUT))
                    .or_else(|| inputs.values().next())
                    .cloned()
            }
            FallbackStrategy::SkipSilently => None,
        }
    }
}

/// Outcome of a completed run
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RunReport {
    pub execution_id: String,
    pub target: NodeId,
    /// Execution order, target last
    pub order: Vec<NodeId>,
    /// The target's artifact
    pub result: Option<Artifact>,
    /// Every artifact produced or reused in this run
    pub results: BTreeMap<NodeId, Artifact>,
    /// One human-readable message per degraded node
    pub warnings: Vec<String>,
    /// Non-critical nodes that failed but produced a fallback value
    pub recovered: Vec<NodeId>,
    /// Nodes that contributed no result
    pub skipped: Vec<NodeId>,
    /// Nodes served from the result cache
    pub from_cache: Vec<NodeId>,
    pub duration_ms: u64,
}

impl RunReport {
    /// Whether any node degraded during the run
    pub fn is_degraded(&self) -> bool {
        !self.warnings.is_empty()
    }
}

/// Bookkeeping for one run
struct RunState {
    execution_id: String,
    warnings: Vec<String>,
    recovered: Vec<NodeId>,
    skipped: Vec<NodeId>,
    from_cache: Vec<NodeId>,
}

impl WorkflowEngine {
    /// Execute the workflow up to `target`
    ///
    /// Runs are sequential: one node is dispatched at a time and every
    /// result is written to the context before the next node starts.
    pub async fn run(&self, graph: &WorkflowGraph, target: &str) -> Result<RunReport> {
        let started = Instant::now();
        let execution_id = format!("exec-{}", uuid::Uuid::new_v4());

        let prepared = {
            let mut context = self.context.write().await;
            if context.is_shut_down() {
                return Err(NodeEngineError::Cancelled);
            }
            let prepared = match prepare_run(graph, target, &context) {
                Ok(prepared) => prepared,
                Err(e) => {
                    log::error!("Workflow '{}' rejected: {}", graph.id, e);
                    self.emit(WorkflowEvent::RunFailed {
                        workflow_id: graph.id.clone(),
                        execution_id: execution_id.clone(),
                        error: e.to_string(),
                    });
                    return Err(e);
                }
            };

            // Seed this run with primed artifacts and the pruned boundaries
            context.begin_run();
            for &boundary in &prepared.boundaries {
                let node = &graph.nodes[boundary];
                let artifact = node
                    .kind
                    .known_artifact()
                    .map(str::to_string)
                    .or_else(|| context.last_known(&node.id).cloned());
                if let Some(artifact) = artifact {
                    context.insert_result(&node.id, &artifact);
                }
            }
            prepared
        };

        let order: Vec<NodeId> = prepared
            .order
            .iter()
            .map(|&i| prepared.map.id(i).to_string())
            .collect();

        log::info!(
            "Starting run {} of workflow '{}' to '{}' ({} nodes, {} pruned)",
            execution_id,
            graph.id,
            target,
            order.len(),
            prepared.boundaries.len()
        );
        self.emit(WorkflowEvent::RunStarted {
            workflow_id: graph.id.clone(),
            execution_id: execution_id.clone(),
            target: target.to_string(),
            order: order.clone(),
        });

        let mut state = RunState {
            execution_id,
            warnings: Vec::new(),
            recovered: Vec::new(),
            skipped: Vec::new(),
            from_cache: Vec::new(),
        };

        if let Err(e) = self.check_executors(graph, &prepared).await {
            return Err(self.abort(graph, &state, e));
        }

        for &index in &prepared.order {
            if let Err(e) = self.run_node(graph, &prepared, index, &mut state).await {
                return Err(self.abort(graph, &state, e));
            }
        }

        let results = self.context.read().await.results().to_map();
        let result = results.get(target).cloned();

        self.emit(WorkflowEvent::RunCompleted {
            workflow_id: graph.id.clone(),
            execution_id: state.execution_id.clone(),
            result: result.clone(),
            warnings: state.warnings.len(),
        });
        log::info!(
            "Run {} finished with {} warning(s)",
            state.execution_id,
            state.warnings.len()
        );

        Ok(RunReport {
            execution_id: state.execution_id,
            target: target.to_string(),
            order,
            result,
            results: results.into_iter().collect(),
            warnings: state.warnings,
            recovered: state.recovered,
            skipped: state.skipped,
            from_cache: state.from_cache,
            duration_ms: started.elapsed().as_millis() as u64,
        })
    }

    /// Every node that will be dispatched must have an operation
    async fn check_executors(&self, graph: &WorkflowGraph, prepared: &PreparedRun) -> Result<()> {
        let context = self.context.read().await;
        for &index in &prepared.order {
            let node = &graph.nodes[index];
            let tag = node.tag();
            if tag == NodeKindTag::Annotation || context.results().contains(&node.id) {
                continue;
            }
            if !self.registry.has_kind(tag) {
                return Err(ValidationError::NoExecutor {
                    node_id: node.id.clone(),
                    kind: tag,
                }
                .into());
            }
        }
        Ok(())
    }

    async fn run_node(
        &self,
        graph: &WorkflowGraph,
        prepared: &PreparedRun,
        index: usize,
        state: &mut RunState,
    ) -> Result<()> {
        let node = &graph.nodes[index];
        let tag = node.tag();
        let critical = prepared.criticality.is_critical(index);

        let (cached, inputs, last_known) = {
            let context = self.context.read().await;
            if context.is_shut_down() {
                return Err(NodeEngineError::Cancelled);
            }
            let cached = context.results().get(&node.id).cloned();
            let inputs = collect_inputs(prepared, index, |id| context.results().get(id).cloned());
            (cached, inputs, context.last_known(&node.id).cloned())
        };

        // Cache short-circuit
        if let Some(artifact) = cached {
            log::debug!("Node '{}' served from cache", node.id);
            state.from_cache.push(node.id.clone());
            self.emit(WorkflowEvent::node_result(
                &node.id,
                &state.execution_id,
                &artifact,
                true,
            ));
            return Ok(());
        }

        if tag == NodeKindTag::Annotation {
            state.skipped.push(node.id.clone());
            return Ok(());
        }

        // Validation precedes dispatch
        if let Err(violation) = check_input_contract(node, &inputs) {
            if critical {
                self.emit_node_error(node, state, true, violation.to_string());
                return Err(violation.into());
            }
            let message = format!("Node '{}' skipped: {}", node.id, violation);
            self.warn(node, state, message);
            state.skipped.push(node.id.clone());
            return Ok(());
        }

        let expected = prepared.map.dependencies(index).len();
        if inputs.len() < expected {
            let message = format!(
                "Node '{}' running without {} of its {} input(s)",
                node.id,
                expected - inputs.len(),
                expected
            );
            self.warn(node, state, message);
        }

        let executor = self.registry.get_executor(tag).ok_or_else(|| {
            NodeEngineError::from(ValidationError::NoExecutor {
                node_id: node.id.clone(),
                kind: tag,
            })
        })?;

        log::debug!("Dispatching {} node '{}'", tag, node.id);
        self.emit(WorkflowEvent::node_processing(&node.id, &state.execution_id, true));
        let outcome = executor.execute(node, inputs.clone()).await;
        self.emit(WorkflowEvent::node_processing(&node.id, &state.execution_id, false));

        match outcome {
            Ok(artifact) => {
                self.context.write().await.record(&node.id, &artifact);
                self.emit(WorkflowEvent::node_result(
                    &node.id,
                    &state.execution_id,
                    &artifact,
                    false,
                ));
                Ok(())
            }
            Err(e) if critical || e.is_fatal() => {
                let message = failure_message(e);
                self.emit_node_error(node, state, true, message.clone());
                Err(NodeEngineError::NodeProcessing {
                    node_id: node.id.clone(),
                    kind: tag,
                    critical: true,
                    message,
                })
            }
            Err(e) => {
                let message = failure_message(e);
                self.emit_node_error(node, state, false, message.clone());

                let fallback = FallbackStrategy::for_kind(tag);
                match fallback.apply(node, &inputs, last_known.as_deref()) {
                    Some(artifact) => {
                        self.warn(
                            node,
                            state,
                            format!("Node '{}' failed, using fallback: {}", node.id, message),
                        );
                        self.context
                            .write()
                            .await
                            .insert_result(&node.id, &artifact);
                        state.recovered.push(node.id.clone());
                        self.emit(WorkflowEvent::node_result(
                            &node.id,
                            &state.execution_id,
                            &artifact,
                            false,
                        ));
                    }
                    None => {
                        self.warn(
                            node,
                            state,
                            format!("Node '{}' failed without fallback: {}", node.id, message),
                        );
                        state.skipped.push(node.id.clone());
                    }
                }
                Ok(())
            }
        }
    }

    fn warn(&self, node: &GraphNode, state: &mut RunState, message: String) {
        log::warn!("{}", message);
        self.emit(WorkflowEvent::NodeWarning {
            node_id: node.id.clone(),
            execution_id: state.execution_id.clone(),
            message: message.clone(),
        });
        state.warnings.push(message);
    }

    fn emit_node_error(&self, node: &GraphNode, state: &RunState, critical: bool, message: String) {
        self.emit(WorkflowEvent::NodeError {
            node_id: node.id.clone(),
            execution_id: state.execution_id.clone(),
            error: ClassifiedError {
                kind: node.tag(),
                critical,
                message,
            },
        });
    }

    fn abort(&self, graph: &WorkflowGraph, state: &RunState, error: NodeEngineError) -> NodeEngineError {
        log::error!("Run {} aborted: {}", state.execution_id, error);
        self.emit(WorkflowEvent::RunFailed {
            workflow_id: graph.id.clone(),
            execution_id: state.execution_id.clone(),
            error: error.to_string(),
        });
        error
    }
}

/// Inputs of a node, from the dependencies that produced a result
///
/// Keyed by the edge's target handle. Unlabelled edges use
/// [`DEFAULT_INPUT`] when they are the node's only input and the source
/// node id otherwise.
fn collect_inputs(
    prepared: &PreparedRun,
    index: usize,
    lookup: impl Fn(&str) -> Option<Artifact>,
) -> NodeInputs {
    let deps = prepared.map.dependencies(index);
    let mut inputs = NodeInputs::new();
    for dep in deps {
        let source = prepared.map.id(dep.node);
        let Some(artifact) = lookup(source) else {
            continue;
        };
        let key = match &dep.handle {
            Some(handle) if !inputs.contains_key(handle) => handle.clone(),
            Some(handle) => format!("{}:{}", handle, source),
            None if deps.len() == 1 => DEFAULT_INPUT.to_string(),
            None => source.to_string(),
        };
        inputs.insert(key, artifact);
    }
    inputs
}

fn failure_message(error: NodeEngineError) -> String {
    match error {
        NodeEngineError::ExecutionFailed(message) => message,
        other => other.to_string(),
    }
}
