//! Engine context and run planning
//!
//! `EngineContext` replaces ambient per-session stores: it is created with
//! the engine, threaded through every run, reset explicitly between
//! sessions and cleared on shutdown.
//!
//! # Key Concepts
//!
//! - **Result cache**: per-run `node -> artifact`, consulted before dispatch
//! - **Primed artifacts**: explicitly seeded results that survive across runs
//! - **Last known artifacts**: most recent successful output per node, used
//!   by the "use last known artifact" fallback and to recognise boundaries
//! - **Plan**: validation, boundary pruning, cycle check and ordering,
//!   computed before anything is dispatched

use std::collections::HashMap;
use std::sync::Arc;

use serde::Serialize;
use tokio::sync::RwLock;

use crate::criticality::Criticality;
use crate::cycle::ensure_acyclic;
use crate::error::{NodeEngineError, Result};
use crate::events::{EventSink, WorkflowEvent};
use crate::graph::DependencyMap;
use crate::prune::prune_at_boundaries;
use crate::registry::NodeRegistry;
use crate::scheduler::execution_order;
use crate::types::{Artifact, NodeId, WorkflowGraph};
use crate::validation::validate_run_request;

/// Per-run `node -> artifact` store
#[derive(Debug, Clone, Default)]
pub struct ResultCache {
    results: HashMap<NodeId, Artifact>,
}

impl ResultCache {
    pub fn get(&self, node_id: &str) -> Option<&Artifact> {
        self.results.get(node_id)
    }

    pub fn contains(&self, node_id: &str) -> bool {
        self.results.contains_key(node_id)
    }

    pub fn insert(&mut self, node_id: impl Into<NodeId>, artifact: impl Into<Artifact>) {
        self.results.insert(node_id.into(), artifact.into());
    }

    pub fn len(&self) -> usize {
        self.results.len()
    }

    pub fn is_empty(&self) -> bool {
        self.results.is_empty()
    }

    pub fn clear(&mut self) {
        self.results.clear();
    }

    /// Snapshot of all results
    pub fn to_map(&self) -> HashMap<NodeId, Artifact> {
        self.results.clone()
    }
}

/// State shared by every run of one engine instance
#[derive(Debug, Default)]
pub struct EngineContext {
    results: ResultCache,
    primed: HashMap<NodeId, Artifact>,
    last_known: HashMap<NodeId, Artifact>,
    shut_down: bool,
}

impl EngineContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed a result that every following run reuses without dispatching
    pub fn prime(&mut self, node_id: impl Into<NodeId>, artifact: impl Into<Artifact>) {
        self.primed.insert(node_id.into(), artifact.into());
    }

    /// Remove a primed result
    pub fn unprime(&mut self, node_id: &str) -> Option<Artifact> {
        self.primed.remove(node_id)
    }

    /// Results of the current (or most recent) run
    pub fn results(&self) -> &ResultCache {
        &self.results
    }

    /// Most recent successful artifact of a node across runs
    pub fn last_known(&self, node_id: &str) -> Option<&Artifact> {
        self.last_known.get(node_id)
    }

    /// Store a freshly computed result
    pub fn record(&mut self, node_id: &str, artifact: &str) {
        self.results.insert(node_id, artifact);
        self.last_known.insert(node_id.to_string(), artifact.to_string());
    }

    /// Store a result without making it a last known artifact
    pub(crate) fn insert_result(&mut self, node_id: &str, artifact: &str) {
        self.results.insert(node_id, artifact);
    }

    /// Clear per-run results and seed them with the primed artifacts
    pub(crate) fn begin_run(&mut self) {
        self.results.clear();
        for (node_id, artifact) in &self.primed {
            self.results.insert(node_id.clone(), artifact.clone());
        }
    }

    /// Forget everything learned in this session
    pub fn reset(&mut self) {
        self.results.clear();
        self.primed.clear();
        self.last_known.clear();
    }

    /// Reset and refuse further runs
    pub fn shutdown(&mut self) {
        self.reset();
        self.shut_down = true;
    }

    pub fn is_shut_down(&self) -> bool {
        self.shut_down
    }
}

/// Public view of a planned run
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionPlan {
    pub target: NodeId,
    /// Nodes in execution order, target last
    pub order: Vec<NodeId>,
    /// Boundary nodes whose upstream branch was pruned
    pub pruned: Vec<NodeId>,
    /// Nodes whose failure aborts the run
    pub critical: Vec<NodeId>,
}

/// Everything the executor needs, indexed by the dependency map
pub(crate) struct PreparedRun {
    pub map: DependencyMap,
    pub target: usize,
    pub order: Vec<usize>,
    pub boundaries: Vec<usize>,
    pub criticality: Criticality,
}

impl PreparedRun {
    pub fn to_plan(&self) -> ExecutionPlan {
        let ids = |v: &[usize]| v.iter().map(|&i| self.map.id(i).to_string()).collect();
        ExecutionPlan {
            target: self.map.id(self.target).to_string(),
            order: ids(&self.order),
            pruned: ids(&self.boundaries),
            critical: ids(&self.criticality.critical_nodes()),
        }
    }
}

/// Validate, prune, check for cycles and order a run
pub(crate) fn prepare_run(
    graph: &WorkflowGraph,
    target: &str,
    context: &EngineContext,
) -> Result<PreparedRun> {
    let errors = validate_run_request(graph, target);
    if let Some(first) = errors.into_iter().next() {
        return Err(first.into());
    }

    let original = DependencyMap::build(graph)?;
    let target_index = original
        .index_of(target)
        .ok_or_else(|| NodeEngineError::failed(format!("Target '{}' vanished", target)))?;
    let criticality = Criticality::classify(graph, &original, target_index);

    let mut map = original;
    let boundaries = prune_at_boundaries(&mut map, target_index, |i| {
        let node = &graph.nodes[i];
        node.tag().is_boundary_capable()
            && (node.kind.known_artifact().is_some()
                || context.primed.contains_key(&node.id)
                || context.last_known.contains_key(&node.id))
    });

    ensure_acyclic(&map)?;
    let order = execution_order(&map, target_index)?;

    Ok(PreparedRun {
        map,
        target: target_index,
        order,
        boundaries,
        criticality,
    })
}

/// Long-lived workflow engine
///
/// Owns the node registry, the shared context and the event sink. Runs are
/// executed sequentially through [`WorkflowEngine::run`].
pub struct WorkflowEngine {
    pub(crate) registry: Arc<NodeRegistry>,
    pub(crate) context: Arc<RwLock<EngineContext>>,
    pub(crate) event_sink: Arc<dyn EventSink>,
}

impl WorkflowEngine {
    /// Create a new engine
    pub fn new(registry: Arc<NodeRegistry>, event_sink: Arc<dyn EventSink>) -> Self {
        Self {
            registry,
            context: Arc::new(RwLock::new(EngineContext::new())),
            event_sink,
        }
    }

    /// Get a reference to the shared context
    pub fn context(&self) -> &Arc<RwLock<EngineContext>> {
        &self.context
    }

    /// Get a reference to the registry
    pub fn registry(&self) -> &NodeRegistry {
        &self.registry
    }

    /// Compute what a run would do, without executing anything
    pub async fn plan(&self, graph: &WorkflowGraph, target: &str) -> Result<ExecutionPlan> {
        let context = self.context.read().await;
        prepare_run(graph, target, &context).map(|prepared| prepared.to_plan())
    }

    /// Send an event to the event sink, logging delivery failures
    pub(crate) fn emit(&self, event: WorkflowEvent) {
        if let Err(e) = self.event_sink.send(event) {
            log::warn!("Failed to deliver workflow event: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builder::WorkflowBuilder;
    use crate::events::NullEventSink;

    fn engine() -> WorkflowEngine {
        WorkflowEngine::new(Arc::new(NodeRegistry::new()), Arc::new(NullEventSink))
    }

    #[test]
    fn test_begin_run_seeds_primed_only() {
        let mut ctx = EngineContext::new();
        ctx.record("gen", "https://img/old.png");
        ctx.prime("pose", "https://img/pose.png");

        ctx.begin_run();
        assert!(ctx.results().contains("pose"));
        assert!(!ctx.results().contains("gen"));
        assert_eq!(ctx.last_known("gen").map(String::as_str), Some("https://img/old.png"));

        ctx.reset();
        ctx.begin_run();
        assert!(ctx.results().is_empty());
        assert!(ctx.last_known("gen").is_none());
    }

    #[tokio::test]
    async fn test_plan_prunes_at_persisted_preview() {
        let graph = WorkflowBuilder::new("wf", "Preview")
            .add_source("src", "https://img/a.png")
            .add_engine("gen", "a cat")
            .add_persisted_sink("preview", "https://img/gen.png")
            .add_tool("upscale", crate::types::ToolOperation::Upscale)
            .add_sink("out")
            .connect("src", "gen")
            .connect("gen", "preview")
            .connect("preview", "upscale")
            .connect("upscale", "out")
            .build();

        let plan = engine().plan(&graph, "out").await.unwrap();
        assert_eq!(plan.order, vec!["preview", "upscale", "out"]);
        assert_eq!(plan.pruned, vec!["preview"]);
        assert!(plan.critical.contains(&"out".to_string()));
        assert!(plan.critical.contains(&"upscale".to_string()));
    }

    #[tokio::test]
    async fn test_plan_uses_last_known_artifact_as_boundary() {
        let graph = WorkflowBuilder::new("wf", "Preview")
            .add_source("src", "https://img/a.png")
            .add_sink("preview")
            .add_router("route")
            .add_sink("out")
            .connect("src", "preview")
            .connect("preview", "route")
            .connect("route", "out")
            .build();
        let engine = engine();

        let plan = engine.plan(&graph, "out").await.unwrap();
        assert_eq!(plan.order, vec!["src", "preview", "route", "out"]);

        engine.context().write().await.record("preview", "https://img/prev.png");
        let plan = engine.plan(&graph, "out").await.unwrap();
        assert_eq!(plan.order, vec!["preview", "route", "out"]);
    }

    #[tokio::test]
    async fn test_plan_rejects_unknown_target_and_cycles() {
        let graph = WorkflowBuilder::new("wf", "Cycle")
            .add_router("a")
            .add_router("b")
            .connect("a", "b")
            .connect("b", "a")
            .build();
        let engine = engine();

        let err = engine.plan(&graph, "missing").await.unwrap_err();
        assert!(matches!(err, NodeEngineError::Validation(_)));

        let err = engine.plan(&graph, "a").await.unwrap_err();
        assert!(matches!(err, NodeEngineError::Dependency { .. }));
    }
}
