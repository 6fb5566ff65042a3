//! Canvas wiring → preprocessing
//!
//! `ConnectionTrigger` watches successive versions of the workflow graph.
//! Every edge that feeds a conditioning node is a "conditioning link"; new
//! links (or links whose source image changed) schedule a debounced
//! `Connect`, removed links a debounced `Disconnect`. The debounced
//! operations land in `PipelineConnectionHandler`, which runs the
//! conditioning pipeline or clears the node. A disconnect only clears a
//! node that has no source left; a node still fed by another source is
//! reprocessed from it unless its result already came from that source.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use node_engine::{NodeKind, WorkflowGraph};
use parking_lot::{Mutex, RwLock};

use crate::config::DebounceConfig;
use crate::debouncer::{ConnectionDebouncer, ConnectionHandler, FlushReport, OperationKind};
use crate::error::{PreprocessingError, Result};
use crate::pipeline::{ConditioningPipeline, PreprocessRequest};
use crate::state::PreprocessingStatus;

/// (source node, conditioning node)
type Link = (String, String);

/// Conditioning links of a graph, with the source artifact each one carries
fn conditioning_links(graph: &WorkflowGraph) -> BTreeMap<Link, Option<String>> {
    graph
        .edges
        .iter()
        .filter(|edge| {
            graph
                .find_node(&edge.target)
                .is_some_and(|n| matches!(n.kind, NodeKind::Conditioning(_)))
        })
        .map(|edge| {
            let artifact = graph
                .find_node(&edge.source)
                .and_then(|n| n.kind.known_artifact())
                .map(str::to_string);
            ((edge.source.clone(), edge.target.clone()), artifact)
        })
        .collect()
}

/// Runs the pipeline for debounced wiring changes
pub struct PipelineConnectionHandler {
    pipeline: Arc<ConditioningPipeline>,
    graph: Arc<RwLock<WorkflowGraph>>,
}

impl PipelineConnectionHandler {
    pub fn new(pipeline: Arc<ConditioningPipeline>, graph: Arc<RwLock<WorkflowGraph>>) -> Self {
        Self { pipeline, graph }
    }

    /// Sources currently wired into `target_id`
    fn wired_sources(&self, target_id: &str) -> Vec<String> {
        self.graph
            .read()
            .incoming_edges(target_id)
            .map(|edge| edge.source.clone())
            .collect()
    }

    fn request_for(&self, source_id: &str, target_id: &str) -> Result<PreprocessRequest> {
        let graph = self.graph.read();
        let operator = match graph.find_node(target_id).map(|n| &n.kind) {
            Some(NodeKind::Conditioning(data)) => data.operator.clone(),
            Some(_) => {
                return Err(PreprocessingError::Validation(format!(
                    "node '{}' is not a conditioning node",
                    target_id
                )))
            }
            None => {
                return Err(PreprocessingError::Validation(format!(
                    "node '{}' no longer exists",
                    target_id
                )))
            }
        };
        let source_artifact = graph
            .find_node(source_id)
            .and_then(|n| n.kind.known_artifact())
            .unwrap_or_default()
            .to_string();

        Ok(PreprocessRequest::new(target_id, source_artifact, operator).from_source(source_id))
    }
}

#[async_trait]
impl ConnectionHandler for PipelineConnectionHandler {
    async fn on_connect(&self, source_id: &str, target_id: &str) -> Result<()> {
        let request = self.request_for(source_id, target_id)?;
        self.pipeline.process(request).await.map(|_| ())
    }

    async fn on_disconnect(&self, source_id: &str, target_id: &str) -> Result<()> {
        let remaining = self.wired_sources(target_id);
        let Some(replacement) = remaining.first() else {
            self.pipeline.clear_node(target_id);
            return Ok(());
        };

        // Keep a result that came from a source that is still wired
        let state = self.pipeline.states().get_state(target_id);
        let current_source = state.result.as_ref().and_then(|d| d.source_id.as_ref());
        if state.status != PreprocessingStatus::Processing
            && current_source.is_some_and(|s| remaining.contains(s))
        {
            log::debug!(
                "Node '{}' lost input '{}' but is still fed by '{}'",
                target_id,
                source_id,
                current_source.map_or("", String::as_str)
            );
            return Ok(());
        }

        let request = self.request_for(replacement, target_id)?;
        self.pipeline.process(request).await.map(|_| ())
    }

    async fn on_batch_start(&self, count: usize) {
        log::debug!("Processing batch of {} connection change(s)", count);
    }

    async fn on_batch_complete(&self, count: usize, errors: &[PreprocessingError]) {
        if errors.is_empty() {
            log::debug!("Batch of {} connection change(s) completed", count);
        } else {
            log::warn!(
                "Batch of {} connection change(s) completed with {} error(s)",
                count,
                errors.len()
            );
        }
    }
}

/// Changes scheduled by one graph update
#[derive(Debug, Clone, Default, PartialEq)]
pub struct WiringChanges {
    pub connected: Vec<Link>,
    pub disconnected: Vec<Link>,
    /// Changes refused because too many operations were pending
    pub dropped: usize,
}

impl WiringChanges {
    pub fn is_empty(&self) -> bool {
        self.connected.is_empty() && self.disconnected.is_empty()
    }
}

/// Diffs graph versions into debounced preprocessing operations
pub struct ConnectionTrigger {
    graph: Arc<RwLock<WorkflowGraph>>,
    links: Mutex<BTreeMap<Link, Option<String>>>,
    debouncer: ConnectionDebouncer,
}

impl ConnectionTrigger {
    pub fn new(config: DebounceConfig, pipeline: Arc<ConditioningPipeline>) -> Self {
        let graph = Arc::new(RwLock::new(WorkflowGraph::default()));
        let handler = Arc::new(PipelineConnectionHandler::new(pipeline, graph.clone()));
        Self {
            graph,
            links: Mutex::new(BTreeMap::new()),
            debouncer: ConnectionDebouncer::new(config, handler),
        }
    }

    /// Adopt a new graph version and schedule the resulting changes
    ///
    /// Must be called within a tokio runtime.
    pub fn update(&self, graph: WorkflowGraph) -> WiringChanges {
        let current = conditioning_links(&graph);
        *self.graph.write() = graph;

        let mut links = self.links.lock();
        let mut changes = WiringChanges::default();

        for (link, artifact) in &current {
            if links.get(link) != Some(artifact) {
                changes.connected.push(link.clone());
            }
        }
        for link in links.keys() {
            if !current.contains_key(link) {
                changes.disconnected.push(link.clone());
            }
        }
        *links = current;
        drop(links);

        let scheduled = changes
            .connected
            .iter()
            .map(|link| (link, OperationKind::Connect))
            .chain(
                changes
                    .disconnected
                    .iter()
                    .map(|link| (link, OperationKind::Disconnect)),
            );
        let dropped = scheduled
            .filter(|((source, target), kind)| !self.debouncer.debounce(source, target, *kind))
            .count();
        changes.dropped = dropped;

        if !changes.is_empty() {
            log::debug!(
                "Wiring update: {} connected, {} disconnected",
                changes.connected.len(),
                changes.disconnected.len()
            );
        }
        changes
    }

    pub fn debouncer(&self) -> &ConnectionDebouncer {
        &self.debouncer
    }

    /// Run pending operations immediately
    pub async fn flush(&self) -> FlushReport {
        self.debouncer.flush().await
    }
}
