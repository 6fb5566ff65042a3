//! Node kind registry for operation dispatch
//!
//! Maps each node kind to the operation that executes it. The set of kinds
//! is closed (`NodeKindTag`), so dispatch is a map lookup on the tag rather
//! than string probing; the operations themselves are swappable.
//!
//! # Usage
//!
//! ```ignore
//! use node_engine::{NodeKindTag, NodeRegistry};
//!
//! let mut registry = NodeRegistry::new();
//! registry.register(NodeKindTag::Conditioning, Arc::new(MyConditioningOp));
//! ```

use std::collections::HashMap;
use std::pin::Pin;
use std::sync::Arc;

use async_trait::async_trait;

use crate::error::Result;
use crate::types::{Artifact, GraphNode, NodeInputs, NodeKindTag};

/// Operation for one node kind
///
/// Receives the node (with its typed attributes) and the artifacts produced
/// by its direct dependencies; returns a single artifact reference or fails.
#[async_trait]
pub trait NodeExecutor: Send + Sync {
    async fn execute(&self, node: &GraphNode, inputs: NodeInputs) -> Result<Artifact>;
}

/// Registry of node kinds and their operations
pub struct NodeRegistry {
    entries: HashMap<NodeKindTag, Arc<dyn NodeExecutor>>,
}

impl NodeRegistry {
    /// Create a new empty registry
    pub fn new() -> Self {
        Self {
            entries: HashMap::new(),
        }
    }

    /// Register the operation for a node kind, replacing any previous one
    pub fn register(&mut self, kind: NodeKindTag, executor: Arc<dyn NodeExecutor>) {
        self.entries.insert(kind, executor);
    }

    /// Register an async callback as the operation for a node kind
    ///
    /// The callback receives (node, inputs) and returns the artifact.
    pub fn register_callback<F, Fut>(&mut self, kind: NodeKindTag, callback: F)
    where
        F: Fn(GraphNode, NodeInputs) -> Fut + Send + Sync + 'static,
        Fut: std::future::Future<Output = Result<Artifact>> + Send + 'static,
    {
        let executor = Arc::new(CallbackNodeExecutor {
            callback: Box::new(move |node, inputs| Box::pin(callback(node, inputs))),
        });
        self.register(kind, executor);
    }

    /// Get the operation for a node kind
    pub fn get_executor(&self, kind: NodeKindTag) -> Option<Arc<dyn NodeExecutor>> {
        self.entries.get(&kind).cloned()
    }

    /// Check if a node kind has an operation
    pub fn has_kind(&self, kind: NodeKindTag) -> bool {
        self.entries.contains_key(&kind)
    }

    /// List all registered kinds, sorted
    pub fn kinds(&self) -> Vec<NodeKindTag> {
        let mut kinds: Vec<_> = self.entries.keys().copied().collect();
        kinds.sort();
        kinds
    }

    /// Merge another registry into this one
    ///
    /// Entries from `other` override entries in `self` for the same kind.
    pub fn merge(&mut self, other: NodeRegistry) {
        self.entries.extend(other.entries);
    }
}

impl Default for NodeRegistry {
    fn default() -> Self {
        Self::new()
    }
}

type BoxedCallback = Box<
    dyn Fn(GraphNode, NodeInputs) -> Pin<Box<dyn std::future::Future<Output = Result<Artifact>> + Send>>
        + Send
        + Sync,
>;

/// Async callback-based NodeExecutor
///
/// Wraps an async closure as a NodeExecutor. Used by hosts that back a
/// kind with a remote call and by tests.
pub struct CallbackNodeExecutor {
    callback: BoxedCallback,
}

#[async_trait]
impl NodeExecutor for CallbackNodeExecutor {
    async fn execute(&self, node: &GraphNode, inputs: NodeInputs) -> Result<Artifact> {
        (self.callback)(node.clone(), inputs).await
    }
}

/// Synchronous callback-based NodeExecutor
pub struct SyncCallbackNodeExecutor {
    callback: Box<dyn Fn(&GraphNode, NodeInputs) -> Result<Artifact> + Send + Sync>,
}

impl SyncCallbackNodeExecutor {
    pub fn new(
        callback: impl Fn(&GraphNode, NodeInputs) -> Result<Artifact> + Send + Sync + 'static,
    ) -> Self {
        Self {
            callback: Box::new(callback),
        }
    }
}

#[async_trait]
impl NodeExecutor for SyncCallbackNodeExecutor {
    async fn execute(&self, node: &GraphNode, inputs: NodeInputs) -> Result<Artifact> {
        (self.callback)(node, inputs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{NodeKind, SinkData};

    fn sink_node() -> GraphNode {
        GraphNode::new("out", NodeKind::Sink(SinkData::default()))
    }

    #[tokio::test]
    async fn test_sync_callback_executor() {
        let executor = SyncCallbackNodeExecutor::new(|node, _inputs| Ok(format!("mem://{}", node.id)));

        let result = executor.execute(&sink_node(), NodeInputs::new()).await.unwrap();
        assert_eq!(result, "mem://out");
    }

    #[tokio::test]
    async fn test_register_with_callback() {
        let mut registry = NodeRegistry::new();
        registry.register_callback(NodeKindTag::Sink, |_node, inputs| async move {
            Ok(inputs.values().next().cloned().unwrap_or_default())
        });

        assert!(registry.has_kind(NodeKindTag::Sink));
        assert!(!registry.has_kind(NodeKindTag::Engine));

        let executor = registry.get_executor(NodeKindTag::Sink).unwrap();
        let mut inputs = NodeInputs::new();
        inputs.insert("default".into(), "https://img/a.png".into());
        let result = executor.execute(&sink_node(), inputs).await.unwrap();
        assert_eq!(result, "https://img/a.png");
    }

    #[test]
    fn test_merge_override() {
        let mut first = NodeRegistry::new();
        first.register(
            NodeKindTag::Router,
            Arc::new(SyncCallbackNodeExecutor::new(|_, _| Ok("first".into()))),
        );
        let mut second = NodeRegistry::new();
        second.register(
            NodeKindTag::Router,
            Arc::new(SyncCallbackNodeExecutor::new(|_, _| Ok("second".into()))),
        );
        second.register(
            NodeKindTag::Sink,
            Arc::new(SyncCallbackNodeExecutor::new(|_, _| Ok("sink".into()))),
        );

        first.merge(second);
        assert_eq!(first.kinds(), vec![NodeKindTag::Router, NodeKindTag::Sink]);
    }
}
