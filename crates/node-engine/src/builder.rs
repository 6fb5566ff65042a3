//! Fluent builder for workflow graphs
//!
//! Provides a type-safe, fluent API for constructing graphs programmatically.

use crate::types::{
    AnnotationData, ConditioningData, EngineData, GraphEdge, GraphNode, NodeKind, RouterData,
    SinkData, SourceData, ToolData, ToolOperation, WorkflowGraph,
};

/// Fluent builder for constructing workflow graphs
///
/// # Example
///
/// ```
/// use node_engine::WorkflowBuilder;
///
/// let graph = WorkflowBuilder::new("wf-1", "Pose transfer")
///     .add_source("photo", "https://example.com/photo.png")
///     .add_conditioning("pose", "openpose")
///     .add_sink("preview")
///     .connect("photo", "pose")
///     .connect("pose", "preview")
///     .build();
///
/// assert_eq!(graph.nodes.len(), 3);
/// ```
pub struct WorkflowBuilder {
    id: String,
    name: String,
    nodes: Vec<GraphNode>,
    edges: Vec<GraphEdge>,
    edge_counter: usize,
}

impl WorkflowBuilder {
    /// Create a new workflow builder
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            nodes: Vec::new(),
            edges: Vec::new(),
            edge_counter: 0,
        }
    }

    /// Add a node of any kind
    pub fn add_node(mut self, id: impl Into<String>, kind: NodeKind) -> Self {
        self.nodes.push(GraphNode::new(id, kind));
        self
    }

    /// Add an image source pointing at `url` (may be empty)
    pub fn add_source(self, id: impl Into<String>, url: impl Into<String>) -> Self {
        let url = url.into();
        self.add_node(id, NodeKind::Source(SourceData { url: Some(url) }))
    }

    /// Add a conditioning node running `operator`
    pub fn add_conditioning(self, id: impl Into<String>, operator: impl Into<String>) -> Self {
        self.add_node(
            id,
            NodeKind::Conditioning(ConditioningData {
                operator: operator.into(),
                preprocessed_url: None,
            }),
        )
    }

    /// Add a generation engine node
    pub fn add_engine(self, id: impl Into<String>, prompt: impl Into<String>) -> Self {
        self.add_node(
            id,
            NodeKind::Engine(EngineData {
                prompt: prompt.into(),
                ..EngineData::default()
            }),
        )
    }

    /// Add a post-processing tool node
    pub fn add_tool(self, id: impl Into<String>, operation: ToolOperation) -> Self {
        self.add_node(
            id,
            NodeKind::Tool(ToolData {
                operation,
                output_url: None,
            }),
        )
    }

    /// Add a router node
    pub fn add_router(self, id: impl Into<String>) -> Self {
        self.add_node(id, NodeKind::Router(RouterData::default()))
    }

    /// Add an empty output sink
    pub fn add_sink(self, id: impl Into<String>) -> Self {
        self.add_node(id, NodeKind::Sink(SinkData::default()))
    }

    /// Add a sink that already holds a persisted artifact
    pub fn add_persisted_sink(self, id: impl Into<String>, artifact: impl Into<String>) -> Self {
        self.add_node(
            id,
            NodeKind::Sink(SinkData {
                artifact_url: Some(artifact.into()),
            }),
        )
    }

    /// Add a canvas annotation
    pub fn add_annotation(self, id: impl Into<String>, text: impl Into<String>) -> Self {
        self.add_node(id, NodeKind::Annotation(AnnotationData { text: text.into() }))
    }

    /// Set the canvas position of the most recently added node
    pub fn at(mut self, position: (f64, f64)) -> Self {
        if let Some(node) = self.nodes.last_mut() {
            node.position = position;
        }
        self
    }

    /// Add an edge without handles (auto-generates edge ID)
    pub fn connect(self, source: impl Into<String>, target: impl Into<String>) -> Self {
        self.push_edge(None, source.into(), None, target.into(), None)
    }

    /// Add an edge into a named input slot of the target
    pub fn connect_to(
        self,
        source: impl Into<String>,
        target: impl Into<String>,
        target_handle: impl Into<String>,
    ) -> Self {
        self.push_edge(
            None,
            source.into(),
            None,
            target.into(),
            Some(target_handle.into()),
        )
    }

    /// Add an edge with an explicit ID and optional handles
    pub fn add_edge_with_id(
        self,
        edge_id: impl Into<String>,
        source: impl Into<String>,
        source_handle: Option<String>,
        target: impl Into<String>,
        target_handle: Option<String>,
    ) -> Self {
        self.push_edge(
            Some(edge_id.into()),
            source.into(),
            source_handle,
            target.into(),
            target_handle,
        )
    }

    fn push_edge(
        mut self,
        edge_id: Option<String>,
        source: String,
        source_handle: Option<String>,
        target: String,
        target_handle: Option<String>,
    ) -> Self {
        self.edge_counter += 1;
        let id = edge_id.unwrap_or_else(|| format!("edge-{}", self.edge_counter));
        self.edges.push(GraphEdge {
            id,
            source,
            target,
            source_handle,
            target_handle,
        });
        self
    }

    /// Build the graph without validation
    pub fn build(self) -> WorkflowGraph {
        let mut graph = WorkflowGraph::new(self.id, self.name);
        graph.nodes = self.nodes;
        graph.edges = self.edges;
        graph
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::NodeKindTag;

    #[test]
    fn test_build_linear_graph() {
        let graph = WorkflowBuilder::new("wf", "Linear")
            .add_source("src", "https://img/a.png")
            .at((10.0, 20.0))
            .add_engine("gen", "a cat")
            .add_sink("out")
            .connect("src", "gen")
            .connect_to("gen", "out", "image")
            .build();

        assert_eq!(graph.nodes.len(), 3);
        assert_eq!(graph.nodes[0].position, (10.0, 20.0));
        assert_eq!(graph.nodes[1].tag(), NodeKindTag::Engine);
        assert_eq!(graph.edges[0].id, "edge-1");
        assert_eq!(graph.edges[1].target_handle.as_deref(), Some("image"));
    }

    #[test]
    fn test_explicit_edge_id() {
        let graph = WorkflowBuilder::new("wf", "Explicit")
            .add_source("a", "")
            .add_sink("b")
            .add_edge_with_id("my-edge", "a", Some("out".into()), "b", None)
            .build();

        assert_eq!(graph.edges[0].id, "my-edge");
        assert_eq!(graph.edges[0].source_handle.as_deref(), Some("out"));
    }
}
