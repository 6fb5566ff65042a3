//! Core types for workflow graphs
//!
//! These types define the structure of the canvas graph the engine reads:
//! typed nodes, edges with optional handles, and the graph container.
//! The engine treats all of them as read-only for the duration of a run.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Unique identifier for a node
pub type NodeId = String;

/// Unique identifier for an edge
pub type EdgeId = String;

/// Reference to a produced artifact (URL or other locator string)
pub type Artifact = String;

/// Collected outputs of a node's direct dependencies, keyed by input handle
pub type NodeInputs = BTreeMap<String, Artifact>;

/// Input key used when a node has exactly one unlabelled input
pub const DEFAULT_INPUT: &str = "default";

/// Payload-free tag for a node kind
///
/// Used as the dispatch key in the registry and in error context.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeKindTag {
    /// Image source (upload, URL, canvas capture)
    Source,
    /// Conditioning/guide generator (pose, depth, edges...)
    Conditioning,
    /// Generation engine
    Engine,
    /// Post-processing tool
    Tool,
    /// Pass-through router
    Router,
    /// Output sink / preview
    Sink,
    /// Canvas annotation, never executed
    Annotation,
}

impl NodeKindTag {
    /// Sinks and previews may stand in for their upstream branch
    pub fn is_boundary_capable(&self) -> bool {
        matches!(self, NodeKindTag::Sink)
    }

    /// Kinds whose failure always aborts the run
    pub fn is_final_compute(&self) -> bool {
        matches!(self, NodeKindTag::Engine)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            NodeKindTag::Source => "source",
            NodeKindTag::Conditioning => "conditioning",
            NodeKindTag::Engine => "engine",
            NodeKindTag::Tool => "tool",
            NodeKindTag::Router => "router",
            NodeKindTag::Sink => "sink",
            NodeKindTag::Annotation => "annotation",
        }
    }
}

impl std::fmt::Display for NodeKindTag {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Attributes of an image source node
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SourceData {
    /// Image locator; empty or missing means "no image yet"
    #[serde(default)]
    pub url: Option<String>,
}

/// Attributes of a conditioning node
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConditioningData {
    /// Preprocessing operator name (e.g. "pose", "depth", "canny")
    pub operator: String,
    /// Artifact produced by an earlier preprocessing pass, if any
    #[serde(default)]
    pub preprocessed_url: Option<String>,
}

/// Attributes of a generation engine node
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EngineData {
    #[serde(default)]
    pub prompt: String,
    #[serde(default)]
    pub model: Option<String>,
    /// Last generated artifact
    #[serde(default)]
    pub output_url: Option<String>,
}

/// Operation performed by a tool node
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolOperation {
    Upscale,
    RemoveBackground,
    Crop,
    /// Combines two or more images
    Merge,
}

impl ToolOperation {
    /// Minimum number of image inputs the operation accepts
    pub fn min_inputs(&self) -> usize {
        match self {
            ToolOperation::Merge => 2,
            _ => 1,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ToolOperation::Upscale => "upscale",
            ToolOperation::RemoveBackground => "remove_background",
            ToolOperation::Crop => "crop",
            ToolOperation::Merge => "merge",
        }
    }
}

/// Attributes of a post-processing tool node
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolData {
    pub operation: ToolOperation,
    #[serde(default)]
    pub output_url: Option<String>,
}

/// Attributes of a router node
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RouterData {
    /// Input handle to forward; the first available input when unset
    #[serde(default)]
    pub route: Option<String>,
}

/// Attributes of an output sink / preview node
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SinkData {
    /// Persisted artifact from a previous run or supplied externally
    #[serde(default)]
    pub artifact_url: Option<String>,
}

/// Attributes of a canvas annotation
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnnotationData {
    #[serde(default)]
    pub text: String,
}

/// Kind of a node together with its strongly-typed attributes
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum NodeKind {
    Source(SourceData),
    Conditioning(ConditioningData),
    Engine(EngineData),
    Tool(ToolData),
    Router(RouterData),
    Sink(SinkData),
    Annotation(AnnotationData),
}

impl NodeKind {
    /// The payload-free tag of this kind
    pub fn tag(&self) -> NodeKindTag {
        match self {
            NodeKind::Source(_) => NodeKindTag::Source,
            NodeKind::Conditioning(_) => NodeKindTag::Conditioning,
            NodeKind::Engine(_) => NodeKindTag::Engine,
            NodeKind::Tool(_) => NodeKindTag::Tool,
            NodeKind::Router(_) => NodeKindTag::Router,
            NodeKind::Sink(_) => NodeKindTag::Sink,
            NodeKind::Annotation(_) => NodeKindTag::Annotation,
        }
    }

    /// Artifact this node already holds from earlier work, if any
    ///
    /// Empty strings count as "no artifact".
    pub fn known_artifact(&self) -> Option<&str> {
        let url = match self {
            NodeKind::Source(d) => d.url.as_deref(),
            NodeKind::Conditioning(d) => d.preprocessed_url.as_deref(),
            NodeKind::Engine(d) => d.output_url.as_deref(),
            NodeKind::Tool(d) => d.output_url.as_deref(),
            NodeKind::Sink(d) => d.artifact_url.as_deref(),
            NodeKind::Router(_) | NodeKind::Annotation(_) => None,
        };
        url.filter(|u| !u.trim().is_empty())
    }
}

/// An edge from a producing node to a consuming node
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GraphEdge {
    /// Unique identifier for this edge
    pub id: EdgeId,
    /// Source node ID
    pub source: NodeId,
    /// Target node ID
    pub target: NodeId,
    /// Output slot on the source
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_handle: Option<String>,
    /// Input slot on the target
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_handle: Option<String>,
}

/// A node instance in a graph
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GraphNode {
    /// Unique identifier for this node instance
    pub id: NodeId,
    /// Kind and kind-specific attributes
    #[serde(flatten)]
    pub kind: NodeKind,
    /// Position on the canvas (x, y)
    #[serde(default)]
    pub position: (f64, f64),
}

impl GraphNode {
    pub fn new(id: impl Into<String>, kind: NodeKind) -> Self {
        Self {
            id: id.into(),
            kind,
            position: (0.0, 0.0),
        }
    }

    pub fn tag(&self) -> NodeKindTag {
        self.kind.tag()
    }
}

/// A complete workflow graph as owned by the canvas model
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkflowGraph {
    /// Unique identifier for this graph
    pub id: String,
    /// Human-readable name
    #[serde(default)]
    pub name: String,
    /// Nodes in the graph
    pub nodes: Vec<GraphNode>,
    /// Edges connecting nodes
    #[serde(default)]
    pub edges: Vec<GraphEdge>,
}

impl WorkflowGraph {
    /// Create a new empty graph
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            nodes: Vec::new(),
            edges: Vec::new(),
        }
    }

    /// Find a node by ID
    pub fn find_node(&self, id: &str) -> Option<&GraphNode> {
        self.nodes.iter().find(|n| n.id == id)
    }

    /// Find a node by ID (mutable)
    pub fn find_node_mut(&mut self, id: &str) -> Option<&mut GraphNode> {
        self.nodes.iter_mut().find(|n| n.id == id)
    }

    /// Get edges coming into a node
    pub fn incoming_edges<'a>(&'a self, node_id: &'a str) -> impl Iterator<Item = &'a GraphEdge> + 'a {
        self.edges.iter().filter(move |e| e.target == node_id)
    }

    /// Get edges going out of a node
    pub fn outgoing_edges<'a>(&'a self, node_id: &'a str) -> impl Iterator<Item = &'a GraphEdge> + 'a {
        self.edges.iter().filter(move |e| e.source == node_id)
    }

    /// Get the IDs of nodes that this node depends on (upstream nodes)
    pub fn get_dependencies(&self, node_id: &str) -> Vec<NodeId> {
        self.incoming_edges(node_id)
            .map(|e| e.source.clone())
            .collect()
    }

    /// Get the IDs of nodes that depend on this node (downstream nodes)
    pub fn get_dependents(&self, node_id: &str) -> Vec<NodeId> {
        self.outgoing_edges(node_id)
            .map(|e| e.target.clone())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_node_kind_serde_shape() {
        let node = GraphNode::new(
            "cond-1",
            NodeKind::Conditioning(ConditioningData {
                operator: "pose".to_string(),
                preprocessed_url: None,
            }),
        );
        let json = serde_json::to_value(&node).unwrap();
        assert_eq!(json["type"], "conditioning");
        assert_eq!(json["data"]["operator"], "pose");

        let parsed: GraphNode = serde_json::from_value(serde_json::json!({
            "id": "tool-1",
            "type": "tool",
            "data": { "operation": "merge" }
        }))
        .unwrap();
        assert_eq!(parsed.tag(), NodeKindTag::Tool);
        assert_eq!(parsed.position, (0.0, 0.0));
    }

    #[test]
    fn test_known_artifact_ignores_blank() {
        let sink = NodeKind::Sink(SinkData {
            artifact_url: Some("  ".to_string()),
        });
        assert_eq!(sink.known_artifact(), None);

        let sink = NodeKind::Sink(SinkData {
            artifact_url: Some("https://cdn/out.png".to_string()),
        });
        assert_eq!(sink.known_artifact(), Some("https://cdn/out.png"));
    }

    #[test]
    fn test_tool_min_inputs() {
        assert_eq!(ToolOperation::Merge.min_inputs(), 2);
        assert_eq!(ToolOperation::Upscale.min_inputs(), 1);
    }

    #[test]
    fn test_graph_edges() {
        let mut graph = WorkflowGraph::new("test", "Test Graph");
        graph.nodes.push(GraphNode::new("node1", NodeKind::Source(SourceData::default())));
        graph.nodes.push(GraphNode::new("node2", NodeKind::Sink(SinkData::default())));
        graph.edges.push(GraphEdge {
            id: "edge1".to_string(),
            source: "node1".to_string(),
            target: "node2".to_string(),
            source_handle: None,
            target_handle: None,
        });

        assert_eq!(graph.get_dependencies("node2"), vec!["node1"]);
        assert_eq!(graph.get_dependents("node1"), vec!["node2"]);
    }
}
