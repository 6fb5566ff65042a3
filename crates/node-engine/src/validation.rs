//! Graph and node-input validation
//!
//! Structural validation (dangling edges, duplicate ids, unknown target)
//! runs once per run before anything is scheduled. Input-contract
//! validation runs per node, right before dispatch.

use std::collections::HashSet;

use crate::types::{GraphNode, NodeId, NodeInputs, NodeKind, NodeKindTag, WorkflowGraph};

/// Validation error with location context
#[derive(Debug, Clone, PartialEq)]
pub enum ValidationError {
    /// An edge references a non-existent node
    UnknownNode {
        edge_id: String,
        node_id: NodeId,
    },
    /// Two nodes share the same id
    DuplicateNode {
        node_id: NodeId,
    },
    /// The requested target is not part of the graph
    UnknownTarget {
        node_id: NodeId,
    },
    /// A node has neither an input nor an artifact to work from
    MissingInput {
        node_id: NodeId,
        kind: NodeKindTag,
    },
    /// A node has fewer inputs than its operation requires
    InsufficientInputs {
        node_id: NodeId,
        required: usize,
        found: usize,
    },
    /// A required attribute is empty
    MissingAttribute {
        node_id: NodeId,
        attribute: &'static str,
    },
    /// No operation is registered for the node's kind
    NoExecutor {
        node_id: NodeId,
        kind: NodeKindTag,
    },
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::UnknownNode { edge_id, node_id } => {
                write!(f, "Edge '{}' references unknown node '{}'", edge_id, node_id)
            }
            Self::DuplicateNode { node_id } => {
                write!(f, "Node id '{}' appears more than once", node_id)
            }
            Self::UnknownTarget { node_id } => {
                write!(f, "Target node '{}' is not in the graph", node_id)
            }
            Self::MissingInput { node_id, kind } => {
                write!(f, "{} node '{}' has no input to work from", kind, node_id)
            }
            Self::InsufficientInputs {
                node_id,
                required,
                found,
            } => {
                write!(
                    f,
                    "Node '{}' needs at least {} inputs, found {}",
                    node_id, required, found
                )
            }
            Self::MissingAttribute { node_id, attribute } => {
                write!(f, "Node '{}' is missing required '{}'", node_id, attribute)
            }
            Self::NoExecutor { node_id, kind } => {
                write!(
                    f,
                    "No operation registered for {} node '{}'",
                    kind, node_id
                )
            }
        }
    }
}

impl std::error::Error for ValidationError {}

/// Validate a workflow graph's structure
///
/// Returns all validation errors found (not just the first).
pub fn validate_workflow(graph: &WorkflowGraph) -> Vec<ValidationError> {
    let mut errors = Vec::new();

    validate_unique_ids(graph, &mut errors);
    validate_edge_references(graph, &mut errors);

    errors
}

/// Validate a graph and check that `target` is one of its nodes
pub fn validate_run_request(graph: &WorkflowGraph, target: &str) -> Vec<ValidationError> {
    let mut errors = validate_workflow(graph);
    if graph.find_node(target).is_none() {
        errors.push(ValidationError::UnknownTarget {
            node_id: target.to_string(),
        });
    }
    errors
}

fn validate_unique_ids(graph: &WorkflowGraph, errors: &mut Vec<ValidationError>) {
    let mut seen: HashSet<&str> = HashSet::new();
    for node in &graph.nodes {
        if !seen.insert(node.id.as_str()) {
            errors.push(ValidationError::DuplicateNode {
                node_id: node.id.clone(),
            });
        }
    }
}

/// Check that all edge source/target nodes exist
fn validate_edge_references(graph: &WorkflowGraph, errors: &mut Vec<ValidationError>) {
    let node_ids: HashSet<&str> = graph.nodes.iter().map(|n| n.id.as_str()).collect();

    for edge in &graph.edges {
        if !node_ids.contains(edge.source.as_str()) {
            errors.push(ValidationError::UnknownNode {
                edge_id: edge.id.clone(),
                node_id: edge.source.clone(),
            });
        }
        if !node_ids.contains(edge.target.as_str()) {
            errors.push(ValidationError::UnknownNode {
                edge_id: edge.id.clone(),
                node_id: edge.target.clone(),
            });
        }
    }
}

/// Check a node's minimal-input contract before dispatch
///
/// `inputs` holds only the dependencies that actually produced a result,
/// so a failed upstream node shows up here as a missing input.
pub fn check_input_contract(node: &GraphNode, inputs: &NodeInputs) -> Result<(), ValidationError> {
    let node_id = || node.id.clone();
    match &node.kind {
        NodeKind::Source(data) => {
            let has_url = data.url.as_deref().is_some_and(|u| !u.trim().is_empty());
            if !has_url && inputs.is_empty() {
                return Err(ValidationError::MissingAttribute {
                    node_id: node_id(),
                    attribute: "url",
                });
            }
        }
        NodeKind::Conditioning(data) => {
            if data.operator.trim().is_empty() {
                return Err(ValidationError::MissingAttribute {
                    node_id: node_id(),
                    attribute: "operator",
                });
            }
            if inputs.is_empty() && node.kind.known_artifact().is_none() {
                return Err(ValidationError::MissingInput {
                    node_id: node_id(),
                    kind: NodeKindTag::Conditioning,
                });
            }
        }
        NodeKind::Engine(data) => {
            if data.prompt.trim().is_empty() && inputs.is_empty() {
                return Err(ValidationError::MissingInput {
                    node_id: node_id(),
                    kind: NodeKindTag::Engine,
                });
            }
        }
        NodeKind::Tool(data) => {
            let required = data.operation.min_inputs();
            if inputs.len() < required {
                return Err(ValidationError::InsufficientInputs {
                    node_id: node_id(),
                    required,
                    found: inputs.len(),
                });
            }
        }
        NodeKind::Router(_) => {
            if inputs.is_empty() {
                return Err(ValidationError::MissingInput {
                    node_id: node_id(),
                    kind: NodeKindTag::Router,
                });
            }
        }
        NodeKind::Sink(_) => {
            if inputs.is_empty() && node.kind.known_artifact().is_none() {
                return Err(ValidationError::MissingInput {
                    node_id: node_id(),
                    kind: NodeKindTag::Sink,
                });
            }
        }
        NodeKind::Annotation(_) => {}
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builder::WorkflowBuilder;
    use crate::types::{ConditioningData, SinkData, ToolData, ToolOperation};

    #[test]
    fn test_valid_graph() {
        let graph = WorkflowBuilder::new("wf", "Test")
            .add_source("src", "https://img/a.png")
            .add_sink("out")
            .connect("src", "out")
            .build();

        let errors = validate_run_request(&graph, "out");
        assert!(errors.is_empty(), "Expected no errors, got: {:?}", errors);
    }

    #[test]
    fn test_edge_references_missing_node() {
        let graph = WorkflowBuilder::new("wf", "Test")
            .add_source("a", "https://img/a.png")
            .connect("a", "missing")
            .build();

        let errors = validate_workflow(&graph);
        assert!(errors
            .iter()
            .any(|e| matches!(e, ValidationError::UnknownNode { node_id, .. } if node_id == "missing")));
    }

    #[test]
    fn test_duplicate_and_unknown_target_collected() {
        let graph = WorkflowBuilder::new("wf", "Test")
            .add_sink("a")
            .add_sink("a")
            .build();

        let errors = validate_run_request(&graph, "nope");
        assert_eq!(errors.len(), 2);
        assert!(matches!(errors[0], ValidationError::DuplicateNode { .. }));
        assert!(matches!(errors[1], ValidationError::UnknownTarget { .. }));
    }

    #[test]
    fn test_conditioning_contract() {
        let node = GraphNode::new(
            "cond",
            NodeKind::Conditioning(ConditioningData {
                operator: "pose".into(),
                preprocessed_url: None,
            }),
        );
        let err = check_input_contract(&node, &NodeInputs::new()).unwrap_err();
        assert!(matches!(err, ValidationError::MissingInput { .. }));

        let mut inputs = NodeInputs::new();
        inputs.insert("default".into(), "https://img/a.png".into());
        assert!(check_input_contract(&node, &inputs).is_ok());

        // A previously computed artifact satisfies the contract on its own
        let node = GraphNode::new(
            "cond",
            NodeKind::Conditioning(ConditioningData {
                operator: "pose".into(),
                preprocessed_url: Some("https://img/pose.png".into()),
            }),
        );
        assert!(check_input_contract(&node, &NodeInputs::new()).is_ok());
    }

    #[test]
    fn test_merge_needs_two_inputs() {
        let node = GraphNode::new(
            "merge",
            NodeKind::Tool(ToolData {
                operation: ToolOperation::Merge,
                output_url: None,
            }),
        );
        let mut inputs = NodeInputs::new();
        inputs.insert("a".into(), "https://img/a.png".into());
        assert_eq!(
            check_input_contract(&node, &inputs),
            Err(ValidationError::InsufficientInputs {
                node_id: "merge".into(),
                required: 2,
                found: 1,
            })
        );
        inputs.insert("b".into(), "https://img/b.png".into());
        assert!(check_input_contract(&node, &inputs).is_ok());
    }

    #[test]
    fn test_sink_with_persisted_artifact_needs_no_input() {
        let node = GraphNode::new(
            "out",
            NodeKind::Sink(SinkData {
                artifact_url: Some("https://img/old.png".into()),
            }),
        );
        assert!(check_input_contract(&node, &NodeInputs::new()).is_ok());
    }
}
