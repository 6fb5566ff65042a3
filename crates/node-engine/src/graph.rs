//! Dependency map construction
//!
//! Turns the canvas node/edge lists into an index-addressed arena: every
//! node gets a dense `usize` index and a list of its direct dependencies
//! (the sources of its incoming edges). A node "depends on" a source
//! because it consumes the source's output.
//!
//! Traversals in `prune`, `cycle` and `scheduler` keep their state in
//! parallel `Vec`s addressed by these indices.

use std::collections::{BTreeMap, HashMap};

use crate::error::{NodeEngineError, Result};
use crate::types::{NodeId, WorkflowGraph};
use crate::validation::ValidationError;

/// One incoming edge of a node, resolved to the source's index
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Dependency {
    /// Index of the producing node
    pub node: usize,
    /// Input slot on the consuming node, if the edge names one
    pub handle: Option<String>,
}

/// Reverse-dependency map: target -> its direct inputs
#[derive(Debug, Clone)]
pub struct DependencyMap {
    ids: Vec<NodeId>,
    index: HashMap<NodeId, usize>,
    deps: Vec<Vec<Dependency>>,
}

impl DependencyMap {
    /// Build the map from a graph's full edge list
    ///
    /// Node indices follow the order of `graph.nodes`; dependency lists
    /// follow the order of `graph.edges`. An edge endpoint that names no
    /// node is a validation error.
    pub fn build(graph: &WorkflowGraph) -> Result<Self> {
        let mut index = HashMap::with_capacity(graph.nodes.len());
        let mut ids = Vec::with_capacity(graph.nodes.len());
        for node in &graph.nodes {
            if index.insert(node.id.clone(), ids.len()).is_some() {
                return Err(ValidationError::DuplicateNode {
                    node_id: node.id.clone(),
                }
                .into());
            }
            ids.push(node.id.clone());
        }

        let mut deps = vec![Vec::new(); ids.len()];
        for edge in &graph.edges {
            let source = *index.get(&edge.source).ok_or_else(|| {
                NodeEngineError::from(ValidationError::UnknownNode {
                    edge_id: edge.id.clone(),
                    node_id: edge.source.clone(),
                })
            })?;
            let target = *index.get(&edge.target).ok_or_else(|| {
                NodeEngineError::from(ValidationError::UnknownNode {
                    edge_id: edge.id.clone(),
                    node_id: edge.target.clone(),
                })
            })?;
            deps[target].push(Dependency {
                node: source,
                handle: edge.target_handle.clone(),
            });
        }

        Ok(Self { ids, index, deps })
    }

    /// Number of nodes in the map
    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    /// Resolve a node id to its index
    pub fn index_of(&self, id: &str) -> Option<usize> {
        self.index.get(id).copied()
    }

    /// Node id for an index
    pub fn id(&self, index: usize) -> &str {
        &self.ids[index]
    }

    /// Direct dependencies of a node
    pub fn dependencies(&self, index: usize) -> &[Dependency] {
        &self.deps[index]
    }

    /// Direct dependency ids of a node, in edge order
    pub fn dependency_ids(&self, id: &str) -> Vec<NodeId> {
        self.index_of(id)
            .map(|i| {
                self.deps[i]
                    .iter()
                    .map(|d| self.ids[d.node].clone())
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Drop every dependency of a node, leaving it as a leaf
    pub fn truncate(&mut self, index: usize) {
        self.deps[index].clear();
    }

    /// Mark every node the given node transitively depends on, itself included
    pub fn ancestors(&self, start: usize) -> Vec<bool> {
        let mut seen = vec![false; self.len()];
        let mut stack = vec![start];
        while let Some(current) = stack.pop() {
            if seen[current] {
                continue;
            }
            seen[current] = true;
            for dep in &self.deps[current] {
                if !seen[dep.node] {
                    stack.push(dep.node);
                }
            }
        }
        seen
    }

    /// Id-keyed snapshot, mainly for diagnostics and tests
    pub fn to_id_map(&self) -> BTreeMap<NodeId, Vec<NodeId>> {
        self.ids
            .iter()
            .enumerate()
            .map(|(i, id)| {
                let deps = self.deps[i]
                    .iter()
                    .map(|d| self.ids[d.node].clone())
                    .collect();
                (id.clone(), deps)
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builder::WorkflowBuilder;

    #[test]
    fn test_build_reverse_dependencies() {
        let graph = WorkflowBuilder::new("wf", "Merge")
            .add_source("a", "https://img/a.png")
            .add_source("b", "https://img/b.png")
            .add_tool("merge", crate::types::ToolOperation::Merge)
            .connect_to("a", "merge", "left")
            .connect_to("b", "merge", "right")
            .build();

        let map = DependencyMap::build(&graph).unwrap();
        assert_eq!(map.dependency_ids("merge"), vec!["a", "b"]);
        assert!(map.dependency_ids("a").is_empty());

        let merge = map.index_of("merge").unwrap();
        assert_eq!(map.dependencies(merge)[1].handle.as_deref(), Some("right"));
    }

    #[test]
    fn test_dangling_edge_is_validation_error() {
        let graph = WorkflowBuilder::new("wf", "Broken")
            .add_source("a", "https://img/a.png")
            .connect("a", "ghost")
            .build();

        let err = DependencyMap::build(&graph).unwrap_err();
        assert!(matches!(
            err,
            NodeEngineError::Validation(ValidationError::UnknownNode { .. })
        ));
    }

    #[test]
    fn test_ancestors() {
        let graph = WorkflowBuilder::new("wf", "Chain")
            .add_source("a", "x")
            .add_router("b")
            .add_sink("c")
            .add_sink("unrelated")
            .connect("a", "b")
            .connect("b", "c")
            .build();

        let map = DependencyMap::build(&graph).unwrap();
        let seen = map.ancestors(map.index_of("c").unwrap());
        assert_eq!(seen, vec![true, true, true, false]);
    }
}
