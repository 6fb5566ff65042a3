//! Cycle detection over a dependency map
//!
//! Three-color DFS (unvisited / visiting / visited). Re-entering a node that
//! is still "visiting" closes a cycle; the full path is recorded for
//! diagnostics. Any cycle is fatal: nothing tries to break it.

use crate::error::{NodeEngineError, Result};
use crate::graph::DependencyMap;
use crate::types::NodeId;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Color {
    Unvisited,
    Visiting,
    Visited,
}

/// Find every cycle reachable in the map
///
/// Roots are tried in node order so the report is deterministic. Each cycle
/// is listed in dependency order and closed by repeating its first node,
/// e.g. `["a", "b", "a"]` for a node `a` that depends on `b` which depends
/// on `a`.
pub fn find_cycles(map: &DependencyMap) -> Vec<Vec<NodeId>> {
    let mut colors = vec![Color::Unvisited; map.len()];
    let mut path = Vec::new();
    let mut cycles = Vec::new();

    for root in 0..map.len() {
        if colors[root] == Color::Unvisited {
            visit(map, root, &mut colors, &mut path, &mut cycles);
        }
    }

    cycles
}

/// Fail with a `Dependency` error if the map has any cycle
pub fn ensure_acyclic(map: &DependencyMap) -> Result<()> {
    let cycles = find_cycles(map);
    if cycles.is_empty() {
        Ok(())
    } else {
        Err(NodeEngineError::Dependency { cycles })
    }
}

fn visit(
    map: &DependencyMap,
    node: usize,
    colors: &mut [Color],
    path: &mut Vec<usize>,
    cycles: &mut Vec<Vec<NodeId>>,
) {
    colors[node] = Color::Visiting;
    path.push(node);

    for dep in map.dependencies(node) {
        match colors[dep.node] {
            Color::Unvisited => visit(map, dep.node, colors, path, cycles),
            Color::Visiting => cycles.push(cycle_path(map, path, dep.node)),
            Color::Visited => {}
        }
    }

    path.pop();
    colors[node] = Color::Visited;
}

/// Slice the current DFS path from `start` and close it
pub(crate) fn cycle_path(map: &DependencyMap, path: &[usize], start: usize) -> Vec<NodeId> {
    let from = path.iter().position(|&n| n == start).unwrap_or(0);
    let mut cycle: Vec<NodeId> = path[from..].iter().map(|&n| map.id(n).to_string()).collect();
    cycle.push(map.id(start).to_string());
    cycle
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builder::WorkflowBuilder;

    #[test]
    fn test_acyclic_graph_has_no_cycles() {
        let graph = WorkflowBuilder::new("wf", "Diamond")
            .add_source("a", "x")
            .add_router("b")
            .add_router("c")
            .add_tool("d", crate::types::ToolOperation::Merge)
            .connect("a", "b")
            .connect("a", "c")
            .connect("b", "d")
            .connect("c", "d")
            .build();
        let map = DependencyMap::build(&graph).unwrap();

        assert!(find_cycles(&map).is_empty());
        assert!(ensure_acyclic(&map).is_ok());
    }

    #[test]
    fn test_two_node_cycle_reported_in_order() {
        // a consumes b, b consumes a
        let graph = WorkflowBuilder::new("wf", "Cycle")
            .add_router("a")
            .add_router("b")
            .connect("b", "a")
            .connect("a", "b")
            .build();
        let map = DependencyMap::build(&graph).unwrap();

        let cycles = find_cycles(&map);
        assert_eq!(cycles, vec![vec!["a", "b", "a"]]);
    }

    #[test]
    fn test_self_loop() {
        let graph = WorkflowBuilder::new("wf", "Self")
            .add_router("r")
            .connect("r", "r")
            .build();
        let map = DependencyMap::build(&graph).unwrap();

        let err = ensure_acyclic(&map).unwrap_err();
        match err {
            NodeEngineError::Dependency { cycles } => assert_eq!(cycles, vec![vec!["r", "r"]]),
            other => panic!("Expected dependency error, got {other:?}"),
        }
    }

    #[test]
    fn test_cycle_behind_acyclic_prefix() {
        // out <- x <- y <- z <- x
        let graph = WorkflowBuilder::new("wf", "Tail cycle")
            .add_sink("out")
            .add_router("x")
            .add_router("y")
            .add_router("z")
            .connect("x", "out")
            .connect("y", "x")
            .connect("z", "y")
            .connect("x", "z")
            .build();
        let map = DependencyMap::build(&graph).unwrap();

        let cycles = find_cycles(&map);
        assert_eq!(cycles, vec![vec!["x", "y", "z", "x"]]);
    }
}
