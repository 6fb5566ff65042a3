//! Topological execution order
//!
//! Post-order DFS from the target: every dependency is placed before the
//! node that consumes it, and only nodes the target actually needs are
//! scheduled. Meant to run on a pruned, cycle-free map, but still reports
//! a cycle the same way `cycle::find_cycles` does if one slipped through.

use crate::cycle::{cycle_path, Color};
use crate::error::{NodeEngineError, Result};
use crate::graph::DependencyMap;

/// Compute the execution order ending at `target`
///
/// Returned indices address `map`; the last element is always `target`.
pub fn execution_order(map: &DependencyMap, target: usize) -> Result<Vec<usize>> {
    let mut colors = vec![Color::Unvisited; map.len()];
    let mut path = Vec::new();
    let mut order = Vec::new();

    visit(map, target, &mut colors, &mut path, &mut order)?;
    Ok(order)
}

fn visit(
    map: &DependencyMap,
    node: usize,
    colors: &mut [Color],
    path: &mut Vec<usize>,
    order: &mut Vec<usize>,
) -> Result<()> {
    colors[node] = Color::Visiting;
    path.push(node);

    for dep in map.dependencies(node) {
        match colors[dep.node] {
            Color::Unvisited => visit(map, dep.node, colors, path, order)?,
            Color::Visiting => {
                return Err(NodeEngineError::Dependency {
                    cycles: vec![cycle_path(map, path, dep.node)],
                });
            }
            Color::Visited => {}
        }
    }

    path.pop();
    colors[node] = Color::Visited;
    order.push(node);
    Ok(())
}
