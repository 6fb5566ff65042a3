//! Boundary pruning
//!
//! A boundary is a boundary-capable node (a sink or preview) that already
//! holds a persisted artifact. Walking up from the target, every boundary
//! reached keeps its place in the map as a leaf, but its own dependency list
//! is emptied and the walk does not continue past it. Nodes without a
//! persisted artifact are walked through normally.
//!
//! The target itself is never treated as a boundary: asking for it means
//! asking for it to be recomputed.

use crate::graph::DependencyMap;

/// Prune `map` in place, starting from `target`
///
/// `is_boundary(index)` must answer "boundary-capable kind AND holds a
/// persisted artifact". Returns the indices of the boundaries reached, in
/// the order they were found.
pub fn prune_at_boundaries<F>(map: &mut DependencyMap, target: usize, is_boundary: F) -> Vec<usize>
where
    F: Fn(usize) -> bool,
{
    let mut visited = vec![false; map.len()];
    let mut boundaries = Vec::new();
    let mut stack = vec![target];
    visited[target] = true;

    while let Some(current) = stack.pop() {
        let deps: Vec<usize> = map.dependencies(current).iter().map(|d| d.node).collect();
        for dep in deps {
            if visited[dep] {
                continue;
            }
            visited[dep] = true;

            if is_boundary(dep) {
                map.truncate(dep);
                boundaries.push(dep);
                log::debug!("Pruned upstream of boundary node '{}'", map.id(dep));
            } else {
                stack.push(dep);
            }
        }
    }

    boundaries
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builder::WorkflowBuilder;
    use crate::types::WorkflowGraph;

    fn boundary_fn(graph: &WorkflowGraph) -> impl Fn(usize) -> bool + '_ {
        move |i| {
            let node = &graph.nodes[i];
            node.tag().is_boundary_capable() && node.kind.known_artifact().is_some()
        }
    }

    /// src -> gen -> preview(persisted) -> upscale -> out
    fn preview_chain() -> WorkflowGraph {
        WorkflowBuilder::new("wf", "Preview chain")
            .add_source("src", "https://img/a.png")
            .add_engine("gen", "a cat")
            .add_persisted_sink("preview", "https://img/gen.png")
            .add_tool("upscale", crate::types::ToolOperation::Upscale)
            .add_sink("out")
            .connect("src", "gen")
            .connect("gen", "preview")
            .connect("preview", "upscale")
            .connect("upscale", "out")
            .build()
    }

    #[test]
    fn test_boundary_truncated_but_kept() {
        let graph = preview_chain();
        let mut map = crate::graph::DependencyMap::build(&graph).unwrap();
        let target = map.index_of("out").unwrap();

        let boundaries = prune_at_boundaries(&mut map, target, boundary_fn(&graph));

        assert_eq!(boundaries, vec![map.index_of("preview").unwrap()]);
        assert!(map.dependency_ids("preview").is_empty());
        // The consumer still lists the boundary
        assert_eq!(map.dependency_ids("upscale"), vec!["preview"]);
        // Beyond the boundary is untouched but unreachable
        assert_eq!(map.dependency_ids("gen"), vec!["src"]);
    }

    #[test]
    fn test_sink_without_artifact_is_walked_through() {
        let graph = WorkflowBuilder::new("wf", "No artifact")
            .add_source("src", "https://img/a.png")
            .add_sink("preview")
            .add_sink("out")
            .connect("src", "preview")
            .connect("preview", "out")
            .build();
        let mut map = crate::graph::DependencyMap::build(&graph).unwrap();
        let target = map.index_of("out").unwrap();

        let boundaries = prune_at_boundaries(&mut map, target, boundary_fn(&graph));

        assert!(boundaries.is_empty());
        assert_eq!(map.dependency_ids("preview"), vec!["src"]);
    }

    #[test]
    fn test_target_is_never_pruned() {
        let graph = preview_chain();
        let mut map = crate::graph::DependencyMap::build(&graph).unwrap();
        let target = map.index_of("preview").unwrap();

        let boundaries = prune_at_boundaries(&mut map, target, boundary_fn(&graph));

        assert!(boundaries.is_empty());
        assert_eq!(map.dependency_ids("preview"), vec!["gen"]);
    }

    #[test]
    fn test_non_sink_with_artifact_is_not_a_boundary() {
        // Source nodes carry a URL but are not boundary-capable
        let graph = preview_chain();
        let mut map = crate::graph::DependencyMap::build(&graph).unwrap();
        let target = map.index_of("gen").unwrap();

        let boundaries = prune_at_boundaries(&mut map, target, boundary_fn(&graph));

        assert!(boundaries.is_empty());
        assert_eq!(map.dependency_ids("gen"), vec!["src"]);
    }
}
