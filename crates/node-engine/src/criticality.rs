//! Critical-node classification
//!
//! Decides, before a run starts, which nodes must abort the run when they
//! fail. Rules are applied in a fixed precedence and the first match wins:
//!
//! 1. the run's target
//! 2. any sink
//! 3. any final-compute kind (generation engines)
//! 4. nodes on the path between generated output and the target: ancestors
//!    of the target in the *unpruned* map that themselves depend, directly
//!    or transitively, on a generation engine
//!
//! Everything else (sources, conditioning, tools and routers feeding a
//! generation step) is non-critical and degrades with a warning.

use std::collections::VecDeque;

use serde::Serialize;

use crate::graph::DependencyMap;
use crate::types::{NodeKindTag, WorkflowGraph};

/// Why a node was classified critical
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CriticalReason {
    Target,
    Sink,
    FinalCompute,
    OnPathToTarget,
}

/// Per-node criticality for one run, indexed like the dependency map
#[derive(Debug, Clone)]
pub struct Criticality {
    reasons: Vec<Option<CriticalReason>>,
}

impl Criticality {
    /// Classify every node of `graph` for a run ending at `target`
    ///
    /// `original` must be the map as built, before boundary pruning.
    pub fn classify(graph: &WorkflowGraph, original: &DependencyMap, target: usize) -> Self {
        let ancestors = original.ancestors(target);
        let after_generation = downstream_of_final_compute(graph, original);

        let reasons = graph
            .nodes
            .iter()
            .enumerate()
            .map(|(i, node)| {
                let tag = node.tag();
                if i == target {
                    Some(CriticalReason::Target)
                } else if tag == NodeKindTag::Sink {
                    Some(CriticalReason::Sink)
                } else if tag.is_final_compute() {
                    Some(CriticalReason::FinalCompute)
                } else if ancestors[i] && after_generation[i] {
                    Some(CriticalReason::OnPathToTarget)
                } else {
                    None
                }
            })
            .collect();

        Self { reasons }
    }

    pub fn is_critical(&self, index: usize) -> bool {
        self.reasons[index].is_some()
    }

    pub fn reason(&self, index: usize) -> Option<CriticalReason> {
        self.reasons[index]
    }

    /// Indices of all critical nodes
    pub fn critical_nodes(&self) -> Vec<usize> {
        self.reasons
            .iter()
            .enumerate()
            .filter_map(|(i, r)| r.map(|_| i))
            .collect()
    }
}

/// Mark nodes that consume, directly or transitively, a final-compute output
///
/// Forward BFS over inverted edges; safe on cyclic input.
fn downstream_of_final_compute(graph: &WorkflowGraph, map: &DependencyMap) -> Vec<bool> {
    let mut dependents: Vec<Vec<usize>> = vec![Vec::new(); map.len()];
    for node in 0..map.len() {
        for dep in map.dependencies(node) {
            dependents[dep.node].push(node);
        }
    }

    let mut marked = vec![false; map.len()];
    let mut queue: VecDeque<usize> = graph
        .nodes
        .iter()
        .enumerate()
        .filter(|(_, n)| n.tag().is_final_compute())
        .map(|(i, _)| i)
        .collect();

    while let Some(current) = queue.pop_front() {
        for &next in &dependents[current] {
            if !marked[next] {
                marked[next] = true;
                queue.push_back(next);
            }
        }
    }

    marked
}
